use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::models::{Lead, LeadChanges, LeadFilter, LeadStageHistory, StageChange, StageTransition};
use super::store::{closed_at_for, LeadStore};
use crate::funnel::custom::StageCount;
use crate::shared::error::{CrmError, CrmResult};

#[derive(Default)]
struct Inner {
    leads: Vec<Lead>,
    history: Vec<LeadStageHistory>,
    members: HashSet<(Uuid, Uuid)>,
}

/// In-process store with the same transactional guarantees as the Postgres
/// one: every mutation holds the single lock for its whole duration and
/// writes nothing when it fails.
#[derive(Default)]
pub struct MemoryLeadStore {
    inner: Mutex<Inner>,
    fail_history_writes: AtomicBool,
}

impl MemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("lead store lock poisoned")
    }

    pub fn add_member(&self, org_id: Uuid, user_id: Uuid) {
        self.lock().members.insert((org_id, user_id));
    }

    /// Makes the next history inserts fail, as a broken connection would.
    pub fn fail_history_writes(&self, fail: bool) {
        self.fail_history_writes.store(fail, Ordering::SeqCst);
    }

    pub fn all_history(&self) -> Vec<LeadStageHistory> {
        self.lock().history.clone()
    }

    fn position(inner: &Inner, org_id: Uuid, id: Uuid) -> CrmResult<usize> {
        inner
            .leads
            .iter()
            .position(|l| l.id == id && l.org_id == org_id)
            .ok_or(CrmError::not_found("Lead"))
    }

    /// Writes `lead` and the optional stage move while the caller holds the
    /// lock. The history vector is append-only, so its order is commit order.
    fn commit(
        &self,
        inner: &mut Inner,
        index: usize,
        lead: Lead,
        change: Option<StageChange>,
    ) -> CrmResult<StageTransition> {
        let change = match change {
            Some(change) if change.stage != lead.stage => change,
            _ => {
                inner.leads[index] = lead.clone();
                return Ok(StageTransition {
                    lead,
                    history: None,
                    changed: false,
                });
            }
        };

        let at = Utc::now();
        let mut updated = lead.clone();
        updated.closed_at = closed_at_for(&lead, change.stage, at);
        updated.stage = change.stage;
        updated.updated_at = at;

        let entry = LeadStageHistory::new(&updated, Some(lead.stage), change.reason, change.changed_by, at);

        self.check_history_write()?;
        inner.leads[index] = updated.clone();
        inner.history.push(entry.clone());

        Ok(StageTransition {
            lead: updated,
            history: Some(entry),
            changed: true,
        })
    }

    fn check_history_write(&self) -> CrmResult<()> {
        if self.fail_history_writes.load(Ordering::SeqCst) {
            return Err(CrmError::Internal("history insert failed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn insert(&self, lead: Lead, initial: LeadStageHistory) -> CrmResult<Lead> {
        let mut inner = self.lock();
        self.check_history_write()?;
        inner.leads.push(lead.clone());
        inner.history.push(initial);
        Ok(lead)
    }

    async fn get(&self, org_id: Uuid, id: Uuid) -> CrmResult<Lead> {
        self.lock()
            .leads
            .iter()
            .find(|l| l.id == id && l.org_id == org_id)
            .cloned()
            .ok_or(CrmError::not_found("Lead"))
    }

    async fn list(&self, org_id: Uuid, filter: LeadFilter) -> CrmResult<Vec<Lead>> {
        let inner = self.lock();
        let mut rows: Vec<Lead> = inner
            .leads
            .iter()
            .filter(|l| l.org_id == org_id && filter.matches(l))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect())
    }

    async fn update(&self, org_id: Uuid, id: Uuid, changes: LeadChanges) -> CrmResult<Lead> {
        let mut inner = self.lock();
        let lead = inner
            .leads
            .iter_mut()
            .find(|l| l.id == id && l.org_id == org_id)
            .ok_or(CrmError::not_found("Lead"))?;
        changes.apply_to(lead);
        Ok(lead.clone())
    }

    async fn change_stage(&self, org_id: Uuid, id: Uuid, change: StageChange) -> CrmResult<StageTransition> {
        let mut inner = self.lock();
        let index = Self::position(&inner, org_id, id)?;
        let current = inner.leads[index].clone();
        self.commit(&mut inner, index, current, Some(change))
    }

    async fn update_with_stage(
        &self,
        org_id: Uuid,
        id: Uuid,
        changes: LeadChanges,
        stage: Option<StageChange>,
    ) -> CrmResult<StageTransition> {
        let mut inner = self.lock();
        let index = Self::position(&inner, org_id, id)?;
        let mut edited = inner.leads[index].clone();
        changes.apply_to(&mut edited);
        self.commit(&mut inner, index, edited, stage)
    }

    async fn delete(&self, org_id: Uuid, id: Uuid) -> CrmResult<()> {
        let mut inner = self.lock();
        let before = inner.leads.len();
        inner.leads.retain(|l| !(l.id == id && l.org_id == org_id));
        if inner.leads.len() == before {
            return Err(CrmError::not_found("Lead"));
        }
        Ok(())
    }

    async fn history(&self, org_id: Uuid, lead_id: Uuid) -> CrmResult<Vec<LeadStageHistory>> {
        let inner = self.lock();
        let mut rows: Vec<LeadStageHistory> = inner
            .history
            .iter()
            .filter(|h| h.lead_id == lead_id && h.org_id == org_id)
            .cloned()
            .collect();
        Ok(rows)
    }

    async fn stage_counts(&self, org_id: Uuid) -> CrmResult<Vec<StageCount>> {
        let inner = self.lock();
        let mut counts: BTreeMap<_, (i64, BigDecimal)> = BTreeMap::new();
        for lead in inner.leads.iter().filter(|l| l.org_id == org_id) {
            let entry = counts
                .entry(lead.stage)
                .or_insert_with(|| (0, BigDecimal::from(0)));
            entry.0 += 1;
            if let Some(value) = &lead.negotiated_value {
                entry.1 += value;
            }
        }
        Ok(counts
            .into_iter()
            .map(|(stage, (count, total_value))| StageCount {
                stage,
                count,
                total_value,
            })
            .collect())
    }

    async fn is_member(&self, org_id: Uuid, user_id: Uuid) -> CrmResult<bool> {
        Ok(self.lock().members.contains(&(org_id, user_id)))
    }

    async fn find_by_phone(&self, org_id: Uuid, phone: &str) -> CrmResult<Option<Lead>> {
        Ok(self
            .lock()
            .leads
            .iter()
            .filter(|l| l.org_id == org_id && l.phone.as_deref() == Some(phone))
            .max_by_key(|l| l.created_at)
            .cloned())
    }
}
