use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::dsl::{count_star, sum};
use diesel::prelude::*;
use uuid::Uuid;

use super::models::{Lead, LeadChanges, LeadFilter, LeadStageHistory, StageChange, StageTransition};
use crate::funnel::custom::StageCount;
use crate::funnel::LeadStage;
use crate::shared::error::{CrmError, CrmResult};
use crate::shared::schema::{lead_stage_history, leads, org_members};
use crate::shared::utils::{interact, DbPool};

/// Persistence of leads and their stage history. Every method is scoped to
/// one organization.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Inserts the lead together with its initial history row.
    async fn insert(&self, lead: Lead, initial: LeadStageHistory) -> CrmResult<Lead>;

    async fn get(&self, org_id: Uuid, id: Uuid) -> CrmResult<Lead>;

    async fn list(&self, org_id: Uuid, filter: LeadFilter) -> CrmResult<Vec<Lead>>;

    async fn update(&self, org_id: Uuid, id: Uuid, changes: LeadChanges) -> CrmResult<Lead>;

    /// Locks the lead, moves it to `change.stage` and appends one history
    /// row, all or nothing. Moving to the current stage changes nothing.
    async fn change_stage(&self, org_id: Uuid, id: Uuid, change: StageChange) -> CrmResult<StageTransition>;

    /// Field edits plus an optional stage move under one row lock. Nothing
    /// is written when either part fails.
    async fn update_with_stage(
        &self,
        org_id: Uuid,
        id: Uuid,
        changes: LeadChanges,
        stage: Option<StageChange>,
    ) -> CrmResult<StageTransition>;

    /// Removes the lead. History rows are kept.
    async fn delete(&self, org_id: Uuid, id: Uuid) -> CrmResult<()>;

    /// History of a lead in commit order, also after the lead is gone.
    async fn history(&self, org_id: Uuid, lead_id: Uuid) -> CrmResult<Vec<LeadStageHistory>>;

    async fn stage_counts(&self, org_id: Uuid) -> CrmResult<Vec<StageCount>>;

    async fn is_member(&self, org_id: Uuid, user_id: Uuid) -> CrmResult<bool>;

    async fn find_by_phone(&self, org_id: Uuid, phone: &str) -> CrmResult<Option<Lead>>;
}

/// Closing stages stamp `closed_at`; reopening clears it.
pub fn closed_at_for(lead: &Lead, next: LeadStage, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match (next.is_closed(), lead.stage.is_closed()) {
        (true, true) => lead.closed_at.or(Some(at)),
        (true, false) => Some(at),
        (false, _) => None,
    }
}

fn lock_lead(conn: &mut PgConnection, org_id: Uuid, id: Uuid) -> CrmResult<Lead> {
    leads::table
        .filter(leads::id.eq(id))
        .filter(leads::org_id.eq(org_id))
        .select(Lead::as_select())
        .for_update()
        .first(conn)
        .optional()?
        .ok_or(CrmError::not_found("Lead"))
}

/// Expects the row lock to be held. The timestamp is taken here so history
/// time follows lock order; `seq` breaks ties.
fn move_stage(conn: &mut PgConnection, current: Lead, change: StageChange) -> CrmResult<StageTransition> {
    if current.stage == change.stage {
        return Ok(StageTransition {
            lead: current,
            history: None,
            changed: false,
        });
    }

    let at = Utc::now();
    let closed_at = closed_at_for(&current, change.stage, at);
    let updated: Lead = diesel::update(leads::table.find(current.id))
        .set((
            leads::stage.eq(change.stage),
            leads::closed_at.eq(closed_at),
            leads::updated_at.eq(at),
        ))
        .returning(Lead::as_returning())
        .get_result(conn)?;

    let entry = LeadStageHistory::new(&updated, Some(current.stage), change.reason, change.changed_by, at);
    diesel::insert_into(lead_stage_history::table)
        .values(&entry)
        .execute(conn)?;

    Ok(StageTransition {
        lead: updated,
        history: Some(entry),
        changed: true,
    })
}

#[derive(Clone)]
pub struct PgLeadStore {
    pool: DbPool,
}

impl PgLeadStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn insert(&self, lead: Lead, initial: LeadStageHistory) -> CrmResult<Lead> {
        interact(&self.pool, move |conn| {
            conn.transaction::<_, CrmError, _>(|conn| {
                let created = diesel::insert_into(leads::table)
                    .values(&lead)
                    .returning(Lead::as_returning())
                    .get_result(conn)?;
                diesel::insert_into(lead_stage_history::table)
                    .values(&initial)
                    .execute(conn)?;
                Ok(created)
            })
        })
        .await
    }

    async fn get(&self, org_id: Uuid, id: Uuid) -> CrmResult<Lead> {
        interact(&self.pool, move |conn| {
            leads::table
                .filter(leads::id.eq(id))
                .filter(leads::org_id.eq(org_id))
                .select(Lead::as_select())
                .first(conn)
                .optional()?
                .ok_or(CrmError::not_found("Lead"))
        })
        .await
    }

    async fn list(&self, org_id: Uuid, filter: LeadFilter) -> CrmResult<Vec<Lead>> {
        interact(&self.pool, move |conn| {
            let mut query = leads::table
                .filter(leads::org_id.eq(org_id))
                .select(Lead::as_select())
                .into_boxed();

            if let Some(stage) = filter.stage {
                query = query.filter(leads::stage.eq(stage));
            }
            if let Some(assignee) = filter.assigned_to {
                query = query.filter(leads::assigned_to.eq(assignee));
            }
            if let Some(term) = filter.search_term() {
                let pattern = format!("%{}%", term.replace('%', "\\%").replace('_', "\\_"));
                query = query.filter(
                    leads::name
                        .ilike(pattern.clone())
                        .or(leads::email.ilike(pattern.clone()))
                        .or(leads::phone.ilike(pattern)),
                );
            }

            let rows = query
                .order(leads::created_at.desc())
                .limit(filter.limit())
                .offset(filter.offset())
                .load(conn)?;
            Ok(rows)
        })
        .await
    }

    async fn update(&self, org_id: Uuid, id: Uuid, changes: LeadChanges) -> CrmResult<Lead> {
        interact(&self.pool, move |conn| {
            diesel::update(
                leads::table
                    .filter(leads::id.eq(id))
                    .filter(leads::org_id.eq(org_id)),
            )
            .set(&changes)
            .returning(Lead::as_returning())
            .get_result(conn)
            .optional()?
            .ok_or(CrmError::not_found("Lead"))
        })
        .await
    }

    async fn change_stage(&self, org_id: Uuid, id: Uuid, change: StageChange) -> CrmResult<StageTransition> {
        interact(&self.pool, move |conn| {
            conn.transaction::<_, CrmError, _>(|conn| {
                let current = lock_lead(conn, org_id, id)?;
                move_stage(conn, current, change)
            })
        })
        .await
    }

    async fn update_with_stage(
        &self,
        org_id: Uuid,
        id: Uuid,
        changes: LeadChanges,
        stage: Option<StageChange>,
    ) -> CrmResult<StageTransition> {
        interact(&self.pool, move |conn| {
            conn.transaction::<_, CrmError, _>(|conn| {
                lock_lead(conn, org_id, id)?;
                let updated: Lead = diesel::update(leads::table.find(id))
                    .set(&changes)
                    .returning(Lead::as_returning())
                    .get_result(conn)?;
                match stage {
                    Some(change) => move_stage(conn, updated, change),
                    None => Ok(StageTransition {
                        lead: updated,
                        history: None,
                        changed: false,
                    }),
                }
            })
        })
        .await
    }

    async fn delete(&self, org_id: Uuid, id: Uuid) -> CrmResult<()> {
        interact(&self.pool, move |conn| {
            let deleted = diesel::delete(
                leads::table
                    .filter(leads::id.eq(id))
                    .filter(leads::org_id.eq(org_id)),
            )
            .execute(conn)?;
            if deleted == 0 {
                return Err(CrmError::not_found("Lead"));
            }
            Ok(())
        })
        .await
    }

    async fn history(&self, org_id: Uuid, lead_id: Uuid) -> CrmResult<Vec<LeadStageHistory>> {
        interact(&self.pool, move |conn| {
            let rows = lead_stage_history::table
                .filter(lead_stage_history::lead_id.eq(lead_id))
                .filter(lead_stage_history::org_id.eq(org_id))
                .order(lead_stage_history::seq.asc())
                .select(LeadStageHistory::as_select())
                .load(conn)?;
            Ok(rows)
        })
        .await
    }

    async fn stage_counts(&self, org_id: Uuid) -> CrmResult<Vec<StageCount>> {
        interact(&self.pool, move |conn| {
            let rows: Vec<(LeadStage, i64, Option<BigDecimal>)> = leads::table
                .filter(leads::org_id.eq(org_id))
                .group_by(leads::stage)
                .select((leads::stage, count_star(), sum(leads::negotiated_value)))
                .load(conn)?;

            Ok(rows
                .into_iter()
                .map(|(stage, count, total)| StageCount {
                    stage,
                    count,
                    total_value: total.unwrap_or_else(|| BigDecimal::from(0)),
                })
                .collect())
        })
        .await
    }

    async fn is_member(&self, org_id: Uuid, user_id: Uuid) -> CrmResult<bool> {
        interact(&self.pool, move |conn| {
            let found = diesel::select(diesel::dsl::exists(
                org_members::table
                    .filter(org_members::org_id.eq(org_id))
                    .filter(org_members::user_id.eq(user_id)),
            ))
            .get_result(conn)?;
            Ok(found)
        })
        .await
    }

    async fn find_by_phone(&self, org_id: Uuid, phone: &str) -> CrmResult<Option<Lead>> {
        let phone = phone.to_string();
        interact(&self.pool, move |conn| {
            let lead = leads::table
                .filter(leads::org_id.eq(org_id))
                .filter(leads::phone.eq(phone))
                .order(leads::created_at.desc())
                .select(Lead::as_select())
                .first(conn)
                .optional()?;
            Ok(lead)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn lead_at(stage: LeadStage, closed_at: Option<DateTime<Utc>>) -> Lead {
        let now = Utc::now();
        Lead {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            name: "Maria".to_string(),
            email: None,
            phone: None,
            stage,
            rating: 0,
            assigned_to: None,
            created_by: Uuid::new_v4(),
            product_id: None,
            negotiated_value: None,
            payment_method_id: None,
            installments: None,
            notes: None,
            source: None,
            created_at: now,
            updated_at: now,
            closed_at,
        }
    }

    #[test]
    fn test_closing_stamps_and_reopening_clears() {
        let now = Utc::now();
        let earlier = now - Duration::days(2);

        let open = lead_at(LeadStage::Positive, None);
        assert_eq!(closed_at_for(&open, LeadStage::Success, now), Some(now));
        assert_eq!(closed_at_for(&open, LeadStage::Scheduled, now), None);

        let closed = lead_at(LeadStage::Trash, Some(earlier));
        assert_eq!(closed_at_for(&closed, LeadStage::Cloud, now), Some(earlier));
        assert_eq!(closed_at_for(&closed, LeadStage::Prospect, now), None);
    }
}
