use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::funnel::LeadStage;
use crate::shared::schema::{lead_stage_history, leads};

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = leads)]
pub struct Lead {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub stage: LeadStage,
    pub rating: i16,
    pub assigned_to: Option<Uuid>,
    pub created_by: Uuid,
    pub product_id: Option<Uuid>,
    pub negotiated_value: Option<BigDecimal>,
    pub payment_method_id: Option<Uuid>,
    pub installments: Option<i32>,
    pub notes: Option<String>,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Append-only record of one stage transition. `previous_stage` is `None`
/// only for the row written when the lead is created.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = lead_stage_history)]
pub struct LeadStageHistory {
    pub id: Uuid,
    pub org_id: Uuid,
    pub lead_id: Uuid,
    pub previous_stage: Option<LeadStage>,
    pub stage: LeadStage,
    pub reason: Option<String>,
    pub changed_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl LeadStageHistory {
    pub fn new(
        lead: &Lead,
        previous_stage: Option<LeadStage>,
        reason: Option<String>,
        changed_by: Uuid,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id: lead.org_id,
            lead_id: lead.id,
            previous_stage,
            stage: lead.stage,
            reason,
            changed_by,
            created_at: at,
        }
    }
}

/// Field updates other than the stage. Outer `None` leaves a column
/// untouched, `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = leads)]
pub struct LeadChanges {
    pub name: Option<String>,
    pub email: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub rating: Option<i16>,
    pub assigned_to: Option<Option<Uuid>>,
    pub product_id: Option<Option<Uuid>>,
    pub negotiated_value: Option<Option<BigDecimal>>,
    pub payment_method_id: Option<Option<Uuid>>,
    pub installments: Option<Option<i32>>,
    pub notes: Option<Option<String>>,
    pub source: Option<Option<String>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LeadChanges {
    pub fn apply_to(&self, lead: &mut Lead) {
        if let Some(v) = &self.name {
            lead.name = v.clone();
        }
        if let Some(v) = &self.email {
            lead.email = v.clone();
        }
        if let Some(v) = &self.phone {
            lead.phone = v.clone();
        }
        if let Some(v) = self.rating {
            lead.rating = v;
        }
        if let Some(v) = self.assigned_to {
            lead.assigned_to = v;
        }
        if let Some(v) = self.product_id {
            lead.product_id = v;
        }
        if let Some(v) = &self.negotiated_value {
            lead.negotiated_value = v.clone();
        }
        if let Some(v) = self.payment_method_id {
            lead.payment_method_id = v;
        }
        if let Some(v) = self.installments {
            lead.installments = v;
        }
        if let Some(v) = &self.notes {
            lead.notes = v.clone();
        }
        if let Some(v) = &self.source {
            lead.source = v.clone();
        }
        if let Some(v) = self.updated_at {
            lead.updated_at = v;
        }
    }
}

/// Distinguishes an absent JSON key (`None`) from an explicit `null`
/// (`Some(None)`).
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateLeadRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub phone: Option<Option<String>>,
    pub rating: Option<i16>,
    #[serde(default, deserialize_with = "double_option")]
    pub assigned_to: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    pub product_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    pub negotiated_value: Option<Option<BigDecimal>>,
    #[serde(default, deserialize_with = "double_option")]
    pub payment_method_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    pub installments: Option<Option<i32>>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub source: Option<Option<String>>,
    pub stage: Option<LeadStage>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeStageRequest {
    pub stage: LeadStage,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignLeadRequest {
    pub user_id: Option<Uuid>,
}

/// Input of the atomic stage change. The store stamps the time once it
/// holds the row lock.
#[derive(Debug, Clone)]
pub struct StageChange {
    pub stage: LeadStage,
    pub reason: Option<String>,
    pub changed_by: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageTransition {
    pub lead: Lead,
    pub history: Option<LeadStageHistory>,
    pub changed: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadFilter {
    pub stage: Option<LeadStage>,
    pub assigned_to: Option<Uuid>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl LeadFilter {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 500;

    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn matches(&self, lead: &Lead) -> bool {
        if self.stage.is_some_and(|s| s != lead.stage) {
            return false;
        }
        if self.assigned_to.is_some() && self.assigned_to != lead.assigned_to {
            return false;
        }
        match self.search_term() {
            Some(term) => {
                let term = term.to_lowercase();
                [Some(&lead.name), lead.email.as_ref(), lead.phone.as_ref()]
                    .into_iter()
                    .flatten()
                    .any(|field| field.to_lowercase().contains(&term))
            }
            None => true,
        }
    }
}

/// A gap found while walking a lead's history in creation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainBreak {
    pub entry_id: Uuid,
    pub expected_previous: Option<LeadStage>,
    pub actual_previous: Option<LeadStage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainReport {
    pub lead_id: Uuid,
    pub entries: usize,
    pub breaks: Vec<ChainBreak>,
    /// Stage of the lead, `None` once it has been deleted.
    pub current_stage: Option<LeadStage>,
    pub tail_matches_lead: bool,
    pub intact: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_request_distinguishes_null_from_absent() {
        let req: UpdateLeadRequest =
            serde_json::from_str(r#"{"email": null, "rating": 4}"#).expect("parse");
        assert_eq!(req.email, Some(None));
        assert_eq!(req.phone, None);
        assert_eq!(req.rating, Some(4));

        let req: UpdateLeadRequest =
            serde_json::from_str(r#"{"notes": "call after lunch"}"#).expect("parse");
        assert_eq!(req.notes, Some(Some("call after lunch".to_string())));
    }

    #[test]
    fn test_filter_limits_are_clamped() {
        let filter = LeadFilter {
            limit: Some(10_000),
            offset: Some(-5),
            ..Default::default()
        };
        assert_eq!(filter.limit(), LeadFilter::MAX_LIMIT);
        assert_eq!(filter.offset(), 0);
        assert_eq!(LeadFilter::default().limit(), LeadFilter::DEFAULT_LIMIT);
    }
}
