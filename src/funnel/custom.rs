use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::{LeadStage, StageType};
use crate::shared::schema::funnel_stages_custom;

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = funnel_stages_custom)]
pub struct FunnelStageCustom {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub color: String,
    pub position: i32,
    pub stage_type: StageType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = funnel_stages_custom)]
pub struct NewFunnelStage {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub color: String,
    pub position: i32,
    pub stage_type: StageType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FunnelStageCustom {
    /// Fixed stage this display stage stands for. Funnel stages map by
    /// position, cloud and trash by type.
    pub fn lead_stage(&self) -> Option<LeadStage> {
        match self.stage_type {
            StageType::Funnel => LeadStage::from_position(self.position),
            StageType::Cloud => Some(LeadStage::Cloud),
            StageType::Trash => Some(LeadStage::Trash),
        }
    }
}

/// The nine stages a new organization starts with, aligned with
/// [`LeadStage`].
pub fn default_stages(org_id: Uuid) -> Vec<NewFunnelStage> {
    let now = Utc::now();
    let funnel = LeadStage::FUNNEL.iter().enumerate().map(|(i, stage)| (*stage, i as i32 + 1));
    let outside = [(LeadStage::Cloud, 0), (LeadStage::Trash, 0)];

    funnel
        .chain(outside)
        .map(|(stage, position)| {
            let meta = stage.metadata();
            NewFunnelStage {
                id: Uuid::new_v4(),
                org_id,
                name: meta.label.to_string(),
                color: meta.color.to_string(),
                position,
                stage_type: meta.stage_type,
                created_at: now,
                updated_at: now,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlignmentIssue {
    MissingPosition { position: i32, expected: LeadStage },
    DuplicatePosition { position: i32, stage_ids: Vec<Uuid> },
    UnmappedStage { stage_id: Uuid, name: String, position: i32 },
    MissingStageType { stage_type: StageType },
    DuplicateStageType { stage_type: StageType, stage_ids: Vec<Uuid> },
}

/// Lists every way the tenant's custom stages deviate from the fixed enum.
/// An empty result means counts render correctly.
pub fn check_alignment(stages: &[FunnelStageCustom]) -> Vec<AlignmentIssue> {
    let mut issues = Vec::new();

    let mut by_position: BTreeMap<i32, Vec<Uuid>> = BTreeMap::new();
    let mut by_type: HashMap<StageType, Vec<Uuid>> = HashMap::new();

    for stage in stages {
        match stage.stage_type {
            StageType::Funnel => {
                if stage.lead_stage().is_none() {
                    issues.push(AlignmentIssue::UnmappedStage {
                        stage_id: stage.id,
                        name: stage.name.clone(),
                        position: stage.position,
                    });
                } else {
                    by_position.entry(stage.position).or_default().push(stage.id);
                }
            }
            other => by_type.entry(other).or_default().push(stage.id),
        }
    }

    for (index, expected) in LeadStage::FUNNEL.iter().enumerate() {
        let position = index as i32 + 1;
        match by_position.get(&position) {
            None => issues.push(AlignmentIssue::MissingPosition {
                position,
                expected: *expected,
            }),
            Some(ids) if ids.len() > 1 => issues.push(AlignmentIssue::DuplicatePosition {
                position,
                stage_ids: ids.clone(),
            }),
            Some(_) => {}
        }
    }

    for stage_type in [StageType::Cloud, StageType::Trash] {
        match by_type.get(&stage_type) {
            None => issues.push(AlignmentIssue::MissingStageType { stage_type }),
            Some(ids) if ids.len() > 1 => issues.push(AlignmentIssue::DuplicateStageType {
                stage_type,
                stage_ids: ids.clone(),
            }),
            Some(_) => {}
        }
    }

    issues
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageCount {
    pub stage: LeadStage,
    pub count: i64,
    pub total_value: BigDecimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoardColumn {
    pub stage_id: Option<Uuid>,
    pub name: String,
    pub color: String,
    pub stage_type: StageType,
    pub lead_stage: LeadStage,
    pub lead_count: i64,
    pub total_value: BigDecimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunnelBoard {
    pub columns: Vec<BoardColumn>,
    pub total_leads: i64,
    pub issues: Vec<AlignmentIssue>,
}

/// Projects per-stage lead counts onto the tenant's display stages.
///
/// Each fixed stage is shown once. When no custom stage maps to a stage that
/// still holds leads, a fallback column with the built-in label is added so
/// the total on the board always equals the number of leads.
pub fn build_board(stages: &[FunnelStageCustom], counts: &[StageCount]) -> FunnelBoard {
    let issues = check_alignment(stages);

    let mut ordered: Vec<&FunnelStageCustom> = stages.iter().collect();
    ordered.sort_by_key(|s| {
        let group = match s.stage_type {
            StageType::Funnel => 0,
            StageType::Cloud => 1,
            StageType::Trash => 2,
        };
        (group, s.position)
    });

    let lookup: HashMap<LeadStage, &StageCount> = counts.iter().map(|c| (c.stage, c)).collect();
    let mut seen = Vec::new();
    let mut columns = Vec::new();

    for stage in ordered {
        let Some(lead_stage) = stage.lead_stage() else {
            continue;
        };
        if seen.contains(&lead_stage) {
            continue;
        }
        seen.push(lead_stage);

        let (lead_count, total_value) = lookup
            .get(&lead_stage)
            .map(|c| (c.count, c.total_value.clone()))
            .unwrap_or_else(|| (0, BigDecimal::from(0)));

        columns.push(BoardColumn {
            stage_id: Some(stage.id),
            name: stage.name.clone(),
            color: stage.color.clone(),
            stage_type: stage.stage_type,
            lead_stage,
            lead_count,
            total_value,
        });
    }

    for count in counts {
        if count.count == 0 || seen.contains(&count.stage) {
            continue;
        }
        let meta = count.stage.metadata();
        columns.push(BoardColumn {
            stage_id: None,
            name: meta.label.to_string(),
            color: meta.color.to_string(),
            stage_type: meta.stage_type,
            lead_stage: count.stage,
            lead_count: count.count,
            total_value: count.total_value.clone(),
        });
    }

    FunnelBoard {
        total_leads: columns.iter().map(|c| c.lead_count).sum(),
        columns,
        issues,
    }
}
