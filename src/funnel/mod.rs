//! Funnel stages.
//!
//! `LeadStage` is the closed set of lifecycle states stored on every lead.
//! Tenants rename and recolor stages through [`custom`] records, which map
//! back onto this enum by position.

pub mod api;
pub mod custom;

use diesel::deserialize::{self, FromSql};
use diesel::pg::{Pg, PgValue};
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::Text;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};

pub use api::configure_funnel_routes;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum LeadStage {
    Prospect,
    Contacted,
    Convincing,
    Scheduled,
    Positive,
    WaitingPayment,
    Success,
    Trash,
    Cloud,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    Funnel,
    Cloud,
    Trash,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageMetadata {
    pub stage: LeadStage,
    pub label: &'static str,
    pub color: &'static str,
    pub ordinal: u8,
    pub stage_type: StageType,
    pub is_closed: bool,
}

impl LeadStage {
    pub const ALL: [LeadStage; 9] = [
        Self::Prospect,
        Self::Contacted,
        Self::Convincing,
        Self::Scheduled,
        Self::Positive,
        Self::WaitingPayment,
        Self::Success,
        Self::Trash,
        Self::Cloud,
    ];

    /// Funnel stages in board order; index + 1 is the custom stage position.
    pub const FUNNEL: [LeadStage; 7] = [
        Self::Prospect,
        Self::Contacted,
        Self::Convincing,
        Self::Scheduled,
        Self::Positive,
        Self::WaitingPayment,
        Self::Success,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prospect => "prospect",
            Self::Contacted => "contacted",
            Self::Convincing => "convincing",
            Self::Scheduled => "scheduled",
            Self::Positive => "positive",
            Self::WaitingPayment => "waiting_payment",
            Self::Success => "success",
            Self::Trash => "trash",
            Self::Cloud => "cloud",
        }
    }

    pub fn stage_type(&self) -> StageType {
        match self {
            Self::Trash => StageType::Trash,
            Self::Cloud => StageType::Cloud,
            _ => StageType::Funnel,
        }
    }

    /// Terminal outcomes. Entering one stamps `closed_at` on the lead.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Success | Self::Trash | Self::Cloud)
    }

    pub fn funnel_position(&self) -> Option<i32> {
        Self::FUNNEL
            .iter()
            .position(|s| s == self)
            .map(|i| i as i32 + 1)
    }

    pub fn from_position(position: i32) -> Option<Self> {
        usize::try_from(position - 1)
            .ok()
            .and_then(|i| Self::FUNNEL.get(i).copied())
    }

    pub fn metadata(&self) -> StageMetadata {
        let (label, color) = match self {
            Self::Prospect => ("Prospect", "#94a3b8"),
            Self::Contacted => ("Contacted", "#60a5fa"),
            Self::Convincing => ("Convincing", "#a78bfa"),
            Self::Scheduled => ("Scheduled", "#f59e0b"),
            Self::Positive => ("Positive", "#34d399"),
            Self::WaitingPayment => ("Waiting payment", "#fb923c"),
            Self::Success => ("Success", "#16a34a"),
            Self::Trash => ("Trash", "#ef4444"),
            Self::Cloud => ("Cloud", "#0ea5e9"),
        };
        let ordinal = Self::ALL
            .iter()
            .position(|s| s == self)
            .map(|i| i as u8)
            .unwrap_or_default();

        StageMetadata {
            stage: *self,
            label,
            color,
            ordinal,
            stage_type: self.stage_type(),
            is_closed: self.is_closed(),
        }
    }
}

impl Default for LeadStage {
    fn default() -> Self {
        Self::Prospect
    }
}

impl std::fmt::Display for LeadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LeadStage {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|stage| stage.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown lead stage: {s}"))
    }
}

impl ToSql<Text, Pg> for LeadStage {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        <str as ToSql<Text, Pg>>::to_sql(self.as_str(), out)
    }
}

impl FromSql<Text, Pg> for LeadStage {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
        value.parse().map_err(Into::into)
    }
}

impl StageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Funnel => "funnel",
            Self::Cloud => "cloud",
            Self::Trash => "trash",
        }
    }
}

impl std::str::FromStr for StageType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "funnel" => Ok(Self::Funnel),
            "cloud" => Ok(Self::Cloud),
            "trash" => Ok(Self::Trash),
            _ => Err(format!("Unknown stage type: {s}")),
        }
    }
}

impl ToSql<Text, Pg> for StageType {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        <str as ToSql<Text, Pg>>::to_sql(self.as_str(), out)
    }
}

impl FromSql<Text, Pg> for StageType {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
        value.parse().map_err(Into::into)
    }
}
