//! Condition records for HelmRelease status

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status, following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Condition types reported on a HelmRelease
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ConditionType {
    /// Overall health: the desired state is released
    Released,
    ChartFetched,
    Deployed,
    Tested,
    RolledBack,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Released => "Released",
            Self::ChartFetched => "ChartFetched",
            Self::Deployed => "Deployed",
            Self::Tested => "Tested",
            Self::RolledBack => "RolledBack",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,

    pub status: ConditionStatus,

    /// Machine-readable reason; the phase that produced the condition
    pub reason: String,

    pub message: String,

    pub last_update_time: DateTime<Utc>,

    /// Last time `status` changed value
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        type_: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            type_,
            status,
            reason: reason.into(),
            message: message.into(),
            last_update_time: now,
            last_transition_time: now,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_serializes_kubernetes_style() {
        let now = Utc::now();
        let c = Condition::new(
            ConditionType::Released,
            ConditionStatus::True,
            "Succeeded",
            "done",
            now,
        );
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["type"], "Released");
        assert_eq!(json["status"], "True");
        assert!(json.get("lastTransitionTime").is_some());
        assert!(json.get("lastUpdateTime").is_some());
        assert!(c.is_true());
    }
}
