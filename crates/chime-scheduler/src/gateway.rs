use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Trigger;

/// Terminal result of one gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    /// An alarm is armed for `at`.
    Scheduled { at: DateTime<Utc> },
    /// `count` armed alarms were removed (0 when nothing was armed).
    Canceled { count: usize },
    /// Nothing was armed. The caller decides whether to retry, alert or
    /// leave the trigger disabled.
    Failed { reason: String },
}

impl ScheduleOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        ScheduleOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ScheduleOutcome::Failed { .. })
    }

    /// Sum the counts of several cancellations. Any other outcome in the
    /// list contributes nothing.
    pub fn merge_canceled(outcomes: impl IntoIterator<Item = ScheduleOutcome>) -> Self {
        let count = outcomes
            .into_iter()
            .map(|o| match o {
                ScheduleOutcome::Canceled { count } => count,
                _ => 0,
            })
            .sum();
        ScheduleOutcome::Canceled { count }
    }
}

/// Arms and disarms the wake-up that makes a trigger fire.
///
/// Implementations report every failure as [`ScheduleOutcome::Failed`];
/// they never panic on platform errors. Calls for the same trigger id must
/// be serialized by the caller ([`crate::TriggerService`] does this).
pub trait SchedulingGateway: Send + Sync {
    /// Arm (or re-arm, replacing any existing alarm) the next occurrence.
    fn schedule(&self, trigger: &Trigger) -> ScheduleOutcome;

    /// Remove any armed alarm for this trigger.
    fn cancel(&self, trigger: &Trigger) -> ScheduleOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_sums_canceled_counts() {
        let merged = ScheduleOutcome::merge_canceled([
            ScheduleOutcome::Canceled { count: 1 },
            ScheduleOutcome::Canceled { count: 0 },
            ScheduleOutcome::failed("db locked"),
            ScheduleOutcome::Canceled { count: 1 },
        ]);
        assert_eq!(merged, ScheduleOutcome::Canceled { count: 2 });
    }

    #[test]
    fn outcome_json_shape() {
        let json = serde_json::to_string(&ScheduleOutcome::Canceled { count: 1 }).unwrap();
        assert_eq!(json, r#"{"outcome":"canceled","count":1}"#);
        assert!(ScheduleOutcome::failed("x").is_failed());
    }
}
