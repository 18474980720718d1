use chrono::{DateTime, Duration, Utc};

use crate::storage::schema::RuleState;

/// Outcome of evaluating one sample against one rule key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleEvaluation {
    /// Not breaching, nothing being timed
    Ok,

    /// First breaching sample, the timer starts now
    StartsBreaching,

    /// Still breaching, duration not reached yet
    Breaching,

    /// Breach held long enough, an alert opens
    Triggers,

    /// Breach held long enough, but the key resolved too recently
    CoolingDown,

    /// Alert already open and the condition still holds
    StillActive,

    /// Alert open and the condition no longer holds
    Resolves,

    /// Breach timer running but the condition no longer holds
    BreachReset,
}

impl RuleEvaluation {
    pub fn evaluate(
        breaching: bool,
        at: DateTime<Utc>,
        state: &RuleState,
        duration: Duration,
        cooldown: Duration,
    ) -> RuleEvaluation {
        if state.active_alert.is_some() {
            if breaching {
                return RuleEvaluation::StillActive;
            }
            return RuleEvaluation::Resolves;
        }

        if !breaching {
            if state.breach_started_at.is_some() {
                return RuleEvaluation::BreachReset;
            }
            return RuleEvaluation::Ok;
        }

        let started = state.breach_started_at.unwrap_or(at);

        if at - started < duration {
            if state.breach_started_at.is_none() {
                return RuleEvaluation::StartsBreaching;
            }
            return RuleEvaluation::Breaching;
        }

        let cooling_down = cooldown > Duration::zero()
            && state
                .last_resolved_at
                .is_some_and(|resolved| at - resolved < cooldown);

        if cooling_down {
            return RuleEvaluation::CoolingDown;
        }

        RuleEvaluation::Triggers
    }
}
