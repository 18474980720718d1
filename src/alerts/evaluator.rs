use chrono::{DateTime, Duration, Utc};
use tracing::{debug, trace, warn};

use super::{AlertRule, RuleEvaluation};
use crate::snapshot::{MetricSample, Snapshot};
use crate::storage::backend::TransitionPlanner;
use crate::storage::schema::{
    AlertTransition, MetricType, NewAlert, RuleKey, RuleRecord, RuleStates, ServerRecordId,
};

/// Tunables of the alert lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertPolicy {
    /// Minimum time between resolving an alert and opening the next one for
    /// the same key. Zero disables the cool-down.
    pub cooldown: Duration,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::zero(),
        }
    }
}

/// Decides alert transitions for freshly written snapshots
#[derive(Debug, Clone, Default)]
pub struct AlertEvaluator {
    policy: AlertPolicy,
}

impl AlertEvaluator {
    pub fn new(policy: AlertPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> AlertPolicy {
        self.policy
    }

    /// Compute the transitions a set of samples causes, without touching storage
    pub fn plan(
        &self,
        rules: &[AlertRule],
        states: &RuleStates,
        samples: &[MetricSample],
        at: DateTime<Utc>,
    ) -> Vec<AlertTransition> {
        let mut transitions = Vec::new();

        for rule in rules.iter().filter(|rule| rule.enabled) {
            for sample in samples.iter().filter(|s| s.metric_type == rule.metric_type) {
                let key = RuleKey::new(rule.id, sample.subject.as_str());
                let state = states.get(&key).cloned().unwrap_or_default();
                let breaching = rule.is_breached_by(sample.value);

                let evaluation = RuleEvaluation::evaluate(
                    breaching,
                    at,
                    &state,
                    rule.duration,
                    self.policy.cooldown,
                );

                trace!(
                    "rule {} {:?}: {} {} {} -> {evaluation:?}",
                    rule.id, sample.subject, sample.value, rule.comparison, rule.threshold
                );

                match evaluation {
                    RuleEvaluation::Ok | RuleEvaluation::Breaching | RuleEvaluation::StillActive => {}
                    RuleEvaluation::StartsBreaching => {
                        debug!("rule {} {:?} starts breaching", rule.id, sample.subject);
                        transitions.push(AlertTransition::StartBreach { key, at });
                    }
                    RuleEvaluation::CoolingDown => {
                        debug!("rule {} {:?} is cooling down", rule.id, sample.subject);
                        if state.breach_started_at.is_none() {
                            transitions.push(AlertTransition::StartBreach { key, at });
                        }
                    }
                    RuleEvaluation::Triggers => {
                        transitions.push(AlertTransition::Trigger(NewAlert {
                            key,
                            metric_type: rule.metric_type,
                            metric_value: sample.value,
                            threshold: rule.threshold,
                            triggered_at: at,
                        }));
                    }
                    RuleEvaluation::Resolves => {
                        if let Some(alert_id) = state.active_alert {
                            transitions.push(AlertTransition::Resolve {
                                alert_id,
                                resolved_at: at,
                            });
                        }
                    }
                    RuleEvaluation::BreachReset => {
                        debug!("rule {} {:?} back to normal", rule.id, sample.subject);
                        transitions.push(AlertTransition::ClearBreach { key });
                    }
                }
            }
        }

        transitions
    }
}

impl TransitionPlanner for AlertEvaluator {
    fn plan_transitions(
        &self,
        server: ServerRecordId,
        rules: Vec<RuleRecord>,
        states: &RuleStates,
        snapshot: &Snapshot,
    ) -> Vec<AlertTransition> {
        let rules = applicable_rules(rules, server);
        if rules.is_empty() {
            trace!("no applicable rules");
            return Vec::new();
        }

        self.plan(
            &rules,
            states,
            &snapshot.metric_samples(),
            snapshot.timestamp(),
        )
    }
}

/// Parse stored rules and pick the ones that apply to `server`
///
/// Misconfigured rows are logged and skipped. For each metric type, rules
/// scoped to the server take precedence over global rules: if at least one
/// enabled server-specific rule exists, the global ones are not evaluated.
pub fn applicable_rules(records: Vec<RuleRecord>, server: ServerRecordId) -> Vec<AlertRule> {
    let rules: Vec<AlertRule> = records
        .into_iter()
        .filter_map(|record| match AlertRule::try_from(record) {
            Ok(rule) => Some(rule),
            Err(e) => {
                warn!("skipping misconfigured rule: {e}");
                None
            }
        })
        .filter(|rule| rule.enabled && rule.server_id.is_none_or(|id| id == server))
        .collect();

    let has_specific = |metric_type: MetricType| {
        rules
            .iter()
            .any(|rule| rule.metric_type == metric_type && !rule.is_global())
    };

    rules
        .iter()
        .filter(|rule| !rule.is_global() || !has_specific(rule.metric_type))
        .cloned()
        .collect()
}
