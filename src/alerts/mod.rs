//! Threshold alert rules
//!
//! - [`AlertRule`]: a validated rule, parsed from a stored [`RuleRecord`]
//! - [`evaluation::RuleEvaluation`]: the pure per-sample state machine
//! - [`evaluator::AlertEvaluator`]: applies the state machine to a snapshot

pub mod evaluation;
pub mod evaluator;

use chrono::Duration;

use crate::storage::schema::{
    AlertRuleId, Comparison, MetricType, ParseEnumError, RuleRecord, ServerRecordId,
};

pub use evaluation::RuleEvaluation;
pub use evaluator::{AlertEvaluator, AlertPolicy};

/// A stored rule that cannot be evaluated
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("alert rule {rule_id}: {source}")]
    UnknownValue {
        rule_id: AlertRuleId,
        #[source]
        source: ParseEnumError,
    },

    #[error("alert rule {rule_id}: negative duration {duration}s")]
    NegativeDuration { rule_id: AlertRuleId, duration: i64 },

    #[error("alert rule {rule_id}: duration {duration}s is out of range")]
    DurationOutOfRange { rule_id: AlertRuleId, duration: i64 },

    #[error("alert rule {rule_id}: threshold {threshold} is not a finite number")]
    NonFiniteThreshold { rule_id: AlertRuleId, threshold: f64 },
}

/// A rule ready for evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRule {
    pub id: AlertRuleId,

    /// `None` applies to every server
    pub server_id: Option<ServerRecordId>,

    pub metric_type: MetricType,
    pub threshold: f64,
    pub comparison: Comparison,

    /// How long the condition must hold before an alert opens
    pub duration: Duration,

    pub enabled: bool,
}

impl AlertRule {
    pub fn is_global(&self) -> bool {
        self.server_id.is_none()
    }

    pub fn is_breached_by(&self, value: f64) -> bool {
        self.comparison.holds(value, self.threshold)
    }
}

impl TryFrom<RuleRecord> for AlertRule {
    type Error = ConfigError;

    fn try_from(record: RuleRecord) -> Result<Self, Self::Error> {
        let rule_id = record.id;
        let unknown = |source| ConfigError::UnknownValue { rule_id, source };

        let metric_type = record.metric_type.parse().map_err(unknown)?;
        let comparison = record.comparison.parse().map_err(unknown)?;

        if record.duration < 0 {
            return Err(ConfigError::NegativeDuration {
                rule_id,
                duration: record.duration,
            });
        }

        let duration =
            Duration::try_seconds(record.duration).ok_or(ConfigError::DurationOutOfRange {
                rule_id,
                duration: record.duration,
            })?;

        if !record.threshold.is_finite() {
            return Err(ConfigError::NonFiniteThreshold {
                rule_id,
                threshold: record.threshold,
            });
        }

        Ok(Self {
            id: rule_id,
            server_id: record.server_id,
            metric_type,
            threshold: record.threshold,
            comparison,
            duration,
            enabled: record.enabled,
        })
    }
}
