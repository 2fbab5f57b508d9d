//! Error taxonomy for the gateway.
//!
//! Mirrors the failure classes every component reasons about: a
//! `ValidationError` rejects a reading before it touches state;
//! `TransientDownstream` is retried or queued; `PermanentDownstream` is
//! logged and dropped; `RuleEvalError` never aborts ingest for other rules;
//! `StateCorruption` is the only class that halts the affected component and
//! demands an audit event.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("transient downstream failure: {0}")]
    TransientDownstream(String),

    #[error("permanent downstream failure: {0}")]
    PermanentDownstream(String),

    #[error("rule '{rule_id}' failed to evaluate: {reason}")]
    RuleEval { rule_id: String, reason: String },

    #[error("state corruption detected: {0}")]
    StateCorruption(String),
}

impl GatewayError {
    /// Whether a caller should retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::TransientDownstream(_))
    }
}
