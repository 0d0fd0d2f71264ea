//! Engine error type

use thiserror::Error;

use ra_core::RuleError;

/// Errors surfaced by the engine's public API.
///
/// These mark illegal API use and lifecycle violations; problems that arise
/// while binding or executing a rule are reported through the rule's status
/// instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("rule not found: {0}")]
    RuleNotFound(String),

    #[error("a rule with UID '{0}' is already registered")]
    DuplicateRule(String),

    #[error("rule has no UID")]
    MissingUid,

    #[error(transparent)]
    InvalidRule(#[from] RuleError),

    #[error("the rule engine has been disposed")]
    Disposed,
}
