//! Rule status
//!
//! Every rule known to the engine is in exactly one of four states. A
//! status-info record pairs the state with an optional detail code and a
//! human-readable description of what is missing or broken.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle state of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatus {
    /// Temporarily switched off by the caller
    Disabled,

    /// Enabled but not operational: handlers, module types, or the
    /// template are still missing
    NotInitialized,

    /// Operational and waiting for trigger firings
    Idle,

    /// Executing right now; returns to idle when the run finishes
    Running,
}

impl RuleStatus {
    /// Whether the status machine permits a transition to `next`.
    ///
    /// Teardown and disable may interrupt from any state, which is why
    /// `NOT_INITIALIZED` and `DISABLED` are reachable unconditionally.
    pub fn can_transition_to(self, next: RuleStatus) -> bool {
        match next {
            RuleStatus::Disabled | RuleStatus::NotInitialized => true,
            RuleStatus::Idle => matches!(self, RuleStatus::NotInitialized | RuleStatus::Running),
            RuleStatus::Running => self == RuleStatus::Idle,
        }
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleStatus::Disabled => write!(f, "DISABLED"),
            RuleStatus::NotInitialized => write!(f, "NOT_INITIALIZED"),
            RuleStatus::Idle => write!(f, "IDLE"),
            RuleStatus::Running => write!(f, "RUNNING"),
        }
    }
}

/// Why a rule is not operational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatusDetail {
    /// A previously bound handler factory disappeared
    HandlerMissing,

    /// Binding was attempted and failed; the description enumerates the
    /// missing or invalid modules
    HandlerInitializingError,

    /// The referenced template is not (yet) available
    TemplateMissing,

    /// Template substitution referenced an unknown configuration value
    ConfigurationError,
}

impl fmt::Display for RuleStatusDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleStatusDetail::HandlerMissing => write!(f, "HANDLER_MISSING"),
            RuleStatusDetail::HandlerInitializingError => write!(f, "HANDLER_INITIALIZING_ERROR"),
            RuleStatusDetail::TemplateMissing => write!(f, "TEMPLATE_MISSING"),
            RuleStatusDetail::ConfigurationError => write!(f, "CONFIGURATION_ERROR"),
        }
    }
}

/// A rule's status together with detail and description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStatusInfo {
    /// Current state
    pub status: RuleStatus,

    /// Detail code, present when the state needs an explanation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<RuleStatusDetail>,

    /// Human-readable description of the problem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// When this status was entered
    pub since: DateTime<Utc>,
}

impl RuleStatusInfo {
    /// A plain status with no detail.
    pub fn new(status: RuleStatus) -> Self {
        Self {
            status,
            detail: None,
            description: None,
            since: Utc::now(),
        }
    }

    /// A status with a detail code and description.
    pub fn with_detail(
        status: RuleStatus,
        detail: RuleStatusDetail,
        description: impl Into<String>,
    ) -> Self {
        Self {
            status,
            detail: Some(detail),
            description: Some(description.into()),
            since: Utc::now(),
        }
    }
}

impl fmt::Display for RuleStatusInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if let Some(detail) = self.detail {
            write!(f, " ({})", detail)?;
        }
        if let Some(description) = &self.description {
            write!(f, ": {}", description)?;
        }
        Ok(())
    }
}

/// Observer of rule status changes. At most one may be attached to the
/// engine at a time.
pub trait StatusListener: Send + Sync {
    /// Called on every status transition, including repeated
    /// `NOT_INITIALIZED` updates from binding retries.
    fn status_changed(&self, rule_uid: &str, info: &RuleStatusInfo);
}
