//! Rule status
//!
//! ```text
//! UNINITIALIZED → INITIALIZING → IDLE ⇄ RUNNING
//!       ↑               │          │        │
//!       └───────────────┴──────────┴────────┘
//! ```
//!
//! DISABLED is not a state of its own: it is carried as the detail of
//! UNINITIALIZED.

use serde::{Deserialize, Serialize};

use crate::event::EventData;
use crate::events::RULE_STATUS_INFO;

/// Lifecycle state of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatus {
    Uninitialized,
    Initializing,
    Idle,
    Running,
}

impl RuleStatus {
    /// Check whether moving to `to` is part of the lifecycle graph
    pub fn can_transition_to(self, to: RuleStatus) -> bool {
        use RuleStatus::*;

        matches!(
            (self, to),
            (Uninitialized, Uninitialized)
                | (Uninitialized, Initializing)
                | (Initializing, Uninitialized)
                | (Initializing, Idle)
                | (Idle, Running)
                | (Idle, Uninitialized)
                | (Running, Idle)
                | (Running, Uninitialized)
        )
    }

    /// Whether the rule has all handlers bound
    pub fn is_initialized(self) -> bool {
        matches!(self, RuleStatus::Idle | RuleStatus::Running)
    }
}

impl std::fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RuleStatus::Uninitialized => "UNINITIALIZED",
            RuleStatus::Initializing => "INITIALIZING",
            RuleStatus::Idle => "IDLE",
            RuleStatus::Running => "RUNNING",
        })
    }
}

/// Reason attached to a status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatusDetail {
    #[default]
    None,
    Disabled,
    ConfigurationError,
    InvalidRule,
    HandlerMissingError,
    HandlerInitializingError,
    TemplateMissingError,
}

impl std::fmt::Display for RuleStatusDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RuleStatusDetail::None => "NONE",
            RuleStatusDetail::Disabled => "DISABLED",
            RuleStatusDetail::ConfigurationError => "CONFIGURATION_ERROR",
            RuleStatusDetail::InvalidRule => "INVALID_RULE",
            RuleStatusDetail::HandlerMissingError => "HANDLER_MISSING_ERROR",
            RuleStatusDetail::HandlerInitializingError => "HANDLER_INITIALIZING_ERROR",
            RuleStatusDetail::TemplateMissingError => "TEMPLATE_MISSING_ERROR",
        })
    }
}

/// Status, detail and optional message of a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStatusInfo {
    pub status: RuleStatus,

    #[serde(default)]
    pub detail: RuleStatusDetail,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RuleStatusInfo {
    pub fn new(status: RuleStatus) -> Self {
        Self {
            status,
            detail: RuleStatusDetail::None,
            message: None,
        }
    }

    /// UNINITIALIZED with a reason
    pub fn uninitialized(detail: RuleStatusDetail, message: Option<String>) -> Self {
        Self {
            status: RuleStatus::Uninitialized,
            detail,
            message,
        }
    }

    pub fn disabled() -> Self {
        Self::uninitialized(RuleStatusDetail::Disabled, None)
    }

    pub fn is_disabled(&self) -> bool {
        self.status == RuleStatus::Uninitialized && self.detail == RuleStatusDetail::Disabled
    }
}

impl std::fmt::Display for RuleStatusInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.status)?;
        if self.detail != RuleStatusDetail::None {
            write!(f, " ({})", self.detail)?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

/// Payload of the event published on every rule status change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStatusInfoEvent {
    pub rule_uid: String,
    pub status_info: RuleStatusInfo,
}

impl EventData for RuleStatusInfoEvent {
    fn event_type() -> &'static str {
        RULE_STATUS_INFO
    }
}
