//! Core types for the automation rule engine
//!
//! This crate provides the fundamental types shared by the automation rule
//! engine and its collaborators: rules and their modules, module types,
//! rule templates, rule status, the event envelope used to broadcast status
//! changes, and the boundary traits the engine consumes.

mod event;
mod module;
mod module_type;
mod provider;
mod rule;
mod status;
mod template;

pub use event::{Event, EventData, EventType};
pub use module::{validate_module_id, Configuration, Module, ModuleKind};
pub use module_type::{Input, ModuleType, Output, WILDCARD_TYPE};
pub use provider::{
    DisabledRuleStore, EventPublisher, ModuleTypeProvider, PublishError, StoreError,
    TemplateProvider,
};
pub use rule::{Rule, Visibility};
pub use status::{RuleStatus, RuleStatusDetail, RuleStatusInfo, RuleStatusInfoEvent};
pub use template::RuleTemplate;

use thiserror::Error;

/// Errors raised while validating rule model invariants
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid module id '{0}': only letters, digits, '_' and '-' are allowed")]
    InvalidModuleId(String),

    #[error("duplicate module id '{0}'")]
    DuplicateModuleId(String),
}

/// Result type for model validation
pub type ModelResult<T> = Result<T, ModelError>;

/// Standard event types emitted by the rule engine
pub mod events {
    /// Event type for rule status changes
    pub const RULE_STATUS_INFO: &str = "rule_status_info";
}
