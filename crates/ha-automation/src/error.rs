//! Error types for the rule engine

use ha_core::{RuleStatus, StoreError};
use thiserror::Error;

/// Malformed input reference
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("input '{input}': reference '{reference}' must have the form 'moduleId.outputName' or '$contextKey'")]
    MissingSeparator { input: String, reference: String },

    #[error("input '{input}': reference '{reference}' has an empty module id or output name")]
    EmptyPart { input: String, reference: String },

    #[error("input '{input}': context reference '{reference}' has no key")]
    EmptyContextKey { input: String, reference: String },

    #[error("input '{input}': reference '{reference}' has a malformed field path")]
    InvalidPath { input: String, reference: String },
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Rule wiring that does not match the module type metadata
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Module type '{type_uid}' of module '{module_id}' is not available")]
    UnknownModuleType { module_id: String, type_uid: String },

    #[error("Module '{module_id}' uses {found} type '{type_uid}' as {expected}")]
    WrongKind {
        module_id: String,
        type_uid: String,
        expected: String,
        found: String,
    },

    #[error("Required input '{input}' of module '{module_id}' is not connected")]
    RequiredInputNotConnected { module_id: String, input: String },

    #[error("Input '{input}' of module '{module_id}' is connected to '{source_module}', which cannot provide it")]
    InvalidSource {
        module_id: String,
        input: String,
        source_module: String,
    },

    #[error("Output '{output}' does not exist on module '{source_module}' (input '{input}' of module '{module_id}')")]
    OutputNotFound {
        module_id: String,
        input: String,
        source_module: String,
        output: String,
    },

    #[error("Incompatible types: input '{input}' of module '{module_id}' expects '{input_type}', but '{source_module}.{output}' provides '{output_type}'")]
    IncompatibleTypes {
        module_id: String,
        input: String,
        input_type: String,
        source_module: String,
        output: String,
        output_type: String,
    },
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Error returned by condition and action handlers
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HandlerError {
    #[error("missing input '{0}'")]
    MissingInput(String),

    #[error("invalid input '{name}': {reason}")]
    InvalidInput { name: String, reason: String },

    #[error("{0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Errors surfaced to callers of the rule engine
#[derive(Debug, Error)]
pub enum RuleEngineError {
    #[error("rule '{0}' not found")]
    NotFound(String),

    #[error("rule '{0}' already exists")]
    AlreadyExists(String),

    #[error("rule '{rule_uid}' is {status}, not IDLE")]
    NotIdle { rule_uid: String, status: RuleStatus },

    #[error("action '{action_id}' of rule '{rule_uid}' failed: {source}")]
    ActionFailed {
        rule_uid: String,
        action_id: String,
        #[source]
        source: HandlerError,
    },

    #[error("execution of rule '{0}' was aborted")]
    ExecutionAborted(String),

    #[error("rule engine is not active")]
    Inactive,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type RuleEngineResult<T> = Result<T, RuleEngineError>;
