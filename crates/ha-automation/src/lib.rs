//! Rule Engine
//!
//! Rules wire together modules of three kinds:
//!
//! ```text
//! RULE = TRIGGERS → CONDITIONS → ACTIONS
//! ```
//!
//! - **Triggers** report firings together with output values
//! - **Conditions** are evaluated in order and short-circuit on the first failure
//! - **Actions** run in order; their outputs are visible to later actions
//!
//! Module inputs are connected to outputs of other modules (`"moduleId.output"`)
//! or to context keys (`"$key"`), either explicitly or by tag-based
//! auto-mapping. Connections are validated against module type metadata before
//! handlers are bound.
//!
//! # Key Types
//!
//! - [`RuleEngine`] - Registers rules and drives their lifecycle
//! - [`ModuleHandlerFactory`] - Supplies handlers for module types
//! - [`TriggerCallback`] - Lets trigger handlers fire their rule
//! - [`TypeCompatibility`] - Decides which output types may feed which inputs

pub mod auto_mapper;
pub mod connection;
pub mod engine;
pub mod error;
pub mod executor;
pub mod handler;
pub mod handler_registry;
mod lifecycle;
pub mod managed;
pub mod reference;
mod retry;
pub mod type_compat;
pub mod validator;

pub use auto_mapper::{auto_map, AutoMapping};
pub use connection::{resolve_connections, Connection};
pub use engine::{RuleEngine, RuleEngineBuilder, DEFAULT_REINITIALIZATION_DELAY};
pub use error::{
    ConnectionError, ConnectionResult, HandlerError, RuleEngineError, RuleEngineResult,
    ValidationError, ValidationResult,
};
pub use executor::RunOutcome;
pub use handler::{
    ActionHandler, ConditionHandler, ContextMap, ModuleHandler, ModuleHandlerFactory,
    TriggerCallback, TriggerHandler,
};
pub use handler_registry::{BoundHandler, HandlerRegistry};
pub use managed::ManagedModule;
pub use type_compat::{TypeCompatibility, OBJECT_TYPE};
pub use validator::validate;
