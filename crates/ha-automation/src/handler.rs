//! Handler contracts
//!
//! Handlers implement the behavior of modules. They are supplied by
//! [`ModuleHandlerFactory`] implementations registered with the engine, one
//! factory per module type.

use async_trait::async_trait;
use ha_core::{Module, ModuleKind};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::HandlerError;
use crate::executor::Firing;

/// Context and input values passed between modules
pub type ContextMap = HashMap<String, Value>;

/// Handle given to trigger handlers to report firings of their rule
#[derive(Debug, Clone)]
pub struct TriggerCallback {
    rule_uid: String,
    sender: mpsc::UnboundedSender<Firing>,
}

impl TriggerCallback {
    pub(crate) fn new(rule_uid: impl Into<String>, sender: mpsc::UnboundedSender<Firing>) -> Self {
        Self {
            rule_uid: rule_uid.into(),
            sender,
        }
    }

    pub fn rule_uid(&self) -> &str {
        &self.rule_uid
    }

    /// Enqueue one firing of `trigger_id` with its output values
    ///
    /// Returns false when the rule is gone.
    pub fn triggered(&self, trigger_id: impl Into<String>, outputs: ContextMap) -> bool {
        let trigger_id = trigger_id.into();
        debug!(rule_uid = %self.rule_uid, trigger_id = %trigger_id, "Trigger fired");
        self.sender
            .send(Firing::Triggered {
                trigger_id,
                outputs,
            })
            .is_ok()
    }
}

/// Trigger behavior: reports firings through the callback it is given
pub trait TriggerHandler: Send + Sync {
    fn set_callback(&self, callback: TriggerCallback);

    fn unset_callback(&self);

    fn dispose(&self) {}
}

/// Condition behavior
#[async_trait]
pub trait ConditionHandler: Send + Sync {
    async fn is_satisfied(&self, inputs: &ContextMap) -> Result<bool, HandlerError>;

    fn dispose(&self) {}
}

/// Action behavior; returned values become outputs of the action
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, inputs: &ContextMap) -> Result<Option<ContextMap>, HandlerError>;

    fn dispose(&self) {}
}

/// A handler bound to one module
#[derive(Clone)]
pub enum ModuleHandler {
    Trigger(Arc<dyn TriggerHandler>),
    Condition(Arc<dyn ConditionHandler>),
    Action(Arc<dyn ActionHandler>),
}

impl ModuleHandler {
    pub fn kind(&self) -> ModuleKind {
        match self {
            ModuleHandler::Trigger(_) => ModuleKind::Trigger,
            ModuleHandler::Condition(_) => ModuleKind::Condition,
            ModuleHandler::Action(_) => ModuleKind::Action,
        }
    }

    pub fn dispose(&self) {
        match self {
            ModuleHandler::Trigger(h) => h.dispose(),
            ModuleHandler::Condition(h) => h.dispose(),
            ModuleHandler::Action(h) => h.dispose(),
        }
    }
}

impl std::fmt::Debug for ModuleHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ModuleHandler::{}", self.kind())
    }
}

/// Source of handlers for a set of module types
pub trait ModuleHandlerFactory: Send + Sync {
    /// Module type UIDs this factory can serve
    fn supported_types(&self) -> Vec<String>;

    /// Create or look up the handler for `module` of `rule_uid`
    fn get_handler(&self, module: &Module, kind: ModuleKind, rule_uid: &str)
        -> Option<ModuleHandler>;

    /// Release a handler obtained from [`get_handler`](Self::get_handler)
    fn unget_handler(&self, module: &Module, rule_uid: &str, handler: &ModuleHandler) {
        let _ = (module, rule_uid);
        handler.dispose();
    }
}
