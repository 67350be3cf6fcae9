//! Built-in module handlers
//!
//! A handful of generic modules so configured rules can run without any
//! integration: a periodic trigger, a logging action and an equality check.

use async_trait::async_trait;
use ha_automation::reference::{resolve_pattern, resolve_value};
use ha_automation::{
    ActionHandler, ConditionHandler, ContextMap, HandlerError, ModuleHandler,
    ModuleHandlerFactory, TriggerCallback, TriggerHandler,
};
use ha_core::{Input, Module, ModuleKind, ModuleType, Output};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const INTERVAL_TRIGGER: &str = "system.IntervalTrigger";
pub const LOG_ACTION: &str = "system.LogAction";
pub const EQUALS_CONDITION: &str = "system.EqualsCondition";

const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Module types served by [`BuiltinFactory`]
pub fn module_types() -> Vec<ModuleType> {
    vec![
        ModuleType::trigger(INTERVAL_TRIGGER)
            .with_output(Output::new("tick", "Integer").with_tags(["tick"])),
        ModuleType::condition(EQUALS_CONDITION),
        ModuleType::action(LOG_ACTION)
            .with_input(Input::new("in", "*"))
            .with_output(Output::new("logged", "Boolean")),
    ]
}

/// Fires every `interval_ms` with the number of firings so far
struct IntervalTrigger {
    module_id: String,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IntervalTrigger {
    fn new(module: &Module) -> Self {
        let interval_ms = module
            .configuration
            .get("interval_ms")
            .and_then(Value::as_u64)
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_INTERVAL_MS);
        Self {
            module_id: module.id.clone(),
            interval: Duration::from_millis(interval_ms),
            task: Mutex::new(None),
        }
    }

    fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl TriggerHandler for IntervalTrigger {
    fn set_callback(&self, callback: TriggerCallback) {
        let module_id = self.module_id.clone();
        let period = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            let mut count: u64 = 0;
            loop {
                ticker.tick().await;
                count += 1;
                let outputs = ContextMap::from([("tick".to_string(), json!(count))]);
                if !callback.triggered(module_id.clone(), outputs) {
                    debug!(module_id = %module_id, "Rule gone, stopping interval trigger");
                    break;
                }
            }
        });

        if let Some(previous) = self.task.lock().replace(task) {
            previous.abort();
        }
    }

    fn unset_callback(&self) {
        self.stop();
    }

    fn dispose(&self) {
        self.stop();
    }
}

/// Logs its inputs and configured message
struct LogAction {
    rule_uid: String,
    module_id: String,
    message: Option<String>,
}

#[async_trait]
impl ActionHandler for LogAction {
    async fn execute(&self, inputs: &ContextMap) -> Result<Option<ContextMap>, HandlerError> {
        let message = self
            .message
            .as_deref()
            .map(|message| resolve_pattern(message, inputs))
            .unwrap_or_default();
        info!(
            rule_uid = %self.rule_uid,
            module_id = %self.module_id,
            input = ?inputs.get("in"),
            "{}",
            message
        );
        Ok(Some(ContextMap::from([(
            "logged".to_string(),
            Value::Bool(true),
        )])))
    }
}

/// Satisfied when `left` and `right` are equal after reference resolution
struct EqualsCondition {
    left: Value,
    right: Value,
}

#[async_trait]
impl ConditionHandler for EqualsCondition {
    async fn is_satisfied(&self, inputs: &ContextMap) -> Result<bool, HandlerError> {
        Ok(resolve_value(&self.left, inputs) == resolve_value(&self.right, inputs))
    }
}

/// Factory for the built-in module types
#[derive(Debug, Default)]
pub struct BuiltinFactory;

impl BuiltinFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleHandlerFactory for BuiltinFactory {
    fn supported_types(&self) -> Vec<String> {
        vec![
            INTERVAL_TRIGGER.to_string(),
            LOG_ACTION.to_string(),
            EQUALS_CONDITION.to_string(),
        ]
    }

    fn get_handler(
        &self,
        module: &Module,
        kind: ModuleKind,
        rule_uid: &str,
    ) -> Option<ModuleHandler> {
        let handler = match module.type_uid.as_str() {
            INTERVAL_TRIGGER => ModuleHandler::Trigger(Arc::new(IntervalTrigger::new(module))),
            LOG_ACTION => ModuleHandler::Action(Arc::new(LogAction {
                rule_uid: rule_uid.to_string(),
                module_id: module.id.clone(),
                message: module
                    .configuration
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })),
            EQUALS_CONDITION => ModuleHandler::Condition(Arc::new(EqualsCondition {
                left: module.configuration.get("left").cloned().unwrap_or(Value::Null),
                right: module.configuration.get("right").cloned().unwrap_or(Value::Null),
            })),
            other => {
                warn!(module_id = %module.id, type_uid = %other, "Not a built-in module type");
                return None;
            }
        };

        if handler.kind() != kind {
            return None;
        }
        Some(handler)
    }
}
