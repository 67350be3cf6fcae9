//! Mock handlers and factories shared by the engine tests

#![allow(dead_code)]

use async_trait::async_trait;
use ha_automation::{
    ActionHandler, ConditionHandler, ContextMap, HandlerError, ModuleHandler,
    ModuleHandlerFactory, RuleEngine, TriggerCallback, TriggerHandler,
};
use ha_core::{Input, Module, ModuleKind, ModuleType, Output, RuleStatus};
use ha_registries::{DisabledRuleStorage, ModuleTypeRegistry};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const TRIGGER: &str = "test.Trigger";
pub const CONDITION: &str = "test.Condition";
pub const ACTION: &str = "test.Action";

pub fn ctx(value: Value) -> ContextMap {
    serde_json::from_value(value).unwrap()
}

/// Module types used across the tests
pub fn module_types() -> Arc<ModuleTypeRegistry> {
    let registry = ModuleTypeRegistry::new();
    registry.add(
        ModuleType::trigger(TRIGGER)
            .with_output(Output::new("x", "Decimal").with_tags(["temp"]))
            .with_output(Output::new("label", "String")),
    );
    registry.add(ModuleType::condition(CONDITION).with_input(Input::new("value", "*")));
    registry.add(
        ModuleType::action(ACTION)
            .with_input(Input::new("in", "Number").with_tags(["temp"]))
            .with_output(Output::new("result", "Number")),
    );
    Arc::new(registry)
}

pub fn engine(types: Arc<ModuleTypeRegistry>) -> (RuleEngine, Arc<DisabledRuleStorage>) {
    let disabled = Arc::new(DisabledRuleStorage::in_memory());
    let engine = RuleEngine::builder(types, disabled.clone())
        .reinitialization_delay(Duration::from_millis(50))
        .build();
    (engine, disabled)
}

/// Poll until the rule reaches `status`
pub async fn wait_for_status(engine: &RuleEngine, rule_uid: &str, status: RuleStatus) -> bool {
    for _ in 0..200 {
        if engine.get_status(rule_uid) == Some(status) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Poll until `check` holds
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// ==================== Handlers ====================

#[derive(Default)]
pub struct MockTrigger {
    callback: Mutex<Option<TriggerCallback>>,
}

impl MockTrigger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fire as module `trigger_id`; false when no rule is listening
    pub fn fire(&self, trigger_id: &str, outputs: ContextMap) -> bool {
        self.callback
            .lock()
            .as_ref()
            .map(|callback| callback.triggered(trigger_id, outputs))
            .unwrap_or(false)
    }

    pub fn is_armed(&self) -> bool {
        self.callback.lock().is_some()
    }
}

impl TriggerHandler for MockTrigger {
    fn set_callback(&self, callback: TriggerCallback) {
        *self.callback.lock() = Some(callback);
    }

    fn unset_callback(&self) {
        *self.callback.lock() = None;
    }
}

/// Action recording the inputs of every call
#[derive(Default)]
pub struct RecordingAction {
    calls: Mutex<Vec<ContextMap>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    delay: Duration,
    outputs: Option<ContextMap>,
    failure: Option<String>,
    panics: bool,
}

impl RecordingAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_outputs(mut self, outputs: ContextMap) -> Self {
        self.outputs = Some(outputs);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn calls(&self) -> Vec<ContextMap> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Highest number of overlapping executions seen
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionHandler for RecordingAction {
    async fn execute(&self, inputs: &ContextMap) -> Result<Option<ContextMap>, HandlerError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.lock().push(inputs.clone());
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.panics {
            panic!("action handler crashed");
        }
        match &self.failure {
            Some(message) => Err(HandlerError::failed(message.clone())),
            None => Ok(self.outputs.clone()),
        }
    }
}

/// Condition with a fixed answer
pub struct StaticCondition {
    answer: Result<bool, HandlerError>,
    calls: Mutex<Vec<ContextMap>>,
    panics: bool,
}

impl StaticCondition {
    pub fn satisfied(satisfied: bool) -> Self {
        Self {
            answer: Ok(satisfied),
            calls: Mutex::new(Vec::new()),
            panics: false,
        }
    }

    pub fn erroring() -> Self {
        Self {
            answer: Err(HandlerError::failed("boom")),
            calls: Mutex::new(Vec::new()),
            panics: false,
        }
    }

    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::satisfied(true)
        }
    }

    pub fn calls(&self) -> Vec<ContextMap> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ConditionHandler for StaticCondition {
    async fn is_satisfied(&self, inputs: &ContextMap) -> Result<bool, HandlerError> {
        self.calls.lock().push(inputs.clone());
        if self.panics {
            panic!("condition handler crashed");
        }
        self.answer.clone()
    }
}

// ==================== Factory ====================

/// Factory handing out one handler per module id
#[derive(Default)]
pub struct TestFactory {
    types: Vec<String>,
    handlers: HashMap<String, ModuleHandler>,
    /// Number of `get_handler` calls to decline before serving
    declines: AtomicUsize,
    released: AtomicUsize,
}

impl TestFactory {
    pub fn new(types: &[&str]) -> Self {
        Self {
            types: types.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn trigger(mut self, module_id: &str, handler: Arc<MockTrigger>) -> Self {
        self.handlers
            .insert(module_id.to_string(), ModuleHandler::Trigger(handler));
        self
    }

    pub fn condition(mut self, module_id: &str, handler: Arc<StaticCondition>) -> Self {
        self.handlers
            .insert(module_id.to_string(), ModuleHandler::Condition(handler));
        self
    }

    pub fn action(mut self, module_id: &str, handler: Arc<RecordingAction>) -> Self {
        self.handlers
            .insert(module_id.to_string(), ModuleHandler::Action(handler));
        self
    }

    pub fn declining(self, times: usize) -> Self {
        self.declines.store(times, Ordering::SeqCst);
        self
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl ModuleHandlerFactory for TestFactory {
    fn supported_types(&self) -> Vec<String> {
        self.types.clone()
    }

    fn get_handler(
        &self,
        module: &Module,
        _kind: ModuleKind,
        _rule_uid: &str,
    ) -> Option<ModuleHandler> {
        let declined = self
            .declines
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if declined {
            return None;
        }
        self.handlers.get(&module.id).cloned()
    }

    fn unget_handler(&self, _module: &Module, _rule_uid: &str, _handler: &ModuleHandler) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
