//! Rule engine
//!
//! Owns the registered rules and drives their lifecycle:
//!
//! ```text
//! add ──► INITIALIZING ──► prepare ──► bind handlers ──► IDLE ⇄ RUNNING
//!              │              │              │
//!              ▼              ▼              ▼
//!      UNINITIALIZED   UNINITIALIZED   UNINITIALIZED
//!        (DISABLED)    (CONFIG/INVALID)  (HANDLER_INITIALIZING_ERROR, retried)
//! ```
//!
//! Rule table mutations and initializations take the engine lock shared;
//! activation and deactivation take it exclusively. Each rule additionally
//! serializes its own initialization and unregistration through its runtime
//! mutex.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use ha_core::{
    DisabledRuleStore, EventPublisher, ModuleTypeProvider, Rule, RuleStatus, RuleStatusDetail,
    RuleStatusInfo, TemplateProvider,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::error::{RuleEngineError, RuleEngineResult};
use crate::executor::{Firing, RunOutcome};
use crate::handler::{ContextMap, ModuleHandler, ModuleHandlerFactory, TriggerCallback};
use crate::handler_registry::{BoundHandler, HandlerRegistry};
use crate::lifecycle::{self, PrepareError};
use crate::managed::{ManagedModule, ManagedRule, RuleRuntime};
use crate::retry::{Attempt, RetryScheduler};
use crate::type_compat::TypeCompatibility;

/// Delay before a rule with missing handlers is initialized again
pub const DEFAULT_REINITIALIZATION_DELAY: Duration = Duration::from_millis(500);

/// Builder for [`RuleEngine`]
pub struct RuleEngineBuilder {
    module_types: Arc<dyn ModuleTypeProvider>,
    disabled_rules: Arc<dyn DisabledRuleStore>,
    templates: Option<Arc<dyn TemplateProvider>>,
    publisher: Option<Arc<dyn EventPublisher>>,
    compat: TypeCompatibility,
    delay: Duration,
}

impl RuleEngineBuilder {
    pub fn templates(mut self, templates: Arc<dyn TemplateProvider>) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Publisher receiving every rule status change
    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn type_compatibility(mut self, compat: TypeCompatibility) -> Self {
        self.compat = compat;
        self
    }

    pub fn reinitialization_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Build an active engine
    pub fn build(self) -> RuleEngine {
        RuleEngine {
            inner: Arc::new(EngineInner {
                lock: RwLock::new(()),
                active: AtomicBool::new(true),
                rules: DashMap::new(),
                handlers: HandlerRegistry::new(),
                retries: RetryScheduler::new(self.delay),
                module_types: self.module_types,
                templates: self.templates,
                disabled_rules: self.disabled_rules,
                publisher: self.publisher,
                compat: self.compat,
            }),
        }
    }
}

/// Rule manager
///
/// Cloning is cheap; clones share the same rules.
#[derive(Clone)]
pub struct RuleEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    lock: RwLock<()>,
    active: AtomicBool,
    rules: DashMap<String, Arc<ManagedRule>>,
    handlers: HandlerRegistry,
    retries: RetryScheduler,
    module_types: Arc<dyn ModuleTypeProvider>,
    templates: Option<Arc<dyn TemplateProvider>>,
    disabled_rules: Arc<dyn DisabledRuleStore>,
    publisher: Option<Arc<dyn EventPublisher>>,
    compat: TypeCompatibility,
}

impl RuleEngine {
    pub fn builder(
        module_types: Arc<dyn ModuleTypeProvider>,
        disabled_rules: Arc<dyn DisabledRuleStore>,
    ) -> RuleEngineBuilder {
        RuleEngineBuilder {
            module_types,
            disabled_rules,
            templates: None,
            publisher: None,
            compat: TypeCompatibility::default(),
            delay: DEFAULT_REINITIALIZATION_DELAY,
        }
    }

    // ==================== Rules ====================

    /// Register a rule and initialize it
    ///
    /// Initialization problems are reported through the returned status, not
    /// as errors.
    pub async fn add_rule(&self, rule: Rule) -> RuleEngineResult<RuleStatusInfo> {
        let _guard = self.inner.read().await?;
        let managed = self.inner.insert(rule)?;
        info!(rule_uid = %managed.uid, name = %managed.rule.display_name(), "Added rule");

        Ok(self.inner.initialize(&managed).await)
    }

    /// Replace a registered rule, keeping its enabled state
    pub async fn update_rule(&self, rule: Rule) -> RuleEngineResult<RuleStatusInfo> {
        let _guard = self.inner.read().await?;
        let uid = rule.uid.clone();
        self.inner.detach(&uid).await?;

        let managed = self.inner.insert(rule)?;
        info!(rule_uid = %uid, "Updated rule");
        Ok(self.inner.initialize(&managed).await)
    }

    /// Unregister a rule and forget its enabled state
    pub async fn remove_rule(&self, rule_uid: &str) -> RuleEngineResult<Rule> {
        let _guard = self.inner.read().await?;
        let managed = self.inner.detach(rule_uid).await?;

        if let Err(e) = self.inner.disabled_rules.remove(rule_uid).await {
            warn!(rule_uid = %rule_uid, error = %e, "Failed to clear disabled flag");
        }
        info!(rule_uid = %rule_uid, "Removed rule");
        Ok(managed.rule.clone())
    }

    /// The rule as registered, without auto-mapped inputs
    pub fn get_rule(&self, rule_uid: &str) -> Option<Rule> {
        self.inner.rules.get(rule_uid).map(|r| r.rule.clone())
    }

    /// UIDs of all registered rules, sorted
    pub fn rule_uids(&self) -> Vec<String> {
        let mut uids: Vec<String> = self.inner.rules.iter().map(|r| r.key().clone()).collect();
        uids.sort();
        uids
    }

    pub fn get_status(&self, rule_uid: &str) -> Option<RuleStatus> {
        self.inner.rules.get(rule_uid).map(|r| r.status())
    }

    pub fn get_status_info(&self, rule_uid: &str) -> Option<RuleStatusInfo> {
        self.inner.rules.get(rule_uid).map(|r| r.status_info())
    }

    /// `None` for unknown rules
    pub async fn is_enabled(&self, rule_uid: &str) -> Option<bool> {
        if !self.inner.rules.contains_key(rule_uid) {
            return None;
        }
        let disabled = self.inner.disabled_rules.get(rule_uid).await.unwrap_or(false);
        Some(!disabled)
    }

    pub async fn set_enabled(&self, rule_uid: &str, enabled: bool) -> RuleEngineResult<()> {
        let _guard = self.inner.read().await?;
        let managed = self.inner.rule(rule_uid)?;

        if enabled {
            self.inner.disabled_rules.remove(rule_uid).await?;
            info!(rule_uid = %rule_uid, "Enabled rule");
            if managed.status() == RuleStatus::Uninitialized {
                self.inner.initialize(&managed).await;
            }
            return Ok(());
        }

        self.inner.disabled_rules.put(rule_uid, true).await?;
        self.inner.retries.cancel(rule_uid);

        let mut runtime = managed.runtime.lock().await;
        if managed.status().is_initialized() {
            self.inner.unregister(&managed, &mut runtime, RuleStatusInfo::disabled());
        } else {
            managed.set_status(RuleStatusInfo::disabled());
        }
        info!(rule_uid = %rule_uid, "Disabled rule");
        Ok(())
    }

    // ==================== Execution ====================

    /// Run the actions of a rule without evaluating its conditions
    pub async fn run_now(&self, rule_uid: &str) -> RuleEngineResult<RunOutcome> {
        self.run_now_with(rule_uid, false, ContextMap::new()).await
    }

    /// Run a rule with an initial context
    ///
    /// The run is queued behind pending firings of the same rule. Fails with
    /// [`RuleEngineError::NotIdle`] unless the rule is IDLE.
    pub async fn run_now_with(
        &self,
        rule_uid: &str,
        consider_conditions: bool,
        context: ContextMap,
    ) -> RuleEngineResult<RunOutcome> {
        let managed = {
            let _guard = self.inner.read().await?;
            self.inner.rule(rule_uid)?
        };

        let status = managed.status();
        if status != RuleStatus::Idle {
            return Err(RuleEngineError::NotIdle {
                rule_uid: rule_uid.to_string(),
                status,
            });
        }

        let (reply, receiver) = oneshot::channel();
        managed
            .sender()
            .send(Firing::Manual {
                consider_conditions,
                context,
                reply,
            })
            .map_err(|_| RuleEngineError::ExecutionAborted(rule_uid.to_string()))?;

        receiver
            .await
            .map_err(|_| RuleEngineError::ExecutionAborted(rule_uid.to_string()))?
    }

    // ==================== Handlers and module types ====================

    /// Register a handler factory and initialize rules waiting for it
    pub async fn add_factory(&self, factory: Arc<dyn ModuleHandlerFactory>) {
        let _guard = self.inner.lock.read().await;
        let types = self.inner.handlers.add_factory(factory);
        if self.inner.is_active() {
            self.inner.reinitialize_waiting(&types).await;
        }
    }

    /// Unregister a handler factory; rules using it lose their handlers
    pub async fn remove_factory(&self, factory: &Arc<dyn ModuleHandlerFactory>) {
        let _guard = self.inner.lock.read().await;
        let types = self.inner.handlers.remove_factory(factory);
        if self.inner.is_active() {
            self.inner.reinitialize_affected(&types).await;
        }
    }

    /// Set the factory serving composite module types
    pub async fn set_composite_factory(&self, factory: Option<Arc<dyn ModuleHandlerFactory>>) {
        let _guard = self.inner.lock.read().await;
        self.inner.handlers.set_composite_factory(factory);
    }

    /// Re-initialize rules that were waiting for `type_uid`
    pub async fn module_type_added(&self, type_uid: &str) {
        if let Ok(_guard) = self.inner.read().await {
            self.inner.reinitialize_waiting(&[type_uid.to_string()]).await;
        }
    }

    /// Rebuild every rule using `type_uid`
    pub async fn module_type_updated(&self, type_uid: &str) {
        if let Ok(_guard) = self.inner.read().await {
            self.inner.reinitialize_affected(&[type_uid.to_string()]).await;
        }
    }

    /// Rebuild every rule using `type_uid`; they end up INVALID_RULE
    pub async fn module_type_removed(&self, type_uid: &str) {
        self.module_type_updated(type_uid).await;
    }

    /// Initialize rules waiting for `template_uid`
    pub async fn template_added(&self, template_uid: &str) {
        let Ok(_guard) = self.inner.read().await else {
            return;
        };
        let waiting: Vec<Arc<ManagedRule>> = self
            .inner
            .rules
            .iter()
            .filter(|r| r.rule.template_uid.as_deref() == Some(template_uid))
            .filter(|r| r.status_info().detail == RuleStatusDetail::TemplateMissingError)
            .map(|r| r.value().clone())
            .collect();

        for managed in waiting {
            self.inner.initialize(&managed).await;
        }
    }

    // ==================== Activation ====================

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Accept rules again after [`deactivate`](Self::deactivate)
    pub async fn activate(&self) {
        let _guard = self.inner.lock.write().await;
        self.inner.active.store(true, Ordering::Release);
        info!("Rule engine activated");
    }

    /// Cancel pending retries and unregister and drop every rule
    ///
    /// Waits for running initializations. Disabled flags are kept.
    pub async fn deactivate(&self) {
        let _guard = self.inner.lock.write().await;
        self.inner.active.store(false, Ordering::Release);
        self.inner.retries.cancel_all();

        let uids: Vec<String> = self.inner.rules.iter().map(|r| r.key().clone()).collect();
        for uid in &uids {
            if let Err(e) = self.inner.detach(uid).await {
                debug!(rule_uid = %uid, error = %e, "Rule already gone");
            }
        }
        info!(rules = uids.len(), "Rule engine deactivated");
    }

    pub fn reinitialization_delay(&self) -> Duration {
        self.inner.retries.delay()
    }

    /// Whether a re-initialization of the rule is scheduled
    pub fn is_retry_pending(&self, rule_uid: &str) -> bool {
        self.inner.retries.is_pending(rule_uid)
    }
}

impl EngineInner {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Shared engine lock, failing when the engine is inactive
    async fn read(&self) -> RuleEngineResult<RwLockReadGuard<'_, ()>> {
        let guard = self.lock.read().await;
        if !self.is_active() {
            return Err(RuleEngineError::Inactive);
        }
        Ok(guard)
    }

    fn rule(&self, rule_uid: &str) -> RuleEngineResult<Arc<ManagedRule>> {
        self.rules
            .get(rule_uid)
            .map(|r| r.value().clone())
            .ok_or_else(|| RuleEngineError::NotFound(rule_uid.to_string()))
    }

    fn insert(&self, rule: Rule) -> RuleEngineResult<Arc<ManagedRule>> {
        match self.rules.entry(rule.uid.clone()) {
            Entry::Occupied(entry) => Err(RuleEngineError::AlreadyExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                let managed = ManagedRule::spawn(rule, self.publisher.clone());
                entry.insert(managed.clone());
                Ok(managed)
            }
        }
    }

    /// Unregister a rule and drop it from every index
    ///
    /// A run in progress finishes; its worker stops afterwards.
    async fn detach(&self, rule_uid: &str) -> RuleEngineResult<Arc<ManagedRule>> {
        let (_, managed) = self
            .rules
            .remove(rule_uid)
            .ok_or_else(|| RuleEngineError::NotFound(rule_uid.to_string()))?;
        self.retries.cancel(rule_uid);

        {
            let mut runtime = managed.runtime.lock().await;
            self.unregister(
                &managed,
                &mut runtime,
                RuleStatusInfo::new(RuleStatus::Uninitialized),
            );
        }
        self.handlers.untrack_rule(rule_uid);
        managed.shutdown();
        Ok(managed)
    }

    fn is_registered(&self, managed: &Arc<ManagedRule>) -> bool {
        self.rules
            .get(&managed.uid)
            .is_some_and(|r| Arc::ptr_eq(r.value(), managed))
    }

    /// Initialize a rule unless it already is; returns the resulting status
    async fn initialize(self: &Arc<Self>, managed: &Arc<ManagedRule>) -> RuleStatusInfo {
        let mut runtime = managed.runtime.lock().await;
        if managed.status().is_initialized() || !self.is_registered(managed) {
            return managed.status_info();
        }

        managed.set_status(RuleStatusInfo::new(RuleStatus::Initializing));
        if self.disabled_rules.get(&managed.uid).await.unwrap_or(false) {
            managed.set_status(RuleStatusInfo::disabled());
            return managed.status_info();
        }

        let mut modules = match self.prepare(managed) {
            Ok(modules) => modules,
            Err(e) => {
                let info = e.status_info(&managed.uid);
                warn!(
                    rule_uid = %managed.uid,
                    detail = %info.detail,
                    reason = info.message.as_deref().unwrap_or(""),
                    "Rule initialization failed"
                );
                managed.set_status(info.clone());
                return info;
            }
        };

        let missing = self.bind_handlers(&managed.uid, &mut modules);
        if !missing.is_empty() {
            release_handlers(&self.handlers, &managed.uid, &mut modules);
            let info = RuleStatusInfo::uninitialized(
                RuleStatusDetail::HandlerInitializingError,
                Some(missing.join("\n")),
            );
            debug!(rule_uid = %managed.uid, missing = missing.len(), "Handlers missing");
            managed.set_status(info.clone());
            self.schedule_retry(&managed.uid);
            return info;
        }

        runtime.modules = modules;
        managed.set_status(RuleStatusInfo::new(RuleStatus::Idle));

        let callback = TriggerCallback::new(managed.uid.clone(), managed.sender());
        for module in &runtime.modules {
            if let Some(BoundHandler {
                handler: ModuleHandler::Trigger(trigger),
                ..
            }) = &module.handler
            {
                trigger.set_callback(callback.clone());
            }
        }
        info!(rule_uid = %managed.uid, modules = runtime.modules.len(), "Rule initialized");
        managed.status_info()
    }

    /// Materialize, track module types and build the managed modules
    fn prepare(&self, managed: &ManagedRule) -> Result<Vec<ManagedModule>, PrepareError> {
        let rule = lifecycle::materialize(&managed.rule, self.templates.as_deref())?;
        for (_, module) in rule.modules() {
            self.handlers.track(&managed.uid, &module.type_uid);
        }
        lifecycle::prepare_modules(&rule, self.module_types.as_ref(), &self.compat)
    }

    /// Bind a handler to every module; returns one message per missing handler
    fn bind_handlers(&self, rule_uid: &str, modules: &mut [ManagedModule]) -> Vec<String> {
        let mut missing = Vec::new();
        for module in modules.iter_mut() {
            let composite = module
                .module_type
                .as_ref()
                .is_some_and(|t| t.is_composite());
            match self
                .handlers
                .bind(&module.module, module.kind, composite, rule_uid)
            {
                Some(bound) => module.handler = Some(bound),
                None => missing.push(format!(
                    "Missing handler '{}' for module '{}'",
                    module.module.type_uid,
                    module.id()
                )),
            }
        }
        missing
    }

    /// Release the handlers of an initialized rule and set `info`
    fn unregister(&self, managed: &ManagedRule, runtime: &mut RuleRuntime, info: RuleStatusInfo) {
        release_handlers(&self.handlers, &managed.uid, &mut runtime.modules);
        runtime.modules.clear();
        managed.set_status(info);
    }

    fn schedule_retry(self: &Arc<Self>, rule_uid: &str) {
        let engine = Arc::downgrade(self);
        let uid = rule_uid.to_string();
        let attempt: Attempt = Box::new(move || {
            let engine = engine.clone();
            let uid = uid.clone();
            async move {
                let Some(engine) = engine.upgrade() else {
                    return None;
                };
                let Ok(_guard) = engine.read().await else {
                    return None;
                };
                let managed = engine.rules.get(&uid).map(|r| r.value().clone());
                match managed {
                    Some(managed) => Some(engine.initialize(&managed).await),
                    None => None,
                }
            }
            .boxed()
        });
        self.retries.schedule(rule_uid, attempt);
    }

    fn affected_rules(&self, types: &[String]) -> Vec<Arc<ManagedRule>> {
        let uids: BTreeSet<String> = types
            .iter()
            .flat_map(|type_uid| self.handlers.rules_for_type(type_uid))
            .collect();
        uids.iter()
            .filter_map(|uid| self.rules.get(uid).map(|r| r.value().clone()))
            .collect()
    }

    /// Initialize uninitialized, enabled rules using any of `types`
    async fn reinitialize_waiting(self: &Arc<Self>, types: &[String]) {
        for managed in self.affected_rules(types) {
            let info = managed.status_info();
            if info.status == RuleStatus::Uninitialized && !info.is_disabled() {
                self.initialize(&managed).await;
            }
        }
    }

    /// Drop the handlers of rules using any of `types` and initialize the
    /// enabled ones again
    async fn reinitialize_affected(self: &Arc<Self>, types: &[String]) {
        for managed in self.affected_rules(types) {
            {
                let mut runtime = managed.runtime.lock().await;
                if managed.status().is_initialized() {
                    let message = format!("Handlers of rule {} were released", managed.uid);
                    self.unregister(
                        &managed,
                        &mut runtime,
                        RuleStatusInfo::uninitialized(
                            RuleStatusDetail::HandlerMissingError,
                            Some(message),
                        ),
                    );
                }
            }
            if !managed.status_info().is_disabled() {
                self.initialize(&managed).await;
            }
        }
    }
}

fn release_handlers(handlers: &HandlerRegistry, rule_uid: &str, modules: &mut [ManagedModule]) {
    for module in modules.iter_mut() {
        if let Some(bound) = module.handler.take() {
            handlers.release(&module.module, rule_uid, bound);
        }
    }
}
