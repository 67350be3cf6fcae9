//! Handler factory registry
//!
//! Tracks which factory serves each module type and which rules reference
//! each module type. When two factories claim the same type, the factory
//! registered last serves it; removing a factory only releases the types it
//! still serves.

use dashmap::DashMap;
use ha_core::{Module, ModuleKind};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::handler::{ModuleHandler, ModuleHandlerFactory};

/// A handler together with the factory that produced it
#[derive(Clone)]
pub struct BoundHandler {
    pub handler: ModuleHandler,
    factory: Arc<dyn ModuleHandlerFactory>,
}

impl std::fmt::Debug for BoundHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundHandler")
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}

fn same_factory(a: &Arc<dyn ModuleHandlerFactory>, b: &Arc<dyn ModuleHandlerFactory>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Registry of handler factories
pub struct HandlerRegistry {
    factories: DashMap<String, Arc<dyn ModuleHandlerFactory>>,
    composite: RwLock<Option<Arc<dyn ModuleHandlerFactory>>>,
    rules_by_type: DashMap<String, HashSet<String>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
            composite: RwLock::new(None),
            rules_by_type: DashMap::new(),
        }
    }

    /// Register a factory for every type it supports; returns those types
    pub fn add_factory(&self, factory: Arc<dyn ModuleHandlerFactory>) -> Vec<String> {
        let types = factory.supported_types();
        for type_uid in &types {
            if let Some(previous) = self.factories.insert(type_uid.clone(), factory.clone()) {
                if !same_factory(&previous, &factory) {
                    warn!(type_uid = %type_uid, "Module type claimed by a second factory; the newer one wins");
                }
            }
        }
        info!(types = ?types, "Registered handler factory");
        types
    }

    /// Unregister a factory; returns the types it was still serving
    pub fn remove_factory(&self, factory: &Arc<dyn ModuleHandlerFactory>) -> Vec<String> {
        let released: Vec<String> = factory
            .supported_types()
            .into_iter()
            .filter(|type_uid| {
                self.factories
                    .remove_if(type_uid, |_, current| same_factory(current, factory))
                    .is_some()
            })
            .collect();
        info!(types = ?released, "Removed handler factory");
        released
    }

    /// Set the factory serving composite module types
    pub fn set_composite_factory(&self, factory: Option<Arc<dyn ModuleHandlerFactory>>) {
        *self.composite.write() = factory;
    }

    pub fn has_factory(&self, type_uid: &str) -> bool {
        self.factories.contains_key(type_uid)
    }

    fn factory_for(&self, type_uid: &str, composite: bool) -> Option<Arc<dyn ModuleHandlerFactory>> {
        if composite {
            return self.composite.read().clone();
        }
        self.factories.get(type_uid).map(|f| f.value().clone())
    }

    /// Obtain a handler for `module`
    ///
    /// Returns `None` when no factory serves the type, the factory declines,
    /// or the handler has the wrong kind.
    pub fn bind(
        &self,
        module: &Module,
        kind: ModuleKind,
        composite: bool,
        rule_uid: &str,
    ) -> Option<BoundHandler> {
        // Clone out of the map before calling into the factory
        let factory = self.factory_for(&module.type_uid, composite)?;
        let handler = factory.get_handler(module, kind, rule_uid)?;

        if handler.kind() != kind {
            warn!(
                rule_uid = %rule_uid,
                module_id = %module.id,
                expected = %kind,
                found = %handler.kind(),
                "Factory returned a handler of the wrong kind"
            );
            factory.unget_handler(module, rule_uid, &handler);
            return None;
        }

        debug!(rule_uid = %rule_uid, module_id = %module.id, "Bound handler");
        Some(BoundHandler { handler, factory })
    }

    /// Return a handler to the factory that produced it
    pub fn release(&self, module: &Module, rule_uid: &str, bound: BoundHandler) {
        if let ModuleHandler::Trigger(trigger) = &bound.handler {
            trigger.unset_callback();
        }
        bound.factory.unget_handler(module, rule_uid, &bound.handler);
        debug!(rule_uid = %rule_uid, module_id = %module.id, "Released handler");
    }

    /// Record that `rule_uid` references `type_uid`
    pub fn track(&self, rule_uid: &str, type_uid: &str) {
        self.rules_by_type
            .entry(type_uid.to_string())
            .or_default()
            .insert(rule_uid.to_string());
    }

    /// Forget every type reference of `rule_uid`
    pub fn untrack_rule(&self, rule_uid: &str) {
        self.rules_by_type.retain(|_, rules| {
            rules.remove(rule_uid);
            !rules.is_empty()
        });
    }

    /// Rules referencing `type_uid`, sorted
    pub fn rules_for_type(&self, type_uid: &str) -> Vec<String> {
        let mut rules: Vec<String> = self
            .rules_by_type
            .get(type_uid)
            .map(|rules| rules.iter().cloned().collect())
            .unwrap_or_default();
        rules.sort();
        rules
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::{ActionHandler, ContextMap};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Noop;

    #[async_trait]
    impl ActionHandler for Noop {
        async fn execute(&self, _inputs: &ContextMap) -> Result<Option<ContextMap>, HandlerError> {
            Ok(None)
        }
    }

    struct CountingFactory {
        types: Vec<String>,
        released: AtomicUsize,
    }

    impl CountingFactory {
        fn new(types: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                types: types.iter().map(|t| t.to_string()).collect(),
                released: AtomicUsize::new(0),
            })
        }
    }

    impl ModuleHandlerFactory for CountingFactory {
        fn supported_types(&self) -> Vec<String> {
            self.types.clone()
        }

        fn get_handler(&self, _module: &Module, _kind: ModuleKind, _rule_uid: &str) -> Option<ModuleHandler> {
            Some(ModuleHandler::Action(Arc::new(Noop)))
        }

        fn unget_handler(&self, _module: &Module, _rule_uid: &str, _handler: &ModuleHandler) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_last_registered_wins() {
        let registry = HandlerRegistry::new();
        let first = CountingFactory::new(&["a", "b"]);
        let second = CountingFactory::new(&["b"]);
        let first_dyn: Arc<dyn ModuleHandlerFactory> = first.clone();
        let second_dyn: Arc<dyn ModuleHandlerFactory> = second.clone();

        registry.add_factory(first_dyn.clone());
        registry.add_factory(second_dyn.clone());

        // "b" is served by the second factory, so removing the first keeps it
        assert_eq!(registry.remove_factory(&first_dyn), vec!["a".to_string()]);
        assert!(!registry.has_factory("a"));
        assert!(registry.has_factory("b"));

        assert_eq!(registry.remove_factory(&second_dyn), vec!["b".to_string()]);
        assert!(!registry.has_factory("b"));
    }

    #[test]
    fn test_bind_and_release() {
        let registry = HandlerRegistry::new();
        let factory = CountingFactory::new(&["test.Action"]);
        registry.add_factory(factory.clone());

        let module = Module::new("a1", "test.Action");
        assert!(registry
            .bind(&module, ModuleKind::Condition, false, "r1")
            .is_none());
        assert_eq!(factory.released.load(Ordering::SeqCst), 1);

        let bound = registry
            .bind(&module, ModuleKind::Action, false, "r1")
            .unwrap();
        registry.release(&module, "r1", bound);
        assert_eq!(factory.released.load(Ordering::SeqCst), 2);

        let missing = Module::new("a2", "other.Action");
        assert!(registry.bind(&missing, ModuleKind::Action, false, "r1").is_none());
    }

    #[test]
    fn test_composite_factory() {
        let registry = HandlerRegistry::new();
        let module = Module::new("a1", "composite.Action");
        assert!(registry.bind(&module, ModuleKind::Action, true, "r1").is_none());

        registry.set_composite_factory(Some(CountingFactory::new(&[])));
        assert!(registry.bind(&module, ModuleKind::Action, true, "r1").is_some());
    }

    #[test]
    fn test_rule_tracking() {
        let registry = HandlerRegistry::new();
        registry.track("r2", "a");
        registry.track("r1", "a");
        registry.track("r1", "b");

        assert_eq!(registry.rules_for_type("a"), vec!["r1", "r2"]);
        registry.untrack_rule("r1");
        assert_eq!(registry.rules_for_type("a"), vec!["r2"]);
        assert!(registry.rules_for_type("b").is_empty());
    }
}
