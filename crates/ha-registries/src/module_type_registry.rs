//! Module type registry
//!
//! In-memory registry of trigger, condition and action types. Changes are
//! broadcast so the rule engine can re-check the rules that use a type.

use dashmap::DashMap;
use ha_core::{ModuleType, ModuleTypeProvider};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A change to the set of registered module types
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleTypeChange {
    Added(String),
    Updated(String),
    Removed(String),
}

impl ModuleTypeChange {
    pub fn uid(&self) -> &str {
        match self {
            ModuleTypeChange::Added(uid)
            | ModuleTypeChange::Updated(uid)
            | ModuleTypeChange::Removed(uid) => uid,
        }
    }
}

/// Module type registry
pub struct ModuleTypeRegistry {
    types: DashMap<String, Arc<ModuleType>>,
    changes: broadcast::Sender<ModuleTypeChange>,
}

impl ModuleTypeRegistry {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            types: DashMap::new(),
            changes,
        }
    }

    /// Register or replace a module type
    pub fn add(&self, module_type: ModuleType) {
        let uid = module_type.uid.clone();
        let previous = self.types.insert(uid.clone(), Arc::new(module_type));

        let change = if previous.is_some() {
            debug!(uid = %uid, "Updated module type");
            ModuleTypeChange::Updated(uid)
        } else {
            info!(uid = %uid, "Added module type");
            ModuleTypeChange::Added(uid)
        };
        let _ = self.changes.send(change);
    }

    /// Unregister a module type
    pub fn remove(&self, uid: &str) -> Option<Arc<ModuleType>> {
        let removed = self.types.remove(uid).map(|(_, t)| t);
        if removed.is_some() {
            info!(uid = %uid, "Removed module type");
            let _ = self.changes.send(ModuleTypeChange::Removed(uid.to_string()));
        }
        removed
    }

    /// Receive every subsequent change
    pub fn subscribe(&self) -> broadcast::Receiver<ModuleTypeChange> {
        self.changes.subscribe()
    }

    pub fn all(&self) -> Vec<Arc<ModuleType>> {
        self.types.iter().map(|t| t.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Default for ModuleTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleTypeProvider for ModuleTypeRegistry {
    fn get(&self, uid: &str) -> Option<Arc<ModuleType>> {
        self.types.get(uid).map(|t| t.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::Output;

    #[tokio::test]
    async fn test_add_update_remove() {
        let registry = ModuleTypeRegistry::new();
        let mut rx = registry.subscribe();

        registry.add(ModuleType::trigger("timer.Trigger"));
        registry.add(
            ModuleType::trigger("timer.Trigger").with_output(Output::new("time", "String")),
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("timer.Trigger").unwrap().outputs.len(), 1);

        assert!(registry.remove("timer.Trigger").is_some());
        assert!(registry.remove("timer.Trigger").is_none());
        assert!(registry.is_empty());

        assert_eq!(
            rx.recv().await.unwrap(),
            ModuleTypeChange::Added("timer.Trigger".to_string())
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ModuleTypeChange::Updated("timer.Trigger".to_string())
        );
        assert_eq!(rx.recv().await.unwrap().uid(), "timer.Trigger");
    }
}
