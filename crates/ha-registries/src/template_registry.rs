//! Rule template registry

use dashmap::DashMap;
use ha_core::{RuleTemplate, TemplateProvider};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// In-memory registry of rule templates
///
/// Every added template UID is broadcast so rules waiting for it can be
/// initialized.
pub struct TemplateRegistry {
    templates: DashMap<String, Arc<RuleTemplate>>,
    added: broadcast::Sender<String>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        let (added, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            templates: DashMap::new(),
            added,
        }
    }

    pub fn add(&self, template: RuleTemplate) {
        let uid = template.uid.clone();
        info!(uid = %uid, "Added rule template");
        self.templates.insert(uid.clone(), Arc::new(template));
        let _ = self.added.send(uid);
    }

    pub fn remove(&self, uid: &str) -> Option<Arc<RuleTemplate>> {
        self.templates.remove(uid).map(|(_, t)| t)
    }

    /// Receive the UID of every subsequently added template
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.added.subscribe()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateProvider for TemplateRegistry {
    fn get(&self, uid: &str) -> Option<Arc<RuleTemplate>> {
        self.templates.get(uid).map(|t| t.value().clone())
    }
}
