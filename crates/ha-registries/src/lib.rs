//! Registries and persistence for the rule engine
//!
//! This crate provides:
//! - Versioned JSON persistence in the `.storage/` directory (Storage)
//! - The durable set of disabled rules (DisabledRuleStorage)
//! - Module types (ModuleTypeRegistry)
//! - Rule templates (TemplateRegistry)

pub mod disabled_rules;
pub mod module_type_registry;
pub mod storage;
pub mod template_registry;

pub use disabled_rules::{DisabledRuleStorage, DisabledRulesData};
pub use module_type_registry::{ModuleTypeChange, ModuleTypeRegistry};
pub use storage::{Storable, Storage, StorageError, StorageFile, StorageResult};
pub use template_registry::TemplateRegistry;

use std::sync::Arc;

/// All registries bundled together
pub struct Registries {
    pub storage: Arc<Storage>,
    pub disabled_rules: Arc<DisabledRuleStorage>,
    pub module_types: Arc<ModuleTypeRegistry>,
    pub templates: Arc<TemplateRegistry>,
}

impl Registries {
    /// Create new registries with the given config directory
    pub fn new(config_dir: impl AsRef<std::path::Path>) -> Self {
        let storage = Arc::new(Storage::new(config_dir));

        Self {
            disabled_rules: Arc::new(DisabledRuleStorage::new(storage.clone())),
            module_types: Arc::new(ModuleTypeRegistry::new()),
            templates: Arc::new(TemplateRegistry::new()),
            storage,
        }
    }

    /// Load persisted state
    pub async fn load_all(&self) -> StorageResult<()> {
        self.disabled_rules.load().await
    }
}
