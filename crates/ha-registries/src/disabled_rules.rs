//! Durable set of disabled rule UIDs

use async_trait::async_trait;
use dashmap::DashSet;
use ha_core::{DisabledRuleStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::storage::{Storable, Storage, StorageError, StorageResult};

/// Storage key for disabled rules
pub const STORAGE_KEY: &str = "automation.disabled_rules";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;

/// Disabled rules data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisabledRulesData {
    pub rule_uids: BTreeSet<String>,
}

impl Storable for DisabledRulesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        StoreError(err.to_string())
    }
}

/// Disabled-rule store backed by `.storage/automation.disabled_rules`
///
/// Without a storage backend the set lives in memory only.
pub struct DisabledRuleStorage {
    storage: Option<Arc<Storage>>,
    rule_uids: DashSet<String>,
    /// Serializes writes so the file always reflects the latest set
    save_lock: Mutex<()>,
}

impl DisabledRuleStorage {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage: Some(storage),
            rule_uids: DashSet::new(),
            save_lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            storage: None,
            rule_uids: DashSet::new(),
            save_lock: Mutex::new(()),
        }
    }

    /// Load disabled rules from storage
    pub async fn load(&self) -> StorageResult<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        if let Some(data) = storage.load::<DisabledRulesData>().await? {
            info!("Loading {} disabled rules from storage", data.rule_uids.len());
            for uid in data.rule_uids {
                self.rule_uids.insert(uid);
            }
        }
        Ok(())
    }

    async fn save(&self) -> StorageResult<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        let _guard = self.save_lock.lock().await;
        let data = DisabledRulesData {
            rule_uids: self.rule_uids.iter().map(|uid| uid.key().clone()).collect(),
        };
        storage.save(&data).await?;
        debug!("Saved {} disabled rules to storage", data.rule_uids.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rule_uids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rule_uids.is_empty()
    }
}

#[async_trait]
impl DisabledRuleStore for DisabledRuleStorage {
    async fn get(&self, rule_uid: &str) -> Option<bool> {
        self.rule_uids.contains(rule_uid).then_some(true)
    }

    async fn put(&self, rule_uid: &str, disabled: bool) -> Result<(), StoreError> {
        let changed = if disabled {
            self.rule_uids.insert(rule_uid.to_string())
        } else {
            self.rule_uids.remove(rule_uid).is_some()
        };

        if changed {
            self.save().await?;
        }
        Ok(())
    }

    async fn remove(&self, rule_uid: &str) -> Result<(), StoreError> {
        self.put(rule_uid, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = DisabledRuleStorage::in_memory();
        assert_eq!(store.get("rule_a").await, None);

        store.put("rule_a", true).await.unwrap();
        assert_eq!(store.get("rule_a").await, Some(true));

        store.remove("rule_a").await.unwrap();
        assert_eq!(store.get("rule_a").await, None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_rules_persist() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path()));

        let store = DisabledRuleStorage::new(storage.clone());
        store.put("rule_a", true).await.unwrap();
        store.put("rule_b", true).await.unwrap();
        store.put("rule_b", false).await.unwrap();

        let reloaded = DisabledRuleStorage::new(storage);
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("rule_a").await, Some(true));
        assert_eq!(reloaded.get("rule_b").await, None);
    }
}
