//! Boundary contracts consumed by the rule engine
//!
//! The engine never looks these collaborators up by itself; the embedding
//! application injects implementations at construction.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::event::Event;
use crate::module_type::ModuleType;
use crate::status::RuleStatusInfoEvent;
use crate::template::RuleTemplate;

/// Read-only lookup of module types
pub trait ModuleTypeProvider: Send + Sync {
    fn get(&self, uid: &str) -> Option<Arc<ModuleType>>;
}

/// Read-only lookup of rule templates
pub trait TemplateProvider: Send + Sync {
    fn get(&self, uid: &str) -> Option<Arc<RuleTemplate>>;
}

/// Error reported by a disabled-rule store
#[derive(Debug, Clone, Error)]
#[error("disabled rule store error: {0}")]
pub struct StoreError(pub String);

/// Durable set of administratively disabled rules
///
/// Absence of a rule UID means the rule is enabled.
#[async_trait]
pub trait DisabledRuleStore: Send + Sync {
    async fn get(&self, rule_uid: &str) -> Option<bool>;

    async fn put(&self, rule_uid: &str, disabled: bool) -> Result<(), StoreError>;

    async fn remove(&self, rule_uid: &str) -> Result<(), StoreError>;
}

/// Error reported by an event publisher
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("event bus is closed")]
    Closed,

    #[error("failed to publish event: {0}")]
    Failed(String),
}

/// Fire-and-forget publisher for rule status events
pub trait EventPublisher: Send + Sync {
    fn post(&self, event: Event<RuleStatusInfoEvent>) -> Result<(), PublishError>;
}
