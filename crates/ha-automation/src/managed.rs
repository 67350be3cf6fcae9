//! Engine-side wrappers around rules and modules

use ha_core::{
    Event, EventPublisher, Module, ModuleKind, ModuleType, Rule, RuleStatus, RuleStatusInfo,
    RuleStatusInfoEvent,
};
use parking_lot::Mutex as StatusLock;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::executor::{self, Firing};
use crate::handler_registry::BoundHandler;

/// A module with the state the engine derives for it
///
/// The wrapped module is a copy; the rule the caller registered is never
/// modified.
#[derive(Debug, Clone)]
pub struct ManagedModule {
    pub kind: ModuleKind,
    pub module: Module,
    pub module_type: Option<Arc<ModuleType>>,
    pub connections: HashSet<Connection>,
    pub handler: Option<BoundHandler>,
}

impl ManagedModule {
    pub fn new(kind: ModuleKind, module: Module) -> Self {
        Self {
            kind,
            module,
            module_type: None,
            connections: HashSet::new(),
            handler: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.module.id
    }

    pub fn is_connected(&self, input: &str) -> bool {
        self.connections.contains(input)
    }
}

/// Modules of an initialized rule
#[derive(Debug, Default)]
pub(crate) struct RuleRuntime {
    pub modules: Vec<ManagedModule>,
}

/// A rule registered with the engine
pub(crate) struct ManagedRule {
    pub uid: String,
    pub rule: Rule,
    /// Held for the whole of initialization and unregistration
    pub runtime: Mutex<RuleRuntime>,
    status: StatusLock<RuleStatusInfo>,
    publisher: Option<Arc<dyn EventPublisher>>,
    sender: mpsc::UnboundedSender<Firing>,
    shutdown: StatusLock<Option<oneshot::Sender<()>>>,
}

impl ManagedRule {
    /// Wrap `rule` and start its execution worker
    pub fn spawn(rule: Rule, publisher: Option<Arc<dyn EventPublisher>>) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let managed = Arc::new(Self {
            uid: rule.uid.clone(),
            rule,
            runtime: Mutex::new(RuleRuntime::default()),
            status: StatusLock::new(RuleStatusInfo::new(RuleStatus::Uninitialized)),
            publisher,
            sender,
            shutdown: StatusLock::new(Some(shutdown_tx)),
        });

        executor::spawn_worker(Arc::downgrade(&managed), receiver, shutdown_rx);
        managed
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<Firing> {
        self.sender.clone()
    }

    pub fn status_info(&self) -> RuleStatusInfo {
        self.status.lock().clone()
    }

    pub fn status(&self) -> RuleStatus {
        self.status.lock().status
    }

    /// Replace the status and publish the change
    pub fn set_status(&self, info: RuleStatusInfo) {
        {
            let mut current = self.status.lock();
            if *current == info {
                return;
            }
            if current.status != info.status && !current.status.can_transition_to(info.status) {
                warn!(
                    rule_uid = %self.uid,
                    from = %current.status,
                    to = %info.status,
                    "Unexpected status transition"
                );
            }
            *current = info.clone();
        }
        self.publish(info);
    }

    /// Move to `to` only when the current status is `expected`
    pub fn transition_if(&self, expected: RuleStatus, to: RuleStatus) -> bool {
        {
            let mut current = self.status.lock();
            if current.status != expected {
                return false;
            }
            *current = RuleStatusInfo::new(to);
        }
        self.publish(RuleStatusInfo::new(to));
        true
    }

    fn publish(&self, status_info: RuleStatusInfo) {
        debug!(rule_uid = %self.uid, status = %status_info, "Rule status changed");

        let Some(publisher) = &self.publisher else {
            return;
        };
        let event = Event::typed(
            self.uid.clone(),
            RuleStatusInfoEvent {
                rule_uid: self.uid.clone(),
                status_info,
            },
        );
        if let Err(e) = publisher.post(event) {
            warn!(rule_uid = %self.uid, error = %e, "Failed to publish rule status");
        }
    }

    /// Stop the execution worker after its current run
    pub fn shutdown(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ManagedRule {
    fn drop(&mut self) {
        self.shutdown();
    }
}
