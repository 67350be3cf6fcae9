//! Automation service
//!
//! Wires the registries, the event bus and the built-in handlers into a
//! [`RuleEngine`], and forwards registry changes to the engine while running.

use ha_automation::RuleEngine;
use ha_config::{AutomationFile, EngineConfig};
use ha_core::RuleStatus;
use ha_event_bus::EventBus;
use ha_registries::{ModuleTypeChange, Registries};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::builtin::{self, BuiltinFactory};

/// Summary of a configuration load
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub module_types: usize,
    pub templates: usize,
    /// Rules that reached IDLE
    pub idle: usize,
    /// Rules that were added but are not running
    pub uninitialized: usize,
    /// Rules that could not be added at all
    pub rejected: usize,
}

pub struct AutomationService {
    engine: RuleEngine,
    registries: Arc<Registries>,
    bus: Arc<EventBus>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl AutomationService {
    pub fn new(registries: Arc<Registries>, bus: Arc<EventBus>, config: &EngineConfig) -> Self {
        let engine = RuleEngine::builder(
            registries.module_types.clone(),
            registries.disabled_rules.clone(),
        )
        .templates(registries.templates.clone())
        .publisher(bus.clone())
        .reinitialization_delay(config.reinitialization_delay())
        .build();

        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            engine,
            registries,
            bus,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    /// Register built-in and configured module types and templates, then add
    /// the configured rules
    pub async fn load(&self, file: AutomationFile) -> LoadReport {
        let mut report = LoadReport::default();

        for module_type in builtin::module_types().into_iter().chain(file.module_types) {
            self.registries.module_types.add(module_type);
            report.module_types += 1;
        }
        for template in file.templates {
            self.registries.templates.add(template);
            report.templates += 1;
        }
        self.engine.add_factory(Arc::new(BuiltinFactory::new())).await;

        for rule in file.rules {
            let uid = rule.uid.clone();
            match self.engine.add_rule(rule).await {
                Ok(info) if info.status == RuleStatus::Idle => report.idle += 1,
                Ok(info) => {
                    warn!(rule_uid = %uid, status = %info, "Rule is not running");
                    report.uninitialized += 1;
                }
                Err(e) => {
                    error!(rule_uid = %uid, error = %e, "Failed to add rule");
                    report.rejected += 1;
                }
            }
        }

        info!(
            module_types = report.module_types,
            templates = report.templates,
            idle = report.idle,
            uninitialized = report.uninitialized,
            rejected = report.rejected,
            "Loaded automation configuration"
        );
        report
    }

    /// Start forwarding registry changes to the engine and logging status events
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Automation service already running");
            return;
        }
        info!("Starting automation service");

        self.spawn_module_type_listener();
        self.spawn_template_listener();
        self.spawn_status_logger();
    }

    fn spawn_module_type_listener(&self) {
        let mut changes = self.registries.module_types.subscribe();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let engine = self.engine.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    change = changes.recv() => match change {
                        Ok(change) => {
                            debug!(uid = %change.uid(), "Module type changed");
                            match change {
                                ModuleTypeChange::Added(uid) => engine.module_type_added(&uid).await,
                                ModuleTypeChange::Updated(uid) => engine.module_type_updated(&uid).await,
                                ModuleTypeChange::Removed(uid) => engine.module_type_removed(&uid).await,
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Module type listener lagged by {} changes", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!("Module type listener stopped");
        });
    }

    fn spawn_template_listener(&self) {
        let mut added = self.registries.templates.subscribe();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let engine = self.engine.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    uid = added.recv() => match uid {
                        Ok(uid) => engine.template_added(&uid).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Template listener lagged by {} changes", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!("Template listener stopped");
        });
    }

    fn spawn_status_logger(&self) {
        let mut events = self.bus.subscribe_all();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let running = self.running.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => info!(
                            rule_uid = %event.data.rule_uid,
                            status = %event.data.status_info,
                            "Rule status changed"
                        ),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Status logger lagged by {} events", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Event bus closed, stopping status logger");
                            break;
                        }
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
            running.store(false, Ordering::SeqCst);
            info!("Automation service stopped");
        });
    }

    /// Stop the listeners and unregister every rule
    pub async fn stop(&self) {
        if !self.is_running() {
            return;
        }
        info!("Stopping automation service");
        let _ = self.shutdown_tx.send(());
        self.engine.deactivate().await;
        self.bus.close();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::{Module, ModuleType, Rule, RuleStatusDetail, RuleTemplate};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn service(temp_dir: &TempDir) -> AutomationService {
        let registries = Arc::new(Registries::new(temp_dir.path()));
        AutomationService::new(registries, Arc::new(EventBus::new()), &EngineConfig::default())
    }

    async fn wait_for(service: &AutomationService, uid: &str, status: RuleStatus) -> bool {
        for _ in 0..100 {
            if service.engine().get_status(uid) == Some(status) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_load_reports_rule_outcomes() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);

        let file = AutomationFile {
            rules: vec![
                Rule::new(Some("ok".into()))
                    .with_trigger(Module::new("t1", builtin::INTERVAL_TRIGGER))
                    .with_action(Module::new("a1", builtin::LOG_ACTION)),
                Rule::new(Some("broken".into()))
                    .with_action(Module::new("a1", "vendor.Unknown")),
                Rule::new(Some("ok".into())),
            ],
            ..AutomationFile::default()
        };

        let report = service.load(file).await;
        assert_eq!(report.idle, 1);
        assert_eq!(report.uninitialized, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.module_types, builtin::module_types().len());
    }

    #[tokio::test]
    async fn test_registry_changes_reach_engine() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);

        let file = AutomationFile {
            rules: vec![
                Rule::new(Some("typed".into()))
                    .with_trigger(Module::new("t1", builtin::INTERVAL_TRIGGER))
                    .with_action(Module::new("a1", "vendor.Notify")),
                Rule::new(Some("templated".into())).with_template("tpl.Heartbeat"),
            ],
            ..AutomationFile::default()
        };
        service.load(file).await;
        service.start();
        assert!(service.is_running());

        // The module type exists now, but no factory serves it
        service
            .registries
            .module_types
            .add(ModuleType::action("vendor.Notify"));
        assert!(
            wait_for_detail(&service, "typed", RuleStatusDetail::HandlerInitializingError).await
        );

        service.registries.templates.add(
            RuleTemplate::new("tpl.Heartbeat")
                .with_trigger(Module::new("t1", builtin::INTERVAL_TRIGGER))
                .with_action(
                    Module::new("a1", builtin::LOG_ACTION).with_config("message", json!("alive")),
                ),
        );
        assert!(wait_for(&service, "templated", RuleStatus::Idle).await);

        service.stop().await;
        assert!(service.engine().rule_uids().is_empty());
        assert!(service.bus.is_closed());
    }

    async fn wait_for_detail(
        service: &AutomationService,
        uid: &str,
        detail: RuleStatusDetail,
    ) -> bool {
        for _ in 0..100 {
            if service
                .engine()
                .get_status_info(uid)
                .is_some_and(|info| info.detail == detail)
            {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}
