//! Rule execution
//!
//! Every rule owns one worker task fed by an unbounded queue. Firings are
//! processed one at a time in arrival order, so runs of the same rule never
//! overlap and each run starts from a fresh context.

use futures::FutureExt;
use ha_core::{ModuleKind, RuleStatus};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Weak;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::connection::Connection;
use crate::error::{HandlerError, RuleEngineError, RuleEngineResult};
use crate::handler::{ContextMap, ModuleHandler};
use crate::managed::ManagedRule;
use crate::reference;

/// One unit of work for a rule worker
#[derive(Debug)]
pub enum Firing {
    Triggered {
        trigger_id: String,
        outputs: ContextMap,
    },
    Manual {
        consider_conditions: bool,
        context: ContextMap,
        reply: oneshot::Sender<RuleEngineResult<RunOutcome>>,
    },
}

/// Result of a completed run
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// False when a condition stopped the run before any action
    pub conditions_satisfied: bool,
    /// Final context, including every action output
    pub context: ContextMap,
}

/// Snapshot of one module taken before a run
struct Step {
    id: String,
    kind: ModuleKind,
    configuration: ha_core::Configuration,
    connections: Vec<Connection>,
    handler: ModuleHandler,
}

pub(crate) fn spawn_worker(
    rule: Weak<ManagedRule>,
    mut receiver: mpsc::UnboundedReceiver<Firing>,
    mut shutdown: oneshot::Receiver<()>,
) {
    tokio::spawn(async move {
        loop {
            let firing = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                firing = receiver.recv() => match firing {
                    Some(firing) => firing,
                    None => break,
                },
            };

            let Some(rule) = rule.upgrade() else {
                break;
            };
            rule.process(firing).await;
        }
        debug!("Rule worker stopped");
    });
}

impl ManagedRule {
    async fn process(&self, firing: Firing) {
        match firing {
            Firing::Triggered {
                trigger_id,
                outputs,
            } => {
                if !self.transition_if(RuleStatus::Idle, RuleStatus::Running) {
                    debug!(
                        rule_uid = %self.uid,
                        trigger_id = %trigger_id,
                        status = %self.status(),
                        "Dropping firing of rule that is not idle"
                    );
                    return;
                }

                let context: ContextMap = outputs
                    .into_iter()
                    .map(|(name, value)| (format!("{}.{}", trigger_id, name), value))
                    .collect();

                if let Err(e) = self.run(context, true).await {
                    error!(rule_uid = %self.uid, error = %e, "Rule execution failed");
                }
                self.transition_if(RuleStatus::Running, RuleStatus::Idle);
            }
            Firing::Manual {
                consider_conditions,
                context,
                reply,
            } => {
                if !self.transition_if(RuleStatus::Idle, RuleStatus::Running) {
                    let _ = reply.send(Err(RuleEngineError::NotIdle {
                        rule_uid: self.uid.clone(),
                        status: self.status(),
                    }));
                    return;
                }

                let result = self.run(context, consider_conditions).await;
                self.transition_if(RuleStatus::Running, RuleStatus::Idle);
                let _ = reply.send(result);
            }
        }
    }

    async fn snapshot(&self) -> RuleEngineResult<Vec<Step>> {
        let runtime = self.runtime.lock().await;
        runtime
            .modules
            .iter()
            .filter(|m| m.kind != ModuleKind::Trigger)
            .map(|m| {
                let handler = m
                    .handler
                    .as_ref()
                    .ok_or_else(|| RuleEngineError::ExecutionAborted(self.uid.clone()))?;
                Ok(Step {
                    id: m.module.id.clone(),
                    kind: m.kind,
                    configuration: m.module.configuration.clone(),
                    connections: m.connections.iter().cloned().collect(),
                    handler: handler.handler.clone(),
                })
            })
            .collect()
    }

    /// Evaluate conditions, then run actions
    async fn run(
        &self,
        mut context: ContextMap,
        consider_conditions: bool,
    ) -> RuleEngineResult<RunOutcome> {
        let steps = self.snapshot().await?;

        if consider_conditions {
            for step in steps.iter().filter(|s| s.kind == ModuleKind::Condition) {
                if !matches!(self.status(), RuleStatus::Running | RuleStatus::Idle) {
                    debug!(rule_uid = %self.uid, "Rule left RUNNING during condition evaluation");
                    return Ok(RunOutcome {
                        conditions_satisfied: false,
                        context,
                    });
                }

                let ModuleHandler::Condition(handler) = &step.handler else {
                    continue;
                };
                let inputs = module_inputs(&context, &step.connections);
                let satisfied = match AssertUnwindSafe(handler.is_satisfied(&inputs))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(panicked(payload)))
                {
                    Ok(satisfied) => satisfied,
                    Err(e) => {
                        warn!(rule_uid = %self.uid, module_id = %step.id, error = %e, "Condition failed");
                        false
                    }
                };
                if !satisfied {
                    debug!(rule_uid = %self.uid, module_id = %step.id, "Condition not satisfied");
                    return Ok(RunOutcome {
                        conditions_satisfied: false,
                        context,
                    });
                }
            }
        }

        for step in steps.iter().filter(|s| s.kind == ModuleKind::Action) {
            let ModuleHandler::Action(handler) = &step.handler else {
                continue;
            };

            for (key, value) in &step.configuration {
                context.insert(key.clone(), value.clone());
            }
            let inputs = module_inputs(&context, &step.connections);

            let outputs = AssertUnwindSafe(handler.execute(&inputs))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(panicked(payload)))
                .map_err(|source| RuleEngineError::ActionFailed {
                    rule_uid: self.uid.clone(),
                    action_id: step.id.clone(),
                    source,
                })?;

            for (name, value) in outputs.unwrap_or_default() {
                context.insert(format!("{}.{}", step.id, name), value);
            }
        }

        Ok(RunOutcome {
            conditions_satisfied: true,
            context,
        })
    }
}

fn panicked(payload: Box<dyn Any + Send>) -> HandlerError {
    let reason = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    HandlerError::Panicked(reason)
}

/// Context plus the values of a module's connections under their input names
fn module_inputs(context: &ContextMap, connections: &[Connection]) -> ContextMap {
    let mut inputs = context.clone();
    for connection in connections {
        if let Some(value) = connection_value(context, connection) {
            inputs.insert(connection.input_name().to_string(), value);
        }
    }
    inputs
}

fn connection_value(context: &ContextMap, connection: &Connection) -> Option<Value> {
    let Some(source_key) = connection.source_key() else {
        // Context references keep their leading '$'
        return reference::resolve_key(&connection.output_name()[1..], context);
    };

    let value = context.get(&source_key)?;
    match connection.path() {
        Some(path) => reference::resolve_path(value, path),
        None => Some(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(value: Value) -> ContextMap {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_module_inputs() {
        let ctx = context(json!({
            "t1.x": 21.5,
            "a1.result": {"items": ["first", "second"]},
            "threshold": 20
        }));
        let connections = vec![
            Connection::parse("in", "t1.x").unwrap(),
            Connection::parse("item", "a1.result.items[1]").unwrap(),
            Connection::parse("limit", "$threshold").unwrap(),
            Connection::parse("absent", "t2.y").unwrap(),
        ];

        let inputs = module_inputs(&ctx, &connections);
        assert_eq!(inputs["in"], json!(21.5));
        assert_eq!(inputs["item"], json!("second"));
        assert_eq!(inputs["limit"], json!(20));
        assert!(!inputs.contains_key("absent"));
        // The shared context is visible to every module
        assert_eq!(inputs["t1.x"], json!(21.5));
    }
}
