//! Delayed re-initialization of rules waiting for handlers

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use ha_core::{RuleStatus, RuleStatusDetail, RuleStatusInfo};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// One initialization attempt; `None` when the rule is gone
pub(crate) type Attempt =
    Box<dyn Fn() -> BoxFuture<'static, Option<RuleStatusInfo>> + Send + Sync>;

struct RetryTask {
    id: u64,
    handle: JoinHandle<()>,
    /// Status the last attempt ended in
    outcome: Arc<Mutex<Option<RuleStatus>>>,
}

impl RetryTask {
    /// Whether a new task may replace this one
    fn is_replaceable(&self) -> bool {
        self.handle.is_finished() && *self.outcome.lock() == Some(RuleStatus::Uninitialized)
    }
}

/// At most one pending retry task per rule
pub(crate) struct RetryScheduler {
    delay: Duration,
    tasks: Arc<DashMap<String, RetryTask>>,
    next_id: AtomicU64,
}

impl RetryScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            tasks: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `attempt` for `rule_uid` unless a task is pending, or the last
    /// one finished in a state other than UNINITIALIZED
    ///
    /// The task keeps retrying while the attempt ends in
    /// UNINITIALIZED / HANDLER_INITIALIZING_ERROR. Once the rule leaves
    /// UNINITIALIZED, or is gone, the task forgets itself so a later loss of
    /// handlers can schedule again.
    pub fn schedule(&self, rule_uid: &str, attempt: Attempt) -> bool {
        match self.tasks.entry(rule_uid.to_string()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_replaceable() {
                    return false;
                }
                entry.insert(self.spawn(rule_uid, attempt));
            }
            Entry::Vacant(entry) => {
                entry.insert(self.spawn(rule_uid, attempt));
            }
        }
        debug!(
            rule_uid = %rule_uid,
            delay_ms = self.delay.as_millis() as u64,
            "Scheduled re-initialization"
        );
        true
    }

    fn spawn(&self, rule_uid: &str, attempt: Attempt) -> RetryTask {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let outcome = Arc::new(Mutex::new(None));
        let task_outcome = outcome.clone();
        let tasks = self.tasks.clone();
        let delay = self.delay;
        let rule_uid = rule_uid.to_string();

        let handle = tokio::spawn(async move {
            let resolved = loop {
                tokio::time::sleep(delay).await;
                let Some(info) = attempt().await else {
                    break true;
                };

                *task_outcome.lock() = Some(info.status);
                if info.status != RuleStatus::Uninitialized {
                    break true;
                }
                if info.detail != RuleStatusDetail::HandlerInitializingError {
                    break false;
                }
                debug!(rule_uid = %rule_uid, "Handlers still missing, retrying");
            };

            if resolved {
                tasks.remove_if(&rule_uid, |_, task| task.id == id);
            }
        });

        RetryTask { id, handle, outcome }
    }

    pub fn is_pending(&self, rule_uid: &str) -> bool {
        self.tasks
            .get(rule_uid)
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn cancel(&self, rule_uid: &str) {
        if let Some((_, task)) = self.tasks.remove(rule_uid) {
            task.handle.abort();
            debug!(rule_uid = %rule_uid, "Cancelled re-initialization");
        }
    }

    pub fn cancel_all(&self) {
        let rule_uids: Vec<String> = self.tasks.iter().map(|t| t.key().clone()).collect();
        for rule_uid in rule_uids {
            self.cancel(&rule_uid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_attempt(calls: Arc<AtomicUsize>, results: Vec<RuleStatusInfo>) -> Attempt {
        let results = Arc::new(results);
        Box::new(move || {
            let calls = calls.clone();
            let results = results.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                results.get(n).or(results.last()).cloned()
            }
            .boxed()
        })
    }

    fn missing_handlers() -> RuleStatusInfo {
        RuleStatusInfo::uninitialized(RuleStatusDetail::HandlerInitializingError, None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_resolved() {
        let scheduler = RetryScheduler::new(Duration::from_millis(500));
        let calls = Arc::new(AtomicUsize::new(0));
        let attempt = counting_attempt(
            calls.clone(),
            vec![missing_handlers(), RuleStatusInfo::new(RuleStatus::Idle)],
        );

        assert!(scheduler.schedule("r1", attempt));
        assert!(scheduler.is_pending("r1"));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!scheduler.is_pending("r1"));

        // Finished in IDLE: a later loss of handlers starts a new task
        let again = counting_attempt(calls.clone(), vec![missing_handlers()]);
        assert!(scheduler.schedule("r1", again));
        assert!(scheduler.is_pending("r1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_pending_task_per_rule() {
        let scheduler = RetryScheduler::new(Duration::from_millis(500));
        let calls = Arc::new(AtomicUsize::new(0));

        assert!(scheduler.schedule(
            "r1",
            counting_attempt(calls.clone(), vec![RuleStatusInfo::new(RuleStatus::Idle)])
        ));
        assert!(!scheduler.schedule(
            "r1",
            counting_attempt(calls.clone(), vec![RuleStatusInfo::new(RuleStatus::Idle)])
        ));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_after_terminal_uninitialized() {
        let scheduler = RetryScheduler::new(Duration::from_millis(100));
        let calls = Arc::new(AtomicUsize::new(0));
        let invalid = RuleStatusInfo::uninitialized(RuleStatusDetail::InvalidRule, None);

        assert!(scheduler.schedule("r1", counting_attempt(calls.clone(), vec![invalid])));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!scheduler.is_pending("r1"));

        assert!(scheduler.schedule(
            "r1",
            counting_attempt(calls.clone(), vec![RuleStatusInfo::new(RuleStatus::Idle)])
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let scheduler = RetryScheduler::new(Duration::from_millis(500));
        let calls = Arc::new(AtomicUsize::new(0));

        scheduler.schedule("r1", counting_attempt(calls.clone(), vec![missing_handlers()]));
        scheduler.cancel_all();
        tokio::time::sleep(Duration::from_millis(2000)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!scheduler.is_pending("r1"));
    }
}
