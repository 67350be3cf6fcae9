//! Event bus for rule status changes
//!
//! The rule engine publishes a `RuleStatusInfoEvent` every time a rule
//! changes status. Subscribers may listen to a single rule (keyed by rule
//! UID) or to every rule.

use dashmap::DashMap;
use ha_core::{Event, EventPublisher, PublishError, RuleStatusInfoEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default channel capacity for event subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Status event as carried on the bus
pub type StatusEvent = Event<RuleStatusInfoEvent>;

/// The event bus for rule status events
///
/// Supports:
/// - Subscribing to the events of one rule
/// - Subscribing to all events
/// - Closing the bus, after which publishing fails
pub struct EventBus {
    /// Per-rule broadcast senders
    listeners: DashMap<String, broadcast::Sender<StatusEvent>>,
    /// Sender for subscribers of every rule
    match_all_sender: broadcast::Sender<StatusEvent>,
    /// Set once the bus stops accepting events
    closed: AtomicBool,
    /// Channel capacity
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with specified channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (match_all_sender, _) = broadcast::channel(capacity);
        Self {
            listeners: DashMap::new(),
            match_all_sender,
            closed: AtomicBool::new(false),
            capacity,
        }
    }

    /// Subscribe to the status events of one rule
    pub fn subscribe(&self, rule_uid: impl Into<String>) -> broadcast::Receiver<StatusEvent> {
        let rule_uid = rule_uid.into();
        trace!(rule_uid = %rule_uid, "Subscribing to rule status events");

        self.listeners
            .entry(rule_uid)
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.capacity);
                tx
            })
            .subscribe()
    }

    /// Subscribe to the status events of all rules
    pub fn subscribe_all(&self) -> broadcast::Receiver<StatusEvent> {
        self.match_all_sender.subscribe()
    }

    /// Deliver an event to the rule's subscribers and to match-all subscribers
    pub fn fire(&self, event: StatusEvent) -> Result<(), PublishError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PublishError::Closed);
        }

        debug!(
            rule_uid = %event.topic,
            status = %event.data.status_info,
            "Firing rule status event"
        );

        if let Some(sender) = self.listeners.get(&event.topic) {
            // Send errors only mean there are no active receivers
            let _ = sender.send(event.clone());
        }

        let _ = self.match_all_sender.send(event);
        Ok(())
    }

    /// Drop the channel of a rule that no longer exists
    pub fn forget(&self, rule_uid: &str) {
        self.listeners.remove(rule_uid);
    }

    /// Stop accepting events
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.listeners.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Get the number of rules with a dedicated channel
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher for EventBus {
    fn post(&self, event: StatusEvent) -> Result<(), PublishError> {
        self.fire(event)
    }
}

/// Thread-safe wrapper for EventBus
pub type SharedEventBus = Arc<EventBus>;
