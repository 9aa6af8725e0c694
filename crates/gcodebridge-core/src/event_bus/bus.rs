//! Event bus shared by the serial bridge, which publishes, and the
//! WebSocket relay and reconnect supervisor, which listen.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::{AppEvent, EventCategory};

/// Subscription handle for unsubscribing from events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new unique subscription ID
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", &self.0.to_string()[..8])
    }
}

/// Filter to receive only specific event types
#[derive(Debug, Clone, Default)]
pub enum EventFilter {
    /// Receive all events.
    #[default]
    All,
    /// Receive events matching any of these categories.
    Categories(Vec<EventCategory>),
}

impl EventFilter {
    /// Check if an event matches this filter
    pub fn matches(&self, event: &AppEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Categories(categories) => categories.contains(&event.category()),
        }
    }
}

type Handler = Box<dyn Fn(AppEvent) + Send + Sync>;

struct Subscription {
    filter: EventFilter,
    handler: Handler,
}

/// Configuration for the event bus
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Capacity of the broadcast channel; slower receivers lag past it
    pub channel_capacity: usize,
    /// Keep recently published events
    pub enable_history: bool,
    /// Most events kept in history
    pub max_history_size: usize,
    /// Oldest event kept in history
    pub history_retention: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            enable_history: false,
            max_history_size: 1000,
            history_retention: Duration::from_secs(300),
        }
    }
}

/// Bounded, age-limited record of published events
#[derive(Default)]
struct History {
    events: VecDeque<(Instant, AppEvent)>,
}

impl History {
    fn record(&mut self, event: &AppEvent, config: &EventBusConfig) {
        let now = Instant::now();
        self.events.push_back((now, event.clone()));

        while let Some((at, _)) = self.events.front() {
            let too_old = now.duration_since(*at) > config.history_retention;
            if too_old || self.events.len() > config.max_history_size {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    fn since(&self, since: Option<Instant>) -> Vec<AppEvent> {
        self.events
            .iter()
            .filter(|(at, _)| since.is_none_or(|since| *at >= since))
            .map(|(_, event)| event.clone())
            .collect()
    }
}

/// Error types for event bus operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum EventBusError {
    /// Nothing is listening
    #[error("No active subscribers")]
    NoSubscribers,
}

/// Fan-out point for everything the bridge observes
///
/// Async consumers take a [`broadcast`] receiver; in-process code may also
/// register synchronous handlers, which run on the publishing thread.
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    history: RwLock<History>,
    config: EventBusConfig,
}

impl EventBus {
    /// Create a new event bus with default configuration
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a new event bus with custom configuration
    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            subscriptions: RwLock::new(HashMap::new()),
            history: RwLock::new(History::default()),
            config,
        }
    }

    /// Publish an event to all handlers and receivers
    ///
    /// Returns the number of async receivers reached, or `NoSubscribers` when
    /// neither a handler nor a receiver is listening.
    pub fn publish(&self, event: AppEvent) -> Result<usize, EventBusError> {
        if self.config.enable_history {
            self.history.write().record(&event, &self.config);
        }

        let subscriptions = self.subscriptions.read();
        for subscription in subscriptions.values() {
            if subscription.filter.matches(&event) {
                (subscription.handler)(event.clone());
            }
        }

        match self.sender.send(event) {
            Ok(count) => Ok(count),
            Err(_) if subscriptions.is_empty() => Err(EventBusError::NoSubscribers),
            Err(_) => Ok(0),
        }
    }

    /// Register a synchronous handler for events matching `filter`
    ///
    /// The handler runs on the publishing thread, which for serial traffic is
    /// the serial I/O thread. It must return quickly.
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(AppEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        self.subscriptions.write().insert(
            id,
            Subscription {
                filter,
                handler: Box::new(handler),
            },
        );
        tracing::debug!("Subscription {} added", id);
        id
    }

    /// Async receiver of every event published from now on
    pub fn receiver(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// Remove a handler; false when `id` was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscriptions.write().remove(&id).is_some();
        if removed {
            tracing::debug!("Subscription {} removed", id);
        }
        removed
    }

    /// Number of synchronous handlers
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Number of live async receivers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Recorded events, optionally only those published at or after `since`
    ///
    /// Empty unless history is enabled.
    pub fn history(&self, since: Option<Instant>) -> Vec<AppEvent> {
        if !self.config.enable_history {
            return Vec::new();
        }
        self.history.read().since(since)
    }

    /// Forget recorded events
    pub fn clear_history(&self) {
        self.history.write().events.clear();
    }

    /// Bus configuration
    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("receivers", &self.receiver_count())
            .field("config", &self.config)
            .finish()
    }
}
