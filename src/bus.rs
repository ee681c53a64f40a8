//! Event bus — bounded fan-out of normalized inbound messages.
//!
//! The bus decouples platform adapters from consumers: adapters publish
//! [`NormalizedMessage`]s as they arrive, each subscriber owns an independent
//! bounded queue, and a slow subscriber can never stall the publishing side.
//! When a queue is full the subscriber's [`OverflowPolicy`] decides which
//! message to shed; every shed message increments a per-subscriber drop
//! counter that stays visible for diagnostics.
//!
//! Ordering: `publish` appends to each matching queue in call order, so
//! messages from one conversation (which a single adapter task publishes
//! sequentially) are observed FIFO by every subscriber. Interleaving across
//! conversations or platforms carries no ordering guarantee.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Deserialize;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::types::{NormalizedMessage, Platform};

/// Queue capacity used when a subscriber does not request its own.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Overflow policy
// ---------------------------------------------------------------------------

/// What to shed when a subscriber's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued message to make room for the incoming one.
    #[default]
    DropOldest,
    /// Refuse the incoming message and keep the queue as-is.
    DropNewest,
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Optional constraints a subscriber places on the messages it receives.
///
/// An unset field matches everything, so `EventFilter::default()` subscribes
/// to the full stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Only deliver messages from this platform.
    pub platform: Option<Platform>,
    /// Only deliver messages from this conversation.
    pub conversation_id: Option<String>,
}

impl EventFilter {
    /// Match every message on the bus.
    pub fn any() -> Self {
        Self::default()
    }

    /// Match only messages from one platform.
    pub fn platform(platform: Platform) -> Self {
        Self {
            platform: Some(platform),
            conversation_id: None,
        }
    }

    /// Match only messages from one conversation on one platform.
    pub fn conversation(platform: Platform, conversation_id: impl Into<String>) -> Self {
        Self {
            platform: Some(platform),
            conversation_id: Some(conversation_id.into()),
        }
    }

    fn matches(&self, message: &NormalizedMessage) -> bool {
        if let Some(platform) = self.platform {
            if message.platform != platform {
                return false;
            }
        }
        if let Some(conversation_id) = &self.conversation_id {
            if &message.conversation_id != conversation_id {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Subscriber state
// ---------------------------------------------------------------------------

/// Outcome of offering one message to a subscriber queue.
enum Offer {
    Accepted,
    ShedOldest,
    ShedNewest,
}

struct SubscriberState {
    id: u64,
    name: String,
    filter: EventFilter,
    capacity: usize,
    policy: OverflowPolicy,
    queue: Mutex<VecDeque<Arc<NormalizedMessage>>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl SubscriberState {
    /// Appends a message, shedding per policy when at capacity.
    fn offer(&self, message: &Arc<NormalizedMessage>) -> Offer {
        let Ok(mut queue) = self.queue.lock() else {
            warn!(subscriber = %self.name, "subscriber queue lock poisoned, message lost");
            return Offer::ShedNewest;
        };
        if queue.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    queue.pop_front();
                    queue.push_back(Arc::clone(message));
                    Offer::ShedOldest
                }
                OverflowPolicy::DropNewest => Offer::ShedNewest,
            }
        } else {
            queue.push_back(Arc::clone(message));
            Offer::Accepted
        }
    }

    fn pop(&self) -> Option<Arc<NormalizedMessage>> {
        match self.queue.lock() {
            Ok(mut queue) => queue.pop_front(),
            Err(_) => None,
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

// ---------------------------------------------------------------------------
// Subscription handle
// ---------------------------------------------------------------------------

/// Receiving end of one bus subscription.
///
/// Dropping the handle closes the subscription; the bus reaps it on the next
/// publish. Prefer [`EventBus::unsubscribe`] for immediate removal.
pub struct SubscriptionHandle {
    state: Arc<SubscriberState>,
}

impl SubscriptionHandle {
    /// Receive the next queued message, waiting if the queue is empty.
    ///
    /// Returns `None` once the subscription is closed and the queue has been
    /// drained.
    pub async fn recv(&mut self) -> Option<Arc<NormalizedMessage>> {
        loop {
            if let Some(message) = self.state.pop() {
                return Some(message);
            }
            if self.state.closed.load(Ordering::Acquire) {
                return None;
            }
            // notify_one stores a permit when no waiter is registered, so a
            // publish landing between the pop above and this await still wakes
            // the next poll.
            self.state.notify.notified().await;
        }
    }

    /// Receive without waiting. Returns `None` when the queue is empty.
    pub fn try_recv(&mut self) -> Option<Arc<NormalizedMessage>> {
        self.state.pop()
    }

    /// Number of messages this subscriber has shed so far.
    pub fn dropped_count(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }

    /// Number of messages currently queued.
    pub fn pending_count(&self) -> usize {
        match self.state.queue.lock() {
            Ok(queue) => queue.len(),
            Err(_) => 0,
        }
    }

    /// Identifier assigned by the bus at subscribe time.
    pub fn id(&self) -> u64 {
        self.state.id
    }

    /// Subscriber name used in diagnostics.
    pub fn name(&self) -> &str {
        &self.state.name
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.state.close();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.state.id)
            .field("name", &self.state.name)
            .field("dropped", &self.dropped_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// Fan-out hub for normalized inbound messages.
///
/// `publish` is non-blocking: every operation it performs is bounded (queue
/// append, possible eviction, waiter wakeup), independent of how far behind
/// any subscriber is.
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<SubscriberState>>>,
    next_id: AtomicU64,
    default_capacity: usize,
    default_policy: OverflowPolicy,
}

impl EventBus {
    /// Create a bus with the given per-subscriber defaults.
    pub fn new(default_capacity: usize, default_policy: OverflowPolicy) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            default_capacity: default_capacity.max(1),
            default_policy,
        }
    }

    /// Subscribe with the bus-default capacity and overflow policy.
    pub fn subscribe(&self, filter: EventFilter) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("sub-{id}");
        self.attach(name, filter, self.default_capacity, self.default_policy, id)
    }

    /// Subscribe with an explicit name, queue capacity and overflow policy.
    pub fn subscribe_with(
        &self,
        name: impl Into<String>,
        filter: EventFilter,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.attach(name.into(), filter, capacity.max(1), policy, id)
    }

    fn attach(
        &self,
        name: String,
        filter: EventFilter,
        capacity: usize,
        policy: OverflowPolicy,
        id: u64,
    ) -> SubscriptionHandle {
        let state = Arc::new(SubscriberState {
            id,
            name,
            filter,
            capacity,
            policy,
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.push(Arc::clone(&state));
        } else {
            warn!("subscriber list lock poisoned, subscription inert");
            state.close();
        }
        debug!(subscriber = %state.name, capacity, "bus subscriber attached");
        SubscriptionHandle { state }
    }

    /// Remove a subscription immediately and drop any queued messages.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        handle.state.close();
        let id = handle.state.id;
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.retain(|s| s.id != id);
        }
        debug!(subscriber = %handle.state.name, "bus subscriber detached");
    }

    /// Deliver one message to every matching subscriber.
    ///
    /// Full queues shed per each subscriber's policy; the publisher never
    /// waits on a consumer.
    pub fn publish(&self, message: Arc<NormalizedMessage>) {
        let mut saw_closed = false;
        {
            let Ok(subscribers) = self.subscribers.read() else {
                warn!("subscriber list lock poisoned, message not delivered");
                return;
            };
            for subscriber in subscribers.iter() {
                if subscriber.closed.load(Ordering::Acquire) {
                    saw_closed = true;
                    continue;
                }
                if !subscriber.filter.matches(&message) {
                    continue;
                }
                match subscriber.offer(&message) {
                    Offer::Accepted => subscriber.notify.notify_one(),
                    Offer::ShedOldest => {
                        let total = subscriber.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            subscriber = %subscriber.name,
                            platform = %message.platform,
                            dropped_total = total.saturating_add(1),
                            "subscriber queue full, evicted oldest message"
                        );
                        subscriber.notify.notify_one();
                    }
                    Offer::ShedNewest => {
                        let total = subscriber.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            subscriber = %subscriber.name,
                            platform = %message.platform,
                            dropped_total = total.saturating_add(1),
                            "subscriber queue full, refused incoming message"
                        );
                    }
                }
            }
        }
        if saw_closed {
            self.reap_closed();
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        match self.subscribers.read() {
            Ok(subscribers) => subscribers.len(),
            Err(_) => 0,
        }
    }

    fn reap_closed(&self) {
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.retain(|s| !s.closed.load(Ordering::Acquire));
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("default_capacity", &self.default_capacity)
            .field("default_policy", &self.default_policy)
            .finish()
    }
}
