//! Headless, topic-addressed publish/subscribe event bus.
//!
//! Uses a [`tokio::sync::broadcast`] channel under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.  Subscribers filter on the event's topic string.
//!
//! # Topics
//!
//! A topic is `<scoped-unit-name>.<event-name>`, built with
//! [`robokit_types::event_topic`].  Publishers and subscribers never hold
//! references to each other; the topic string is the only address.
//!
//! | Filter | Matches |
//! |---|---|
//! | [`EventBus::subscribe`] | exactly one topic, e.g. `robot_a_button.push` |
//! | [`EventBus::subscribe_prefix`] | every topic with a prefix, e.g. `robot_a_` |

use robokit_types::{Event, EventPayload};
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish `payload` under `topic`.
    ///
    /// Returns the number of active receivers that were handed the event.
    /// Nobody listening is a normal condition and yields `0`.
    pub fn publish(&self, topic: impl Into<String>, payload: EventPayload) -> usize {
        self.publish_event(Event::new(topic, payload))
    }

    /// Publish a pre-built [`Event`].
    pub fn publish_event(&self, event: Event) -> usize {
        match self.sender.send(event) {
            Ok(n) => n,
            Err(broadcast::error::SendError(event)) => {
                trace!(topic = %event.topic, "event dropped, no subscribers");
                0
            }
        }
    }

    /// Subscribe to exactly one topic.
    pub fn subscribe(&self, topic: impl Into<String>) -> TopicSubscriber {
        TopicSubscriber {
            filter: TopicFilter::Exact(topic.into()),
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to every topic starting with `prefix`.  An empty prefix
    /// receives all traffic.
    pub fn subscribe_prefix(&self, prefix: impl Into<String>) -> TopicSubscriber {
        TopicSubscriber {
            filter: TopicFilter::Prefix(prefix.into()),
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[derive(Debug, Clone)]
enum TopicFilter {
    Exact(String),
    Prefix(String),
}

impl TopicFilter {
    fn matches(&self, topic: &str) -> bool {
        match self {
            TopicFilter::Exact(t) => topic == t,
            TopicFilter::Prefix(p) => topic.starts_with(p.as_str()),
        }
    }

    fn as_str(&self) -> &str {
        match self {
            TopicFilter::Exact(t) | TopicFilter::Prefix(t) => t,
        }
    }
}

/// A subscriber that only delivers events whose topic passes its filter.
pub struct TopicSubscriber {
    filter: TopicFilter,
    receiver: broadcast::Receiver<Event>,
}

impl TopicSubscriber {
    /// Wait for the next event that matches this subscriber's topic filter.
    ///
    /// Returns `None` when the bus is closed and no further events will arrive.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event.topic) => {
                    return Some(event);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Subscriber fell behind; log and continue.
                    warn!(topic = %self.filter.as_str(), lagged_by = n, "TopicSubscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The topic (or prefix) this subscriber is bound to.
    pub fn topic(&self) -> &str {
        self.filter.as_str()
    }
}
