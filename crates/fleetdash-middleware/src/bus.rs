//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.  Publishing never blocks, so the connection worker can emit
//! events from inside its loop.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Fleet`] | Snapshot updates and fleet clears |
//! | [`Topic::Connectivity`] | Broker session state changes |
//! | [`Topic::Dispatch`] | Commands sent to, or failed for, a vehicle |
//!
//! Every event is also mirrored onto a global lane for consumers that want
//! the whole stream (e.g. the fleet feed).

use fleetdash_types::Event;
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes on the fleet event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Snapshot created/updated, fleet cleared.
    Fleet,
    /// Broker session transitions.
    Connectivity,
    /// Outbound command outcomes.
    Dispatch,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    global: broadcast::Sender<Event>,
    fleet: broadcast::Sender<Event>,
    connectivity: broadcast::Sender<Event>,
    dispatch: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (global, _) = broadcast::channel(capacity);
        let (fleet, _) = broadcast::channel(capacity);
        let (connectivity, _) = broadcast::channel(capacity);
        let (dispatch, _) = broadcast::channel(capacity);
        Self {
            global,
            fleet,
            connectivity,
            dispatch,
        }
    }

    /// Publish `event` on `topic` and mirror it onto the global lane.
    ///
    /// Returns the number of receivers that were handed the event across
    /// both lanes.  `0` means nobody is listening, which is a normal
    /// condition for a dashboard with no open views.
    pub fn publish(&self, topic: Topic, event: Event) -> usize {
        let on_topic = self.topic_sender(topic).send(event.clone()).unwrap_or(0);
        let on_global = self.global.send(event).unwrap_or(0);
        on_topic + on_global
    }

    /// Subscribe to a single [`Topic`].
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic: Some(topic),
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Subscribe to every event regardless of topic.
    pub fn subscribe(&self) -> TopicReceiver {
        TopicReceiver {
            topic: None,
            receiver: self.global.subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Fleet => &self.fleet,
            Topic::Connectivity => &self.connectivity,
            Topic::Dispatch => &self.dispatch,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// Receiver bound to one topic, or to the global lane.
///
/// Lagging is absorbed: a subscriber that falls behind skips the dropped
/// events with a warning and keeps receiving.
pub struct TopicReceiver {
    topic: Option<Topic>,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event.  Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "bus subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Blocking variant of [`recv`][Self::recv] for plain threads.
    ///
    /// Must not be called from inside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.blocking_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "bus subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll; `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// The topic this receiver is bound to, `None` for the global lane.
    pub fn topic(&self) -> Option<Topic> {
        self.topic
    }
}
