//! Fan-out of scripthash status notifications to subscriber channels.
//!
//! A topic (scripthash) stays in the table as long as at least one channel
//! watches one of its addresses. Upstream subscriptions are never cancelled:
//! Electrum has no reliable unsubscribe, and closing a channel here only
//! stops delivery.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::address::Address;
use crate::error::CoreError;
use crate::scripthash::Scripthash;

// ==============================================================================
// Channel Identity and Events
// ==============================================================================

/// Opaque handle naming one subscriber channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// 8 random bytes rendered as hex.
    pub fn random() -> Self {
        Self(hex::encode(rand::random::<[u8; 8]>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ChannelId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ChannelId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionEvent {
    /// Sent once when a stream attaches to its channel.
    Subscribed { addresses: Vec<Address> },
    StatusChanged {
        address: Address,
        scripthash: Scripthash,
        /// `None` when the scripthash has no history.
        status: Option<String>,
        time_ms: u64,
    },
}

// ==============================================================================
// Registry
// ==============================================================================

struct Sink {
    id: u64,
    tx: mpsc::UnboundedSender<SubscriptionEvent>,
}

struct Channel {
    addresses: Vec<Address>,
    sink: Option<Sink>,
}

#[derive(Default)]
struct Tables {
    channels: HashMap<ChannelId, Channel>,
    topics: HashMap<Scripthash, HashSet<ChannelId>>,
    /// Watched topics whose last upstream subscribe failed.
    unconfirmed: HashSet<Scripthash>,
    next_sink_id: u64,
}

impl Tables {
    fn detach_topics(&mut self, channel_id: &ChannelId, addresses: &[Address]) {
        for address in addresses {
            let topic = Scripthash::from_address(address);
            if let Some(set) = self.topics.get_mut(&topic) {
                set.remove(channel_id);
                if set.is_empty() {
                    self.topics.remove(&topic);
                    self.unconfirmed.remove(&topic);
                }
            }
        }
    }
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    tables: Mutex<Tables>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `addresses` under `channel_id` and return the topics that
    /// still need an upstream subscribe: those nobody watched before and
    /// those whose earlier subscribe failed.
    ///
    /// Registering an existing channel again replaces its address list.
    pub fn subscribe_channel(&self, channel_id: ChannelId, addresses: Vec<Address>) -> Vec<Scripthash> {
        let mut guard = self.lock();
        let tables = &mut *guard;

        let sink = match tables.channels.remove(&channel_id) {
            Some(previous) => {
                tables.detach_topics(&channel_id, &previous.addresses);
                previous.sink
            }
            None => None,
        };

        let mut fresh = Vec::new();
        for address in &addresses {
            let topic = Scripthash::from_address(address);
            let set = tables.topics.entry(topic).or_default();
            let needs_upstream = set.is_empty() || tables.unconfirmed.remove(&topic);
            if needs_upstream && !fresh.contains(&topic) {
                fresh.push(topic);
            }
            set.insert(channel_id.clone());
        }

        debug!(
            channel = %channel_id,
            addresses = addresses.len(),
            new_topics = fresh.len(),
            "subscription channel registered"
        );
        tables.channels.insert(channel_id, Channel { addresses, sink });
        fresh
    }

    /// Bind an event stream to `channel_id`. The first event is always
    /// [`SubscriptionEvent::Subscribed`]. Dropping the stream closes the
    /// channel.
    pub fn attach_sink(self: &Arc<Self>, channel_id: &ChannelId) -> Result<EventStream, CoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tables = self.lock();
        tables.next_sink_id += 1;
        let sink_id = tables.next_sink_id;

        let channel = tables
            .channels
            .get_mut(channel_id)
            .ok_or_else(|| CoreError::UnknownChannel(channel_id.to_string()))?;

        // Receiver is alive right here, so this cannot fail.
        let _ = tx.send(SubscriptionEvent::Subscribed {
            addresses: channel.addresses.clone(),
        });
        channel.sink = Some(Sink { id: sink_id, tx });

        Ok(EventStream {
            rx,
            _guard: SinkGuard {
                registry: Arc::downgrade(self),
                channel_id: channel_id.clone(),
                sink_id,
            },
        })
    }

    /// Deliver a status change for `topic` to every interested channel.
    /// Returns the number of sinks that received the event.
    pub fn on_topic_notification(&self, topic: &Scripthash, status: Option<&str>) -> usize {
        let tables = self.lock();
        let Some(channel_ids) = tables.topics.get(topic) else {
            trace!(scripthash = %topic, "notification for unwatched scripthash");
            return 0;
        };

        let time_ms = now_ms();
        let mut delivered = 0;
        for channel_id in channel_ids {
            let Some(channel) = tables.channels.get(channel_id) else {
                continue;
            };
            let Some(sink) = &channel.sink else {
                continue;
            };
            let Some(address) = channel
                .addresses
                .iter()
                .find(|address| Scripthash::from_address(address) == *topic)
            else {
                continue;
            };
            let event = SubscriptionEvent::StatusChanged {
                address: address.clone(),
                scripthash: *topic,
                status: status.map(str::to_owned),
                time_ms,
            };
            if sink.tx.send(event).is_ok() {
                delivered += 1;
            }
        }
        trace!(scripthash = %topic, delivered, "status notification fanned out");
        delivered
    }

    /// Record that the upstream subscribe for `topic` failed, so the next
    /// channel watching it issues the subscribe again.
    pub fn upstream_failed(&self, topic: &Scripthash) {
        let mut tables = self.lock();
        if tables.topics.contains_key(topic) {
            tables.unconfirmed.insert(*topic);
        }
    }

    /// Forget a channel. Idempotent; returns whether it existed.
    pub fn close_channel(&self, channel_id: &ChannelId) -> bool {
        let mut tables = self.lock();
        let Some(channel) = tables.channels.remove(channel_id) else {
            return false;
        };
        tables.detach_topics(channel_id, &channel.addresses);
        debug!(channel = %channel_id, "subscription channel closed");
        true
    }

    pub fn addresses(&self, channel_id: &ChannelId) -> Option<Vec<Address>> {
        self.lock()
            .channels
            .get(channel_id)
            .map(|channel| channel.addresses.clone())
    }

    pub fn is_watched(&self, topic: &Scripthash) -> bool {
        self.lock().topics.contains_key(topic)
    }

    pub fn watched_topics(&self) -> Vec<Scripthash> {
        self.lock().topics.keys().copied().collect()
    }

    pub fn topic_count(&self) -> usize {
        self.lock().topics.len()
    }

    pub fn channel_count(&self) -> usize {
        self.lock().channels.len()
    }

    fn detach_sink(&self, channel_id: &ChannelId, sink_id: u64) {
        let current = {
            let tables = self.lock();
            tables
                .channels
                .get(channel_id)
                .and_then(|channel| channel.sink.as_ref())
                .is_some_and(|sink| sink.id == sink_id)
        };
        // A newer stream took over the channel; leave it alone.
        if current {
            self.close_channel(channel_id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

// ==============================================================================
// Event Stream
// ==============================================================================

struct SinkGuard {
    registry: Weak<SubscriptionRegistry>,
    channel_id: ChannelId,
    sink_id: u64,
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.detach_sink(&self.channel_id, self.sink_id);
        }
    }
}

/// Events for one channel. Ends when the channel is closed elsewhere.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<SubscriptionEvent>,
    _guard: SinkGuard,
}

impl EventStream {
    pub fn channel_id(&self) -> &ChannelId {
        &self._guard.channel_id
    }
}

impl Stream for EventStream {
    type Item = SubscriptionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
