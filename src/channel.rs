//! Broadcast channel with bounded replay
//!
//! Owns the sequence counter, the history buffer and the live subscriber
//! set behind one mutex. Publish, ping, subscribe and every teardown path
//! (explicit unsubscribe, peer close, max-duration timeout, stop) go
//! through that single serialization point, so a subscriber either sees
//! the full effect of a publish or none of it.
//!
//! Flow: subscribe → retry hint + replay → registered → live records →
//! teardown (exactly once).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::headers::{stream_headers, HeaderList};
use crate::history::History;
use crate::message::{format_record, retry_hint, FormattedMessage, Payload, PING_RECORD};
use crate::metrics::ChannelMetrics;
use crate::subscriber::{
    sink_pair, EventStream, PeerClosed, Subscriber, SubscriberEntry, SubscriberId,
    SubscriberRegistry,
};

const EVENT_BUFFER: usize = 256;

/// What the transport knows about an incoming subscription.
#[derive(Debug, Clone, Default)]
pub struct SubscribeRequest {
    /// Peer address, used for diagnostics and `list_clients`.
    pub address: String,
    /// Raw resume id, usually the `Last-Event-ID` header.
    pub last_event_id: Option<String>,
}

impl SubscribeRequest {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn with_last_event_id(mut self, last_event_id: impl Into<String>) -> Self {
        self.last_event_id = Some(last_event_id.into());
        self
    }
}

/// A freshly registered subscription, handed back to the transport.
#[derive(Debug)]
pub struct Subscription {
    pub subscriber: Subscriber,
    /// Response headers; status is always 200.
    pub headers: HeaderList,
    /// Body of the response. Already holds the retry hint and replay.
    pub stream: EventStream,
}

/// Why a subscriber left the live set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    Unsubscribed,
    PeerClosed,
    Timeout,
    Shutdown,
}

/// Lifecycle notifications for observers.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Connected {
        subscriber: Subscriber,
    },
    Disconnected {
        subscriber: Subscriber,
        reason: DisconnectReason,
    },
}

struct State {
    next_id: u64,
    history: History,
    subscribers: SubscriberRegistry,
    keepalive: Option<AbortHandle>,
    stopped: bool,
}

struct Inner {
    config: ChannelConfig,
    state: Mutex<State>,
    events: broadcast::Sender<ChannelEvent>,
    metrics: ChannelMetrics,
}

/// Single-process broadcast channel. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("config", &self.inner.config)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl Channel {
    /// Build a channel and start its keepalive timer.
    ///
    /// Must be called from within a Tokio runtime when pings are enabled.
    pub fn new(config: ChannelConfig) -> Result<Self, ChannelError> {
        config.validate()?;

        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let state = State {
            next_id: config.start_id,
            history: History::new(config.history_size),
            subscribers: SubscriberRegistry::new(),
            keepalive: None,
            stopped: false,
        };
        let channel = Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(state),
                events,
                metrics: ChannelMetrics::new(),
            }),
        };

        if let Some(period) = channel.inner.config.ping_interval() {
            let handle = spawn_keepalive(Arc::downgrade(&channel.inner), period);
            channel.lock_state().keepalive = Some(handle);
        }

        info!(
            start_id = channel.inner.config.start_id,
            history_size = channel.inner.config.history_size,
            ping_interval_ms = channel.inner.config.ping_interval_ms,
            max_stream_duration_ms = channel.inner.config.max_stream_duration_ms,
            "Channel started"
        );

        Ok(channel)
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Format, record and fan out one message.
    ///
    /// Consumes the next sequence id even for an empty payload. Delivery
    /// is best-effort: a failing subscriber never blocks the others.
    pub fn publish(
        &self,
        data: impl Into<Payload>,
        event: Option<&str>,
    ) -> Result<FormattedMessage, ChannelError> {
        let payload = data.into();

        let (record, subscribers, failures) = {
            let mut state = self.lock_state();
            if state.stopped {
                return Err(ChannelError::Stopped);
            }

            let id = state.next_id;
            state.next_id = id
                .checked_add(1)
                .ok_or(ChannelError::IdsExhausted(id))?;

            let record = format_record(id, event, &payload);
            state.history.push(record.clone());
            let failures = state.subscribers.fan_out(&record.shared());
            (record, state.subscribers.len(), failures)
        };

        self.inner.metrics.record_publish(failures);
        debug!(
            id = ?record.id(),
            event = ?event,
            subscribers,
            failures,
            "Published record"
        );

        Ok(record)
    }

    /// Serialize a value to JSON and publish it.
    pub fn publish_json<T: Serialize>(
        &self,
        value: &T,
        event: Option<&str>,
    ) -> Result<FormattedMessage, ChannelError> {
        let payload = Payload::json(value)?;
        self.publish(payload, event)
    }

    /// Write a keepalive comment to every subscriber.
    ///
    /// No id, no history. Returns false once the channel is stopped.
    pub fn ping(&self) -> bool {
        let failures = {
            let state = self.lock_state();
            if state.stopped {
                return false;
            }
            state.subscribers.fan_out(&Arc::from(PING_RECORD))
        };
        self.inner.metrics.record_ping(failures);
        true
    }

    /// Register a new streaming connection.
    ///
    /// The returned stream already carries the retry hint followed by the
    /// replayed history suffix; the subscriber becomes live only after
    /// both were written.
    pub fn subscribe(&self, request: SubscribeRequest) -> Result<Subscription, ChannelError> {
        let config = &self.inner.config;
        let subscriber = Subscriber::new(request.address);
        let headers = stream_headers(config);
        let (sink, stream, peer_closed) = sink_pair();

        let replayed = {
            let mut state = self.lock_state();
            if state.stopped {
                return Err(ChannelError::Stopped);
            }

            let count = replay_count(
                request.last_event_id.as_deref(),
                state.next_id,
                config.rewind,
            );

            // The stream half is still held here, so these writes cannot fail.
            let _ = sink.write(Arc::from(retry_hint(config.client_retry_interval_ms)));
            let mut replayed = 0;
            for record in state.history.tail(count) {
                let _ = sink.write(record.shared());
                replayed += 1;
            }

            let lifecycle = self.spawn_lifecycle(subscriber.id(), peer_closed);
            state.subscribers.insert(SubscriberEntry {
                subscriber: subscriber.clone(),
                sink,
                lifecycle: Some(lifecycle),
            });
            replayed
        };

        self.inner.metrics.record_subscribe(replayed);
        info!(
            subscriber = %subscriber.id(),
            address = %subscriber.address(),
            last_event_id = ?request.last_event_id,
            replayed,
            "Subscriber connected"
        );
        let _ = self.inner.events.send(ChannelEvent::Connected {
            subscriber: subscriber.clone(),
        });

        Ok(Subscription {
            subscriber,
            headers,
            stream,
        })
    }

    /// End a subscriber's stream and drop it from the live set.
    ///
    /// Returns false if it was already gone.
    pub fn unsubscribe(&self, subscriber: &Subscriber) -> bool {
        self.remove(&subscriber.id(), DisconnectReason::Unsubscribed)
    }

    /// Shared teardown path. Only the caller that takes the entry out of
    /// the registry closes the sink; every other trigger is a no-op.
    fn remove(&self, id: &SubscriberId, reason: DisconnectReason) -> bool {
        let Some(entry) = self.lock_state().subscribers.remove(id) else {
            debug!(subscriber = %id, ?reason, "Subscriber already removed");
            return false;
        };

        let subscriber = entry.teardown();
        self.inner.metrics.record_disconnect(reason);
        info!(
            subscriber = %subscriber.id(),
            address = %subscriber.address(),
            ?reason,
            "Subscriber disconnected"
        );
        let _ = self
            .inner
            .events
            .send(ChannelEvent::Disconnected { subscriber, reason });
        true
    }

    /// Watch one subscriber for max-duration expiry or peer close.
    fn spawn_lifecycle(&self, id: SubscriberId, peer_closed: PeerClosed) -> AbortHandle {
        let weak = Arc::downgrade(&self.inner);
        let max_duration = self.inner.config.max_stream_duration();

        tokio::spawn(async move {
            let reason = tokio::select! {
                _ = time::sleep(max_duration) => DisconnectReason::Timeout,
                _ = peer_closed => DisconnectReason::PeerClosed,
            };
            if let Some(inner) = weak.upgrade() {
                Channel { inner }.remove(&id, reason);
            }
        })
        .abort_handle()
    }

    /// Close every live subscriber, halt the keepalive timer and release
    /// history. Idempotent.
    pub fn stop(&self) {
        let (entries, keepalive) = {
            let mut state = self.lock_state();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.history.clear();
            (state.subscribers.drain(), state.keepalive.take())
        };

        if let Some(handle) = keepalive {
            handle.abort();
        }

        let closed = entries.len();
        for entry in entries {
            let subscriber = entry.teardown();
            self.inner
                .metrics
                .record_disconnect(DisconnectReason::Shutdown);
            let _ = self.inner.events.send(ChannelEvent::Disconnected {
                subscriber,
                reason: DisconnectReason::Shutdown,
            });
        }

        info!(closed, "Channel stopped");
    }

    /// Live subscribers grouped by address.
    pub fn list_clients(&self) -> BTreeMap<String, usize> {
        self.lock_state().subscribers.clients_by_address()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_state().subscribers.len()
    }

    /// Whether this subscriber is still in the live set.
    pub fn is_live(&self, subscriber: &Subscriber) -> bool {
        self.lock_state().subscribers.contains(&subscriber.id())
    }

    pub fn history_len(&self) -> usize {
        self.lock_state().history.len()
    }

    /// Id the next publish will be assigned.
    pub fn next_id(&self) -> u64 {
        self.lock_state().next_id
    }

    pub fn is_stopped(&self) -> bool {
        self.lock_state().stopped
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &ChannelMetrics {
        &self.inner.metrics
    }

    /// Subscribe to connect/disconnect notifications.
    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.events.subscribe()
    }
}

/// Keepalive loop. Ends when the channel stops or is dropped.
fn spawn_keepalive(weak: Weak<Inner>, period: Duration) -> AbortHandle {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if !(Channel { inner }).ping() {
                break;
            }
        }
        debug!("Keepalive timer halted");
    })
    .abort_handle()
}

/// Number of history records to replay for a new subscriber.
///
/// A resume id that parses as an integer wins over the configured rewind;
/// anything else is treated as absent. Clipping to retained history is
/// left to the history buffer.
fn replay_count(last_event_id: Option<&str>, next_id: u64, rewind: usize) -> usize {
    let Some(raw) = last_event_id else {
        return rewind;
    };
    match raw.trim().parse::<i64>() {
        Ok(last_id) => {
            let missed = i128::from(next_id) - 1 - i128::from(last_id);
            usize::try_from(missed.max(0)).unwrap_or(usize::MAX)
        }
        Err(_) => {
            warn!(last_event_id = raw, "Ignoring malformed resume id");
            rewind
        }
    }
}
