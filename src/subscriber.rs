//! Subscriber handles, output sinks and the live registry
//!
//! Each subscription is split in two halves:
//! - `SubscriberSink`, held by the channel, writes records;
//! - `EventStream`, held by the transport, yields them to the peer.
//!
//! Dropping the `EventStream` (the peer went away) fires the peer-close
//! signal that the channel's lifecycle task waits on.

use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;

use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::warn;
use uuid::Uuid;

use crate::error::SinkError;

/// Unique subscriber identifier (UUID v7, time-sortable).
pub type SubscriberId = Uuid;

/// Handle to one live streaming connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    id: SubscriberId,
    address: String,
    connected_at: SystemTime,
}

impl Subscriber {
    pub(crate) fn new(address: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            address,
            connected_at: SystemTime::now(),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Identifying address used for diagnostics and `list_clients`.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }
}

/// Channel-side writer for one subscriber. Closes at most once.
#[derive(Debug)]
pub struct SubscriberSink {
    tx: Option<mpsc::UnboundedSender<Arc<str>>>,
}

impl SubscriberSink {
    /// Queue a chunk for the peer. Never blocks.
    pub fn write(&self, chunk: Arc<str>) -> Result<(), SinkError> {
        match &self.tx {
            Some(tx) => tx.send(chunk).map_err(|_| SinkError::Closed),
            None => Err(SinkError::Closed),
        }
    }

    /// End the output stream. Returns false if it was already ended.
    pub fn close(&mut self) -> bool {
        self.tx.take().is_some()
    }
}

/// Transport-side reader for one subscriber.
///
/// Yields raw event-stream chunks and ends once the channel closes the
/// subscription.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Arc<str>>,
    // Dropped together with the stream; wakes the lifecycle task.
    _peer: oneshot::Sender<()>,
}

impl Stream for EventStream {
    type Item = Arc<str>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Resolves when the transport drops its `EventStream`.
pub type PeerClosed = oneshot::Receiver<()>;

/// Create the connected sink/stream pair for a new subscriber.
pub fn sink_pair() -> (SubscriberSink, EventStream, PeerClosed) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (peer_tx, peer_rx) = oneshot::channel();
    (
        SubscriberSink { tx: Some(tx) },
        EventStream { rx, _peer: peer_tx },
        peer_rx,
    )
}

/// A registered subscriber and the resources the channel holds for it.
#[derive(Debug)]
pub struct SubscriberEntry {
    pub subscriber: Subscriber,
    pub sink: SubscriberSink,
    /// Max-duration / peer-close watcher for this subscriber.
    pub lifecycle: Option<AbortHandle>,
}

impl SubscriberEntry {
    /// Close the sink and cancel the lifecycle watcher.
    pub fn teardown(mut self) -> Subscriber {
        self.sink.close();
        if let Some(handle) = self.lifecycle.take() {
            handle.abort();
        }
        self.subscriber
    }
}

/// Live subscriber set. Membership only, no ordering guarantee.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    entries: HashMap<SubscriberId, SubscriberEntry>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: SubscriberEntry) {
        self.entries.insert(entry.subscriber.id(), entry);
    }

    /// Remove a subscriber. Yields the entry to exactly one caller; every
    /// later call for the same id gets `None`.
    pub fn remove(&mut self, id: &SubscriberId) -> Option<SubscriberEntry> {
        self.entries.remove(id)
    }

    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.entries.contains_key(id)
    }

    /// Write one chunk to every live sink. A failing sink is logged and
    /// skipped; it stays registered until its own close or timeout.
    ///
    /// Returns the number of failed writes.
    pub fn fan_out(&self, chunk: &Arc<str>) -> usize {
        let mut failures = 0;
        for entry in self.entries.values() {
            if let Err(err) = entry.sink.write(Arc::clone(chunk)) {
                failures += 1;
                warn!(
                    subscriber = %entry.subscriber.id(),
                    address = %entry.subscriber.address(),
                    error = %err,
                    "Dropped write to subscriber"
                );
            }
        }
        failures
    }

    /// Live subscribers grouped by address.
    pub fn clients_by_address(&self) -> BTreeMap<String, usize> {
        let mut clients = BTreeMap::new();
        for entry in self.entries.values() {
            *clients
                .entry(entry.subscriber.address().to_string())
                .or_insert(0) += 1;
        }
        clients
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry.
    pub fn drain(&mut self) -> Vec<SubscriberEntry> {
        self.entries.drain().map(|(_, entry)| entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Everything already queued for the peer, without waiting.
    fn drain(stream: &mut EventStream) -> String {
        let mut out = String::new();
        while let Ok(chunk) = stream.rx.try_recv() {
            out.push_str(&chunk);
        }
        out
    }

    fn entry(address: &str) -> (SubscriberEntry, EventStream, PeerClosed) {
        let (sink, stream, peer) = sink_pair();
        let entry = SubscriberEntry {
            subscriber: Subscriber::new(address.to_string()),
            sink,
            lifecycle: None,
        };
        (entry, stream, peer)
    }

    #[test]
    fn test_sink_closes_once() {
        let (mut sink, mut stream, _peer) = sink_pair();
        sink.write(Arc::from("a")).unwrap();

        assert!(sink.close());
        assert!(!sink.close());
        assert_eq!(sink.write(Arc::from("b")), Err(SinkError::Closed));
        assert_eq!(drain(&mut stream), "a");
    }

    #[test]
    fn test_write_after_peer_drop_fails() {
        let (sink, stream, _peer) = sink_pair();
        assert!(sink.write(Arc::from("a")).is_ok());
        drop(stream);
        assert_eq!(sink.write(Arc::from("b")), Err(SinkError::Closed));
    }

    #[test]
    fn test_peer_signal_fires_on_stream_drop() {
        let (_sink, stream, mut peer) = sink_pair();
        assert!(matches!(
            peer.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));
        drop(stream);
        assert!(matches!(
            peer.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn test_remove_yields_entry_once() {
        let mut registry = SubscriberRegistry::new();
        let (e, _stream, _peer) = entry("10.0.0.1");
        let id = e.subscriber.id();
        registry.insert(e);

        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_fan_out_isolates_failures() {
        let mut registry = SubscriberRegistry::new();
        let (a, mut stream_a, _pa) = entry("10.0.0.1");
        let (b, stream_b, _pb) = entry("10.0.0.2");
        let (c, mut stream_c, _pc) = entry("10.0.0.3");
        registry.insert(a);
        registry.insert(b);
        registry.insert(c);
        drop(stream_b);

        let failures = registry.fan_out(&Arc::from("id: 1\ndata: x\n\n"));

        assert_eq!(failures, 1);
        assert_eq!(registry.len(), 3);
        assert_eq!(drain(&mut stream_a), "id: 1\ndata: x\n\n");
        assert_eq!(drain(&mut stream_c), "id: 1\ndata: x\n\n");
    }

    #[test]
    fn test_clients_by_address() {
        let mut registry = SubscriberRegistry::new();
        let mut streams = Vec::new();
        for address in ["10.0.0.1", "10.0.0.2", "10.0.0.1"] {
            let (e, stream, peer) = entry(address);
            registry.insert(e);
            streams.push((stream, peer));
        }

        let clients = registry.clients_by_address();
        assert_eq!(clients.get("10.0.0.1"), Some(&2));
        assert_eq!(clients.get("10.0.0.2"), Some(&1));
    }

    #[test]
    fn test_teardown_ends_stream() {
        let (e, mut stream, _peer) = entry("10.0.0.1");
        e.sink.write(Arc::from("last")).unwrap();
        let subscriber = e.teardown();

        assert_eq!(subscriber.address(), "10.0.0.1");
        assert_eq!(drain(&mut stream), "last");
        assert!(matches!(
            stream.rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
