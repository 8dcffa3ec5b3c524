//! Channel counters
//!
//! Lock-free counters updated on the publish/subscribe paths and exported
//! as a flat map for scraping.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::channel::DisconnectReason;

#[derive(Debug, Default)]
pub struct ChannelMetrics {
    pub records_published: AtomicU64,
    pub pings_sent: AtomicU64,
    pub write_failures: AtomicU64,
    pub records_replayed: AtomicU64,
    pub subscribes: AtomicU64,
    pub disconnects_unsubscribed: AtomicU64,
    pub disconnects_peer_closed: AtomicU64,
    pub disconnects_timeout: AtomicU64,
    pub disconnects_shutdown: AtomicU64,
}

impl ChannelMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a publish and the writes it failed to deliver.
    pub fn record_publish(&self, failures: usize) {
        self.records_published.fetch_add(1, Ordering::Relaxed);
        self.write_failures
            .fetch_add(failures as u64, Ordering::Relaxed);
    }

    pub fn record_ping(&self, failures: usize) {
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
        self.write_failures
            .fetch_add(failures as u64, Ordering::Relaxed);
    }

    pub fn record_subscribe(&self, replayed: usize) {
        self.subscribes.fetch_add(1, Ordering::Relaxed);
        self.records_replayed
            .fetch_add(replayed as u64, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self, reason: DisconnectReason) {
        let counter = match reason {
            DisconnectReason::Unsubscribed => &self.disconnects_unsubscribed,
            DisconnectReason::PeerClosed => &self.disconnects_peer_closed,
            DisconnectReason::Timeout => &self.disconnects_timeout,
            DisconnectReason::Shutdown => &self.disconnects_shutdown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Total completed teardowns across all reasons.
    pub fn disconnects(&self) -> u64 {
        self.disconnects_unsubscribed.load(Ordering::Relaxed)
            + self.disconnects_peer_closed.load(Ordering::Relaxed)
            + self.disconnects_timeout.load(Ordering::Relaxed)
            + self.disconnects_shutdown.load(Ordering::Relaxed)
    }

    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("records_published".to_string(), self.records_published.load(Ordering::Relaxed));
        m.insert("pings_sent".to_string(), self.pings_sent.load(Ordering::Relaxed));
        m.insert("write_failures".to_string(), self.write_failures.load(Ordering::Relaxed));
        m.insert("records_replayed".to_string(), self.records_replayed.load(Ordering::Relaxed));
        m.insert("subscribes".to_string(), self.subscribes.load(Ordering::Relaxed));
        m.insert("disconnects_unsubscribed".to_string(), self.disconnects_unsubscribed.load(Ordering::Relaxed));
        m.insert("disconnects_peer_closed".to_string(), self.disconnects_peer_closed.load(Ordering::Relaxed));
        m.insert("disconnects_timeout".to_string(), self.disconnects_timeout.load(Ordering::Relaxed));
        m.insert("disconnects_shutdown".to_string(), self.disconnects_shutdown.load(Ordering::Relaxed));
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = ChannelMetrics::new();
        metrics.record_publish(0);
        metrics.record_publish(2);
        metrics.record_ping(1);
        metrics.record_subscribe(3);

        let exported = metrics.export();
        assert_eq!(exported["records_published"], 2);
        assert_eq!(exported["pings_sent"], 1);
        assert_eq!(exported["write_failures"], 3);
        assert_eq!(exported["records_replayed"], 3);
        assert_eq!(exported["subscribes"], 1);
    }

    #[test]
    fn test_disconnects_by_reason() {
        let metrics = ChannelMetrics::new();
        metrics.record_disconnect(DisconnectReason::Timeout);
        metrics.record_disconnect(DisconnectReason::Timeout);
        metrics.record_disconnect(DisconnectReason::PeerClosed);

        assert_eq!(metrics.disconnects(), 3);
        assert_eq!(metrics.export()["disconnects_timeout"], 2);
        assert_eq!(metrics.export()["disconnects_peer_closed"], 1);
        assert_eq!(metrics.export()["disconnects_shutdown"], 0);
    }
}
