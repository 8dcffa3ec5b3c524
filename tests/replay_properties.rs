//! Property tests for sequence ids and replay windows

use event_relay::{Channel, ChannelConfig, EventStream, SubscribeRequest};
use futures::{FutureExt, StreamExt};
use proptest::prelude::*;

fn wire_ids(body: &str) -> Vec<u64> {
    body.lines()
        .filter_map(|line| line.strip_prefix("id: "))
        .map(|id| id.parse().unwrap())
        .collect()
}

/// Everything already queued on the stream, without waiting.
fn drain_ready(stream: &mut EventStream) -> String {
    let mut out = String::new();
    while let Some(Some(chunk)) = tokio::task::unconstrained(stream.next()).now_or_never() {
        out.push_str(&chunk);
    }
    out
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn prop_ids_strictly_increase_from_start(
        start_id in 0u64..1_000_000,
        publishes in 1usize..200,
    ) {
        let rt = runtime();
        let _guard = rt.enter();
        let channel = Channel::new(ChannelConfig {
            ping_interval_ms: 0,
            start_id,
            ..ChannelConfig::default()
        })
        .unwrap();

        let ids: Vec<u64> = (0..publishes)
            .map(|i| channel.publish(format!("m{}", i), None).unwrap().id().unwrap())
            .collect();

        let expected: Vec<u64> = (start_id..start_id + publishes as u64).collect();
        prop_assert_eq!(ids, expected);
        prop_assert_eq!(channel.next_id(), start_id + publishes as u64);
    }

    #[test]
    fn prop_history_keeps_most_recent(
        history_size in 0usize..50,
        publishes in 0usize..150,
    ) {
        let rt = runtime();
        let _guard = rt.enter();
        let channel = Channel::new(ChannelConfig {
            ping_interval_ms: 0,
            history_size,
            rewind: usize::MAX,
            ..ChannelConfig::default()
        })
        .unwrap();

        for i in 0..publishes {
            channel.publish(format!("m{}", i), None).unwrap();
            prop_assert!(channel.history_len() <= history_size);
        }

        let mut sub = channel.subscribe(SubscribeRequest::new("10.0.0.1")).unwrap();
        let retained = publishes.min(history_size) as u64;
        let expected: Vec<u64> = (publishes as u64 - retained + 1..=publishes as u64).collect();
        prop_assert_eq!(wire_ids(&drain_ready(&mut sub.stream)), expected);
    }

    #[test]
    fn prop_resume_replays_exact_window(
        history_size in 1usize..40,
        publishes in 0u64..80,
        last_id in -5i64..100,
    ) {
        let rt = runtime();
        let _guard = rt.enter();
        let channel = Channel::new(ChannelConfig {
            ping_interval_ms: 0,
            history_size,
            ..ChannelConfig::default()
        })
        .unwrap();

        for i in 0..publishes {
            channel.publish(format!("m{}", i), None).unwrap();
        }

        let mut sub = channel
            .subscribe(SubscribeRequest::new("10.0.0.1").with_last_event_id(last_id.to_string()))
            .unwrap();
        let replayed = wire_ids(&drain_ready(&mut sub.stream));

        // Ids in (last_id, publishes], clipped to what history still holds.
        let oldest_retained = publishes.saturating_sub(history_size as u64) + 1;
        let expected: Vec<u64> = (1..=publishes)
            .filter(|id| (*id as i64) > last_id && *id >= oldest_retained)
            .collect();
        prop_assert_eq!(replayed, expected);
    }

    #[test]
    fn prop_rewind_replays_tail(
        rewind in 0usize..30,
        publishes in 0usize..60,
    ) {
        let rt = runtime();
        let _guard = rt.enter();
        let channel = Channel::new(ChannelConfig {
            ping_interval_ms: 0,
            rewind,
            ..ChannelConfig::default()
        })
        .unwrap();

        for i in 0..publishes {
            channel.publish(format!("m{}", i), None).unwrap();
        }

        let mut sub = channel.subscribe(SubscribeRequest::new("10.0.0.1")).unwrap();
        prop_assert_eq!(
            wire_ids(&drain_ready(&mut sub.stream)).len(),
            rewind.min(publishes)
        );
    }
}
