// Counter Tests
// Local cadence, packet building and adoption of remote values

use duosync::sync::{encode_counter, CounterSynchronizer, SyncPacket, SyncProtocol};
use tokio::time::{advance, Duration, Instant};

const INTERVAL_MS: u64 = 3_000;

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn synchronizer(protocol: SyncProtocol) -> CounterSynchronizer {
    CounterSynchronizer::new(Instant::now(), ms(INTERVAL_MS), ms(10_000), protocol)
}

// ============================================================================
// LOCAL INCREMENT
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_standalone_counter_increments_once_per_interval() {
    let mut counter = synchronizer(SyncProtocol::Timed);

    for expected in 1..=20u32 {
        advance(ms(INTERVAL_MS - 1)).await;
        assert_eq!(counter.tick(Instant::now()), None);

        advance(ms(1)).await;
        assert_eq!(counter.tick(Instant::now()), Some(expected));
        assert_eq!(counter.tick(Instant::now()), None);
    }
    assert_eq!(counter.stats().increments, 20);
}

#[tokio::test(start_paused = true)]
async fn test_late_tick_rephases_from_tick_time() {
    let mut counter = synchronizer(SyncProtocol::Timed);

    advance(ms(INTERVAL_MS + 400)).await;
    let at = Instant::now();
    assert_eq!(counter.tick(at), Some(1));

    assert_eq!(counter.state().last_update_at(), at);
    assert_eq!(counter.next_increment_at(), at + ms(INTERVAL_MS));
}

// ============================================================================
// SYNC CADENCE AND PACKETS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_sync_due_once_per_interval() {
    let mut counter = synchronizer(SyncProtocol::Timed);

    advance(ms(9_999)).await;
    assert!(!counter.sync_due(Instant::now()));

    advance(ms(1)).await;
    assert!(counter.sync_due(Instant::now()));
    assert!(!counter.sync_due(Instant::now()));
}

#[tokio::test(start_paused = true)]
async fn test_packet_carries_time_since_increment() {
    let mut counter = synchronizer(SyncProtocol::Timed);
    advance(ms(INTERVAL_MS)).await;
    counter.tick(Instant::now());

    advance(ms(400)).await;
    let packet = counter.build_packet(Instant::now());

    assert_eq!(packet.counter(), 1);
    assert_eq!(packet.elapsed_since_update(), 400);
}

// ============================================================================
// ADOPTION
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_overdue_master_phase_makes_client_due_now() {
    let mut client = synchronizer(SyncProtocol::Timed);
    advance(ms(20_000)).await;
    let received = Instant::now();

    // Master is 500 ms past its own increment time
    client.apply_packet(SyncPacket::new(7, 3_500), received);
    assert_eq!(client.next_increment_at(), received);

    assert_eq!(client.tick(received), Some(8));
    advance(ms(INTERVAL_MS - 1)).await;
    assert_eq!(client.tick(Instant::now()), None);
    advance(ms(1)).await;
    assert_eq!(client.tick(Instant::now()), Some(9));
}

#[tokio::test(start_paused = true)]
async fn test_adopted_packet_rephases_next_increment() {
    let mut counter = synchronizer(SyncProtocol::Timed);
    advance(ms(1_234)).await;
    let t = Instant::now();

    counter.apply_packet(SyncPacket::new(42, 250), t);

    assert_eq!(counter.value(), 42);
    assert_eq!(counter.next_increment_at(), t + ms(INTERVAL_MS - 250));

    advance(ms(INTERVAL_MS - 250 - 1)).await;
    assert_eq!(counter.tick(Instant::now()), None);
    advance(ms(1)).await;
    assert_eq!(counter.tick(Instant::now()), Some(43));
}

#[tokio::test(start_paused = true)]
async fn test_pushed_lower_value_is_adopted() {
    let mut counter = synchronizer(SyncProtocol::Timed);
    counter.apply_packet(SyncPacket::new(500, 0), Instant::now());

    let payload = SyncPacket::new(3, 10).to_bytes();
    let value = counter.apply_push(&payload, Instant::now()).unwrap();

    assert_eq!(value, 3);
    assert_eq!(counter.value(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_polled_counter_adoption_by_variant() {
    let mut timed = synchronizer(SyncProtocol::Timed);
    timed.apply_packet(SyncPacket::new(50, 0), Instant::now());
    assert!(timed.apply_remote_counter(&encode_counter(20)).unwrap());
    assert_eq!(timed.value(), 20);
    assert!(!timed.apply_remote_counter(&encode_counter(20)).unwrap());

    let mut legacy = synchronizer(SyncProtocol::Legacy);
    assert!(legacy.apply_remote_counter(&encode_counter(50)).unwrap());
    assert!(!legacy.apply_remote_counter(&encode_counter(20)).unwrap());
    assert_eq!(legacy.value(), 50);
}

#[tokio::test(start_paused = true)]
async fn test_wrong_length_push_leaves_state_intact() {
    let mut counter = synchronizer(SyncProtocol::Timed);
    counter.apply_packet(SyncPacket::new(12, 100), Instant::now());
    let before = *counter.state();

    assert!(counter.apply_push(&encode_counter(99), Instant::now()).is_err());
    assert!(counter.apply_remote_counter(&[1, 2]).is_err());

    assert_eq!(*counter.state(), before);
    assert_eq!(counter.stats().payloads_rejected, 2);
}

#[tokio::test(start_paused = true)]
async fn test_legacy_encodes_counter_only() {
    let mut counter = synchronizer(SyncProtocol::Legacy);
    advance(ms(INTERVAL_MS)).await;
    counter.tick(Instant::now());

    assert_eq!(counter.encode_push(Instant::now()), encode_counter(1).to_vec());
    assert_eq!(counter.stats().packets_built, 1);
}

#[tokio::test(start_paused = true)]
async fn test_notification_restarts_interval() {
    let mut counter = synchronizer(SyncProtocol::Timed);
    advance(ms(INTERVAL_MS - 100)).await;
    let t = Instant::now();

    assert!(counter.apply_notification(&encode_counter(8), t).unwrap());

    assert_eq!(counter.value(), 8);
    assert_eq!(counter.next_increment_at(), t + ms(INTERVAL_MS));
    advance(ms(100)).await;
    assert_eq!(counter.tick(Instant::now()), None);
}
