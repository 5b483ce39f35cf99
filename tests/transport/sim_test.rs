// Simulated Radio Tests
// The in-memory transport behaves like the adapter contract says

use duosync::transport::{
    AttrId, AttributeValue, BleService, ConnectBehavior, PeerRef, SimNetwork, SimTransport,
    Transport, TransportError, TransportEvent,
};
use tokio::time::{Duration, Instant};

const A: &str = "AA:00:00:00:00:01";
const B: &str = "AA:00:00:00:00:02";

async fn advertised(network: &SimNetwork, mac: &str) -> SimTransport {
    let mut radio = network.attach(mac).await;
    radio.register_service(BleService::counter_service()).await.unwrap();
    radio.advertise().await.unwrap();
    radio
}

// ============================================================================
// ADVERTISING AND SCANNING
// ============================================================================

#[tokio::test]
async fn test_advertise_requires_service() {
    let network = SimNetwork::new();
    let mut radio = network.attach(A).await;

    let err = radio.advertise().await.unwrap_err();
    assert!(matches!(err, TransportError::InvalidOperation(_)));
    assert!(!radio.is_advertising());
}

#[tokio::test]
async fn test_scan_finds_advertising_peers_only() {
    let network = SimNetwork::new();
    let mut a = advertised(&network, A).await;
    let mut b = advertised(&network, B).await;
    let _quiet = network.attach("AA:00:00:00:00:03").await;

    let found = a.scan(Duration::from_secs(3)).await.unwrap();
    assert_eq!(found, vec![PeerRef::ble(B)]);

    b.stop_advertise().await.unwrap();
    assert!(!network.is_advertising(&PeerRef::ble(B)).await);
    assert!(a.scan(Duration::from_secs(3)).await.unwrap().is_empty());
}

// ============================================================================
// CONNECTIONS
// ============================================================================

#[tokio::test]
async fn test_connect_opens_inbound_link_on_target() {
    let network = SimNetwork::new();
    let mut a = advertised(&network, A).await;
    let mut b = advertised(&network, B).await;

    let link = a.connect(&PeerRef::ble(B)).await.unwrap();

    assert!(network.has_link(&PeerRef::ble(A), &PeerRef::ble(B)).await);
    assert!(matches!(
        a.poll_events().await.as_slice(),
        [TransportEvent::OutboundLinkOpened { link: l }] if *l == link
    ));
    let events = b.poll_events().await;
    assert!(matches!(
        events.as_slice(),
        [TransportEvent::InboundLinkOpened { link: l, peer }] if *l == link && *peer == PeerRef::ble(A)
    ));
}

#[tokio::test]
async fn test_connect_to_silent_peer_fails() {
    let network = SimNetwork::new();
    let mut a = advertised(&network, A).await;
    let _b = network.attach(B).await;

    let err = a.connect(&PeerRef::ble(B)).await.unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(network.link_count().await, 0);
}

#[tokio::test]
async fn test_refusing_peer() {
    let network = SimNetwork::new();
    let mut a = advertised(&network, A).await;
    let _b = advertised(&network, B).await;
    network.set_connect_behavior(&PeerRef::ble(B), ConnectBehavior::Refuse).await;

    let link = a.connect(&PeerRef::ble(B)).await.unwrap();

    let events = a.poll_events().await;
    assert!(matches!(
        events.as_slice(),
        [TransportEvent::ConnectFailed { link: l, error }]
            if *l == link && *error == TransportError::ConnectionRefused(PeerRef::ble(B))
    ));
    assert_eq!(network.link_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_peer_returns_at_once_and_stays_pending() {
    let network = SimNetwork::new();
    let mut a = advertised(&network, A).await;
    let _b = advertised(&network, B).await;
    network.set_connect_behavior(&PeerRef::ble(B), ConnectBehavior::Hang).await;

    let started = Instant::now();
    let link = a.connect(&PeerRef::ble(B)).await.unwrap();
    assert_eq!(Instant::now(), started);

    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(a.poll_events().await.is_empty());
    assert_eq!(network.pending_connects().await, 1);

    a.disconnect(&link).await.unwrap();
    assert_eq!(network.pending_connects().await, 0);
    assert_eq!(network.link_count().await, 0);
    assert!(a.poll_events().await.is_empty());
}

#[tokio::test]
async fn test_range_loss_fails_pending_connect() {
    let network = SimNetwork::new();
    let mut a = advertised(&network, A).await;
    let _b = advertised(&network, B).await;
    network.set_connect_behavior(&PeerRef::ble(B), ConnectBehavior::Hang).await;
    let link = a.connect(&PeerRef::ble(B)).await.unwrap();

    assert_eq!(network.drop_links(&PeerRef::ble(B)).await, 0);

    assert_eq!(network.pending_connects().await, 0);
    assert!(matches!(
        a.poll_events().await.as_slice(),
        [TransportEvent::ConnectFailed { link: l, error }] if *l == link && error.is_connection_error()
    ));
}

#[tokio::test]
async fn test_disconnect_notifies_other_side() {
    let network = SimNetwork::new();
    let mut a = advertised(&network, A).await;
    let mut b = advertised(&network, B).await;
    let link = a.connect(&PeerRef::ble(B)).await.unwrap();
    a.poll_events().await;
    b.poll_events().await;

    b.disconnect(&link).await.unwrap();

    let events = a.poll_events().await;
    assert!(matches!(
        events.as_slice(),
        [TransportEvent::OutboundLinkClosed { link: l, .. }] if *l == link
    ));
    assert_eq!(a.disconnect(&link).await, Err(TransportError::NotConnected));
}

#[tokio::test]
async fn test_drop_links_closes_both_directions() {
    let network = SimNetwork::new();
    let mut a = advertised(&network, A).await;
    let mut b = advertised(&network, B).await;
    a.connect(&PeerRef::ble(B)).await.unwrap();
    b.connect(&PeerRef::ble(A)).await.unwrap();
    a.poll_events().await;
    b.poll_events().await;

    assert_eq!(network.drop_links(&PeerRef::ble(A)).await, 2);
    assert_eq!(network.link_count().await, 0);

    for radio in [&mut a, &mut b] {
        let events = radio.poll_events().await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| matches!(e, TransportEvent::OutboundLinkClosed { .. })));
        assert!(events.iter().any(|e| matches!(e, TransportEvent::InboundLinkClosed { .. })));
    }
}

// ============================================================================
// ATTRIBUTES
// ============================================================================

#[tokio::test]
async fn test_discover_service_reports_missing_layout() {
    let network = SimNetwork::new();
    let mut a = advertised(&network, A).await;
    let _b = advertised(&network, B).await;
    let link = a.connect(&PeerRef::ble(B)).await.unwrap();

    a.discover_service(&link).await.unwrap();

    network
        .set_service(&PeerRef::ble(B), Some(BleService::new(duosync::transport::SERVICE_UUID)))
        .await;
    assert_eq!(
        a.discover_service(&link).await,
        Err(TransportError::AttributeNotFound(AttrId::Counter))
    );

    network.set_service(&PeerRef::ble(B), None).await;
    assert_eq!(a.discover_service(&link).await, Err(TransportError::ServiceNotFound));
}

#[tokio::test(start_paused = true)]
async fn test_read_serves_uptime_at_read_time() {
    let network = SimNetwork::new();
    let mut a = advertised(&network, A).await;
    let mut b = advertised(&network, B).await;
    b.set_attribute(AttrId::Epoch, AttributeValue::UptimeMillis(Instant::now()))
        .await
        .unwrap();
    let link = a.connect(&PeerRef::ble(B)).await.unwrap();

    tokio::time::advance(Duration::from_millis(1500)).await;

    let raw = a.read_attribute(&link, AttrId::Epoch).await.unwrap();
    assert_eq!(raw, 1500u32.to_le_bytes().to_vec());
}

#[tokio::test]
async fn test_write_only_to_writable_attribute() {
    let network = SimNetwork::new();
    let mut a = advertised(&network, A).await;
    let mut b = advertised(&network, B).await;
    let link = a.connect(&PeerRef::ble(B)).await.unwrap();
    b.poll_events().await;

    a.write_attribute(&link, AttrId::Sync, &[1, 2, 3, 4, 5, 6, 7, 8])
        .await
        .unwrap();
    let err = a.write_attribute(&link, AttrId::Epoch, &[0; 4]).await.unwrap_err();
    assert!(matches!(err, TransportError::WriteFailed(_)));

    let events = b.poll_events().await;
    assert!(matches!(
        events.as_slice(),
        [TransportEvent::AttributeWritten { attr: AttrId::Sync, data }] if data.len() == 8
    ));
    assert_eq!(
        network.attribute(&PeerRef::ble(B), AttrId::Sync).await,
        Some(vec![1, 2, 3, 4, 5, 6, 7, 8])
    );
}

#[tokio::test]
async fn test_notify_reaches_inbound_initiator() {
    let network = SimNetwork::new();
    let mut a = advertised(&network, A).await;
    let mut b = advertised(&network, B).await;
    let link = a.connect(&PeerRef::ble(B)).await.unwrap();
    a.poll_events().await;

    b.set_attribute(AttrId::Counter, AttributeValue::Bytes(7u32.to_le_bytes().to_vec()))
        .await
        .unwrap();
    b.notify(AttrId::Counter).await.unwrap();

    let events = a.poll_events().await;
    assert!(matches!(
        events.as_slice(),
        [TransportEvent::Notified { link: l, attr: AttrId::Counter, data }]
            if *l == link && data == &7u32.to_le_bytes().to_vec()
    ));
}

#[tokio::test]
async fn test_notify_without_inbound_is_noop() {
    let network = SimNetwork::new();
    let mut a = advertised(&network, A).await;
    a.set_attribute(AttrId::Counter, AttributeValue::Bytes(vec![0; 4]))
        .await
        .unwrap();

    assert!(a.notify(AttrId::Counter).await.is_ok());
}
