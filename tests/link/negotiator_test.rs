// Negotiator Tests
// Role decision, the epoch read and the unresolved inbound repair

use duosync::link::{
    decide_role, Epoch, InboundLink, LinkContext, LinkError, NodeIdentity, Role, RoleNegotiator,
    Session,
};
use duosync::sync::ProtocolError;
use duosync::transport::{
    AttrId, AttributeValue, BleService, LinkHandle, PeerRef, SimNetwork, SimTransport, Transport,
    TransportError,
};
use tokio::time::{advance, Duration, Instant};

const LOW: &str = "AA:00:00:00:00:01";
const HIGH: &str = "AA:00:00:00:00:02";

// ============================================================================
// DECISION RULE
// ============================================================================

#[test]
fn test_larger_epoch_is_master_from_either_side() {
    let pairs = [(0u32, 1u32), (1, 0), (100, 99_999), (u32::MAX, 0), (5_000, 5_001)];

    for (e1, e2) in pairs {
        let r1 = decide_role(Epoch::from_millis(e1), Epoch::from_millis(e2), LOW, HIGH);
        let r2 = decide_role(Epoch::from_millis(e2), Epoch::from_millis(e1), HIGH, LOW);

        let expected = if e1 > e2 { Role::Master } else { Role::Client };
        assert_eq!(r1, expected, "epochs {} vs {}", e1, e2);
        assert_ne!(r1, r2, "both sides chose {} for {} vs {}", r1, e1, e2);
    }
}

#[test]
fn test_tie_smaller_identity_is_master() {
    for e in [0u32, 1, 3_000, u32::MAX] {
        let epoch = Epoch::from_millis(e);
        assert_eq!(decide_role(epoch, epoch, LOW, HIGH), Role::Master);
        assert_eq!(decide_role(epoch, epoch, HIGH, LOW), Role::Client);
    }
}

#[test]
fn test_roles_are_exclusive() {
    let ids = [LOW, HIGH];
    for e1 in [0u32, 10, 20] {
        for e2 in [0u32, 10, 20] {
            let a = decide_role(Epoch::from_millis(e1), Epoch::from_millis(e2), ids[0], ids[1]);
            let b = decide_role(Epoch::from_millis(e2), Epoch::from_millis(e1), ids[1], ids[0]);
            assert!(a.is_assigned() && b.is_assigned());
            assert_ne!(a, b);
        }
    }
}

// ============================================================================
// EPOCH ATTRIBUTE
// ============================================================================

#[test]
fn test_epoch_wire_format() {
    assert_eq!(Epoch::from_millis(1_000).to_bytes(), 1_000u32.to_le_bytes());
    assert_eq!(Epoch::from_bytes(&[0xE8, 0x03, 0, 0]).unwrap(), Epoch::from_millis(1_000));

    let err = Epoch::from_bytes(&[1, 2]).unwrap_err();
    assert_eq!(
        err,
        ProtocolError::UnexpectedLength {
            payload: "epoch",
            expected: 4,
            actual: 2
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_epoch_since_start() {
    let started = Instant::now();
    advance(Duration::from_millis(4_321)).await;

    assert_eq!(Epoch::since(started, Instant::now()).millis(), 4_321);
}

// ============================================================================
// NEGOTIATION OVER A LINK
// ============================================================================

async fn linked_pair(remote_started_at: Instant) -> (SimNetwork, SimTransport, Session) {
    let network = SimNetwork::new();
    let mut local = network.attach(LOW).await;
    local.register_service(BleService::counter_service()).await.unwrap();
    local.advertise().await.unwrap();

    let mut remote = network.attach(HIGH).await;
    remote.register_service(BleService::counter_service()).await.unwrap();
    remote
        .set_attribute(AttrId::Epoch, AttributeValue::UptimeMillis(remote_started_at))
        .await
        .unwrap();
    remote.advertise().await.unwrap();

    let link = local.connect(&PeerRef::ble(HIGH)).await.unwrap();
    let session = Session::new(link, PeerRef::ble(HIGH), Instant::now());
    (network, local, session)
}

fn negotiator() -> RoleNegotiator {
    RoleNegotiator::new(Duration::from_secs(5))
}

#[tokio::test(start_paused = true)]
async fn test_negotiate_older_local_is_master() {
    let local_started = Instant::now();
    advance(Duration::from_secs(2)).await;
    let (_network, mut local, session) = linked_pair(Instant::now()).await;
    advance(Duration::from_millis(300)).await;

    let identity = NodeIdentity::from_address(&PeerRef::ble(LOW));
    let role = negotiator()
        .negotiate(&mut local, &session, &identity, local_started)
        .await
        .unwrap();

    assert_eq!(role, Role::Master);
}

#[tokio::test(start_paused = true)]
async fn test_negotiate_younger_local_is_client() {
    let remote_started = Instant::now();
    advance(Duration::from_secs(2)).await;
    let local_started = Instant::now();
    let (_network, mut local, session) = linked_pair(remote_started).await;

    let identity = NodeIdentity::from_address(&PeerRef::ble(LOW));
    let role = negotiator()
        .negotiate(&mut local, &session, &identity, local_started)
        .await
        .unwrap();

    assert_eq!(role, Role::Client);
}

#[tokio::test(start_paused = true)]
async fn test_negotiate_simultaneous_start_uses_identity() {
    let started = Instant::now();
    let (_network, mut local, session) = linked_pair(started).await;
    advance(Duration::from_millis(700)).await;

    let identity = NodeIdentity::from_address(&PeerRef::ble(LOW));
    let role = negotiator()
        .negotiate(&mut local, &session, &identity, started)
        .await
        .unwrap();

    assert_eq!(role, Role::Master);
}

#[tokio::test(start_paused = true)]
async fn test_negotiate_fails_without_service() {
    let (network, mut local, session) = linked_pair(Instant::now()).await;
    network.set_service(&PeerRef::ble(HIGH), None).await;

    let identity = NodeIdentity::from_address(&PeerRef::ble(LOW));
    let err = negotiator()
        .negotiate(&mut local, &session, &identity, Instant::now())
        .await
        .unwrap_err();

    assert_eq!(err, LinkError::Transport(TransportError::ServiceNotFound));
}

#[tokio::test(start_paused = true)]
async fn test_negotiate_fails_on_malformed_epoch() {
    let network = SimNetwork::new();
    let mut local = network.attach(LOW).await;
    let mut remote = network.attach(HIGH).await;
    remote.register_service(BleService::counter_service()).await.unwrap();
    remote
        .set_attribute(AttrId::Epoch, AttributeValue::Bytes(vec![1, 2, 3]))
        .await
        .unwrap();
    remote.advertise().await.unwrap();
    let link = local.connect(&PeerRef::ble(HIGH)).await.unwrap();
    let session = Session::new(link, PeerRef::ble(HIGH), Instant::now());

    let identity = NodeIdentity::from_address(&PeerRef::ble(LOW));
    let err = negotiator()
        .negotiate(&mut local, &session, &identity, Instant::now())
        .await
        .unwrap_err();

    assert!(matches!(err, LinkError::Protocol(_)));
}

// ============================================================================
// UNRESOLVED INBOUND LINK
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_inbound_overdue_after_window() {
    let identity = NodeIdentity::from_address(&PeerRef::ble(LOW));
    let mut ctx = LinkContext::new(identity, Instant::now());
    let link = LinkHandle::generate();
    ctx.set_inbound(InboundLink::new(link, PeerRef::ble(HIGH), Instant::now()));

    advance(Duration::from_millis(4_999)).await;
    assert_eq!(negotiator().inbound_overdue(&ctx, Instant::now()), None);

    advance(Duration::from_millis(1)).await;
    assert_eq!(negotiator().inbound_overdue(&ctx, Instant::now()), Some(link));

    ctx.restart_inbound_window(Instant::now());
    assert_eq!(negotiator().inbound_overdue(&ctx, Instant::now()), None);
}

#[tokio::test(start_paused = true)]
async fn test_inbound_with_role_is_never_overdue() {
    let identity = NodeIdentity::from_address(&PeerRef::ble(LOW));
    let mut ctx = LinkContext::new(identity, Instant::now());
    ctx.set_inbound(InboundLink::new(LinkHandle::generate(), PeerRef::ble(HIGH), Instant::now()));
    ctx.open_session(Session::new(LinkHandle::generate(), PeerRef::ble(HIGH), Instant::now()));
    ctx.assign_role(Role::Master).unwrap();

    advance(Duration::from_secs(60)).await;
    assert_eq!(negotiator().inbound_overdue(&ctx, Instant::now()), None);
}
