// Transport Traits and Core Types
// Defines the radio adapter contract the link core consumes, plus the handles,
// events and errors that cross that boundary

use crate::transport::gatt::{AttrId, BleService};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;
use tokio::time::{Duration, Instant};

// ============================================================================
// PEER REFERENCE
// ============================================================================

/// A discovered (or connected) peer, identified by its radio hardware address.
///
/// The core never looks inside a `PeerRef` except to compare its identity
/// string against the local node identity for tie-breaking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRef {
    mac_address: String,
}

impl PeerRef {
    /// Create a BLE peer reference (address is normalized to upper case)
    pub fn ble(mac_address: &str) -> Self {
        Self {
            mac_address: mac_address.to_uppercase(),
        }
    }

    /// The identity string used for lexicographic tie-breaking
    pub fn identity(&self) -> &str {
        &self.mac_address
    }
}

impl fmt::Display for PeerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ble://{}", self.mac_address)
    }
}

impl PartialEq for PeerRef {
    fn eq(&self, other: &Self) -> bool {
        self.mac_address.eq_ignore_ascii_case(&other.mac_address)
    }
}

impl Eq for PeerRef {}

impl Hash for PeerRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.mac_address.to_uppercase().hash(state);
    }
}

// ============================================================================
// LINK HANDLE
// ============================================================================

/// Opaque handle to one physical connection, owned by the transport
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LinkHandle([u8; 16]);

impl LinkHandle {
    /// Generate a new unique link handle
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; 16];
        rng.fill(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Display for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..6]))
    }
}

impl PartialEq for LinkHandle {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for LinkHandle {}

impl Hash for LinkHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

// ============================================================================
// ATTRIBUTE VALUES
// ============================================================================

/// Value a node serves from one of its own attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// Fixed bytes, returned as-is on every read
    Bytes(Vec<u8>),
    /// Milliseconds elapsed since `since`, computed when the attribute is read
    /// and encoded as a little-endian u32
    UptimeMillis(Instant),
}

impl AttributeValue {
    /// Materialize the bytes a reader sees at `now`
    pub fn read_at(&self, now: Instant) -> Vec<u8> {
        match self {
            Self::Bytes(bytes) => bytes.clone(),
            Self::UptimeMillis(since) => {
                let millis = now.saturating_duration_since(*since).as_millis();
                u32::try_from(millis).unwrap_or(u32::MAX).to_le_bytes().to_vec()
            }
        }
    }
}

// ============================================================================
// TRANSPORT EVENTS
// ============================================================================

/// Events emitted by the transport, queued and drained once per tick
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A peer connected to our advertised service
    InboundLinkOpened { link: LinkHandle, peer: PeerRef },

    /// The peer attached to our service went away
    InboundLinkClosed { link: LinkHandle },

    /// A connection we requested came up
    OutboundLinkOpened { link: LinkHandle },

    /// A connection we requested was refused or failed before coming up
    ConnectFailed { link: LinkHandle, error: TransportError },

    /// A link we initiated was closed by the peer or lost
    OutboundLinkClosed { link: LinkHandle, reason: String },

    /// Asynchronous discovery result
    PeerDiscovered { peer: PeerRef },

    /// The inbound peer wrote one of our attributes
    AttributeWritten { attr: AttrId, data: Vec<u8> },

    /// The peer we connected to notified a change of one of its attributes
    Notified {
        link: LinkHandle,
        attr: AttrId,
        data: Vec<u8>,
    },
}

// ============================================================================
// TRANSPORT ERRORS
// ============================================================================

/// Errors that can occur in the transport layer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection refused by {0}")]
    ConnectionRefused(PeerRef),

    #[error("Connection timeout")]
    Timeout,

    #[error("Service not found on peer")]
    ServiceNotFound,

    #[error("Attribute not found: {0:?}")]
    AttributeNotFound(AttrId),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl TransportError {
    /// Check if this is a connection-setup error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::ConnectionRefused(_) | Self::Timeout | Self::NotConnected
        )
    }

    /// Check if the peer lacks the counter service layout
    pub fn is_discovery_error(&self) -> bool {
        matches!(self, Self::ServiceNotFound | Self::AttributeNotFound(_))
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

// ============================================================================
// TRANSPORT TRAIT
// ============================================================================

/// Radio adapter contract consumed by the link core.
///
/// No call may hold up the caller's tick: `scan` runs for at most `duration`,
/// and `connect` only issues the request. Its outcome arrives later through
/// `poll_events`; the caller owns the deadline.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Our own radio address
    fn local_address(&self) -> PeerRef;

    /// Whether the local advertiser is currently on
    fn is_advertising(&self) -> bool;

    /// Install the GATT service we expose to connecting peers
    async fn register_service(&mut self, service: BleService) -> Result<(), TransportError>;

    /// Start advertising our service
    async fn advertise(&mut self) -> Result<(), TransportError>;

    /// Stop advertising
    async fn stop_advertise(&mut self) -> Result<(), TransportError>;

    /// Scan for peers advertising the service, for at most `duration`
    async fn scan(&mut self, duration: Duration) -> Result<Vec<PeerRef>, TransportError>;

    /// Abort any background scan
    async fn stop_scan(&mut self) -> Result<(), TransportError>;

    /// Request an outbound link to a peer and return its handle at once.
    /// Completion is reported as `OutboundLinkOpened` or `ConnectFailed`
    /// for that handle. Disconnecting a pending handle cancels the request.
    async fn connect(&mut self, peer: &PeerRef) -> Result<LinkHandle, TransportError>;

    /// Resolve the counter service and its attributes on an outbound link
    async fn discover_service(&mut self, link: &LinkHandle) -> Result<(), TransportError>;

    /// Close a link, inbound or outbound
    async fn disconnect(&mut self, link: &LinkHandle) -> Result<(), TransportError>;

    /// Read a remote attribute over an outbound link
    async fn read_attribute(&mut self, link: &LinkHandle, attr: AttrId) -> Result<Vec<u8>, TransportError>;

    /// Write a remote attribute over an outbound link
    async fn write_attribute(
        &mut self,
        link: &LinkHandle,
        attr: AttrId,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// Set the value of one of our own attributes
    async fn set_attribute(&mut self, attr: AttrId, value: AttributeValue) -> Result<(), TransportError>;

    /// Notify the inbound peer (if any) of our attribute's current value
    async fn notify(&mut self, attr: AttrId) -> Result<(), TransportError>;

    /// Drain queued events (non-blocking)
    async fn poll_events(&mut self) -> Vec<TransportEvent>;
}
