// Link Types - The shared state of one peer relationship
//
// Everything the connection manager, role negotiator and coordinator agree
// on lives in a single `LinkContext` owned by the coordinator.

use crate::sync::ProtocolError;
use crate::transport::{LinkHandle, PeerRef, TransportError};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::time::{Duration, Instant};

/// Link-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Role conflict: already {held}, refusing {requested}")]
    RoleConflict { held: Role, requested: Role },

    #[error("No active session")]
    NoSession,
}

// ============================================================================
// NODE IDENTITY
// ============================================================================

/// Stable identifier of this node, derived from its radio address.
///
/// Only ever used as a tie-breaker, compared lexicographically.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeIdentity(String);

impl NodeIdentity {
    pub fn from_address(address: &PeerRef) -> Self {
        Self(address.identity().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when this identity sorts strictly before the peer's
    pub fn sorts_before(&self, peer: &PeerRef) -> bool {
        self.0.as_str() < peer.identity()
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// EPOCH
// ============================================================================

/// Milliseconds since this node's current run started.
///
/// Larger means "has been running longer". Not wall-clock time and not
/// comparable across restarts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Epoch(u32);

impl Epoch {
    pub const WIRE_LEN: usize = 4;

    pub fn from_millis(millis: u32) -> Self {
        Self(millis)
    }

    /// Uptime at `now` for a run that started at `started_at`
    pub fn since(started_at: Instant, now: Instant) -> Self {
        let millis = now.saturating_duration_since(started_at).as_millis();
        Self(u32::try_from(millis).unwrap_or(u32::MAX))
    }

    pub fn millis(&self) -> u32 {
        self.0
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let raw: [u8; 4] = bytes.try_into().map_err(|_| ProtocolError::UnexpectedLength {
            payload: "epoch",
            expected: Self::WIRE_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(u32::from_le_bytes(raw)))
    }
}

// ============================================================================
// ROLE
// ============================================================================

/// Role held with respect to the active link
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[default]
    Unassigned,
    /// Drives the counter and pushes updates
    Master,
    /// Follows the Master's counter
    Client,
}

impl Role {
    pub fn is_assigned(&self) -> bool {
        !matches!(self, Self::Unassigned)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unassigned => f.write_str("UNASSIGNED"),
            Self::Master => f.write_str("MASTER"),
            Self::Client => f.write_str("CLIENT"),
        }
    }
}

// ============================================================================
// LINK STATE
// ============================================================================

/// Coordinating state of the peer relationship
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    Negotiating,
    Master,
    Client,
}

impl LinkState {
    /// Check if transition to another state is valid
    pub fn can_transition_to(&self, target: &LinkState) -> bool {
        match (self, target) {
            // Link loss, abandon and timeout edges are allowed from anywhere
            (_, Self::Idle) | (_, Self::Scanning) => true,
            (Self::Idle, Self::Connecting) => true,
            (Self::Scanning, Self::Connecting) => true,
            (Self::Connecting, Self::Negotiating) => true,
            (Self::Negotiating, Self::Master) => true,
            (Self::Negotiating, Self::Client) => true,
            _ => false,
        }
    }

    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Master => Self::Master,
            Role::Client => Self::Client,
            Role::Unassigned => Self::Scanning,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// SESSION / INBOUND LINK / CONNECTION ATTEMPT
// ============================================================================

/// An outbound link we initiated. Created on successful connect and
/// invalidated as a unit on disconnect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    link: LinkHandle,
    peer: PeerRef,
    opened_at: Instant,
}

impl Session {
    pub fn new(link: LinkHandle, peer: PeerRef, opened_at: Instant) -> Self {
        Self { link, peer, opened_at }
    }

    pub fn link(&self) -> &LinkHandle {
        &self.link
    }

    pub fn peer(&self) -> &PeerRef {
        &self.peer
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }
}

/// A peer attached to our advertised service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundLink {
    link: LinkHandle,
    peer: PeerRef,
    opened_at: Instant,
}

impl InboundLink {
    pub fn new(link: LinkHandle, peer: PeerRef, opened_at: Instant) -> Self {
        Self { link, peer, opened_at }
    }

    pub fn link(&self) -> &LinkHandle {
        &self.link
    }

    pub fn peer(&self) -> &PeerRef {
        &self.peer
    }

    /// Start of the current negotiation window for this link
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }
}

/// A connect in flight (or waiting out its collision delay)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionAttempt {
    target: PeerRef,
    started_at: Instant,
    not_before: Instant,
    deadline: Instant,
    /// Handle of the issued `connect()` request, once there is one
    link: Option<LinkHandle>,
}

impl ConnectionAttempt {
    pub fn new(target: PeerRef, started_at: Instant, delay: Duration, timeout: Duration) -> Self {
        Self {
            target,
            started_at,
            not_before: started_at + delay,
            deadline: started_at + timeout,
            link: None,
        }
    }

    pub fn target(&self) -> &PeerRef {
        &self.target
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn link(&self) -> Option<LinkHandle> {
        self.link
    }

    /// `connect()` was issued and is awaiting its outcome
    pub fn is_requested(&self) -> bool {
        self.link.is_some()
    }

    /// How long this attempt has been running
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    /// The collision delay has passed and `connect()` may be issued
    pub fn is_ready(&self, now: Instant) -> bool {
        now >= self.not_before
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }
}

// ============================================================================
// LINK CONTEXT
// ============================================================================

/// The single owner of role, link handles and scheduling flags
#[derive(Clone, Debug)]
pub struct LinkContext {
    identity: NodeIdentity,
    started_at: Instant,
    state: LinkState,
    role: Role,
    session: Option<Session>,
    inbound: Option<InboundLink>,
    attempt: Option<ConnectionAttempt>,
    scan_requested: bool,
    scan_after: Option<Instant>,
    last_scan_at: Instant,
}

impl LinkContext {
    pub fn new(identity: NodeIdentity, started_at: Instant) -> Self {
        Self {
            identity,
            started_at,
            state: LinkState::Idle,
            role: Role::Unassigned,
            session: None,
            inbound: None,
            attempt: None,
            scan_requested: false,
            scan_after: None,
            last_scan_at: started_at,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Our epoch at `now`
    pub fn epoch_at(&self, now: Instant) -> Epoch {
        Epoch::since(self.started_at, now)
    }

    // ------------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------------

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Move to `target` if the edge exists; returns whether it moved
    pub fn set_state(&mut self, target: LinkState) -> bool {
        if self.state == target {
            return true;
        }
        if !self.state.can_transition_to(&target) {
            tracing::warn!(from = %self.state, to = %target, "Rejected link state transition");
            return false;
        }
        tracing::trace!(from = %self.state, to = %target, "Link state");
        self.state = target;
        true
    }

    // ------------------------------------------------------------------------
    // Role
    // ------------------------------------------------------------------------

    pub fn role(&self) -> Role {
        self.role
    }

    /// Record the negotiated role. A node holds at most one assigned role.
    pub fn assign_role(&mut self, role: Role) -> Result<(), LinkError> {
        if self.role.is_assigned() || !role.is_assigned() {
            return Err(LinkError::RoleConflict {
                held: self.role,
                requested: role,
            });
        }
        if self.session.is_none() {
            return Err(LinkError::NoSession);
        }
        self.role = role;
        Ok(())
    }

    /// Drop back to Unassigned, returning the role that was held
    pub fn clear_role(&mut self) -> Role {
        std::mem::take(&mut self.role)
    }

    /// Outbound link up and a role negotiated over it
    pub fn is_fully_linked(&self) -> bool {
        self.session.is_some() && self.role.is_assigned()
    }

    // ------------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------------

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn open_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    pub fn take_session(&mut self) -> Option<Session> {
        self.session.take()
    }

    pub fn inbound(&self) -> Option<&InboundLink> {
        self.inbound.as_ref()
    }

    pub fn set_inbound(&mut self, inbound: InboundLink) -> Option<InboundLink> {
        self.inbound.replace(inbound)
    }

    pub fn take_inbound(&mut self) -> Option<InboundLink> {
        self.inbound.take()
    }

    /// Give the inbound link a fresh negotiation window starting at `now`
    pub fn restart_inbound_window(&mut self, now: Instant) {
        if let Some(inbound) = self.inbound.as_mut() {
            inbound.opened_at = now;
        }
    }

    // ------------------------------------------------------------------------
    // Connection attempt
    // ------------------------------------------------------------------------

    pub fn attempt(&self) -> Option<&ConnectionAttempt> {
        self.attempt.as_ref()
    }

    /// Install a new attempt. At most one may be outstanding.
    pub fn begin_attempt(&mut self, attempt: ConnectionAttempt) -> bool {
        if self.attempt.is_some() {
            return false;
        }
        self.attempt = Some(attempt);
        true
    }

    pub fn take_attempt(&mut self) -> Option<ConnectionAttempt> {
        self.attempt.take()
    }

    /// Bind the outstanding attempt to the handle its `connect()` returned
    pub fn note_connect_requested(&mut self, link: LinkHandle) -> bool {
        match self.attempt.as_mut() {
            Some(attempt) if attempt.link.is_none() => {
                attempt.link = Some(link);
                true
            }
            _ => false,
        }
    }

    // ------------------------------------------------------------------------
    // Scan scheduling
    // ------------------------------------------------------------------------

    pub fn scan_requested(&self) -> bool {
        self.scan_requested
    }

    pub fn request_scan(&mut self) {
        self.scan_requested = true;
    }

    pub fn scan_after(&self) -> Option<Instant> {
        self.scan_after
    }

    /// Hold off scanning until `at`
    pub fn schedule_scan_at(&mut self, at: Instant) {
        self.scan_requested = false;
        self.scan_after = Some(at);
    }

    pub fn clear_scan_after(&mut self) {
        self.scan_after = None;
    }

    pub fn last_scan_at(&self) -> Instant {
        self.last_scan_at
    }

    pub fn mark_scanned(&mut self, now: Instant) {
        self.scan_requested = false;
        self.last_scan_at = now;
    }
}
