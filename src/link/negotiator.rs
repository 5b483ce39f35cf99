// Role Negotiator - Who leads, who follows
//
// Runs on the initiating side of an outbound link: read the peer's epoch,
// compare with our own, and derive the role. The passive side never decides;
// it only tears down inbound links that stay unresolved for too long.

use crate::link::types::{Epoch, LinkContext, LinkError, NodeIdentity, Role, Session};
use crate::transport::{AttrId, LinkHandle, Transport};
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Decide the local role from both epochs.
///
/// Longer-running node leads; equal epochs fall back to identity order,
/// lexicographically smaller leads. Evaluated on the remote side with the
/// arguments swapped, this always yields the opposite role.
pub fn decide_role(local_epoch: Epoch, remote_epoch: Epoch, local_id: &str, remote_id: &str) -> Role {
    if local_epoch > remote_epoch {
        Role::Master
    } else if local_epoch < remote_epoch {
        Role::Client
    } else if local_id < remote_id {
        Role::Master
    } else {
        Role::Client
    }
}

pub struct RoleNegotiator {
    negotiation_window: Duration,
}

impl RoleNegotiator {
    pub fn new(negotiation_window: Duration) -> Self {
        Self { negotiation_window }
    }

    pub fn negotiation_window(&self) -> Duration {
        self.negotiation_window
    }

    /// Discover the counter service over `session` and derive our role from
    /// the peer's epoch. Any error means the link cannot be negotiated.
    pub async fn negotiate<T: Transport>(
        &self,
        transport: &mut T,
        session: &Session,
        identity: &NodeIdentity,
        started_at: Instant,
    ) -> Result<Role, LinkError> {
        transport.discover_service(session.link()).await?;

        let raw = transport.read_attribute(session.link(), AttrId::Epoch).await?;
        let remote_epoch = Epoch::from_bytes(&raw)?;
        let local_epoch = Epoch::since(started_at, Instant::now());

        let role = decide_role(local_epoch, remote_epoch, identity.as_str(), session.peer().identity());
        debug!(
            peer = %session.peer(),
            local_epoch = local_epoch.millis(),
            remote_epoch = remote_epoch.millis(),
            %role,
            "Epochs compared"
        );
        Ok(role)
    }

    /// The inbound link to force down, if it has sat without a role for a
    /// full negotiation window
    pub fn inbound_overdue(&self, ctx: &LinkContext, now: Instant) -> Option<LinkHandle> {
        if ctx.role().is_assigned() {
            return None;
        }
        let inbound = ctx.inbound()?;
        if now.saturating_duration_since(inbound.opened_at()) >= self.negotiation_window {
            Some(*inbound.link())
        } else {
            None
        }
    }
}
