// Node Coordinator - The single owner of everything mutable
//
// One `tick()` drains the transport's event queue, advances the counter,
// runs the sync cadence, then lets the connection manager and the role
// negotiator act. Nothing else writes the role or the counter, and nothing
// in a tick waits on the peer: connects complete through events.

use crate::link::{
    AttemptAction, ConnectionManager, InboundLink, LinkContext, LinkError, LinkState, NodeIdentity,
    Role, RoleNegotiator, Session,
};
use crate::node::config::{ConfigError, NodeConfig};
use crate::node::status::NodeStatus;
use crate::sync::{encode_counter, CounterSynchronizer};
use crate::transport::{
    AttrId, AttributeValue, BleService, LinkHandle, PeerRef, Transport, TransportEvent,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub struct Node<T: Transport> {
    transport: T,
    config: NodeConfig,
    ctx: LinkContext,
    manager: ConnectionManager,
    negotiator: RoleNegotiator,
    counter: CounterSynchronizer,
    last_status_at: Instant,
}

impl<T: Transport> Node<T> {
    /// Create a node whose backoff jitter is seeded from OS entropy
    pub fn new(transport: T, config: NodeConfig) -> Result<Self, ConfigError> {
        Self::with_rng(transport, config, StdRng::from_entropy())
    }

    /// Create a node with an explicit jitter source
    pub fn with_rng(transport: T, config: NodeConfig, rng: StdRng) -> Result<Self, ConfigError> {
        config.validate()?;

        let now = Instant::now();
        let identity = NodeIdentity::from_address(&transport.local_address());
        let counter = CounterSynchronizer::new(
            now,
            config.counter_interval(),
            config.sync_interval(),
            config.protocol,
        );

        Ok(Self {
            ctx: LinkContext::new(identity, now),
            manager: ConnectionManager::new(&config, rng),
            negotiator: RoleNegotiator::new(config.negotiation_window()),
            counter,
            last_status_at: now,
            transport,
            config,
        })
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn identity(&self) -> &NodeIdentity {
        self.ctx.identity()
    }

    pub fn role(&self) -> Role {
        self.ctx.role()
    }

    pub fn state(&self) -> LinkState {
        self.ctx.state()
    }

    pub fn counter_value(&self) -> u32 {
        self.counter.value()
    }

    pub fn counter(&self) -> &CounterSynchronizer {
        &self.counter
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn link_context(&self) -> &LinkContext {
        &self.ctx
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn address(&self) -> PeerRef {
        self.transport.local_address()
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            identity: self.ctx.identity().clone(),
            role: self.ctx.role(),
            state: self.ctx.state(),
            outbound: self.ctx.session().is_some(),
            inbound: self.ctx.inbound().is_some(),
            counter: self.counter.value(),
            connect_pending: self.ctx.attempt().map(|a| a.age(Instant::now())),
            scan_pending: self.ctx.scan_requested() || self.ctx.scan_after().is_some(),
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Publish the counter service and start advertising and scanning
    pub async fn start(&mut self) -> Result<(), LinkError> {
        self.transport.register_service(BleService::counter_service()).await?;
        self.transport
            .set_attribute(AttrId::Epoch, AttributeValue::UptimeMillis(self.ctx.started_at()))
            .await?;
        self.publish_counter().await;
        self.transport.advertise().await?;

        self.ctx.request_scan();
        self.ctx.set_state(LinkState::Scanning);
        info!(identity = %self.ctx.identity(), "Node started, advertising");
        Ok(())
    }

    /// Drop both links and go quiet
    pub async fn shutdown(&mut self) {
        if let Some(session) = self.ctx.take_session() {
            self.disconnect_quietly(session.link()).await;
        }
        if let Some(inbound) = self.ctx.take_inbound() {
            self.disconnect_quietly(inbound.link()).await;
        }
        self.cancel_attempt().await;
        self.ctx.clear_role();
        self.ctx.set_state(LinkState::Idle);

        if let Err(e) = self.transport.stop_scan().await {
            debug!(error = %e, "Stop scan failed during shutdown");
        }
        if let Err(e) = self.transport.stop_advertise().await {
            debug!(error = %e, "Stop advertise failed during shutdown");
        }
        info!(identity = %self.ctx.identity(), counter = self.counter.value(), "Node stopped");
    }

    // ========================================================================
    // SCHEDULER TICK
    // ========================================================================

    pub async fn tick(&mut self) {
        let now = Instant::now();

        for event in self.transport.poll_events().await {
            self.handle_event(event, now).await;
        }

        if let Some(value) = self.counter.tick(now) {
            debug!(value, "Counter incremented");
            self.publish_counter().await;
        }

        if self.counter.sync_due(now) {
            self.perform_sync(now).await;
        }

        if self.manager.should_scan(&mut self.ctx, now) {
            self.run_scan(now).await;
        }

        self.drive_attempt(Instant::now()).await;

        // Last, so a peer we kick gets a tick to re-advertise before we scan
        self.repair_inbound(Instant::now()).await;

        self.report_status(Instant::now());
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    async fn handle_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::InboundLinkOpened { link, peer } => {
                info!(%peer, %link, "Peer connected to our service");
                if let Some(old) = self.ctx.set_inbound(InboundLink::new(link, peer, now)) {
                    debug!(link = %old.link(), "Replaced stale inbound link");
                }
                if let Err(e) = self
                    .transport
                    .set_attribute(AttrId::Epoch, AttributeValue::UptimeMillis(self.ctx.started_at()))
                    .await
                {
                    warn!(error = %e, "Failed to refresh epoch attribute");
                }
                if !self.ctx.role().is_assigned() {
                    self.manager.on_unresolved_inbound(&mut self.ctx);
                }
            }

            TransportEvent::InboundLinkClosed { link } => {
                if self.ctx.inbound().map(|i| *i.link()) != Some(link) {
                    debug!(%link, "Close for unknown inbound link");
                    return;
                }
                self.ctx.take_inbound();
                info!(%link, "Peer disconnected from our service");
                if self.ctx.role().is_assigned() {
                    self.reset_relationship(now, false).await;
                }
            }

            TransportEvent::OutboundLinkOpened { link } => {
                let Some(session) = self.manager.on_connected(&mut self.ctx, link, now) else {
                    debug!(%link, "Link opened for an abandoned attempt, closing");
                    self.disconnect_quietly(&link).await;
                    return;
                };
                self.negotiate_session(session).await;
            }

            TransportEvent::ConnectFailed { link, error } => {
                let reason = if error.is_timeout() {
                    "radio gave up on the connection".to_string()
                } else {
                    error.to_string()
                };
                if !self.manager.on_connect_failed(&mut self.ctx, link, &reason) {
                    debug!(%link, %error, "Failure for an abandoned attempt");
                }
            }

            TransportEvent::OutboundLinkClosed { link, reason } => {
                if self.ctx.session().map(|s| *s.link()) != Some(link) {
                    debug!(%link, "Close for unknown outbound link");
                    return;
                }
                self.ctx.take_session();
                info!(%link, %reason, "Outbound link lost");
                if self.ctx.role().is_assigned() {
                    let half_formed = self.ctx.role() == Role::Client && self.ctx.inbound().is_none();
                    self.reset_relationship(now, half_formed).await;
                } else {
                    self.ctx.request_scan();
                    self.ctx.set_state(LinkState::Scanning);
                }
            }

            TransportEvent::PeerDiscovered { peer } => {
                self.manager.on_peer_discovered(&mut self.ctx, peer, now);
            }

            TransportEvent::AttributeWritten { attr: AttrId::Sync, data } => {
                if self.ctx.role() == Role::Master {
                    debug!("Master ignores pushed sync payload");
                    return;
                }
                match self.counter.apply_push(&data, now) {
                    Ok(value) => {
                        info!(value, "Adopted counter from peer");
                        self.publish_counter().await;
                    }
                    Err(e) => warn!(error = %e, "Discarding sync payload"),
                }
            }

            TransportEvent::AttributeWritten { attr, .. } => {
                debug!(?attr, "Ignoring write to read-only attribute");
            }

            TransportEvent::Notified { link, attr: AttrId::Counter, data } => {
                let on_session = self.ctx.session().map(|s| *s.link()) == Some(link);
                if self.ctx.role() != Role::Client || !on_session {
                    return;
                }
                match self.counter.apply_notification(&data, now) {
                    Ok(true) => {
                        debug!(value = self.counter.value(), "Counter updated from notification");
                        self.publish_counter().await;
                    }
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "Discarding counter notification"),
                }
            }

            TransportEvent::Notified { attr, .. } => {
                debug!(?attr, "Ignoring notification");
            }
        }
    }

    /// A link the role depended on is gone: back to Unassigned and rescan
    /// after jitter
    async fn reset_relationship(&mut self, now: Instant, half_formed: bool) {
        let previous = self.ctx.clear_role();
        info!(%previous, "Link lost, role cleared");

        if let Some(session) = self.ctx.take_session() {
            self.disconnect_quietly(session.link()).await;
        }
        self.cancel_attempt().await;
        self.ctx.restart_inbound_window(now);
        self.manager.schedule_backoff(&mut self.ctx, now, half_formed);
        self.ctx.set_state(LinkState::Idle);

        self.ensure_advertising().await;
    }

    // ========================================================================
    // DISCOVERY AND CONNECTION
    // ========================================================================

    async fn run_scan(&mut self, now: Instant) {
        self.ctx.set_state(LinkState::Scanning);
        debug!("Scanning for peers");

        let peers = match self.transport.scan(self.manager.scan_duration()).await {
            Ok(peers) => peers,
            Err(e) => {
                warn!(error = %e, "Scan failed");
                Vec::new()
            }
        };
        self.manager.on_scan_complete(&mut self.ctx, Instant::now(), peers.len());

        for peer in peers {
            if self.manager.on_peer_discovered(&mut self.ctx, peer, now) {
                break;
            }
        }
    }

    async fn drive_attempt(&mut self, now: Instant) {
        match self.manager.poll_attempt(&mut self.ctx, now) {
            AttemptAction::Connect { target, remaining } => {
                debug!(peer = %target, remaining_ms = remaining.as_millis() as u64, "Connecting");
                match self.transport.connect(&target).await {
                    Ok(link) => self.manager.on_connect_requested(&mut self.ctx, link),
                    Err(e) => {
                        self.manager.abandon_attempt(&mut self.ctx, &e.to_string());
                    }
                }
            }
            AttemptAction::TimedOut { target, link } => {
                if let Some(link) = link {
                    self.disconnect_quietly(&link).await;
                }
                debug!(peer = %target, "Pending connect cancelled");
            }
            AttemptAction::None | AttemptAction::Waiting | AttemptAction::Pending => {}
        }
    }

    async fn negotiate_session(&mut self, session: Session) {
        let negotiated = self
            .negotiator
            .negotiate(&mut self.transport, &session, self.ctx.identity(), self.ctx.started_at())
            .await;

        match negotiated {
            Ok(role) => self.apply_role(role).await,
            Err(LinkError::Transport(e)) if e.is_discovery_error() => {
                warn!(peer = %session.peer(), error = %e, "Peer lacks the counter service, abandoning link");
                self.release_session(Instant::now()).await;
            }
            Err(e) => {
                warn!(peer = %session.peer(), error = %e, "Negotiation failed, abandoning link");
                self.release_session(Instant::now()).await;
            }
        }
    }

    async fn apply_role(&mut self, role: Role) {
        if let Err(e) = self.ctx.assign_role(role) {
            error!(error = %e, "Role conflict");
            debug_assert!(false, "role conflict: {e}");
            self.recover_from_conflict().await;
            return;
        }

        self.ctx.set_state(LinkState::for_role(role));
        self.ctx.clear_scan_after();
        let peer = self.ctx.session().map(|s| s.peer().to_string()).unwrap_or_default();
        info!(%peer, %role, "Role assigned");

        match role {
            Role::Client => {
                if let Err(e) = self.transport.stop_advertise().await {
                    warn!(error = %e, "Failed to stop advertising");
                }
                if let Err(e) = self.transport.stop_scan().await {
                    warn!(error = %e, "Failed to stop scanning");
                }
            }
            Role::Master => self.ensure_advertising().await,
            Role::Unassigned => {}
        }
    }

    /// Two roles on one node: force the link down and negotiate again
    async fn recover_from_conflict(&mut self) {
        self.reset_relationship(Instant::now(), false).await;
    }

    /// Drop an outbound link that could not be negotiated and scan again
    /// after jitter, so an incompatible peer is not hammered every tick
    async fn release_session(&mut self, now: Instant) {
        if let Some(session) = self.ctx.take_session() {
            self.disconnect_quietly(session.link()).await;
        }
        self.manager.schedule_backoff(&mut self.ctx, now, false);
        self.ctx.set_state(LinkState::Scanning);
    }

    /// Force down an inbound link that never got a role through our own
    /// outbound negotiation
    async fn repair_inbound(&mut self, now: Instant) {
        let Some(link) = self.negotiator.inbound_overdue(&self.ctx, now) else {
            return;
        };

        warn!(%link, "Inbound link unresolved past negotiation window, disconnecting");
        self.ctx.take_inbound();
        self.disconnect_quietly(&link).await;

        self.ctx.request_scan();
        if self.ctx.attempt().is_none() && self.ctx.session().is_none() {
            self.ctx.set_state(LinkState::Scanning);
        }
    }

    // ========================================================================
    // COUNTER
    // ========================================================================

    async fn perform_sync(&mut self, now: Instant) {
        let Some(link) = self.ctx.session().map(|s| *s.link()) else {
            return;
        };

        match self.ctx.role() {
            Role::Master => {
                let payload = self.counter.encode_push(now);
                match self.transport.write_attribute(&link, AttrId::Sync, &payload).await {
                    Ok(()) => debug!(value = self.counter.value(), "Pushed counter to client"),
                    Err(e) => warn!(error = %e, "Sync push failed"),
                }
            }
            Role::Client => {
                let raw = match self.transport.read_attribute(&link, AttrId::Counter).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(error = %e, "Counter poll failed");
                        return;
                    }
                };
                match self.counter.apply_remote_counter(&raw) {
                    Ok(true) => {
                        info!(value = self.counter.value(), "Adopted counter from master");
                        self.publish_counter().await;
                    }
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "Discarding polled counter"),
                }
            }
            Role::Unassigned => {}
        }
    }

    /// Mirror the counter into our attribute and notify an attached peer
    async fn publish_counter(&mut self) {
        let value = self.counter.value();
        let bytes = encode_counter(value).to_vec();
        if let Err(e) = self.transport.set_attribute(AttrId::Counter, AttributeValue::Bytes(bytes)).await {
            warn!(error = %e, "Failed to publish counter");
            return;
        }
        if self.ctx.inbound().is_some() {
            if let Err(e) = self.transport.notify(AttrId::Counter).await {
                debug!(error = %e, "Counter notification failed");
            }
        }
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    async fn ensure_advertising(&mut self) {
        if self.transport.is_advertising() {
            return;
        }
        if let Err(e) = self.transport.advertise().await {
            warn!(error = %e, "Failed to restart advertising");
        }
    }

    /// Drop the outstanding attempt, cancelling its request if one is pending
    async fn cancel_attempt(&mut self) {
        if let Some(link) = self.ctx.take_attempt().and_then(|a| a.link()) {
            self.disconnect_quietly(&link).await;
        }
    }

        async fn disconnect_quietly(&mut self, link: &LinkHandle) {
        if let Err(e) = self.transport.disconnect(link).await {
            debug!(%link, error = %e, "Disconnect failed");
        }
    }

    fn report_status(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_status_at) < self.config.status_interval() {
            return;
        }
        self.last_status_at = now;
        info!(status = %self.status(), "Status");
    }
}
