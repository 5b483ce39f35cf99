// Connection Manager - When to scan, when to connect, how to recover
//
// Pure scheduling decisions over the `LinkContext`; the coordinator performs
// the radio calls these decisions ask for.

use crate::link::types::{ConnectionAttempt, LinkContext, LinkState, Session};
use crate::node::NodeConfig;
use crate::transport::{LinkHandle, PeerRef};
use rand::rngs::StdRng;
use rand::Rng;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What the coordinator should do about the outstanding attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptAction {
    /// Nothing in flight
    None,
    /// Still inside the collision delay
    Waiting,
    /// Issue `connect()` now; `remaining` is left until the deadline
    Connect { target: PeerRef, remaining: Duration },
    /// `connect()` issued, outcome not reported yet
    Pending,
    /// Deadline passed before the outcome arrived; attempt dropped. A pending
    /// request handle must be cancelled by the caller.
    TimedOut { target: PeerRef, link: Option<LinkHandle> },
}

/// Statistics about connection management
#[derive(Clone, Debug, Default)]
pub struct ManagerStats {
    pub scans: u64,
    pub candidates_accepted: u64,
    pub candidates_ignored: u64,
    pub attempts_abandoned: u64,
    pub sessions_opened: u64,
    pub backoffs_scheduled: u64,
}

pub struct ConnectionManager {
    scan_duration: Duration,
    rescan_interval: Duration,
    connection_timeout: Duration,
    collision_delay: Duration,
    backoff_min_ms: u64,
    backoff_max_ms: u64,
    yield_delay: Duration,
    rng: StdRng,
    stats: ManagerStats,
}

impl ConnectionManager {
    pub fn new(config: &NodeConfig, rng: StdRng) -> Self {
        Self {
            scan_duration: config.scan_duration(),
            rescan_interval: config.rescan_interval(),
            connection_timeout: config.connection_timeout(),
            collision_delay: config.collision_delay(),
            backoff_min_ms: config.backoff_min_ms,
            backoff_max_ms: config.backoff_max_ms,
            yield_delay: config.yield_delay(),
            rng,
            stats: ManagerStats::default(),
        }
    }

    pub fn scan_duration(&self) -> Duration {
        self.scan_duration
    }

    pub fn stats(&self) -> &ManagerStats {
        &self.stats
    }

    // ========================================================================
    // DISCOVERY
    // ========================================================================

    /// Extra wait before connecting to `peer`: the side whose identity sorts
    /// lower holds back so that usually only one side initiates.
    pub fn collision_delay_for(&self, ctx: &LinkContext, peer: &PeerRef) -> Duration {
        if ctx.identity().sorts_before(peer) {
            self.collision_delay
        } else {
            Duration::ZERO
        }
    }

    /// Consider a discovered peer as the next connection target.
    ///
    /// Rejected only when we are already linked with a role, when an attempt
    /// is outstanding, or when an outbound session already exists. An
    /// inbound link without a role does not block discovery.
    pub fn on_peer_discovered(&mut self, ctx: &mut LinkContext, peer: PeerRef, now: Instant) -> bool {
        if peer.identity() == ctx.identity().as_str() {
            return false;
        }
        if ctx.is_fully_linked() {
            debug!(%peer, "Already properly linked, ignoring discovered peer");
            self.stats.candidates_ignored += 1;
            return false;
        }
        if ctx.attempt().is_some() || ctx.session().is_some() {
            debug!(%peer, "Connection already in progress, ignoring discovered peer");
            self.stats.candidates_ignored += 1;
            return false;
        }

        let delay = self.collision_delay_for(ctx, &peer);
        if !delay.is_zero() {
            debug!(%peer, delay_ms = delay.as_millis() as u64, "Delaying connection to avoid collision");
        }

        let attempt = ConnectionAttempt::new(peer, now, delay, self.connection_timeout);
        ctx.begin_attempt(attempt);
        ctx.set_state(LinkState::Connecting);
        ctx.mark_scanned(now);
        self.stats.candidates_accepted += 1;
        true
    }

    // ========================================================================
    // CONNECTION ATTEMPTS
    // ========================================================================

    /// Decide what to do with the outstanding attempt at `now`. Called every
    /// tick; this is where the connect deadline is enforced.
    pub fn poll_attempt(&mut self, ctx: &mut LinkContext, now: Instant) -> AttemptAction {
        let Some(attempt) = ctx.attempt() else {
            return AttemptAction::None;
        };

        if attempt.is_expired(now) {
            let target = attempt.target().clone();
            let link = attempt.link();
            self.abandon_attempt(ctx, "connection attempt timed out");
            return AttemptAction::TimedOut { target, link };
        }
        if attempt.is_requested() {
            return AttemptAction::Pending;
        }
        if !attempt.is_ready(now) {
            return AttemptAction::Waiting;
        }

        AttemptAction::Connect {
            target: attempt.target().clone(),
            remaining: attempt.remaining(now),
        }
    }

    /// Drop the attempt and its candidate, and go back to scanning
    pub fn abandon_attempt(&mut self, ctx: &mut LinkContext, reason: &str) -> Option<ConnectionAttempt> {
        let attempt = ctx.take_attempt();
        if let Some(a) = &attempt {
            warn!(peer = %a.target(), reason, "Abandoning connection attempt");
        }
        self.stats.attempts_abandoned += 1;
        ctx.request_scan();
        ctx.set_state(LinkState::Scanning);
        attempt
    }

    /// `connect()` was issued and handed back `link`
    pub fn on_connect_requested(&mut self, ctx: &mut LinkContext, link: LinkHandle) {
        if ctx.note_connect_requested(link) {
            debug!(%link, "Connect requested");
        }
    }

    /// The request behind `link` failed. Returns false when it belongs to no
    /// outstanding attempt (already timed out or superseded).
    pub fn on_connect_failed(&mut self, ctx: &mut LinkContext, link: LinkHandle, reason: &str) -> bool {
        if ctx.attempt().and_then(|a| a.link()) != Some(link) {
            return false;
        }
        self.abandon_attempt(ctx, reason);
        true
    }

    /// The request behind `link` came up: the attempt becomes a session and
    /// negotiation starts. `None` when no outstanding attempt owns `link`.
    pub fn on_connected(&mut self, ctx: &mut LinkContext, link: LinkHandle, now: Instant) -> Option<Session> {
        if ctx.attempt().and_then(|a| a.link()) != Some(link) {
            return None;
        }
        let attempt = ctx.take_attempt()?;
        let session = Session::new(link, attempt.target().clone(), now);
        ctx.open_session(session.clone());
        ctx.set_state(LinkState::Negotiating);
        self.stats.sessions_opened += 1;
        debug!(peer = %session.peer(), %link, "Outbound link established");
        Some(session)
    }

    // ========================================================================
    // LINK LOSS AND SCAN SCHEDULING
    // ========================================================================

    /// Schedule the next scan after a random jitter. A half-formed Client
    /// relationship also waits the yield delay so the older peer initiates.
    pub fn schedule_backoff(&mut self, ctx: &mut LinkContext, now: Instant, half_formed: bool) -> Duration {
        let jitter = Duration::from_millis(self.rng.gen_range(self.backoff_min_ms..=self.backoff_max_ms));
        let delay = if half_formed {
            self.yield_delay + jitter
        } else {
            jitter
        };
        ctx.schedule_scan_at(now + delay);
        self.stats.backoffs_scheduled += 1;
        debug!(delay_ms = delay.as_millis() as u64, half_formed, "Scan scheduled after disconnect");
        delay
    }

    /// An inbound link without a role: look for the initiator right away
    pub fn on_unresolved_inbound(&mut self, ctx: &mut LinkContext) {
        ctx.clear_scan_after();
        ctx.request_scan();
    }

    /// Whether a scan should run now. Also fires the backoff and periodic
    /// rescan timers.
    pub fn should_scan(&mut self, ctx: &mut LinkContext, now: Instant) -> bool {
        if ctx.is_fully_linked() || ctx.attempt().is_some() || ctx.session().is_some() {
            return false;
        }

        if let Some(at) = ctx.scan_after() {
            if now < at {
                return false;
            }
            ctx.clear_scan_after();
            ctx.request_scan();
            info!("Randomized delay complete, starting scan");
        }

        if !ctx.scan_requested() && now.saturating_duration_since(ctx.last_scan_at()) >= self.rescan_interval {
            info!("No proper connection or role, starting periodic scan");
            ctx.request_scan();
        }

        ctx.scan_requested()
    }

    pub fn on_scan_complete(&mut self, ctx: &mut LinkContext, now: Instant, found: usize) {
        ctx.mark_scanned(now);
        self.stats.scans += 1;
        debug!(found, "Scan complete");
    }
}
