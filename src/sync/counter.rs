// Counter Synchronizer - The shared counter and its cadences
//
// The counter advances by one every increment interval no matter the role.
// A Master periodically pushes `SyncPacket`s; a Client adopts what it
// receives and shifts its own increment phase to match the Master's.

use crate::sync::protocol::{decode_counter, ProtocolError, SyncMessage, SyncPacket, SyncProtocol};
use tokio::time::{Duration, Instant};

/// Counter value and the instant of its last local increment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CounterState {
    value: u32,
    last_update_at: Instant,
}

impl CounterState {
    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn last_update_at(&self) -> Instant {
        self.last_update_at
    }
}

/// Statistics about counter synchronization
#[derive(Clone, Debug, Default)]
pub struct SyncStats {
    pub increments: u64,
    pub packets_built: u64,
    pub packets_applied: u64,
    pub polls_applied: u64,
    pub payloads_rejected: u64,
}

pub struct CounterSynchronizer {
    state: CounterState,
    counter_interval: Duration,
    sync_interval: Duration,
    last_sync_at: Instant,
    protocol: SyncProtocol,
    stats: SyncStats,
}

impl CounterSynchronizer {
    pub fn new(now: Instant, counter_interval: Duration, sync_interval: Duration, protocol: SyncProtocol) -> Self {
        Self {
            state: CounterState {
                value: 0,
                last_update_at: now,
            },
            counter_interval,
            sync_interval,
            last_sync_at: now,
            protocol,
            stats: SyncStats::default(),
        }
    }

    pub fn value(&self) -> u32 {
        self.state.value
    }

    pub fn state(&self) -> &CounterState {
        &self.state
    }

    pub fn protocol(&self) -> SyncProtocol {
        self.protocol
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// When the next local increment is due
    pub fn next_increment_at(&self) -> Instant {
        self.state.last_update_at + self.counter_interval
    }

    /// Time since the last local increment, in whole milliseconds
    pub fn elapsed_since_update(&self, now: Instant) -> u32 {
        let millis = now.saturating_duration_since(self.state.last_update_at).as_millis();
        u32::try_from(millis).unwrap_or(u32::MAX)
    }

    /// Increment if the interval has elapsed. Returns the new value.
    pub fn tick(&mut self, now: Instant) -> Option<u32> {
        if now < self.next_increment_at() {
            return None;
        }
        self.state.value = self.state.value.wrapping_add(1);
        self.state.last_update_at = now;
        self.stats.increments += 1;
        Some(self.state.value)
    }

    /// True once per sync interval; the cadence runs whether or not a peer is attached
    pub fn sync_due(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_sync_at) < self.sync_interval {
            return false;
        }
        self.last_sync_at = now;
        true
    }

    /// Snapshot the counter and its phase for a push to the Client
    pub fn build_packet(&self, now: Instant) -> SyncPacket {
        SyncPacket::new(self.state.value, self.elapsed_since_update(now))
    }

    /// Sync attribute payload for the configured protocol variant
    pub fn encode_push(&mut self, now: Instant) -> Vec<u8> {
        let packet = self.build_packet(now);
        self.stats.packets_built += 1;
        self.protocol.encode(&packet)
    }

    /// Adopt a packet: value and phase change together.
    ///
    /// Lower values are adopted too, so a Master that restarted can pull a
    /// long-running Client back. An elapsed time beyond one interval means
    /// the Master's own increment is overdue; we become due now as well
    /// instead of reaching further into the past.
    pub fn apply_packet(&mut self, packet: SyncPacket, now: Instant) -> u32 {
        let elapsed = packet.elapsed().min(self.counter_interval);
        let last_update_at = now.checked_sub(elapsed).unwrap_or(now);
        self.state = CounterState {
            value: packet.counter(),
            last_update_at,
        };
        self.stats.packets_applied += 1;
        self.state.value
    }

    /// Apply a sync attribute write. A malformed payload leaves the state untouched.
    pub fn apply_push(&mut self, payload: &[u8], now: Instant) -> Result<u32, ProtocolError> {
        let message = self.protocol.decode(payload).inspect_err(|_| {
            self.stats.payloads_rejected += 1;
        })?;

        Ok(match message {
            SyncMessage::Timed(packet) => self.apply_packet(packet, now),
            SyncMessage::CounterOnly(remote) => {
                self.stats.packets_applied += 1;
                self.keep_higher(remote)
            }
        })
    }

    /// Apply a counter attribute value obtained by polling.
    /// Returns whether the local value changed.
    pub fn apply_remote_counter(&mut self, payload: &[u8]) -> Result<bool, ProtocolError> {
        let remote = decode_counter(payload).inspect_err(|_| {
            self.stats.payloads_rejected += 1;
        })?;

        let before = self.state.value;
        match self.protocol {
            SyncProtocol::Timed => self.state.value = remote,
            SyncProtocol::Legacy => {
                self.keep_higher(remote);
            }
        }
        self.stats.polls_applied += 1;
        Ok(self.state.value != before)
    }

    /// Apply a counter notification. The peer notifies when it increments,
    /// so our own interval restarts from `now` together with the new value.
    pub fn apply_notification(&mut self, payload: &[u8], now: Instant) -> Result<bool, ProtocolError> {
        let changed = self.apply_remote_counter(payload)?;
        self.state.last_update_at = now;
        Ok(changed)
    }

    fn keep_higher(&mut self, remote: u32) -> u32 {
        self.state.value = self.state.value.max(remote);
        self.state.value
    }
}
