// Protocol - Attribute payloads exchanged between the two nodes
//
// All integers are little-endian u32:
// - Counter attribute: [counter]
// - Sync attribute (timed variant): [counter][elapsed_since_update_ms]
// - Sync attribute (legacy variant): [counter]

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Duration;

/// Protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unexpected {payload} payload length: expected {expected} bytes, got {actual}")]
    UnexpectedLength {
        payload: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Sync payload variant. Both peers must run the same one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncProtocol {
    /// Counter plus phase; the Client adopts unconditionally and re-phases
    #[default]
    Timed,
    /// Counter only; receivers keep the higher of local and received
    Legacy,
}

impl SyncProtocol {
    /// Length of a sync attribute write under this variant
    pub fn payload_len(&self) -> usize {
        match self {
            Self::Timed => SyncPacket::WIRE_LEN,
            Self::Legacy => COUNTER_WIRE_LEN,
        }
    }

    pub fn encode(&self, packet: &SyncPacket) -> Vec<u8> {
        match self {
            Self::Timed => packet.to_bytes().to_vec(),
            Self::Legacy => encode_counter(packet.counter()).to_vec(),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<SyncMessage, ProtocolError> {
        match self {
            Self::Timed => SyncPacket::from_bytes(bytes).map(SyncMessage::Timed),
            Self::Legacy => decode_counter(bytes).map(SyncMessage::CounterOnly),
        }
    }
}

/// A decoded sync attribute write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncMessage {
    Timed(SyncPacket),
    CounterOnly(u32),
}

// ============================================================================
// COUNTER ATTRIBUTE
// ============================================================================

pub const COUNTER_WIRE_LEN: usize = 4;

pub fn encode_counter(value: u32) -> [u8; 4] {
    value.to_le_bytes()
}

pub fn decode_counter(bytes: &[u8]) -> Result<u32, ProtocolError> {
    let raw: [u8; 4] = bytes.try_into().map_err(|_| ProtocolError::UnexpectedLength {
        payload: "counter",
        expected: COUNTER_WIRE_LEN,
        actual: bytes.len(),
    })?;
    Ok(u32::from_le_bytes(raw))
}

// ============================================================================
// SYNC PACKET
// ============================================================================

/// Master-to-Client transfer of the counter and its phase.
///
/// `elapsed_since_update` is how long ago the Master last incremented, which
/// lets the Client line its own increment schedule up with the Master's
/// without a shared clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPacket {
    counter: u32,
    elapsed_since_update: u32,
}

impl SyncPacket {
    pub const WIRE_LEN: usize = 8;

    pub fn new(counter: u32, elapsed_since_update: u32) -> Self {
        Self {
            counter,
            elapsed_since_update,
        }
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Milliseconds since the sender's last increment
    pub fn elapsed_since_update(&self) -> u32 {
        self.elapsed_since_update
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(u64::from(self.elapsed_since_update))
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.counter.to_le_bytes());
        out[4..].copy_from_slice(&self.elapsed_since_update.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != Self::WIRE_LEN {
            return Err(ProtocolError::UnexpectedLength {
                payload: "sync",
                expected: Self::WIRE_LEN,
                actual: bytes.len(),
            });
        }
        let (counter, elapsed) = bytes.split_at(4);
        Ok(Self {
            counter: decode_counter(counter)?,
            elapsed_since_update: decode_counter(elapsed)?,
        })
    }
}
