// Sync module - HOW THE COUNTER STAYS SHARED
// Wire formats for the counter service and the counter synchronizer

mod counter;
mod protocol;

pub use counter::{CounterState, CounterSynchronizer, SyncStats};
pub use protocol::{
    decode_counter, encode_counter, ProtocolError, SyncMessage, SyncPacket, SyncProtocol,
    COUNTER_WIRE_LEN,
};
