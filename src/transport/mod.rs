// Transport module - THE RADIO (abstract)
// The adapter contract the link core consumes, the counter service layout,
// and an in-memory radio that implements the contract

mod gatt;
mod sim;
mod traits;

pub use traits::{
    // Core trait
    Transport,
    // Handles
    LinkHandle, PeerRef,
    // Attribute values served by a node
    AttributeValue,
    // Events and errors
    TransportError, TransportEvent,
};

pub use gatt::{
    AttrId, BleCharacteristic, BleService,
    COUNTER_CHARACTERISTIC_UUID, EPOCH_CHARACTERISTIC_UUID, SERVICE_UUID, SYNC_CHARACTERISTIC_UUID,
};

pub use sim::{ConnectBehavior, SimNetwork, SimTransport};
