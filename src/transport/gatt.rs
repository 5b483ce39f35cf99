// GATT Service Layout
// The counter service every node exposes, and the attribute ids the core uses

use serde::{Deserialize, Serialize};

pub const SERVICE_UUID: &str = "21e862dc-87da-4130-9991-2a5a49b4d949";
pub const COUNTER_CHARACTERISTIC_UUID: &str = "4027ce63-bdf0-4158-9426-6c8203185e00";
pub const SYNC_CHARACTERISTIC_UUID: &str = "e0368f9c-d3d2-4588-b033-1355ac7dc562";
pub const EPOCH_CHARACTERISTIC_UUID: &str = "f0368f9c-d3d2-4588-b033-1355ac7dc563";

// ============================================================================
// ATTRIBUTE IDS
// ============================================================================

/// Attributes of the counter service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrId {
    /// Current counter value (read, notify)
    Counter,
    /// Sync packets pushed by the Master (read, write)
    Sync,
    /// Milliseconds since the node started (read)
    Epoch,
}

impl AttrId {
    pub const ALL: [AttrId; 3] = [AttrId::Counter, AttrId::Sync, AttrId::Epoch];

    pub fn uuid(&self) -> &'static str {
        match self {
            Self::Counter => COUNTER_CHARACTERISTIC_UUID,
            Self::Sync => SYNC_CHARACTERISTIC_UUID,
            Self::Epoch => EPOCH_CHARACTERISTIC_UUID,
        }
    }

    pub fn from_uuid(uuid: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|attr| attr.uuid().eq_ignore_ascii_case(uuid))
    }
}

// ============================================================================
// BLE SERVICE AND CHARACTERISTIC
// ============================================================================

/// BLE GATT Service definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleService {
    uuid: String,
    characteristics: Vec<BleCharacteristic>,
}

impl BleService {
    pub fn new(uuid: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            characteristics: Vec::new(),
        }
    }

    /// The layout every node registers: counter, sync and epoch attributes
    pub fn counter_service() -> Self {
        Self::new(SERVICE_UUID)
            .with_characteristic(BleCharacteristic::new(COUNTER_CHARACTERISTIC_UUID).with_read().with_notify())
            .with_characteristic(BleCharacteristic::new(SYNC_CHARACTERISTIC_UUID).with_read().with_write())
            .with_characteristic(BleCharacteristic::new(EPOCH_CHARACTERISTIC_UUID).with_read())
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn characteristics(&self) -> &[BleCharacteristic] {
        &self.characteristics
    }

    pub fn with_characteristic(mut self, characteristic: BleCharacteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }

    /// Look up the characteristic backing an attribute
    pub fn characteristic(&self, attr: AttrId) -> Option<&BleCharacteristic> {
        self.characteristics
            .iter()
            .find(|c| c.uuid.eq_ignore_ascii_case(attr.uuid()))
    }

    /// Check whether this is the counter service with all three attributes
    pub fn is_counter_service(&self) -> bool {
        self.uuid.eq_ignore_ascii_case(SERVICE_UUID)
            && AttrId::ALL.iter().all(|attr| self.characteristic(*attr).is_some())
    }

    /// Find the first attribute of the counter layout this service lacks
    pub fn missing_attribute(&self) -> Option<AttrId> {
        AttrId::ALL
            .into_iter()
            .find(|attr| self.characteristic(*attr).is_none())
    }
}

/// BLE GATT Characteristic definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleCharacteristic {
    uuid: String,
    read: bool,
    write: bool,
    notify: bool,
}

impl BleCharacteristic {
    pub fn new(uuid: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            read: false,
            write: false,
            notify: false,
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn with_read(mut self) -> Self {
        self.read = true;
        self
    }

    pub fn with_write(mut self) -> Self {
        self.write = true;
        self
    }

    pub fn with_notify(mut self) -> Self {
        self.notify = true;
        self
    }

    pub fn can_read(&self) -> bool {
        self.read
    }

    pub fn can_write(&self) -> bool {
        self.write
    }

    pub fn can_notify(&self) -> bool {
        self.notify
    }
}
