//! Shared constants and primitives for the BlueTalk peer stack.
//!
//! Everything here is role-neutral: the fixed GATT identifiers both peers
//! advertise and look for, the usable frame size, and the one-shot `Latch`
//! used to signal disconnect edges across tasks.

pub mod latch;

pub use latch::Latch;

use uuid::Uuid;

/// Local name advertised during discovery and matched against scan results.
pub const SERVICE_NAME: &str = "BlueTalk";

/// Usable bytes per BLE write at the assumed ATT MTU of 23.
pub const BLE_MTU: usize = 20;

/// Primary chat service.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xa1b2c3d4_e5f6_1111_2222_333344445555);

/// Central-to-peripheral data path (write-without-response).
pub const RX_UUID: Uuid = Uuid::from_u128(0xa1b2c3d4_e5f6_1111_2222_333344445566);

/// Peripheral-to-central data path (notify + read).
pub const TX_UUID: Uuid = Uuid::from_u128(0xa1b2c3d4_e5f6_1111_2222_333344445577);

/// Lowercase hyphenated rendering, the form BlueZ uses in `UUID`/`UUIDs`
/// properties.
pub fn uuid_str(uuid: &Uuid) -> String {
    uuid.hyphenated().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_uuid_renders_like_bluez() {
        assert_eq!(
            uuid_str(&SERVICE_UUID),
            "a1b2c3d4-e5f6-1111-2222-333344445555"
        );
        assert_eq!(
            uuid_str(&RX_UUID),
            "a1b2c3d4-e5f6-1111-2222-333344445566"
        );
        assert_eq!(
            uuid_str(&TX_UUID),
            "a1b2c3d4-e5f6-1111-2222-333344445577"
        );
    }
}
