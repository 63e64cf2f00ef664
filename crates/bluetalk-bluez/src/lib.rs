//! BLE central over BlueZ's D-Bus object model: adapter lookup, filtered LE
//! scanning, device connect with GATT resolution, and a notification-fed
//! client handle.

mod adapter;
mod client;
mod scan;

pub use adapter::Adapter;
pub use client::{connect, CentralClient};
pub use scan::{scan_for_peer, ScanResult};

use bluetalk_dbus::{DbusError, ObjectPath, WireError};
use thiserror::Error;

pub(crate) const BLUEZ_DEST: &str = "org.bluez";
pub(crate) const BLUEZ_ROOT: &str = "/";
pub(crate) const ADAPTER_PREFIX: &str = "/org/bluez/";

pub(crate) const OBJECT_MANAGER_IFACE: &str = "org.freedesktop.DBus.ObjectManager";
pub(crate) const PROPERTIES_IFACE: &str = "org.freedesktop.DBus.Properties";
pub(crate) const ADAPTER_IFACE: &str = "org.bluez.Adapter1";
pub(crate) const DEVICE_IFACE: &str = "org.bluez.Device1";
pub(crate) const SERVICE_IFACE: &str = "org.bluez.GattService1";
pub(crate) const CHARACTERISTIC_IFACE: &str = "org.bluez.GattCharacteristic1";

#[derive(Debug, Error)]
pub enum BluezError {
    #[error("dbus: {0}")]
    Dbus(#[from] DbusError),
    #[error("wire: {0}")]
    Wire(#[from] WireError),
    #[error("no bluez adapter found")]
    AdapterMissing,
    #[error("services not resolved within {0} seconds")]
    ResolveTimeout(u64),
    #[error("gatt service {0} not found")]
    ServiceMissing(String),
    #[error("required characteristic missing")]
    CharacteristicMissing,
}

/// `AA:BB:CC:DD:EE:FF` under `adapter` becomes `<adapter>/dev_AA_BB_CC_DD_EE_FF`.
pub fn path_from_addr(adapter: &ObjectPath, addr: &str) -> ObjectPath {
    let mangled = addr.to_ascii_uppercase().replace(':', "_");
    ObjectPath::from(format!("{}/dev_{}", adapter.as_str(), mangled))
}

/// Recovers the MAC from a device object path; empty when the path is not a
/// device node.
pub fn addr_from_path(path: &ObjectPath) -> String {
    let Some(leaf) = path.as_str().rsplit('/').next() else {
        return String::new();
    };
    let Some(mangled) = leaf.strip_prefix("dev_") else {
        return String::new();
    };
    mangled.replace('_', ":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_and_path_convert_both_ways() {
        let adapter = ObjectPath::from("/org/bluez/hci0");
        let path = path_from_addr(&adapter, "aa:bb:cc:dd:ee:ff");
        assert_eq!(
            path.as_str(),
            "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF"
        );
        assert_eq!(addr_from_path(&path), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn non_device_paths_yield_no_addr() {
        assert_eq!(addr_from_path(&ObjectPath::from("/org/bluez/hci0")), "");
        assert_eq!(
            addr_from_path(&ObjectPath::from("/org/bluez/hci0/service0001")),
            ""
        );
    }
}
