use std::sync::Arc;
use std::time::Duration;

use bluetalk_dbus::{Connection, SignalBody, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::{addr_from_path, Adapter, BluezError, DEVICE_IFACE};

/// A discovered device that matched the chat service.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub addr: String,
    pub name: String,
    pub uuids: Vec<String>,
}

/// Runs one bounded LE discovery window and returns the first device whose
/// name matches `name_filter` or whose advertised UUIDs include
/// `service_uuid`. Discovery is always stopped before returning.
pub async fn scan_for_peer(
    conn: &Arc<Connection>,
    adapter: &Adapter,
    service_uuid: &str,
    name_filter: &str,
    window: Duration,
) -> Result<Option<ScanResult>, BluezError> {
    if adapter.set_discovery_filter(Some(service_uuid)).await.is_err() {
        // Some adapters reject UUID filters; an unfiltered LE scan still
        // works, it just sees more devices.
        let _ = adapter.set_discovery_filter(None).await;
    }

    conn.add_match(
        "type='signal',interface='org.freedesktop.DBus.ObjectManager',member='InterfacesAdded'",
    )
    .await?;
    let mut signals = conn.signals()?;

    adapter.start_discovery().await?;

    let found = tokio::time::timeout(window, async {
        loop {
            let signal = match signals.recv().await {
                Ok(signal) => signal,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "scan fell behind the signal stream");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            };
            let SignalBody::InterfacesAdded { path, interfaces } = &signal.body else {
                continue;
            };
            if !path.is_child_of(adapter.path()) {
                continue;
            }
            let Some(device) = interfaces.get(DEVICE_IFACE) else {
                continue;
            };
            let addr = addr_from_path(path);
            if addr.is_empty() {
                continue;
            }

            let name = device
                .get("Alias")
                .and_then(Value::as_str)
                .or_else(|| device.get("Name").and_then(Value::as_str))
                .unwrap_or_default();
            let uuids: Vec<String> = device
                .get("UUIDs")
                .and_then(Value::as_str_array)
                .map(<[String]>::to_vec)
                .unwrap_or_default();

            if name == name_filter || uuids.iter().any(|u| u == service_uuid) {
                return Some(ScanResult {
                    addr,
                    name: name.to_owned(),
                    uuids,
                });
            }
        }
    })
    .await
    .unwrap_or(None);

    let _ = adapter.stop_discovery().await;
    Ok(found)
}
