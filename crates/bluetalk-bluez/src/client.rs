use std::sync::{Arc, Mutex};
use std::time::Duration;

use bluetalk_core::{uuid_str, Latch, RX_UUID, SERVICE_UUID, TX_UUID};
use bluetalk_dbus::{
    decode_body_variant, decode_managed_objects, Arg, CallBody, Connection, InterfaceMap,
    ObjectPath, SignalBody, Value,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    path_from_addr, Adapter, BluezError, BLUEZ_DEST, BLUEZ_ROOT, CHARACTERISTIC_IFACE,
    DEVICE_IFACE, OBJECT_MANAGER_IFACE, PROPERTIES_IFACE, SERVICE_IFACE,
};

const RESOLVE_DEADLINE_SECS: u64 = 10;
const RESOLVE_POLL: Duration = Duration::from_millis(100);

/// Frames queued between the signal task and the consumer; overflow drops.
const INBOUND_QUEUE_DEPTH: usize = 32;

/// An established central-role connection: RX characteristic for writes, TX
/// notifications feeding the inbound frame queue.
pub struct CentralClient {
    conn: Arc<Connection>,
    device_path: ObjectPath,
    write_char_path: ObjectPath,
    addr: String,
    frames: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    disconnected: Arc<Latch>,
}

impl CentralClient {
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Write-without-response to the peer's RX characteristic.
    pub async fn write_no_response(&self, data: &[u8]) -> Result<(), BluezError> {
        self.conn
            .call(
                BLUEZ_DEST,
                self.write_char_path.as_str(),
                CHARACTERISTIC_IFACE,
                "WriteValue",
                CallBody::BytesWithDict(
                    data.to_vec(),
                    vec![("type".to_owned(), Arg::Str("command".to_owned()))],
                ),
            )
            .await?;
        Ok(())
    }

    /// The inbound notification frames. Yields `None` once per client.
    pub fn take_frames(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.frames.lock().unwrap().take()
    }

    /// Tripped exactly once, on remote disconnect, bus loss, or `close`.
    pub fn disconnected(&self) -> Arc<Latch> {
        self.disconnected.clone()
    }

    /// Idempotent teardown: trips the latch and asks BlueZ to drop the link.
    pub async fn close(&self) {
        self.disconnected.trip();
        let _ = disconnect_device(&self.conn, &self.device_path).await;
    }
}

async fn disconnect_device(conn: &Arc<Connection>, device_path: &ObjectPath) -> Result<(), BluezError> {
    conn.call(
        BLUEZ_DEST,
        device_path.as_str(),
        DEVICE_IFACE,
        "Disconnect",
        CallBody::Empty,
    )
    .await?;
    Ok(())
}

/// Connects to `addr`, waits for GATT resolution, resolves the chat service
/// and its RX/TX characteristics, enables notifications, and hands back a
/// live client. Every failure path disconnects the device first.
pub async fn connect(
    conn: &Arc<Connection>,
    adapter: &Adapter,
    addr: &str,
) -> Result<CentralClient, BluezError> {
    let device_path = path_from_addr(adapter.path(), addr);

    conn.call(
        BLUEZ_DEST,
        device_path.as_str(),
        DEVICE_IFACE,
        "Connect",
        CallBody::Empty,
    )
    .await?;

    if let Err(err) = wait_services_resolved(conn, &device_path).await {
        let _ = disconnect_device(conn, &device_path).await;
        return Err(err);
    }

    let (write_char_path, notify_char_path) = match resolve_characteristics(conn, &device_path)
        .await
    {
        Ok(paths) => paths,
        Err(err) => {
            let _ = disconnect_device(conn, &device_path).await;
            return Err(err);
        }
    };

    if let Err(err) = conn
        .call(
            BLUEZ_DEST,
            notify_char_path.as_str(),
            CHARACTERISTIC_IFACE,
            "StartNotify",
            CallBody::Empty,
        )
        .await
    {
        let _ = disconnect_device(conn, &device_path).await;
        return Err(err.into());
    }

    for path in [&notify_char_path, &device_path] {
        let rule = format!(
            "type='signal',path='{path}',interface='{PROPERTIES_IFACE}',member='PropertiesChanged'"
        );
        if let Err(err) = conn.add_match(&rule).await {
            let _ = disconnect_device(conn, &device_path).await;
            return Err(err.into());
        }
    }

    let signals = match conn.signals() {
        Ok(rx) => rx,
        Err(err) => {
            let _ = disconnect_device(conn, &device_path).await;
            return Err(err.into());
        }
    };

    let (frame_tx, frame_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
    let disconnected = Arc::new(Latch::new());
    tokio::spawn(signal_task(
        signals,
        notify_char_path,
        device_path.clone(),
        frame_tx,
        disconnected.clone(),
    ));

    Ok(CentralClient {
        conn: conn.clone(),
        device_path,
        write_char_path,
        addr: addr.to_owned(),
        frames: Mutex::new(Some(frame_rx)),
        disconnected,
    })
}

async fn wait_services_resolved(
    conn: &Arc<Connection>,
    device_path: &ObjectPath,
) -> Result<(), BluezError> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(RESOLVE_DEADLINE_SECS);
    while tokio::time::Instant::now() < deadline {
        let reply = conn
            .call(
                BLUEZ_DEST,
                device_path.as_str(),
                PROPERTIES_IFACE,
                "Get",
                CallBody::TwoStrings(DEVICE_IFACE.to_owned(), "ServicesResolved".to_owned()),
            )
            .await;
        if let Ok(reply) = reply {
            if let Ok(value) = decode_body_variant(&reply.body) {
                if value.as_bool() == Some(true) {
                    return Ok(());
                }
            }
        }
        tokio::time::sleep(RESOLVE_POLL).await;
    }
    Err(BluezError::ResolveTimeout(RESOLVE_DEADLINE_SECS))
}

fn interface_uuid<'a>(interfaces: &'a InterfaceMap, iface: &str) -> Option<&'a str> {
    interfaces.get(iface)?.get("UUID")?.as_str()
}

/// Walks the freshly-resolved object tree below the device for the chat
/// service, then for its RX (write) and TX (notify) characteristics.
async fn resolve_characteristics(
    conn: &Arc<Connection>,
    device_path: &ObjectPath,
) -> Result<(ObjectPath, ObjectPath), BluezError> {
    let reply = conn
        .call(
            BLUEZ_DEST,
            BLUEZ_ROOT,
            OBJECT_MANAGER_IFACE,
            "GetManagedObjects",
            CallBody::Empty,
        )
        .await?;
    let objects = decode_managed_objects(&reply.body)?;

    let service_uuid = uuid_str(&SERVICE_UUID);
    let service_path = objects
        .iter()
        .find(|(path, interfaces)| {
            path.is_child_of(device_path)
                && interface_uuid(interfaces, SERVICE_IFACE) == Some(service_uuid.as_str())
        })
        .map(|(path, _)| path.clone())
        .ok_or(BluezError::ServiceMissing(service_uuid))?;

    let rx_uuid = uuid_str(&RX_UUID);
    let tx_uuid = uuid_str(&TX_UUID);
    let mut write_char_path = None;
    let mut notify_char_path = None;
    for (path, interfaces) in &objects {
        if !path.is_child_of(&service_path) {
            continue;
        }
        match interface_uuid(interfaces, CHARACTERISTIC_IFACE) {
            Some(u) if u == rx_uuid => write_char_path = Some(path.clone()),
            Some(u) if u == tx_uuid => notify_char_path = Some(path.clone()),
            _ => {}
        }
    }

    match (write_char_path, notify_char_path) {
        (Some(write), Some(notify)) => Ok((write, notify)),
        _ => Err(BluezError::CharacteristicMissing),
    }
}

/// Runs on its own task so notification handling never blocks the bus
/// reader: characteristic `Value` changes become inbound frames, a device
/// `Connected` change (or bus loss) trips the disconnect latch.
async fn signal_task(
    mut signals: tokio::sync::broadcast::Receiver<bluetalk_dbus::Signal>,
    notify_char_path: ObjectPath,
    device_path: ObjectPath,
    frame_tx: mpsc::Sender<Vec<u8>>,
    disconnected: Arc<Latch>,
) {
    loop {
        let signal = match signals.recv().await {
            Ok(signal) => signal,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "notification task fell behind the signal stream");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if signal.member != "PropertiesChanged" {
            continue;
        }
        let SignalBody::PropertiesChanged { changed, .. } = &signal.body else {
            continue;
        };
        if signal.path == notify_char_path {
            if let Some(Value::Bytes(frame)) = changed.get("Value") {
                if !frame.is_empty() {
                    let _ = frame_tx.try_send(frame.clone());
                }
            }
        } else if signal.path == device_path && changed.contains_key("Connected") {
            break;
        }
    }
    disconnected.trip();
}
