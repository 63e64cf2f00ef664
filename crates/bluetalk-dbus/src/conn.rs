//! Async system-bus connection: one writer mutex, one reader task, replies
//! routed by serial, signals fanned out on a bounded broadcast.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{broadcast, oneshot};
use tracing::debug;

use crate::auth;
use crate::decode::{decode_body_string, decode_interfaces_added, decode_properties_changed};
use crate::error::DbusError;
use crate::types::{Signal, SignalBody};
use crate::wire::{self, CallBody, RawMessage};

const DEFAULT_SYSTEM_BUS: &str = "unix:path=/var/run/dbus/system_bus_socket";
const ADDRESS_PREFIX: &str = "unix:path=";

const BUS_DEST: &str = "org.freedesktop.DBus";
const BUS_PATH: &str = "/org/freedesktop/DBus";

/// Depth of the signal fan-out; a lagging subscriber loses signals rather
/// than stalling the reader.
const SIGNAL_QUEUE_DEPTH: usize = 16;

fn system_bus_address() -> String {
    std::env::var("DBUS_SYSTEM_BUS_ADDRESS").unwrap_or_else(|_| DEFAULT_SYSTEM_BUS.to_owned())
}

fn socket_path(address: &str) -> Result<&str, DbusError> {
    address
        .strip_prefix(ADDRESS_PREFIX)
        .ok_or_else(|| DbusError::UnsupportedAddress(address.to_owned()))
}

pub struct Connection {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    serial: AtomicU32,
    pending: Mutex<HashMap<u32, oneshot::Sender<RawMessage>>>,
    signals: Mutex<Option<broadcast::Sender<Signal>>>,
    unique_name: OnceLock<String>,
    closed: AtomicBool,
}

impl Connection {
    /// Connects to the system bus, authenticates, says `Hello`, and starts
    /// the reader task.
    pub async fn connect_system_bus() -> Result<Arc<Self>, DbusError> {
        let address = system_bus_address();
        let mut stream = UnixStream::connect(socket_path(&address)?).await?;
        auth::authenticate(&mut stream).await?;

        let (read_half, write_half) = stream.into_split();
        let (signal_tx, _) = broadcast::channel(SIGNAL_QUEUE_DEPTH);
        let conn = Arc::new(Connection {
            writer: tokio::sync::Mutex::new(write_half),
            serial: AtomicU32::new(0),
            pending: Mutex::new(HashMap::new()),
            signals: Mutex::new(Some(signal_tx)),
            unique_name: OnceLock::new(),
            closed: AtomicBool::new(false),
        });
        tokio::spawn(read_task(conn.clone(), read_half));

        let reply = conn
            .call(BUS_DEST, BUS_PATH, BUS_DEST, "Hello", CallBody::Empty)
            .await?;
        let name = decode_body_string(&reply.body)?;
        let _ = conn.unique_name.set(name);
        Ok(conn)
    }

    /// The bus-assigned unique name (`:1.42`), once `Hello` has completed.
    pub fn unique_name(&self) -> Option<&str> {
        self.unique_name.get().map(String::as_str)
    }

    /// Issues a method call and awaits its reply. A METHOD_ERROR reply
    /// surfaces as `DbusError::Call` carrying the error name.
    pub async fn call(
        &self,
        dest: &str,
        path: &str,
        iface: &str,
        member: &str,
        body: CallBody,
    ) -> Result<RawMessage, DbusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbusError::Closed);
        }

        let serial = self.serial.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(serial, tx);

        let bytes = wire::build_method_call(serial, path, iface, member, dest, &body);
        {
            let mut writer = self.writer.lock().await;
            if let Err(err) = writer.write_all(&bytes).await {
                self.pending.lock().unwrap().remove(&serial);
                return Err(err.into());
            }
        }

        let reply = rx.await.map_err(|_| DbusError::Closed)?;
        if reply.msg_type == wire::MSG_ERROR {
            let name = reply
                .error_name
                .unwrap_or_else(|| "org.freedesktop.DBus.Error.Failed".to_owned());
            return Err(DbusError::Call { name });
        }
        Ok(reply)
    }

    /// Registers a signal match rule with the bus daemon.
    pub async fn add_match(&self, rule: &str) -> Result<(), DbusError> {
        self.call(
            BUS_DEST,
            BUS_PATH,
            BUS_DEST,
            "AddMatch",
            CallBody::Str(rule.to_owned()),
        )
        .await
        .map(|_| ())
    }

    /// Subscribes to the signal stream. The receiver observes `Closed` once
    /// the reader task has terminated.
    pub fn signals(&self) -> Result<broadcast::Receiver<Signal>, DbusError> {
        self.signals
            .lock()
            .unwrap()
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or(DbusError::Closed)
    }

    fn dispatch(&self, msg: RawMessage) {
        match msg.msg_type {
            wire::MSG_METHOD_RETURN | wire::MSG_ERROR => {
                if let Some(reply_serial) = msg.reply_serial {
                    let waiter = self.pending.lock().unwrap().remove(&reply_serial);
                    if let Some(tx) = waiter {
                        let _ = tx.send(msg);
                    }
                }
            }
            wire::MSG_SIGNAL => {
                let (Some(path), Some(interface), Some(member)) =
                    (msg.path, msg.interface, msg.member)
                else {
                    return;
                };
                let body = decode_signal_body(&member, &msg.body);
                let signal = Signal {
                    path,
                    interface,
                    member,
                    body,
                };
                if let Some(tx) = self.signals.lock().unwrap().as_ref() {
                    let _ = tx.send(signal);
                }
            }
            _ => {}
        }
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        // Dropping the senders wakes every waiter with `Closed`; dropping
        // the broadcast sender ends every signal subscriber.
        self.pending.lock().unwrap().clear();
        self.signals.lock().unwrap().take();
    }
}

fn decode_signal_body(member: &str, body: &[u8]) -> SignalBody {
    match member {
        "InterfacesAdded" => match decode_interfaces_added(body) {
            Ok((path, interfaces)) => SignalBody::InterfacesAdded { path, interfaces },
            Err(_) => SignalBody::None,
        },
        "PropertiesChanged" => match decode_properties_changed(body) {
            Ok((interface, changed)) => SignalBody::PropertiesChanged { interface, changed },
            Err(_) => SignalBody::None,
        },
        _ => SignalBody::None,
    }
}

async fn read_task(conn: Arc<Connection>, mut reader: OwnedReadHalf) {
    loop {
        match wire::read_message(&mut reader).await {
            Ok(msg) => conn.dispatch(msg),
            Err(err) => {
                debug!(error = %err, "bus reader terminating");
                break;
            }
        }
    }
    conn.shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unix_path_addresses_are_supported() {
        assert_eq!(
            socket_path("unix:path=/var/run/dbus/system_bus_socket").unwrap(),
            "/var/run/dbus/system_bus_socket"
        );
        assert!(matches!(
            socket_path("tcp:host=localhost,port=4711"),
            Err(DbusError::UnsupportedAddress(_))
        ));
    }

    #[test]
    fn unknown_signal_members_carry_no_body() {
        assert!(matches!(
            decode_signal_body("NameOwnerChanged", &[]),
            SignalBody::None
        ));
    }
}
