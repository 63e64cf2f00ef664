use std::sync::Arc;

use bluetalk_dbus::{decode_managed_objects, Arg, CallBody, Connection, ObjectPath};

use crate::{BluezError, ADAPTER_IFACE, ADAPTER_PREFIX, BLUEZ_DEST, BLUEZ_ROOT, OBJECT_MANAGER_IFACE};

/// A BlueZ adapter node (`/org/bluez/hciN`).
#[derive(Clone)]
pub struct Adapter {
    conn: Arc<Connection>,
    path: ObjectPath,
}

impl Adapter {
    /// Picks the first adapter the object manager exposes.
    pub async fn default_adapter(conn: &Arc<Connection>) -> Result<Adapter, BluezError> {
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

        // Adapter nodes sit directly under /org/bluez (exactly two slashes).
        let mut adapters: Vec<&ObjectPath> = objects
            .keys()
            .filter(|p| {
                p.as_str().starts_with(ADAPTER_PREFIX)
                    && p.as_str().matches('/').count() == 2
            })
            .collect();
        adapters.sort_by_key(|p| p.as_str().to_owned());

        let path = adapters.first().ok_or(BluezError::AdapterMissing)?;
        Ok(Adapter {
            conn: conn.clone(),
            path: (*path).clone(),
        })
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Restricts discovery to LE transport, optionally to one service UUID.
    pub async fn set_discovery_filter(&self, uuid: Option<&str>) -> Result<(), BluezError> {
        let mut filter = vec![("Transport".to_owned(), Arg::Str("le".to_owned()))];
        if let Some(uuid) = uuid {
            filter.push(("UUIDs".to_owned(), Arg::StrArray(vec![uuid.to_owned()])));
        }
        self.conn
            .call(
                BLUEZ_DEST,
                self.path.as_str(),
                ADAPTER_IFACE,
                "SetDiscoveryFilter",
                CallBody::Dict(filter),
            )
            .await?;
        Ok(())
    }

    pub async fn start_discovery(&self) -> Result<(), BluezError> {
        self.conn
            .call(
                BLUEZ_DEST,
                self.path.as_str(),
                ADAPTER_IFACE,
                "StartDiscovery",
                CallBody::Empty,
            )
            .await?;
        Ok(())
    }

    pub async fn stop_discovery(&self) -> Result<(), BluezError> {
        self.conn
            .call(
                BLUEZ_DEST,
                self.path.as_str(),
                ADAPTER_IFACE,
                "StopDiscovery",
                CallBody::Empty,
            )
            .await?;
        Ok(())
    }
}
