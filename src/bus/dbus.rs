//! D-Bus connection backed by zbus.
//!
//! Talks to the bus daemon's `org.freedesktop.DBus` interface for
//! `RequestName`, `ReleaseName` and `GetNameOwner`.

use async_trait::async_trait;
use enumflags2::BitFlags;
use tokio::sync::RwLock;
use tracing::{info, warn};
use zbus::fdo::{self, DBusProxy};
use zbus::names::{BusName, WellKnownName};
use zbus::Connection;

use super::{
    BusError, BusType, NameBus, Queueing, ReleaseNameReply, Replacement, RequestNameFlags,
    RequestNameReply, Result,
};

struct Session {
    connection: Connection,
    proxy: DBusProxy<'static>,
}

/// Connection to the system or session message bus.
pub struct DBusConnection {
    bus_type: BusType,
    session: RwLock<Option<Session>>,
}

impl DBusConnection {
    /// Open a connection to the given bus.
    pub async fn connect(bus_type: BusType) -> Result<Self> {
        let connection = match bus_type {
            BusType::System => Connection::system().await,
            BusType::Session => Connection::session().await,
            BusType::InProcess => {
                return Err(BusError::Unsupported(
                    "in_process is not a D-Bus bus".to_string(),
                ))
            }
        }
        .map_err(|e| BusError::Connection(e.to_string()))?;

        let proxy = DBusProxy::new(&connection)
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        info!(
            bus_type = %bus_type,
            unique_name = ?connection.unique_name().map(|n| n.to_string()),
            "Connected to D-Bus"
        );

        Ok(Self {
            bus_type,
            session: RwLock::new(Some(Session { connection, proxy })),
        })
    }
}

fn well_known(name: &str) -> Result<WellKnownName<'_>> {
    WellKnownName::try_from(name)
        .map_err(|e| BusError::Protocol(format!("invalid well-known name '{}': {}", name, e)))
}

pub(crate) fn to_dbus_flags(flags: RequestNameFlags) -> BitFlags<fdo::RequestNameFlags> {
    let mut bits = BitFlags::empty();
    if flags.replacement == Replacement::Allow {
        bits |= fdo::RequestNameFlags::AllowReplacement;
    }
    if flags.replace_existing {
        bits |= fdo::RequestNameFlags::ReplaceExisting;
    }
    if flags.queueing == Queueing::DoNotQueue {
        bits |= fdo::RequestNameFlags::DoNotQueue;
    }
    bits
}

fn map_call_error(err: fdo::Error) -> BusError {
    match err {
        fdo::Error::ZBus(zbus::Error::InputOutput(io)) => BusError::Connection(io.to_string()),
        other => BusError::Protocol(other.to_string()),
    }
}

#[async_trait]
impl NameBus for DBusConnection {
    async fn is_connected(&self) -> bool {
        self.session.read().await.is_some()
    }

    async fn unique_name(&self) -> Result<String> {
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(BusError::NotConnected)?;
        session
            .connection
            .unique_name()
            .map(|n| n.to_string())
            .ok_or(BusError::NotConnected)
    }

    async fn request_name(
        &self,
        name: &str,
        flags: RequestNameFlags,
    ) -> Result<RequestNameReply> {
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(BusError::NotConnected)?;

        let reply = session
            .proxy
            .request_name(well_known(name)?, to_dbus_flags(flags))
            .await
            .map_err(map_call_error)?;

        Ok(match reply {
            fdo::RequestNameReply::PrimaryOwner => RequestNameReply::PrimaryOwner,
            fdo::RequestNameReply::InQueue => RequestNameReply::InQueue,
            fdo::RequestNameReply::Exists => RequestNameReply::Exists,
            fdo::RequestNameReply::AlreadyOwner => RequestNameReply::AlreadyOwner,
        })
    }

    async fn release_name(&self, name: &str) -> Result<ReleaseNameReply> {
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(BusError::NotConnected)?;

        let reply = session
            .proxy
            .release_name(well_known(name)?)
            .await
            .map_err(map_call_error)?;

        Ok(match reply {
            fdo::ReleaseNameReply::Released => ReleaseNameReply::Released,
            fdo::ReleaseNameReply::NonExistent => ReleaseNameReply::NonExistent,
            fdo::ReleaseNameReply::NotOwner => ReleaseNameReply::NotOwner,
        })
    }

    async fn name_owner(&self, name: &str) -> Result<Option<String>> {
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(BusError::NotConnected)?;

        let bus_name = BusName::try_from(name)
            .map_err(|e| BusError::Protocol(format!("invalid bus name '{}': {}", name, e)))?;

        match session.proxy.get_name_owner(bus_name).await {
            Ok(owner) => Ok(Some(owner.to_string())),
            Err(fdo::Error::NameHasNoOwner(_)) => Ok(None),
            Err(e) => Err(map_call_error(e)),
        }
    }

    async fn disconnect(&self) {
        let Some(Session { connection, proxy }) = self.session.write().await.take() else {
            return;
        };
        drop(proxy);

        if let Err(e) = connection.close().await {
            warn!(bus_type = %self.bus_type, error = %e, "Error closing D-Bus connection");
        } else {
            info!(bus_type = %self.bus_type, "D-Bus connection closed");
        }
    }
}
