//! Bus connection for well-known name ownership.
//!
//! This module contains:
//! - `NameBus` trait: the namespace-service operations a registrar needs
//! - Request/release policy and reply types (D-Bus wire semantics)
//! - Bus configuration types
//! - Implementations: D-Bus (system/session via zbus), in-process namespace

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

#[cfg(feature = "dbus")]
pub mod dbus;
pub mod in_process;

#[cfg(feature = "dbus")]
pub use dbus::DBusConnection;
pub use in_process::{InProcessConnection, InProcessNamespace};


// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Not connected to the bus")]
    NotConnected,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Invalid response from namespace service: {0}")]
    Protocol(String),

    #[error("Unsupported bus type: {0}")]
    Unsupported(String),
}

/// Whether a claimant waits for a name that is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queueing {
    /// Join the owner queue and become primary owner when the name frees up.
    Queue,
    /// Fail immediately if the name is owned by someone else.
    DoNotQueue,
}

/// Whether a later claimant may take the name over from this owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replacement {
    Allow,
    Disallow,
}

/// Policy attached to a name request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestNameFlags {
    pub queueing: Queueing,
    pub replacement: Replacement,
    /// Try to take the name from a current owner that allows replacement.
    pub replace_existing: bool,
}

impl RequestNameFlags {
    /// Exclusive ownership: no queueing, no replacement, no takeover.
    pub fn exclusive() -> Self {
        Self {
            queueing: Queueing::DoNotQueue,
            replacement: Replacement::Disallow,
            replace_existing: false,
        }
    }

    pub fn with_queueing(mut self, queueing: Queueing) -> Self {
        self.queueing = queueing;
        self
    }

    pub fn with_replacement(mut self, replacement: Replacement) -> Self {
        self.replacement = replacement;
        self
    }

    pub fn with_replace_existing(mut self, replace_existing: bool) -> Self {
        self.replace_existing = replace_existing;
        self
    }
}

impl Default for RequestNameFlags {
    fn default() -> Self {
        Self::exclusive()
    }
}

/// Reply to a name request. Discriminants match the D-Bus wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestNameReply {
    /// The caller is now the primary owner.
    PrimaryOwner = 1,
    /// The name is owned elsewhere; the caller was queued.
    InQueue = 2,
    /// The name is owned elsewhere and the caller was not queued.
    Exists = 3,
    /// The caller already owned the name.
    AlreadyOwner = 4,
}

/// Reply to a name release. Discriminants match the D-Bus wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseNameReply {
    Released = 1,
    NonExistent = 2,
    NotOwner = 3,
}

/// Connection to a namespace service that arbitrates well-known names.
///
/// Implementations:
/// - `DBusConnection`: system or session D-Bus
/// - `InProcessConnection`: in-memory namespace for testing and dry runs
#[async_trait]
pub trait NameBus: Send + Sync {
    /// Whether the connection is still usable.
    async fn is_connected(&self) -> bool;

    /// Unique connection name assigned by the namespace service (e.g. `:1.42`).
    async fn unique_name(&self) -> Result<String>;

    /// Ask the namespace service for ownership of `name`.
    async fn request_name(&self, name: &str, flags: RequestNameFlags)
        -> Result<RequestNameReply>;

    /// Give up ownership of (or a queue slot for) `name`.
    async fn release_name(&self, name: &str) -> Result<ReleaseNameReply>;

    /// Unique name of the current primary owner, if any.
    async fn name_owner(&self, name: &str) -> Result<Option<String>>;

    /// Close the connection. Names it owns are dropped by the namespace.
    async fn disconnect(&self);
}

// ============================================================================
// Configuration
// ============================================================================

/// Bus type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusType {
    /// System-wide message bus.
    #[default]
    System,
    /// Per-login-session message bus.
    Session,
    /// In-memory namespace private to this process.
    InProcess,
}

impl fmt::Display for BusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BusType::System => "system",
            BusType::Session => "session",
            BusType::InProcess => "in_process",
        };
        f.write_str(s)
    }
}

/// Bus configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Bus type discriminator.
    #[serde(rename = "type")]
    pub bus_type: BusType,
}

// ============================================================================
// Factory
// ============================================================================

/// Connect to the bus described by `config`.
///
/// The D-Bus types require the `dbus` feature (included in default).
pub async fn connect(config: &BusConfig) -> Result<Arc<dyn NameBus>> {
    match config.bus_type {
        BusType::System | BusType::Session => {
            #[cfg(feature = "dbus")]
            {
                let bus = DBusConnection::connect(config.bus_type).await?;
                info!(bus_type = %config.bus_type, "Bus connection established");
                Ok(Arc::new(bus))
            }

            #[cfg(not(feature = "dbus"))]
            {
                Err(BusError::Unsupported(format!(
                    "{} bus requires the 'dbus' feature. Rebuild with --features dbus",
                    config.bus_type
                )))
            }
        }
        BusType::InProcess => {
            let bus = InProcessNamespace::new().connect();
            info!(bus_type = %config.bus_type, "Bus connection established");
            Ok(Arc::new(bus))
        }
    }
}
