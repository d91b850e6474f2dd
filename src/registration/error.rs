//! Registration error taxonomy.

use crate::bus::BusError;

/// The shared namespace connection is unavailable.
///
/// The only failure an `acquire` caller sees as an error; startup cannot
/// proceed without a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Not connected to the bus")]
    NotConnected,

    #[error("Bus connection lost: {0}")]
    Lost(String),
}

/// Everything that can go wrong while claiming or releasing a name.
///
/// Only `Connection` leaves the registrar; the rest are logged and folded
/// into a boolean outcome.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Name '{name}' is already owned by {}", .owner.as_deref().unwrap_or("another connection"))]
    NameConflict { name: String, owner: Option<String> },

    #[error("Namespace service returned an invalid response: {0}")]
    Protocol(String),

    #[error("Failed to release name '{name}': {message}")]
    Release { name: String, message: String },
}

impl From<BusError> for RegistrationError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::NotConnected => ConnectionError::NotConnected.into(),
            BusError::Connection(msg) => ConnectionError::Lost(msg).into(),
            BusError::Protocol(msg) | BusError::Unsupported(msg) => {
                RegistrationError::Protocol(msg)
            }
        }
    }
}
