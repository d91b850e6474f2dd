//! nameclaim - hold a well-known name on the message bus
//!
//! Claims a service identifier exclusively on the system (or session)
//! D-Bus, keeps it for a fixed hold period, then releases it and exits.
//! A second instance started while the name is held sees the conflict and
//! exits without touching the first.

pub mod bus;
pub mod config;
pub mod process;
pub mod registration;
pub mod utils;
