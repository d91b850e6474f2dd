//! Well-known service identifier.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Error returned when constructing an empty identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Service identifier must not be empty")]
pub struct EmptyIdentifier;

/// Well-known name a service claims on the bus, e.g. `com.example.testservice1`.
///
/// Only non-emptiness is checked here. Uniqueness and the finer naming rules
/// are the namespace service's business.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct ServiceIdentifier(String);

impl ServiceIdentifier {
    pub fn new(name: impl Into<String>) -> Result<Self, EmptyIdentifier> {
        let name = name.into();
        if name.is_empty() {
            return Err(EmptyIdentifier);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ServiceIdentifier {
    type Error = EmptyIdentifier;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::new(name)
    }
}

impl FromStr for ServiceIdentifier {
    type Err = EmptyIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ServiceIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
