//! Shared configuration types and loading for the sluice binaries.

mod environment;
pub mod shared;

pub use environment::Environment;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// A secret string that can cross serde boundaries without leaking.
///
/// Deserializes from a plain string (so settings files and env vars stay
/// ordinary) but serializes and debug-prints redacted.
#[derive(Clone)]
pub struct SerializableSecretString(SecretString);

impl SerializableSecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into()))
    }
}

impl ExposeSecret<String> for SerializableSecretString {
    fn expose_secret(&self) -> &String {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for SerializableSecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SerializableSecretString(***)")
    }
}

impl From<String> for SerializableSecretString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<SerializableSecretString> for SecretString {
    fn from(value: SerializableSecretString) -> Self {
        value.0
    }
}

impl Serialize for SerializableSecretString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("***")
    }
}

impl<'de> Deserialize<'de> for SerializableSecretString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;

        Ok(Self::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_redact_in_debug_output() {
        let secret = SerializableSecretString::new("hunter2");

        assert_eq!(format!("{secret:?}"), "SerializableSecretString(***)");
        assert_eq!(secret.expose_secret(), "hunter2");
    }
}
