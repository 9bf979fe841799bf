use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Version tag carried by shared chat key tokens.
pub const KEY_KIND: &str = "VLD0";

/// Raw width of a record key, in bytes.
pub const RECORD_KEY_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum DhtError {
    #[error("Record creation failed: {0}")]
    RecordCreation(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Read failed: {0}")]
    Read(String),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Invalid subkey index: {0}")]
    InvalidSubkey(u32),
}

impl DhtError {
    /// Transient service failures are the only retryable class.
    pub fn is_transient(&self) -> bool {
        matches!(self, DhtError::Read(_) | DhtError::Write(_))
    }
}

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Unknown chat key prefix: {0}")]
    UnknownPrefix(String),

    #[error("Malformed chat key token: {0}")]
    MalformedToken(String),

    #[error("Invalid record key length: expected {RECORD_KEY_LEN} bytes, got {0}")]
    InvalidLength(usize),
}

/// Opaque identifier of a record on the DHT service.
///
/// Serialized as `VLD0:<hex>` for out-of-band sharing; the prefix is a
/// format version tag and unknown prefixes are rejected up front.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey([u8; RECORD_KEY_LEN]);

impl RecordKey {
    pub fn from_bytes(bytes: [u8; RECORD_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; RECORD_KEY_LEN] {
        &self.0
    }

    /// Encodes the key as a prefixed token for out-of-band sharing.
    pub fn to_token(&self) -> String {
        format!("{}:{}", KEY_KIND, hex::encode(self.0))
    }

    /// Parses a shared chat key token. Must fail before any network call.
    pub fn from_token(token: &str) -> Result<Self, FormatError> {
        let (prefix, body) = token
            .trim()
            .split_once(':')
            .ok_or_else(|| FormatError::MalformedToken("missing prefix".to_string()))?;

        if prefix != KEY_KIND {
            return Err(FormatError::UnknownPrefix(prefix.to_string()));
        }

        let bytes = hex::decode(body).map_err(|e| FormatError::MalformedToken(e.to_string()))?;
        let raw: [u8; RECORD_KEY_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| FormatError::InvalidLength(bytes.len()))?;

        Ok(Self(raw))
    }
}

impl fmt::Debug for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordKey({}...)", hex::encode(&self.0[0..4]))
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_token())
    }
}

/// Client interface to the external DHT record service.
///
/// The service offers last-write-wins per subkey and nothing more: no
/// compare-and-swap, no versioning, no delivery guarantees. Everything the
/// chat protocol needs beyond that is built on top.
#[async_trait]
pub trait DhtClient: Send + Sync {
    /// Allocates a new record with the given number of subkeys.
    async fn create_record(&self, subkey_count: u32) -> Result<RecordKey, DhtError>;

    /// Attaches to an existing record; returns its subkey count.
    async fn open_record(&self, key: &RecordKey) -> Result<u32, DhtError>;

    /// Unconditionally overwrites a subkey's value.
    async fn set_subkey(&self, key: &RecordKey, subkey: u32, value: Vec<u8>)
        -> Result<(), DhtError>;

    /// Returns the latest stored value, or None if nothing was written yet.
    async fn get_subkey(&self, key: &RecordKey, subkey: u32) -> Result<Option<Vec<u8>>, DhtError>;

    /// Releases the local handle on a record.
    async fn close_record(&self, key: &RecordKey) -> Result<(), DhtError>;

    /// Removes the record from the service.
    async fn delete_record(&self, key: &RecordKey) -> Result<(), DhtError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_roundtrip() {
        let key = RecordKey::from_bytes([7u8; RECORD_KEY_LEN]);

        let token = key.to_token();
        assert!(token.starts_with("VLD0:"));

        let parsed = RecordKey::from_token(&token).expect("Failed to parse token");
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_unknown_prefix_rejected() {
        let token = format!("VLD9:{}", hex::encode([0u8; RECORD_KEY_LEN]));

        let result = RecordKey::from_token(&token);
        assert!(matches!(result, Err(FormatError::UnknownPrefix(p)) if p == "VLD9"));
    }

    #[test]
    fn test_missing_prefix_rejected() {
        let result = RecordKey::from_token(&hex::encode([0u8; RECORD_KEY_LEN]));
        assert!(matches!(result, Err(FormatError::MalformedToken(_))));
    }

    #[test]
    fn test_wrong_length_rejected() {
        let token = format!("VLD0:{}", hex::encode([0u8; 8]));
        assert!(matches!(
            RecordKey::from_token(&token),
            Err(FormatError::InvalidLength(8))
        ));
    }

    #[test]
    fn test_transient_classification() {
        assert!(DhtError::Read("timeout".to_string()).is_transient());
        assert!(DhtError::Write("timeout".to_string()).is_transient());
        assert!(!DhtError::RecordNotFound("gone".to_string()).is_transient());
        assert!(!DhtError::RecordCreation("down".to_string()).is_transient());
    }
}
