use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// Length of both public and secret keys, in bytes.
pub const KEY_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Key decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid key length: expected {KEY_LEN} bytes, got {0}")]
    InvalidLength(usize),
}

/// An X25519 public key, shared out-of-band and stored in the keyring.
#[derive(Clone, Copy)]
pub struct PublicKey(X25519PublicKey);

impl PublicKey {
    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        self.0.as_bytes()
    }

    /// Creates a public key from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let raw: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidLength(bytes.len()))?;
        Ok(Self(X25519PublicKey::from(raw)))
    }

    /// Encodes the key as lowercase hex for out-of-band sharing.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Parses a hex-encoded public key.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim()).map_err(|e| KeyError::DecodingFailed(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub(crate) fn inner(&self) -> &X25519PublicKey {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", hex::encode(&self.as_bytes()[0..4]))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for PublicKey {}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.as_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = <[u8; KEY_LEN]>::deserialize(deserializer)?;
        Ok(Self(X25519PublicKey::from(raw)))
    }
}

/// An X25519 secret key. Never leaves the local process.
#[derive(Clone)]
pub struct SecretKey(StaticSecret);

impl SecretKey {
    /// Returns the raw key bytes. Only used for keyring persistence.
    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        self.0.to_bytes()
    }

    /// Creates a secret key from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let raw: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidLength(bytes.len()))?;
        Ok(Self(StaticSecret::from(raw)))
    }

    pub(crate) fn inner(&self) -> &StaticSecret {
        &self.0
    }
}

// The secret must never show up in logs or error messages.
impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey {{ <redacted> }}")
    }
}

impl Serialize for SecretKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SecretKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = <[u8; KEY_LEN]>::deserialize(deserializer)?;
        Ok(Self(StaticSecret::from(raw)))
    }
}

/// A local identity: one X25519 key pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

impl KeyPair {
    /// Generates a new random key pair.
    pub fn generate() -> Self {
        let mut seed = [0u8; KEY_LEN];
        rand::thread_rng().fill(&mut seed);

        let secret = StaticSecret::from(seed);
        let public = X25519PublicKey::from(&secret);

        Self {
            public: PublicKey(public),
            secret: SecretKey(secret),
        }
    }

    /// Rebuilds a key pair from an existing secret key.
    pub fn from_secret(secret: SecretKey) -> Self {
        let public = X25519PublicKey::from(&secret.0);
        Self {
            public: PublicKey(public),
            secret,
        }
    }
}
