use crate::crypto::{KeyPair, PublicKey};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const SELF_KEY: &[u8] = b"self";

#[derive(Error, Debug)]
pub enum KeyringError {
    #[error("Keyring database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Keyring serialization error: {0}")]
    Serialization(String),

    #[error("Friend already registered: {0}")]
    DuplicateFriend(String),
}

/// A registered peer: a name bound to a public key, immutable once added.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Friend {
    pub name: String,
    pub public_key: PublicKey,
}

/// Persistent store for the local key pair and the friend table.
///
/// Passed into session construction explicitly so sessions stay
/// independently testable; nothing here is process-wide.
pub struct Keyring {
    own: sled::Tree,
    friends: sled::Tree,
}

impl Keyring {
    /// Opens (or creates) the keyring database at `path`.
    pub fn open(path: &Path) -> Result<Self, KeyringError> {
        let db = sled::open(path)?;

        Ok(Self {
            own: db.open_tree("self")?,
            friends: db.open_tree("friends")?,
        })
    }

    /// Persists the local key pair, replacing any previous one.
    pub fn store_self(&self, keypair: &KeyPair) -> Result<(), KeyringError> {
        let encoded = bincode::serialize(keypair)
            .map_err(|e| KeyringError::Serialization(e.to_string()))?;

        self.own.insert(SELF_KEY, encoded)?;
        self.own.flush()?;

        Ok(())
    }

    /// Loads the local key pair, if one was generated.
    pub fn load_self(&self) -> Result<Option<KeyPair>, KeyringError> {
        match self.own.get(SELF_KEY)? {
            Some(encoded) => {
                let keypair = bincode::deserialize(&encoded)
                    .map_err(|e| KeyringError::Serialization(e.to_string()))?;
                Ok(Some(keypair))
            }
            None => Ok(None),
        }
    }

    /// Registers a friend's public key under a case-sensitive name.
    pub fn add_friend(&self, name: &str, public_key: &PublicKey) -> Result<(), KeyringError> {
        if self.friends.contains_key(name.as_bytes())? {
            return Err(KeyringError::DuplicateFriend(name.to_string()));
        }

        let friend = Friend {
            name: name.to_string(),
            public_key: *public_key,
        };
        let encoded = bincode::serialize(&friend)
            .map_err(|e| KeyringError::Serialization(e.to_string()))?;

        self.friends.insert(name.as_bytes(), encoded)?;
        self.friends.flush()?;

        Ok(())
    }

    /// Looks up a friend's public key by name.
    pub fn friend_key(&self, name: &str) -> Result<Option<PublicKey>, KeyringError> {
        match self.friends.get(name.as_bytes())? {
            Some(encoded) => {
                let friend: Friend = bincode::deserialize(&encoded)
                    .map_err(|e| KeyringError::Serialization(e.to_string()))?;
                Ok(Some(friend.public_key))
            }
            None => Ok(None),
        }
    }

    /// All registered friends, sorted by name.
    pub fn friends(&self) -> Result<Vec<Friend>, KeyringError> {
        let mut result = Vec::new();

        for entry in self.friends.iter() {
            let (_, encoded) = entry?;
            let friend: Friend = bincode::deserialize(&encoded)
                .map_err(|e| KeyringError::Serialization(e.to_string()))?;
            result.push(friend);
        }

        // sled iterates in key order, which is already name order.
        Ok(result)
    }

    /// Wipes the local key pair and all friends.
    pub fn delete_all(&self) -> Result<(), KeyringError> {
        self.own.clear()?;
        self.friends.clear()?;
        self.own.flush()?;
        self.friends.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_keyring() -> (tempfile::TempDir, Keyring) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let keyring = Keyring::open(&dir.path().join("keyring")).expect("Failed to open keyring");
        (dir, keyring)
    }

    #[test]
    fn test_self_key_roundtrip() {
        let (_dir, keyring) = temp_keyring();
        assert!(keyring.load_self().unwrap().is_none());

        let keypair = KeyPair::generate();
        keyring.store_self(&keypair).unwrap();

        let loaded = keyring.load_self().unwrap().expect("Self key missing");
        assert_eq!(loaded.public, keypair.public);
    }

    #[test]
    fn test_add_and_lookup_friend() {
        let (_dir, keyring) = temp_keyring();
        let bob = KeyPair::generate();

        keyring.add_friend("bob", &bob.public).unwrap();

        assert_eq!(keyring.friend_key("bob").unwrap(), Some(bob.public));
        assert_eq!(keyring.friend_key("alice").unwrap(), None);
    }

    #[test]
    fn test_friend_names_are_case_sensitive() {
        let (_dir, keyring) = temp_keyring();
        let bob = KeyPair::generate();

        keyring.add_friend("Bob", &bob.public).unwrap();

        assert_eq!(keyring.friend_key("bob").unwrap(), None);
        assert_eq!(keyring.friend_key("Bob").unwrap(), Some(bob.public));
    }

    #[test]
    fn test_duplicate_friend_rejected() {
        let (_dir, keyring) = temp_keyring();
        let bob = KeyPair::generate();
        let impostor = KeyPair::generate();

        keyring.add_friend("bob", &bob.public).unwrap();

        let result = keyring.add_friend("bob", &impostor.public);
        assert!(matches!(result, Err(KeyringError::DuplicateFriend(n)) if n == "bob"));

        // The original binding is untouched.
        assert_eq!(keyring.friend_key("bob").unwrap(), Some(bob.public));
    }

    #[test]
    fn test_friends_sorted_by_name() {
        let (_dir, keyring) = temp_keyring();

        for name in ["carol", "alice", "bob"] {
            keyring.add_friend(name, &KeyPair::generate().public).unwrap();
        }

        let names: Vec<String> = keyring
            .friends()
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_delete_all() {
        let (_dir, keyring) = temp_keyring();

        keyring.store_self(&KeyPair::generate()).unwrap();
        keyring.add_friend("bob", &KeyPair::generate().public).unwrap();

        keyring.delete_all().unwrap();

        assert!(keyring.load_self().unwrap().is_none());
        assert!(keyring.friends().unwrap().is_empty());
    }
}
