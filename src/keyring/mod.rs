mod store;

pub use store::{Friend, Keyring, KeyringError};

/*
 * Keyring storage for dhtalk
 *
 * Persists the local identity and the friend table (name -> public key).
 * Friend entries are immutable once added; re-registering a name is an
 * error rather than a silent key replacement.
 */
