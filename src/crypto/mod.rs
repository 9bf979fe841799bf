mod encryption;
mod keys;

pub use encryption::{
    decrypt, derive_shared_secret, encrypt, open, random_nonce, seal, CryptoError, Nonce,
    SharedSecret, NONCE_LEN, TAG_LEN,
};
pub use keys::{KeyError, KeyPair, PublicKey, SecretKey, KEY_LEN};

/*
 * Cryptography module for dhtalk
 *
 * This module handles all cryptographic operations including:
 * - X25519 key pair generation and encoding
 * - Shared secret derivation (Diffie-Hellman + HKDF expansion)
 * - Authenticated message encryption with XChaCha20-Poly1305
 * - Nonce generation and the nonce||ciphertext wire framing
 */
