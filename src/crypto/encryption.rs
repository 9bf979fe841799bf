use crate::crypto::{PublicKey, SecretKey};
use chacha20poly1305::aead::{Aead, NewAead};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::Rng;
use std::fmt;
use thiserror::Error;

/// Nonce width for XChaCha20-Poly1305.
pub const NONCE_LEN: usize = 24;

/// Poly1305 authentication tag width.
pub const TAG_LEN: usize = 16;

/// A per-message nonce. Generated fresh immediately before encryption;
/// reuse under the same secret breaks confidentiality.
pub type Nonce = [u8; NONCE_LEN];

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key agreement failed: {0}")]
    KeyAgreement(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),
}

/// Symmetric key material both parties derive independently from
/// (own secret key, peer public key).
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret {{ <redacted> }}")
    }
}

/// Derives the shared secret for a peer pair.
///
/// Deterministic and commutative: derive(a_sec, b_pub) == derive(b_sec, a_pub),
/// which is what lets both ends compute the same symmetric key without ever
/// exchanging it.
pub fn derive_shared_secret(
    local_secret: &SecretKey,
    remote_public: &PublicKey,
) -> Result<SharedSecret, CryptoError> {
    let dh = local_secret.inner().diffie_hellman(remote_public.inner());

    // An all-zero DH output means the peer key is a low-order point.
    if dh.as_bytes() == &[0u8; 32] {
        return Err(CryptoError::KeyAgreement(
            "Degenerate peer public key".to_string(),
        ));
    }

    Ok(SharedSecret(expand_secret(dh.as_bytes())))
}

/// Expands the raw DH output into the symmetric key via HKDF over HMAC-SHA256.
fn expand_secret(dh_output: &[u8]) -> [u8; 32] {
    let salt = b"dhtalk-shared-secret";
    let info = b"dhtalk-v1";

    let prk = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, salt);
    let mut ctx = ring::hmac::Context::with_key(&prk);
    ctx.update(dh_output);
    let prk = ctx.sign();

    let mut ctx =
        ring::hmac::Context::with_key(&ring::hmac::Key::new(ring::hmac::HMAC_SHA256, prk.as_ref()));
    ctx.update(info);
    ctx.update(&[1]);
    let okm = ctx.sign();

    let mut key = [0u8; 32];
    key.copy_from_slice(&okm.as_ref()[0..32]);
    key
}

/// Generates a fresh random nonce.
pub fn random_nonce() -> Nonce {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill(&mut nonce);
    nonce
}

/// Encrypts and authenticates a plaintext under (secret, nonce).
pub fn encrypt(
    plaintext: &[u8],
    secret: &SharedSecret,
    nonce: &Nonce,
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(secret.as_bytes()));

    cipher
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

/// Decrypts a ciphertext, verifying its authentication tag.
///
/// Fails when the tag does not verify (corrupted, truncated, or foreign
/// ciphertext) or when the input is too short to even contain a tag.
pub fn decrypt(
    ciphertext: &[u8],
    secret: &SharedSecret,
    nonce: &Nonce,
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::Decryption("Ciphertext too short".to_string()));
    }

    let cipher = XChaCha20Poly1305::new(Key::from_slice(secret.as_bytes()));

    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|e| CryptoError::Decryption(e.to_string()))
}

/// Encrypts a plaintext with a fresh nonce and frames it for a subkey write:
/// `nonce || ciphertext+tag`. No length field is needed; the nonce width is
/// fixed and known to both ends.
pub fn seal(plaintext: &[u8], secret: &SharedSecret) -> Result<Vec<u8>, CryptoError> {
    let nonce = random_nonce();
    let ciphertext = encrypt(plaintext, secret, &nonce)?;

    let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&ciphertext);

    Ok(payload)
}

/// Splits and decrypts a `nonce || ciphertext` payload read from a subkey.
pub fn open(payload: &[u8], secret: &SharedSecret) -> Result<Vec<u8>, CryptoError> {
    if payload.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Decryption("Payload too short".to_string()));
    }

    let nonce: Nonce = payload[0..NONCE_LEN]
        .try_into()
        .map_err(|_| CryptoError::Decryption("Malformed nonce".to_string()))?;

    decrypt(&payload[NONCE_LEN..], secret, &nonce)
}
