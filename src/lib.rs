pub mod crypto;
pub mod dht;
pub mod keyring;
pub mod session;
pub mod utils;

/*
 * dhtalk - two-party encrypted chat over a DHT record service
 *
 * The protocol in one paragraph: both parties derive the same shared
 * secret from their own X25519 secret key and the other's public key.
 * The initiator creates a DHT record with two subkeys and shares its
 * key token out-of-band; the responder opens it. Each side writes
 * XChaCha20-Poly1305 sealed messages (fresh nonce per message, framed
 * as nonce||ciphertext) to its own subkey and polls the other. Each
 * subkey holds only the latest write - there is no queue, no ack, and
 * an unread message is lost when the next one lands.
 */
