use crate::crypto::{self, CryptoError, KeyPair, SharedSecret};
use crate::dht::{ChatRecord, DhtClient, DhtError, FormatError, RecordKey, RetryPolicy};
use crate::keyring::{Keyring, KeyringError};
use log::{debug, info};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Unknown friend: {0}")]
    UnknownFriend(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Received message is not valid UTF-8")]
    InvalidText,

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Dht(#[from] DhtError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Keyring(#[from] KeyringError),
}

/// Which side of the conversation this session is. Fixed for the session
/// lifetime; decides which subkey is written and which is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Created the record and shares its key. Writes subkey 0, reads 1.
    Initiator,

    /// Opens a record created by the peer. Writes subkey 1, reads 0.
    Responder,
}

impl Role {
    pub fn send_subkey(&self) -> u32 {
        match self {
            Role::Initiator => 0,
            Role::Responder => 1,
        }
    }

    pub fn recv_subkey(&self) -> u32 {
        match self {
            Role::Initiator => 1,
            Role::Responder => 0,
        }
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, no secret derived yet.
    Created,

    /// Shared secret derived from the friend's key.
    SecretEstablished,

    /// Record bound; send and poll available.
    Active,

    /// Handle released; no further reads or writes.
    Closed,
}

/// A two-party chat session over one DHT record.
///
/// Drives the full protocol: derive the shared secret once, bind the record
/// (create as initiator, open as responder), then exchange sealed payloads
/// through the role's subkey pair. Messages are unacknowledged and each
/// subkey holds only the latest write, so a send can silently supersede a
/// message the peer never polled. That is the protocol's documented
/// limitation, not a bug to paper over here.
pub struct ChatSession {
    client: Arc<dyn DhtClient>,
    role: Role,
    keypair: KeyPair,
    peer_name: String,
    retry: RetryPolicy,
    state: SessionState,
    secret: Option<SharedSecret>,
    record: Option<ChatRecord>,
    last_seen: Option<Vec<u8>>,
}

impl ChatSession {
    pub fn new(client: Arc<dyn DhtClient>, role: Role, keypair: KeyPair, peer_name: &str) -> Self {
        Self {
            client,
            role,
            keypair,
            peer_name: peer_name.to_string(),
            retry: RetryPolicy::default(),
            state: SessionState::Created,
            secret: None,
            record: None,
            last_seen: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The shared key token, once the record is bound.
    pub fn record_token(&self) -> Option<String> {
        self.record.as_ref().map(|r| r.key().to_token())
    }

    /// Derives and caches the shared secret from the friend's keyring entry.
    ///
    /// Fails with `UnknownFriend` before touching the network when the name
    /// is not registered.
    pub fn establish_secret(&mut self, keyring: &Keyring) -> Result<(), SessionError> {
        if self.state != SessionState::Created {
            return Err(SessionError::InvalidState(
                "secret is already established".to_string(),
            ));
        }

        let peer_key = keyring
            .friend_key(&self.peer_name)?
            .ok_or_else(|| SessionError::UnknownFriend(self.peer_name.clone()))?;

        self.secret = Some(crypto::derive_shared_secret(&self.keypair.secret, &peer_key)?);
        self.state = SessionState::SecretEstablished;
        debug!("Shared secret established with {}", self.peer_name);

        Ok(())
    }

    /// Initiator: allocates the chat record and returns the token to hand
    /// to the peer out-of-band.
    pub async fn create_record(&mut self) -> Result<String, SessionError> {
        self.require(SessionState::SecretEstablished, "create_record")?;
        if self.role != Role::Initiator {
            return Err(SessionError::InvalidState(
                "only the initiator creates the record".to_string(),
            ));
        }

        let record = ChatRecord::create(self.client.clone(), self.retry.clone()).await?;
        let token = record.key().to_token();

        self.record = Some(record);
        self.state = SessionState::Active;
        info!("Chat record created: {}", token);

        Ok(token)
    }

    /// Responder: attaches to the record named by the shared key token.
    /// Token parsing fails before any network call.
    pub async fn open_record(&mut self, token: &str) -> Result<(), SessionError> {
        self.require(SessionState::SecretEstablished, "open_record")?;
        if self.role != Role::Responder {
            return Err(SessionError::InvalidState(
                "only the responder opens a shared record".to_string(),
            ));
        }

        let key = RecordKey::from_token(token)?;
        let record = ChatRecord::open(self.client.clone(), key, self.retry.clone()).await?;

        self.record = Some(record);
        self.state = SessionState::Active;
        info!("Chat record opened: {}", token.trim());

        Ok(())
    }

    /// Encrypts and publishes a message, overwriting whatever the peer has
    /// not yet read.
    pub async fn send(&self, text: &str) -> Result<(), SessionError> {
        self.require(SessionState::Active, "send")?;
        let (secret, record) = self.active_parts()?;

        let payload = crypto::seal(text.as_bytes(), secret)?;
        record
            .write_subkey(self.role.send_subkey(), &payload)
            .await?;

        Ok(())
    }

    /// Polls the peer's subkey once.
    ///
    /// Returns None while the slot is empty or unchanged since the last
    /// delivered message; the same value is never surfaced twice. A payload
    /// that fails authentication is an error the caller must see, never a
    /// silent drop.
    pub async fn poll_receive(&mut self) -> Result<Option<String>, SessionError> {
        self.require(SessionState::Active, "poll_receive")?;
        let (secret, record) = self.active_parts()?;

        let payload = match record.read_subkey(self.role.recv_subkey()).await? {
            Some(payload) => payload,
            None => return Ok(None),
        };

        if self.last_seen.as_deref() == Some(payload.as_slice()) {
            return Ok(None);
        }

        let plaintext = crypto::open(&payload, secret)?;
        let text = String::from_utf8(plaintext).map_err(|_| SessionError::InvalidText)?;

        self.last_seen = Some(payload);
        Ok(Some(text))
    }

    /// Releases the record handle. Idempotent; safe while a poll is in
    /// flight on another clone of the client.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;

        if let Some(record) = &self.record {
            record.close().await?;
        }
        debug!("Session with {} closed", self.peer_name);

        Ok(())
    }

    /// Closes the session and removes the record from the service.
    pub async fn close_and_delete(&mut self) -> Result<(), SessionError> {
        self.close().await?;

        if let Some(record) = &self.record {
            record.delete().await?;
        }

        Ok(())
    }

    fn active_parts(&self) -> Result<(&SharedSecret, &ChatRecord), SessionError> {
        match (&self.secret, &self.record) {
            (Some(secret), Some(record)) => Ok((secret, record)),
            _ => Err(SessionError::InvalidState(
                "session is not fully established".to_string(),
            )),
        }
    }

    fn require(&self, expected: SessionState, operation: &str) -> Result<(), SessionError> {
        if self.state != expected {
            return Err(SessionError::InvalidState(format!(
                "{} requires {:?}, session is {:?}",
                operation, expected, self.state
            )));
        }
        Ok(())
    }
}
