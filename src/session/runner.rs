use crate::session::chat::{ChatSession, SessionError};
use log::{debug, error};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Sentinel message telling the peer the conversation is over.
pub const QUIT: &str = "QUIT";

/// What the receiver task delivers to the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum ReceivedEvent {
    /// A new message from the peer.
    Message(String),

    /// The peer sent the quit sentinel and hung up.
    PeerClosed,
}

/// Handle to a spawned receiver task with explicit stop signaling.
pub struct ReceiverHandle {
    stop: watch::Sender<bool>,
    handle: JoinHandle<Result<(), SessionError>>,
}

impl ReceiverHandle {
    /// Signals the task to stop and waits for it to finish.
    ///
    /// Safe while a poll is in flight; the task finishes its current
    /// iteration and exits. A task that ended on its own (peer quit or
    /// error) reports that result here.
    pub async fn stop(self) -> Result<(), SessionError> {
        let _ = self.stop.send(true);
        self.handle.await.unwrap_or(Ok(()))
    }
}

/// Runs send and poll concurrently over one session.
///
/// The original foreground shape alternated between reading input and
/// polling, so a message could not arrive while composing one. Here the
/// receiver runs on its own task instead, synchronized with senders only
/// through the session mutex; each direction still touches a disjoint
/// subkey.
pub struct ChatRunner {
    session: Arc<Mutex<ChatSession>>,
    poll_interval: Duration,
}

impl ChatRunner {
    pub fn new(session: ChatSession, poll_interval: Duration) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            poll_interval,
        }
    }

    /// Encrypts and publishes one message.
    pub async fn send(&self, text: &str) -> Result<(), SessionError> {
        self.session.lock().await.send(text).await
    }

    /// Tells the peer the conversation is over.
    pub async fn send_quit(&self) -> Result<(), SessionError> {
        self.send(QUIT).await
    }

    /// Spawns the polling task. New messages arrive on `events`; the task
    /// ends when stopped, when the peer quits, or on a surfaced error.
    pub fn spawn_receiver(&self, events: mpsc::Sender<ReceivedEvent>) -> ReceiverHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let session = Arc::clone(&self.session);
        let poll_interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => {
                        debug!("Receiver stopping");
                        return Ok(());
                    }
                    _ = ticker.tick() => {}
                }

                let polled = session.lock().await.poll_receive().await;
                match polled {
                    Ok(Some(text)) if text == QUIT => {
                        debug!("Peer closed the chat");
                        let _ = events.send(ReceivedEvent::PeerClosed).await;
                        return Ok(());
                    }
                    Ok(Some(text)) => {
                        if events.send(ReceivedEvent::Message(text)).await.is_err() {
                            // Caller dropped the channel; nothing left to do.
                            return Ok(());
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        // Decryption failures and exhausted retries are
                        // surfaced, never swallowed by the loop.
                        error!("Receive failed: {}", e);
                        return Err(e);
                    }
                }
            }
        });

        ReceiverHandle {
            stop: stop_tx,
            handle,
        }
    }

    /// Closes the underlying session.
    pub async fn close(&self) -> Result<(), SessionError> {
        self.session.lock().await.close().await
    }

    /// Closes the session and deletes the chat record.
    pub async fn close_and_delete(&self) -> Result<(), SessionError> {
        self.session.lock().await.close_and_delete().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::dht::MemoryDht;
    use crate::keyring::Keyring;
    use crate::session::chat::Role;

    async fn paired_sessions() -> (ChatSession, ChatSession, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let alice_ring = Keyring::open(&dir.path().join("alice")).unwrap();
        let bob_ring = Keyring::open(&dir.path().join("bob")).unwrap();

        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        alice_ring.add_friend("bob", &bob.public).unwrap();
        bob_ring.add_friend("alice", &alice.public).unwrap();

        let dht = MemoryDht::new();

        let mut initiator =
            ChatSession::new(Arc::new(dht.clone()), Role::Initiator, alice, "bob");
        initiator.establish_secret(&alice_ring).unwrap();
        let token = initiator.create_record().await.unwrap();

        let mut responder = ChatSession::new(Arc::new(dht), Role::Responder, bob, "alice");
        responder.establish_secret(&bob_ring).unwrap();
        responder.open_record(&token).await.unwrap();

        (initiator, responder, dir)
    }

    #[tokio::test]
    async fn test_receiver_delivers_messages() {
        let (alice, bob, _dir) = paired_sessions().await;

        let alice = ChatRunner::new(alice, Duration::from_millis(10));
        let bob = ChatRunner::new(bob, Duration::from_millis(10));

        let (tx, mut rx) = mpsc::channel(8);
        let receiver = bob.spawn_receiver(tx);

        alice.send("hello over the record").await.unwrap();

        let event = rx.recv().await.expect("Receiver dropped channel");
        assert_eq!(
            event,
            ReceivedEvent::Message("hello over the record".to_string())
        );

        receiver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_quit_sentinel_ends_receiver() {
        let (alice, bob, _dir) = paired_sessions().await;

        let alice = ChatRunner::new(alice, Duration::from_millis(10));
        let bob = ChatRunner::new(bob, Duration::from_millis(10));

        let (tx, mut rx) = mpsc::channel(8);
        let receiver = bob.spawn_receiver(tx);

        alice.send_quit().await.unwrap();

        assert_eq!(rx.recv().await, Some(ReceivedEvent::PeerClosed));
        receiver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_while_polling() {
        let (_alice, bob, _dir) = paired_sessions().await;

        let bob = ChatRunner::new(bob, Duration::from_millis(10));
        let (tx, _rx) = mpsc::channel(8);
        let receiver = bob.spawn_receiver(tx);

        // Nothing was ever sent; stopping mid-poll must be clean.
        receiver.stop().await.unwrap();
        bob.close().await.unwrap();
    }
}
