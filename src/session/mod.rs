mod chat;
mod runner;

pub use chat::{ChatSession, Role, SessionError, SessionState};
pub use runner::{ChatRunner, ReceivedEvent, ReceiverHandle, QUIT};

/*
 * Chat sessions for dhtalk
 *
 * A session pairs a local identity with one registered friend over a
 * single two-subkey DHT record:
 *
 * 1. ChatSession - the protocol state machine (secret establishment,
 *    record binding, send/poll with duplicate suppression, close)
 * 2. ChatRunner - concurrent send/poll driver with a cancellable
 *    receiver task, used by the CLI
 */
