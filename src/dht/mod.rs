mod client;
mod memory;
mod record;
mod remote;

pub use client::{DhtClient, DhtError, FormatError, RecordKey, KEY_KIND, RECORD_KEY_LEN};
pub use memory::MemoryDht;
pub use record::{ChatRecord, RetryPolicy, SUBKEY_COUNT};
pub use remote::RemoteDht;

/*
 * DHT record access for dhtalk
 *
 * The DHT storage network itself is an external collaborator reached
 * through the DhtClient trait. This module provides:
 *
 * 1. The client trait and the shared chat key token format
 * 2. An in-process backend for tests and loopback use
 * 3. A TCP client for an external DHT service daemon
 * 4. The two-subkey chat record with retry on transient failures
 */
