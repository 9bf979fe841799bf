use crate::dht::client::{DhtClient, DhtError, RecordKey};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Every chat record has exactly two subkeys, one per direction.
pub const SUBKEY_COUNT: u32 = 2;

/// Bounded retry with exponential backoff for transient service failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts before the error is surfaced.
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,

    /// Upper bound on the delay between retries, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 250,
            max_backoff_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// A two-subkey chat record bound to a DHT client.
///
/// Wraps the raw service API with the record lifecycle the protocol needs:
/// creation by the initiator, opening by the responder, retried subkey
/// reads/writes, and an idempotent close. Reads and writes touch disjoint
/// subkeys per direction, so the handle itself needs no lock.
pub struct ChatRecord {
    client: Arc<dyn DhtClient>,
    key: RecordKey,
    retry: RetryPolicy,
    closed: AtomicBool,
}

impl ChatRecord {
    /// Allocates a fresh record on the service. Initiator side.
    pub async fn create(client: Arc<dyn DhtClient>, retry: RetryPolicy) -> Result<Self, DhtError> {
        let key = client.create_record(SUBKEY_COUNT).await?;
        debug!("Created chat record {}", key);

        Ok(Self {
            client,
            key,
            retry,
            closed: AtomicBool::new(false),
        })
    }

    /// Attaches to a record created by the peer. Responder side.
    pub async fn open(
        client: Arc<dyn DhtClient>,
        key: RecordKey,
        retry: RetryPolicy,
    ) -> Result<Self, DhtError> {
        let subkey_count = client.open_record(&key).await?;
        if subkey_count < SUBKEY_COUNT {
            return Err(DhtError::RecordNotFound(format!(
                "record {} has {} subkeys, chat needs {}",
                key, subkey_count, SUBKEY_COUNT
            )));
        }
        debug!("Opened chat record {}", key);

        Ok(Self {
            client,
            key,
            retry,
            closed: AtomicBool::new(false),
        })
    }

    /// The record key to share out-of-band.
    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Overwrites a subkey's value, retrying transient write failures.
    pub async fn write_subkey(&self, subkey: u32, value: &[u8]) -> Result<(), DhtError> {
        if self.is_closed() {
            return Err(DhtError::Write("record is closed".to_string()));
        }

        let mut attempt = 0;
        loop {
            match self
                .client
                .set_subkey(&self.key, subkey, value.to_vec())
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        "Write to subkey {} of {} failed ({}), retrying in {:?}",
                        subkey, self.key, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reads a subkey's latest value, retrying transient read failures.
    /// Returns None while the peer has not written yet.
    pub async fn read_subkey(&self, subkey: u32) -> Result<Option<Vec<u8>>, DhtError> {
        if self.is_closed() {
            return Err(DhtError::Read("record is closed".to_string()));
        }

        let mut attempt = 0;
        loop {
            match self.client.get_subkey(&self.key, subkey).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        "Read of subkey {} of {} failed ({}), retrying in {:?}",
                        subkey, self.key, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Releases the handle. Idempotent; later reads and writes fail.
    pub async fn close(&self) -> Result<(), DhtError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Closing chat record {}", self.key);
        self.client.close_record(&self.key).await
    }

    /// Removes the record from the service entirely.
    pub async fn delete(&self) -> Result<(), DhtError> {
        self.closed.store(true, Ordering::SeqCst);
        self.client.delete_record(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::memory::MemoryDht;
    use crate::dht::client::RECORD_KEY_LEN;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Fails every get/set a fixed number of times before succeeding.
    struct FlakyDht {
        inner: MemoryDht,
        failures_left: AtomicU32,
    }

    impl FlakyDht {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryDht::new(),
                failures_left: AtomicU32::new(failures),
            }
        }

        fn trip(&self) -> bool {
            self.failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl DhtClient for FlakyDht {
        async fn create_record(&self, subkey_count: u32) -> Result<RecordKey, DhtError> {
            self.inner.create_record(subkey_count).await
        }

        async fn open_record(&self, key: &RecordKey) -> Result<u32, DhtError> {
            self.inner.open_record(key).await
        }

        async fn set_subkey(
            &self,
            key: &RecordKey,
            subkey: u32,
            value: Vec<u8>,
        ) -> Result<(), DhtError> {
            if self.trip() {
                return Err(DhtError::Write("simulated outage".to_string()));
            }
            self.inner.set_subkey(key, subkey, value).await
        }

        async fn get_subkey(
            &self,
            key: &RecordKey,
            subkey: u32,
        ) -> Result<Option<Vec<u8>>, DhtError> {
            if self.trip() {
                return Err(DhtError::Read("simulated outage".to_string()));
            }
            self.inner.get_subkey(key, subkey).await
        }

        async fn close_record(&self, key: &RecordKey) -> Result<(), DhtError> {
            self.inner.close_record(key).await
        }

        async fn delete_record(&self, key: &RecordKey) -> Result<(), DhtError> {
            self.inner.delete_record(key).await
        }
    }

    #[tokio::test]
    async fn test_create_then_open() {
        let client: Arc<dyn DhtClient> = Arc::new(MemoryDht::new());

        let record = ChatRecord::create(client.clone(), RetryPolicy::default())
            .await
            .unwrap();

        let reopened = ChatRecord::open(client, *record.key(), RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(reopened.key(), record.key());
    }

    #[tokio::test]
    async fn test_open_unknown_key_fails() {
        let client: Arc<dyn DhtClient> = Arc::new(MemoryDht::new());
        let key = RecordKey::from_bytes([3u8; RECORD_KEY_LEN]);

        let result = ChatRecord::open(client, key, RetryPolicy::default()).await;
        assert!(matches!(result, Err(DhtError::RecordNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let client: Arc<dyn DhtClient> = Arc::new(FlakyDht::new(2));
        let record = ChatRecord::create(client, RetryPolicy::default())
            .await
            .unwrap();

        // Two simulated outages, four attempts allowed: must succeed.
        record.write_subkey(0, b"persistent").await.unwrap();
        assert_eq!(
            record.read_subkey(0).await.unwrap(),
            Some(b"persistent".to_vec())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let client: Arc<dyn DhtClient> = Arc::new(FlakyDht::new(100));
        let record = ChatRecord::create(client, RetryPolicy::default())
            .await
            .unwrap();

        let result = record.write_subkey(0, b"never lands").await;
        assert!(matches!(result, Err(DhtError::Write(_))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let client: Arc<dyn DhtClient> = Arc::new(MemoryDht::new());
        let record = ChatRecord::create(client, RetryPolicy::default())
            .await
            .unwrap();

        record.close().await.unwrap();
        record.close().await.unwrap();

        assert!(record.is_closed());
        assert!(record.read_subkey(0).await.is_err());
        assert!(record.write_subkey(0, b"late").await.is_err());
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let retry = RetryPolicy::default();

        assert_eq!(retry.backoff(0), Duration::from_millis(250));
        assert_eq!(retry.backoff(1), Duration::from_millis(500));
        assert_eq!(retry.backoff(2), Duration::from_millis(1000));
        assert_eq!(retry.backoff(3), Duration::from_millis(2000));
        assert_eq!(retry.backoff(10), Duration::from_millis(2000));
    }
}
