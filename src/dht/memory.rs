use crate::dht::client::{DhtClient, DhtError, RecordKey, RECORD_KEY_LEN};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-process DHT backend.
///
/// Clones share storage, so two sessions holding clones of the same
/// `MemoryDht` see each other's writes. Used by the test suite and the
/// local loopback mode.
#[derive(Clone, Default)]
pub struct MemoryDht {
    records: Arc<RwLock<HashMap<RecordKey, Vec<Option<Vec<u8>>>>>>,
}

impl MemoryDht {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DhtClient for MemoryDht {
    async fn create_record(&self, subkey_count: u32) -> Result<RecordKey, DhtError> {
        let mut raw = [0u8; RECORD_KEY_LEN];
        rand::thread_rng().fill(&mut raw);
        let key = RecordKey::from_bytes(raw);

        let mut records = self.records.write().await;
        records.insert(key, vec![None; subkey_count as usize]);

        Ok(key)
    }

    async fn open_record(&self, key: &RecordKey) -> Result<u32, DhtError> {
        let records = self.records.read().await;

        match records.get(key) {
            Some(subkeys) => Ok(subkeys.len() as u32),
            None => Err(DhtError::RecordNotFound(key.to_token())),
        }
    }

    async fn set_subkey(
        &self,
        key: &RecordKey,
        subkey: u32,
        value: Vec<u8>,
    ) -> Result<(), DhtError> {
        let mut records = self.records.write().await;

        let subkeys = records
            .get_mut(key)
            .ok_or_else(|| DhtError::RecordNotFound(key.to_token()))?;

        let slot = subkeys
            .get_mut(subkey as usize)
            .ok_or(DhtError::InvalidSubkey(subkey))?;

        // Last write wins, previous value is gone.
        *slot = Some(value);

        Ok(())
    }

    async fn get_subkey(&self, key: &RecordKey, subkey: u32) -> Result<Option<Vec<u8>>, DhtError> {
        let records = self.records.read().await;

        let subkeys = records
            .get(key)
            .ok_or_else(|| DhtError::RecordNotFound(key.to_token()))?;

        let slot = subkeys
            .get(subkey as usize)
            .ok_or(DhtError::InvalidSubkey(subkey))?;

        Ok(slot.clone())
    }

    async fn close_record(&self, _key: &RecordKey) -> Result<(), DhtError> {
        // Nothing to release in-process; records outlive handles.
        Ok(())
    }

    async fn delete_record(&self, key: &RecordKey) -> Result<(), DhtError> {
        let mut records = self.records.write().await;
        records.remove(key);
        Ok(())
    }
}
