use crate::script::SwapScript;
use crate::swap::SwapParameters;
use crate::swap::SwapRecord;
use crate::swap::SwapRole;
use crate::Error;
use crate::ErrorContext;
use bitcoin::hashes::sha256;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::PublicKey;
use bitcoin::Address;
use bitcoin::Network;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

/// Durable key-value storage for swap records, keyed by payment hash.
///
/// Values are opaque to the store.
pub trait SwapStore: Send + Sync {
    fn get(&self, key: &[u8; 32]) -> Result<Option<Vec<u8>>, Error>;

    /// Insert `value` under `key` unless a value is already present.
    ///
    /// Returns `false`, without touching the stored value, if `key` was taken. Must not block
    /// waiting for a concurrent insert of the same key.
    fn insert_if_absent(&self, key: [u8; 32], value: Vec<u8>) -> Result<bool, Error>;

    fn values(&self) -> Result<Vec<Vec<u8>>, Error>;
}

#[derive(Debug, Default)]
pub struct InMemorySwapStore {
    records: RwLock<HashMap<[u8; 32], Vec<u8>>>,
}

impl InMemorySwapStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SwapStore for InMemorySwapStore {
    fn get(&self, key: &[u8; 32]) -> Result<Option<Vec<u8>>, Error> {
        let records = self
            .records
            .read()
            .map_err(|_| Error::store("swap store lock poisoned"))?;

        Ok(records.get(key).cloned())
    }

    fn insert_if_absent(&self, key: [u8; 32], value: Vec<u8>) -> Result<bool, Error> {
        let mut records = self
            .records
            .write()
            .map_err(|_| Error::store("swap store lock poisoned"))?;

        match records.entry(key) {
            std::collections::hash_map::Entry::Occupied(_) => Ok(false),
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(value);
                Ok(true)
            }
        }
    }

    fn values(&self) -> Result<Vec<Vec<u8>>, Error> {
        let records = self
            .records
            .read()
            .map_err(|_| Error::store("swap store lock poisoned"))?;

        Ok(records.values().cloned().collect())
    }
}

/// Maps payment hashes to swap records.
///
/// The hash is the only key. Lookups by address re-derive each record's address from its
/// parameters instead of maintaining a second index.
#[derive(Clone)]
pub struct SwapIndex {
    store: Arc<dyn SwapStore>,
    network: Network,
}

impl SwapIndex {
    pub fn new(store: Arc<dyn SwapStore>, network: Network) -> Self {
        Self { store, network }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Record a new swap. Fails with a duplicate-swap error if the hash is already taken, whether
    /// or not the stored parameters match.
    pub fn put(&self, record: &SwapRecord) -> Result<(), Error> {
        let hash = record.hash();
        let value = serde_json::to_vec(&StoredRecord::from(record)).map_err(Error::store)?;

        let inserted = self
            .store
            .insert_if_absent(hash.to_byte_array(), value)
            .with_context(|| format!("failed to store swap {hash}"))?;

        if !inserted {
            return Err(Error::duplicate_swap(format!(
                "swap with hash {hash} already exists"
            )));
        }

        tracing::debug!(%hash, address = %record.address(), "Stored swap record");

        Ok(())
    }

    pub fn get(&self, hash: &sha256::Hash) -> Result<SwapRecord, Error> {
        let value = self
            .store
            .get(hash.as_byte_array())
            .with_context(|| format!("failed to load swap {hash}"))?
            .ok_or_else(|| Error::not_found(format!("no swap with hash {hash}")))?;

        let record = self.decode(&value)?;

        if record.hash() != *hash {
            return Err(Error::store(format!(
                "record stored under {hash} belongs to swap {}",
                record.hash()
            )));
        }

        Ok(record)
    }

    pub fn contains(&self, hash: &sha256::Hash) -> Result<bool, Error> {
        let value = self
            .store
            .get(hash.as_byte_array())
            .with_context(|| format!("failed to load swap {hash}"))?;

        Ok(value.is_some())
    }

    /// Find the swap whose deposit address is `address`.
    ///
    /// Records that fail to decode are skipped, so one corrupt entry does not hide every other
    /// swap. They still fail [`SwapIndex::get`].
    pub fn find_by_address(&self, address: &Address) -> Result<SwapRecord, Error> {
        for value in self.store.values().context("failed to list swaps")? {
            let record = match self.decode(&value) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(%address, "Skipping swap record during address lookup: {e}");
                    continue;
                }
            };

            if record.address() == address {
                return Ok(record);
            }
        }

        Err(Error::not_found(format!("no swap with address {address}")))
    }

    fn decode(&self, value: &[u8]) -> Result<SwapRecord, Error> {
        let stored: StoredRecord = serde_json::from_slice(value)
            .map_err(Error::store)
            .context("corrupt swap record")?;

        let params = SwapParameters::from_parts(
            stored.hash,
            stored.client_pk,
            stored.service_pk,
            stored.lock_height,
        );
        let script = SwapScript::new(&params, self.network);

        Ok(SwapRecord::from_parts(
            params,
            script,
            stored.creation_height,
            stored.role,
        ))
    }
}

#[derive(Serialize, Deserialize)]
struct StoredRecord {
    hash: sha256::Hash,
    client_pk: PublicKey,
    service_pk: PublicKey,
    lock_height: u32,
    creation_height: u32,
    role: SwapRole,
}

impl From<&SwapRecord> for StoredRecord {
    fn from(record: &SwapRecord) -> Self {
        let params = record.params();

        Self {
            hash: params.hash(),
            client_pk: params.client_pk(),
            service_pk: params.service_pk(),
            lock_height: params.lock_height(),
            creation_height: record.creation_height(),
            role: record.role().clone(),
        }
    }
}
