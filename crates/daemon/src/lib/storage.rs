//! Persistent event caches on an embedded sled store.
//!
//! Two logical namespaces (sled trees): verified deposit events and
//! `SigningKeyAdded` events. Event entries sort by their big-endian composite
//! keys, so range scans return them already ordered by
//! `(block_number, log_index)`.

use std::path::Path;

use lido_council_shared::deposit::{
    DepositCacheHeaders, DepositEventCache, SigningKeyCacheHeaders, SigningKeyEvent,
    SigningKeyEventsCache, VerifiedDepositEvent,
};
use lido_council_shared::eth::Address;
use thiserror::Error;

const DEPOSIT_EVENTS_TREE: &str = "deposit_events";
const SIGNING_KEY_EVENTS_TREE: &str = "signing_key_events";

const EVENT_PREFIX: &[u8] = b"events/";
const HEADER_START_BLOCK: &[u8] = b"header/start_block";
const HEADER_END_BLOCK: &[u8] = b"header/end_block";
const HEADER_MODULES: &[u8] = b"header/modules";
const LAST_VALID_EVENT: &[u8] = b"last_valid";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("KV store error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Stored value is not decodable: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Invalid cache range: start {start} > end {end}")]
    InvalidRange { start: u64, end: u64 },
}

fn deposit_event_key(block_number: u64, log_index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(EVENT_PREFIX.len() + 12);
    key.extend_from_slice(EVENT_PREFIX);
    key.extend_from_slice(&block_number.to_be_bytes());
    key.extend_from_slice(&log_index.to_be_bytes());
    key
}

fn signing_key_event_key(module: &Address, block_number: u64, log_index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(EVENT_PREFIX.len() + 32);
    key.extend_from_slice(EVENT_PREFIX);
    key.extend_from_slice(module.as_slice());
    key.extend_from_slice(&block_number.to_be_bytes());
    key.extend_from_slice(&log_index.to_be_bytes());
    key
}

pub struct CacheStorage {
    db: sled::Db,
    deposit_events: sled::Tree,
    signing_key_events: sled::Tree,
}

impl CacheStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory store, used by tests.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        let deposit_events = db.open_tree(DEPOSIT_EVENTS_TREE)?;
        let signing_key_events = db.open_tree(SIGNING_KEY_EVENTS_TREE)?;
        Ok(Self {
            db,
            deposit_events,
            signing_key_events,
        })
    }

    fn read_u64(tree: &sled::Tree, key: &[u8]) -> Result<Option<u64>, StorageError> {
        let Some(raw) = tree.get(key)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Reads the deposit cache; an absent cache yields the empty default with
    /// `start_block` clamped to the deposit contract deployment block.
    pub fn get_deposit_events_cache(
        &self,
        deployment_block: u64,
    ) -> Result<DepositEventCache, StorageError> {
        let start_block = Self::read_u64(&self.deposit_events, HEADER_START_BLOCK)?.unwrap_or(0);
        let end_block = Self::read_u64(&self.deposit_events, HEADER_END_BLOCK)?.unwrap_or(0);

        let mut data = Vec::new();
        for entry in self.deposit_events.scan_prefix(EVENT_PREFIX) {
            let (_key, raw) = entry?;
            let event: VerifiedDepositEvent = serde_json::from_slice(&raw)?;
            data.push(event);
        }

        let last_valid_event = match self.deposit_events.get(LAST_VALID_EVENT)? {
            Some(raw) => Some(serde_json::from_slice(&raw)?),
            None => None,
        };

        Ok(DepositEventCache {
            headers: DepositCacheHeaders {
                start_block: start_block.max(deployment_block),
                end_block,
            },
            data,
            last_valid_event,
        })
    }

    /// Atomically appends a batch of verified events and moves the headers.
    pub fn insert_deposit_events_batch(
        &self,
        headers: DepositCacheHeaders,
        events: &[VerifiedDepositEvent],
    ) -> Result<(), StorageError> {
        if headers.start_block > headers.end_block {
            return Err(StorageError::InvalidRange {
                start: headers.start_block,
                end: headers.end_block,
            });
        }
        let mut batch = sled::Batch::default();
        for event in events {
            batch.insert(
                deposit_event_key(event.block_number, event.log_index),
                serde_json::to_vec(event)?,
            );
        }
        batch.insert(HEADER_START_BLOCK, serde_json::to_vec(&headers.start_block)?);
        batch.insert(HEADER_END_BLOCK, serde_json::to_vec(&headers.end_block)?);
        self.deposit_events.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn set_last_valid_deposit_event(
        &self,
        event: &VerifiedDepositEvent,
    ) -> Result<(), StorageError> {
        self.deposit_events
            .insert(LAST_VALID_EVENT, serde_json::to_vec(event)?)?;
        Ok(())
    }

    pub fn get_signing_key_events_cache(&self) -> Result<SigningKeyEventsCache, StorageError> {
        let start_block = Self::read_u64(&self.signing_key_events, HEADER_START_BLOCK)?.unwrap_or(0);
        let end_block = Self::read_u64(&self.signing_key_events, HEADER_END_BLOCK)?.unwrap_or(0);
        let module_addresses: Vec<Address> = match self.signing_key_events.get(HEADER_MODULES)? {
            Some(raw) => serde_json::from_slice(&raw)?,
            None => Vec::new(),
        };

        let mut data = Vec::new();
        for entry in self.signing_key_events.scan_prefix(EVENT_PREFIX) {
            let (_key, raw) = entry?;
            let event: SigningKeyEvent = serde_json::from_slice(&raw)?;
            data.push(event);
        }
        // Per-module prefixes interleave block ranges; order globally.
        data.sort_by_key(SigningKeyEvent::ordering_key);

        Ok(SigningKeyEventsCache {
            headers: SigningKeyCacheHeaders {
                start_block,
                end_block,
                module_addresses,
            },
            data,
        })
    }

    pub fn insert_signing_key_events_batch(
        &self,
        headers: &SigningKeyCacheHeaders,
        events: &[SigningKeyEvent],
    ) -> Result<(), StorageError> {
        if headers.start_block > headers.end_block {
            return Err(StorageError::InvalidRange {
                start: headers.start_block,
                end: headers.end_block,
            });
        }
        let mut batch = sled::Batch::default();
        for event in events {
            batch.insert(
                signing_key_event_key(&event.module_address, event.block_number, event.log_index),
                serde_json::to_vec(event)?,
            );
        }
        batch.insert(HEADER_START_BLOCK, serde_json::to_vec(&headers.start_block)?);
        batch.insert(HEADER_END_BLOCK, serde_json::to_vec(&headers.end_block)?);
        batch.insert(HEADER_MODULES, serde_json::to_vec(&headers.module_addresses)?);
        self.signing_key_events.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    /// Drops the signing-key namespace, forcing a rebuild; used when the
    /// staking module set changes.
    pub fn clear_signing_key_events(&self) -> Result<(), StorageError> {
        self.signing_key_events.clear()?;
        self.db.flush()?;
        Ok(())
    }
}
