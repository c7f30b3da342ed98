//! Persistent `SigningKeyAdded` history per staking module, used to decide
//! which copy of a duplicated pubkey was registered first.

use std::collections::HashSet;
use std::sync::Arc;

use lido_council_shared::deposit::{SigningKeyCacheHeaders, SigningKeyEvent};
use lido_council_shared::eth::{Address, PublicKeyBytes};
use thiserror::Error;

use crate::consts::DEPOSIT_EVENTS_CACHE_LAG_BLOCKS;
use crate::eth_client::{ContractError, FallOverProvider, SigningKeyAddedLog};
use crate::storage::{CacheStorage, StorageError};

#[derive(Debug, Error)]
pub enum SigningKeysError {
    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Seam for the guardian loop; the pipeline tests substitute canned events.
#[allow(async_fn_in_trait)]
pub trait SigningKeysRegistry {
    /// Brings the persisted cache up to date for the given module set.
    async fn update_events_cache(
        &mut self,
        module_addresses: &[Address],
        current_block: u64,
    ) -> Result<(), SigningKeysError>;

    /// Add-events for the given pubkeys, covering the persisted range plus a
    /// freshly fetched tail up to `current_block`.
    async fn events_for_pubkeys(
        &self,
        pubkeys: &HashSet<PublicKeyBytes>,
        current_block: u64,
    ) -> Result<Vec<SigningKeyEvent>, SigningKeysError>;
}

fn from_log(log: SigningKeyAddedLog) -> SigningKeyEvent {
    SigningKeyEvent {
        module_address: log.module_address,
        operator_index: log.operator_index,
        pubkey: log.pubkey,
        block_number: log.block_number,
        block_hash: log.block_hash,
        log_index: log.log_index,
    }
}

pub struct SigningKeyEventsCacheService {
    storage: Arc<CacheStorage>,
    providers: FallOverProvider,
    registry_deployment_block: u64,
    cache_lag_blocks: u64,
}

impl SigningKeyEventsCacheService {
    pub fn new(
        storage: Arc<CacheStorage>,
        providers: FallOverProvider,
        registry_deployment_block: u64,
    ) -> Self {
        Self {
            storage,
            providers,
            registry_deployment_block,
            cache_lag_blocks: DEPOSIT_EVENTS_CACHE_LAG_BLOCKS,
        }
    }
}

impl SigningKeysRegistry for SigningKeyEventsCacheService {
    async fn update_events_cache(
        &mut self,
        module_addresses: &[Address],
        current_block: u64,
    ) -> Result<(), SigningKeysError> {
        let cache = self.storage.get_signing_key_events_cache()?;

        let known: HashSet<&Address> = cache.headers.module_addresses.iter().collect();
        let module_set_changed = module_addresses.iter().any(|address| !known.contains(address));
        let from_block = if module_set_changed {
            if !cache.headers.module_addresses.is_empty() {
                tracing::warn!("Staking module set changed, rebuilding signing-key event cache");
            }
            self.storage.clear_signing_key_events()?;
            self.registry_deployment_block
        } else if cache.headers.end_block == 0 {
            self.registry_deployment_block
        } else {
            cache.headers.end_block + 1
        };

        let to_block = current_block.saturating_sub(self.cache_lag_blocks);
        if from_block > to_block {
            return Ok(());
        }

        let logs = self
            .providers
            .fetch_signing_key_logs(module_addresses, from_block, to_block)
            .await?;
        let events: Vec<SigningKeyEvent> = logs.into_iter().map(from_log).collect();
        tracing::info!(
            from = from_block,
            to = to_block,
            new_events = events.len(),
            "Signing-key event cache updated"
        );

        self.storage.insert_signing_key_events_batch(
            &SigningKeyCacheHeaders {
                start_block: self.registry_deployment_block,
                end_block: to_block,
                module_addresses: module_addresses.to_vec(),
            },
            &events,
        )?;
        Ok(())
    }

    async fn events_for_pubkeys(
        &self,
        pubkeys: &HashSet<PublicKeyBytes>,
        current_block: u64,
    ) -> Result<Vec<SigningKeyEvent>, SigningKeysError> {
        let cache = self.storage.get_signing_key_events_cache()?;

        let fresh_from = if cache.headers.end_block == 0 {
            self.registry_deployment_block
        } else {
            cache.headers.end_block + 1
        };
        let mut events: Vec<SigningKeyEvent> =
            cache.data.into_iter().filter(|event| pubkeys.contains(&event.pubkey)).collect();

        if fresh_from <= current_block && !cache.headers.module_addresses.is_empty() {
            let fresh = self
                .providers
                .fetch_signing_key_logs(&cache.headers.module_addresses, fresh_from, current_block)
                .await?;
            events.extend(
                fresh
                    .into_iter()
                    .map(from_log)
                    .filter(|event| pubkeys.contains(&event.pubkey)),
            );
        }

        events.sort_by_key(SigningKeyEvent::ordering_key);
        Ok(events)
    }
}
