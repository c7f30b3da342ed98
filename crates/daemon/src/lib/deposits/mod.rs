//! Deposit-event indexing: windowed fetching, Merkle integrity checking and
//! the persistent verified-event cache behind one service.

pub mod fetcher;
pub mod integrity;

use std::sync::Arc;

use lido_council_shared::deposit::{DepositCacheHeaders, DepositEventGroup};
use lido_council_shared::deposit_tree;
use lido_council_shared::eth::Hash256;
use thiserror::Error;

use crate::eth_client::{ContractError, DefaultProvider, DepositContractWrapper};
use crate::prometheus_metrics;
use crate::storage::{CacheStorage, StorageError};

use fetcher::DepositEventsFetcher;
use integrity::DepositTreeKeeper;

#[derive(Debug, Error)]
pub enum DepositsError {
    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Malformed deposit data in event: {0}")]
    MalformedDepositData(deposit_tree::Error),

    #[error("Deposit root mismatch: computed {computed}, chain has {expected}")]
    RootMismatch { computed: Hash256, expected: Hash256 },

    #[error("Deposit cache end block {cache_end} is ahead of the chain at {current}")]
    CacheAheadOfChain { cache_end: u64, current: u64 },
}

impl DepositsError {
    /// Integrity violations abort the cycle without advancing any state;
    /// everything else is a transient fetch/storage failure.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            DepositsError::RootMismatch { .. } | DepositsError::CacheAheadOfChain { .. }
        )
    }
}

/// What the guardian loop needs from the deposit index. The concrete service
/// below talks to the chain; pipeline tests substitute a canned registry.
#[allow(async_fn_in_trait)]
pub trait DepositsRegistry {
    /// Extends the persisted cache up to `current_block` minus the finality
    /// lag, verifying the tree root against the contract on the way.
    async fn update_events_cache(&mut self, current_block: u64) -> Result<(), DepositsError>;

    /// All deposit events from the contract deployment up to
    /// `block_number`, with the non-persisted tail verified at `block_hash`.
    async fn get_all_deposited_events(
        &mut self,
        block_number: u64,
        block_hash: Hash256,
    ) -> Result<DepositEventGroup, DepositsError>;

    async fn get_deposit_root(&self, block_hash: Hash256) -> Result<Hash256, DepositsError>;
}

pub struct DepositsRegistryService {
    storage: Arc<CacheStorage>,
    fetcher: DepositEventsFetcher,
    keeper: DepositTreeKeeper,
    deposit_contract: DepositContractWrapper<DefaultProvider>,
    deployment_block: u64,
    cache_lag_blocks: u64,
    metrics: Arc<prometheus_metrics::Metrics>,
}

impl DepositsRegistryService {
    pub fn new(
        storage: Arc<CacheStorage>,
        fetcher: DepositEventsFetcher,
        deposit_contract: DepositContractWrapper<DefaultProvider>,
        deployment_block: u64,
        cache_lag_blocks: u64,
        metrics: Arc<prometheus_metrics::Metrics>,
    ) -> Self {
        Self {
            storage,
            fetcher,
            keeper: DepositTreeKeeper::new(),
            deposit_contract,
            deployment_block,
            cache_lag_blocks,
            metrics,
        }
    }

    /// Replays the persisted cache into the in-memory tree. The cached events
    /// were root-checked before being written, so no remote call is needed.
    pub fn initialize(&mut self) -> Result<(), DepositsError> {
        let cache = self.storage.get_deposit_events_cache(self.deployment_block)?;
        self.keeper.load_unchecked(&cache.data);
        tracing::info!(
            events = cache.data.len(),
            end_block = cache.headers.end_block,
            "Deposit event cache loaded"
        );
        self.metrics
            .guardian
            .deposited_events_total
            .set(self.keeper.node_count());
        self.metrics
            .guardian
            .deposit_cache_end_block
            .set(cache.headers.end_block);
        Ok(())
    }
}

impl DepositsRegistry for DepositsRegistryService {
    async fn update_events_cache(&mut self, current_block: u64) -> Result<(), DepositsError> {
        let cache = self.storage.get_deposit_events_cache(self.deployment_block)?;
        if cache.headers.end_block > current_block {
            // The RPC node went backwards; processing this view would corrupt
            // the cache.
            return Err(DepositsError::CacheAheadOfChain {
                cache_end: cache.headers.end_block,
                current: current_block,
            });
        }

        let to_block = current_block.saturating_sub(self.cache_lag_blocks);
        let from_block = if cache.headers.end_block == 0 {
            self.deployment_block
        } else {
            cache.headers.end_block + 1
        };
        if from_block > to_block {
            return Ok(());
        }

        let group = self.fetcher.fetch_events_fall_over(from_block, to_block).await?;
        let anchor_hash = self.fetcher.get_block_hash(to_block).await?;
        let expected_root = self.deposit_contract.get_deposit_root(anchor_hash).await?;

        if let Err(error) = self.keeper.apply_and_verify(&group.events, expected_root) {
            tracing::error!(
                block = to_block,
                "Deposit events integrity check failed: {error}"
            );
            self.metrics
                .guardian
                .deposit_root_mismatches
                .with_label_values(&["finalized"])
                .inc();
            return Err(error);
        }

        self.storage.insert_deposit_events_batch(
            DepositCacheHeaders {
                // already clamped to the deployment block on read
                start_block: cache.headers.start_block,
                end_block: to_block,
            },
            &group.events,
        )?;
        if let Some(last) = group.events.last() {
            self.storage.set_last_valid_deposit_event(last)?;
        }

        self.metrics
            .guardian
            .deposited_events_total
            .set(self.keeper.node_count());
        self.metrics.guardian.deposit_cache_end_block.set(to_block);
        tracing::info!(
            from = from_block,
            to = to_block,
            new_events = group.events.len(),
            "Deposit event cache updated"
        );
        Ok(())
    }

    async fn get_all_deposited_events(
        &mut self,
        block_number: u64,
        block_hash: Hash256,
    ) -> Result<DepositEventGroup, DepositsError> {
        let cache = self.storage.get_deposit_events_cache(self.deployment_block)?;

        let fresh_from = if cache.headers.end_block == 0 {
            self.deployment_block
        } else {
            cache.headers.end_block + 1
        };
        let fresh = if fresh_from <= block_number {
            self.fetcher.fetch_events_fall_over(fresh_from, block_number).await?
        } else {
            DepositEventGroup::default()
        };

        let expected_root = self.deposit_contract.get_deposit_root(block_hash).await?;
        if let Err(error) = self.keeper.verify_fresh(&fresh.events, expected_root) {
            tracing::error!(
                block = block_number,
                "Fresh deposit events integrity check failed: {error}"
            );
            self.metrics
                .guardian
                .deposit_root_mismatches
                .with_label_values(&["latest"])
                .inc();
            return Err(error);
        }

        let mut events = cache.data;
        events.extend(fresh.events);
        Ok(DepositEventGroup {
            events,
            start_block: self.deployment_block,
            end_block: block_number,
        })
    }

    async fn get_deposit_root(&self, block_hash: Hash256) -> Result<Hash256, DepositsError> {
        Ok(self.deposit_contract.get_deposit_root(block_hash).await?)
    }
}
