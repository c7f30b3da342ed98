//! Windowed retrieval of `DepositEvent` logs with BLS verification pinned at
//! ingestion.

use lido_council_shared::bls;
use lido_council_shared::deposit::{DepositEventGroup, VerifiedDepositEvent};
use lido_council_shared::deposit_tree::form_deposit_node;
use lido_council_shared::eth::{Address, ForkVersion, Hash256};

use crate::consts::DEPOSIT_EVENTS_STEP;
use crate::eth_client::{ContractError, DepositLog, FallOverProvider};

use super::DepositsError;

pub struct DepositEventsFetcher {
    providers: FallOverProvider,
    deposit_contract: Address,
    fork_version: ForkVersion,
    step: u64,
}

impl DepositEventsFetcher {
    pub fn new(providers: FallOverProvider, deposit_contract: Address, fork_version: ForkVersion) -> Self {
        Self {
            providers,
            deposit_contract,
            fork_version,
            step: DEPOSIT_EVENTS_STEP,
        }
    }

    fn verify_event(&self, log: DepositLog) -> Result<VerifiedDepositEvent, DepositsError> {
        let deposit_data_root = form_deposit_node(
            log.pubkey.as_slice(),
            log.withdrawal_credentials.as_slice(),
            log.signature.as_slice(),
            log.amount,
        )
        .map_err(DepositsError::MalformedDepositData)?;

        // A deposit is checked against its own withdrawal credential: only
        // signatures the beacon chain would accept can claim a pubkey.
        let valid = bls::verify_deposit_signature(
            &log.pubkey,
            log.withdrawal_credentials,
            log.amount,
            &log.signature,
            self.fork_version,
        );

        Ok(VerifiedDepositEvent {
            block_number: log.block_number,
            block_hash: log.block_hash,
            log_index: log.log_index,
            pubkey: log.pubkey,
            withdrawal_credentials: log.withdrawal_credentials,
            amount: log.amount,
            signature: log.signature,
            deposit_count: log.deposit_count,
            deposit_data_root: Hash256::from(deposit_data_root),
            tx_hash: log.tx_hash,
            valid,
        })
    }

    /// Fetches `[from_block, to_block]` in `DEPOSIT_EVENTS_STEP` windows,
    /// rotating RPC endpoints on failure. Events come back verified and
    /// ordered by `(block_number, log_index)`.
    pub async fn fetch_events_fall_over(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<DepositEventGroup, DepositsError> {
        let mut events = Vec::new();
        for (window_start, window_end) in block_windows(from_block, to_block, self.step) {
            let logs = self
                .providers
                .fetch_deposit_logs(self.deposit_contract, window_start, window_end)
                .await?;
            tracing::debug!(
                from = window_start,
                to = window_end,
                count = logs.len(),
                "Fetched deposit events window"
            );
            for log in logs {
                events.push(self.verify_event(log)?);
            }
        }

        Ok(DepositEventGroup {
            events,
            start_block: from_block,
            end_block: to_block,
        })
    }

    pub async fn get_block_hash(&self, block_number: u64) -> Result<Hash256, ContractError> {
        self.providers.get_block_hash(block_number).await
    }
}

/// Splits an inclusive block range into inclusive windows of at most `step`
/// blocks.
fn block_windows(from_block: u64, to_block: u64, step: u64) -> Vec<(u64, u64)> {
    let mut windows = Vec::new();
    let mut window_start = from_block;
    while window_start <= to_block {
        let window_end = to_block.min(window_start + step - 1);
        windows.push((window_start, window_end));
        window_start = window_end + 1;
    }
    windows
}
