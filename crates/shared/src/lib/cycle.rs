//! Per-cycle aggregates assembled by the guardian loop and discarded at the
//! end of the tick.

use serde::{Deserialize, Serialize};

use crate::deposit::DepositEventGroup;
use crate::eth::{Address, Hash256};
use crate::keys::RegistryKey;

/// Everything the guardian knows about one staking module within a cycle.
#[derive(Debug, Clone)]
pub struct StakingModuleData {
    pub module_id: u32,
    pub module_address: Address,
    pub nonce: u64,
    pub block_hash: Hash256,
    pub last_changed_block_hash: Hash256,
    pub unused_keys: Vec<RegistryKey>,
    pub vetted_unused_keys: Vec<RegistryKey>,
    pub duplicated_keys: Vec<RegistryKey>,
    pub front_run_keys: Vec<RegistryKey>,
    pub invalid_keys: Vec<RegistryKey>,
}

impl StakingModuleData {
    /// Any flagged key forbids deposit attestation and triggers unvetting.
    pub fn has_flagged_keys(&self) -> bool {
        !self.duplicated_keys.is_empty()
            || !self.front_run_keys.is_empty()
            || !self.invalid_keys.is_empty()
    }
}

/// Chain-wide view of a cycle, pinned to the keys-index block snapshot.
#[derive(Debug, Clone)]
pub struct BlockData {
    pub block_number: u64,
    pub block_hash: Hash256,
    pub deposit_root: Hash256,
    pub deposited_events: DepositEventGroup,
    pub guardian_address: Address,
    pub guardian_index: i64,
    pub lido_withdrawal_credentials: Hash256,
    pub security_version: u64,
    pub already_paused_deposits: bool,
    pub theft_happened: bool,
    pub wallet_balance_critical: bool,
}

/// Last observed on-chain state per module, used to gate message re-signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractsState {
    pub deposit_root: Hash256,
    pub nonce: u64,
    pub block_number: u64,
    pub last_changed_block_hash: Hash256,
}
