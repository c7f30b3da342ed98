//! Deposit-contract event model and the persisted cache shapes.

use serde::{Deserialize, Serialize};

use crate::eth::{Address, Gwei, Hash256, PublicKeyBytes, SignatureBytes};

/// A decoded `DepositEvent` with its BLS verification outcome pinned at
/// ingestion time. Immutable once stored; ordered by `(block_number, log_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedDepositEvent {
    pub block_number: u64,
    pub block_hash: Hash256,
    pub log_index: u32,
    pub pubkey: PublicKeyBytes,
    pub withdrawal_credentials: Hash256,
    pub amount: Gwei,
    pub signature: SignatureBytes,
    pub deposit_count: u64,
    pub deposit_data_root: Hash256,
    pub tx_hash: Hash256,
    pub valid: bool,
}

impl VerifiedDepositEvent {
    pub fn ordering_key(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }

    /// Same-block events compare by log index, otherwise by block number.
    pub fn is_earlier_than(&self, other: &Self) -> bool {
        if self.block_number == other.block_number {
            self.log_index < other.log_index
        } else {
            self.block_number < other.block_number
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DepositCacheHeaders {
    pub start_block: u64,
    pub end_block: u64,
}

/// Persisted deposit-event cache. The default value stands in for an absent
/// cache: `{ headers: {0, 0}, data: [] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepositEventCache {
    pub headers: DepositCacheHeaders,
    pub data: Vec<VerifiedDepositEvent>,
    pub last_valid_event: Option<VerifiedDepositEvent>,
}

/// A contiguous group of deposit events covering `[start_block, end_block]`.
#[derive(Debug, Clone, Default)]
pub struct DepositEventGroup {
    pub events: Vec<VerifiedDepositEvent>,
    pub start_block: u64,
    pub end_block: u64,
}

/// A decoded `SigningKeyAdded` event from a staking module registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKeyEvent {
    pub module_address: Address,
    pub operator_index: u64,
    pub pubkey: PublicKeyBytes,
    pub block_number: u64,
    pub block_hash: Hash256,
    pub log_index: u32,
}

impl SigningKeyEvent {
    pub fn ordering_key(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKeyCacheHeaders {
    pub start_block: u64,
    pub end_block: u64,
    pub module_addresses: Vec<Address>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SigningKeyEventsCache {
    pub headers: SigningKeyCacheHeaders,
    pub data: Vec<SigningKeyEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(block_number: u64, log_index: u32) -> VerifiedDepositEvent {
        VerifiedDepositEvent {
            block_number,
            block_hash: Hash256::repeat_byte(1),
            log_index,
            pubkey: PublicKeyBytes::repeat_byte(2),
            withdrawal_credentials: Hash256::repeat_byte(3),
            amount: 32_000_000_000,
            signature: SignatureBytes::repeat_byte(4),
            deposit_count: 0,
            deposit_data_root: Hash256::ZERO,
            tx_hash: Hash256::ZERO,
            valid: true,
        }
    }

    #[test]
    fn ordering_compares_log_index_within_a_block() {
        assert!(event(10, 1).is_earlier_than(&event(10, 2)));
        assert!(!event(10, 2).is_earlier_than(&event(10, 1)));
        assert!(!event(10, 1).is_earlier_than(&event(10, 1)));
    }

    #[test]
    fn ordering_compares_block_number_across_blocks() {
        assert!(event(9, 100).is_earlier_than(&event(10, 0)));
        assert!(!event(11, 0).is_earlier_than(&event(10, 100)));
    }

    #[test]
    fn absent_cache_default_is_empty_zero_range() {
        let cache = DepositEventCache::default();
        assert_eq!(cache.headers, DepositCacheHeaders { start_block: 0, end_block: 0 });
        assert!(cache.data.is_empty());
        assert!(cache.last_valid_event.is_none());
    }
}
