//! Decides whether a new block cycle needs processing at all, and whether an
//! unchanged contract state is still within its re-signing window.

use std::collections::HashMap;
use std::sync::Mutex;

use lido_council_shared::cycle::ContractsState;
use lido_council_shared::eth::Hash256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateMeta {
    pub block_number: u64,
    pub block_hash: Hash256,
}

/// Tracks the last fully processed block. Updated only after a successful
/// cycle, so a failed tick is retried on the next schedule.
#[derive(Default)]
pub struct BlockGuard {
    last_processed: Mutex<Option<StateMeta>>,
}

impl BlockGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_need_to_process_new_state(&self, meta: StateMeta) -> bool {
        let last = self.last_processed.lock().expect("block guard lock poisoned");
        match *last {
            None => true,
            Some(previous) => {
                meta.block_number > previous.block_number && meta.block_hash != previous.block_hash
            }
        }
    }

    pub fn set_last_processed_state_meta(&self, meta: StateMeta) {
        let mut last = self.last_processed.lock().expect("block guard lock poisoned");
        *last = Some(meta);
    }

    pub fn last_processed(&self) -> Option<StateMeta> {
        *self.last_processed.lock().expect("block guard lock poisoned")
    }
}

/// Per-module gate on deposit message re-signing: an unchanged
/// `{deposit_root, nonce, last_changed_block_hash}` is only re-signed when
/// the block number crosses into a new signing window.
pub struct StateChangeDetector {
    resigning_blocks: u64,
    states: Mutex<HashMap<u32, ContractsState>>,
}

impl StateChangeDetector {
    pub fn new(resigning_blocks: u64) -> Self {
        Self {
            resigning_blocks,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// `true` when the module state matches the previously signed one and the
    /// current block is still in the same re-signing window.
    pub fn is_same_contracts_state(&self, module_id: u32, current: &ContractsState) -> bool {
        let states = self.states.lock().expect("contracts state lock poisoned");
        let Some(previous) = states.get(&module_id) else {
            return false;
        };
        previous.deposit_root == current.deposit_root
            && previous.nonce == current.nonce
            && previous.last_changed_block_hash == current.last_changed_block_hash
            && previous.block_number / self.resigning_blocks == current.block_number / self.resigning_blocks
    }

    pub fn set_contracts_state(&self, module_id: u32, state: ContractsState) {
        let mut states = self.states.lock().expect("contracts state lock poisoned");
        states.insert(module_id, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(block_number: u64, byte: u8) -> StateMeta {
        StateMeta {
            block_number,
            block_hash: Hash256::repeat_byte(byte),
        }
    }

    fn state(block_number: u64, nonce: u64) -> ContractsState {
        ContractsState {
            deposit_root: Hash256::repeat_byte(7),
            nonce,
            block_number,
            last_changed_block_hash: Hash256::repeat_byte(8),
        }
    }

    #[test]
    fn first_block_is_always_processed() {
        let guard = BlockGuard::new();
        assert!(guard.is_need_to_process_new_state(meta(1, 1)));
    }

    #[test]
    fn repeated_or_older_blocks_are_skipped() {
        let guard = BlockGuard::new();
        guard.set_last_processed_state_meta(meta(10, 1));

        assert!(!guard.is_need_to_process_new_state(meta(10, 1)), "same block");
        assert!(!guard.is_need_to_process_new_state(meta(9, 2)), "older block");
        assert!(!guard.is_need_to_process_new_state(meta(11, 1)), "same hash");
        assert!(guard.is_need_to_process_new_state(meta(11, 2)));
    }

    #[test]
    fn unchanged_state_in_one_window_is_same() {
        let detector = StateChangeDetector::new(10);
        detector.set_contracts_state(1, state(20, 5));

        assert!(detector.is_same_contracts_state(1, &state(29, 5)));
        // next window forces a re-sign even with identical contract values
        assert!(!detector.is_same_contracts_state(1, &state(30, 5)));
    }

    #[test]
    fn any_contract_value_change_requires_resigning() {
        let detector = StateChangeDetector::new(10);
        detector.set_contracts_state(1, state(20, 5));

        assert!(!detector.is_same_contracts_state(1, &state(21, 6)), "nonce changed");

        let mut changed_root = state(21, 5);
        changed_root.deposit_root = Hash256::repeat_byte(9);
        assert!(!detector.is_same_contracts_state(1, &changed_root));

        assert!(!detector.is_same_contracts_state(2, &state(21, 5)), "unseen module");
    }
}
