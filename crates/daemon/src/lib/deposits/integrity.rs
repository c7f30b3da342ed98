//! Keeps the running deposit tree in lockstep with the on-chain root.

use lido_council_shared::deposit::VerifiedDepositEvent;
use lido_council_shared::deposit_tree::DepositTree;
use lido_council_shared::eth::Hash256;

use super::DepositsError;

pub struct DepositTreeKeeper {
    tree: DepositTree,
}

impl Default for DepositTreeKeeper {
    fn default() -> Self {
        Self::new()
    }
}

impl DepositTreeKeeper {
    pub fn new() -> Self {
        Self {
            tree: DepositTree::new(),
        }
    }

    pub fn root(&self) -> Hash256 {
        Hash256::from(self.tree.root())
    }

    pub fn node_count(&self) -> u64 {
        self.tree.node_count()
    }

    /// Loads already-verified cached events into the tree; only used once at
    /// startup before the first reconciliation.
    pub fn load_unchecked(&mut self, events: &[VerifiedDepositEvent]) {
        for event in events {
            self.tree.insert(event.deposit_data_root.0);
        }
    }

    /// Applies a new event group against the expected on-chain root. The
    /// events land on a clone first, so a mismatch leaves the kept tree
    /// untouched and the whole operation idempotent across retried ticks.
    pub fn apply_and_verify(
        &mut self,
        events: &[VerifiedDepositEvent],
        expected_root: Hash256,
    ) -> Result<(), DepositsError> {
        let mut candidate = self.tree.clone();
        for event in events {
            candidate.insert(event.deposit_data_root.0);
        }
        let root = Hash256::from(candidate.root());
        if root != expected_root {
            return Err(DepositsError::RootMismatch {
                computed: root,
                expected: expected_root,
            });
        }
        self.tree = candidate;
        Ok(())
    }

    /// Checks a group of not-yet-final events against the root at the latest
    /// tag without adopting them.
    pub fn verify_fresh(
        &self,
        events: &[VerifiedDepositEvent],
        expected_root: Hash256,
    ) -> Result<(), DepositsError> {
        let mut candidate = self.tree.clone();
        for event in events {
            candidate.insert(event.deposit_data_root.0);
        }
        let root = Hash256::from(candidate.root());
        if root != expected_root {
            return Err(DepositsError::RootMismatch {
                computed: root,
                expected: expected_root,
            });
        }
        Ok(())
    }
}
