//! Incremental Merkle accumulator mirroring the beacon-chain deposit contract.
//!
//! The contract stores one `branch` slot per tree level plus a node counter;
//! `get_deposit_root()` folds the branch against precomputed zero-subtree
//! hashes and mixes the deposit count into the final hash. Reproducing the
//! exact algorithm lets the daemon cross-check its indexed deposit log
//! against the on-chain root at any block.

use sha2::{Digest, Sha256};
use thiserror::Error;

pub const DEPOSIT_CONTRACT_TREE_DEPTH: usize = 32;

pub type Node = [u8; 32];

const PUBKEY_LENGTH: usize = 48;
const WITHDRAWAL_CREDENTIALS_LENGTH: usize = 32;
const SIGNATURE_LENGTH: usize = 96;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{field} must be {expected} bytes, got {actual}")]
    BadFieldLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}

fn sha256_concat(lhs: &[u8], rhs: &[u8]) -> Node {
    let mut hasher = Sha256::new();
    hasher.update(lhs);
    hasher.update(rhs);
    hasher.finalize().into()
}

/// Deposit-data leaf exactly as the contract computes `deposit_data_root`:
/// the SSZ hash tree root of `DepositData { pubkey, wc, amount, signature }`.
pub fn form_deposit_node(
    pubkey: &[u8],
    withdrawal_credentials: &[u8],
    signature: &[u8],
    amount_gwei: u64,
) -> Result<Node, Error> {
    if pubkey.len() != PUBKEY_LENGTH {
        return Err(Error::BadFieldLength {
            field: "pubkey",
            expected: PUBKEY_LENGTH,
            actual: pubkey.len(),
        });
    }
    if withdrawal_credentials.len() != WITHDRAWAL_CREDENTIALS_LENGTH {
        return Err(Error::BadFieldLength {
            field: "withdrawal_credentials",
            expected: WITHDRAWAL_CREDENTIALS_LENGTH,
            actual: withdrawal_credentials.len(),
        });
    }
    if signature.len() != SIGNATURE_LENGTH {
        return Err(Error::BadFieldLength {
            field: "signature",
            expected: SIGNATURE_LENGTH,
            actual: signature.len(),
        });
    }

    let mut pubkey_padded = [0u8; 64];
    pubkey_padded[..PUBKEY_LENGTH].copy_from_slice(pubkey);
    let pubkey_root: Node = Sha256::digest(pubkey_padded).into();

    // signature padded to 128 bytes merkleizes as two pairs of 32-byte chunks
    let signature_first: Node = Sha256::digest(&signature[..64]).into();
    let mut signature_rest = [0u8; 64];
    signature_rest[..32].copy_from_slice(&signature[64..]);
    let signature_root = sha256_concat(&signature_first, &Sha256::digest(signature_rest));

    let mut amount_node = [0u8; 32];
    amount_node[..8].copy_from_slice(&amount_gwei.to_le_bytes());

    Ok(sha256_concat(
        &sha256_concat(&pubkey_root, withdrawal_credentials),
        &sha256_concat(&amount_node, &signature_root),
    ))
}

#[derive(Clone)]
pub struct DepositTree {
    branch: [Node; DEPOSIT_CONTRACT_TREE_DEPTH],
    node_count: u64,
    zero_hashes: [Node; DEPOSIT_CONTRACT_TREE_DEPTH],
}

impl Default for DepositTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DepositTree {
    pub fn new() -> Self {
        let mut zero_hashes = [[0u8; 32]; DEPOSIT_CONTRACT_TREE_DEPTH];
        for height in 1..DEPOSIT_CONTRACT_TREE_DEPTH {
            zero_hashes[height] =
                sha256_concat(&zero_hashes[height - 1], &zero_hashes[height - 1]);
        }
        Self {
            branch: [[0u8; 32]; DEPOSIT_CONTRACT_TREE_DEPTH],
            node_count: 0,
            zero_hashes,
        }
    }

    pub fn node_count(&self) -> u64 {
        self.node_count
    }

    pub fn insert(&mut self, leaf: Node) {
        self.node_count += 1;
        let mut size = self.node_count;
        let mut node = leaf;
        for height in 0..DEPOSIT_CONTRACT_TREE_DEPTH {
            if size & 1 == 1 {
                self.branch[height] = node;
                return;
            }
            node = sha256_concat(&self.branch[height], &node);
            size >>= 1;
        }
        // The contract caps deposits at 2^32 - 1; a 64-bit counter cannot
        // legitimately walk past the last level.
        unreachable!("deposit tree is full");
    }

    pub fn root(&self) -> Node {
        let mut node = [0u8; 32];
        let mut size = self.node_count;
        for height in 0..DEPOSIT_CONTRACT_TREE_DEPTH {
            if size & 1 == 1 {
                node = sha256_concat(&self.branch[height], &node);
            } else {
                node = sha256_concat(&node, &self.zero_hashes[height]);
            }
            size >>= 1;
        }
        let mut count_mixin = [0u8; 32];
        count_mixin[..8].copy_from_slice(&self.node_count.to_le_bytes());
        sha256_concat(&node, &count_mixin)
    }
}
