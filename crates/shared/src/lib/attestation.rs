//! Hashes of the messages guardians sign, matching the ABI encodings the
//! deposit security module verifies on-chain.

use alloy_primitives::{keccak256, Bytes, U256};
use alloy_sol_types::SolValue;

use crate::eth::Hash256;

/// `keccak256(abi.encode(prefix, blockNumber, blockHash, depositRoot,
/// stakingModuleId, keysOpIndex))`
pub fn deposit_message_hash(
    prefix: Hash256,
    block_number: u64,
    block_hash: Hash256,
    deposit_root: Hash256,
    staking_module_id: u32,
    keys_op_index: u64,
) -> Hash256 {
    let encoded = (
        prefix,
        U256::from(block_number),
        block_hash,
        deposit_root,
        U256::from(staking_module_id),
        U256::from(keys_op_index),
    )
        .abi_encode_params();
    keccak256(&encoded)
}

/// `keccak256(abi.encode(prefix, blockNumber, stakingModuleId))`
pub fn pause_message_hash_v2(prefix: Hash256, block_number: u64, staking_module_id: u32) -> Hash256 {
    let encoded = (prefix, U256::from(block_number), U256::from(staking_module_id)).abi_encode_params();
    keccak256(&encoded)
}

/// `keccak256(abi.encode(prefix, blockNumber))`
pub fn pause_message_hash_v3(prefix: Hash256, block_number: u64) -> Hash256 {
    let encoded = (prefix, U256::from(block_number)).abi_encode_params();
    keccak256(&encoded)
}

/// `keccak256(abi.encode(prefix, blockNumber, blockHash, stakingModuleId,
/// nonce, operatorIds, vettedKeysByOperator))`
pub fn unvet_message_hash(
    prefix: Hash256,
    block_number: u64,
    block_hash: Hash256,
    staking_module_id: u32,
    nonce: u64,
    operator_ids: &[u8],
    vetted_keys_by_operator: &[u8],
) -> Hash256 {
    let encoded = (
        prefix,
        U256::from(block_number),
        block_hash,
        U256::from(staking_module_id),
        U256::from(nonce),
        Bytes::copy_from_slice(operator_ids),
        Bytes::copy_from_slice(vetted_keys_by_operator),
    )
        .abi_encode_params();
    keccak256(&encoded)
}

/// Operator ids packed as 8-byte big-endian words, concatenated.
pub fn pack_operator_ids(operator_ids: &[u64]) -> Vec<u8> {
    let mut packed = Vec::with_capacity(operator_ids.len() * 8);
    for id in operator_ids {
        packed.extend_from_slice(&id.to_be_bytes());
    }
    packed
}

/// Vetted-key counts packed as 16-byte big-endian words, one per operator,
/// in the same order as the packed operator ids.
pub fn pack_vetted_counts(counts: &[u128]) -> Vec<u8> {
    let mut packed = Vec::with_capacity(counts.len() * 16);
    for count in counts {
        packed.extend_from_slice(&count.to_be_bytes());
    }
    packed
}
