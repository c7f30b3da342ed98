//! Registry keys, staking modules and operators as reported by the
//! keys-index, plus the vetted-key arithmetic the detectors rely on.

use serde::{Deserialize, Serialize};

use crate::eth::{Address, PublicKeyBytes, SignatureBytes};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryKey {
    pub key: PublicKeyBytes,
    pub deposit_signature: SignatureBytes,
    pub operator_index: u32,
    pub used: bool,
    pub index: u32,
    pub module_address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakingModuleType {
    #[serde(rename = "curated-onchain-v1")]
    CuratedOnchainV1,
    #[serde(rename = "community-onchain-v1")]
    CommunityOnchainV1,
    #[serde(rename = "sdvt")]
    Sdvt,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakingModule {
    pub id: u32,
    pub staking_module_address: Address,
    pub nonce: u64,
    #[serde(rename = "type")]
    pub module_type: StakingModuleType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operator {
    pub index: u32,
    pub staking_limit: u64,
    pub total_deposited_validators: u64,
    pub total_added_validators: u64,
    pub reward_address: Address,
}

impl Operator {
    /// How many of this operator's keys are vetted but not yet deposited:
    /// `max(0, min(staking_limit, total_added) - total_deposited)`.
    pub fn vetted_unused_count(&self) -> u64 {
        self.staking_limit
            .min(self.total_added_validators)
            .saturating_sub(self.total_deposited_validators)
    }
}

/// Selects the vetted-unused keys of one module: per operator, unused keys in
/// ascending `index` order, up to that operator's vetted-unused count.
pub fn select_vetted_unused_keys(
    operators: &[Operator],
    module_unused_keys: &[RegistryKey],
) -> Vec<RegistryKey> {
    let mut selected = Vec::new();
    for operator in operators {
        let take = operator.vetted_unused_count() as usize;
        if take == 0 {
            continue;
        }
        let mut operator_keys: Vec<&RegistryKey> = module_unused_keys
            .iter()
            .filter(|key| !key.used && key.operator_index == operator.index)
            .collect();
        operator_keys.sort_by_key(|key| key.index);
        selected.extend(operator_keys.into_iter().take(take).cloned());
    }
    selected
}
