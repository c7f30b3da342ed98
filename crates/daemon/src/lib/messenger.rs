//! Signing and broadcasting of guardian attestations.
//!
//! Hashing follows the on-chain message encodings; signing is plain EIP-191
//! ECDSA with the local guardian key (never a remote RPC signer). Broker
//! transports plug in behind [`MessageBus`]; publication and on-chain
//! submission are fire-and-forget from the pipeline's point of view.

use std::sync::Arc;
use std::sync::Mutex;

use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy_primitives::{PrimitiveSignature, U256};
use serde::Serialize;

use lido_council_shared::attestation;
use lido_council_shared::cycle::{BlockData, StakingModuleData};
use lido_council_shared::eth::{Address, Hash256};
use thiserror::Error;

use crate::eth_client::CompactSignature;
use crate::prometheus_metrics;

#[derive(Debug, Error)]
pub enum MessengerError {
    #[error("Failed to sign message: {0}")]
    Signing(#[from] alloy::signers::Error),

    #[error("Failed to publish message: {0}")]
    Bus(String),
}

/// Wire form of an ECDSA attestation signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MessageSignature {
    pub r: Hash256,
    pub s: Hash256,
    pub v: u64,
}

impl MessageSignature {
    fn from_primitive(signature: &PrimitiveSignature) -> Self {
        Self {
            r: Hash256::from(signature.r().to_be_bytes::<32>()),
            s: Hash256::from(signature.s().to_be_bytes::<32>()),
            v: if signature.v() { 28 } else { 27 },
        }
    }

    /// ERC-2098 compact form for on-chain submission.
    pub fn to_compact(&self) -> CompactSignature {
        let mut vs = U256::from_be_bytes(self.s.0);
        if self.v == 28 {
            vs |= U256::from(1) << 255;
        }
        CompactSignature {
            r: self.r,
            vs: Hash256::from(vs.to_be_bytes::<32>()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GuardianMessage {
    #[serde(rename_all = "camelCase")]
    Deposit {
        guardian_address: Address,
        guardian_index: i64,
        block_number: u64,
        block_hash: Hash256,
        deposit_root: Hash256,
        staking_module_id: u32,
        nonce: u64,
        signature: MessageSignature,
    },
    #[serde(rename_all = "camelCase")]
    Pause {
        guardian_address: Address,
        guardian_index: i64,
        block_number: u64,
        block_hash: Hash256,
        #[serde(skip_serializing_if = "Option::is_none")]
        staking_module_id: Option<u32>,
        signature: MessageSignature,
    },
    #[serde(rename_all = "camelCase")]
    Unvet {
        guardian_address: Address,
        guardian_index: i64,
        block_number: u64,
        block_hash: Hash256,
        staking_module_id: u32,
        nonce: u64,
        operator_ids: String,
        vetted_keys_by_operator: String,
        signature: MessageSignature,
    },
    #[serde(rename_all = "camelCase")]
    Ping {
        guardian_address: Address,
        guardian_index: i64,
        block_number: u64,
        staking_module_ids: Vec<u32>,
    },
}

impl GuardianMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Deposit { .. } => "deposit",
            Self::Pause { .. } => "pause",
            Self::Unvet { .. } => "unvet",
            Self::Ping { .. } => "ping",
        }
    }
}

/// Broker seam. The production transports (RabbitMQ / Kafka) attach here;
/// the daemon itself only depends on this publish surface.
#[allow(async_fn_in_trait)]
pub trait MessageBus {
    async fn publish(&self, topic: &str, message: &GuardianMessage) -> Result<(), MessengerError>;
}

impl<T: MessageBus + Sync> MessageBus for Arc<T> {
    async fn publish(&self, topic: &str, message: &GuardianMessage) -> Result<(), MessengerError> {
        self.as_ref().publish(topic, message).await
    }
}

/// Serializes messages into the structured log stream. Stands in where no
/// broker transport is wired up (and in dry runs).
pub struct LoggingMessageBus;

impl MessageBus for LoggingMessageBus {
    async fn publish(&self, topic: &str, message: &GuardianMessage) -> Result<(), MessengerError> {
        let payload = serde_json::to_string(message)
            .map_err(|error| MessengerError::Bus(error.to_string()))?;
        tracing::info!(topic, kind = message.kind(), payload, "Guardian message published");
        Ok(())
    }
}

/// Collects published messages in memory; test double.
#[derive(Default)]
pub struct InMemoryMessageBus {
    messages: Mutex<Vec<GuardianMessage>>,
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<GuardianMessage> {
        self.messages.lock().expect("bus lock poisoned").clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.messages().iter().map(GuardianMessage::kind).collect()
    }
}

impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, _topic: &str, message: &GuardianMessage) -> Result<(), MessengerError> {
        self.messages.lock().expect("bus lock poisoned").push(message.clone());
        Ok(())
    }
}

pub struct GuardianMessenger<MB: MessageBus> {
    bus: MB,
    signer: PrivateKeySigner,
    guardian_address: Address,
    topic: String,
    dry_run: bool,
    metrics: Arc<prometheus_metrics::Metrics>,
}

impl<MB: MessageBus> GuardianMessenger<MB> {
    pub fn new(
        bus: MB,
        signer: PrivateKeySigner,
        topic: String,
        dry_run: bool,
        metrics: Arc<prometheus_metrics::Metrics>,
    ) -> Self {
        let guardian_address = signer.address();
        Self {
            bus,
            signer,
            guardian_address,
            topic,
            dry_run,
            metrics,
        }
    }

    pub fn guardian_address(&self) -> Address {
        self.guardian_address
    }

    fn sign_hash(&self, hash: Hash256) -> Result<MessageSignature, MessengerError> {
        let signature = self.signer.sign_message_sync(hash.as_slice())?;
        Ok(MessageSignature::from_primitive(&signature))
    }

    async fn publish(&self, message: GuardianMessage) -> Result<(), MessengerError> {
        if self.dry_run {
            tracing::info!(kind = message.kind(), "DRY_RUN: skipping broker publication");
            return Ok(());
        }
        self.bus.publish(&self.topic, &message).await?;
        self.metrics
            .guardian
            .messages_sent
            .with_label_values(&[message.kind()])
            .inc();
        Ok(())
    }

    pub async fn broadcast_deposit(
        &self,
        prefix: Hash256,
        block_data: &BlockData,
        module: &StakingModuleData,
    ) -> Result<(), MessengerError> {
        let hash = attestation::deposit_message_hash(
            prefix,
            block_data.block_number,
            block_data.block_hash,
            block_data.deposit_root,
            module.module_id,
            module.nonce,
        );
        let signature = self.sign_hash(hash)?;
        tracing::info!(
            module_id = module.module_id,
            block_number = block_data.block_number,
            "Deposit attestation signed"
        );
        self.publish(GuardianMessage::Deposit {
            guardian_address: self.guardian_address,
            guardian_index: block_data.guardian_index,
            block_number: block_data.block_number,
            block_hash: block_data.block_hash,
            deposit_root: block_data.deposit_root,
            staking_module_id: module.module_id,
            nonce: module.nonce,
            signature,
        })
        .await
    }

    pub async fn broadcast_pause_v3(
        &self,
        prefix: Hash256,
        block_data: &BlockData,
    ) -> Result<MessageSignature, MessengerError> {
        let hash = attestation::pause_message_hash_v3(prefix, block_data.block_number);
        let signature = self.sign_hash(hash)?;
        tracing::warn!(block_number = block_data.block_number, "Pause message signed");
        self.publish(GuardianMessage::Pause {
            guardian_address: self.guardian_address,
            guardian_index: block_data.guardian_index,
            block_number: block_data.block_number,
            block_hash: block_data.block_hash,
            staking_module_id: None,
            signature,
        })
        .await?;
        Ok(signature)
    }

    pub async fn broadcast_pause_v2(
        &self,
        prefix: Hash256,
        block_data: &BlockData,
        module_id: u32,
    ) -> Result<MessageSignature, MessengerError> {
        let hash = attestation::pause_message_hash_v2(prefix, block_data.block_number, module_id);
        let signature = self.sign_hash(hash)?;
        tracing::warn!(
            module_id,
            block_number = block_data.block_number,
            "Pause message signed"
        );
        self.publish(GuardianMessage::Pause {
            guardian_address: self.guardian_address,
            guardian_index: block_data.guardian_index,
            block_number: block_data.block_number,
            block_hash: block_data.block_hash,
            staking_module_id: Some(module_id),
            signature,
        })
        .await?;
        Ok(signature)
    }

    pub async fn broadcast_unvet(
        &self,
        prefix: Hash256,
        block_data: &BlockData,
        module: &StakingModuleData,
        operator_ids: &[u8],
        vetted_keys_by_operator: &[u8],
    ) -> Result<MessageSignature, MessengerError> {
        let hash = attestation::unvet_message_hash(
            prefix,
            block_data.block_number,
            block_data.block_hash,
            module.module_id,
            module.nonce,
            operator_ids,
            vetted_keys_by_operator,
        );
        let signature = self.sign_hash(hash)?;
        tracing::warn!(
            module_id = module.module_id,
            block_number = block_data.block_number,
            "Unvet message signed"
        );
        self.publish(GuardianMessage::Unvet {
            guardian_address: self.guardian_address,
            guardian_index: block_data.guardian_index,
            block_number: block_data.block_number,
            block_hash: block_data.block_hash,
            staking_module_id: module.module_id,
            nonce: module.nonce,
            operator_ids: format!("0x{}", hex::encode(operator_ids)),
            vetted_keys_by_operator: format!("0x{}", hex::encode(vetted_keys_by_operator)),
            signature,
        })
        .await?;
        Ok(signature)
    }

    pub async fn ping(&self, block_data: &BlockData, staking_module_ids: Vec<u32>) -> Result<(), MessengerError> {
        self.publish(GuardianMessage::Ping {
            guardian_address: self.guardian_address,
            guardian_index: block_data.guardian_index,
            block_number: block_data.block_number,
            staking_module_ids,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lido_council_shared::deposit::DepositEventGroup;

    fn test_signer() -> PrivateKeySigner {
        // anvil's first well-known development key
        "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
            .parse()
            .expect("valid key")
    }

    fn block_data() -> BlockData {
        BlockData {
            block_number: 100,
            block_hash: Hash256::repeat_byte(1),
            deposit_root: Hash256::repeat_byte(2),
            deposited_events: DepositEventGroup::default(),
            guardian_address: test_signer().address(),
            guardian_index: 0,
            lido_withdrawal_credentials: Hash256::repeat_byte(3),
            security_version: 3,
            already_paused_deposits: false,
            theft_happened: false,
            wallet_balance_critical: false,
        }
    }

    fn messenger(bus: InMemoryMessageBus, dry_run: bool) -> GuardianMessenger<InMemoryMessageBus> {
        GuardianMessenger::new(
            bus,
            test_signer(),
            "defender".to_owned(),
            dry_run,
            Arc::new(prometheus_metrics::Metrics::new("test_messenger")),
        )
    }

    #[test]
    fn compact_signature_sets_the_parity_bit() {
        let low_s = MessageSignature {
            r: Hash256::repeat_byte(1),
            s: Hash256::repeat_byte(2),
            v: 27,
        };
        assert_eq!(low_s.to_compact().vs, low_s.s);

        let odd_parity = MessageSignature { v: 28, ..low_s };
        let vs = odd_parity.to_compact().vs;
        assert_eq!(vs[0] & 0x80, 0x80);
        let mut rest = vs;
        rest.0[0] &= 0x7f;
        assert_eq!(rest, odd_parity.s);
    }

    #[tokio::test]
    async fn pause_message_carries_module_only_for_v2() {
        let messenger = messenger(InMemoryMessageBus::new(), false);
        let block_data = block_data();
        let prefix = Hash256::repeat_byte(9);

        messenger.broadcast_pause_v3(prefix, &block_data).await.unwrap();
        messenger.broadcast_pause_v2(prefix, &block_data, 2).await.unwrap();

        let messages = messenger.bus.messages();
        assert_eq!(messages.len(), 2);
        match &messages[0] {
            GuardianMessage::Pause { staking_module_id, .. } => assert!(staking_module_id.is_none()),
            other => panic!("expected pause, got {other:?}"),
        }
        match &messages[1] {
            GuardianMessage::Pause { staking_module_id, .. } => {
                assert_eq!(*staking_module_id, Some(2))
            }
            other => panic!("expected pause, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dry_run_signs_but_does_not_publish() {
        let messenger = messenger(InMemoryMessageBus::new(), true);
        let signature = messenger
            .broadcast_pause_v3(Hash256::repeat_byte(9), &block_data())
            .await
            .unwrap();

        assert_ne!(signature.r, Hash256::ZERO);
        assert!(messenger.bus.messages().is_empty());
    }

    #[tokio::test]
    async fn identical_message_signs_identically() {
        let messenger = messenger(InMemoryMessageBus::new(), false);
        let block_data = block_data();
        let prefix = Hash256::repeat_byte(9);

        let first = messenger.broadcast_pause_v3(prefix, &block_data).await.unwrap();
        let second = messenger.broadcast_pause_v3(prefix, &block_data).await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn message_json_uses_kind_discriminator() {
        let message = GuardianMessage::Ping {
            guardian_address: test_signer().address(),
            guardian_index: 1,
            block_number: 5,
            staking_module_ids: vec![1, 2],
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "ping");
        assert_eq!(json["stakingModuleIds"], serde_json::json!([1, 2]));
    }
}
