use alloy::eips::BlockId;
use alloy::network::{Ethereum, EthereumWallet};
use alloy::providers::fillers::RecommendedFillers;
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::SolEvent;
use alloy::transports::http::reqwest::Url;
use alloy_primitives::{I256, U256};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use lido_council_shared::eth::{Address, Hash256, PublicKeyBytes, SignatureBytes};
use thiserror::Error;

use crate::prometheus_metrics;

sol! {
    #[sol(rpc)]
    interface IDepositContract {
        event DepositEvent(
            bytes pubkey,
            bytes withdrawal_credentials,
            bytes amount,
            bytes signature,
            bytes index
        );
        function get_deposit_root() external view returns (bytes32);
    }
}

sol! {
    #[sol(rpc)]
    interface IDepositSecurityModule {
        struct Signature {
            bytes32 r;
            bytes32 vs;
        }

        function getGuardians() external view returns (address[] memory);
        function getGuardianIndex(address addr) external view returns (int256);
        function getAttestMessagePrefix() external view returns (bytes32);
        function getPauseMessagePrefix() external view returns (bytes32);
        function getUnvetMessagePrefix() external view returns (bytes32);
        function VERSION() external view returns (uint256);
        function isDepositsPaused() external view returns (bool);
        function pauseDeposits(uint256 blockNumber, Signature memory sig) external;
        function unvetSigningKeys(
            uint256 blockNumber,
            bytes32 blockHash,
            uint256 stakingModuleId,
            uint256 nonce,
            bytes calldata nodeOperatorIds,
            bytes calldata vettedSigningKeysCounts,
            Signature calldata sig
        ) external;
    }
}

sol! {
    // Pre-v3 module carries the per-module pause entry point.
    #[sol(rpc)]
    interface ILegacyDepositSecurityModule {
        struct Signature {
            bytes32 r;
            bytes32 vs;
        }

        function pauseDeposits(
            uint256 blockNumber,
            uint256 stakingModuleId,
            Signature memory sig
        ) external;
    }
}

sol! {
    #[sol(rpc)]
    interface IStakingRouter {
        function getStakingModuleIsDepositsPaused(uint256 stakingModuleId) external view returns (bool);
    }
}

sol! {
    interface INodeOperatorsRegistry {
        event SigningKeyAdded(uint256 indexed nodeOperatorId, bytes pubkey);
    }
}

/// Guardian attestation in the ERC-2098 compact form the DSM expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactSignature {
    pub r: Hash256,
    pub vs: Hash256,
}

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("RPC transport error: {0:#?}")]
    Transport(#[from] alloy::transports::RpcError<alloy::transports::TransportErrorKind>),

    #[error("Contract call error: {0:#?}")]
    Call(#[from] alloy::contract::Error),

    #[error("Log decode error: {0:#?}")]
    Decode(#[from] alloy::sol_types::Error),

    #[error("Transaction error: {0:#?}")]
    Transaction(#[from] alloy::providers::PendingTransactionError),

    #[error("Transaction {0} reverted")]
    Reverted(Hash256),

    #[error("Block {0} not found")]
    BlockNotFound(u64),

    #[error("Malformed {field} in log at block {block_number} index {log_index}")]
    MalformedLogField {
        field: &'static str,
        block_number: u64,
        log_index: u64,
    },

    #[error("Log without block metadata (pending block?)")]
    PendingLog,

    #[error("All RPC endpoints failed, last error: {0:#?}")]
    AllEndpointsFailed(Box<ContractError>),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Failed to convert string to hex")]
    FromHexError,
    #[error("Failed to parse private key")]
    ParsePrivateKeyError,
    #[error("Failed to deserialize private key")]
    DeserializePrivateKeyError,
}

pub type DefaultProvider = alloy::providers::fillers::FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::fillers::JoinFill<
            alloy::providers::Identity,
            <Ethereum as RecommendedFillers>::RecommendedFillers,
        >,
        alloy::providers::fillers::WalletFiller<EthereumWallet>,
    >,
    alloy::providers::RootProvider,
>;

pub struct ProviderFactory {}

impl ProviderFactory {
    fn decode_key(private_key_raw: &str) -> Result<k256::SecretKey, ProviderError> {
        let key_str = lido_council_shared::util::strip_0x_prefix(private_key_raw.trim());
        let key_hex = hex::decode(key_str).map_err(|_e| ProviderError::FromHexError)?;
        let key = k256::SecretKey::from_bytes((&key_hex[..]).into())
            .map_err(|_e| ProviderError::DeserializePrivateKeyError)?;
        Ok(key)
    }

    pub fn create_signer(key_str: &str) -> Result<PrivateKeySigner, ProviderError> {
        let key = Self::decode_key(key_str)?;
        Ok(PrivateKeySigner::from(key))
    }

    pub fn create_provider(signer: PrivateKeySigner, endpoint: Url) -> DefaultProvider {
        let wallet: EthereumWallet = EthereumWallet::from(signer);
        ProviderBuilder::new().wallet(wallet).connect_http(endpoint)
    }
}

/// A decoded `DepositEvent` before BLS verification.
#[derive(Debug, Clone)]
pub struct DepositLog {
    pub block_number: u64,
    pub block_hash: Hash256,
    pub log_index: u32,
    pub tx_hash: Hash256,
    pub pubkey: PublicKeyBytes,
    pub withdrawal_credentials: Hash256,
    pub amount: u64,
    pub signature: SignatureBytes,
    pub deposit_count: u64,
}

fn log_meta(log: &Log) -> Result<(u64, Hash256, u32, Hash256), ContractError> {
    let block_number = log.block_number.ok_or(ContractError::PendingLog)?;
    let block_hash = log.block_hash.ok_or(ContractError::PendingLog)?;
    let log_index = log.log_index.ok_or(ContractError::PendingLog)? as u32;
    let tx_hash = log.transaction_hash.ok_or(ContractError::PendingLog)?;
    Ok((block_number, block_hash, log_index, tx_hash))
}

fn decode_le_u64(bytes: &[u8], field: &'static str, block_number: u64, log_index: u64) -> Result<u64, ContractError> {
    let fixed: [u8; 8] = bytes.try_into().map_err(|_e| ContractError::MalformedLogField {
        field,
        block_number,
        log_index,
    })?;
    Ok(u64::from_le_bytes(fixed))
}

fn decode_deposit_log(log: &Log) -> Result<DepositLog, ContractError> {
    let decoded = log.log_decode::<IDepositContract::DepositEvent>()?;
    let (block_number, block_hash, log_index, tx_hash) = log_meta(log)?;
    let event = decoded.inner.data;

    let malformed = |field: &'static str| ContractError::MalformedLogField {
        field,
        block_number,
        log_index: log_index as u64,
    };

    Ok(DepositLog {
        block_number,
        block_hash,
        log_index,
        tx_hash,
        pubkey: PublicKeyBytes::try_from(event.pubkey.as_ref()).map_err(|_e| malformed("pubkey"))?,
        withdrawal_credentials: Hash256::try_from(event.withdrawal_credentials.as_ref())
            .map_err(|_e| malformed("withdrawal_credentials"))?,
        amount: decode_le_u64(event.amount.as_ref(), "amount", block_number, log_index as u64)?,
        signature: SignatureBytes::try_from(event.signature.as_ref()).map_err(|_e| malformed("signature"))?,
        deposit_count: decode_le_u64(event.index.as_ref(), "index", block_number, log_index as u64)?,
    })
}

/// A decoded `SigningKeyAdded` log from one of the staking module registries.
#[derive(Debug, Clone)]
pub struct SigningKeyAddedLog {
    pub module_address: Address,
    pub operator_index: u64,
    pub pubkey: PublicKeyBytes,
    pub block_number: u64,
    pub block_hash: Hash256,
    pub log_index: u32,
}

fn decode_signing_key_log(log: &Log) -> Result<SigningKeyAddedLog, ContractError> {
    let decoded = log.log_decode::<INodeOperatorsRegistry::SigningKeyAdded>()?;
    let (block_number, block_hash, log_index, _tx_hash) = log_meta(log)?;
    let event = decoded.inner.data;

    Ok(SigningKeyAddedLog {
        module_address: log.address(),
        operator_index: event.nodeOperatorId.saturating_to::<u64>(),
        pubkey: PublicKeyBytes::try_from(event.pubkey.as_ref()).map_err(|_e| {
            ContractError::MalformedLogField {
                field: "pubkey",
                block_number,
                log_index: log_index as u64,
            }
        })?,
        block_number,
        block_hash,
        log_index,
    })
}

/// Read path over an ordered list of RPC endpoints: each call starts at the
/// primary and falls over to the next endpoint on transport failure.
#[derive(Clone)]
pub struct FallOverProvider {
    providers: Vec<(String, Arc<RootProvider>)>,
    metrics: Arc<prometheus_metrics::Metrics>,
}

impl FallOverProvider {
    pub fn new(endpoints: Vec<Url>, metrics: Arc<prometheus_metrics::Metrics>) -> Self {
        let providers = endpoints
            .into_iter()
            .map(|url| {
                let label = format!("{}://{}", url.scheme(), url.host_str().unwrap_or("unknown"));
                (label, Arc::new(RootProvider::new_http(url)))
            })
            .collect();
        Self { providers, metrics }
    }

    async fn with_fall_over<TRes, Fut, Call>(&self, call: Call) -> Result<TRes, ContractError>
    where
        Fut: std::future::Future<Output = Result<TRes, ContractError>>,
        Call: Fn(Arc<RootProvider>) -> Fut,
    {
        let mut last_error: Option<ContractError> = None;
        for (label, provider) in &self.providers {
            match call(Arc::clone(provider)).await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    tracing::warn!(endpoint = label, "RPC endpoint failed, rotating: {error:#?}");
                    last_error = Some(error);
                }
            }
        }
        Err(ContractError::AllEndpointsFailed(Box::new(
            last_error.expect("at least one RPC endpoint is configured"),
        )))
    }

    pub async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, ContractError> {
        self.metrics
            .services
            .el_rpc
            .run_with_metrics_and_logs_async(prometheus_metrics::services::el_rpc::GET_LOGS, || {
                self.with_fall_over(|provider| {
                    let filter = filter.clone();
                    async move { provider.get_logs(&filter).await.map_err(ContractError::from) }
                })
            })
            .await
    }

    pub async fn get_block_hash(&self, block_number: u64) -> Result<Hash256, ContractError> {
        self.metrics
            .services
            .el_rpc
            .run_with_metrics_and_logs_async(prometheus_metrics::services::el_rpc::GET_BLOCK, || {
                self.with_fall_over(|provider| async move {
                    let block = provider
                        .get_block_by_number(block_number.into())
                        .await?
                        .ok_or(ContractError::BlockNotFound(block_number))?;
                    Ok(block.header.hash)
                })
            })
            .await
    }

    pub async fn fetch_deposit_logs(
        &self,
        deposit_contract: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<DepositLog>, ContractError> {
        let filter = Filter::new()
            .address(deposit_contract)
            .event_signature(IDepositContract::DepositEvent::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);
        let logs = self.get_logs(&filter).await?;
        let mut decoded: Vec<DepositLog> = logs.iter().map(decode_deposit_log).collect::<Result<_, _>>()?;
        decoded.sort_by_key(|event| (event.block_number, event.log_index));
        Ok(decoded)
    }

    pub async fn fetch_signing_key_logs(
        &self,
        module_addresses: &[Address],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<SigningKeyAddedLog>, ContractError> {
        let filter = Filter::new()
            .address(module_addresses.to_vec())
            .event_signature(INodeOperatorsRegistry::SigningKeyAdded::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);
        let logs = self.get_logs(&filter).await?;
        let mut decoded: Vec<SigningKeyAddedLog> =
            logs.iter().map(decode_signing_key_log).collect::<Result<_, _>>()?;
        decoded.sort_by_key(|event| (event.block_number, event.log_index));
        Ok(decoded)
    }
}

/// Deposit contract read access pinned to explicit block tags.
pub struct DepositContractWrapper<P>
where
    P: Provider<Ethereum> + Clone,
{
    contract: IDepositContract::IDepositContractInstance<Arc<P>>,
    metrics: Arc<prometheus_metrics::Metrics>,
}

impl<P> DepositContractWrapper<P>
where
    P: Provider<Ethereum> + Clone,
{
    pub fn new(provider: Arc<P>, address: Address, metrics: Arc<prometheus_metrics::Metrics>) -> Self {
        Self {
            contract: IDepositContract::new(address, provider),
            metrics,
        }
    }

    pub async fn get_deposit_root(&self, block_hash: Hash256) -> Result<Hash256, ContractError> {
        self.metrics
            .services
            .el_rpc
            .run_with_metrics_and_logs_async(
                prometheus_metrics::services::el_rpc::GET_DEPOSIT_ROOT,
                || async {
                    let root = self
                        .contract
                        .get_deposit_root()
                        .block(BlockId::hash(block_hash))
                        .call()
                        .await?;
                    Ok::<_, ContractError>(root)
                },
            )
            .await
    }
}

/// Everything the guardian asks of the deposit security module and the
/// staking router. Implemented by the on-chain wrapper below and by test
/// doubles in the pipeline tests.
#[allow(async_fn_in_trait)]
pub trait SecurityModule {
    async fn version(&self, block_hash: Hash256) -> Result<u64, ContractError>;
    async fn get_guardian_index(&self, guardian: Address, block_hash: Hash256) -> Result<i64, ContractError>;
    async fn get_attest_message_prefix(&self, block_hash: Hash256) -> Result<Hash256, ContractError>;
    async fn get_pause_message_prefix(&self, block_hash: Hash256) -> Result<Hash256, ContractError>;
    async fn get_unvet_message_prefix(&self, block_hash: Hash256) -> Result<Hash256, ContractError>;
    async fn is_deposits_paused(&self, block_hash: Hash256) -> Result<bool, ContractError>;
    async fn is_module_deposits_paused(&self, module_id: u32, block_hash: Hash256) -> Result<bool, ContractError>;
    async fn pause_deposits_v3(&self, block_number: u64, sig: CompactSignature) -> Result<Hash256, ContractError>;
    async fn pause_deposits_v2(
        &self,
        block_number: u64,
        module_id: u32,
        sig: CompactSignature,
    ) -> Result<Hash256, ContractError>;
    #[allow(clippy::too_many_arguments)]
    async fn unvet_signing_keys(
        &self,
        block_number: u64,
        block_hash: Hash256,
        module_id: u32,
        nonce: u64,
        operator_ids: Vec<u8>,
        vetted_keys_by_operator: Vec<u8>,
        sig: CompactSignature,
    ) -> Result<Hash256, ContractError>;
}

impl<T: SecurityModule + Sync> SecurityModule for Arc<T> {
    async fn version(&self, block_hash: Hash256) -> Result<u64, ContractError> {
        self.as_ref().version(block_hash).await
    }
    async fn get_guardian_index(&self, guardian: Address, block_hash: Hash256) -> Result<i64, ContractError> {
        self.as_ref().get_guardian_index(guardian, block_hash).await
    }
    async fn get_attest_message_prefix(&self, block_hash: Hash256) -> Result<Hash256, ContractError> {
        self.as_ref().get_attest_message_prefix(block_hash).await
    }
    async fn get_pause_message_prefix(&self, block_hash: Hash256) -> Result<Hash256, ContractError> {
        self.as_ref().get_pause_message_prefix(block_hash).await
    }
    async fn get_unvet_message_prefix(&self, block_hash: Hash256) -> Result<Hash256, ContractError> {
        self.as_ref().get_unvet_message_prefix(block_hash).await
    }
    async fn is_deposits_paused(&self, block_hash: Hash256) -> Result<bool, ContractError> {
        self.as_ref().is_deposits_paused(block_hash).await
    }
    async fn is_module_deposits_paused(&self, module_id: u32, block_hash: Hash256) -> Result<bool, ContractError> {
        self.as_ref().is_module_deposits_paused(module_id, block_hash).await
    }
    async fn pause_deposits_v3(&self, block_number: u64, sig: CompactSignature) -> Result<Hash256, ContractError> {
        self.as_ref().pause_deposits_v3(block_number, sig).await
    }
    async fn pause_deposits_v2(
        &self,
        block_number: u64,
        module_id: u32,
        sig: CompactSignature,
    ) -> Result<Hash256, ContractError> {
        self.as_ref().pause_deposits_v2(block_number, module_id, sig).await
    }
    async fn unvet_signing_keys(
        &self,
        block_number: u64,
        block_hash: Hash256,
        module_id: u32,
        nonce: u64,
        operator_ids: Vec<u8>,
        vetted_keys_by_operator: Vec<u8>,
        sig: CompactSignature,
    ) -> Result<Hash256, ContractError> {
        self.as_ref()
            .unvet_signing_keys(
                block_number,
                block_hash,
                module_id,
                nonce,
                operator_ids,
                vetted_keys_by_operator,
                sig,
            )
            .await
    }
}

pub struct SecurityModuleWrapper<P>
where
    P: Provider<Ethereum> + Clone,
{
    contract: IDepositSecurityModule::IDepositSecurityModuleInstance<Arc<P>>,
    legacy_contract: ILegacyDepositSecurityModule::ILegacyDepositSecurityModuleInstance<Arc<P>>,
    staking_router: IStakingRouter::IStakingRouterInstance<Arc<P>>,
    metrics: Arc<prometheus_metrics::Metrics>,
}

impl<P> SecurityModuleWrapper<P>
where
    P: Provider<Ethereum> + Clone,
{
    pub fn new(
        provider: Arc<P>,
        security_module_address: Address,
        staking_router_address: Address,
        metrics: Arc<prometheus_metrics::Metrics>,
    ) -> Self {
        Self {
            contract: IDepositSecurityModule::new(security_module_address, Arc::clone(&provider)),
            legacy_contract: ILegacyDepositSecurityModule::new(security_module_address, Arc::clone(&provider)),
            staking_router: IStakingRouter::new(staking_router_address, provider),
            metrics,
        }
    }

    pub fn address(&self) -> &Address {
        self.contract.address()
    }

    pub async fn get_guardians(&self, block_hash: Hash256) -> Result<Vec<Address>, ContractError> {
        let guardians = self
            .contract
            .getGuardians()
            .block(BlockId::hash(block_hash))
            .call()
            .await?;
        Ok(guardians)
    }

    async fn call_metered<TRes, Fut, Call>(&self, call: Call) -> Result<TRes, ContractError>
    where
        Fut: std::future::Future<Output = Result<TRes, ContractError>>,
        Call: FnOnce() -> Fut,
    {
        self.metrics
            .services
            .el_rpc
            .run_with_metrics_and_logs_async(prometheus_metrics::services::el_rpc::CONTRACT_CALL, call)
            .await
    }

    async fn send_and_confirm<Fut>(&self, label: &'static str, send: Fut) -> Result<Hash256, ContractError>
    where
        Fut: std::future::Future<
            Output = Result<alloy::providers::PendingTransactionBuilder<Ethereum>, alloy::contract::Error>,
        >,
    {
        self.metrics
            .services
            .el_rpc
            .run_with_metrics_and_logs_async(prometheus_metrics::services::el_rpc::SEND_TRANSACTION, || async {
                tracing::info!("Submitting {label} transaction");
                let pending = send.await?;
                let receipt = pending
                    .get_receipt()
                    .await
                    .inspect(|receipt| tracing::info!("{label} transaction mined: {}", receipt.transaction_hash))
                    .inspect_err(|error| tracing::error!("{label} transaction failed: {error:?}"))?;
                if !receipt.status() {
                    return Err(ContractError::Reverted(receipt.transaction_hash));
                }
                Ok(receipt.transaction_hash)
            })
            .await
    }
}

impl<P> SecurityModule for SecurityModuleWrapper<P>
where
    P: Provider<Ethereum> + Clone,
{
    async fn version(&self, block_hash: Hash256) -> Result<u64, ContractError> {
        self.call_metered(|| async {
            let version: U256 = self
                .contract
                .VERSION()
                .block(BlockId::hash(block_hash))
                .call()
                .await?;
            Ok(version.saturating_to::<u64>())
        })
        .await
    }

    async fn get_guardian_index(&self, guardian: Address, block_hash: Hash256) -> Result<i64, ContractError> {
        self.call_metered(|| async {
            let index: I256 = self
                .contract
                .getGuardianIndex(guardian)
                .block(BlockId::hash(block_hash))
                .call()
                .await?;
            Ok(index.saturating_to::<i64>())
        })
        .await
    }

    async fn get_attest_message_prefix(&self, block_hash: Hash256) -> Result<Hash256, ContractError> {
        self.call_metered(|| async {
            Ok(self
                .contract
                .getAttestMessagePrefix()
                .block(BlockId::hash(block_hash))
                .call()
                .await?)
        })
        .await
    }

    async fn get_pause_message_prefix(&self, block_hash: Hash256) -> Result<Hash256, ContractError> {
        self.call_metered(|| async {
            Ok(self
                .contract
                .getPauseMessagePrefix()
                .block(BlockId::hash(block_hash))
                .call()
                .await?)
        })
        .await
    }

    async fn get_unvet_message_prefix(&self, block_hash: Hash256) -> Result<Hash256, ContractError> {
        self.call_metered(|| async {
            Ok(self
                .contract
                .getUnvetMessagePrefix()
                .block(BlockId::hash(block_hash))
                .call()
                .await?)
        })
        .await
    }

    async fn is_deposits_paused(&self, block_hash: Hash256) -> Result<bool, ContractError> {
        self.call_metered(|| async {
            Ok(self
                .contract
                .isDepositsPaused()
                .block(BlockId::hash(block_hash))
                .call()
                .await?)
        })
        .await
    }

    async fn is_module_deposits_paused(&self, module_id: u32, block_hash: Hash256) -> Result<bool, ContractError> {
        self.call_metered(|| async {
            Ok(self
                .staking_router
                .getStakingModuleIsDepositsPaused(U256::from(module_id))
                .block(BlockId::hash(block_hash))
                .call()
                .await?)
        })
        .await
    }

    async fn pause_deposits_v3(&self, block_number: u64, sig: CompactSignature) -> Result<Hash256, ContractError> {
        let signature = IDepositSecurityModule::Signature { r: sig.r, vs: sig.vs };
        self.send_and_confirm(
            "pauseDeposits",
            self.contract.pauseDeposits(U256::from(block_number), signature).send(),
        )
        .await
    }

    async fn pause_deposits_v2(
        &self,
        block_number: u64,
        module_id: u32,
        sig: CompactSignature,
    ) -> Result<Hash256, ContractError> {
        let signature = ILegacyDepositSecurityModule::Signature { r: sig.r, vs: sig.vs };
        self.send_and_confirm(
            "pauseDeposits",
            self.legacy_contract
                .pauseDeposits(U256::from(block_number), U256::from(module_id), signature)
                .send(),
        )
        .await
    }

    async fn unvet_signing_keys(
        &self,
        block_number: u64,
        block_hash: Hash256,
        module_id: u32,
        nonce: u64,
        operator_ids: Vec<u8>,
        vetted_keys_by_operator: Vec<u8>,
        sig: CompactSignature,
    ) -> Result<Hash256, ContractError> {
        let signature = IDepositSecurityModule::Signature { r: sig.r, vs: sig.vs };
        self.send_and_confirm(
            "unvetSigningKeys",
            self.contract
                .unvetSigningKeys(
                    U256::from(block_number),
                    block_hash,
                    U256::from(module_id),
                    U256::from(nonce),
                    operator_ids.into(),
                    vetted_keys_by_operator.into(),
                    signature,
                )
                .send(),
        )
        .await
    }
}

/// Keeps the `council_daemon_account_balance` gauge current and remembers
/// whether the balance crossed the critical threshold.
pub struct WalletMonitor<P>
where
    P: Provider<Ethereum>,
{
    provider: Arc<P>,
    address: Address,
    min_balance_wei: U256,
    critical_balance_wei: U256,
    update_block_rate: u64,
    last_update_block: AtomicU64,
    balance_critical: AtomicBool,
    metrics: Arc<prometheus_metrics::Metrics>,
}

impl<P> WalletMonitor<P>
where
    P: Provider<Ethereum>,
{
    pub fn new(
        provider: Arc<P>,
        address: Address,
        min_balance_wei: U256,
        critical_balance_wei: U256,
        update_block_rate: u64,
        metrics: Arc<prometheus_metrics::Metrics>,
    ) -> Self {
        Self {
            provider,
            address,
            min_balance_wei,
            critical_balance_wei,
            update_block_rate: update_block_rate.max(1),
            last_update_block: AtomicU64::new(0),
            balance_critical: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_balance_critical(&self) -> bool {
        self.balance_critical.load(Ordering::Acquire)
    }

    /// Refreshes the balance once per `update_block_rate` blocks.
    pub async fn update_balance(&self, block_number: u64) -> Result<(), ContractError> {
        let last = self.last_update_block.load(Ordering::Acquire);
        if last != 0 && block_number < last.saturating_add(self.update_block_rate) {
            return Ok(());
        }

        let balance = self.provider.get_balance(self.address).await?;
        self.last_update_block.store(block_number, Ordering::Release);

        let balance_eth = u128::try_from(balance).unwrap_or(u128::MAX) as f64 / 1e18;
        self.metrics.guardian.account_balance.set(balance_eth);

        let critical = balance < self.critical_balance_wei;
        self.balance_critical.store(critical, Ordering::Release);
        if critical {
            tracing::error!(balance_eth, "Guardian wallet balance is critically low");
        } else if balance < self.min_balance_wei {
            tracing::warn!(balance_eth, "Guardian wallet balance is below the recommended minimum");
        }
        Ok(())
    }
}
