//! Explicit construction of the daemon runtime: every component receives its
//! collaborators here, in dependency order, with all startup checks applied
//! before the guardian loop can run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::providers::Provider;
use alloy::transports::http::reqwest::Url;
use alloy_primitives::U256;
use thiserror::Error;

use lido_council_shared::eth::Address;

use crate::consts::{
    self, NetworkInfo, DEFAULT_BROKER_TOPIC, DEFAULT_FETCH_REQUEST_TIMEOUT_MS, DEFAULT_GUARDIAN_CRON,
    DEFAULT_PROMETHEUS_NAMESPACE, DEFAULT_WALLET_BALANCE_UPDATE_BLOCK_RATE,
    DEPOSIT_EVENTS_CACHE_LAG_BLOCKS,
};
use crate::deposits::DepositsRegistryService;
use crate::env::EnvVarValue;
use crate::eth_client::{
    DefaultProvider, DepositContractWrapper, FallOverProvider, ProviderFactory, SecurityModuleWrapper,
    WalletMonitor,
};
use crate::guardian::{GuardianConfig, GuardianService};
use crate::keys_api::KeysApiClient;
use crate::messenger::{GuardianMessenger, LoggingMessageBus};
use crate::prometheus_metrics::Metrics;
use crate::signature_cache::{BlsSignatureChecker, KeySignatureValidator};
use crate::signing_keys::SigningKeyEventsCacheService;
use crate::storage::CacheStorage;
use crate::tracing::LogFormat;

const DEFAULT_DRY_RUN: bool = false;
const DEFAULT_CACHE_DIR: &str = "./cache";
// 0.1 ETH warning floor, 0.02 ETH critical floor
const DEFAULT_WALLET_MIN_BALANCE_WEI: u128 = 100_000_000_000_000_000;
const DEFAULT_WALLET_CRITICAL_BALANCE_WEI: u128 = 20_000_000_000_000_000;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to parse network from env var: {0}")]
    FailedToParseNetwork(#[from] consts::NetworkParseError),

    #[error("Failed to parse RPC endpoint {0}")]
    MalformedRpcUrl(String),

    #[error("RPC_URL must contain at least one endpoint")]
    NoRpcEndpoints,

    #[error("Failed to create EL provider: {0}")]
    ELProviderError(#[from] crate::eth_client::ProviderError),

    #[error("EL RPC chain id {actual} does not match {network} ({expected})")]
    ChainIdMismatch {
        network: String,
        expected: u64,
        actual: u64,
    },

    #[error("EL RPC error: {0:#?}")]
    Rpc(#[from] alloy::transports::RpcError<alloy::transports::TransportErrorKind>),

    #[error("Keys API is unusable: {0}")]
    KeysApi(#[from] crate::keys_api::KeysApiError),

    #[error("Failed to open cache storage: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("Failed to initialize deposit index: {0}")]
    Deposits(#[from] crate::deposits::DepositsError),

    #[error("KEYS_API_URL or KEYS_API_HOST + KEYS_API_PORT must be set")]
    MissingKeysApiLocation,
}

#[derive(Debug, Clone)]
pub struct EnvVars {
    pub log_format: EnvVarValue<LogFormat>,
    pub dry_run: EnvVarValue<bool>,
    pub evm_chain: EnvVarValue<String>,
    pub rpc_url: EnvVarValue<String>,
    pub wallet_private_key: EnvVarValue<String>,
    pub keys_api_url: EnvVarValue<Option<String>>,
    pub keys_api_host: EnvVarValue<Option<String>>,
    pub keys_api_port: EnvVarValue<Option<u16>>,
    pub deposit_security_module_address: EnvVarValue<Address>,
    pub staking_router_address: EnvVarValue<Address>,
    pub cache_dir: EnvVarValue<String>,
    pub pubsub_service: EnvVarValue<String>,
    pub broker_topic: EnvVarValue<String>,
    pub service_bind_to_addr: EnvVarValue<String>,
    pub guardian_cron: EnvVarValue<String>,
    pub fetch_request_timeout_ms: EnvVarValue<u64>,
    pub wallet_min_balance_wei: EnvVarValue<U256>,
    pub wallet_critical_balance_wei: EnvVarValue<U256>,
    pub wallet_balance_update_block_rate: EnvVarValue<u64>,
    pub prometheus_namespace: EnvVarValue<String>,
}

impl EnvVars {
    pub fn init_from_env_or_crash() -> Self {
        Self {
            log_format: crate::env::LOG_FORMAT.default(LogFormat::Plain),
            dry_run: crate::env::DRY_RUN.default(DEFAULT_DRY_RUN),
            evm_chain: crate::env::EVM_CHAIN.required(),
            rpc_url: crate::env::RPC_URL.required(),
            wallet_private_key: crate::env::WALLET_PRIVATE_KEY.required(),
            keys_api_url: crate::env::KEYS_API_URL.optional(),
            keys_api_host: crate::env::KEYS_API_HOST.optional(),
            keys_api_port: crate::env::KEYS_API_PORT.optional(),
            deposit_security_module_address: crate::env::DEPOSIT_SECURITY_MODULE_ADDRESS.required(),
            staking_router_address: crate::env::STAKING_ROUTER_ADDRESS.required(),
            cache_dir: crate::env::CACHE_DIR.default(DEFAULT_CACHE_DIR.to_owned()),
            pubsub_service: crate::env::PUBSUB_SERVICE.default("inprocess".to_owned()),
            broker_topic: crate::env::BROKER_TOPIC.default(DEFAULT_BROKER_TOPIC.to_owned()),
            service_bind_to_addr: crate::env::SERVICE_BIND_TO_ADDR.default("0.0.0.0:8080".to_owned()),
            guardian_cron: crate::env::GUARDIAN_CRON.default(DEFAULT_GUARDIAN_CRON.to_owned()),
            fetch_request_timeout_ms: crate::env::FETCH_REQUEST_TIMEOUT_MS
                .default(DEFAULT_FETCH_REQUEST_TIMEOUT_MS),
            wallet_min_balance_wei: crate::env::WALLET_MIN_BALANCE_WEI
                .default(U256::from(DEFAULT_WALLET_MIN_BALANCE_WEI)),
            wallet_critical_balance_wei: crate::env::WALLET_CRITICAL_BALANCE_WEI
                .default(U256::from(DEFAULT_WALLET_CRITICAL_BALANCE_WEI)),
            wallet_balance_update_block_rate: crate::env::WALLET_BALANCE_UPDATE_BLOCK_RATE
                .default(DEFAULT_WALLET_BALANCE_UPDATE_BLOCK_RATE),
            prometheus_namespace: crate::env::PROMETHEUS_NAMESPACE
                .default(DEFAULT_PROMETHEUS_NAMESPACE.to_owned()),
        }
    }

    pub fn keys_api_base_url(&self) -> Result<String, Error> {
        if let Some(url) = &self.keys_api_url.value {
            return Ok(url.clone());
        }
        match (&self.keys_api_host.value, self.keys_api_port.value) {
            (Some(host), Some(port)) => Ok(format!("{host}:{port}")),
            _ => Err(Error::MissingKeysApiLocation),
        }
    }

    pub fn rpc_endpoints(&self) -> Result<Vec<Url>, Error> {
        let endpoints: Vec<Url> = self
            .rpc_url
            .value
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| part.parse().map_err(|_e| Error::MalformedRpcUrl(part.to_owned())))
            .collect::<Result<_, _>>()?;
        if endpoints.is_empty() {
            return Err(Error::NoRpcEndpoints);
        }
        Ok(endpoints)
    }

    pub fn for_logging(&self, only_important: bool) -> HashMap<&'static str, String> {
        let mut result = HashMap::new();

        result.insert("log_format", format!("{:?}", self.log_format.value));
        result.insert("dry_run", self.dry_run.value.to_string());
        result.insert("evm_chain", self.evm_chain.value.clone());
        result.insert(
            "deposit_security_module_address",
            format!("{:?}", self.deposit_security_module_address.value),
        );
        result.insert(
            "staking_router_address",
            format!("{:?}", self.staking_router_address.value),
        );

        if !only_important {
            result.insert("rpc_url", "<sensitive>".to_string());
            result.insert("wallet_private_key", "<sensitive>".to_string());
            result.insert("keys_api_url", format!("{:?}", self.keys_api_url.value));
            result.insert("cache_dir", self.cache_dir.value.clone());
            result.insert("pubsub_service", self.pubsub_service.value.clone());
            result.insert("broker_topic", self.broker_topic.value.clone());
            result.insert("service_bind_to_addr", self.service_bind_to_addr.value.clone());
            result.insert("guardian_cron", self.guardian_cron.value.clone());
            result.insert(
                "fetch_request_timeout_ms",
                self.fetch_request_timeout_ms.value.to_string(),
            );
            result.insert(
                "wallet_min_balance_wei",
                self.wallet_min_balance_wei.value.to_string(),
            );
            result.insert(
                "wallet_critical_balance_wei",
                self.wallet_critical_balance_wei.value.to_string(),
            );
            result.insert(
                "prometheus_namespace",
                self.prometheus_namespace.value.clone(),
            );
        }

        result
    }
}

/// The fully wired guardian with its production collaborators.
pub type Guardian = GuardianService<
    KeysApiClient,
    SecurityModuleWrapper<DefaultProvider>,
    DepositsRegistryService,
    SigningKeyEventsCacheService,
    LoggingMessageBus,
    BlsSignatureChecker,
>;

pub struct EthInfrastructure {
    pub network: consts::Network,
    pub provider: Arc<DefaultProvider>,
}

pub struct DaemonRuntime {
    pub eth_infra: EthInfrastructure,
    pub guardian: Arc<Guardian>,
    pub metrics: Arc<Metrics>,
    pub dry_run: bool,
}

impl DaemonRuntime {
    pub async fn init(env_vars: &EnvVars) -> Result<Self, Error> {
        let network: consts::Network = env_vars.evm_chain.value.parse()?;
        let config = network.get_config();
        let metrics = Arc::new(Metrics::new(&env_vars.prometheus_namespace.value));
        let dry_run = env_vars.dry_run.value;

        let signer = ProviderFactory::create_signer(&env_vars.wallet_private_key.value)?;
        let endpoints = env_vars.rpc_endpoints()?;
        let provider = Arc::new(ProviderFactory::create_provider(
            signer.clone(),
            endpoints[0].clone(),
        ));

        let chain_id = provider.get_chain_id().await?;
        if chain_id != config.chain_id {
            return Err(Error::ChainIdMismatch {
                network: network.as_str(),
                expected: config.chain_id,
                actual: chain_id,
            });
        }

        let keys_api = KeysApiClient::new(
            &env_vars.keys_api_base_url()?,
            Duration::from_millis(env_vars.fetch_request_timeout_ms.value),
            Arc::clone(&metrics),
        )?;
        keys_api.check_ready().await?;
        keys_api.check_compatibility(config.chain_id).await?;

        let storage = Arc::new(CacheStorage::open(&env_vars.cache_dir.value)?);
        let fall_over = FallOverProvider::new(endpoints, Arc::clone(&metrics));

        let mut deposits = DepositsRegistryService::new(
            Arc::clone(&storage),
            crate::deposits::fetcher::DepositEventsFetcher::new(
                fall_over.clone(),
                config.deposit_contract,
                config.genesis_fork_version,
            ),
            DepositContractWrapper::new(
                Arc::clone(&provider),
                config.deposit_contract,
                Arc::clone(&metrics),
            ),
            config.deposit_deployment_block,
            DEPOSIT_EVENTS_CACHE_LAG_BLOCKS,
            Arc::clone(&metrics),
        );
        deposits.initialize()?;

        let signing_keys = SigningKeyEventsCacheService::new(
            Arc::clone(&storage),
            fall_over,
            config.registry_deployment_block,
        );

        let security_module = SecurityModuleWrapper::new(
            Arc::clone(&provider),
            env_vars.deposit_security_module_address.value,
            env_vars.staking_router_address.value,
            Arc::clone(&metrics),
        );

        let signature_validator =
            KeySignatureValidator::new(BlsSignatureChecker::new(config.genesis_fork_version))
                .with_metrics(Arc::clone(&metrics));

        if env_vars.pubsub_service.value != "inprocess" {
            tracing::warn!(
                transport = env_vars.pubsub_service.value,
                "External broker transports attach at the MessageBus seam; falling back to the logging bus"
            );
        }
        let messenger = GuardianMessenger::new(
            LoggingMessageBus,
            signer.clone(),
            env_vars.broker_topic.value.clone(),
            dry_run,
            Arc::clone(&metrics),
        );

        let wallet = Arc::new(WalletMonitor::new(
            Arc::clone(&provider),
            signer.address(),
            env_vars.wallet_min_balance_wei.value,
            env_vars.wallet_critical_balance_wei.value,
            env_vars.wallet_balance_update_block_rate.value,
            Arc::clone(&metrics),
        ));

        let guardian = Arc::new(GuardianService::new(
            GuardianConfig::new(config.lido_withdrawal_credentials, dry_run),
            keys_api,
            security_module,
            deposits,
            signing_keys,
            signature_validator,
            messenger,
            Some(wallet),
            Arc::clone(&metrics),
        ));

        tracing::info!(
            network = network.as_str(),
            chain_id,
            dry_run,
            "Daemon runtime initialized"
        );

        Ok(Self {
            eth_infra: EthInfrastructure { network, provider },
            guardian,
            metrics,
            dry_run,
        })
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}
