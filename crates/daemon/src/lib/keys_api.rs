//! HTTP client for the keys-index (Keys API) service.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, ClientBuilder};
use serde::Deserialize;

use lido_council_shared::eth::{Hash256, PublicKeyBytes};
use lido_council_shared::keys::{Operator, RegistryKey, StakingModule};
use thiserror::Error;

use crate::consts::MIN_KAPI_VERSION;
use crate::prometheus_metrics;

#[derive(Debug, Error)]
pub enum KeysApiError {
    #[error("Keys API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Keys API chain id {actual} does not match the RPC chain id {expected}")]
    ChainIdMismatch { expected: u64, actual: u64 },

    #[error("Keys API version {actual} is older than the supported minimum {minimum}")]
    UnsupportedVersion { minimum: String, actual: String },

    #[error("Keys API reported an unparseable version: {0}")]
    MalformedVersion(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ElBlockSnapshot {
    pub block_number: u64,
    pub block_hash: Hash256,
    pub last_changed_block_hash: Hash256,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub el_block_snapshot: ElBlockSnapshot,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeysResponse {
    pub data: Vec<RegistryKey>,
    pub meta: ResponseMeta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupedOperators {
    pub operators: Vec<Operator>,
    pub module: StakingModule,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperatorsResponse {
    pub data: Vec<GroupedOperators>,
    pub meta: ResponseMeta,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub chain_id: u64,
    pub app_version: String,
    pub el_block_snapshot: ElBlockSnapshot,
}

/// The three calls the decision pipeline makes each cycle. Startup-only
/// endpoints (`/v1/status`, `/v1/modules`) stay on the concrete client.
#[allow(async_fn_in_trait)]
pub trait KeysIndex {
    async fn get_operators(&self) -> Result<OperatorsResponse, KeysApiError>;
    async fn get_keys(&self) -> Result<KeysResponse, KeysApiError>;
    async fn find_keys(&self, pubkeys: &[PublicKeyBytes]) -> Result<KeysResponse, KeysApiError>;
}

pub struct KeysApiClient {
    base_url: String,
    client: Client,
    metrics: Arc<prometheus_metrics::Metrics>,
}

impl KeysApiClient {
    fn normalize_url(base_url: &str) -> String {
        base_url.strip_suffix('/').unwrap_or(base_url).to_owned()
    }

    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        metrics: Arc<prometheus_metrics::Metrics>,
    ) -> Result<Self, KeysApiError> {
        let client = ClientBuilder::new().timeout(request_timeout).build()?;
        Ok(Self {
            base_url: Self::normalize_url(base_url),
            client,
            metrics,
        })
    }

    async fn get_json<TRes: serde::de::DeserializeOwned>(&self, path: &str) -> Result<TRes, KeysApiError> {
        let url = format!("{}{path}", self.base_url);
        tracing::debug!(url, "Keys API request");
        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn get_status(&self) -> Result<StatusResponse, KeysApiError> {
        self.metrics
            .services
            .keys_api
            .run_with_metrics_and_logs_async(prometheus_metrics::services::keys_api::GET_STATUS, || {
                self.get_json("/v1/status")
            })
            .await
    }

    /// Readiness probe; any 2xx from `/v1/modules` counts.
    pub async fn check_ready(&self) -> Result<(), KeysApiError> {
        let url = format!("{}/v1/modules", self.base_url);
        self.client.get(&url).send().await?.error_for_status()?;
        Ok(())
    }

    /// Startup gate: the keys-index must track the same chain and be recent
    /// enough to expose consistency metadata.
    pub async fn check_compatibility(&self, expected_chain_id: u64) -> Result<(), KeysApiError> {
        let status = self.get_status().await?;
        if status.chain_id != expected_chain_id {
            return Err(KeysApiError::ChainIdMismatch {
                expected: expected_chain_id,
                actual: status.chain_id,
            });
        }

        let minimum = semver::Version::parse(MIN_KAPI_VERSION)
            .expect("MIN_KAPI_VERSION is a valid semver constant");
        let actual = semver::Version::parse(status.app_version.trim_start_matches('v'))
            .map_err(|_e| KeysApiError::MalformedVersion(status.app_version.clone()))?;
        if actual < minimum {
            return Err(KeysApiError::UnsupportedVersion {
                minimum: MIN_KAPI_VERSION.to_owned(),
                actual: status.app_version,
            });
        }
        Ok(())
    }
}

impl KeysIndex for KeysApiClient {
    async fn get_operators(&self) -> Result<OperatorsResponse, KeysApiError> {
        self.metrics
            .services
            .keys_api
            .run_with_metrics_and_logs_async(prometheus_metrics::services::keys_api::GET_OPERATORS, || {
                self.get_json("/v1/operators")
            })
            .await
    }

    async fn get_keys(&self) -> Result<KeysResponse, KeysApiError> {
        self.metrics
            .services
            .keys_api
            .run_with_metrics_and_logs_async(prometheus_metrics::services::keys_api::GET_KEYS, || {
                self.get_json("/v1/keys")
            })
            .await
    }

    async fn find_keys(&self, pubkeys: &[PublicKeyBytes]) -> Result<KeysResponse, KeysApiError> {
        self.metrics
            .services
            .keys_api
            .run_with_metrics_and_logs_async(prometheus_metrics::services::keys_api::FIND_KEYS, || async {
                let url = format!("{}/v1/keys/find", self.base_url);
                let body = serde_json::json!({
                    "pubkeys": pubkeys.iter().map(|pk| format!("{pk}")).collect::<Vec<_>>(),
                });
                let response = self
                    .client
                    .post(&url)
                    .json(&body)
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(response.json().await?)
            })
            .await
    }
}
