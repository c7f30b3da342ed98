use lido_council_shared::eth::{Address, ForkVersion, Hash256};
use thiserror::Error;

/// Deposit logs are pulled in windows of this many blocks.
pub const DEPOSIT_EVENTS_STEP: u64 = 10_000;
/// Only blocks at least this far behind the head are persisted to the cache.
pub const DEPOSIT_EVENTS_CACHE_LAG_BLOCKS: u64 = 100;
/// An unchanged contract state is re-signed once per window of this many blocks.
pub const GUARDIAN_DEPOSIT_RESIGNING_BLOCKS: u64 = 10;
/// Oldest keys-index release the daemon agrees to talk to.
pub const MIN_KAPI_VERSION: &str = "1.2.0";

pub const DEFAULT_BROKER_TOPIC: &str = "defender";
pub const DEFAULT_GUARDIAN_CRON: &str = "*/6 * * * * *";
pub const DEFAULT_FETCH_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_WALLET_BALANCE_UPDATE_BLOCK_RATE: u64 = 10;
pub const DEFAULT_PROMETHEUS_NAMESPACE: &str = "council_daemon";

pub struct NetworkConfig {
    pub chain_id: u64,
    pub deposit_contract: Address,
    pub deposit_deployment_block: u64,
    /// Earliest block any staking module registry could have emitted
    /// `SigningKeyAdded`; the signing-key cache rebuilds from here.
    pub registry_deployment_block: u64,
    pub lido_withdrawal_credentials: Hash256,
    pub genesis_fork_version: ForkVersion,
}

pub trait NetworkInfo {
    fn as_str(&self) -> String;
    fn get_config(&self) -> NetworkConfig;
}

#[derive(Debug, Error)]
#[error("Unknown network {0}, expected one of: mainnet, holesky, sepolia")]
pub struct NetworkParseError(String);

#[derive(Debug, Clone)]
pub enum Network {
    Mainnet,
    Holesky,
    Sepolia,
}

impl std::str::FromStr for Network {
    type Err = NetworkParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "holesky" => Ok(Self::Holesky),
            "sepolia" => Ok(Self::Sepolia),
            other => Err(NetworkParseError(other.to_owned())),
        }
    }
}

impl NetworkInfo for Network {
    fn as_str(&self) -> String {
        let val = match self {
            Self::Mainnet => "mainnet",
            Self::Holesky => "holesky",
            Self::Sepolia => "sepolia",
        };
        val.to_owned()
    }

    fn get_config(&self) -> NetworkConfig {
        match self {
            Self::Mainnet => NetworkConfig {
                chain_id: 1,
                deposit_contract: deposit_contracts::MAINNET,
                deposit_deployment_block: 11_052_984,
                registry_deployment_block: 11_473_216,
                lido_withdrawal_credentials: lido_credentials::MAINNET,
                genesis_fork_version: [0x00, 0x00, 0x00, 0x00],
            },
            Self::Holesky => NetworkConfig {
                chain_id: 17000,
                deposit_contract: deposit_contracts::HOLESKY,
                deposit_deployment_block: 0,
                registry_deployment_block: 0,
                lido_withdrawal_credentials: lido_credentials::HOLESKY,
                genesis_fork_version: [0x01, 0x01, 0x70, 0x00],
            },
            Self::Sepolia => NetworkConfig {
                chain_id: 11155111,
                deposit_contract: deposit_contracts::SEPOLIA,
                deposit_deployment_block: 1_273_020,
                registry_deployment_block: 1_273_020,
                lido_withdrawal_credentials: lido_credentials::SEPOLIA,
                genesis_fork_version: [0x90, 0x00, 0x00, 0x69],
            },
        }
    }
}

pub mod deposit_contracts {
    use super::Address;

    pub const MAINNET: Address = Address::new([
        0x00, 0x00, 0x00, 0x00, 0x21, 0x9a, 0xb5, 0x40, 0x35, 0x6c, 0xbb, 0x83, 0x9c, 0xbe, 0x05,
        0x30, 0x3d, 0x77, 0x05, 0xfa,
    ]);
    pub const HOLESKY: Address = Address::new([0x42; 20]);
    pub const SEPOLIA: Address = Address::new([
        0x7f, 0x02, 0xc3, 0xe3, 0xc9, 0x8b, 0x13, 0x30, 0x55, 0xb8, 0xb3, 0x48, 0xb2, 0xac, 0x62,
        0x56, 0x69, 0xed, 0x29, 0x5d,
    ]);
}

pub mod lido_credentials {
    use super::Hash256;
    use hex_literal::hex;

    pub const MAINNET: Hash256 =
        Hash256::new(hex!("010000000000000000000000b9d7934878b5fb9610b3fe8a5e441e8fad7e293f"));
    pub const HOLESKY: Hash256 =
        Hash256::new(hex!("010000000000000000000000f0179dec45a37423ead4fad5fcb136197872ead9"));
    pub const SEPOLIA: Hash256 =
        Hash256::new(hex!("010000000000000000000000de7318afa67ead6d6bbc8224dfce5ed6e4b86d76"));
}
