use std::env;
use std::fmt::Debug;
use std::str::FromStr;

#[derive(Clone, Copy)]
pub struct EnvVarSpec {
    pub key: &'static str,
    pub sensitive: bool,
}

#[derive(Clone, Copy)]
pub struct EnvVarValue<TVal> {
    pub spec: &'static EnvVarSpec,
    pub value: TVal,
}

impl EnvVarSpec {
    pub fn default<TVal: FromStr>(&'static self, default: TVal) -> EnvVarValue<TVal> {
        let as_optional = self.optional();
        EnvVarValue {
            spec: as_optional.spec,
            value: as_optional.value.unwrap_or(default),
        }
    }

    pub fn optional<TVal: FromStr>(&'static self) -> EnvVarValue<Option<TVal>> {
        let value = match env::var(self.key) {
            Ok(val) => {
                let parsed = val
                    .parse()
                    .unwrap_or_else(|_e| panic!("Failed to parse env var {}", self.key));
                Some(parsed)
            }
            Err(e) => {
                tracing::debug!("Failed reading env var {}: {e:?}", self.key);
                None
            }
        };
        EnvVarValue { spec: self, value }
    }

    pub fn required<TVal: FromStr>(&'static self) -> EnvVarValue<TVal> {
        let raw_value = env::var(self.key).unwrap_or_else(|e| panic!("Failed to read env var {}: {e:?}", self.key));
        match raw_value.parse() {
            Ok(value) => EnvVarValue { spec: self, value },
            Err(_e) => {
                panic!("Failed to parse value for env var {}", self.key)
            }
        }
    }

    pub fn map<TVal, Mapper>(&'static self, mapper: Mapper) -> EnvVarValue<TVal>
    where
        Mapper: Fn(&str) -> TVal,
    {
        let raw_value: String =
            env::var(self.key).unwrap_or_else(|e| panic!("Failed to read env var {}: {e:?}", self.key));
        let value = mapper(&raw_value);
        EnvVarValue { spec: self, value }
    }
}

impl<TVal: Debug> Debug for EnvVarValue<TVal> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.spec.sensitive {
            f.write_str("***")
        } else {
            f.write_fmt(format_args!("{:?}", self.value))
        }
    }
}

pub const LOG_FORMAT: EnvVarSpec = EnvVarSpec {
    key: "LOG_FORMAT",
    sensitive: false,
};
pub const DRY_RUN: EnvVarSpec = EnvVarSpec {
    key: "DRY_RUN",
    sensitive: false,
};
pub const EVM_CHAIN: EnvVarSpec = EnvVarSpec {
    key: "EVM_CHAIN",
    sensitive: false,
};
pub const RPC_URL: EnvVarSpec = EnvVarSpec {
    key: "RPC_URL",
    sensitive: true,
};
pub const WALLET_PRIVATE_KEY: EnvVarSpec = EnvVarSpec {
    key: "WALLET_PRIVATE_KEY",
    sensitive: true,
};
pub const KEYS_API_URL: EnvVarSpec = EnvVarSpec {
    key: "KEYS_API_URL",
    sensitive: false,
};
pub const KEYS_API_HOST: EnvVarSpec = EnvVarSpec {
    key: "KEYS_API_HOST",
    sensitive: false,
};
pub const KEYS_API_PORT: EnvVarSpec = EnvVarSpec {
    key: "KEYS_API_PORT",
    sensitive: false,
};
pub const DEPOSIT_SECURITY_MODULE_ADDRESS: EnvVarSpec = EnvVarSpec {
    key: "DEPOSIT_SECURITY_MODULE_ADDRESS",
    sensitive: false,
};
pub const STAKING_ROUTER_ADDRESS: EnvVarSpec = EnvVarSpec {
    key: "STAKING_ROUTER_ADDRESS",
    sensitive: false,
};
pub const CACHE_DIR: EnvVarSpec = EnvVarSpec {
    key: "CACHE_DIR",
    sensitive: false,
};
pub const PUBSUB_SERVICE: EnvVarSpec = EnvVarSpec {
    key: "PUBSUB_SERVICE",
    sensitive: false,
};
pub const BROKER_TOPIC: EnvVarSpec = EnvVarSpec {
    key: "BROKER_TOPIC",
    sensitive: false,
};
pub const SERVICE_BIND_TO_ADDR: EnvVarSpec = EnvVarSpec {
    key: "SERVICE_BIND_TO_ADDR",
    sensitive: false,
};
pub const GUARDIAN_CRON: EnvVarSpec = EnvVarSpec {
    key: "GUARDIAN_CRON",
    sensitive: false,
};
pub const FETCH_REQUEST_TIMEOUT_MS: EnvVarSpec = EnvVarSpec {
    key: "FETCH_REQUEST_TIMEOUT_MS",
    sensitive: false,
};
pub const WALLET_MIN_BALANCE_WEI: EnvVarSpec = EnvVarSpec {
    key: "WALLET_MIN_BALANCE_WEI",
    sensitive: false,
};
pub const WALLET_CRITICAL_BALANCE_WEI: EnvVarSpec = EnvVarSpec {
    key: "WALLET_CRITICAL_BALANCE_WEI",
    sensitive: false,
};
pub const WALLET_BALANCE_UPDATE_BLOCK_RATE: EnvVarSpec = EnvVarSpec {
    key: "WALLET_BALANCE_UPDATE_BLOCK_RATE",
    sensitive: false,
};
pub const PROMETHEUS_NAMESPACE: EnvVarSpec = EnvVarSpec {
    key: "PROMETHEUS_NAMESPACE",
    sensitive: false,
};
