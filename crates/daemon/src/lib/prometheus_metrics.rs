use std::future::Future;
use std::time::Instant;

use prometheus::{
    core::{Atomic, AtomicU64, GenericCounterVec, GenericGauge, GenericGaugeVec},
    Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
};

pub mod outcome {
    pub const SUCCESS: &str = "success";
    pub const ERROR: &str = "error";
    pub const SKIPPED: &str = "skipped";
}

pub mod services {
    pub mod keys_api {
        pub const GET_KEYS: &str = "get_keys";
        pub const GET_OPERATORS: &str = "get_operators";
        pub const FIND_KEYS: &str = "find_keys";
        pub const GET_STATUS: &str = "get_status";
    }
    pub mod el_rpc {
        pub const GET_LOGS: &str = "get_logs";
        pub const GET_BLOCK: &str = "get_block";
        pub const GET_DEPOSIT_ROOT: &str = "get_deposit_root";
        pub const CONTRACT_CALL: &str = "contract_call";
        pub const SEND_TRANSACTION: &str = "send_transaction";
    }
}

pub type UIntGauge = GenericGauge<AtomicU64>;
pub type UIntGaugeVec = GenericGaugeVec<AtomicU64>;
pub type UIntCounterVec = GenericCounterVec<AtomicU64>;

pub trait Registar {
    fn register_on(&self, registry: &Registry) -> anyhow::Result<()>;
}

pub struct Metrics {
    pub metadata: Metadata,
    pub guardian: Guardian,
    pub services: Services,
}

impl Registar for Metrics {
    fn register_on(&self, registry: &Registry) -> anyhow::Result<()> {
        self.metadata.register_on(registry)?;
        self.guardian.register_on(registry)?;
        self.services.register_on(registry)?;
        Ok(())
    }
}

pub struct Metadata {
    pub network_chain: GaugeVec,
    pub app_build_info: GaugeVec,
}

impl Registar for Metadata {
    fn register_on(&self, registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.network_chain.clone()))?;
        registry.register(Box::new(self.app_build_info.clone()))?;
        Ok(())
    }
}

pub struct Guardian {
    pub account_balance: Gauge,
    pub tick_outcome: IntCounterVec,
    pub block_number: UIntGauge,
    pub deposited_events_total: UIntGauge,
    pub deposit_cache_end_block: UIntGauge,
    pub deposit_root_mismatches: UIntCounterVec,
    pub module_keys: UIntGaugeVec,
    pub validated_keys: UIntCounterVec,
    pub messages_sent: UIntCounterVec,
}

impl Registar for Guardian {
    fn register_on(&self, registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.account_balance.clone()))?;
        registry.register(Box::new(self.tick_outcome.clone()))?;
        registry.register(Box::new(self.block_number.clone()))?;
        registry.register(Box::new(self.deposited_events_total.clone()))?;
        registry.register(Box::new(self.deposit_cache_end_block.clone()))?;
        registry.register(Box::new(self.deposit_root_mismatches.clone()))?;
        registry.register(Box::new(self.module_keys.clone()))?;
        registry.register(Box::new(self.validated_keys.clone()))?;
        registry.register(Box::new(self.messages_sent.clone()))?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct Service {
    pub call_count: UIntCounterVec,
    pub execution_time_seconds: HistogramVec,
    pub status: UIntCounterVec,
}

impl Registar for Service {
    fn register_on(&self, registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.call_count.clone()))?;
        registry.register(Box::new(self.execution_time_seconds.clone()))?;
        registry.register(Box::new(self.status.clone()))?;
        Ok(())
    }
}

impl Service {
    /// Wraps an external call: counts it, times it and records the outcome.
    pub async fn run_with_metrics_and_logs_async<TRes, TErr, Fut, Runnable>(
        &self,
        operation: &str,
        runnable: Runnable,
    ) -> Result<TRes, TErr>
    where
        TErr: std::fmt::Debug,
        Fut: Future<Output = Result<TRes, TErr>>,
        Runnable: FnOnce() -> Fut,
    {
        self.call_count.with_label_values(&[operation]).inc();
        let started = Instant::now();
        let result = runnable().await;
        self.execution_time_seconds
            .with_label_values(&[operation])
            .observe(started.elapsed().as_secs_f64());
        match &result {
            Ok(_) => {
                self.status.with_label_values(&[operation, outcome::SUCCESS]).inc();
            }
            Err(error) => {
                tracing::warn!(operation, "External call failed: {error:?}");
                self.status.with_label_values(&[operation, outcome::ERROR]).inc();
            }
        }
        result
    }
}

pub struct Services {
    pub keys_api: Service,
    pub el_rpc: Service,
}

impl Registar for Services {
    fn register_on(&self, registry: &Registry) -> anyhow::Result<()> {
        self.keys_api.register_on(registry)?;
        self.el_rpc.register_on(registry)?;
        Ok(())
    }
}

fn gauge(namespace: &str, name: &str, help: &str) -> Gauge {
    let opts = Opts::new(name, help).namespace(namespace.to_string());
    Gauge::with_opts(opts).unwrap()
}

fn uint_gauge(namespace: &str, name: &str, help: &str) -> UIntGauge {
    let opts = Opts::new(name, help).namespace(namespace.to_string());
    UIntGauge::with_opts(opts).unwrap()
}

fn gauge_vec(namespace: &str, name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    let opts = Opts::new(name, help).namespace(namespace.to_string());
    GaugeVec::new(opts, labels).unwrap()
}

fn uint_gauge_vec(namespace: &str, name: &str, help: &str, labels: &[&str]) -> UIntGaugeVec {
    let opts = Opts::new(name, help).namespace(namespace.to_string());
    UIntGaugeVec::new(opts, labels).unwrap()
}

fn counter_vec<TVal: Atomic>(
    namespace: &str,
    name: &str,
    help: &str,
    labels: &[&str],
) -> GenericCounterVec<TVal> {
    let opts = Opts::new(name, help).namespace(namespace.to_string());
    GenericCounterVec::new(opts, labels).unwrap()
}

fn int_counter_vec(namespace: &str, name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let opts = Opts::new(name, help).namespace(namespace.to_string());
    IntCounterVec::new(opts, labels).unwrap()
}

fn histogram_vec(namespace: &str, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let opts = HistogramOpts::new(name, help).namespace(namespace.to_string());
    HistogramVec::new(opts, labels).unwrap()
}

impl Metrics {
    pub fn new(namespace: &str) -> Self {
        let metadata = Metadata {
            network_chain: gauge_vec(namespace, "metadata__network_chain", "Network Chain ID", &["chain_name"]),
            app_build_info: gauge_vec(
                namespace,
                "metadata__app_build_info",
                "Application Build Info",
                &["version"],
            ),
        };

        let guardian = Guardian {
            account_balance: gauge(namespace, "account_balance", "Guardian wallet balance in ETH"),
            tick_outcome: int_counter_vec(
                namespace,
                "guardian__tick_outcome",
                "Guardian cycle outcomes",
                &["outcome"],
            ),
            block_number: uint_gauge(namespace, "guardian__block_number", "Last processed block number"),
            deposited_events_total: uint_gauge(
                namespace,
                "deposits__events_total",
                "Deposit events covered by the cache",
            ),
            deposit_cache_end_block: uint_gauge(
                namespace,
                "deposits__cache_end_block",
                "Last block persisted to the deposit event cache",
            ),
            deposit_root_mismatches: counter_vec(
                namespace,
                "deposits__root_mismatches",
                "Deposit root integrity check failures",
                &["tag"],
            ),
            module_keys: uint_gauge_vec(
                namespace,
                "guardian__module_keys",
                "Per-module key classification counts",
                &["module_id", "category"],
            ),
            validated_keys: counter_vec(
                namespace,
                "bls__validated_keys",
                "BLS validations performed vs served from cache",
                &["source"],
            ),
            messages_sent: counter_vec(
                namespace,
                "guardian__messages_sent",
                "Messages published to the broker",
                &["kind"],
            ),
        };

        fn build_service_metrics(namespace: &str, component: &str) -> Service {
            Service {
                call_count: counter_vec(
                    namespace,
                    &format!("external__{component}__call_count"),
                    "Total call count",
                    &["operation"],
                ),
                execution_time_seconds: histogram_vec(
                    namespace,
                    &format!("external__{component}__execution_time_seconds"),
                    "Execution time in seconds",
                    &["operation"],
                ),
                status: counter_vec(
                    namespace,
                    &format!("external__{component}__status"),
                    "Call outcomes",
                    &["operation", "status"],
                ),
            }
        }

        let services = Services {
            keys_api: build_service_metrics(namespace, "keys_api"),
            el_rpc: build_service_metrics(namespace, "el_rpc"),
        };

        Metrics {
            metadata,
            guardian,
            services,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_metrics_register_without_collisions() {
        let metrics = Metrics::new("council_daemon");
        let registry = Registry::new();
        metrics.register_on(&registry).expect("unique metric names");

        metrics.guardian.account_balance.set(1.5);
        assert!(registry
            .gather()
            .iter()
            .any(|family| family.get_name() == "council_daemon_account_balance"));
    }

    #[tokio::test]
    async fn service_runner_counts_successes_and_errors() {
        let metrics = Metrics::new("test_ns");
        let service = &metrics.services.keys_api;

        let ok: Result<u32, String> = service
            .run_with_metrics_and_logs_async("op", || async { Ok(42) })
            .await;
        assert_eq!(ok.unwrap(), 42);

        let err: Result<u32, String> = service
            .run_with_metrics_and_logs_async("op", || async { Err("boom".to_string()) })
            .await;
        assert!(err.is_err());

        assert_eq!(
            service.status.with_label_values(&["op", outcome::SUCCESS]).get(),
            1
        );
        assert_eq!(service.status.with_label_values(&["op", outcome::ERROR]).get(), 1);
        assert_eq!(service.call_count.with_label_values(&["op"]).get(), 2);
    }
}
