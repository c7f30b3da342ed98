use prometheus::Registry;
use std::sync::Arc;

use lido_council_daemon::{
    prelude::{DaemonRuntime, EnvVars},
    prometheus_metrics::Registar,
    tracing as tracing_config,
};

use common::AppState;

mod common;
mod scheduler;
mod server;

pub async fn service_main() {
    let env_vars = EnvVars::init_from_env_or_crash();

    // logging setup
    tracing_config::setup_logger(
        tracing_config::LoggingConfig::default()
            .with_thread_names(true)
            .use_format(env_vars.log_format.value.clone()),
    );

    // Prometheus setup
    let registry = Registry::new();

    // Initialize the daemon runtime; any startup failure is fatal.
    let runtime = match DaemonRuntime::init(&env_vars).await {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!("Failed to initialize daemon runtime: {error}");
            std::process::exit(1);
        }
    };
    runtime
        .metrics
        .register_on(&registry)
        .unwrap_or_else(|e| panic!("Failed to register metrics {e:?}"));

    let dry_run = runtime.is_dry_run();
    tracing::info!(dry_run = dry_run, "DRY_RUN: {}", dry_run);

    let network = runtime.eth_infra.network.clone();
    runtime
        .metrics
        .metadata
        .network_chain
        .with_label_values(&[&env_vars.evm_chain.value])
        .set(1.0);
    runtime
        .metrics
        .metadata
        .app_build_info
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1.0);

    let state = AppState {
        registry,
        env_vars,
        runtime,
    };
    state.log_config_full();

    // Everything on this span is appended to all messages
    let main_span = tracing::info_span!(
        "main",
        chain = ?network,
        dry_run = dry_run,
    );
    let scheduler_span = main_span.clone();
    let service_span = main_span.clone();
    let _entered = main_span.entered();

    let shared_state = Arc::new(state);

    let scheduler_thread = scheduler::launch(Arc::clone(&shared_state), scheduler_span);
    let server_thread = server::launch(Arc::clone(&shared_state), service_span);

    scheduler_thread.join().unwrap();
    server_thread.join().unwrap();
    _entered.exit();
}
