use prometheus::Registry;

use lido_council_daemon::prelude::{DaemonRuntime, EnvVars};

pub struct AppState {
    pub registry: Registry,
    pub env_vars: EnvVars,
    pub runtime: DaemonRuntime,
}

impl AppState {
    pub fn log_config_full(&self) {
        tracing::info!(
            env_vars = ?self.env_vars.for_logging(false),
            "Env vars",
        );
    }

    pub fn log_config_important(&self) {
        tracing::info!(
            env_vars = ?self.env_vars.for_logging(true),
            "Env vars",
        );
    }

    pub fn report_metrics(&self) -> anyhow::Result<(Vec<u8>, String)> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((buffer, encoder.format_type().to_owned()))
    }
}
