use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use std::{net::SocketAddr, sync::Arc, thread};
use tracing::Span;

use crate::common::AppState;

pub fn launch(state: Arc<AppState>, parent_span: Span) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("server".into())
        .spawn(move || {
            let _entered = parent_span.entered();
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(run_server(state));
        })
        .unwrap()
}

async fn run_server(state: Arc<AppState>) {
    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(state.clone());

    let addr: SocketAddr = state
        .env_vars
        .service_bind_to_addr
        .value
        .parse()
        .unwrap_or_else(|e| panic!("Failed to parse SERVICE_BIND_TO_ADDR: {e:?}"));
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    tracing::info!("Starting service at {:?}", addr);
    axum::serve(listener, app).await.unwrap();
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics_handler(state: axum::extract::State<Arc<AppState>>) -> impl IntoResponse {
    match state.report_metrics() {
        Ok((buffer, format)) => Response::builder()
            .header("Content-Type", format)
            .body(buffer.into())
            .map(|response| (StatusCode::OK, response))
            .unwrap_or_else(|_| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to create response for metrics".into_response(),
                )
            }),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to collect metrics".into_response(),
        ),
    }
}
