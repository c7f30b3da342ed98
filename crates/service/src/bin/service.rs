#[tokio::main]
async fn main() {
    lido_council_service_lib::service_main().await;
}
