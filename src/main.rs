use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = antigravity_openai_proxy::config::get_config();
    tracing::info!("Starting Antigravity OpenAI proxy on port {}", config.port);

    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            let _ = antigravity_openai_proxy::api::stop_server().await;
        }
    });

    antigravity_openai_proxy::api::start_server().await
}
