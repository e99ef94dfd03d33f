use anyhow::Context;

use shopledger_api::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging comes up before config so load-time warnings are visible.
    dotenvy::dotenv().ok();
    let log_format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|f| f.parse().ok())
        .unwrap_or_default();
    shopledger_observability::init(log_format);

    let config = Config::load()?;
    let app = shopledger_api::app::build_app(&config).await?;

    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
