use std::sync::Arc;

use anyhow::Context;

use torque_infra::config::EngineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    torque_observability::init();

    let config = EngineConfig::from_env().context("invalid configuration")?;
    let bind_addr = config.bind_addr.clone();

    let engine = Arc::new(torque_api::app::services::build_engine(config).context("failed to start engine")?);
    let app = torque_api::app::build_app(engine);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
