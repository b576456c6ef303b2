use std::{sync::Arc, time::Duration};

use anyhow::Context;
use globalchat::{
    app,
    config::Config,
    platform::http::HttpPlatform,
    registry::{unix_now, ChannelRegistry, SqliteStore},
    relay::RelayService,
    AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,globalchat=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("failed to load configuration")?;

    let store = SqliteStore::connect(&config.database_url)
        .await
        .context("failed to open the snapshot store")?;
    let registry = Arc::new(ChannelRegistry::load(Arc::new(store)).await?);

    let gateway = Arc::new(HttpPlatform::new(&config.gateway_url)?);
    let relay = RelayService::new(gateway.clone(), registry.clone(), config.relay.clone());
    let state = AppState::new(relay, config.admin_token.clone()).with_gateway(gateway);

    let mut ticker = tokio::time::interval(config.mute_sweep.max(Duration::from_secs(1)));
    tokio::spawn(async move {
        loop {
            ticker.tick().await;
            if let Err(err) = registry.sweep_expired_mutes(unix_now()).await {
                tracing::warn!(error = %err, "mute sweep failed");
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "global chat relay listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}
