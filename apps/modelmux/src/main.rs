use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use modelmux_core::state::AppState;
use modelmux_core::upstream::{UpstreamClientConfig, WreqUpstreamClient};
use modelmux_storage::SeaOrmStore;

#[derive(Debug, Clone, Parser)]
#[command(name = "modelmux", version, about = "Multi-upstream LLM API gateway")]
struct CliArgs {
    /// Shared bearer token; unset runs the gateway in open mode.
    #[arg(long, env = "TOKEN")]
    token: Option<String>,

    /// Listen port.
    #[arg(long, env = "PORT", default_value_t = 7070)]
    port: u16,

    /// Database DSN; the default keeps state under ./db/.
    #[arg(long, env = "MODELMUX_DSN", default_value = "sqlite://db/modelmux.db?mode=rwc")]
    dsn: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = CliArgs::parse();

    ensure_sqlite_parent_dir(&args.dsn)?;
    let store = Arc::new(
        SeaOrmStore::connect(&args.dsn)
            .await
            .context("connect store")?,
    );
    store.sync().await.context("schema sync")?;

    let client = Arc::new(
        WreqUpstreamClient::new(UpstreamClientConfig::default())
            .context("build upstream client")?,
    );

    let token = args.token.filter(|token| !token.trim().is_empty());
    if token.is_none() {
        info!(event = "auth_open_mode");
    }
    let state = AppState::new(store, client, token);

    state.health.start().await;

    let app = modelmux_router::gateway_router(state);

    let bind = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(event = "listening", addr = %bind);
    axum::serve(listener, app).await.context("serve")?;
    Ok(())
}

fn ensure_sqlite_parent_dir(dsn: &str) -> Result<()> {
    let Some(path) = dsn
        .strip_prefix("sqlite://")
        .map(|rest| rest.split('?').next().unwrap_or(rest))
    else {
        return Ok(());
    };
    if path == ":memory:" {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create data dir {}", parent.display()))?;
    }
    Ok(())
}
