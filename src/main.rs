use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use matchroom::catalog::Catalog;
use matchroom::channels::{DiscordTransport, MemoryTransport, Transport};
use matchroom::config::AppConfig;
use matchroom::routes::{AppState, routes};
use matchroom::session::{EngineConfig, SessionEngine};
use matchroom::store::{LibSqlBackend, SessionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_tracing();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export DISCORD_TOKEN=... GUILD_ID=...");
        std::process::exit(1);
    });

    let catalog = Arc::new(Catalog::builtin());

    eprintln!("📝 matchroom v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Questions: {}", catalog.len());
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Auto close: {}s", config.auto_close.as_secs());
    eprintln!("   API: http://0.0.0.0:{}/api", config.http_port);

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn SessionStore> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening database at {}", config.db_path.display()))?,
    );

    // ── Transport ────────────────────────────────────────────────────────
    let transport: Arc<dyn Transport> = match &config.discord {
        Some(discord) => {
            eprintln!("   Transport: discord (guild {})", discord.guild_id);
            Arc::new(DiscordTransport::new(discord))
        }
        None => {
            eprintln!("   Transport: in-memory (DISCORD_TOKEN not set)");
            tracing::warn!("DISCORD_TOKEN not set, rooms and prompts stay in process");
            Arc::new(MemoryTransport::new())
        }
    };

    // ── Engine + HTTP ────────────────────────────────────────────────────
    let engine = Arc::new(SessionEngine::new(
        store,
        transport,
        catalog,
        EngineConfig {
            auto_close: config.auto_close,
            top_k: config.top_k,
        },
    ));

    let app = routes(AppState { engine });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("binding port {}", config.http_port))?;
    tracing::info!(port = config.http_port, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    Ok(())
}

/// Console logging filtered by `RUST_LOG` (default `info`), plus a daily
/// rolling file under `MATCHROOM_LOG_DIR` when set.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match std::env::var("MATCHROOM_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "matchroom.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}
