//! Serve command: wire the store, broker and news feed, then listen.

use anyhow::{Context as _, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use workbench_broker::{BridgeBroker, BridgeConfig, SimBroker};
use workbench_config::Settings;
use workbench_core::Broker;
use workbench_engine::{jobs, news_source, Context};

use crate::cli::ServeArgs;

pub async fn run(args: ServeArgs, settings: Settings) -> Result<()> {
    let db = &settings.database;
    let store = workbench_store::open_store(
        db.url.as_deref(),
        db.min_connections,
        db.max_connections,
        db.schema_path.as_deref().map(Path::new),
    )
    .await
    .context("opening store")?;

    let broker: Arc<dyn Broker> = match settings.broker.bridge_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => {
            let mut config = BridgeConfig::new(url).with_history_buffers(
                settings.broker.history_future_hours,
                settings.broker.history_back_hours(),
            );
            config.timeout = Duration::from_secs(settings.broker.request_timeout_secs);
            info!(url, "Using broker bridge");
            Arc::new(BridgeBroker::new(config))
        }
        _ => {
            info!("No broker bridge configured, using simulated broker");
            Arc::new(SimBroker::new())
        }
    };

    let news = news_source(&settings.news).context("configuring news source")?;

    let host = args.host.unwrap_or_else(|| settings.server.host.clone());
    let port = args.port.unwrap_or(settings.server.port);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", host, port))?;

    let ctx = Context::new(store, broker, news, settings);

    if args.no_timers {
        info!("Background timers disabled");
    } else {
        let plan = jobs::start(&ctx).await;
        info!(?plan, "Background timers armed");
    }

    workbench_api::serve(ctx, addr).await.context("HTTP server")?;
    Ok(())
}
