// Nodewatch agent
// Decision: All long-lived components are built once here and passed down; nothing is global

use std::sync::Arc;

use anyhow::{Context, Result};
use nodewatch_agent::{
    init_telemetry, router, spawn_route_installer, AgentConfig, HttpState, ModuleWatcher,
    RouteTable, TelemetryConfig,
};
use nodewatch_control::AgentContext;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "nodewatch=info")
    // - LOG_FORMAT=json: JSON log lines
    init_telemetry(TelemetryConfig::from_env());

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "nodewatch starting...");

    let config = AgentConfig::from_env().context("Failed to load agent configuration")?;
    tracing::info!(
        modules_dir = %config.modules_dir.display(),
        http_addr = %config.http_addr,
        workers = config.control.pool.workers,
        "Configuration loaded"
    );

    let registry =
        nodewatch_plugins::default_registry().context("Failed to register built-in plugins")?;
    let (ctx, route_rx) =
        AgentContext::new(&config.control, registry).context("Failed to build control plane")?;
    ctx.start().context("Failed to start pipeline manager")?;

    let routes = RouteTable::default();
    let installer = spawn_route_installer(route_rx, Arc::clone(&routes));

    let watcher_cancel = CancellationToken::new();
    let watcher = ModuleWatcher::new(&config.modules_dir, config.watch_interval);
    let watcher_handle = tokio::spawn(watcher.run(Arc::clone(&ctx.reloader), watcher_cancel.clone()));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.http_addr))?;
    tracing::info!("HTTP server listening on {}", config.http_addr);

    let http_cancel = CancellationToken::new();
    let app = router(HttpState::new(ctx.clone(), routes));
    let mut server = tokio::spawn({
        let token = http_cancel.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        }
    });

    let mut server_done = false;
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Received shutdown signal");
        }
        result = &mut server => {
            server_done = true;
            match result {
                Ok(Ok(())) => tracing::warn!("HTTP server exited"),
                Ok(Err(e)) => tracing::error!(error = %e, "HTTP server error"),
                Err(e) => tracing::error!(error = %e, "HTTP server task failed"),
            }
        }
    }

    watcher_cancel.cancel();
    if let Err(e) = watcher_handle.await {
        tracing::error!(error = %e, "Module watcher task failed");
    }

    // Reloader, pipelines, then the pool
    ctx.shutdown().await;

    http_cancel.cancel();
    if !server_done {
        if let Err(e) = server.await {
            tracing::error!(error = %e, "HTTP server task failed");
        }
    }
    installer.abort();

    tracing::info!("nodewatch shutdown complete");
    Ok(())
}
