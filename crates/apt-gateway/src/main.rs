mod response;
mod routes;
mod server;
mod systemd;

use std::sync::Arc;
use std::time::Duration;

use apt_config::Cli;
use apt_pool::{PairPool, PoolLimits};
use apt_service::{ServiceConfig, TranslationService};
use clap::Parser;
use server::Server;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    if let Err(e) = apt_config::require_utf8_locale() {
        error!(error = %e, "refusing to start");
        std::process::exit(1);
    }

    let cli = Cli::parse();

    let inventory = match apt_modes::discover(&cli.pairs_path, cli.nonpairs_path.as_deref()) {
        Ok(inv) => inv,
        Err(e) => {
            error!(error = %e, "failed to discover installed modes");
            std::process::exit(1);
        }
    };
    info!(
        pairs = inventory.pairs.len(),
        analyzers = inventory.analyzers.len(),
        generators = inventory.generators.len(),
        taggers = inventory.taggers.len(),
        "discovered installed modes"
    );

    let limits = PoolLimits {
        max_pipes_per_pair: cli.max_pipes_per_pair,
        min_pipes_per_pair: cli.min_pipes_per_pair,
        max_users_per_pipe: cli.max_users_per_pipe,
        max_idle: cli.max_idle(),
        restart_pipe_after: cli.restart_pipe_after,
        shutdown_grace: Duration::from_secs(2),
    };
    let pool = PairPool::new(limits, &inventory.pairs);

    let service = TranslationService::new(
        pool,
        ServiceConfig {
            request_timeout: cli.request_timeout(),
            stat_period_max_age: cli.stat_period_max_age(),
            unknown_memory_limit: cli.unknown_memory_limit,
            missing_tokens_path: cli.log_path.clone().map(|p| p.join("missing-tokens.tsv")),
        },
    );

    let server = Arc::new(Server {
        service,
        inventory,
        page_fetch_timeout: Duration::from_secs(20),
    });

    let shutdown = CancellationToken::new();
    spawn_janitor_timer(server.clone(), shutdown.clone());
    systemd::spawn_watchdog_if_configured();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::build(server.clone())
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = format!("0.0.0.0:{}", cli.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "apt-gateway listening");
    systemd::notify_ready();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    systemd::notify_stopping();
    info!("draining in-flight translations");
    server.service.close().await;
    info!("shutdown complete");
    Ok(())
}

/// Periodically ticks the janitor so the Holding Area drains even during
/// a lull with no incoming requests, independent of the inline tick that
/// follows every translation.
fn spawn_janitor_timer(server: server::SharedServer, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    server.service.pool().tick_janitor().await;
                }
                _ = shutdown.cancelled() => break,
            }
        }
    });
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining");
    token.cancel();
}
