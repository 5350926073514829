use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, Request},
    response::Response,
    routing::any,
};
use clap::Parser;
use color_eyre::{Result, eyre::Context};
use portico::{
    adapters::{HttpClientAdapter, HttpHandler, PostgresStore, RedisCache},
    config::Settings,
    core::{
        CircuitBreakers, GatewayService, HealthCheckManager, LoadBalancer, RouteMatcher,
        SlidingWindowLimiter, TenantAuthenticator,
    },
    metrics,
    ports::{HttpClient, RouteStore, SharedCache},
    tracing_setup,
    utils::{ConnectionTracker, GracefulShutdown},
};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Multi-tenant API gateway")]
struct Args {
    /// Override the PORT environment variable
    #[clap(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let mut settings = Settings::from_env().context("failed to resolve settings")?;
    if let Some(port) = args.port {
        settings.port = port;
    }

    tracing_setup::init_tracing(&settings)
        .map_err(|e| color_eyre::eyre::eyre!("failed to initialize tracing: {e}"))?;

    if settings.metrics_enabled {
        metrics::init_metrics().context("failed to initialize metrics")?;
    } else {
        tracing::info!("metrics are disabled");
    }

    // Resource lifecycle: cache, then store, then health probing, then the
    // listener. Shutdown unwinds in the same order, reversed.
    let cache: Arc<dyn SharedCache> = Arc::new(
        RedisCache::connect(&settings.redis_url)
            .await
            .context("failed to connect to the shared cache")?,
    );
    let postgres = Arc::new(
        PostgresStore::connect(&settings.database_url)
            .await
            .context("failed to connect to the tenant/route store")?,
    );
    let store: Arc<dyn RouteStore> = postgres.clone();

    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().context("failed to create the outbound HTTP client")?);

    let health = Arc::new(HealthCheckManager::new(cache.clone(), http_client.clone()));

    let gateway = Arc::new(GatewayService::new(
        RouteMatcher::new(store.clone(), Arc::new(LoadBalancer::new())),
        CircuitBreakers::new(cache.clone()),
        health.clone(),
        http_client,
    ));

    let connection_tracker = Arc::new(ConnectionTracker::new());
    let handler = Arc::new(HttpHandler::new(
        TenantAuthenticator::new(cache.clone(), store.clone()),
        SlidingWindowLimiter::new(cache.clone()),
        gateway,
        connection_tracker,
        cache.clone(),
        store.clone(),
        settings.metrics_enabled,
    ));

    health.start();

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!(error = %e, "signal handler error");
        }
    });

    let make_request_route = |handler: Arc<HttpHandler>| {
        any(
            move |ConnectInfo(client_addr): ConnectInfo<SocketAddr>, req: Request| {
                let handler = handler.clone();
                async move {
                    Ok::<Response<Body>, std::convert::Infallible>(
                        handler.handle_request(req, Some(client_addr)).await,
                    )
                }
            },
        )
    };

    let app = Router::new()
        .route("/{*path}", make_request_route(handler.clone()))
        .route("/", make_request_route(handler.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(%addr, env = ?settings.env, "Portico API gateway listening");

    let server_result = tokio::select! {
        result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        ) => result.context("server error"),
        reason = graceful_shutdown.wait_for_shutdown_signal() => {
            tracing::info!(?reason, "shutdown signal received");
            Ok(())
        }
    };

    // Stop background probing before tearing down connections. The cache
    // connection closes when its last handle drops.
    health.shutdown();
    postgres.close().await;
    tracing::info!("graceful shutdown completed");

    server_result
}
