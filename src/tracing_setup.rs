use eyre::Result;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{AppEnv, Settings};

/// Initialize structured logging for the gateway.
///
/// Production gets JSON output, development and test get the pretty console
/// format. The filter honours `RUST_LOG` when set, otherwise the configured
/// `LOG_LEVEL`.
pub fn init_tracing(settings: &Settings) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.filter_directive()));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    match settings.env {
        AppEnv::Production => {
            Registry::default()
                .with(env_filter)
                .with(
                    fmt_layer
                        .json()
                        .with_current_span(false)
                        .with_span_list(true),
                )
                .try_init()?;
        }
        AppEnv::Development | AppEnv::Test => {
            Registry::default()
                .with(env_filter)
                .with(fmt_layer.pretty().with_ansi(true))
                .try_init()?;
        }
    }

    if settings.tracing_enabled {
        // Span export is not wired up yet; the flag is accepted so deployments
        // can enable it without a config change once an exporter lands.
        tracing::warn!(
            endpoint = settings.tracing_endpoint.as_deref().unwrap_or("unset"),
            "TRACING_ENABLED is set but no span exporter is configured"
        );
    }

    tracing::info!(env = ?settings.env, level = %settings.log_level, "logging initialized");
    Ok(())
}

/// Create a request-scoped tracing span.
pub fn create_request_span(method: &str, path: &str, request_id: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        http.method = method,
        http.path = path,
        request.id = request_id,
        tenant.id = tracing::field::Empty,
        http.status_code = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}
