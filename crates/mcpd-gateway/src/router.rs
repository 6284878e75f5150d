//! Daemon router: health endpoints plus the proxied surface.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use mcpd_plugins::PluginSupervisor;

use crate::middleware::pipeline_middleware;

/// Health report for one plugin, as exposed over HTTP.
#[derive(Debug, Serialize)]
struct PluginHealthReport {
    name: String,
    healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Daemon liveness report.
#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
}

/// Assemble the daemon router.
///
/// `upstream` carries the proxied routes (the MCP server surface); every
/// request to it traverses the plugin pipeline. The daemon's own health
/// endpoints are mounted alongside and bypass the pipeline.
#[must_use]
pub fn router(supervisor: Arc<PluginSupervisor>, upstream: Router) -> Router {
    let pipeline = supervisor.pipeline();

    let health = Router::new()
        .route("/health", get(health_handler))
        .route("/health/plugins", get(plugin_health_handler))
        .with_state(supervisor);

    let proxied = upstream.layer(axum::middleware::from_fn_with_state(
        pipeline,
        pipeline_middleware,
    ));

    health.merge(proxied)
}

async fn health_handler() -> Json<HealthReport> {
    Json(HealthReport { status: "ok" })
}

async fn plugin_health_handler(
    State(supervisor): State<Arc<PluginSupervisor>>,
) -> Json<Vec<PluginHealthReport>> {
    let reports = supervisor
        .check_health()
        .await
        .into_iter()
        .map(|r| PluginHealthReport {
            name: r.name,
            healthy: r.healthy,
            error: r.error,
        })
        .collect();
    Json(reports)
}
