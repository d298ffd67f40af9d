//! REST API Routes Module
//!
//! Thin HTTP mapping of the coordinator boundary:
//! - Agent heartbeat, error and status routes under /v1/agents
//! - Command issue/poll under /v1/agents/{id}/commands, responses under /v1/commands
//! - Conflict detection and resolution under /v1/conflicts
//! - Server-Sent Events under /v1/events
//! - Health checks under /health and /v1/health
//!
//! Authentication is the deployment's concern and is layered outside this
//! router.

pub mod agents;
pub mod commands;
pub mod conflicts;
pub mod events;
pub mod health;

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::state::AppState;

/// Build the CORS layer from configuration.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any).allow_headers(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        if config.cors_allow_credentials {
            cors.allow_origin(origins).allow_credentials(true)
        } else {
            cors.allow_origin(origins)
        }
    }
}

/// Create the complete API router.
pub fn create_router(state: AppState) -> Router {
    let v1 = Router::new()
        .nest("/agents", agents::create_router(state.clone()))
        .nest("/commands", commands::create_router(state.clone()))
        .nest("/conflicts", conflicts::create_router(state.clone()))
        .nest("/events", events::create_router(state.clone()))
        .route("/health", get(health::fleet_health).with_state(state.clone()));

    #[allow(unused_mut)]
    let mut router = Router::new()
        .nest("/v1", v1)
        .nest("/health", health::create_router(state.clone()));

    #[cfg(feature = "openapi")]
    {
        router = router.route("/openapi.json", get(crate::openapi::openapi_json));
    }

    let cors = build_cors_layer(&state.api_config);

    router.layer(TraceLayer::new_for_http()).layer(cors)
}
