//! Secret Santa Backend
//!
//! Draws gift-giving pairs within groups, avoiding last year's pairing, and
//! notifies each giver by SMS or email. SQLite is the backing store.

mod api;
mod auth;
mod config;
mod db;
mod delivery;
mod errors;
mod lifecycle;
mod matcher;
mod models;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::Repository;
use delivery::{BrevoDelivery, Delivery, UnconfiguredDelivery};
use lifecycle::MatchLifecycle;
use matcher::RandomShuffler;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub lifecycle: Arc<MatchLifecycle>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Secret Santa Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (SANTA_API_PSK). Authentication is disabled!");
    }

    let delivery: Arc<dyn Delivery> = match &config.brevo {
        Some(brevo) => Arc::new(BrevoDelivery::new(brevo.clone())),
        None => {
            tracing::warn!("No BREVO_API_KEY configured. Notifications will fail until it is set.");
            Arc::new(UnconfiguredDelivery)
        }
    };

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    let lifecycle = Arc::new(MatchLifecycle::new(
        repo.clone(),
        delivery,
        Arc::new(RandomShuffler),
        config.delivery_timeout,
    ));

    let state = AppState {
        repo,
        lifecycle,
        config: Arc::new(config.clone()),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let psk = state.config.api_psk.clone();

    let api_routes = Router::new()
        // Members
        .route("/members", get(api::list_members).post(api::upsert_members))
        .route(
            "/members/{id}",
            get(api::get_member)
                .put(api::update_member)
                .delete(api::delete_member),
        )
        // Groups
        .route("/groups", get(api::list_groups).post(api::upsert_group))
        .route(
            "/groups/{id}",
            get(api::get_group).delete(api::delete_group),
        )
        // Matching and notification
        .route(
            "/groups/{id}/matches",
            get(api::list_matches).post(api::start_matching_run),
        )
        .route("/groups/{id}/notifications", post(api::notify_group))
        .route("/matches/{id}/notify", post(api::notify_match))
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod testing;

#[cfg(test)]
mod tests;
