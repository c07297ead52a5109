use anyhow::Result;
use axum::{
    extract::Extension,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use shiva_core::ShivaContext;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::rate_limit::RateLimits;

fn cors_layer(origins: Option<&str>) -> CorsLayer {
    match origins.map(str::trim).filter(|o| !o.is_empty()) {
        Some(origins) => {
            let mut cors = CorsLayer::new();
            for origin in origins.split(',').map(str::trim) {
                match origin.parse::<HeaderValue>() {
                    Ok(parsed) => cors = cors.allow_origin(parsed),
                    Err(_) => tracing::warn!("Ignoring invalid CORS origin {:?}", origin),
                }
            }
            cors.allow_methods(Any).allow_headers(Any)
        }
        None => {
            tracing::warn!("CORS_ORIGINS not set, using permissive CORS. Set CORS_ORIGINS for production!");
            CorsLayer::permissive()
        }
    }
}

pub fn router(ctx: ShivaContext) -> Router {
    let cors = cors_layer(ctx.config.server.cors_origins.as_deref());
    let limits = Arc::new(RateLimits::default());

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/shiva", post(handlers::create_page))
        .route("/api/shiva/verify", get(handlers::verify_email))
        .route("/api/shiva/access-request", post(handlers::request_access))
        .route("/api/shiva/access/approve", get(handlers::approve_access))
        .route("/api/shiva/access/deny", get(handlers::deny_access))
        .route("/api/shiva/co-organizer/accept", get(handlers::accept_invite))
        .route("/api/shiva/obituary/:obituary_id", get(handlers::get_by_obituary))
        .route("/api/shiva/:id", get(handlers::get_page).put(handlers::update_page))
        .route("/api/shiva/:id/dates", get(handlers::list_dates))
        .route("/api/shiva/:id/meals", get(handlers::list_meals))
        .route("/api/shiva/:id/signup", post(handlers::signup))
        .route("/api/shiva/:id/signup-multi", post(handlers::signup_multi))
        .route("/api/shiva/:id/remove-signup", post(handlers::remove_signup))
        .route("/api/shiva/:id/report", post(handlers::report_page))
        .route(
            "/api/shiva/:id/updates",
            get(handlers::list_updates).post(handlers::post_update),
        )
        .route("/api/shiva/:id/thank-you", post(handlers::send_thank_you))
        .route(
            "/api/shiva/:id/co-organizers",
            get(handlers::list_co_organizers).post(handlers::invite_co_organizer),
        )
        .route(
            "/api/shiva/:id/co-organizers/:invite_id/revoke",
            post(handlers::revoke_co_organizer),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(Extension(ctx))
                .layer(Extension(limits)),
        )
}

pub async fn run(ctx: ShivaContext) -> Result<()> {
    let addr = format!("{}:{}", ctx.config.server.host, ctx.config.server.api_port);
    let app = router(ctx);

    tracing::info!("Starting API server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
