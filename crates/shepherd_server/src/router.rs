//! Router construction for the Shepherd server.

use std::sync::Arc;

use axum::{
    middleware as axum_mw,
    routing::{get, patch, post},
    Extension, Router,
};
use shepherd_core::Shepherd;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware::jwt::{jwt_auth, JwtConfig};

/// Build the full axum router with all routes and middleware.
pub fn build_router(app: Arc<Shepherd>, jwt_config: JwtConfig) -> Router {
    // Routes that require JWT authentication
    let protected = Router::new()
        // Stages
        .route(
            "/api/stages",
            get(handlers::stages::list_stages).post(handlers::stages::create_stage),
        )
        .route("/api/stages/reorder", post(handlers::stages::reorder_stages))
        .route(
            "/api/stages/auto-advance/sweep",
            post(handlers::stages::sweep),
        )
        .route(
            "/api/stages/:id",
            get(handlers::stages::get_stage)
                .patch(handlers::stages::update_stage)
                .delete(handlers::stages::delete_stage),
        )
        // Automation rules
        .route(
            "/api/stages/:id/rules",
            get(handlers::rules::list_rules).post(handlers::rules::create_rule),
        )
        .route(
            "/api/rules/:id",
            patch(handlers::rules::update_rule).delete(handlers::rules::delete_rule),
        )
        // Members
        .route(
            "/api/members",
            get(handlers::members::list_members).post(handlers::members::create_member),
        )
        .route(
            "/api/members/import",
            post(handlers::members::import_members),
        )
        .route(
            "/api/members/:id",
            get(handlers::members::get_member).delete(handlers::members::delete_member),
        )
        .route(
            "/api/members/:id/status",
            patch(handlers::members::update_status),
        )
        .route(
            "/api/members/:id/stage",
            patch(handlers::members::advance_stage),
        )
        .route("/api/members/:id/history", get(handlers::members::history))
        .route(
            "/api/members/:id/notes",
            get(handlers::members::list_notes).post(handlers::members::add_note),
        )
        // Tasks
        .route(
            "/api/tasks",
            get(handlers::tasks::list_tasks).post(handlers::tasks::create_task),
        )
        .route("/api/tasks/:id", get(handlers::tasks::get_task))
        .route(
            "/api/tasks/:id/complete",
            patch(handlers::tasks::complete_task),
        )
        .layer(axum_mw::from_fn(jwt_auth))
        .layer(Extension(jwt_config));

    // Public routes (no auth)
    let public = Router::new().route("/health", get(handlers::health::health));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    public
        .merge(protected)
        .layer(Extension(app))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
