//! # um-api
//!
//! The web routing and orchestration layer for United Minds.
//! Everything is mounted under `/api`; handlers talk only to the core traits
//! held in [`handlers::AppState`].

pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;

pub use handlers::AppState;

/// Builds the full application router with its middleware stack.
///
/// Paged listings take `page` and `limit`; the `limit` in each response is the
/// effective one after capping at the configured maximum.
pub fn router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    let api = Router::new()
        .route("/health", get(handlers::health))
        // Accounts
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/auth/me", get(handlers::me))
        // Threads
        .route("/threads", get(handlers::list_threads).post(handlers::create_thread))
        .route("/threads/{id}", get(handlers::get_thread))
        .route("/threads/{id}/votes", get(handlers::thread_votes))
        .route("/threads/{id}/votes/upvote", post(handlers::upvote_thread))
        .route("/threads/{id}/votes/downvote", post(handlers::downvote_thread))
        // Replies
        .route("/replies", post(handlers::create_reply))
        .route("/replies/thread/{thread_id}", get(handlers::list_thread_replies))
        .route("/replies/{id}", get(handlers::get_reply))
        .route("/replies/{id}/votes", get(handlers::reply_votes))
        .route("/replies/{id}/votes/upvote", post(handlers::upvote_reply))
        .route("/replies/{id}/votes/downvote", post(handlers::downvote_reply))
        // Reposts
        .route("/reposts", post(handlers::create_repost))
        .route("/reposts/user/{id}", get(handlers::user_reposts))
        .route("/reposts/thread/{id}", get(handlers::thread_reposts))
        .route("/reposts/{id}", delete(handlers::delete_repost))
        // Follows
        .route("/follows", post(handlers::follow_user))
        .route("/follows/{id}", delete(handlers::unfollow_user))
        .route("/follows/{id}/followers", get(handlers::user_followers))
        .route("/follows/{id}/following", get(handlers::user_following))
        .route("/follows/{id}/check", get(handlers::follow_status));

    let app = Router::new()
        .nest("/api", api)
        .fallback(route_not_found)
        .with_state(state);

    middleware::apply_standard_layers(app, cors_origins)
}

async fn route_not_found() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "route not found" })))
}
