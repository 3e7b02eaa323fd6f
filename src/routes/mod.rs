use axum::{
    http::{header, StatusCode},
    middleware as axum_middleware,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::metrics;
use crate::middleware::{auth, request_id};
use crate::services::RecommendationService;

pub mod feedback;
pub mod items;
pub mod recommend;
pub mod users;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RecommendationService>,
}

/// Returned by data mutation endpoints
#[derive(Debug, Serialize)]
pub struct RowsAffected {
    pub rows_affected: usize,
}

/// Creates the application router with all routes
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        // recommendation
        .route("/recommend/:user_id", get(recommend::get_recommend))
        .route(
            "/recommend/:user_id/:category",
            get(recommend::get_recommend_in_category),
        )
        .route("/popular", get(recommend::get_popular))
        .route("/popular/:category", get(recommend::get_category_popular))
        .route("/latest", get(recommend::get_latest))
        .route("/latest/:category", get(recommend::get_category_latest))
        .route(
            "/item/:item_id/neighbors",
            get(recommend::get_item_neighbors),
        )
        .route(
            "/item/:item_id/neighbors/:category",
            get(recommend::get_item_category_neighbors),
        )
        .route(
            "/user/:user_id/neighbors",
            get(recommend::get_user_neighbors),
        )
        .route(
            "/intermediate/recommend/:user_id",
            get(recommend::get_collaborative),
        )
        .route(
            "/intermediate/recommend/:user_id/:category",
            get(recommend::get_category_collaborative),
        )
        // users
        .route("/user", post(users::insert_user))
        .route("/users", post(users::insert_users).get(users::get_users))
        .route(
            "/user/:user_id",
            get(users::get_user)
                .patch(users::modify_user)
                .delete(users::delete_user),
        )
        .route("/user/:user_id/feedback", get(users::get_feedback_by_user))
        .route(
            "/user/:user_id/feedback/:feedback_type",
            get(users::get_typed_feedback_by_user),
        )
        // items
        .route("/item", post(items::insert_item))
        .route("/items", post(items::insert_items).get(items::get_items))
        .route(
            "/item/:item_id",
            get(items::get_item)
                .patch(items::modify_item)
                .delete(items::delete_item),
        )
        .route(
            "/item/:item_id/category/:category",
            put(items::insert_item_category).delete(items::delete_item_category),
        )
        .route("/item/:item_id/feedback", get(items::get_feedback_by_item))
        .route(
            "/item/:item_id/feedback/:feedback_type",
            get(items::get_typed_feedback_by_item),
        )
        // feedback
        .route(
            "/feedback",
            post(feedback::insert_feedback).put(feedback::overwrite_feedback),
        )
        .route(
            "/feedback/:user_id/:item_id",
            get(feedback::get_user_item_feedback)
                .delete(feedback::delete_user_item_feedback),
        )
        .route(
            "/feedback/:user_id/:item_id/:feedback_type",
            get(feedback::get_typed_user_item_feedback)
                .delete(feedback::delete_typed_user_item_feedback),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .nest("/api", api)
        .fallback(handler_404)
        .layer(axum_middleware::from_fn(request_id::request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// Prometheus text exposition endpoint
async fn metrics_handler() -> ([(header::HeaderName, &'static str); 1], String) {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
}

/// 404 handler for unknown routes
async fn handler_404() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Route not found" })),
    )
}
