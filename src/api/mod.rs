mod base;
mod caller;
mod forms;
mod nodes;
mod response;

use std::borrow::Cow;
use std::sync::Arc;

use axum::{
    error_handling::HandleErrorLayer, http::StatusCode, response::IntoResponse, routing, Json,
    Router,
};
use serde_json::json;
use tokio::time::Duration;
use tower::{BoxError, ServiceBuilder};
use tower_http::trace::TraceLayer;

pub mod paths;

pub use caller::{remote_address, RemoteCaller};
pub use forms::{escape_html, is_email, MAX_FIELD_LEN, MAX_MESSAGE_LEN};
pub use response::{ApiResult, Envelope};

use crate::atlas::Atlas;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the HTTP API over a shared atlas, nested under the configured
/// URL prefix.
pub fn api(atlas: Arc<Atlas>) -> Router {
    let prefix = paths::normalize_prefix(&atlas.settings().web.prefix);

    let routes = Router::new()
        .route(paths::base::ROOT, routing::get(base::root))
        .route(paths::base::HEALTH, routing::get(base::health))
        .route(paths::base::ABOUT, routing::get(base::about))
        // Instance information
        .route(paths::atlas::STATUS, routing::get(base::status))
        .route(paths::atlas::ECHO, routing::get(base::echo))
        .route(paths::atlas::CHILD_MAPS, routing::get(base::child_maps))
        .route(paths::atlas::PEERS, routing::get(base::peers))
        // Anti-abuse
        .route(paths::atlas::TOKEN, routing::get(base::token))
        .route(paths::atlas::KEY, routing::get(base::key))
        .route(paths::captcha::CHALLENGE, routing::get(base::challenge))
        // Nodes
        .route(
            paths::nodes::NODE,
            routing::get(nodes::get_node).post(nodes::post_node),
        )
        .route(paths::nodes::UPDATE_NODE, routing::post(nodes::update_node))
        .route(paths::nodes::DELETE_NODE, routing::post(nodes::delete_node))
        .route(paths::nodes::VERIFY, routing::get(nodes::verify))
        .route(paths::nodes::ALL, routing::get(nodes::all))
        .route(paths::nodes::MESSAGE, routing::post(nodes::message))
        .layer(
            ServiceBuilder::new()
                // Handle errors from middleware
                .layer(HandleErrorLayer::new(handle_error))
                .load_shed()
                .timeout(REQUEST_TIMEOUT),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(atlas);

    if prefix.is_empty() {
        routes
    } else {
        Router::new().nest(&prefix, routes)
    }
}

async fn handle_error(error: BoxError) -> impl IntoResponse {
    let (status, message) = if error.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, Cow::from("request timed out"))
    } else if error.is::<tower::load_shed::error::Overloaded>() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Cow::from("service is overloaded, try again later"),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Cow::from(format!("Unhandled internal error: {}", error)),
        )
    };

    (
        status,
        Json(json!({
            "data": null,
            "error": {"code": status.as_u16(), "message": message},
        })),
    )
}
