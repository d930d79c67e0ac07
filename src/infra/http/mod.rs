mod error;
mod middleware;
mod resources;

pub use error::{ApiError, ApiErrorBody, ApiErrorMessage, codes};
pub use middleware::{RequestContext, X_REQUEST_ID, log_responses, set_request_context};
pub use resources::resource_routes;

use axum::{Json, Router, extract::State, middleware::from_fn, routing::get};
use serde::Serialize;

use crate::{application::repos::Repositories, cache::CacheState};

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    cache_backend: &'static str,
    cache_enabled: bool,
}

async fn health(State(cache): State<CacheState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        cache_backend: cache.store().backend(),
        cache_enabled: cache.config().enabled,
    })
}

/// Assemble the public router: one cached sub-router per resource type plus `/health`.
pub fn build_router(repos: &Repositories, cache: &CacheState) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health))
        .with_state(cache.clone());

    Router::new()
        .merge(health_routes)
        .merge(resource_routes(repos.people.clone(), cache))
        .merge(resource_routes(repos.roles.clone(), cache))
        .merge(resource_routes(repos.walls.clone(), cache))
        .merge(resource_routes(repos.windows.clone(), cache))
        .layer(from_fn(log_responses))
        .layer(from_fn(set_request_context))
}
