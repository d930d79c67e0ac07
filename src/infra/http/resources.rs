//! CRUD handlers shared by every record type.

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, header::LOCATION},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::get,
};
use uuid::Uuid;

use crate::{
    application::{pagination::ListQuery, repos::MemoryRepository},
    cache::{CacheState, ContentTimestamp, max_entity_timestamp, output_cache_layer},
    domain::entities::Record,
};

use super::error::ApiError;

type Repo<R> = Arc<MemoryRepository<R>>;

/// `/api/<type>` and `/api/<type>/{id}` for one record type, behind the output cache.
pub fn resource_routes<R: Record>(repo: Repo<R>, cache: &CacheState) -> Router {
    let collection = format!("/api/{}", R::RESOURCE.as_str());
    let entity = format!("{collection}/{{id}}");

    Router::new()
        .route(&collection, get(list::<R>).post(create::<R>))
        .route(
            &entity,
            get(fetch::<R>).put(update::<R>).delete(remove::<R>),
        )
        .route_layer(from_fn_with_state(
            cache.bind(R::RESOURCE),
            output_cache_layer,
        ))
        .with_state(repo)
}

fn timestamp_of<R: Record>(records: &[R]) -> ContentTimestamp {
    ContentTimestamp(max_entity_timestamp(
        records
            .iter()
            .map(|record| (record.created_at(), record.updated_at())),
    ))
}

async fn list<R: Record>(
    State(repo): State<Repo<R>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|rejection| {
        ApiError::bad_request("Invalid query parameters", Some(rejection.body_text()))
    })?;
    let page = repo.list(&query);
    let timestamp = timestamp_of(&page.items);
    Ok((Extension(timestamp), Json(page)).into_response())
}

async fn fetch<R: Record>(
    State(repo): State<Repo<R>>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Response, ApiError> {
    let Path(id) = id?;
    let record = repo.get(id)?;
    let timestamp = timestamp_of(std::slice::from_ref(&record));
    Ok((Extension(timestamp), Json(record)).into_response())
}

async fn create<R: Record>(
    State(repo): State<Repo<R>>,
    draft: Result<Json<R::Draft>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(draft) = draft?;
    let record = repo.create(draft)?;
    let location = format!("/api/{}/{}", R::RESOURCE.as_str(), record.id());
    let timestamp = timestamp_of(std::slice::from_ref(&record));
    Ok((
        StatusCode::CREATED,
        [(LOCATION, location)],
        Extension(timestamp),
        Json(record),
    )
        .into_response())
}

async fn update<R: Record>(
    State(repo): State<Repo<R>>,
    id: Result<Path<Uuid>, PathRejection>,
    draft: Result<Json<R::Draft>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Path(id) = id?;
    let Json(draft) = draft?;
    let record = repo.update(id, draft)?;
    let timestamp = timestamp_of(std::slice::from_ref(&record));
    Ok((Extension(timestamp), Json(record)).into_response())
}

async fn remove<R: Record>(
    State(repo): State<Repo<R>>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    repo.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}
