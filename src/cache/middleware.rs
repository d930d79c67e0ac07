//! Output cache middleware.
//!
//! Bound to one resource type per router with `CacheState::bind` and attached
//! through `Router::route_layer`, so it runs after routing and right before
//! the handler. Reads are served from the store when possible and always carry
//! validators; successful writes purge the tags they made stale before the
//! response is released.

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::{Body, HttpBody},
    extract::{RawPathParams, State, rejection::RawPathParamsRejection},
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED, SET_COOKIE},
        response::Parts,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use crate::domain::types::ResourceType;

use super::clock::SharedClock;
use super::conditional::{Conditional, evaluate};
use super::config::CacheConfig;
use super::invalidation::{InvalidationCoordinator, WriteKind, WriteNotification};
use super::keys::{CacheKey, CacheTag};
use super::policy::ResourceCachePolicy;
use super::store::{CacheEntry, CacheStore};
use super::validators::{Validators, compute_validators, format_http_date};

pub(crate) const METRIC_HIT: &str = "wallwise_cache_hit_total";
pub(crate) const METRIC_MISS: &str = "wallwise_cache_miss_total";
pub(crate) const METRIC_NOT_MODIFIED: &str = "wallwise_cache_not_modified_total";
pub(crate) const METRIC_STORE_ERROR: &str = "wallwise_cache_store_error_total";

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
const ENTITY_ID_PARAM: &str = "id";

/// Newest modification time of the entities a handler rendered.
///
/// Handlers attach it as a response extension; the middleware turns it into
/// `Last-Modified`. `None` means the response holds no entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentTimestamp(pub Option<OffsetDateTime>);

/// Shared cache state for middleware.
#[derive(Clone)]
pub struct CacheState {
    config: Arc<CacheConfig>,
    store: Arc<dyn CacheStore>,
    clock: SharedClock,
    invalidation: Arc<InvalidationCoordinator>,
}

impl CacheState {
    pub fn new(config: CacheConfig, store: Arc<dyn CacheStore>, clock: SharedClock) -> Self {
        let invalidation = Arc::new(InvalidationCoordinator::new(config.enabled, store.clone()));
        Self {
            config: Arc::new(config),
            store,
            clock,
            invalidation,
        }
    }

    /// Bind the middleware to the routes of one resource type.
    pub fn bind(&self, resource_type: ResourceType) -> CacheBinding {
        CacheBinding {
            state: self.clone(),
            resource_type,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Remove expired entries from the store, returning how many went.
    pub async fn sweep_expired(&self) -> usize {
        match self.store.evict_expired().await {
            Ok(evicted) => {
                if evicted > 0 {
                    debug!(backend = self.store.backend(), evicted, "Swept expired cache entries");
                }
                evicted
            }
            Err(err) => {
                counter!(METRIC_STORE_ERROR, "op" => "evict_expired").increment(1);
                warn!(backend = self.store.backend(), error = %err, "Cache sweep failed");
                0
            }
        }
    }
}

/// `CacheState` scoped to one resource type.
#[derive(Clone)]
pub struct CacheBinding {
    state: CacheState,
    resource_type: ResourceType,
}

/// Middleware for output caching, validators and write invalidation.
#[instrument(
    skip_all,
    fields(resource = %binding.resource_type, method = %request.method(), path = %request.uri().path())
)]
pub async fn output_cache_layer(
    State(binding): State<CacheBinding>,
    params: Result<RawPathParams, RawPathParamsRejection>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let entity_id = params.ok().and_then(|params| {
        params
            .iter()
            .find(|(name, _)| *name == ENTITY_ID_PARAM)
            .map(|(_, value)| value.to_string())
    });
    let method = request.method().clone();

    if let Some(kind) = WriteKind::from_method(&method) {
        let response = next.run(request).await;
        if response.status().is_success() {
            let notification = WriteNotification::new(binding.resource_type, kind, entity_id);
            invalidate_detached(binding.state.invalidation.clone(), notification).await;
        }
        return response;
    }

    if method != Method::GET && method != Method::HEAD {
        return next.run(request).await;
    }

    let state = &binding.state;
    if !state.config.enabled {
        return next.run(request).await;
    }

    let policy = match state.config.policies.get(binding.resource_type) {
        Ok(policy) => policy.clone(),
        Err(err) => {
            debug!(cache = "output", outcome = "bypass", error = %err, "no cache policy");
            return next.run(request).await;
        }
    };

    let key = policy.compute_key(&method, request.uri().path(), request.uri().query());
    let resource = binding.resource_type.as_str();

    match state.store.get(&key).await {
        Ok(Some(entry)) => {
            counter!(METRIC_HIT, "resource" => resource).increment(1);
            debug!(cache = "output", outcome = "hit", key = %key, "serving cached response");
            return cached_response(entry, &policy, &method, request.headers());
        }
        Ok(None) => {}
        Err(err) => {
            counter!(METRIC_STORE_ERROR, "op" => "get").increment(1);
            warn!(
                cache = "output",
                backend = state.store.backend(),
                key = %key,
                error = %err,
                "Cache lookup failed; serving from origin"
            );
        }
    }

    counter!(METRIC_MISS, "resource" => resource).increment(1);
    debug!(cache = "output", outcome = "miss", key = %key, "cache miss, executing handler");

    let request_headers = request.headers().clone();
    let mut response = next.run(request).await;

    if !is_storable(&response) {
        debug!(cache = "output", key = %key, status = %response.status(), "response not cacheable");
        return response;
    }
    if response
        .body()
        .size_hint()
        .exact()
        .is_some_and(|len| len > state.config.max_body_bytes as u64)
    {
        debug!(cache = "output", key = %key, "response body over size limit, not cached");
        apply_uncached_headers(response.headers_mut(), &policy);
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!(cache = "output", key = %key, error = %err, "failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let timestamp = parts
        .extensions
        .get::<ContentTimestamp>()
        .and_then(|timestamp| timestamp.0);
    let validators = compute_validators(&bytes, timestamp);

    if method == Method::GET && bytes.len() <= state.config.max_body_bytes {
        let tag = match entity_id.as_deref() {
            Some(id) => CacheTag::entity(binding.resource_type, id),
            None => CacheTag::collection(binding.resource_type),
        };
        let entry = CacheEntry {
            key: key.clone(),
            body: bytes.clone(),
            content_type: header_string(&parts.headers, &CONTENT_TYPE),
            validators: validators.clone(),
            tags: [tag].into_iter().collect(),
            expires_at: state.clock.now() + policy.duration(),
        };
        store_detached(state.store.clone(), entry).await;
    }

    apply_cache_headers(&mut parts.headers, &validators, &policy, "MISS");
    match evaluate(&method, &request_headers, &validators) {
        Conditional::NotModified => {
            counter!(METRIC_NOT_MODIFIED, "resource" => resource).increment(1);
            not_modified(parts)
        }
        Conditional::Proceed => Response::from_parts(parts, Body::from(bytes)),
    }
}

fn is_storable(response: &Response) -> bool {
    if response.status() != StatusCode::OK || response.headers().contains_key(SET_COOKIE) {
        return false;
    }
    !header_string(response.headers(), &CONTENT_TYPE)
        .is_some_and(|value| value.starts_with("text/event-stream"))
}

fn cached_response(
    entry: CacheEntry,
    policy: &ResourceCachePolicy,
    method: &Method,
    request_headers: &HeaderMap,
) -> Response {
    let outcome = evaluate(method, request_headers, &entry.validators);
    let mut response = match outcome {
        Conditional::NotModified => {
            counter!(METRIC_NOT_MODIFIED, "resource" => policy.resource_type.as_str())
                .increment(1);
            StatusCode::NOT_MODIFIED.into_response()
        }
        Conditional::Proceed => {
            let mut response = Response::new(Body::from(entry.body));
            if let Some(value) = entry
                .content_type
                .as_deref()
                .and_then(|value| HeaderValue::from_str(value).ok())
            {
                response.headers_mut().insert(CONTENT_TYPE, value);
            }
            response
        }
    };
    apply_cache_headers(response.headers_mut(), &entry.validators, policy, "HIT");
    response
}

fn not_modified(mut parts: Parts) -> Response {
    parts.status = StatusCode::NOT_MODIFIED;
    parts.headers.remove(CONTENT_LENGTH);
    parts.headers.remove(CONTENT_TYPE);
    Response::from_parts(parts, Body::empty())
}

fn apply_cache_headers(
    headers: &mut HeaderMap,
    validators: &Validators,
    policy: &ResourceCachePolicy,
    outcome: &'static str,
) {
    if let Ok(value) = HeaderValue::from_str(&validators.etag) {
        headers.insert(ETAG, value);
    }
    if let Some(value) = validators
        .last_modified
        .and_then(|at| HeaderValue::from_str(&format_http_date(at)).ok())
    {
        headers.insert(LAST_MODIFIED, value);
    } else {
        headers.remove(LAST_MODIFIED);
    }
    if let Ok(value) = HeaderValue::from_str(&policy.cache_control()) {
        headers.insert(CACHE_CONTROL, value);
    }
    headers.insert(X_CACHE, HeaderValue::from_static(outcome));
}

/// Headers for a cacheable route whose body was too large to buffer.
fn apply_uncached_headers(headers: &mut HeaderMap, policy: &ResourceCachePolicy) {
    if let Ok(value) = HeaderValue::from_str(&policy.cache_control()) {
        headers.insert(CACHE_CONTROL, value);
    }
    headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
}

fn header_string(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Run cache I/O on its own task so a dropped client future cannot cut it short.
async fn run_detached<F>(op: &'static str, task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Err(err) = tokio::spawn(task).await {
        warn!(cache = "output", op, error = %err, "cache task aborted");
    }
}

async fn store_detached(store: Arc<dyn CacheStore>, entry: CacheEntry) {
    run_detached("set", async move {
        let key: CacheKey = entry.key.clone();
        if let Err(err) = store.set(entry).await {
            counter!(METRIC_STORE_ERROR, "op" => "set").increment(1);
            warn!(
                cache = "output",
                backend = store.backend(),
                key = %key,
                error = %err,
                "Failed to store response"
            );
        }
    })
    .await;
}

async fn invalidate_detached(
    coordinator: Arc<InvalidationCoordinator>,
    notification: WriteNotification,
) {
    run_detached("invalidate", async move {
        coordinator.invalidate(&notification).await;
    })
    .await;
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{
        Extension, Router,
        extract::Path,
        middleware::from_fn_with_state,
        routing::get,
    };
    use time::macros::datetime;
    use tower::ServiceExt;

    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::memory::MemoryStore;
    use crate::cache::policy::PolicyTable;

    const STAMP: OffsetDateTime = datetime!(2024-05-01 10:00:00 UTC);

    struct Harness {
        router: Router,
        hits: Arc<AtomicUsize>,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    }

    fn harness(config: CacheConfig) -> Harness {
        let clock = Arc::new(ManualClock::new(datetime!(2024-06-01 12:00 UTC)));
        let store = Arc::new(MemoryStore::new(clock.clone(), NonZeroUsize::MIN.saturating_add(99)));
        let state = CacheState::new(config, store.clone(), clock.clone());
        let hits = Arc::new(AtomicUsize::new(0));

        let list_hits = hits.clone();
        let item_hits = hits.clone();
        let router = Router::new()
            .route(
                "/api/roles",
                get(move || {
                    let hits = list_hits.clone();
                    async move {
                        let n = hits.fetch_add(1, Ordering::SeqCst);
                        (
                            Extension(ContentTimestamp(Some(STAMP))),
                            format!("roles v{n}"),
                        )
                    }
                })
                .post(|| async { StatusCode::CREATED }),
            )
            .route(
                "/api/roles/{id}",
                get(move |Path(id): Path<String>| {
                    let hits = item_hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        if id == "missing" {
                            return StatusCode::NOT_FOUND.into_response();
                        }
                        (Extension(ContentTimestamp(Some(STAMP))), format!("role {id}"))
                            .into_response()
                    }
                })
                .delete(|| async { StatusCode::NO_CONTENT }),
            )
            .route_layer(from_fn_with_state(
                state.bind(ResourceType::Roles),
                output_cache_layer,
            ));

        Harness {
            router,
            hits,
            store,
            clock,
        }
    }

    async fn send(router: &Router, method: Method, uri: &str, headers: &[(&str, &str)]) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        router
            .clone()
            .oneshot(builder.body(Body::empty()).expect("request"))
            .await
            .expect("response")
    }

    async fn body_text(response: Response) -> String {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
        response.headers().get(name).and_then(|v| v.to_str().ok())
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let h = harness(CacheConfig::default());

        let first = send(&h.router, Method::GET, "/api/roles", &[]).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(header(&first, "x-cache"), Some("MISS"));
        assert_eq!(header(&first, "cache-control"), Some("public, max-age=3600"));
        assert_eq!(
            header(&first, "last-modified"),
            Some("Wed, 01 May 2024 10:00:00 GMT")
        );
        let etag = header(&first, "etag").expect("etag").to_string();
        assert_eq!(body_text(first).await, "roles v0");

        let second = send(&h.router, Method::GET, "/api/roles", &[]).await;
        assert_eq!(header(&second, "x-cache"), Some("HIT"));
        assert_eq!(header(&second, "etag"), Some(etag.as_str()));
        assert_eq!(body_text(second).await, "roles v0");
        assert_eq!(h.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn matching_etag_yields_empty_not_modified() {
        let h = harness(CacheConfig::default());
        let first = send(&h.router, Method::GET, "/api/roles", &[]).await;
        let etag = header(&first, "etag").expect("etag").to_string();

        let second = send(&h.router, Method::GET, "/api/roles", &[("if-none-match", etag.as_str())]).await;
        assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(header(&second, "etag"), Some(etag.as_str()));
        assert!(header(&second, "last-modified").is_some());
        assert!(body_text(second).await.is_empty());
    }

    #[tokio::test]
    async fn conditional_applies_on_a_miss_too() {
        let h = harness(CacheConfig::default());
        let response = send(
            &h.router,
            Method::GET,
            "/api/roles",
            &[("if-modified-since", "Wed, 01 May 2024 10:00:00 GMT")],
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(header(&response, "x-cache"), Some("MISS"));
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn entries_expire_with_the_policy_duration() {
        let h = harness(CacheConfig::default());
        send(&h.router, Method::GET, "/api/roles", &[]).await;

        h.clock.advance(time::Duration::seconds(3600));
        let response = send(&h.router, Method::GET, "/api/roles", &[]).await;
        assert_eq!(header(&response, "x-cache"), Some("MISS"));
        assert_eq!(body_text(response).await, "roles v1");
    }

    #[tokio::test]
    async fn head_reads_but_never_populates() {
        let h = harness(CacheConfig::default());

        let head = send(&h.router, Method::HEAD, "/api/roles", &[]).await;
        assert_eq!(head.status(), StatusCode::OK);
        assert!(header(&head, "etag").is_some());
        assert!(h.store.is_empty());

        send(&h.router, Method::GET, "/api/roles", &[]).await;
        let head = send(&h.router, Method::HEAD, "/api/roles", &[]).await;
        assert_eq!(header(&head, "x-cache"), Some("HIT"));
    }

    #[tokio::test]
    async fn non_ok_responses_are_not_stored() {
        let h = harness(CacheConfig::default());
        let response = send(&h.router, Method::GET, "/api/roles/missing", &[]).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(header(&response, "etag").is_none());
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn oversized_bodies_pass_through_uncached() {
        let h = harness(CacheConfig {
            max_body_bytes: 4,
            ..Default::default()
        });
        let response = send(&h.router, Method::GET, "/api/roles", &[]).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "x-cache"), Some("MISS"));
        assert_eq!(
            header(&response, "cache-control"),
            Some("public, max-age=3600")
        );
        assert_eq!(body_text(response).await, "roles v0");
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn writes_purge_collection_and_entity_entries() {
        let h = harness(CacheConfig::default());
        send(&h.router, Method::GET, "/api/roles", &[]).await;
        send(&h.router, Method::GET, "/api/roles/7", &[]).await;
        send(&h.router, Method::GET, "/api/roles/8", &[]).await;
        assert_eq!(h.store.len(), 3);

        let deleted = send(&h.router, Method::DELETE, "/api/roles/7", &[]).await;
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
        assert_eq!(h.store.len(), 1);

        let created = send(
            &h.router,
            Method::POST,
            "/api/roles",
            &[("if-none-match", "*")],
        )
        .await;
        assert_eq!(created.status(), StatusCode::CREATED);
        assert_eq!(h.store.len(), 1, "entity entries survive a create");
    }

    #[tokio::test]
    async fn missing_policy_passes_through() {
        let h = harness(CacheConfig {
            policies: PolicyTable::empty(),
            ..Default::default()
        });
        let first = send(&h.router, Method::GET, "/api/roles", &[]).await;
        assert!(header(&first, "x-cache").is_none());
        send(&h.router, Method::GET, "/api/roles", &[]).await;
        assert_eq!(h.hits.load(Ordering::SeqCst), 2);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn disabled_cache_is_a_pass_through() {
        let h = harness(CacheConfig {
            enabled: false,
            ..Default::default()
        });
        send(&h.router, Method::GET, "/api/roles", &[]).await;
        send(&h.router, Method::GET, "/api/roles", &[]).await;
        assert_eq!(h.hits.load(Ordering::SeqCst), 2);
    }
}
