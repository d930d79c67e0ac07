use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header::CONTENT_TYPE, header::ETAG, header::IF_NONE_MATCH},
};
use metrics_util::debugging::DebuggingRecorder;
use tower::ServiceExt;
use wallwise::{
    application::repos::Repositories,
    cache::{CacheConfig, CacheState, MemoryStore, SharedClock, SystemClock},
    infra::http::build_router,
};

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let clock: SharedClock = Arc::new(SystemClock);
    let config = CacheConfig::default();
    let store = Arc::new(MemoryStore::new(clock.clone(), config.max_entries));
    let cache = CacheState::new(config, store, clock.clone());
    let app = build_router(&Repositories::new(clock), &cache);

    let mut etag = String::new();
    for _ in 0..2 {
        let request = Request::builder()
            .method(Method::GET)
            .uri("/api/roles")
            .body(Body::empty())
            .expect("request should build");
        let response = app
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::OK);
        etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .expect("etag header")
            .to_string();
    }

    let revalidate = Request::builder()
        .method(Method::GET)
        .uri("/api/roles")
        .header(IF_NONE_MATCH, etag)
        .body(Body::empty())
        .expect("request should build");
    let response = app
        .clone()
        .oneshot(revalidate)
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

    let create = Request::builder()
        .method(Method::POST)
        .uri("/api/roles")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"name":"Surveyor"}"#))
        .expect("request should build");
    let response = app
        .clone()
        .oneshot(create)
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::CREATED);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "wallwise_cache_hit_total",
        "wallwise_cache_miss_total",
        "wallwise_cache_not_modified_total",
        "wallwise_cache_purged_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
