//! HTTP integration for POST GraphQL endpoints.
//!
//! Opens an HTTP-transport [`RequestScope`] per request, answers query cache
//! hits without calling the executor, and otherwise hands the scope to the
//! executor through request extensions, finalizes its response and emits
//! the status headers.
//!
//! Bodies are only buffered when their size is known and within
//! `response_body_limit_bytes`; anything else bypasses the cache untouched.
//! The executor's bytes are forwarded as-is unless a cached field value had
//! to be written back into the response.

use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{HeaderName, HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::hooks::{
    ExecutionHooks, FieldResolve, GraphQLRequest, RequestStart, Resolution, ResponseBody,
    Transport,
};
use super::keys::Principal;
use super::lock::RecoverMutex;
use super::registry::{CacheRegistry, RequestScope};
use super::status::PendingStatus;

/// Shared state for [`graphql_cache_layer`].
#[derive(Clone)]
pub struct GraphQLCacheState {
    pub registry: Arc<CacheRegistry>,
}

impl GraphQLCacheState {
    pub fn new(registry: Arc<CacheRegistry>) -> Self {
        Self { registry }
    }
}

/// Request scope handed to the executor as a request extension.
///
/// The executor calls [`ExecutionHooks::on_before_field_resolve`] on it for
/// every field it resolves. Request start and finalization are driven by the
/// middleware.
#[derive(Clone)]
pub struct SharedScope(Arc<Mutex<RequestScope>>);

impl SharedScope {
    pub fn new(scope: RequestScope) -> Self {
        Self(Arc::new(Mutex::new(scope)))
    }

    pub fn lock(&self) -> MutexGuard<'_, RequestScope> {
        self.0.lock_recover("shared_scope.lock")
    }

    /// Status of the request so far.
    pub fn status(&self) -> PendingStatus {
        self.lock().status()
    }
}

impl ExecutionHooks for SharedScope {
    fn on_request_start(&mut self, request: &GraphQLRequest, principal: &Principal) -> RequestStart {
        self.lock().on_request_start(request, principal)
    }

    fn on_before_field_resolve(&mut self, field: &FieldResolve<'_>) -> Resolution {
        self.lock().on_before_field_resolve(field)
    }

    fn on_response_finalize(&mut self, response: &mut dyn ResponseBody) -> PendingStatus {
        self.lock().on_response_finalize(response)
    }
}

/// Middleware caching GraphQL responses for POST requests.
///
/// Requests that are not POST, that do not carry a GraphQL payload, or that
/// arrive while the registry is inactive pass through untouched. The
/// requesting identity is read from a [`Principal`] extension set by an
/// earlier layer; requests without one are anonymous.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn graphql_cache_layer(
    State(cache): State<GraphQLCacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::POST || !cache.registry.is_active() {
        return next.run(request).await;
    }

    let limit = cache.registry.config().response_body_limit_bytes;
    let (mut parts, body) = request.into_parts();
    if !fits_within(&body, limit) {
        debug!(limit, "request body size unknown or above limit; bypassing cache");
        return next.run(Request::from_parts(parts, body)).await;
    }
    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "failed to read GraphQL request body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let graphql: GraphQLRequest = match serde_json::from_slice(&bytes) {
        Ok(graphql) => graphql,
        Err(err) => {
            debug!(error = %err, "request body is not a GraphQL payload; bypassing cache");
            return next.run(Request::from_parts(parts, Body::from(bytes))).await;
        }
    };

    let principal = parts
        .extensions
        .get::<Principal>()
        .cloned()
        .unwrap_or_default();

    let mut scope = cache.registry.scope(Transport::Http);
    if scope.is_empty() {
        return next.run(Request::from_parts(parts, Body::from(bytes))).await;
    }

    if let RequestStart::Respond(early) = scope.on_request_start(&graphql, &principal) {
        debug!(outcome = "hit", "serving cached GraphQL response");
        return build_early_response(early.body, &early.status);
    }

    let shared = SharedScope::new(scope);
    parts.extensions.insert(shared.clone());
    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;

    finalize_response(response, shared, limit).await
}

async fn finalize_response(response: Response, mut scope: SharedScope, limit: usize) -> Response {
    if response.status() != StatusCode::OK {
        return response;
    }

    // Skipped resolvers left holes that must be filled whatever the size.
    let restore = scope.lock().has_field_hits();
    let (mut parts, body) = response.into_parts();
    if !restore && !fits_within(&body, limit) {
        debug!(limit, "response size unknown or above limit; not caching");
        apply_status_headers(&mut parts.headers, &scope.status());
        return Response::from_parts(parts, body);
    }

    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "failed to read GraphQL response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut execution = match serde_json::from_slice::<Value>(&bytes) {
        Ok(execution) if execution.is_object() => execution,
        Ok(_) => {
            debug!("executor response is not a GraphQL object; not caching");
            return Response::from_parts(parts, Body::from(bytes));
        }
        Err(err) => {
            debug!(error = %err, "executor response is not GraphQL JSON; not caching");
            return Response::from_parts(parts, Body::from(bytes));
        }
    };

    let status = scope.on_response_finalize(&mut execution);
    let body = if restore {
        match execution.to_json() {
            Ok(encoded) => {
                parts.headers.remove(header::CONTENT_LENGTH);
                Bytes::from(encoded)
            }
            Err(err) => {
                warn!(error = %err, "failed to encode finalized response");
                bytes
            }
        }
    } else {
        bytes
    };

    apply_status_headers(&mut parts.headers, &status);
    Response::from_parts(parts, Body::from(body))
}

/// True when the body announces an exact or upper size within `limit`.
fn fits_within(body: &Body, limit: usize) -> bool {
    body.size_hint()
        .upper()
        .is_some_and(|len| len <= limit as u64)
}

fn build_early_response(body: String, status: &PendingStatus) -> Response {
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    apply_status_headers(headers, status);
    response
}

fn apply_status_headers(headers: &mut axum::http::HeaderMap, status: &PendingStatus) {
    for (name, value) in status.headers() {
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(name), value);
            }
            Err(err) => warn!(header = name, error = %err, "invalid status header value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{Router, middleware, routing::post};
    use serde_json::{Map, Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::cache::backend::MemoryBackend;
    use crate::cache::config::{CacheConfig, FieldCacheConfig, QueryCacheConfig};
    use crate::cache::hooks::PathSegment;
    use crate::cache::status::{FIELD_CACHE_HEADER, QUERY_CACHE_HEADER};

    /// Executor that resolves a single `post` root field.
    fn app(registry: Arc<CacheRegistry>, calls: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/graphql",
                post(move |request: Request<Body>| {
                    let calls = Arc::clone(&calls);
                    async move {
                        let scope = request.extensions().get::<SharedScope>().cloned();
                        let path = [PathSegment::Field("post".to_string())];
                        let arguments = Map::new();
                        let resolution = scope.map_or(Resolution::Continue, |mut scope| {
                            scope.on_before_field_resolve(&FieldResolve {
                                path: &path,
                                arguments: &arguments,
                                resolver: "RootQuery.post",
                            })
                        });
                        let post = match resolution {
                            Resolution::Skip => Value::Null,
                            Resolution::Continue => {
                                calls.fetch_add(1, Ordering::SeqCst);
                                json!({"title": "A Post"})
                            }
                        };
                        axum::Json(json!({"data": {"zeta": 1, "post": post, "alpha": 2}}))
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(
                GraphQLCacheState::new(registry),
                graphql_cache_layer,
            ))
    }

    fn graphql_request(query: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/graphql")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"query": query}).to_string()))
            .expect("request should build")
    }

    async fn send(app: &Router, query: &str) -> (Response, Value) {
        let response = app
            .clone()
            .oneshot(graphql_request(query))
            .await
            .expect("router should respond");
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .expect("body should buffer");
        let value = serde_json::from_slice(&bytes).expect("body should be json");
        (Response::from_parts(parts, Body::empty()), value)
    }

    /// Executor answering every request with a fixed status and body.
    fn fixed_app(
        registry: Arc<CacheRegistry>,
        status: StatusCode,
        body: String,
        calls: Arc<AtomicUsize>,
    ) -> Router {
        Router::new()
            .route(
                "/graphql",
                post(move || {
                    let calls = Arc::clone(&calls);
                    let body = body.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        (status, [(header::CONTENT_TYPE, "application/json")], body)
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(
                GraphQLCacheState::new(registry),
                graphql_cache_layer,
            ))
    }

    async fn send_raw(app: &Router, request: Request<Body>) -> (Response, Bytes) {
        let response = app.clone().oneshot(request).await.expect("router should respond");
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .expect("body should buffer");
        (Response::from_parts(parts, Body::empty()), bytes)
    }

    fn header_value<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
        response.headers().get(name).and_then(|v| v.to_str().ok())
    }

    fn registry(config: CacheConfig) -> Arc<CacheRegistry> {
        Arc::new(CacheRegistry::with_backend(
            config,
            Arc::new(MemoryBackend::new()),
        ))
    }

    #[tokio::test]
    async fn field_cache_reports_miss_then_hit() {
        let config = CacheConfig {
            fields: vec![FieldCacheConfig::new("getPosts", "post")],
            ..CacheConfig::default()
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(registry(config), Arc::clone(&calls));
        let query = "query getPosts { post { title } }";

        let (first, body) = send(&app, query).await;
        assert_eq!(header_value(&first, FIELD_CACHE_HEADER), Some("MISS:post"));
        assert_eq!(body["data"]["post"]["title"], "A Post");

        let (second, body) = send(&app, query).await;
        assert_eq!(header_value(&second, FIELD_CACHE_HEADER), Some("HIT:post"));
        assert_eq!(body["data"]["post"]["title"], "A Post");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn query_cache_hit_skips_executor() {
        let config = CacheConfig {
            queries: vec![QueryCacheConfig::new("*").expire(60)],
            ..CacheConfig::default()
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(registry(config), Arc::clone(&calls));

        let (first, _) = send(&app, "{ post { title } }").await;
        assert_eq!(header_value(&first, QUERY_CACHE_HEADER), Some("MISS"));

        let (second, body) = send(&app, "{ post { title } }").await;
        assert_eq!(header_value(&second, QUERY_CACHE_HEADER), Some("HIT"));
        assert_eq!(
            header_value(&second, header::CONTENT_TYPE.as_str()),
            Some("application/json")
        );
        assert_eq!(body["data"]["post"]["title"], "A Post");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unmatched_requests_carry_no_status_headers() {
        let config = CacheConfig {
            fields: vec![FieldCacheConfig::new("getPosts", "post")],
            ..CacheConfig::default()
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(registry(config), Arc::clone(&calls));

        let (response, _) = send(&app, "query getPages { post { title } }").await;
        assert!(response.headers().get(FIELD_CACHE_HEADER).is_none());
        assert!(response.headers().get(QUERY_CACHE_HEADER).is_none());
    }

    #[tokio::test]
    async fn restored_field_keeps_response_key_order() {
        let config = CacheConfig {
            fields: vec![FieldCacheConfig::new("getPosts", "post")],
            ..CacheConfig::default()
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(registry(config), Arc::clone(&calls));
        let query = "query getPosts { zeta post { title } alpha }";

        send(&app, query).await;
        let (hit, body) = send(&app, query).await;
        assert_eq!(header_value(&hit, FIELD_CACHE_HEADER), Some("HIT:post"));
        let keys: Vec<&str> = body["data"]
            .as_object()
            .expect("data object")
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, ["zeta", "post", "alpha"]);
    }

    #[tokio::test]
    async fn response_bytes_are_forwarded_and_replayed_verbatim() {
        let config = CacheConfig {
            queries: vec![QueryCacheConfig::new("*")],
            ..CacheConfig::default()
        };
        let raw = r#"{"data":{"zeta":1,"alpha":2}}"#;
        let calls = Arc::new(AtomicUsize::new(0));
        let app = fixed_app(registry(config), StatusCode::OK, raw.to_string(), Arc::clone(&calls));

        let (miss, bytes) = send_raw(&app, graphql_request("{ zeta alpha }")).await;
        assert_eq!(header_value(&miss, QUERY_CACHE_HEADER), Some("MISS"));
        assert_eq!(bytes, raw.as_bytes());

        let (hit, bytes) = send_raw(&app, graphql_request("{ zeta alpha }")).await;
        assert_eq!(header_value(&hit, QUERY_CACHE_HEADER), Some("HIT"));
        assert_eq!(bytes, raw.as_bytes());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unmatched_response_keeps_its_bytes() {
        let config = CacheConfig {
            fields: vec![FieldCacheConfig::new("getPosts", "post")],
            ..CacheConfig::default()
        };
        let raw = "{ \"data\": { \"zeta\": 1.50, \"alpha\": 2 } }";
        let calls = Arc::new(AtomicUsize::new(0));
        let app = fixed_app(registry(config), StatusCode::OK, raw.to_string(), calls);

        let (response, bytes) = send_raw(&app, graphql_request("query getPages { zeta alpha }")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(bytes, raw.as_bytes());
    }

    #[tokio::test]
    async fn oversized_response_passes_through_uncached() {
        let config = CacheConfig {
            queries: vec![QueryCacheConfig::new("*")],
            response_body_limit_bytes: 1024,
            ..CacheConfig::default()
        };
        let raw = json!({"data": {"blob": "x".repeat(2048)}}).to_string();
        let calls = Arc::new(AtomicUsize::new(0));
        let app = fixed_app(registry(config), StatusCode::OK, raw.clone(), Arc::clone(&calls));

        for _ in 0..2 {
            let (response, bytes) = send_raw(&app, graphql_request("{ blob }")).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(
                header_value(&response, header::CONTENT_TYPE.as_str()),
                Some("application/json")
            );
            assert_ne!(header_value(&response, QUERY_CACHE_HEADER), Some("HIT"));
            assert_eq!(bytes, raw.as_bytes());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn oversized_request_still_reaches_executor() {
        let config = CacheConfig {
            queries: vec![QueryCacheConfig::new("*")],
            response_body_limit_bytes: 64,
            ..CacheConfig::default()
        };
        let raw = r#"{"data":{"post":null}}"#;
        let calls = Arc::new(AtomicUsize::new(0));
        let app = fixed_app(registry(config), StatusCode::OK, raw.to_string(), Arc::clone(&calls));
        let query = format!("{{ post {} }}", " ".repeat(128));

        for _ in 0..2 {
            let (response, bytes) = send_raw(&app, graphql_request(&query)).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get(QUERY_CACHE_HEADER).is_none());
            assert_eq!(bytes, raw.as_bytes());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_executor_response_is_untouched_and_not_cached() {
        let config = CacheConfig {
            queries: vec![QueryCacheConfig::new("*")],
            ..CacheConfig::default()
        };
        let raw = r#"{"data":{"post":{"title":"partial"}}}"#;
        let calls = Arc::new(AtomicUsize::new(0));
        let app = fixed_app(
            registry(config),
            StatusCode::SERVICE_UNAVAILABLE,
            raw.to_string(),
            Arc::clone(&calls),
        );

        for _ in 0..2 {
            let (response, bytes) = send_raw(&app, graphql_request("{ post { title } }")).await;
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
            assert!(response.headers().get(QUERY_CACHE_HEADER).is_none());
            assert_eq!(bytes, raw.as_bytes());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_graphql_bodies_pass_through() {
        let config = CacheConfig {
            queries: vec![QueryCacheConfig::new("*")],
            ..CacheConfig::default()
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(registry(config), Arc::clone(&calls));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/graphql")
            .body(Body::from("not json"))
            .expect("request should build");
        let response = app.oneshot(request).await.expect("router should respond");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(QUERY_CACHE_HEADER).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
