//! axum adapter for the voila-db request middleware.
//!
//! [`scope_middleware`] reduces each request to the framework-agnostic
//! descriptor, resolves a scoped database handle through a shared
//! [`DbRouter`], and attaches it as a request extension; handlers receive it
//! via the [`DbScope`] extractor. Extraction and validation failures are
//! mapped straight to JSON error responses using each error's status code.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use axum::{middleware, routing::get, Json, Router};
//! use voila_db::DbRouter;
//! use voila_db_axum::{scope_middleware, DbScope, ScopeState};
//!
//! # async fn build() -> Result<(), Box<dyn std::error::Error>> {
//! async fn whoami(DbScope(scope): DbScope) -> Json<serde_json::Value> {
//!     Json(serde_json::json!({ "tenant": scope.tenant_id().map(|t| t.to_string()) }))
//! }
//!
//! let router = Arc::new(DbRouter::from_env()?);
//! let app: Router = Router::new()
//!     .route("/whoami", get(whoami))
//!     .layer(middleware::from_fn_with_state(
//!         ScopeState::new(router),
//!         scope_middleware,
//!     ));
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{FromRequestParts, RawPathParams, Request, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use voila_db::extract::{resolve_scope, RequestParts};
use voila_db::{DbRouter, ExtractorConfig, RequestScope};

/// Default cap for buffered JSON bodies (64 KiB).
pub const DEFAULT_BODY_LIMIT: usize = 64 * 1024;

/// Authenticated user context an auth layer may insert ahead of the scope
/// middleware; its fields participate in extraction as `userContext.*`.
#[derive(Clone, Debug)]
pub struct UserContext(pub Value);

/// Shared middleware state.
#[derive(Clone)]
pub struct ScopeState {
    router: Arc<DbRouter>,
    extractor: Arc<ExtractorConfig>,
    buffer_body: bool,
    body_limit: usize,
}

impl ScopeState {
    #[must_use]
    pub fn new(router: Arc<DbRouter>) -> Self {
        Self {
            router,
            extractor: Arc::new(ExtractorConfig::default()),
            buffer_body: false,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// Replace the extraction configuration (custom hook, header names).
    #[must_use]
    pub fn extractor(mut self, extractor: ExtractorConfig) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    /// Also consult JSON request bodies as an extraction source. Costs one
    /// buffering pass per request, so it is opt-in.
    #[must_use]
    pub fn buffer_body(mut self, enabled: bool) -> Self {
        self.buffer_body = enabled;
        self
    }

    #[must_use]
    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }
}

/// Resolve the request's scope and attach it as an extension.
pub async fn scope_middleware(
    State(state): State<ScopeState>,
    req: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();

    let mut descriptor = RequestParts {
        host: parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
        ..RequestParts::default()
    };

    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            descriptor
                .headers
                .insert(name.as_str().to_ascii_lowercase(), value.to_owned());
        }
    }

    if let Ok(raw) = RawPathParams::from_request_parts(&mut parts, &()).await {
        for (name, value) in &raw {
            descriptor
                .path_params
                .insert(name.to_owned(), value.to_owned());
        }
    }

    if let Some(query) = parts.uri.query() {
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            descriptor
                .query_params
                .insert(name.into_owned(), value.into_owned());
        }
    }

    descriptor.user_context = parts
        .extensions
        .get::<UserContext>()
        .map(|ctx| ctx.0.clone());

    let body = if state.buffer_body && is_json(&parts) {
        match axum::body::to_bytes(body, state.body_limit).await {
            Ok(bytes) => {
                descriptor.body = serde_json::from_slice(&bytes).ok();
                Body::from(bytes)
            }
            Err(err) => {
                tracing::debug!(error = %err, "request body exceeds buffering limit");
                return problem(
                    StatusCode::BAD_REQUEST,
                    "request body too large to buffer for scope extraction",
                );
            }
        }
    } else {
        body
    };

    match resolve_scope(&state.router, &state.extractor, &descriptor).await {
        Ok(scope) => {
            parts.extensions.insert(scope);
            next.run(Request::from_parts(parts, body)).await
        }
        Err(err) => error_response(&err),
    }
}

/// Extractor handing handlers the request's [`RequestScope`].
#[derive(Clone, Debug)]
pub struct DbScope(pub RequestScope);

impl<S> FromRequestParts<S> for DbScope
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestScope>()
            .cloned()
            .map(DbScope)
            .ok_or_else(|| {
                problem(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "request scope missing; is scope_middleware installed on this route?",
                )
            })
    }
}

/// Map a router error to a JSON problem response using its status code.
#[must_use]
pub fn error_response(err: &voila_db::Error) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    problem(status, &err.to_string())
}

fn problem(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": { "message": message, "status": status.as_u16() }
        })),
    )
        .into_response()
}

fn is_json(parts: &Parts) -> bool {
    parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
}

// ===================== tests =====================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use axum::routing::{get, post};
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;
    use voila_db::RouterConfig;

    async fn whoami(DbScope(scope): DbScope) -> Json<Value> {
        Json(json!({
            "tenant": scope.tenant_id().map(ToString::to_string),
            "org": scope.org_id().map(ToString::to_string),
        }))
    }

    async fn create_user(DbScope(scope): DbScope) -> Result<Json<Value>, Response> {
        let created = scope
            .db()
            .model("users")
            .create(json!({"email": "x@e"}))
            .await
            .map_err(|e| error_response(&e))?;
        Ok(Json(created))
    }

    async fn app(buffer_body: bool) -> (Router, Arc<DbRouter>) {
        let config = RouterConfig::builder()
            .base_url("sqlite::memory:")
            .tenants(true)
            .build()
            .unwrap();
        let router = Arc::new(DbRouter::new(config).unwrap());
        router
            .tenant("bootstrap")
            .await
            .unwrap()
            .raw_execute("CREATE TABLE users (id INTEGER PRIMARY KEY, tenant_id TEXT, email TEXT)")
            .await
            .unwrap();
        let state = ScopeState::new(router.clone()).buffer_body(buffer_body);
        let app = Router::new()
            .route("/whoami", get(whoami))
            .route("/users", post(create_user))
            .layer(axum::middleware::from_fn_with_state(state, scope_middleware));
        (app, router)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn header_scope_reaches_the_handler() {
        let (app, _router) = app(false).await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header("x-tenant-id", "acme")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["tenant"], json!("acme"));
    }

    #[tokio::test]
    async fn missing_tenant_is_a_400_listing_sources() {
        let (app, _router) = app(false).await;
        let response = app
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        let message = body["error"]["message"].as_str().unwrap();
        assert!(message.contains("x-tenant-id header"));
        assert!(message.contains("subdomain"));
        assert_eq!(body["error"]["status"], json!(400));
    }

    #[tokio::test]
    async fn invalid_tenant_is_rejected() {
        let (app, _router) = app(false).await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header("x-tenant-id", "not valid!")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn subdomain_extraction_works_through_host() {
        let (app, _router) = app(false).await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header(header::HOST, "zen.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["tenant"], json!("zen"));
    }

    #[tokio::test]
    async fn writes_through_the_attached_handle_are_scoped() {
        let (app, router) = app(false).await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/users")
                    .header("x-tenant-id", "t1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["tenant_id"], json!("t1"));

        // The row is invisible to another tenant.
        let other = router.tenant("t2").await.unwrap();
        assert!(other.model("users").find_many().all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn buffered_json_body_is_an_extraction_source() {
        let (app, _router) = app(true).await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/users")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{\"tenantId\": \"from-body\"}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["tenant_id"], json!("from-body"));
    }
}
