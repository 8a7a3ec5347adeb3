// Admin and scrape HTTP server
// Decision: Scrape paths are not known at startup; exporters publish them through the
// route channel and the fallback handler serves them from a shared table.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use nodewatch_control::{AgentContext, ControlError, ErrorKind};
use nodewatch_pipeline::{RouteHandler, RouteRegistration};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Scrape path to handler, filled at runtime
pub type RouteTable = Arc<RwLock<HashMap<String, RouteHandler>>>;

/// Shared state of every handler
#[derive(Clone)]
pub struct HttpState {
    pub ctx: AgentContext,
    pub routes: RouteTable,
}

impl HttpState {
    pub fn new(ctx: AgentContext, routes: RouteTable) -> Self {
        Self { ctx, routes }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Result of a load/unload request
#[derive(Debug, Serialize)]
pub struct LifecycleResponse {
    /// Whether the call changed the loaded state
    pub changed: bool,
    pub loaded: bool,
}

/// One module as seen by the agent
#[derive(Debug, Serialize)]
pub struct ModuleSummary {
    pub name: String,
    pub status: String,
    pub pipelines: Vec<String>,
    pub running: bool,
}

/// Error body returned by admin endpoints
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub kind: ErrorKind,
    #[serde(skip)]
    pub status: StatusCode,
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Closed => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Convert | ErrorKind::Start | ErrorKind::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            error: err.to_string(),
            kind,
            status,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Build the agent router
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/admin/pipelines/load", post(load_pipelines))
        .route("/admin/pipelines/unload", post(unload_pipelines))
        .route("/admin/modules", get(list_modules))
        .fallback(scrape)
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Install every published scrape path into `table` until the channel closes
pub fn spawn_route_installer(
    mut registrations: mpsc::Receiver<RouteRegistration>,
    table: RouteTable,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(registration) = registrations.recv().await {
            info!(path = %registration.path, "Installing scrape route");
            table
                .write()
                .insert(registration.path, registration.handler);
        }
        debug!("Route channel closed");
    })
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// POST /admin/pipelines/load - Start every registered pipeline
async fn load_pipelines(
    State(state): State<HttpState>,
) -> Result<Json<LifecycleResponse>, ApiError> {
    let changed = state.ctx.pipelines.pipeline_load().await?;
    Ok(Json(LifecycleResponse {
        changed,
        loaded: true,
    }))
}

/// POST /admin/pipelines/unload - Stop every pipeline, keeping registrations
async fn unload_pipelines(
    State(state): State<HttpState>,
) -> Result<Json<LifecycleResponse>, ApiError> {
    let changed = state.ctx.pipelines.pipeline_unload().await?;
    Ok(Json(LifecycleResponse {
        changed,
        loaded: false,
    }))
}

/// GET /admin/modules - Desired modules with their pipeline state
async fn list_modules(State(state): State<HttpState>) -> Json<Vec<ModuleSummary>> {
    let mut summaries = Vec::new();
    for module in state.ctx.config.modules().await {
        let pipelines = state
            .ctx
            .pipelines
            .pipeline_names(&module.name)
            .await
            .unwrap_or_default();
        let running = state.ctx.pipelines.is_running(&module.name).await;
        summaries.push(ModuleSummary {
            status: module.status.to_string(),
            name: module.name,
            pipelines,
            running,
        });
    }
    Json(summaries)
}

async fn scrape(State(state): State<HttpState>, uri: Uri) -> Response {
    let handler = state.routes.read().get(uri.path()).cloned();
    match handler {
        Some(handler) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handler(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use nodewatch_control::ControlConfig;
    use nodewatch_pipeline::{Module, PluginRegistry};
    use std::time::Duration;
    use tower::ServiceExt;

    fn state(registry: PluginRegistry) -> (HttpState, mpsc::Receiver<RouteRegistration>) {
        let (ctx, rx) = AgentContext::new(&ControlConfig::default(), registry).unwrap();
        ctx.start().unwrap();
        (HttpState::new(ctx, RouteTable::default()), rx)
    }

    async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _rx) = state(PluginRegistry::new());
        let (status, body) = send(router(state.clone()), "GET", "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        state.ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_unload_then_load() {
        let (state, _rx) = state(PluginRegistry::new());
        let app = router(state.clone());

        let (status, body) = send(app.clone(), "POST", "/admin/pipelines/unload").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["changed"], true);
        assert_eq!(json["loaded"], false);

        let (status, body) = send(app.clone(), "POST", "/admin/pipelines/unload").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["changed"], false);

        let (status, _) = send(app, "POST", "/admin/pipelines/load").await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.ctx.pipelines.is_loaded().await);
        state.ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_load_while_loaded_conflicts() {
        let (state, _rx) = state(PluginRegistry::new());
        let (status, body) = send(router(state.clone()), "POST", "/admin/pipelines/load").await;

        assert_eq!(status, StatusCode::CONFLICT);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["kind"], "already_exists");
        state.ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let (state, _rx) = state(PluginRegistry::new());
        let (status, _) = send(router(state.clone()), "GET", "/nothing-here").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        state.ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_route_installer_serves_published_paths() {
        let (state, _rx) = state(PluginRegistry::new());
        let (tx, rx) = mpsc::channel(4);
        let installer = spawn_route_installer(rx, Arc::clone(&state.routes));

        let handler: RouteHandler = Arc::new(|| "up 1\n".to_string());
        tx.send(RouteRegistration {
            path: "/metrics".to_string(),
            handler,
        })
        .await
        .unwrap();
        drop(tx);
        installer.await.unwrap();

        let (status, body) = send(router(state.clone()), "GET", "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "up 1\n");
        state.ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_exporter_module_is_scrapable() {
        let registry = nodewatch_plugins::default_registry().unwrap();
        let (state, rx) = state(registry);
        let installer = spawn_route_installer(rx, Arc::clone(&state.routes));
        let app = router(state.clone());

        let module = Module::from_yaml(
            r#"
name: mysql
pipelines:
  - name: status
    structure:
      sources: [{ plugin: static, config: { interval_ms: 50, messages: [{ name: mysql_up, value: 1 }] } }]
      sink: { exporter: { plugin: prometheus, config: { path: /mysql } } }
"#,
        )
        .unwrap();
        tokio_test::assert_ok!(state.ctx.config.add(module).await);

        let mut body = String::new();
        for _ in 0..100 {
            let (status, text) = send(app.clone(), "GET", "/mysql").await;
            if status == StatusCode::OK && text.contains("mysql_up") {
                body = text;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(body.contains("mysql_up"), "scrape never returned the metric");

        let (status, body) = send(app, "GET", "/admin/modules").await;
        assert_eq!(status, StatusCode::OK);
        let modules: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(modules[0]["name"], "mysql");
        assert_eq!(modules[0]["status"], "active");
        assert_eq!(modules[0]["pipelines"][0], "status");
        assert_eq!(modules[0]["running"], true);

        state.ctx.shutdown().await;
        installer.abort();
    }
}
