mod config;
mod drive;
mod http;
mod idempotency;
mod metrics;
mod models;
mod pdf;
mod pipeline;
mod pool;
mod retry;
mod scheduler;
mod security;
mod tasks;
#[cfg(test)]
mod testing;

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use config::ServiceConfig;
use drive::{GoogleDriveStorage, Uploader};
use eyre::WrapErr;
use idempotency::IdempotencyCache;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    ApiError, CancelResponse, CreateTaskRequest, CreateTaskResponse, TaskDetail, TaskSummary,
};
use pdf::{Fetcher, HttpSource};
use pipeline::Pipeline;
use scheduler::{Scheduler, SchedulerHandle};
use security::{AuthContext, AuthState, require_api_auth};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tasks::{
    MemoryTaskStore, StoreError, SupabaseTaskStore, TaskId, TaskStatus, TaskStore, Transition,
    TransitionError,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();
    if let Err(err) = run().await {
        error!(target = "labelhub.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    let config = ServiceConfig::from_env();

    let store: Arc<dyn TaskStore> = match SupabaseTaskStore::from_env() {
        Some(store) => {
            info!(target = "labelhub.store", "using supabase task store");
            Arc::new(store)
        }
        None => {
            warn!(target = "labelhub.store", "SUPABASE_URL not set; tasks are kept in memory");
            Arc::new(MemoryTaskStore::new())
        }
    };

    let retry = config.pipeline.retry;
    let fetcher = Fetcher::new(Arc::new(HttpSource::new(http::build_client())), retry);
    let uploader = Uploader::new(
        Arc::new(GoogleDriveStorage::from_env()),
        retry,
        config.pipeline.drive_folder_id.clone(),
        config.pipeline.reauth_budget,
    );
    let pipeline = Pipeline::new(
        store.clone(),
        fetcher,
        uploader,
        config.pipeline.download_workers,
        retry,
    );
    let (scheduler, scheduler_task) =
        Scheduler::new(store.clone(), pipeline, config.scheduler.clone()).spawn();

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing prometheus recorder")?;

    let state = AppState {
        store,
        scheduler: scheduler.clone(),
        openapi: Arc::new(load_openapi()),
        idempotency: IdempotencyCache::new(config.redis_url.as_deref(), config.idempotency_ttl_secs),
        prometheus_handle,
        max_label_urls: config.max_label_urls,
    };
    let router = app(state, AuthState::from_env(), config.body_limit);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(target = "labelhub.api", "listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    scheduler_task.await.wrap_err("scheduler task")?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!(target = "labelhub.api", "shutdown requested");
    }
}

#[derive(Clone)]
struct AppState {
    store: Arc<dyn TaskStore>,
    scheduler: SchedulerHandle,
    openapi: Arc<serde_json::Value>,
    idempotency: IdempotencyCache,
    prometheus_handle: PrometheusHandle,
    max_label_urls: usize,
}

fn app(state: AppState, auth: AuthState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/combine-label", post(create_task).get(list_tasks))
        .route("/combine-label/{id}", get(get_task))
        .route("/combine-label/{id}/cancel", post(cancel_task))
        .route_layer(middleware::from_fn_with_state(auth, require_api_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

fn load_openapi() -> serde_json::Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or(json!({"openapi": "3.0.3"}))
}

/// Liveness check. No auth.
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "labelhub-api-rs",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::Unauthorized);
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> Response {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>LabelHub API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    (
        [(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
        .into_response()
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Submit a batch of label URLs to be combined into one PDF.
///
/// - Method: `POST`
/// - Path: `/combine-label`
/// - Auth: `Authorization: Bearer <key>` or `X-Api-Key: <key>`
/// - Body: `CreateTaskRequest`
/// - Response: `201` with `CreateTaskResponse`; processing happens later
async fn create_task(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    headers: HeaderMap,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), AppError> {
    crate::metrics::inc_requests("/combine-label");
    if payload.urls.is_empty() {
        return Err(AppError::BadRequest {
            code: "no_urls",
            detail: "No URLs provided".into(),
        });
    }
    if payload.urls.len() > state.max_label_urls {
        return Err(AppError::BadRequest {
            code: "too_many_urls",
            detail: format!("At most {} URLs per task", state.max_label_urls),
        });
    }

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if let Some(key) = &idempotency_key
        && let Some(existing) = state.idempotency.get(&context.owner_id, key).await
    {
        info!(target = "labelhub.api", owner_id = %context.owner_id, task_id = existing.task_id, "idempotent_replay");
        return Ok((StatusCode::CREATED, Json(existing)));
    }

    let task = state.store.create(&context.owner_id, payload.urls).await?;
    info!(
        target = "labelhub.api",
        owner_id = %context.owner_id,
        api_key = %context.api_key_id,
        task_id = task.id,
        urls = task.total_urls,
        "task_created",
    );
    let response = CreateTaskResponse::from(&task);
    if let Some(key) = &idempotency_key {
        state.idempotency.put(&context.owner_id, key, &response).await;
    }
    state.scheduler.nudge();
    Ok((StatusCode::CREATED, Json(response)))
}

/// The caller's tasks, newest first.
async fn list_tasks(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<Vec<TaskSummary>>, AppError> {
    crate::metrics::inc_requests("/combine-label");
    let tasks = state.store.list_for_owner(&context.owner_id).await?;
    Ok(Json(tasks.iter().map(TaskSummary::from).collect()))
}

async fn get_task(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<TaskId>,
) -> Result<Json<TaskDetail>, AppError> {
    crate::metrics::inc_requests("/combine-label/{id}");
    match state.store.get(id).await? {
        Some(task) if task.owner_id == context.owner_id => Ok(Json(TaskDetail::from(task))),
        _ => Err(AppError::NotFound(id)),
    }
}

/// Cancel a task that has not started yet.
async fn cancel_task(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<TaskId>,
) -> Result<Json<CancelResponse>, AppError> {
    crate::metrics::inc_requests("/combine-label/{id}/cancel");
    let Some(task) = state.store.get(id).await? else {
        return Err(AppError::NotFound(id));
    };
    if task.owner_id != context.owner_id {
        return Err(AppError::NotFound(id));
    }

    let cancelled = match state.store.transition(id, Transition::Cancel).await {
        Ok(task) => task,
        // the scheduler claimed it between the read and the write
        Err(StoreError::Conflict(_)) => {
            return Err(AppError::from(StoreError::Transition(
                TransitionError::CancelNotPending {
                    status: TaskStatus::Processing,
                },
            )));
        }
        Err(err) => return Err(err.into()),
    };
    info!(target = "labelhub.api", owner_id = %context.owner_id, task_id = id, "task_cancelled");
    Ok(Json(CancelResponse {
        task_id: cancelled.id,
        status: cancelled.status,
        message: "Task cancelled".into(),
    }))
}

#[derive(Debug)]
enum AppError {
    BadRequest { code: &'static str, detail: String },
    NotFound(TaskId),
    Unauthorized,
    Store(StoreError),
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::BadRequest { code, detail } => {
                (StatusCode::BAD_REQUEST, ApiError::new(code, detail))
            }
            AppError::NotFound(id) | AppError::Store(StoreError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                ApiError::new("not_found", format!("task {id} not found")),
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    error: "unauthorized".into(),
                    detail: None,
                },
            ),
            AppError::Store(StoreError::Transition(err)) => {
                let status = match err {
                    TransitionError::CancelNotPending { .. } => StatusCode::BAD_REQUEST,
                    _ => StatusCode::CONFLICT,
                };
                (status, ApiError::new("invalid_transition", err.to_string()))
            }
            AppError::Store(StoreError::Conflict(id)) => (
                StatusCode::CONFLICT,
                ApiError::new("conflict", format!("task {id} was modified concurrently")),
            ),
            AppError::Store(err @ StoreError::Backend(_)) => {
                error!(target = "labelhub.api", error = %err, "task_store_failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ApiError::new("task_store_unavailable", err.to_string()),
                )
            }
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
