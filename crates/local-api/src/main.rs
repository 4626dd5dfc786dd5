use anyhow::Result;

mod streaming;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use chatrelay_common::{
    ConversationRecord, ConversationRequest, ConversationResponse, Error as CommonError,
    ErrorResponse, HealthResponse, HealthStatus, MetricsSnapshot, ObservableMetrics, RequestId,
};
use chatrelay_config::{AppConfig, ConfigLoader};
use chatrelay_runtime::{Completion, CompletionOrchestrator, CompletionSettings, OpenAiClient};
use chatrelay_store::{StoreFactory, StoreHandle};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
struct AppState {
    orchestrator: CompletionOrchestrator,
    store: StoreHandle,
    default_credential: Option<String>,
    default_stream: bool,
    start_time: SystemTime,
    metrics: ObservableMetrics,
}

impl AppState {
    fn new(
        config: &AppConfig,
        store: StoreHandle,
        orchestrator: CompletionOrchestrator,
        metrics: ObservableMetrics,
    ) -> Self {
        Self {
            orchestrator,
            store,
            default_credential: config.upstream.api_key.clone(),
            default_stream: config.upstream.stream,
            start_time: SystemTime::now(),
            metrics,
        }
    }
}

/// Error returned from handlers
struct ApiError(CommonError);

impl From<CommonError> for ApiError {
    fn from(err: CommonError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        match self.0 {
            // The completion service's own error body goes back untouched
            CommonError::Upstream { body, .. } => (status, Json(body)).into_response(),
            err => (status, Json(ErrorResponse::from(&err))).into_response(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    id: Option<String>,
}

fn extract_bearer(header: Option<&HeaderValue>) -> Option<String> {
    let value = header?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Credential from the request, falling back to the configured default
fn resolve_credential(headers: &HeaderMap, default: Option<&str>) -> Result<String, CommonError> {
    extract_bearer(headers.get(AUTHORIZATION))
        .or_else(|| default.filter(|key| !key.is_empty()).map(str::to_string))
        .ok_or_else(|| {
            CommonError::Config(
                "API key not configured, set OPENAI_API_KEY or send an Authorization header".into(),
            )
        })
}

async fn list_conversations(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationRecord>>, ApiError> {
    let records = state.store.list_all().await.map_err(|e| {
        error!("Failed to list conversations: {}", e);
        e
    })?;
    Ok(Json(records))
}

async fn post_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ConversationRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request_id = RequestId::new();

    // Credential first, then the body; both fail before anything is stored
    let checked = resolve_credential(&headers, state.default_credential.as_deref())
        .and_then(|credential| {
            let Json(request) = payload.map_err(|e| CommonError::Validation(e.body_text()))?;
            request.validate()?;
            Ok((credential, request))
        });
    let (credential, request) = match checked {
        Ok(checked) => checked,
        Err(e) => {
            warn!(%request_id, "Rejected conversation request: {}", e);
            state.metrics.record_error(None, &e).await;
            return Err(e.into());
        }
    };

    let is_streaming = request.stream.unwrap_or(state.default_stream);
    let tracked_request_id = state
        .metrics
        .start_request(request_id.clone(), is_streaming)
        .await;
    info!(
        %request_id,
        conversation = %request.conversation_id,
        stream = is_streaming,
        "Handling conversation turn"
    );

    match state.orchestrator.run(request, &credential, is_streaming).await {
        Ok(Completion::Streaming(fragments)) => Ok(streaming::fragment_response(
            fragments,
            state.metrics.clone(),
            tracked_request_id,
        )),
        Ok(Completion::Finished(record)) => {
            state.metrics.complete_request(&tracked_request_id).await;
            Ok(Json(record).into_response())
        }
        Err(e) => {
            error!(%request_id, "Conversation turn failed: {}", e);
            state.metrics.record_error(Some(&tracked_request_id), &e).await;
            Err(e.into())
        }
    }
}

async fn delete_conversation(
    State(state): State<AppState>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let Some(id) = params.id.filter(|id| !id.is_empty()) else {
        state.store.clear().await?;
        info!("Cleared all conversations from {} store", state.store.backend());
        return Ok(Json(ConversationResponse {
            result: "Conversation cleared".to_string(),
        }));
    };

    if !state.store.has(&id).await? {
        return Err(CommonError::NotFound("Conversation not found".into()).into());
    }

    state.store.delete(&id).await?;
    info!("Deleted conversation {}", id);
    Ok(Json(ConversationResponse {
        result: "Conversation deleted".to_string(),
    }))
}

async fn method_not_allowed() -> ApiError {
    ApiError(CommonError::MethodNotAllowed)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    // Apply 2-second timeout to the store probe
    let probe = state.store.has("chatrelay:health");
    let store_reachable = matches!(
        tokio::time::timeout(Duration::from_secs(2), probe).await,
        Ok(Ok(_))
    );

    let uptime = state.start_time.elapsed().unwrap_or_default().as_secs();

    Json(HealthResponse {
        status: if store_reachable {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        },
        store_reachable,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
    })
}

async fn version() -> Json<serde_json::Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "api": "ChatRelay Conversation API",
        "model_api": "OpenAI Compatible"
    }))
}

async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot().await)
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/conversations",
            get(list_conversations)
                .post(post_conversation)
                .fallback(method_not_allowed),
        )
        .route(
            "/api/conversations/delete",
            delete(delete_conversation).fallback(method_not_allowed),
        )
        .route("/healthz", get(health_check))
        .route("/version", get(version))
        .route("/metrics", get(get_metrics))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into()))
        .init();

    info!("Starting ChatRelay server");

    // Load configuration
    let config = ConfigLoader::load(None)?;
    if config.upstream.api_key.is_none() {
        warn!("No default API key configured; requests must carry an Authorization header");
    }

    // Store backend is fixed for the life of the process
    let store = StoreFactory::create(&config.store).await?;

    let client = OpenAiClient::new(config.upstream.base_url.as_str())?;
    let metrics = ObservableMetrics::new();
    let orchestrator = CompletionOrchestrator::new(
        store.clone(),
        Arc::new(client),
        CompletionSettings::from(&config.upstream),
    )
    .with_metrics(metrics.clone());

    let state = AppState::new(&config, store.clone(), orchestrator, metrics);

    // Build router with tracing layer
    let app = build_router(state).layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.shutdown().await?;
    info!("Server stopped");

    Ok(())
}
