//! HTTP server for the message API.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (auth, tracing, timeout)
//! - Serve until shutdown
//!
//! # Routes
//! - `POST /message`: cross-surface message protocol
//! - `GET /status`: current status
//! - `GET /rules`: rules installed in the rule table
//! - `POST /rules/evaluate`: directives (and resulting headers) for a URL
//! - `GET /status/stream`: WebSocket, one JSON status per pass

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::api::auth::api_auth_middleware;
use crate::api::dispatch::HeaderService;
use crate::api::messages::Reply;
use crate::config::ApiConfig;
use crate::engine::InMemoryRuleTable;
use crate::rules::{CompiledRule, HeaderDirective, ResourceType, SyncStatus};
use crate::status::StatusFanout;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<HeaderService>,
    pub table: Arc<InMemoryRuleTable>,
    pub fanout: StatusFanout,
    pub api_key: Option<Arc<str>>,
}

/// HTTP server for the message API.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    pub fn new(config: &ApiConfig, state: AppState) -> Self {
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// The router, for serving elsewhere or testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ApiConfig, state: AppState) -> Router {
        Router::new()
            .route("/message", post(message_handler))
            .route("/status", get(status_handler))
            .route("/status/stream", get(status_stream_handler))
            .route("/rules", get(rules_handler))
            .route("/rules/evaluate", post(evaluate_handler))
            .layer(middleware::from_fn_with_state(state.clone(), api_auth_middleware))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs))),
            )
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "API server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

async fn message_handler(State(state): State<AppState>, Json(raw): Json<Value>) -> Json<Reply> {
    Json(state.service.handle_value(raw).await)
}

async fn status_handler(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.service.config_store().snapshot().status())
}

async fn rules_handler(State(state): State<AppState>) -> Json<Vec<CompiledRule>> {
    Json(state.table.rules())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    pub url: String,
    #[serde(default = "default_resource_type")]
    pub resource_type: ResourceType,
    /// Request headers to run the directives against.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_resource_type() -> ResourceType {
    ResourceType::MainFrame
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EvaluateResponse {
    pub directives: Vec<HeaderDirective>,
    pub headers: BTreeMap<String, String>,
}

async fn evaluate_handler(
    State(state): State<AppState>,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<EvaluateResponse>, (StatusCode, String)> {
    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid value for {name}: {e}")))?;
        headers.append(name, value);
    }

    let directives = state.table.evaluate(&request.url, request.resource_type);
    state.table.apply(&request.url, request.resource_type, &mut headers);

    let headers = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    Ok(Json(EvaluateResponse { directives, headers }))
}

async fn status_stream_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| stream_status(socket, state))
}

async fn stream_status(socket: WebSocket, state: AppState) {
    let mut subscription = state.fanout.subscribe();
    let observer = subscription.id();
    tracing::debug!(observer = %observer, "Status stream opened");

    let (mut sender, mut receiver) = socket.split();

    let initial = state.service.config_store().snapshot().status();
    if send_status(&mut sender, &initial).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            status = subscription.recv() => {
                let Some(status) = status else { break };
                if send_status(&mut sender, &status).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!(observer = %observer, "Status stream closed");
}

async fn send_status<S>(sender: &mut S, status: &SyncStatus) -> Result<(), axum::Error>
where
    S: Sink<WsMessage, Error = axum::Error> + Unpin,
{
    let text = serde_json::to_string(status).map_err(axum::Error::new)?;
    sender.send(WsMessage::Text(text.into())).await
}
