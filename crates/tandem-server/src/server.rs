use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use tandem_engine::rollover::run_rollover_loop;
use tandem_engine::{ChangeDispatcher, EngineContext};
use tandem_settings::{ScheduleSettings, ServerSettings};

use crate::auth::TokenAuthority;
use crate::handlers::HandlerState;
use crate::rpc::{RpcRequest, RpcResponse};

/// Server configuration.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9470,
            request_timeout_secs: 30,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            request_timeout_secs: settings.request_timeout_secs,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
    pub auth: Arc<TokenAuthority>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve until `cancel` fires.
pub async fn start(
    config: ServerConfig,
    state: AppState,
    cancel: CancellationToken,
) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(state, Duration::from_secs(config.request_timeout_secs.max(1)));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "Tandem server started");

    let server = tokio::spawn(async move {
        let shutdown = cancel.clone();
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
        {
            tracing::error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        tasks: vec![server],
    })
}

/// Spawn the change dispatcher and the rollover loop.
pub fn spawn_background(
    ctx: &EngineContext,
    schedule: &ScheduleSettings,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let dispatcher = ChangeDispatcher::from_settings(ctx.clone(), schedule);
    vec![
        tokio::spawn(dispatcher.run(cancel.clone())),
        tokio::spawn(run_rollover_loop(
            ctx.clone(),
            Duration::from_secs(schedule.rollover_interval_secs.max(1)),
            cancel.clone(),
        )),
    ]
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn attach(&mut self, tasks: impl IntoIterator<Item = JoinHandle<()>>) {
        self.tasks.extend(tasks);
    }

    /// Wait for the server and every attached task to stop.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task panicked");
            }
        }
    }
}

async fn rpc_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Json<RpcResponse> {
    let request: RpcRequest = match serde_json::from_str(&body) {
        Ok(req) => req,
        Err(_) => return Json(RpcResponse::parse_error()),
    };

    let caller = match state.auth.caller(&headers) {
        Ok(caller) => Some(caller),
        Err(e) => {
            tracing::debug!(method = %request.method, error = %e, "request without valid identity");
            None
        }
    };

    let params = request.params.unwrap_or(serde_json::json!({}));
    let resp = crate::handlers::dispatch(
        &state.handler_state,
        caller.as_ref(),
        &request.method,
        &params,
        request.id,
    )
    .await;
    Json(resp)
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let params = serde_json::json!({});
    let resp = crate::handlers::dispatch(&state.handler_state, None, "health", &params, None).await;

    let status = resp
        .result
        .as_ref()
        .and_then(|r| r.get("status"))
        .and_then(|s| s.as_str())
        .unwrap_or("unknown");

    let http_status = if status == "healthy" {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    (http_status, Json(resp.result.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tests::fixture;
    use tandem_core::ids::AccountId;

    fn config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn serves_health_and_rpc() {
        let f = fixture();
        let auth = Arc::new(TokenAuthority::new("test-secret"));
        let state = AppState {
            handler_state: Arc::clone(&f.state),
            auth: Arc::clone(&auth),
        };
        let cancel = CancellationToken::new();
        let handle = start(config(), state, cancel.clone()).await.unwrap();
        assert!(handle.port > 0);

        let base = format!("http://127.0.0.1:{}", handle.port);
        let health = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(health.status(), 200);
        let body: serde_json::Value = health.json().await.unwrap();
        assert_eq!(body["status"], "healthy");

        let client = reqwest::Client::new();
        let token = auth.issue(&AccountId::from_raw("a"), chrono::Duration::hours(1)).unwrap();
        let resp: serde_json::Value = client
            .post(format!("{base}/rpc"))
            .bearer_auth(&token)
            .json(&serde_json::json!({
                "id": 7,
                "method": "pairing.request",
                "params": {"toAccountId": "b"}
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp["id"], 7);
        assert_eq!(resp["success"], true);
        assert_eq!(resp["result"]["toAccount"], "b");

        let anonymous: serde_json::Value = client
            .post(format!("{base}/rpc"))
            .json(&serde_json::json!({"id": 8, "method": "progress.get"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(anonymous["error"]["code"], "UNAUTHORIZED");

        let garbage: serde_json::Value = client
            .post(format!("{base}/rpc"))
            .body("{not json")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(garbage["error"]["code"], "PARSE_ERROR");

        cancel.cancel();
        handle.join().await;
    }

    #[tokio::test]
    async fn background_tasks_stop_on_cancel() {
        let f = fixture();
        let cancel = CancellationToken::new();
        let tasks = spawn_background(&f.state.ctx, &ScheduleSettings::default(), &cancel);
        assert_eq!(tasks.len(), 2);
        cancel.cancel();
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[test]
    fn config_from_settings() {
        let settings = ServerSettings {
            port: 1234,
            ..ServerSettings::default()
        };
        let config = ServerConfig::from(&settings);
        assert_eq!(config.port, 1234);
        assert_eq!(config.request_timeout_secs, settings.request_timeout_secs);
    }
}
