use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::MuxError;
use crate::queue::QueueDraft;
use crate::relay::Relay;
use crate::tmux::{Payload, WindowTarget};

/// Application state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
}

/// Create router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/sessions/:session", delete(kill_session))
        .route("/api/sessions/:session/switch", post(switch_session))
        .route("/api/sessions/:session/rename", post(rename_session))
        .route(
            "/api/sessions/:session/windows",
            get(list_windows).post(create_window),
        )
        .route("/api/sessions/:session/windows/:index", delete(close_window))
        .route("/api/sessions/:session/windows/:index/select", post(select_window))
        .route("/api/sessions/:session/windows/:index/rename", post(rename_window))
        .route("/api/sessions/:session/windows/:index/output", get(window_output))
        .route("/api/sessions/:session/windows/:index/turns", get(window_turns))
        .route("/api/sessions/:session/windows/:index/send", post(send_text))
        .route("/api/sessions/:session/windows/:index/key/:key", post(send_key))
        .route(
            "/api/sessions/:session/windows/:index/queue",
            get(get_queue).put(replace_queue).post(push_queue),
        )
        .route(
            "/api/sessions/:session/windows/:index/queue/:id",
            delete(remove_queue_item),
        )
        .route("/api/sessions/:session/windows/:index/queue/play", post(play_queue))
        .route(
            "/api/sessions/:session/windows/:index/queue/clear",
            post(clear_queue),
        )
        .route("/api/dashboard", get(dashboard))
        // Single-session routes for the phone page, addressing the default session
        .route("/api/output", get(compat_output))
        .route("/api/send", post(compat_send))
        .route("/api/key/:key", get(compat_key))
        .route("/api/windows", get(compat_windows))
        .route("/api/windows/new", post(compat_new_window))
        .route(
            "/api/windows/:index",
            post(compat_select_window).delete(compat_close_window),
        )
        .with_state(state)
}

type ApiResult = Result<Json<Value>, AppError>;

fn ok() -> ApiResult {
    Ok(Json(json!({ "ok": true })))
}

fn target(session: String, index: u32) -> Result<WindowTarget, AppError> {
    Ok(WindowTarget::new(session, index)?)
}

#[derive(Debug, Deserialize)]
struct NameBody {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    text: String,
}

#[derive(Debug, Deserialize)]
struct CmdBody {
    #[serde(default)]
    cmd: String,
}

#[derive(Debug, Deserialize)]
struct PlayBody {
    playing: bool,
}

#[derive(Debug, Deserialize)]
struct ReplaceBody {
    items: Vec<QueueDraft>,
}

// Sessions

/// GET /api/sessions
async fn list_sessions(State(state): State<AppState>) -> ApiResult {
    let sessions = state.relay.sessions().await?;
    Ok(Json(json!({ "sessions": sessions })))
}

/// POST /api/sessions
async fn create_session(State(state): State<AppState>, Json(body): Json<NameBody>) -> ApiResult {
    let name = body
        .name
        .ok_or_else(|| MuxError::InvalidTarget("session name is required".to_string()))?;
    state.relay.create_session(&name).await?;
    Ok(Json(json!({ "ok": true, "name": name })))
}

/// DELETE /api/sessions/:session
async fn kill_session(State(state): State<AppState>, Path(session): Path<String>) -> ApiResult {
    state.relay.kill_session(&session).await?;
    ok()
}

/// POST /api/sessions/:session/switch
async fn switch_session(State(state): State<AppState>, Path(session): Path<String>) -> ApiResult {
    state.relay.switch_session(&session).await?;
    ok()
}

/// POST /api/sessions/:session/rename
async fn rename_session(
    State(state): State<AppState>,
    Path(session): Path<String>,
    Json(body): Json<NameBody>,
) -> ApiResult {
    let name = body
        .name
        .ok_or_else(|| MuxError::InvalidTarget("new session name is required".to_string()))?;
    state.relay.rename_session(&session, &name).await?;
    ok()
}

// Windows

/// GET /api/sessions/:session/windows
async fn list_windows(State(state): State<AppState>, Path(session): Path<String>) -> ApiResult {
    let windows = state.relay.windows(&session).await?;
    Ok(Json(json!({ "windows": windows })))
}

/// POST /api/sessions/:session/windows
async fn create_window(
    State(state): State<AppState>,
    Path(session): Path<String>,
    body: Option<Json<NameBody>>,
) -> ApiResult {
    let name = body.and_then(|Json(b)| b.name);
    let window = state.relay.create_window(&session, name.as_deref()).await?;
    Ok(Json(json!({ "window": window })))
}

/// DELETE /api/sessions/:session/windows/:index
async fn close_window(
    State(state): State<AppState>,
    Path((session, index)): Path<(String, u32)>,
) -> ApiResult {
    state.relay.close_window(&target(session, index)?).await?;
    ok()
}

/// POST /api/sessions/:session/windows/:index/select
async fn select_window(
    State(state): State<AppState>,
    Path((session, index)): Path<(String, u32)>,
) -> ApiResult {
    state.relay.select_window(&target(session, index)?).await?;
    ok()
}

/// POST /api/sessions/:session/windows/:index/rename
async fn rename_window(
    State(state): State<AppState>,
    Path((session, index)): Path<(String, u32)>,
    Json(body): Json<NameBody>,
) -> ApiResult {
    state
        .relay
        .rename_window(&target(session, index)?, body.name.as_deref())
        .await?;
    ok()
}

// Output and input

/// GET /api/sessions/:session/windows/:index/output
async fn window_output(
    State(state): State<AppState>,
    Path((session, index)): Path<(String, u32)>,
) -> ApiResult {
    let output = state.relay.output(&target(session, index)?).await?;
    Ok(Json(json!(output)))
}

/// GET /api/sessions/:session/windows/:index/turns
async fn window_turns(
    State(state): State<AppState>,
    Path((session, index)): Path<(String, u32)>,
) -> ApiResult {
    let turns = state.relay.turns(&target(session, index)?).await?;
    Ok(Json(json!({ "turns": turns })))
}

/// POST /api/sessions/:session/windows/:index/send
async fn send_text(
    State(state): State<AppState>,
    Path((session, index)): Path<(String, u32)>,
    Json(body): Json<TextBody>,
) -> ApiResult {
    state
        .relay
        .send(&target(session, index)?, &Payload::Text(body.text))
        .await?;
    ok()
}

/// POST /api/sessions/:session/windows/:index/key/:key
async fn send_key(
    State(state): State<AppState>,
    Path((session, index, key)): Path<(String, u32, String)>,
) -> ApiResult {
    let target = target(session, index)?;
    let payload = Payload::key(&key)?;
    state.relay.send(&target, &payload).await?;
    ok()
}

// Queue

/// GET /api/sessions/:session/windows/:index/queue
async fn get_queue(
    State(state): State<AppState>,
    Path((session, index)): Path<(String, u32)>,
) -> ApiResult {
    Ok(Json(json!(state.relay.queue(&target(session, index)?))))
}

/// PUT /api/sessions/:session/windows/:index/queue
async fn replace_queue(
    State(state): State<AppState>,
    Path((session, index)): Path<(String, u32)>,
    Json(body): Json<ReplaceBody>,
) -> ApiResult {
    let queue = state.relay.replace_queue(&target(session, index)?, body.items);
    Ok(Json(json!(queue)))
}

/// POST /api/sessions/:session/windows/:index/queue
async fn push_queue(
    State(state): State<AppState>,
    Path((session, index)): Path<(String, u32)>,
    Json(body): Json<TextBody>,
) -> ApiResult {
    let item = state.relay.enqueue(&target(session, index)?, body.text)?;
    Ok(Json(json!({ "item": item })))
}

/// DELETE /api/sessions/:session/windows/:index/queue/:id
async fn remove_queue_item(
    State(state): State<AppState>,
    Path((session, index, id)): Path<(String, u32, u64)>,
) -> ApiResult {
    state.relay.dequeue(&target(session, index)?, id)?;
    ok()
}

/// POST /api/sessions/:session/windows/:index/queue/play
async fn play_queue(
    State(state): State<AppState>,
    Path((session, index)): Path<(String, u32)>,
    Json(body): Json<PlayBody>,
) -> ApiResult {
    let queue = state.relay.set_playing(&target(session, index)?, body.playing);
    Ok(Json(json!(queue)))
}

/// POST /api/sessions/:session/windows/:index/queue/clear
async fn clear_queue(
    State(state): State<AppState>,
    Path((session, index)): Path<(String, u32)>,
) -> ApiResult {
    Ok(Json(json!(state.relay.clear_done(&target(session, index)?))))
}

/// GET /api/dashboard
async fn dashboard(State(state): State<AppState>) -> ApiResult {
    let windows = state.relay.dashboard().await?;
    Ok(Json(json!({ "windows": windows })))
}

// Default-session routes

async fn default_target(state: &AppState) -> Result<WindowTarget, AppError> {
    Ok(state.relay.active_window(state.relay.default_session()).await?)
}

/// GET /api/output
async fn compat_output(State(state): State<AppState>) -> ApiResult {
    let output = state.relay.output(&default_target(&state).await?).await?;
    Ok(Json(json!({ "output": output.snapshot.normalized })))
}

/// POST /api/send
async fn compat_send(State(state): State<AppState>, Json(body): Json<CmdBody>) -> ApiResult {
    let target = default_target(&state).await?;
    state.relay.send(&target, &Payload::Text(body.cmd)).await?;
    ok()
}

/// GET /api/key/:key
async fn compat_key(State(state): State<AppState>, Path(key): Path<String>) -> ApiResult {
    let payload = Payload::key(&key)?;
    let target = default_target(&state).await?;
    state.relay.send(&target, &payload).await?;
    ok()
}

/// GET /api/windows
async fn compat_windows(State(state): State<AppState>) -> ApiResult {
    let windows = state.relay.windows(state.relay.default_session()).await?;
    Ok(Json(json!({ "windows": windows })))
}

/// POST /api/windows/new - creates and switches to a new window
async fn compat_new_window(State(state): State<AppState>) -> ApiResult {
    let session = state.relay.default_session();
    state.relay.ensure_default_session().await?;
    let window = state.relay.create_window(session, None).await?;
    state.relay.select_window(&window.target()).await?;
    ok()
}

/// POST /api/windows/:index
async fn compat_select_window(State(state): State<AppState>, Path(index): Path<u32>) -> ApiResult {
    let target = target(state.relay.default_session().to_string(), index)?;
    state.relay.select_window(&target).await?;
    ok()
}

/// DELETE /api/windows/:index
async fn compat_close_window(State(state): State<AppState>, Path(index): Path<u32>) -> ApiResult {
    let target = target(state.relay.default_session().to_string(), index)?;
    state.relay.close_window(&target).await?;
    ok()
}

/// Error handling
#[derive(Debug)]
pub struct AppError(MuxError);

impl From<MuxError> for AppError {
    fn from(err: MuxError) -> Self {
        AppError(err)
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self.0 {
            MuxError::NotFound(_) => StatusCode::NOT_FOUND,
            MuxError::InvalidTarget(_) | MuxError::UnsupportedKey(_) => StatusCode::BAD_REQUEST,
            MuxError::DispatchFailed(_) => StatusCode::BAD_GATEWAY,
            MuxError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::tmux::fake::FakeRunner;
    use crate::tmux::Markers;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(fake: &Arc<FakeRunner>) -> Router {
        let relay = Relay::new(&RelayConfig::default(), fake.clone(), &Markers::default()).unwrap();
        create_router(AppState {
            relay: Arc::new(relay),
        })
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let fake = Arc::new(FakeRunner::new());
        fake.reply("list-sessions", "$0|1700000000|1|2|mobile\n");
        let (status, body) = call(app(&fake), "GET", "/api/sessions", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessions"][0]["name"], "mobile");
        assert_eq!(body["sessions"][0]["windows"], 2);
    }

    #[tokio::test]
    async fn test_unknown_key_is_bad_request() {
        let fake = Arc::new(FakeRunner::new());
        let (status, body) =
            call(app(&fake), "POST", "/api/sessions/mobile/windows/0/key/F13", None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "unsupported_key");
        assert_eq!(body["status"], 400);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_window_is_not_found() {
        let fake = Arc::new(FakeRunner::new());
        fake.fail("capture-pane", 1, "can't find window: 9\n");
        let (status, body) =
            call(app(&fake), "GET", "/api/sessions/mobile/windows/9/output", None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_send_text_targets_window() {
        let fake = Arc::new(FakeRunner::new());
        let (status, _) = call(
            app(&fake),
            "POST",
            "/api/sessions/work/windows/2/send",
            Some(json!({ "text": "git status" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(fake.calls()[0].args, ["send-keys", "-t", "=work:2", "-l", "--", "git status"]);
    }

    #[tokio::test]
    async fn test_failed_paste_is_bad_gateway() {
        let fake = Arc::new(FakeRunner::new());
        fake.fail("load-buffer", 1, "out of memory\n");
        let (status, body) = call(
            app(&fake),
            "POST",
            "/api/sessions/work/windows/2/send",
            Some(json!({ "text": "line one\nline two" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["kind"], "dispatch_failed");
    }

    #[tokio::test]
    async fn test_queue_routes() {
        let fake = Arc::new(FakeRunner::new());
        let app = app(&fake);
        let base = "/api/sessions/mobile/windows/1/queue";

        let (status, pushed) = call(app.clone(), "POST", base, Some(json!({ "text": "A" }))).await;
        assert_eq!(status, StatusCode::OK);
        let id = pushed["item"]["id"].as_u64().unwrap();

        let (_, queue) = call(app.clone(), "POST", &format!("{}/play", base), Some(json!({ "playing": true }))).await;
        assert_eq!(queue["playing"], true);
        assert_eq!(queue["items"][0]["text"], "A");

        let (status, _) = call(app.clone(), "DELETE", &format!("{}/{}", base, id), None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, queue) = call(app, "GET", base, None).await;
        assert_eq!(queue["items"], json!([]));
    }

    #[tokio::test]
    async fn test_compat_output_reads_active_window() {
        let fake = Arc::new(FakeRunner::new());
        fake.reply("list-windows", "@1|0|0|1|0|zsh\n@2|1|1|1|0|claude\n");
        fake.reply("capture-pane", "\x1b[1m● hi\x1b[0m\n> \n");
        let (status, body) = call(app(&fake), "GET", "/api/output", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["output"], "● hi\n>");
        assert_eq!(fake.calls()[1].args[4], "=mobile:1");
    }

    #[tokio::test]
    async fn test_compat_windows_select_and_close() {
        let fake = Arc::new(FakeRunner::new());
        let app = app(&fake);
        let (status, _) = call(app.clone(), "POST", "/api/windows/3", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(app, "DELETE", "/api/windows/3", None).await;
        assert_eq!(status, StatusCode::OK);

        assert_eq!(fake.subcommands(), ["select-window", "kill-window"]);
        assert_eq!(fake.calls()[1].args, ["kill-window", "-t", "=mobile:3"]);
    }
}
