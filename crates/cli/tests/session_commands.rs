use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tempfile::TempDir;

const UNREACHABLE: &str = "http://127.0.0.1:9";

struct Workspace {
	dir: TempDir,
}

impl Workspace {
	fn new() -> Self {
		Self {
			dir: tempfile::tempdir().expect("tempdir should be created"),
		}
	}

	fn state_path(&self) -> PathBuf {
		self.dir.path().join("state").join("session.json")
	}

	fn config_path(&self) -> PathBuf {
		self.dir.path().join("config.json")
	}

	fn write_config(&self, config: Value) {
		std::fs::write(self.config_path(), config.to_string()).expect("config should be written");
	}

	/// Runs the binary with `-f json` and returns (success, parsed stdout, stderr).
	fn run(&self, api_url: &str, args: &[&str]) -> (bool, Value, String) {
		let (success, stdout, stderr) = self.exec(api_url, args);
		let parsed = serde_json::from_str::<Value>(&stdout).unwrap_or_else(|_| json!({ "raw": stdout }));
		(success, parsed, stderr)
	}

	/// Like [`Workspace::run`] for commands that print event lines before the result.
	fn run_stream(&self, api_url: &str, args: &[&str]) -> (bool, Vec<Value>, String) {
		let (success, stdout, stderr) = self.exec(api_url, args);
		let values = serde_json::Deserializer::from_str(&stdout)
			.into_iter::<Value>()
			.collect::<Result<Vec<_>, _>>()
			.unwrap_or_else(|err| panic!("stdout is not a JSON stream ({err}): {stdout}"));
		(success, values, stderr)
	}

	fn exec(&self, api_url: &str, args: &[&str]) -> (bool, String, String) {
		let state = self.state_path();
		let config = self.config_path();
		let output = Command::new(env!("CARGO_BIN_EXE_marcus-session"))
			.current_dir(self.dir.path())
			.env_remove("MARCUS_API_URL")
			.env_remove("MARCUS_WS_URL")
			.env_remove("RUST_LOG")
			.args(["-f", "json", "--api-url", api_url])
			.args(["--state", path_str(&state), "--config", path_str(&config)])
			.args(args)
			.output()
			.expect("failed to execute marcus-session");

		let stdout = String::from_utf8_lossy(&output.stdout).to_string();
		let stderr = String::from_utf8_lossy(&output.stderr).to_string();
		(output.status.success(), stdout, stderr)
	}
}

fn path_str(path: &Path) -> &str {
	path.to_str().expect("temp paths are utf-8")
}

#[test]
fn config_reports_effective_urls_and_paths() {
	let ws = Workspace::new();
	ws.write_config(json!({ "heartbeatIntervalMs": 5000 }));

	let (success, out, stderr) = ws.run(UNREACHABLE, &["config"]);
	assert!(success, "config failed: {stderr}");
	assert_eq!(out["ok"], true);
	assert_eq!(out["command"], "config");
	assert_eq!(out["data"]["channelUrl"], "ws://127.0.0.1:9");
	assert_eq!(out["data"]["config"]["apiBaseUrl"], UNREACHABLE);
	assert_eq!(out["data"]["config"]["heartbeatIntervalMs"], 5000);
	assert_eq!(out["data"]["statePath"], path_str(&ws.state_path()));
}

#[test]
fn status_without_session_fails_with_code() {
	let ws = Workspace::new();

	let (success, out, _) = ws.run(UNREACHABLE, &["status"]);
	assert!(!success);
	assert_eq!(out["ok"], false);
	assert_eq!(out["error"]["code"], "NO_ACTIVE_SESSION");
	assert!(out.get("data").is_none());
}

#[test]
fn end_without_session_is_a_no_op() {
	let ws = Workspace::new();

	let (success, out, stderr) = ws.run(UNREACHABLE, &["end"]);
	assert!(success, "end failed: {stderr}");
	assert_eq!(out["data"]["outcome"], "no_session");
}

#[test]
fn malformed_config_file_is_rejected() {
	let ws = Workspace::new();
	std::fs::write(ws.config_path(), "{ not json").unwrap();

	let (success, out, _) = ws.run(UNREACHABLE, &["queue"]);
	assert!(!success);
	assert_eq!(out["error"]["code"], "CONFIG_ERROR");
	assert!(out["error"]["message"].as_str().unwrap().contains("config.json"));
}

#[test]
fn rotate_key_persists_fresh_key_material() {
	let ws = Workspace::new();

	let (success, out, stderr) = ws.run(UNREACHABLE, &["rotate-key"]);
	assert!(success, "rotate-key failed: {stderr}");
	assert_eq!(out["data"]["rotated"], true);
	assert_eq!(out["data"]["sessionReadable"], false);
	assert!(!out["data"]["fingerprint"].as_str().unwrap().is_empty());
	assert!(ws.state_path().exists());

	let (success, out, _) = ws.run(UNREACHABLE, &["security-log", "--critical"]);
	assert!(success);
	assert_eq!(out["data"]["events"], json!([]));
}

#[test]
fn creation_reports_attempts_after_retry_budget() {
	let ws = Workspace::new();
	ws.write_config(json!({ "createBackoffInitialMs": 10, "createBackoffCapMs": 20, "requestTimeoutMs": 2000 }));

	let (success, out, _) = ws.run(UNREACHABLE, &["create"]);
	assert!(!success);
	assert_eq!(out["error"]["code"], "SESSION_CREATION_FAILED");
	assert_eq!(out["error"]["details"]["attempts"], 3);

	let (_, out, _) = ws.run(UNREACHABLE, &["status"]);
	assert_eq!(out["error"]["code"], "NO_ACTIVE_SESSION");
}

#[derive(Clone, Default)]
struct Admission {
	sessions: Arc<Mutex<Vec<String>>>,
}

fn session_json(id: &str) -> Value {
	json!({
		"session_id": id,
		"created_at": 1718000000.0,
		"last_activity": 1718000000.0,
		"status": "active",
		"active_users_count": 1
	})
}

fn queue_json() -> Value {
	json!({ "active_sessions": 1, "max_concurrent_users": 5, "waiting_queue_length": 0, "available_slots": 4 })
}

async fn create(State(state): State<Admission>) -> Response {
	let id = format!("s{}", state.sessions.lock().len() + 1);
	state.sessions.lock().push(id.clone());
	axum::Json(json!({ "success": true, "session": session_json(&id), "queue_status": queue_json() })).into_response()
}

async fn status(State(state): State<Admission>, UrlPath(id): UrlPath<String>) -> Response {
	if !state.sessions.lock().contains(&id) {
		return (StatusCode::NOT_FOUND, axum::Json(json!({ "detail": "Session not found" }))).into_response();
	}
	axum::Json(json!({ "success": true, "session_status": session_json(&id), "queue_status": queue_json() })).into_response()
}

async fn heartbeat(State(state): State<Admission>, UrlPath(id): UrlPath<String>) -> Response {
	if !state.sessions.lock().contains(&id) {
		return StatusCode::NOT_FOUND.into_response();
	}
	axum::Json(json!({ "success": true, "session_status": session_json(&id) })).into_response()
}

async fn remove(State(state): State<Admission>, UrlPath(id): UrlPath<String>) -> Response {
	let mut sessions = state.sessions.lock();
	let before = sessions.len();
	sessions.retain(|s| *s != id);
	if sessions.len() == before {
		return StatusCode::NOT_FOUND.into_response();
	}
	axum::Json(json!({ "success": true, "message": format!("Session {id} removed") })).into_response()
}

async fn queue() -> Response {
	axum::Json(json!({ "success": true, "queue_status": queue_json() })).into_response()
}

async fn serve(state: Admission) -> String {
	let app = Router::new()
		.route("/session/create", post(create))
		.route("/session/status/{id}", get(status))
		.route("/session/queue", get(queue))
		.route("/session/heartbeat/{id}", post(heartbeat))
		.route("/session/remove/{id}", post(remove).delete(remove))
		.with_state(state);
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		axum::serve(listener, app).await.unwrap();
	});
	format!("http://{addr}")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_survives_across_invocations_until_ended() {
	let state = Admission::default();
	let api = serve(state.clone()).await;
	let ws = Workspace::new();

	let (success, out, stderr) = ws.run(&api, &["create", "--user-id", "ana"]);
	assert!(success, "create failed: {stderr}");
	assert_eq!(out["data"]["id"], "s1");
	assert_eq!(out["data"]["securityLevel"], "high");

	let (success, out, stderr) = ws.run(&api, &["create"]);
	assert!(success, "second create failed: {stderr}");
	assert_eq!(out["data"]["id"], "s1", "stored session should be reused");
	assert_eq!(state.sessions.lock().len(), 1);

	let (success, out, _) = ws.run(&api, &["status"]);
	assert!(success);
	assert_eq!(out["data"]["sessionStatus"]["status"], "active");

	let (success, out, _) = ws.run(&api, &["heartbeat"]);
	assert!(success);
	assert_eq!(out["data"]["route"], "http");

	let (success, out, _) = ws.run(&api, &["queue"]);
	assert!(success);
	assert_eq!(out["data"]["available_slots"], 4);

	let (success, out, _) = ws.run(&api, &["end"]);
	assert!(success);
	assert_eq!(out["data"]["outcome"], "ended");
	assert_eq!(out["data"]["sessionId"], "s1");
	assert!(state.sessions.lock().is_empty());

	let (success, out, _) = ws.run(&api, &["status"]);
	assert!(!success);
	assert_eq!(out["error"]["code"], "NO_ACTIVE_SESSION");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn backend_forgetting_the_session_expires_it_locally() {
	let state = Admission::default();
	let api = serve(state.clone()).await;
	let ws = Workspace::new();

	let (success, _, stderr) = ws.run(&api, &["create"]);
	assert!(success, "create failed: {stderr}");
	state.sessions.lock().clear();

	let (success, out, _) = ws.run(&api, &["heartbeat"]);
	assert!(!success);
	assert_eq!(out["error"]["code"], "SESSION_EXPIRED");
	assert_eq!(out["error"]["details"]["status"], 404);

	let (_, out, _) = ws.run(&api, &["status"]);
	assert_eq!(out["error"]["code"], "NO_ACTIVE_SESSION");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watch_keeps_running_after_replacing_an_expired_session() {
	let state = Admission::default();
	let api = serve(state.clone()).await;
	let ws = Workspace::new();

	let (success, _, stderr) = ws.run(&api, &["create"]);
	assert!(success, "create failed: {stderr}");
	state.sessions.lock().clear();

	let (success, values, stderr) = ws.run_stream(&api, &["watch", "--duration", "1"]);
	assert!(success, "watch failed: {stderr}");
	let (summary, events) = values.split_last().expect("watch prints a result");
	assert_eq!(events.first().map(|e| e["event"].clone()), Some(json!("sessionExpired")));
	assert_eq!(summary["data"]["sessionId"], "s2");
	assert_eq!(summary["data"]["stoppedBy"], "duration");
	assert_eq!(*state.sessions.lock(), vec!["s2".to_string()]);
}
