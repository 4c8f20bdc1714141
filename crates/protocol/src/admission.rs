//! Payloads of the HTTP session admission API.

use serde::{Deserialize, Serialize};

/// Admission state of a session inside the backend queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionState {
	/// The session holds one of the concurrent processing slots.
	Active,
	/// The session is parked in the waiting queue.
	#[default]
	Waiting,
	/// A state this client does not know about yet.
	#[serde(other)]
	Other,
}

/// Per-session status as reported by `/session/create`, `/session/status/{id}`
/// and `/session/heartbeat/{id}`.
///
/// ```json
/// {
///   "session_id": "0b7f...",
///   "user_id": null,
///   "created_at": 1718000000.12,
///   "last_activity": 1718000042.5,
///   "status": "waiting",
///   "queue_position": 3,
///   "active_users_count": 5,
///   "estimated_wait_time": 540
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
	pub session_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
	/// Unix seconds (fractional) as issued by the backend clock.
	#[serde(default)]
	pub created_at: f64,
	#[serde(default)]
	pub last_activity: f64,
	#[serde(default)]
	pub status: AdmissionState,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub queue_position: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub active_users_count: Option<u32>,
	/// Estimated wait in seconds; only present while queued.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub estimated_wait_time: Option<u64>,
}

impl SessionStatus {
	pub fn is_active(&self) -> bool {
		self.status == AdmissionState::Active
	}
}

/// Global queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QueueStatus {
	#[serde(default)]
	pub active_sessions: u32,
	#[serde(default)]
	pub max_concurrent_users: u32,
	#[serde(default)]
	pub waiting_queue_length: u32,
	#[serde(default)]
	pub available_slots: u32,
}

/// Body of `POST /session/create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionResponse {
	#[serde(default)]
	pub success: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session: Option<SessionStatus>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub queue_status: Option<QueueStatus>,
}

/// Body of `GET /session/status/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
	#[serde(default)]
	pub success: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_status: Option<SessionStatus>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub queue_status: Option<QueueStatus>,
}

/// Body of `GET /session/queue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueResponse {
	#[serde(default = "default_true")]
	pub success: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub queue_status: Option<QueueStatus>,
}

/// Body of `POST /session/heartbeat/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
	#[serde(default)]
	pub success: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_status: Option<SessionStatus>,
}

/// Body of `DELETE|POST /session/remove/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveResponse {
	#[serde(default)]
	pub success: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

/// Error body produced by the backend for non-2xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
	pub detail: String,
}

fn default_true() -> bool {
	true
}
