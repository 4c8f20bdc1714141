//! Scripted in-memory admission backend for lifecycle tests.
//!
//! ```ignore
//! let (backend, controller) = FakeBackendBuilder::new()
//!     .script(Endpoint::Create, [Reply::Status(500), Reply::Ok])
//!     .build();
//! // drive the manager...
//! assert_eq!(controller.count(Endpoint::Create), 2);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use marcus_protocol::{
	AdmissionState, CreateSessionResponse, HeartbeatResponse, QueueResponse, QueueStatus, RemoveResponse, SessionStatus, StatusResponse,
};
use parking_lot::Mutex;

use crate::backend::{SessionBackend, UnloadDelivery};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Endpoint {
	Create,
	Status,
	Queue,
	Heartbeat,
	Remove,
	Unload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
	Ok,
	/// 2xx with `success: false`.
	Unsuccessful,
	NotFound,
	Status(u16),
	/// `create` never completes; other endpoints treat it as a failure.
	Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
	Create(Option<String>),
	Status(String),
	Queue,
	Heartbeat(String),
	Remove(String),
	Unload(String),
}

impl Call {
	fn endpoint(&self) -> Endpoint {
		match self {
			Self::Create(_) => Endpoint::Create,
			Self::Status(_) => Endpoint::Status,
			Self::Queue => Endpoint::Queue,
			Self::Heartbeat(_) => Endpoint::Heartbeat,
			Self::Remove(_) => Endpoint::Remove,
			Self::Unload(_) => Endpoint::Unload,
		}
	}
}

#[derive(Default)]
struct FakeState {
	scripts: HashMap<Endpoint, VecDeque<Reply>>,
	defaults: HashMap<Endpoint, Reply>,
	calls: Vec<Call>,
	next_id: u32,
}

impl FakeState {
	fn next_reply(&mut self, call: Call) -> Reply {
		let endpoint = call.endpoint();
		self.calls.push(call);
		self.scripts
			.get_mut(&endpoint)
			.and_then(VecDeque::pop_front)
			.or_else(|| self.defaults.get(&endpoint).copied())
			.unwrap_or(Reply::Ok)
	}
}

#[derive(Default)]
pub(crate) struct FakeBackendBuilder {
	state: FakeState,
}

impl FakeBackendBuilder {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	/// Reply used once every scripted reply for `endpoint` is consumed.
	pub(crate) fn reply(mut self, endpoint: Endpoint, reply: Reply) -> Self {
		self.state.defaults.insert(endpoint, reply);
		self
	}

	/// Replies consumed in order by successive calls to `endpoint`.
	pub(crate) fn script(mut self, endpoint: Endpoint, replies: impl IntoIterator<Item = Reply>) -> Self {
		self.state.scripts.entry(endpoint).or_default().extend(replies);
		self
	}

	pub(crate) fn build(self) -> (Arc<FakeBackend>, FakeBackendController) {
		let state = Arc::new(Mutex::new(self.state));
		(
			Arc::new(FakeBackend {
				state: Arc::clone(&state),
			}),
			FakeBackendController { state },
		)
	}
}

/// Inspects calls and rescripts replies after the backend has been handed off.
#[derive(Clone)]
pub(crate) struct FakeBackendController {
	state: Arc<Mutex<FakeState>>,
}

impl FakeBackendController {
	pub(crate) fn calls(&self) -> Vec<Call> {
		self.state.lock().calls.clone()
	}

	pub(crate) fn count(&self, endpoint: Endpoint) -> usize {
		self.state.lock().calls.iter().filter(|c| c.endpoint() == endpoint).count()
	}

	pub(crate) fn reply(&self, endpoint: Endpoint, reply: Reply) {
		let mut state = self.state.lock();
		state.scripts.remove(&endpoint);
		state.defaults.insert(endpoint, reply);
	}
}

pub(crate) struct FakeBackend {
	state: Arc<Mutex<FakeState>>,
}

fn status_for(session_id: &str) -> SessionStatus {
	SessionStatus {
		session_id: session_id.to_string(),
		user_id: None,
		created_at: 1_718_000_000.0,
		last_activity: 1_718_000_000.0,
		status: AdmissionState::Active,
		queue_position: None,
		active_users_count: Some(1),
		estimated_wait_time: None,
	}
}

fn queue() -> QueueStatus {
	QueueStatus {
		active_sessions: 1,
		max_concurrent_users: 5,
		waiting_queue_length: 0,
		available_slots: 4,
	}
}

fn failure(reply: Reply, not_found_expires: bool) -> Error {
	match reply {
		Reply::NotFound if not_found_expires => Error::SessionExpired,
		Reply::NotFound => Error::Status {
			status: 404,
			body: "Not Found".to_string(),
		},
		Reply::Status(status) => Error::Status {
			status,
			body: "scripted failure".to_string(),
		},
		Reply::Ok | Reply::Unsuccessful | Reply::Hang => Error::Rejected("unexpected reply".to_string()),
	}
}

#[async_trait]
impl SessionBackend for FakeBackend {
	async fn create(&self, user_id: Option<&str>) -> Result<CreateSessionResponse> {
		let reply = self.state.lock().next_reply(Call::Create(user_id.map(str::to_string)));
		match reply {
			Reply::Hang => std::future::pending().await,
			Reply::Ok => {
				let id = {
					let mut state = self.state.lock();
					state.next_id += 1;
					format!("session-{}", state.next_id)
				};
				Ok(CreateSessionResponse {
					success: true,
					session: Some(status_for(&id)),
					queue_status: Some(queue()),
				})
			}
			Reply::Unsuccessful => Ok(CreateSessionResponse {
				success: false,
				session: None,
				queue_status: None,
			}),
			other => Err(failure(other, false)),
		}
	}

	async fn status(&self, session_id: &str) -> Result<StatusResponse> {
		match self.state.lock().next_reply(Call::Status(session_id.to_string())) {
			Reply::Ok => Ok(StatusResponse {
				success: true,
				session_status: Some(status_for(session_id)),
				queue_status: Some(queue()),
			}),
			Reply::Unsuccessful => Ok(StatusResponse {
				success: false,
				session_status: None,
				queue_status: None,
			}),
			other => Err(failure(other, true)),
		}
	}

	async fn queue(&self) -> Result<QueueResponse> {
		match self.state.lock().next_reply(Call::Queue) {
			Reply::Ok | Reply::Unsuccessful => Ok(QueueResponse {
				success: true,
				queue_status: Some(queue()),
			}),
			other => Err(failure(other, false)),
		}
	}

	async fn heartbeat(&self, session_id: &str) -> Result<HeartbeatResponse> {
		match self.state.lock().next_reply(Call::Heartbeat(session_id.to_string())) {
			Reply::Ok => Ok(HeartbeatResponse {
				success: true,
				session_status: Some(status_for(session_id)),
			}),
			Reply::Unsuccessful => Ok(HeartbeatResponse {
				success: false,
				session_status: None,
			}),
			other => Err(failure(other, true)),
		}
	}

	async fn remove(&self, session_id: &str) -> Result<RemoveResponse> {
		match self.state.lock().next_reply(Call::Remove(session_id.to_string())) {
			Reply::Ok | Reply::Unsuccessful => Ok(RemoveResponse {
				success: true,
				message: Some(format!("Session {session_id} removed")),
			}),
			other => Err(failure(other, true)),
		}
	}

	fn send_unload(&self, session_id: &str) -> UnloadDelivery {
		match self.state.lock().next_reply(Call::Unload(session_id.to_string())) {
			Reply::Ok => UnloadDelivery::Beacon,
			_ => UnloadDelivery::Undelivered,
		}
	}
}
