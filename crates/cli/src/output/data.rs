//! Command payloads carried in [`CommandResult::data`](super::CommandResult).

use std::path::PathBuf;

use marcus_session::protocol::{QueueStatus, SessionStatus};
use marcus_session::{EndOutcome, SecurityEvent, SessionConfig, SessionEvent};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatData {
	/// `channel` or `http`.
	pub route: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_status: Option<SessionStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndData {
	pub outcome: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

impl EndData {
	pub fn new(outcome: EndOutcome, session_id: Option<String>) -> Self {
		let outcome = match outcome {
			EndOutcome::NoSession => "no_session",
			EndOutcome::Ended => "ended",
			EndOutcome::AlreadyEnded => "already_ended",
		};
		Self { outcome, session_id }
	}
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateKeyData {
	pub rotated: bool,
	pub fingerprint: String,
	/// Whether a sealed session was still readable after re-keying.
	pub session_readable: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityLogData {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
	pub fingerprint: String,
	pub activity_count: u64,
	pub events: Vec<SecurityEvent>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigData {
	pub config_path: PathBuf,
	pub state_path: PathBuf,
	pub channel_url: String,
	pub config: SessionConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchSummary {
	pub session_id: String,
	pub events: usize,
	/// `duration`, `interrupt`, `expired` or `reconnect_failed`.
	pub stopped_by: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub ended: Option<EndData>,
}

/// One streamed line of `watch` output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
	pub event: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub code: Option<u16>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_status: Option<SessionStatus>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub queue_status: Option<QueueStatus>,
}

impl From<&SessionEvent> for EventRecord {
	fn from(event: &SessionEvent) -> Self {
		let mut record = Self {
			event: event.kind().as_str(),
			code: None,
			message: None,
			session_status: None,
			queue_status: None,
		};
		match event {
			SessionEvent::Disconnected { code, reason } => {
				record.code = *code;
				record.message = Some(reason.clone()).filter(|r| !r.is_empty());
			}
			SessionEvent::StatusUpdate {
				session_status,
				queue_status,
			}
			| SessionEvent::QueueUpdate {
				session_status,
				queue_status,
			} => {
				record.session_status = session_status.clone();
				record.queue_status = *queue_status;
			}
			SessionEvent::RequiresReauth { reason } => record.message = Some(reason.clone()),
			SessionEvent::Error { message } => record.message = Some(message.clone()),
			SessionEvent::Connected | SessionEvent::SessionExpired | SessionEvent::ReconnectFailed => {}
		}
		record
	}
}
