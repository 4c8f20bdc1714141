//! Messages carried by the realtime session channel.
//!
//! Both directions use a JSON object discriminated by a `type` field:
//!
//! ```json
//! { "type": "queue_update", "session_status": { ... }, "queue_status": { ... } }
//! { "type": "heartbeat" }
//! ```

use serde::{Deserialize, Serialize};

use crate::admission::{QueueStatus, SessionStatus};

/// Server-to-client channel messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
	/// Reply to a heartbeat, or an unsolicited status push.
	StatusUpdate {
		#[serde(default)]
		session_status: Option<SessionStatus>,
		#[serde(default)]
		queue_status: Option<QueueStatus>,
	},
	/// Broadcast after any admission change in the queue.
	QueueUpdate {
		#[serde(default)]
		session_status: Option<SessionStatus>,
		#[serde(default)]
		queue_status: Option<QueueStatus>,
	},
	/// Server keepalive; must be answered with [`OutboundMessage::Pong`].
	Ping,
	/// Any `type` this client does not understand.
	#[serde(other)]
	Unknown,
}

impl InboundMessage {
	/// Wire name of the message `type`, `None` for [`InboundMessage::Unknown`].
	pub fn kind(&self) -> Option<&'static str> {
		match self {
			Self::StatusUpdate { .. } => Some("status_update"),
			Self::QueueUpdate { .. } => Some("queue_update"),
			Self::Ping => Some("ping"),
			Self::Unknown => None,
		}
	}
}

/// Client-to-server channel messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
	Heartbeat,
	Pong,
	Disconnect,
}

impl OutboundMessage {
	pub fn to_json(&self) -> String {
		match self {
			Self::Heartbeat => r#"{"type":"heartbeat"}"#,
			Self::Pong => r#"{"type":"pong"}"#,
			Self::Disconnect => r#"{"type":"disconnect"}"#,
		}
		.to_string()
	}
}
