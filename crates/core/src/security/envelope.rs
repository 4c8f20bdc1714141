//! Persisted session envelope and the outcome of validating it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
	#[default]
	High,
	Standard,
}

/// Sealed representation of a session plus the metadata used to judge it on reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnvelope {
	pub session_id: String,
	#[serde(default)]
	pub user_data: serde_json::Value,
	/// Unix milliseconds.
	pub created_at: u64,
	pub last_activity: u64,
	/// Fingerprint at creation time. Compared against the current one on every validation.
	pub client_fingerprint: String,
	#[serde(default)]
	pub security_level: SecurityLevel,
	#[serde(default)]
	pub requires_reauth: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
	NoSession,
	/// Inactive longer than the configured timeout; the envelope has been invalidated.
	Expired,
}

impl InvalidReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::NoSession => "no_session",
			Self::Expired => "session_expired",
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
	Valid(SessionEnvelope),
	/// Usable, but the environment changed since the session was sealed.
	RequiresReauth { envelope: SessionEnvelope, reason: String },
	Invalid(InvalidReason),
}

impl Validation {
	pub fn envelope(&self) -> Option<&SessionEnvelope> {
		match self {
			Self::Valid(envelope) | Self::RequiresReauth { envelope, .. } => Some(envelope),
			Self::Invalid(_) => None,
		}
	}

	pub fn is_valid(&self) -> bool {
		self.envelope().is_some()
	}
}
