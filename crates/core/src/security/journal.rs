//! Bounded security event journal.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
	SessionCreated,
	SessionInvalidated,
	FingerprintMismatch,
	RapidRequestsDetected,
	ExcessiveRequests,
	DevtoolsOpened,
	DevtoolsClosed,
	PageFocus,
	PageBlur,
	KeyRotated,
}

impl SecurityEventKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::SessionCreated => "session_created",
			Self::SessionInvalidated => "session_invalidated",
			Self::FingerprintMismatch => "fingerprint_mismatch",
			Self::RapidRequestsDetected => "rapid_requests_detected",
			Self::ExcessiveRequests => "excessive_requests",
			Self::DevtoolsOpened => "devtools_opened",
			Self::DevtoolsClosed => "devtools_closed",
			Self::PageFocus => "page_focus",
			Self::PageBlur => "page_blur",
			Self::KeyRotated => "key_rotated",
		}
	}

	/// Kinds that are also surfaced as warnings.
	pub fn is_critical(&self) -> bool {
		matches!(self, Self::FingerprintMismatch | Self::SessionInvalidated | Self::DevtoolsOpened)
	}
}

impl std::fmt::Display for SecurityEventKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
	pub kind: SecurityEventKind,
	/// Unix milliseconds.
	pub timestamp: u64,
	#[serde(default)]
	pub data: serde_json::Value,
}

/// Upper bound on retained security events.
pub const MAX_JOURNAL_EVENTS: usize = 50;

/// Ring buffer of [`SecurityEvent`]s; the oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct SecurityJournal {
	capacity: usize,
	events: VecDeque<SecurityEvent>,
}

impl SecurityJournal {
	pub fn new(capacity: usize) -> Self {
		let capacity = capacity.clamp(1, MAX_JOURNAL_EVENTS);
		Self {
			capacity,
			events: VecDeque::with_capacity(capacity),
		}
	}

	pub fn push(&mut self, event: SecurityEvent) {
		while self.events.len() >= self.capacity {
			self.events.pop_front();
		}
		self.events.push_back(event);
	}

	pub fn len(&self) -> usize {
		self.events.len()
	}

	pub fn is_empty(&self) -> bool {
		self.events.is_empty()
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn snapshot(&self) -> Vec<SecurityEvent> {
		self.events.iter().cloned().collect()
	}

	pub fn count(&self, kind: SecurityEventKind) -> usize {
		self.events.iter().filter(|e| e.kind == kind).count()
	}
}
