//! Session security monitoring.
//!
//! [`SecurityMonitor`] owns the persisted [`SessionEnvelope`], judges it on
//! recovery (inactivity expiry, fingerprint drift), and keeps a bounded
//! journal of anomalies: outbound request bursts, devtools heuristics, and
//! page focus changes. Everything here is advisory and non-fatal.

mod envelope;
mod journal;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use self::envelope::{InvalidReason, SecurityLevel, SessionEnvelope, Validation};
pub use self::journal::{MAX_JOURNAL_EVENTS, SecurityEvent, SecurityEventKind, SecurityJournal};
use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::secure_store::{ENVELOPE_KEY, PLAIN_ID_KEY, SESSION_ID_KEY, SecureStore};

/// Outer window and inner viewport sizes, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewportMetrics {
	pub outer_width: u32,
	pub outer_height: u32,
	pub inner_width: u32,
	pub inner_height: u32,
}

impl ViewportMetrics {
	/// True when either dimension lost more than `threshold` pixels to docked chrome.
	pub fn suggests_devtools(&self, threshold: u32) -> bool {
		self.outer_width.saturating_sub(self.inner_width) > threshold || self.outer_height.saturating_sub(self.inner_height) > threshold
	}
}

/// Host hook reporting window geometry; `None` when the host has no window.
pub trait ViewportProbe: Send + Sync {
	fn viewport(&self) -> Option<ViewportMetrics>;
}

/// Snapshot returned by [`SecurityMonitor::metrics`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityMetrics {
	pub created_at: Option<u64>,
	pub last_activity: Option<u64>,
	pub activity_count: u64,
	pub security_events: Vec<SecurityEvent>,
	pub encryption_enabled: bool,
	pub fingerprinting_enabled: bool,
	pub current_fingerprint: String,
}

#[derive(Debug, Clone, Copy)]
struct Thresholds {
	inactivity: Duration,
	excessive_requests: u32,
	devtools_px: u32,
	rate_window: Duration,
	devtools_poll: Duration,
}

struct MonitorState {
	journal: SecurityJournal,
	created_at: Option<u64>,
	last_activity: Option<u64>,
	activity_count: u64,
	window_requests: u32,
	excessive_logged: bool,
	devtools_open: bool,
}

pub struct SecurityMonitor {
	store: Arc<SecureStore>,
	clock: Arc<dyn Clock>,
	thresholds: Thresholds,
	state: Mutex<MonitorState>,
}

impl std::fmt::Debug for SecurityMonitor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SecurityMonitor").field("events", &self.state.lock().journal.len()).finish()
	}
}

impl SecurityMonitor {
	pub fn new(config: &SessionConfig, store: Arc<SecureStore>, clock: Arc<dyn Clock>) -> Self {
		Self {
			store,
			clock,
			thresholds: Thresholds {
				inactivity: config.inactivity_timeout(),
				excessive_requests: config.excessive_request_threshold,
				devtools_px: config.devtools_threshold_px,
				rate_window: config.rate_window(),
				devtools_poll: config.devtools_poll(),
			},
			state: Mutex::new(MonitorState {
				journal: SecurityJournal::new(config.journal_capacity),
				created_at: None,
				last_activity: None,
				activity_count: 0,
				window_requests: 0,
				excessive_logged: false,
				devtools_open: false,
			}),
		}
	}

	pub fn store(&self) -> &Arc<SecureStore> {
		&self.store
	}

	/// Seals a new envelope for `session_id` stamped with the current fingerprint.
	pub fn secure_session(&self, session_id: &str, user_data: serde_json::Value) -> Result<SessionEnvelope> {
		let now = self.clock.now_ms();
		let envelope = SessionEnvelope {
			session_id: session_id.to_string(),
			user_data,
			created_at: now,
			last_activity: now,
			client_fingerprint: self.store.fingerprint(),
			security_level: SecurityLevel::High,
			requires_reauth: false,
		};

		self.store.put(ENVELOPE_KEY, &envelope)?;
		self.store.put(SESSION_ID_KEY, session_id)?;

		{
			let mut state = self.state.lock();
			state.created_at = Some(now);
			state.last_activity = Some(now);
			state.activity_count = 0;
		}
		self.log_event(SecurityEventKind::SessionCreated, json!({ "sessionId": session_id, "encrypted": true }));
		debug!(target = "marcus.security", session_id, "session envelope sealed");
		Ok(envelope)
	}

	/// Judges the persisted envelope against inactivity and fingerprint drift.
	pub fn validate_session(&self) -> Validation {
		let Some(mut envelope) = self.store.get::<SessionEnvelope>(ENVELOPE_KEY) else {
			return Validation::Invalid(InvalidReason::NoSession);
		};

		let now = self.clock.now_ms();
		if Duration::from_millis(now.saturating_sub(envelope.last_activity)) > self.thresholds.inactivity {
			self.invalidate_session("session_timeout");
			return Validation::Invalid(InvalidReason::Expired);
		}

		let current = self.store.fingerprint();
		if envelope.client_fingerprint != current {
			self.log_event(
				SecurityEventKind::FingerprintMismatch,
				json!({ "stored": envelope.client_fingerprint, "current": current }),
			);
			envelope.requires_reauth = true;
			if let Err(err) = self.store.put(ENVELOPE_KEY, &envelope) {
				warn!(target = "marcus.security", error = %err, "failed to persist reauth flag");
			}
			return Validation::RequiresReauth {
				envelope,
				reason: "fingerprint_changed".to_string(),
			};
		}

		envelope.last_activity = now;
		{
			let mut state = self.state.lock();
			state.created_at.get_or_insert(envelope.created_at);
			state.last_activity = Some(now);
			state.activity_count += 1;
		}
		if let Err(err) = self.store.put(ENVELOPE_KEY, &envelope) {
			warn!(target = "marcus.security", error = %err, "failed to persist activity timestamp");
		}
		Validation::Valid(envelope)
	}

	/// Refreshes the envelope's activity timestamp after a successful liveness signal.
	pub fn touch(&self) {
		let Some(mut envelope) = self.store.get::<SessionEnvelope>(ENVELOPE_KEY) else {
			return;
		};
		let now = self.clock.now_ms();
		envelope.last_activity = now;
		{
			let mut state = self.state.lock();
			state.last_activity = Some(now);
			state.activity_count += 1;
		}
		if let Err(err) = self.store.put(ENVELOPE_KEY, &envelope) {
			debug!(target = "marcus.security", error = %err, "failed to persist activity timestamp");
		}
	}

	/// Identifier from the sealed store, falling back to the plain copy.
	pub fn stored_session_id(&self) -> Option<String> {
		self.store
			.get::<String>(SESSION_ID_KEY)
			.or_else(|| self.store.get_plain(PLAIN_ID_KEY))
			.filter(|id| !id.is_empty())
	}

	/// Removes every persisted session entry and resets activity counters.
	pub fn invalidate_session(&self, reason: &str) -> bool {
		let mut ok = true;
		for key in [ENVELOPE_KEY, SESSION_ID_KEY, PLAIN_ID_KEY] {
			if let Err(err) = self.store.remove(key) {
				warn!(target = "marcus.security", key, error = %err, "failed to remove session entry");
				ok = false;
			}
		}
		if let Err(err) = self.store.clear_namespace() {
			warn!(target = "marcus.security", error = %err, "failed to clear session namespace");
			ok = false;
		}

		{
			let mut state = self.state.lock();
			state.created_at = None;
			state.last_activity = None;
			state.activity_count = 0;
		}
		self.log_event(SecurityEventKind::SessionInvalidated, json!({ "reason": reason }));
		info!(target = "marcus.security", reason, "session invalidated");
		ok
	}

	/// Appends to the journal; critical kinds are also logged as warnings.
	pub fn log_event(&self, kind: SecurityEventKind, data: serde_json::Value) {
		let event = SecurityEvent {
			kind,
			timestamp: self.clock.now_ms(),
			data,
		};
		if kind.is_critical() {
			warn!(target = "marcus.security", event = %kind, data = %event.data, "security event");
		} else {
			debug!(target = "marcus.security", event = %kind, data = %event.data, "security event");
		}
		self.state.lock().journal.push(event);
	}

	/// Counts one outbound request against the current rate window.
	pub fn record_request(&self) {
		let count = {
			let mut state = self.state.lock();
			state.window_requests += 1;
			if state.window_requests > self.thresholds.excessive_requests && !state.excessive_logged {
				state.excessive_logged = true;
				Some(state.window_requests)
			} else {
				None
			}
		};
		if let Some(count) = count {
			self.log_event(SecurityEventKind::ExcessiveRequests, json!({ "count": count }));
		}
	}

	/// Ends the current rate window, logging any traffic seen in it.
	pub fn close_request_window(&self) -> u32 {
		let count = {
			let mut state = self.state.lock();
			let count = state.window_requests;
			state.window_requests = 0;
			state.excessive_logged = false;
			count
		};
		if count > 0 {
			self.log_event(SecurityEventKind::RapidRequestsDetected, json!({ "count": count }));
		}
		count
	}

	/// Feeds one devtools heuristic sample; returns the transition it caused, if any.
	pub fn observe_viewport(&self, metrics: ViewportMetrics) -> Option<SecurityEventKind> {
		let open = metrics.suggests_devtools(self.thresholds.devtools_px);
		let transition = {
			let mut state = self.state.lock();
			if open == state.devtools_open {
				None
			} else {
				state.devtools_open = open;
				Some(if open {
					SecurityEventKind::DevtoolsOpened
				} else {
					SecurityEventKind::DevtoolsClosed
				})
			}
		};
		if let Some(kind) = transition {
			self.log_event(kind, serde_json::Value::Null);
		}
		transition
	}

	pub fn events(&self) -> Vec<SecurityEvent> {
		self.state.lock().journal.snapshot()
	}

	pub fn metrics(&self) -> SecurityMetrics {
		let state = self.state.lock();
		SecurityMetrics {
			created_at: state.created_at,
			last_activity: state.last_activity,
			activity_count: state.activity_count,
			security_events: state.journal.snapshot(),
			encryption_enabled: true,
			fingerprinting_enabled: true,
			current_fingerprint: self.store.fingerprint(),
		}
	}

	/// Rotates the store key and journals it.
	pub fn rotate_key(&self) -> bool {
		let ok = self.store.rotate_key();
		self.log_event(SecurityEventKind::KeyRotated, json!({ "ok": ok }));
		ok
	}

	/// Starts the rate-window ticker and, when a probe is given, the devtools poller.
	pub fn spawn(self: &Arc<Self>, probe: Option<Arc<dyn ViewportProbe>>) -> MonitorTasks {
		let mut handles = Vec::with_capacity(2);

		let monitor = Arc::clone(self);
		let window = self.thresholds.rate_window;
		handles.push(tokio::spawn(async move {
			let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + window, window);
			loop {
				ticker.tick().await;
				monitor.close_request_window();
			}
		}));

		if let Some(probe) = probe {
			let monitor = Arc::clone(self);
			let poll = self.thresholds.devtools_poll;
			handles.push(tokio::spawn(async move {
				let mut ticker = tokio::time::interval(poll);
				loop {
					ticker.tick().await;
					if let Some(metrics) = probe.viewport() {
						monitor.observe_viewport(metrics);
					}
				}
			}));
		}

		MonitorTasks { handles }
	}
}

/// Background monitor tasks; aborted when dropped.
#[derive(Debug)]
pub struct MonitorTasks {
	handles: Vec<JoinHandle<()>>,
}

impl Drop for MonitorTasks {
	fn drop(&mut self) {
		for handle in &self.handles {
			handle.abort();
		}
	}
}
