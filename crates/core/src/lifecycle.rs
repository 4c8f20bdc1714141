//! Session lifecycle orchestration.
//!
//! [`SessionLifecycleManager`] owns at most one admission session. It
//! recovers a persisted session at construction, verifies or creates one on
//! [`create_or_recover`](SessionLifecycleManager::create_or_recover), opens the
//! realtime channel, and keeps the session alive with a heartbeat loop until
//! the session ends, expires, or the host goes away.

use std::sync::{Arc, Weak};

use marcus_protocol::{OutboundMessage, QueueStatus, SessionStatus};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{HttpBackend, SessionBackend, UnloadDelivery};
use crate::backoff::Backoff;
use crate::channel::RealtimeChannel;
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::event_bus::{EventBus, SessionEvent};
use crate::fingerprint::{FingerprintProvider, HostTraits};
use crate::secure_store::{MemoryBackend, PLAIN_ID_KEY, SecureStore, StorageBackend};
use crate::security::{
	InvalidReason, MonitorTasks, SecurityEventKind, SecurityLevel, SecurityMonitor, SessionEnvelope, Validation, ViewportProbe,
};

/// Locally held view of the admission session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
	pub id: String,
	/// Unix milliseconds.
	pub created_at: u64,
	pub last_activity: u64,
	pub security_level: SecurityLevel,
	pub fingerprint: String,
	/// Set when the session was recovered under a different fingerprint.
	pub requires_reauth: bool,
	/// Last admission snapshot reported by the backend.
	pub status: Option<SessionStatus>,
	pub queue_status: Option<QueueStatus>,
}

impl Session {
	fn from_envelope(envelope: SessionEnvelope) -> Self {
		Self {
			id: envelope.session_id,
			created_at: envelope.created_at,
			last_activity: envelope.last_activity,
			security_level: envelope.security_level,
			fingerprint: envelope.client_fingerprint,
			requires_reauth: envelope.requires_reauth,
			status: None,
			queue_status: None,
		}
	}

	fn bare(id: String, now: u64, fingerprint: String) -> Self {
		Self {
			id,
			created_at: now,
			last_activity: now,
			security_level: SecurityLevel::High,
			fingerprint,
			requires_reauth: false,
			status: None,
			queue_status: None,
		}
	}
}

/// Transport that carried a heartbeat.
#[derive(Debug, Clone, PartialEq)]
pub enum HeartbeatRoute {
	Channel,
	/// HTTP fallback, with the status the backend returned.
	Http(Option<SessionStatus>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
	pub success: bool,
	pub session_status: Option<SessionStatus>,
	pub queue_status: Option<QueueStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
	/// Nothing was held locally.
	NoSession,
	Ended,
	/// The backend had already dropped the session.
	AlreadyEnded,
}

/// Host page lifecycle signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
	BeforeUnload,
	Unload,
	PageHide,
	VisibilityHidden,
	VisibilityVisible,
	Focus,
	Blur,
}

impl PageEvent {
	/// Events after which the host may never run code again.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::BeforeUnload | Self::Unload | Self::PageHide)
	}
}

/// Builder for [`SessionLifecycleManager`]; every collaborator has a default.
pub struct SessionManagerBuilder {
	config: SessionConfig,
	backend: Option<Arc<dyn SessionBackend>>,
	storage: Option<Arc<dyn StorageBackend>>,
	fingerprint: Option<Arc<dyn FingerprintProvider>>,
	clock: Option<Arc<dyn Clock>>,
	bus: Option<EventBus>,
	probe: Option<Arc<dyn ViewportProbe>>,
	background: bool,
}

impl SessionManagerBuilder {
	pub fn new(config: SessionConfig) -> Self {
		Self {
			config,
			backend: None,
			storage: None,
			fingerprint: None,
			clock: None,
			bus: None,
			probe: None,
			background: true,
		}
	}

	/// Admission backend; defaults to [`HttpBackend`] on the configured API URL.
	pub fn with_backend(mut self, backend: Arc<dyn SessionBackend>) -> Self {
		self.backend = Some(backend);
		self
	}

	/// Key/value persistence; defaults to process memory.
	pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
		self.storage = Some(storage);
		self
	}

	pub fn with_fingerprint(mut self, fingerprint: Arc<dyn FingerprintProvider>) -> Self {
		self.fingerprint = Some(fingerprint);
		self
	}

	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);
		self
	}

	/// Shares an existing bus so listeners registered before `build` see recovery events.
	pub fn with_event_bus(mut self, bus: EventBus) -> Self {
		self.bus = Some(bus);
		self
	}

	pub fn with_viewport_probe(mut self, probe: Arc<dyn ViewportProbe>) -> Self {
		self.probe = Some(probe);
		self
	}

	/// Whether to spawn the security monitor's background tasks (default on).
	pub fn with_background_monitoring(mut self, enabled: bool) -> Self {
		self.background = enabled;
		self
	}

	/// Builds the manager and recovers any persisted session.
	///
	/// Background monitoring only starts when called inside a Tokio runtime.
	pub fn build(self) -> Result<SessionLifecycleManager> {
		self.config.validate()?;
		let storage = self.storage.unwrap_or_else(|| Arc::new(MemoryBackend::new()));
		let fingerprint = self.fingerprint.unwrap_or_else(|| Arc::new(HostTraits));
		let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
		let bus = self.bus.unwrap_or_default();

		let store = Arc::new(SecureStore::new(storage, fingerprint));
		let monitor = Arc::new(SecurityMonitor::new(&self.config, store, Arc::clone(&clock)));
		let backend = match self.backend {
			Some(backend) => backend,
			None => Arc::new(HttpBackend::new(&self.config)?.with_monitor(Arc::clone(&monitor))),
		};
		let channel = RealtimeChannel::new(&self.config, bus.clone())?;

		let monitor_tasks = if self.background && tokio::runtime::Handle::try_current().is_ok() {
			Some(monitor.spawn(self.probe))
		} else {
			None
		};

		let session = recover(&monitor, &bus, clock.as_ref());
		Ok(SessionLifecycleManager {
			inner: Arc::new(ManagerInner {
				config: self.config,
				backend,
				channel,
				monitor,
				bus,
				clock,
				session: Mutex::new(session),
				heartbeat: Mutex::new(None),
				_monitor_tasks: monitor_tasks,
			}),
		})
	}
}

fn recover(monitor: &SecurityMonitor, bus: &EventBus, clock: &dyn Clock) -> Option<Session> {
	match monitor.validate_session() {
		Validation::Valid(envelope) => {
			info!(target = "marcus.session", session_id = %envelope.session_id, "recovered sealed session");
			Some(Session::from_envelope(envelope))
		}
		Validation::RequiresReauth { envelope, reason } => {
			warn!(target = "marcus.session", session_id = %envelope.session_id, reason = %reason, "recovered session requires re-authentication");
			bus.emit(SessionEvent::RequiresReauth { reason });
			Some(Session::from_envelope(envelope))
		}
		Validation::Invalid(InvalidReason::Expired) => None,
		Validation::Invalid(InvalidReason::NoSession) => {
			let id = monitor.store().get_plain(PLAIN_ID_KEY).filter(|id| !id.is_empty())?;
			info!(target = "marcus.session", session_id = %id, "recovered session from plain storage");
			Some(Session::bare(id, clock.now_ms(), monitor.store().fingerprint()))
		}
	}
}

struct ManagerInner {
	config: SessionConfig,
	backend: Arc<dyn SessionBackend>,
	channel: RealtimeChannel,
	monitor: Arc<SecurityMonitor>,
	bus: EventBus,
	clock: Arc<dyn Clock>,
	session: Mutex<Option<Session>>,
	heartbeat: Mutex<Option<JoinHandle<()>>>,
	_monitor_tasks: Option<MonitorTasks>,
}

impl Drop for ManagerInner {
	fn drop(&mut self) {
		if let Some(handle) = self.heartbeat.get_mut().take() {
			handle.abort();
		}
		self.channel.shutdown();
	}
}

impl ManagerInner {
	fn session_id(&self) -> Option<String> {
		self.session.lock().as_ref().map(|s| s.id.clone())
	}

	fn update_status(&self, status: Option<&SessionStatus>, queue: Option<QueueStatus>) {
		let now = self.clock.now_ms();
		if let Some(session) = self.session.lock().as_mut() {
			session.last_activity = now;
			if let Some(status) = status {
				session.status = Some(status.clone());
			}
			if queue.is_some() {
				session.queue_status = queue;
			}
		}
		self.monitor.touch();
	}

	fn store_session(&self, session_id: &str, user_id: Option<&str>) -> Session {
		let user_data = json!({
			"userId": user_id,
			"userAgent": self.monitor.store().fingerprint(),
		});
		match self.monitor.secure_session(session_id, user_data) {
			Ok(envelope) => Session::from_envelope(envelope),
			Err(err) => {
				warn!(target = "marcus.session", error = %err, "secure storage failed; keeping plain session id");
				if let Err(err) = self.monitor.store().put_plain(PLAIN_ID_KEY, session_id) {
					warn!(target = "marcus.session", error = %err, "plain session id not persisted");
				}
				Session::bare(session_id.to_string(), self.clock.now_ms(), self.monitor.store().fingerprint())
			}
		}
	}

	/// Drops every local reference to the session. Listeners stay registered.
	fn cleanup(&self, reason: &str) {
		if let Some(handle) = self.heartbeat.lock().take() {
			handle.abort();
		}
		self.channel.shutdown();
		let had = self.session.lock().take().is_some();
		self.monitor.invalidate_session(reason);
		debug!(target = "marcus.session", reason, had_session = had, "local session state cleared");
	}

	fn expire(&self) {
		info!(target = "marcus.session", "backend reports session gone");
		self.cleanup("session_expired");
		self.bus.emit(SessionEvent::SessionExpired);
	}

	async fn heartbeat(&self) -> Result<HeartbeatRoute> {
		let Some(session_id) = self.session_id() else {
			return Err(Error::NoActiveSession);
		};

		if self.channel.heartbeat().is_ok() {
			self.monitor.touch();
			return Ok(HeartbeatRoute::Channel);
		}

		debug!(target = "marcus.session", session_id = %session_id, "channel unavailable; heartbeat over HTTP");
		match self.backend.heartbeat(&session_id).await {
			Ok(response) => {
				self.update_status(response.session_status.as_ref(), None);
				if response.session_status.is_some() {
					self.bus.emit(SessionEvent::StatusUpdate {
						session_status: response.session_status.clone(),
						queue_status: None,
					});
				}
				Ok(HeartbeatRoute::Http(response.session_status))
			}
			Err(Error::SessionExpired) => {
				self.expire();
				Err(Error::SessionExpired)
			}
			Err(err) => {
				warn!(target = "marcus.session", error = %err, "heartbeat failed");
				self.bus.emit(SessionEvent::error(format!("heartbeat failed: {err}")));
				Err(err)
			}
		}
	}

	async fn create_with_retry(&self, user_id: Option<&str>) -> Result<SessionStatusBundle> {
		let attempts = self.config.create_attempts.max(1);
		let deadline = self.config.request_timeout();
		let mut backoff = Backoff::for_creation(&self.config);
		let mut last_error = None;

		for attempt in 1..=attempts {
			info!(target = "marcus.session", attempt, max = attempts, "creating session");
			let outcome = tokio::time::timeout(deadline, self.backend.create(user_id))
				.await
				.unwrap_or_else(|_| Err(Error::RequestTimeout(deadline.as_millis() as u64)));
			match outcome {
				Ok(response) if response.success => match response.session {
					Some(session) => return Ok((session, response.queue_status)),
					None => last_error = Some(Error::Rejected("response carried no session".to_string())),
				},
				Ok(_) => last_error = Some(Error::Rejected("server returned unsuccessful response".to_string())),
				Err(err) => last_error = Some(err),
			}

			if let Some(err) = &last_error {
				warn!(target = "marcus.session", attempt, error = %err, "session creation attempt failed");
			}
			if attempt < attempts {
				let delay = backoff.next_delay();
				debug!(target = "marcus.session", delay_ms = delay.as_millis() as u64, "retrying session creation");
				tokio::time::sleep(delay).await;
			}
		}

		let last_error = last_error.unwrap_or_else(|| Error::Rejected("no creation attempt made".to_string()));
		self.bus.emit(SessionEvent::error(format!("session creation failed: {last_error}")));
		Err(Error::SessionCreationFailed {
			attempts,
			last_error: Box::new(last_error),
		})
	}

	/// Attempts the channel once, then starts the heartbeat loop either way.
	async fn settle(self: &Arc<Self>, session_id: &str) {
		if let Err(err) = self.channel.connect(session_id).await {
			warn!(target = "marcus.session", error = %err, "channel unavailable; heartbeat will use HTTP");
		}
		self.start_heartbeat();
	}

	fn start_heartbeat(self: &Arc<Self>) {
		let weak: Weak<Self> = Arc::downgrade(self);
		let period = self.config.heartbeat_interval();
		let handle = tokio::spawn(async move {
			let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				ticker.tick().await;
				let Some(inner) = weak.upgrade() else {
					break;
				};
				if let Err(Error::SessionExpired | Error::NoActiveSession) = inner.heartbeat().await {
					break;
				}
			}
		});
		if let Some(previous) = self.heartbeat.lock().replace(handle) {
			previous.abort();
		}
	}
}

type SessionStatusBundle = (SessionStatus, Option<QueueStatus>);

/// Aborts the local session when dropped, so cancellation cannot leak state.
struct CleanupGuard<'a> {
	inner: &'a ManagerInner,
	reason: &'static str,
}

impl Drop for CleanupGuard<'_> {
	fn drop(&mut self) {
		self.inner.cleanup(self.reason);
	}
}

/// Owns one client's admission session, its realtime channel and its security envelope.
pub struct SessionLifecycleManager {
	inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for SessionLifecycleManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionLifecycleManager")
			.field("session_id", &self.inner.session_id())
			.field("channel", &self.inner.channel)
			.finish()
	}
}

impl SessionLifecycleManager {
	pub fn builder(config: SessionConfig) -> SessionManagerBuilder {
		SessionManagerBuilder::new(config)
	}

	/// Reuses a backend-confirmed session or creates a new one with bounded retry.
	pub async fn create_or_recover(&self, user_id: Option<&str>) -> Result<Session> {
		if let Some(session_id) = self.inner.session_id() {
			match self.inner.backend.status(&session_id).await {
				Ok(response) if response.success => {
					info!(target = "marcus.session", session_id = %session_id, "reusing existing session");
					self.inner.update_status(response.session_status.as_ref(), response.queue_status);
					self.inner.settle(&session_id).await;
					return self.session().ok_or(Error::NoActiveSession);
				}
				Ok(_) => {
					info!(target = "marcus.session", session_id = %session_id, "backend did not confirm stored session");
					self.inner.cleanup("recovery_failed");
				}
				Err(Error::SessionExpired) => self.inner.expire(),
				Err(err) => {
					info!(target = "marcus.session", session_id = %session_id, error = %err, "stored session not recoverable");
					self.inner.cleanup("recovery_failed");
				}
			}
		}

		let (status, queue) = self.inner.create_with_retry(user_id).await?;
		let mut session = self.inner.store_session(&status.session_id, user_id);
		session.status = Some(status);
		session.queue_status = queue;
		let session_id = session.id.clone();
		*self.inner.session.lock() = Some(session);
		info!(target = "marcus.session", session_id = %session_id, "session created");

		self.inner.settle(&session_id).await;
		self.session().ok_or(Error::NoActiveSession)
	}

	/// Channel heartbeat when open, otherwise one HTTP heartbeat.
	pub async fn heartbeat(&self) -> Result<HeartbeatRoute> {
		self.inner.heartbeat().await
	}

	pub async fn status(&self) -> Result<StatusReport> {
		let Some(session_id) = self.inner.session_id() else {
			return Err(Error::NoActiveSession);
		};
		match self.inner.backend.status(&session_id).await {
			Ok(response) => {
				if response.success {
					self.inner.update_status(response.session_status.as_ref(), response.queue_status);
				}
				Ok(StatusReport {
					success: response.success,
					session_status: response.session_status,
					queue_status: response.queue_status,
				})
			}
			Err(Error::SessionExpired) => {
				self.inner.expire();
				Err(Error::SessionExpired)
			}
			Err(err) => {
				self.inner.bus.emit(SessionEvent::error(format!("status check failed: {err}")));
				Err(err)
			}
		}
	}

	/// Global queue counters; needs no session.
	pub async fn queue_status(&self) -> Result<QueueStatus> {
		match self.inner.backend.queue().await {
			Ok(response) => Ok(response.queue_status.unwrap_or_default()),
			Err(err) => {
				self.inner.bus.emit(SessionEvent::error(format!("queue status failed: {err}")));
				Err(err)
			}
		}
	}

	/// Ends the session on the backend. Local state is cleared on every path, including cancellation.
	pub async fn end(&self) -> Result<EndOutcome> {
		let Some(session_id) = self.inner.session_id() else {
			return Ok(EndOutcome::NoSession);
		};
		let guard = CleanupGuard {
			inner: &self.inner,
			reason: "user_logout",
		};

		if self.inner.channel.send(OutboundMessage::Disconnect).is_ok() {
			debug!(target = "marcus.session", "disconnect signalled over channel");
		}
		self.inner.channel.close().await;
		let result = self.inner.backend.remove(&session_id).await;
		drop(guard);

		match result {
			Ok(_) => {
				info!(target = "marcus.session", session_id = %session_id, "session ended");
				Ok(EndOutcome::Ended)
			}
			Err(Error::SessionExpired) => {
				info!(target = "marcus.session", session_id = %session_id, "session already gone on backend");
				Ok(EndOutcome::AlreadyEnded)
			}
			Err(err) => {
				warn!(target = "marcus.session", session_id = %session_id, error = %err, "session removal failed");
				self.inner.bus.emit(SessionEvent::error(format!("session removal failed: {err}")));
				Err(err)
			}
		}
	}

	/// Reacts to a host page lifecycle signal; returns the teardown transport for terminal events.
	pub fn handle_page_event(&self, event: PageEvent) -> Option<UnloadDelivery> {
		match event {
			PageEvent::BeforeUnload | PageEvent::Unload | PageEvent::PageHide => self.teardown(),
			PageEvent::VisibilityHidden => {
				if self.inner.channel.heartbeat().is_ok() {
					debug!(target = "marcus.session", "heartbeat sent on visibility loss");
				}
				None
			}
			PageEvent::VisibilityVisible => {
				if self.is_active() {
					self.inner.monitor.touch();
				}
				None
			}
			PageEvent::Focus => {
				self.inner.monitor.log_event(SecurityEventKind::PageFocus, serde_json::Value::Null);
				None
			}
			PageEvent::Blur => {
				self.inner.monitor.log_event(SecurityEventKind::PageBlur, serde_json::Value::Null);
				None
			}
		}
	}

	/// Non-cancellable unload burst: detached request, then blocking request, then channel signal.
	fn teardown(&self) -> Option<UnloadDelivery> {
		let session = self.inner.session.lock().take()?;
		let delivery = self.inner.backend.send_unload(&session.id);
		let signalled = self.inner.channel.send(OutboundMessage::Disconnect).is_ok();
		info!(
			target = "marcus.session",
			session_id = %session.id,
			delivery = ?delivery,
			channel_signal = signalled,
			"session teardown on page unload"
		);
		self.inner.cleanup("page_unload");
		Some(delivery)
	}

	pub fn is_active(&self) -> bool {
		self.inner.session.lock().is_some()
	}

	pub fn session_id(&self) -> Option<String> {
		self.inner.session_id()
	}

	pub fn session(&self) -> Option<Session> {
		self.inner.session.lock().clone()
	}

	pub fn events(&self) -> &EventBus {
		&self.inner.bus
	}

	pub fn channel(&self) -> &RealtimeChannel {
		&self.inner.channel
	}

	pub fn monitor(&self) -> &Arc<SecurityMonitor> {
		&self.inner.monitor
	}

	pub fn config(&self) -> &SessionConfig {
		&self.inner.config
	}

	/// Whether the session-lifetime heartbeat loop is running.
	pub fn heartbeat_running(&self) -> bool {
		self.inner.heartbeat.lock().as_ref().is_some_and(|h| !h.is_finished())
	}
}
