//! Realtime duplex channel to the session backend.
//!
//! One [`RealtimeChannel`] holds at most one socket at a time. Opening it
//! spawns a reader and a writer task; an abnormal close schedules a
//! reconnect with capped exponential backoff until the attempt budget runs
//! out. Every transition bumps or checks an epoch so tasks that belong to a
//! superseded socket become no-ops.

mod io;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use marcus_protocol::OutboundMessage;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};

use self::io::{Closure, Outbound};
use crate::backoff::Backoff;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::event_bus::{EventBus, SessionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Disconnected,
	Connecting,
	Open,
	Closing,
}

struct ChannelState {
	connection: ConnectionState,
	session_id: Option<String>,
	epoch: u64,
	attempts: u32,
	backoff: Backoff,
	outbound: Option<Outbound>,
	reader: Option<JoinHandle<()>>,
	writer: Option<JoinHandle<()>>,
	reconnect: Option<JoinHandle<()>>,
}

impl ChannelState {
	fn abort_tasks(&mut self) {
		for handle in [self.reader.take(), self.reconnect.take()].into_iter().flatten() {
			handle.abort();
		}
	}
}

pub(crate) struct ChannelInner {
	base_url: String,
	connect_timeout: Duration,
	max_attempts: u32,
	bus: EventBus,
	state: Mutex<ChannelState>,
}

/// Cloneable handle to the session's realtime channel.
#[derive(Clone)]
pub struct RealtimeChannel {
	inner: Arc<ChannelInner>,
}

impl std::fmt::Debug for RealtimeChannel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("RealtimeChannel")
			.field("state", &state.connection)
			.field("session_id", &state.session_id)
			.field("attempts", &state.attempts)
			.finish()
	}
}

impl RealtimeChannel {
	pub fn new(config: &SessionConfig, bus: EventBus) -> Result<Self> {
		Ok(Self {
			inner: Arc::new(ChannelInner {
				base_url: config.channel_base_url()?,
				connect_timeout: config.connect_timeout(),
				max_attempts: config.reconnect_max_attempts,
				bus,
				state: Mutex::new(ChannelState {
					connection: ConnectionState::Disconnected,
					session_id: None,
					epoch: 0,
					attempts: 0,
					backoff: Backoff::for_reconnect(config),
					outbound: None,
					reader: None,
					writer: None,
					reconnect: None,
				}),
			}),
		})
	}

	/// `{ws_base}/session/ws/{id}`.
	pub fn url_for(&self, session_id: &str) -> String {
		format!("{}/session/ws/{}", self.inner.base_url, session_id)
	}

	pub fn state(&self) -> ConnectionState {
		self.inner.state.lock().connection
	}

	pub fn is_open(&self) -> bool {
		self.state() == ConnectionState::Open
	}

	pub fn session_id(&self) -> Option<String> {
		self.inner.state.lock().session_id.clone()
	}

	/// Reconnect attempts made since the socket last reached [`ConnectionState::Open`].
	pub fn reconnect_attempts(&self) -> u32 {
		self.inner.state.lock().attempts
	}

	/// Opens the channel for `session_id`, replacing any existing socket.
	///
	/// Resets the reconnect budget. Resolves once the socket is open.
	pub async fn connect(&self, session_id: &str) -> Result<()> {
		let epoch = {
			let mut state = self.inner.state.lock();
			if state.connection == ConnectionState::Open && state.session_id.as_deref() == Some(session_id) {
				return Ok(());
			}
			state.epoch += 1;
			state.abort_tasks();
			if let Some(outbound) = state.outbound.take() {
				let _ = outbound.send(Message::Close(None));
			}
			state.writer = None;
			state.attempts = 0;
			state.backoff.reset();
			state.session_id = Some(session_id.to_string());
			state.epoch
		};
		ChannelInner::open(&self.inner, epoch).await
	}

	/// Sends `{"type":"heartbeat"}`; fails when the channel is not open.
	pub fn heartbeat(&self) -> Result<()> {
		self.send(OutboundMessage::Heartbeat)
	}

	pub fn send(&self, message: OutboundMessage) -> Result<()> {
		let state = self.inner.state.lock();
		if state.connection != ConnectionState::Open {
			return Err(Error::ChannelClosed);
		}
		let Some(outbound) = &state.outbound else {
			return Err(Error::ChannelClosed);
		};
		outbound.send(io::text(message)).map_err(|_| Error::ChannelClosed)
	}

	/// Sends a normal close frame and waits for the writer to flush it.
	pub async fn close(&self) {
		let (was, writer) = {
			let mut state = self.inner.state.lock();
			let was = state.connection;
			state.epoch += 1;
			state.abort_tasks();
			if was != ConnectionState::Disconnected {
				state.connection = ConnectionState::Closing;
			}
			if let Some(outbound) = state.outbound.take() {
				let _ = outbound.send(normal_close("client closed"));
			}
			(was, state.writer.take())
		};
		if let Some(writer) = writer {
			if tokio::time::timeout(self.inner.connect_timeout, writer).await.is_err() {
				debug!(target = "marcus.channel", "close frame flush timed out");
			}
		}
		self.finish_close(was);
	}

	/// Synchronous teardown: cancels pending reconnects and queues a normal close.
	pub fn shutdown(&self) {
		let was = {
			let mut state = self.inner.state.lock();
			state.epoch += 1;
			state.abort_tasks();
			if let Some(outbound) = state.outbound.take() {
				let _ = outbound.send(normal_close("client shutdown"));
			}
			state.writer = None;
			state.connection
		};
		self.finish_close(was);
	}

	/// Settles the state after a client-side close; `was` is the state before closing began.
	fn finish_close(&self, was: ConnectionState) {
		{
			let mut state = self.inner.state.lock();
			state.connection = ConnectionState::Disconnected;
			state.session_id = None;
			state.attempts = 0;
		}
		if was != ConnectionState::Disconnected {
			info!(target = "marcus.channel", "channel closed by client");
			self.inner.bus.emit(SessionEvent::Disconnected {
				code: Some(1000),
				reason: "client closed".to_string(),
			});
		}
	}
}

fn normal_close(reason: &'static str) -> Message {
	Message::Close(Some(CloseFrame {
		code: CloseCode::Normal,
		reason: reason.into(),
	}))
}

impl ChannelInner {
	async fn open(this: &Arc<Self>, epoch: u64) -> Result<()> {
		let url = {
			let mut state = this.state.lock();
			if state.epoch != epoch {
				return Err(Error::ChannelClosed);
			}
			let Some(session_id) = state.session_id.clone() else {
				return Err(Error::NoActiveSession);
			};
			state.connection = ConnectionState::Connecting;
			format!("{}/session/ws/{}", this.base_url, session_id)
		};

		debug!(target = "marcus.channel", url = %url, epoch, "opening channel");
		let socket = match tokio::time::timeout(this.connect_timeout, connect_async(url.as_str())).await {
			Ok(Ok((socket, _response))) => socket,
			Ok(Err(err)) => {
				this.mark_failed(epoch);
				return Err(Error::Channel(err.to_string()));
			}
			Err(_) => {
				this.mark_failed(epoch);
				return Err(Error::ChannelTimeout(this.connect_timeout.as_millis() as u64));
			}
		};

		let (sink, stream) = socket.split();
		let (tx, rx) = mpsc::unbounded_channel();
		let (ready_tx, ready_rx) = oneshot::channel();
		{
			let mut state = this.state.lock();
			if state.epoch != epoch {
				debug!(target = "marcus.channel", epoch, "socket opened after teardown; discarding");
				return Err(Error::ChannelClosed);
			}
			state.writer = Some(tokio::spawn(io::write_loop(sink, rx)));
			state.reader = Some(tokio::spawn(io::read_loop(Arc::clone(this), epoch, stream, tx.clone(), ready_rx)));
			state.outbound = Some(tx);
			state.connection = ConnectionState::Open;
			state.attempts = 0;
			state.backoff.reset();
		}

		info!(target = "marcus.channel", url = %url, "channel open");
		this.bus.emit(SessionEvent::Connected);
		let _ = ready_tx.send(());
		Ok(())
	}

	fn mark_failed(&self, epoch: u64) {
		let mut state = self.state.lock();
		if state.epoch == epoch {
			state.connection = ConnectionState::Disconnected;
		}
	}

	fn on_closed(self: &Arc<Self>, epoch: u64, closure: Closure) {
		{
			let mut state = self.state.lock();
			if state.epoch != epoch {
				return;
			}
			state.connection = ConnectionState::Disconnected;
			state.outbound = None;
			state.reader = None;
			state.writer = None;
		}

		if closure.is_normal() {
			info!(target = "marcus.channel", reason = %closure.reason, "channel closed normally");
		} else {
			warn!(target = "marcus.channel", code = ?closure.code, reason = %closure.reason, "channel closed abnormally");
		}
		self.bus.emit(SessionEvent::Disconnected {
			code: closure.code,
			reason: closure.reason.clone(),
		});

		if !closure.is_normal() {
			self.schedule_reconnect(epoch);
		}
	}

	fn schedule_reconnect(self: &Arc<Self>, epoch: u64) {
		let delay = {
			let mut state = self.state.lock();
			if state.epoch != epoch {
				return;
			}
			if state.attempts >= self.max_attempts {
				None
			} else {
				state.attempts += 1;
				Some((state.attempts, state.backoff.next_delay()))
			}
		};

		let Some((attempt, delay)) = delay else {
			warn!(target = "marcus.channel", attempts = self.max_attempts, "reconnect budget exhausted");
			self.bus.emit(SessionEvent::ReconnectFailed);
			return;
		};

		info!(
			target = "marcus.channel",
			attempt,
			max = self.max_attempts,
			delay_ms = delay.as_millis() as u64,
			"scheduling reconnect"
		);
		let inner = Arc::clone(self);
		let handle = tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			if inner.state.lock().epoch != epoch {
				return;
			}
			if let Err(err) = ChannelInner::open(&inner, epoch).await {
				warn!(target = "marcus.channel", attempt, error = %err, "reconnect attempt failed");
				inner.schedule_reconnect(epoch);
			}
		});

		let mut state = self.state.lock();
		if state.epoch == epoch {
			state.reconnect = Some(handle);
		} else {
			handle.abort();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn channel() -> RealtimeChannel {
		RealtimeChannel::new(&SessionConfig::new("https://marcus.example/api"), EventBus::new()).unwrap()
	}

	#[test]
	fn url_uses_secure_scheme_for_https_api() {
		assert_eq!(channel().url_for("abc123"), "wss://marcus.example/api/session/ws/abc123");
	}

	#[test]
	fn heartbeat_requires_open_channel() {
		let channel = channel();
		assert_eq!(channel.state(), ConnectionState::Disconnected);
		assert!(matches!(channel.heartbeat(), Err(Error::ChannelClosed)));
	}

	#[test]
	fn shutdown_on_idle_channel_emits_nothing() {
		let bus = EventBus::new();
		let seen = Arc::new(Mutex::new(0));
		let counter = Arc::clone(&seen);
		bus.on(crate::event_bus::EventKind::Disconnected, move |_| *counter.lock() += 1);
		let channel = RealtimeChannel::new(&SessionConfig::default(), bus).unwrap();

		channel.shutdown();
		assert_eq!(channel.state(), ConnectionState::Disconnected);
		assert_eq!(*seen.lock(), 0);
	}

	#[tokio::test]
	async fn connect_failure_leaves_channel_disconnected() {
		let config = SessionConfig {
			connect_timeout_ms: 500,
			..SessionConfig::new("http://127.0.0.1:9")
		};
		let channel = RealtimeChannel::new(&config, EventBus::new()).unwrap();
		let err = channel.connect("abc123").await.unwrap_err();
		assert!(matches!(err, Error::Channel(_) | Error::ChannelTimeout(_)));
		assert_eq!(channel.state(), ConnectionState::Disconnected);
	}
}
