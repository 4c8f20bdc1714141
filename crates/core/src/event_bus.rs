//! In-process publish/subscribe for session notifications.
//!
//! Delivery is synchronous and in subscription order. A panicking handler
//! is isolated and logged so the remaining handlers still run.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use marcus_protocol::{QueueStatus, SessionStatus};
use parking_lot::RwLock;
use tracing::{error, trace};

/// Notification published by the session core.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
	/// The realtime channel reached the open state.
	Connected,
	/// The realtime channel closed. `code` is `None` when the stream ended without a close frame.
	Disconnected { code: Option<u16>, reason: String },
	StatusUpdate {
		session_status: Option<SessionStatus>,
		queue_status: Option<QueueStatus>,
	},
	QueueUpdate {
		session_status: Option<SessionStatus>,
		queue_status: Option<QueueStatus>,
	},
	/// The backend no longer knows the session; local state has been cleared.
	SessionExpired,
	/// The reconnect budget is exhausted; a new explicit connect is required.
	ReconnectFailed,
	/// The session was recovered but the environment fingerprint drifted.
	RequiresReauth { reason: String },
	/// Transport or admission failure the host may want to render.
	Error { message: String },
}

impl SessionEvent {
	pub fn kind(&self) -> EventKind {
		match self {
			Self::Connected => EventKind::Connected,
			Self::Disconnected { .. } => EventKind::Disconnected,
			Self::StatusUpdate { .. } => EventKind::StatusUpdate,
			Self::QueueUpdate { .. } => EventKind::QueueUpdate,
			Self::SessionExpired => EventKind::SessionExpired,
			Self::ReconnectFailed => EventKind::ReconnectFailed,
			Self::RequiresReauth { .. } => EventKind::RequiresReauth,
			Self::Error { .. } => EventKind::Error,
		}
	}

	pub(crate) fn error(message: impl Into<String>) -> Self {
		Self::Error { message: message.into() }
	}
}

/// Subscription key for [`EventBus::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
	Connected,
	Disconnected,
	StatusUpdate,
	QueueUpdate,
	SessionExpired,
	ReconnectFailed,
	RequiresReauth,
	Error,
}

impl EventKind {
	pub const ALL: [EventKind; 8] = [
		EventKind::Connected,
		EventKind::Disconnected,
		EventKind::StatusUpdate,
		EventKind::QueueUpdate,
		EventKind::SessionExpired,
		EventKind::ReconnectFailed,
		EventKind::RequiresReauth,
		EventKind::Error,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Connected => "connected",
			Self::Disconnected => "disconnected",
			Self::StatusUpdate => "statusUpdate",
			Self::QueueUpdate => "queueUpdate",
			Self::SessionExpired => "sessionExpired",
			Self::ReconnectFailed => "reconnectFailed",
			Self::RequiresReauth => "requiresReauth",
			Self::Error => "error",
		}
	}
}

/// Handle returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
	next_id: u64,
	handlers: HashMap<EventKind, Vec<(SubscriptionId, Handler)>>,
}

/// Cloneable handle to a shared subscriber registry.
#[derive(Clone, Default)]
pub struct EventBus {
	registry: Arc<RwLock<Registry>>,
}

impl std::fmt::Debug for EventBus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let registry = self.registry.read();
		let total: usize = registry.handlers.values().map(Vec::len).sum();
		f.debug_struct("EventBus").field("handlers", &total).finish()
	}
}

impl EventBus {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `handler` for events of `kind`.
	pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
	where
		F: Fn(&SessionEvent) + Send + Sync + 'static,
	{
		let mut registry = self.registry.write();
		registry.next_id += 1;
		let id = SubscriptionId(registry.next_id);
		registry.handlers.entry(kind).or_default().push((id, Arc::new(handler)));
		id
	}

	/// Removes a handler; returns whether it was registered.
	pub fn off(&self, kind: EventKind, id: SubscriptionId) -> bool {
		let mut registry = self.registry.write();
		let Some(handlers) = registry.handlers.get_mut(&kind) else {
			return false;
		};
		let before = handlers.len();
		handlers.retain(|(existing, _)| *existing != id);
		before != handlers.len()
	}

	/// Delivers `event` to every handler of its kind; returns how many completed without panicking.
	pub fn emit(&self, event: SessionEvent) -> usize {
		let kind = event.kind();
		// Snapshot so handlers may subscribe, unsubscribe, or emit re-entrantly.
		let handlers: Vec<Handler> = {
			let registry = self.registry.read();
			registry
				.handlers
				.get(&kind)
				.map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
				.unwrap_or_default()
		};

		trace!(target = "marcus.events", event = kind.as_str(), listeners = handlers.len(), "emit");

		let mut delivered = 0;
		for handler in handlers {
			match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
				Ok(()) => delivered += 1,
				Err(payload) => {
					error!(
						target = "marcus.events",
						event = kind.as_str(),
						panic = %panic_message(payload.as_ref()),
						"event listener panicked"
					);
				}
			}
		}
		delivered
	}

	pub fn listener_count(&self, kind: EventKind) -> usize {
		self.registry.read().handlers.get(&kind).map_or(0, Vec::len)
	}
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"non-string panic payload".to_string()
	}
}
