//! Client-side session core for the MARCUS front end.
//!
//! The crate keeps one admission-controlled session alive against the MARCUS
//! backend queue:
//!
//! * [`SessionLifecycleManager`] creates, recovers, heartbeats and ends the session
//! * [`RealtimeChannel`] carries status and queue pushes over a WebSocket
//! * [`SecureStore`] seals persisted session state with AES-256-GCM
//! * [`SecurityMonitor`] validates recovered sessions and journals anomalies
//! * [`EventBus`] delivers [`SessionEvent`]s to the host
//!
//! ```ignore
//! let manager = SessionLifecycleManager::builder(SessionConfig::from_env()?)
//!     .with_storage(Arc::new(FileBackend::open(state_path)))
//!     .build()?;
//! manager.events().on(EventKind::QueueUpdate, |event| println!("{event:?}"));
//! let session = manager.create_or_recover(None).await?;
//! ```

pub mod backend;
pub mod backoff;
pub mod channel;
pub mod clock;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod fingerprint;
pub mod lifecycle;
pub mod secure_store;
pub mod security;

#[cfg(test)]
mod fake_backend;

pub use backend::{HttpBackend, SessionBackend, UnloadDelivery};
pub use backoff::Backoff;
pub use channel::{ConnectionState, RealtimeChannel};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use event_bus::{EventBus, EventKind, SessionEvent, SubscriptionId};
pub use fingerprint::{BrowserTraits, FingerprintProvider, HostTraits, StaticTraits};
pub use lifecycle::{EndOutcome, HeartbeatRoute, PageEvent, Session, SessionLifecycleManager, SessionManagerBuilder, StatusReport};
pub use marcus_protocol as protocol;
pub use secure_store::{FileBackend, MemoryBackend, SecureStore, StorageBackend};
pub use security::{SecurityEvent, SecurityEventKind, SecurityMetrics, SecurityMonitor, Validation, ViewportMetrics, ViewportProbe};
