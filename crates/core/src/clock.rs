//! Wall-clock source for persisted timestamps.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Unix-millisecond clock. Monotonic timers use `tokio::time` instead.
pub trait Clock: Send + Sync {
	fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now_ms(&self) -> u64 {
		SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
	}
}

/// Manually advanced clock for deterministic expiry checks.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
	now: Arc<AtomicU64>,
}

impl ManualClock {
	pub fn new(start_ms: u64) -> Self {
		Self {
			now: Arc::new(AtomicU64::new(start_ms)),
		}
	}

	pub fn advance_ms(&self, delta: u64) {
		self.now.fetch_add(delta, Ordering::SeqCst);
	}

	pub fn set_ms(&self, value: u64) {
		self.now.store(value, Ordering::SeqCst);
	}
}

impl Clock for ManualClock {
	fn now_ms(&self) -> u64 {
		self.now.load(Ordering::SeqCst)
	}
}
