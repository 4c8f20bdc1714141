//! Capped exponential backoff shared by session creation and channel reconnects.

use std::time::Duration;

use crate::config::SessionConfig;

/// Delay sequence `initial, initial*m, initial*m^2, ...` clamped to `cap`.
#[derive(Debug, Clone)]
pub struct Backoff {
	initial_ms: u64,
	multiplier: f64,
	cap_ms: u64,
	current_ms: u64,
}

impl Backoff {
	pub fn new(initial: Duration, multiplier: f64, cap: Duration) -> Self {
		let initial_ms = initial.as_millis() as u64;
		let cap_ms = (cap.as_millis() as u64).max(initial_ms);
		Self {
			initial_ms,
			multiplier: multiplier.max(1.0),
			cap_ms,
			current_ms: initial_ms,
		}
	}

	/// 1000ms doubling, capped at 5000ms by default.
	pub fn for_creation(config: &SessionConfig) -> Self {
		Self::new(
			Duration::from_millis(config.create_backoff_initial_ms),
			2.0,
			Duration::from_millis(config.create_backoff_cap_ms),
		)
	}

	/// 2000ms growing by 1.5, capped at 30s by default.
	pub fn for_reconnect(config: &SessionConfig) -> Self {
		Self::new(
			Duration::from_millis(config.reconnect_initial_delay_ms),
			config.reconnect_multiplier,
			Duration::from_millis(config.reconnect_cap_ms),
		)
	}

	/// Returns the current delay and advances the sequence.
	pub fn next_delay(&mut self) -> Duration {
		let delay = self.current_ms;
		let grown = (self.current_ms as f64 * self.multiplier).round() as u64;
		self.current_ms = grown.min(self.cap_ms);
		Duration::from_millis(delay)
	}

	pub fn reset(&mut self) {
		self.current_ms = self.initial_ms;
	}
}
