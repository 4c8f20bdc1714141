//! Session client configuration.
//!
//! Values resolve in three layers: built-in defaults, an optional JSON file
//! (camelCase keys, every field optional), then `MARCUS_API_URL` /
//! `MARCUS_WS_URL` from the environment.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::security::MAX_JOURNAL_EVENTS;

pub const API_URL_ENV: &str = "MARCUS_API_URL";
pub const WS_URL_ENV: &str = "MARCUS_WS_URL";

const DEFAULT_API_BASE_URL: &str = "http://localhost:9000";

/// Tunables for admission, channel, and security behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
	/// Base URL of the HTTP API, e.g. `http://localhost:9000` or `https://host/api`.
	pub api_base_url: String,
	/// Base URL of the duplex channel; derived from `api_base_url` when absent.
	pub ws_base_url: Option<String>,

	pub create_attempts: u32,
	pub create_backoff_initial_ms: u64,
	pub create_backoff_cap_ms: u64,
	/// Per-request cancellation deadline for admission calls.
	pub request_timeout_ms: u64,
	pub heartbeat_interval_ms: u64,

	pub connect_timeout_ms: u64,
	pub reconnect_max_attempts: u32,
	pub reconnect_initial_delay_ms: u64,
	pub reconnect_multiplier: f64,
	pub reconnect_cap_ms: u64,

	pub inactivity_timeout_ms: u64,
	pub rate_window_ms: u64,
	pub excessive_request_threshold: u32,
	pub devtools_poll_ms: u64,
	pub devtools_threshold_px: u32,
	pub journal_capacity: usize,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			api_base_url: DEFAULT_API_BASE_URL.to_string(),
			ws_base_url: None,
			create_attempts: 3,
			create_backoff_initial_ms: 1_000,
			create_backoff_cap_ms: 5_000,
			request_timeout_ms: 10_000,
			heartbeat_interval_ms: 15_000,
			connect_timeout_ms: 10_000,
			reconnect_max_attempts: 5,
			reconnect_initial_delay_ms: 2_000,
			reconnect_multiplier: 1.5,
			reconnect_cap_ms: 30_000,
			inactivity_timeout_ms: 30 * 60 * 1_000,
			rate_window_ms: 10_000,
			excessive_request_threshold: 20,
			devtools_poll_ms: 5_000,
			devtools_threshold_px: 160,
			journal_capacity: 50,
		}
	}
}

impl SessionConfig {
	/// Config pointing at `api_base_url` with every other value defaulted.
	pub fn new(api_base_url: impl Into<String>) -> Self {
		Self {
			api_base_url: api_base_url.into(),
			..Default::default()
		}
	}

	pub fn with_ws_base_url(mut self, url: impl Into<String>) -> Self {
		self.ws_base_url = Some(url.into());
		self
	}

	/// Defaults overlaid with the process environment.
	pub fn from_env() -> Result<Self> {
		let mut config = Self::default();
		config.apply_env();
		config.validate()?;
		Ok(config)
	}

	/// Loads a JSON config file, then overlays the process environment.
	///
	/// A missing file yields defaults.
	pub fn load(path: &Path) -> Result<Self> {
		let mut config = match std::fs::read_to_string(path) {
			Ok(content) => serde_json::from_str(&content)?,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
			Err(err) => return Err(err.into()),
		};
		config.apply_env();
		config.validate()?;
		Ok(config)
	}

	fn apply_env(&mut self) {
		if let Some(api) = std::env::var(API_URL_ENV).ok().filter(|v| !v.trim().is_empty()) {
			self.api_base_url = api;
		}
		if let Some(ws) = std::env::var(WS_URL_ENV).ok().filter(|v| !v.trim().is_empty()) {
			self.ws_base_url = Some(ws);
		}
	}

	/// Rejects configurations the lifecycle cannot run with.
	pub fn validate(&self) -> Result<()> {
		Url::parse(&self.api_base_url)?;
		self.channel_base_url()?;
		if self.create_attempts == 0 {
			return Err(Error::Config("createAttempts must be at least 1".to_string()));
		}
		if self.reconnect_multiplier < 1.0 {
			return Err(Error::Config("reconnectMultiplier must be >= 1.0".to_string()));
		}
		if self.journal_capacity == 0 || self.journal_capacity > MAX_JOURNAL_EVENTS {
			return Err(Error::Config(format!("journalCapacity must be between 1 and {MAX_JOURNAL_EVENTS}")));
		}
		let durations = [
			("createBackoffInitialMs", self.create_backoff_initial_ms),
			("createBackoffCapMs", self.create_backoff_cap_ms),
			("requestTimeoutMs", self.request_timeout_ms),
			("heartbeatIntervalMs", self.heartbeat_interval_ms),
			("connectTimeoutMs", self.connect_timeout_ms),
			("reconnectInitialDelayMs", self.reconnect_initial_delay_ms),
			("reconnectCapMs", self.reconnect_cap_ms),
			("inactivityTimeoutMs", self.inactivity_timeout_ms),
			("rateWindowMs", self.rate_window_ms),
			("devtoolsPollMs", self.devtools_poll_ms),
		];
		if let Some((name, _)) = durations.iter().find(|(_, ms)| *ms == 0) {
			return Err(Error::Config(format!("{name} must be greater than zero")));
		}
		Ok(())
	}

	/// Resolves the channel base URL, deriving `ws(s)://` from the API URL when unset.
	pub fn channel_base_url(&self) -> Result<String> {
		if let Some(ws) = &self.ws_base_url {
			let parsed = Url::parse(ws)?;
			return match parsed.scheme() {
				"ws" | "wss" => Ok(ws.trim_end_matches('/').to_string()),
				other => Err(Error::InvalidUrl(format!("channel url must be ws:// or wss://, got {other}://"))),
			};
		}
		derive_ws_url(&self.api_base_url)
	}

	/// `{api}{path}` with a single slash between the two.
	pub fn api_url(&self, path: &str) -> String {
		format!("{}/{}", self.api_base_url.trim_end_matches('/'), path.trim_start_matches('/'))
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_millis(self.request_timeout_ms)
	}

	pub fn heartbeat_interval(&self) -> Duration {
		Duration::from_millis(self.heartbeat_interval_ms)
	}

	pub fn connect_timeout(&self) -> Duration {
		Duration::from_millis(self.connect_timeout_ms)
	}

	pub fn inactivity_timeout(&self) -> Duration {
		Duration::from_millis(self.inactivity_timeout_ms)
	}

	pub fn rate_window(&self) -> Duration {
		Duration::from_millis(self.rate_window_ms)
	}

	pub fn devtools_poll(&self) -> Duration {
		Duration::from_millis(self.devtools_poll_ms)
	}
}

fn derive_ws_url(api_base_url: &str) -> Result<String> {
	let mut url = Url::parse(api_base_url)?;
	let scheme = match url.scheme() {
		"http" => "ws",
		"https" => "wss",
		"ws" | "wss" => return Ok(api_base_url.trim_end_matches('/').to_string()),
		other => return Err(Error::InvalidUrl(format!("unsupported api scheme {other}://"))),
	};
	url.set_scheme(scheme)
		.map_err(|_| Error::InvalidUrl(format!("cannot derive channel url from {api_base_url}")))?;
	Ok(url.as_str().trim_end_matches('/').to_string())
}
