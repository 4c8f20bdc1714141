//! Environment fingerprinting for key derivation and hijack heuristics.

use std::fmt::Write as _;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of the hex fingerprint, in characters.
pub const FINGERPRINT_LEN: usize = 32;

/// Stable characteristics of the client environment.
///
/// Field order is part of the digest; append new fields at the end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BrowserTraits {
	pub user_agent: String,
	pub language: String,
	pub platform: String,
	pub timezone: String,
	pub screen_width: u32,
	pub screen_height: u32,
	pub color_depth: u32,
	pub cookie_enabled: bool,
	pub do_not_track: String,
}

impl BrowserTraits {
	/// Deterministic hex digest of the canonical JSON encoding.
	pub fn digest(&self) -> String {
		let canonical = serde_json::to_vec(self).unwrap_or_default();
		let hash = Sha256::digest(&canonical);
		let mut out = String::with_capacity(FINGERPRINT_LEN);
		for byte in hash.iter().take(FINGERPRINT_LEN / 2) {
			let _ = write!(out, "{byte:02x}");
		}
		out
	}
}

/// Source of the current environment's traits.
pub trait FingerprintProvider: Send + Sync {
	fn traits(&self) -> BrowserTraits;

	fn fingerprint(&self) -> String {
		self.traits().digest()
	}
}

/// Fixed traits supplied by the host; can be swapped to model environment drift.
#[derive(Debug, Default)]
pub struct StaticTraits {
	traits: RwLock<BrowserTraits>,
}

impl StaticTraits {
	pub fn new(traits: BrowserTraits) -> Self {
		Self {
			traits: RwLock::new(traits),
		}
	}

	pub fn set(&self, traits: BrowserTraits) {
		*self.traits.write() = traits;
	}
}

impl FingerprintProvider for StaticTraits {
	fn traits(&self) -> BrowserTraits {
		self.traits.read().clone()
	}
}

/// Traits derived from the running process (no real browser).
#[derive(Debug, Clone, Copy, Default)]
pub struct HostTraits;

impl FingerprintProvider for HostTraits {
	fn traits(&self) -> BrowserTraits {
		let env = |key: &str| std::env::var(key).unwrap_or_default();
		let language = env("LANG").split('.').next().unwrap_or_default().replace('_', "-");
		BrowserTraits {
			user_agent: concat!("marcus-session/", env!("CARGO_PKG_VERSION")).to_string(),
			language,
			platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
			timezone: env("TZ"),
			screen_width: 0,
			screen_height: 0,
			color_depth: 0,
			cookie_enabled: true,
			do_not_track: env("DO_NOT_TRACK"),
		}
	}
}
