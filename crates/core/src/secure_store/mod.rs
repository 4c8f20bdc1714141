//! Encrypted, fingerprint-keyed local persistence.
//!
//! Availability wins over confidentiality here: a value that cannot be sealed
//! is stored as plain JSON, and a value that cannot be opened is retried as
//! plain JSON before the read gives up with `None`.

mod backend;
mod cipher;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

pub use self::backend::{FileBackend, MemoryBackend, StorageBackend};
use self::cipher::{SessionCipher, decode_key_material, derive_key_material, encode_key_material, is_sealed};
use crate::error::{Error, Result};
use crate::fingerprint::FingerprintProvider;

/// Prefix shared by every key this crate persists.
pub const NAMESPACE: &str = "session.";
/// Sealed [`SessionEnvelope`](crate::security::SessionEnvelope).
pub const ENVELOPE_KEY: &str = "session.envelope";
/// Sealed session identifier.
pub const SESSION_ID_KEY: &str = "session.id";
/// Unsealed session identifier, written only when sealed storage fails.
pub const PLAIN_ID_KEY: &str = "session.id.plain";
/// Base64 key material the cipher is built from.
pub const KEY_MATERIAL_KEY: &str = "session.enc_key";

pub struct SecureStore {
	backend: Arc<dyn StorageBackend>,
	fingerprint: Arc<dyn FingerprintProvider>,
	cipher: RwLock<Option<SessionCipher>>,
}

impl std::fmt::Debug for SecureStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SecureStore").field("keyed", &self.cipher.read().is_some()).finish()
	}
}

impl SecureStore {
	/// Opens the store, reusing persisted key material or deriving new material from the fingerprint.
	pub fn new(backend: Arc<dyn StorageBackend>, fingerprint: Arc<dyn FingerprintProvider>) -> Self {
		let store = Self {
			backend,
			fingerprint,
			cipher: RwLock::new(None),
		};
		let cipher = store.load_key().or_else(|| store.derive_key());
		*store.cipher.write() = cipher;
		store
	}

	/// In-memory store keyed from `fingerprint`.
	pub fn in_memory(fingerprint: Arc<dyn FingerprintProvider>) -> Self {
		Self::new(Arc::new(MemoryBackend::new()), fingerprint)
	}

	pub fn fingerprint(&self) -> String {
		self.fingerprint.fingerprint()
	}

	/// Seals and stores `value`; degrades to plain JSON when sealing fails.
	pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
		let json = serde_json::to_string(value)?;
		match self.seal(json.as_bytes()) {
			Ok(sealed) => self.backend.set(key, &sealed),
			Err(err) => {
				warn!(target = "marcus.store", key, error = %err, "sealing failed; storing plaintext");
				self.backend.set(key, &json)
			}
		}
	}

	/// Opens and decodes `key`; `None` when absent or unreadable either way.
	pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
		let raw = match self.backend.get(key) {
			Ok(Some(raw)) => raw,
			Ok(None) => return None,
			Err(err) => {
				warn!(target = "marcus.store", key, error = %err, "backend read failed");
				return None;
			}
		};

		if is_sealed(&raw) {
			match self.open(&raw).and_then(|bytes| serde_json::from_slice::<T>(&bytes).map_err(Error::from)) {
				Ok(value) => return Some(value),
				Err(err) => debug!(target = "marcus.store", key, error = %err, "open failed; trying plaintext"),
			}
		}

		match serde_json::from_str::<T>(&raw) {
			Ok(value) => Some(value),
			Err(err) => {
				warn!(target = "marcus.store", key, error = %err, "stored value unreadable");
				None
			}
		}
	}

	pub fn remove(&self, key: &str) -> Result<()> {
		self.backend.remove(key)?;
		Ok(())
	}

	/// Stores `value` unsealed; used for the fallback session identifier.
	pub fn put_plain(&self, key: &str, value: &str) -> Result<()> {
		self.backend.set(key, value)
	}

	pub fn get_plain(&self, key: &str) -> Option<String> {
		self.backend.get(key).ok().flatten()
	}

	/// Removes every namespaced entry except the key material.
	pub fn clear_namespace(&self) -> Result<usize> {
		let mut removed = 0;
		for key in self.namespaced_keys()? {
			if self.backend.remove(&key)? {
				removed += 1;
			}
		}
		Ok(removed)
	}

	/// Re-keys the store: opens every namespaced entry, discards the key, derives a new one, reseals.
	///
	/// Best effort: entries that fail are logged and left behind, nothing is rolled back.
	pub fn rotate_key(&self) -> bool {
		let keys = match self.namespaced_keys() {
			Ok(keys) => keys,
			Err(err) => {
				warn!(target = "marcus.store", error = %err, "key rotation aborted; cannot list entries");
				return false;
			}
		};

		let mut ok = true;
		let mut entries = Vec::with_capacity(keys.len());
		for key in keys.into_iter().filter(|k| k != PLAIN_ID_KEY) {
			match self.get::<serde_json::Value>(&key) {
				Some(value) => entries.push((key, value)),
				None => {
					warn!(target = "marcus.store", key = %key, "unreadable entry skipped during rotation");
					ok = false;
				}
			}
		}

		if let Err(err) = self.backend.remove(KEY_MATERIAL_KEY) {
			warn!(target = "marcus.store", error = %err, "failed to discard old key material");
			ok = false;
		}
		let fresh = self.derive_key();
		if fresh.is_none() {
			ok = false;
		}
		*self.cipher.write() = fresh;

		for (key, value) in &entries {
			if let Err(err) = self.put(key, value) {
				warn!(target = "marcus.store", key = %key, error = %err, "failed to reseal entry");
				ok = false;
			}
		}

		info!(target = "marcus.store", entries = entries.len(), ok, "encryption key rotated");
		ok
	}

	/// Seals a value and opens it again with the current key.
	pub fn self_test(&self) -> bool {
		let probe = br#"{"test":"encryption_test"}"#;
		self.seal(probe).and_then(|sealed| self.open(&sealed)).map(|out| out == probe).unwrap_or(false)
	}

	fn namespaced_keys(&self) -> Result<Vec<String>> {
		Ok(self
			.backend
			.keys()?
			.into_iter()
			.filter(|k| k.starts_with(NAMESPACE) && k != KEY_MATERIAL_KEY)
			.collect())
	}

	fn seal(&self, plaintext: &[u8]) -> Result<String> {
		let cipher = self.cipher.read();
		let cipher = cipher.as_ref().ok_or_else(|| Error::Encryption("no key material".to_string()))?;
		cipher.seal(plaintext)
	}

	fn open(&self, sealed: &str) -> Result<Vec<u8>> {
		let cipher = self.cipher.read();
		let cipher = cipher.as_ref().ok_or_else(|| Error::Encryption("no key material".to_string()))?;
		cipher.open(sealed)
	}

	fn load_key(&self) -> Option<SessionCipher> {
		let encoded = self.backend.get(KEY_MATERIAL_KEY).ok().flatten()?;
		match decode_key_material(&encoded).and_then(|material| SessionCipher::new(&material)) {
			Ok(cipher) => Some(cipher),
			Err(err) => {
				warn!(target = "marcus.store", error = %err, "persisted key material unusable; deriving new key");
				None
			}
		}
	}

	fn derive_key(&self) -> Option<SessionCipher> {
		let material = derive_key_material(&self.fingerprint.fingerprint());
		if let Err(err) = self.backend.set(KEY_MATERIAL_KEY, &encode_key_material(&material)) {
			warn!(target = "marcus.store", error = %err, "failed to persist key material; key lives in memory only");
		}
		match SessionCipher::new(&material) {
			Ok(cipher) => Some(cipher),
			Err(err) => {
				warn!(target = "marcus.store", error = %err, "key derivation failed; values will be stored unsealed");
				None
			}
		}
	}
}
