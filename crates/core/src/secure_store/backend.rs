//! Raw key/value backends underneath [`SecureStore`](super::SecureStore).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

const STORE_SCHEMA_VERSION: u32 = 1;

/// String key/value persistence with `sessionStorage`-like semantics.
pub trait StorageBackend: Send + Sync {
	fn get(&self, key: &str) -> Result<Option<String>>;
	fn set(&self, key: &str, value: &str) -> Result<()>;
	/// Returns whether the key existed.
	fn remove(&self, key: &str) -> Result<bool>;
	fn keys(&self) -> Result<Vec<String>>;
}

/// Process-lifetime backend; state is lost when the value is dropped.
#[derive(Debug, Default)]
pub struct MemoryBackend {
	entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryBackend {
	pub fn new() -> Self {
		Self::default()
	}
}

impl StorageBackend for MemoryBackend {
	fn get(&self, key: &str) -> Result<Option<String>> {
		Ok(self.entries.lock().get(key).cloned())
	}

	fn set(&self, key: &str, value: &str) -> Result<()> {
		self.entries.lock().insert(key.to_string(), value.to_string());
		Ok(())
	}

	fn remove(&self, key: &str) -> Result<bool> {
		Ok(self.entries.lock().remove(key).is_some())
	}

	fn keys(&self) -> Result<Vec<String>> {
		Ok(self.entries.lock().keys().cloned().collect())
	}
}

/// On-disk format for a [`FileBackend`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreFile {
	schema: u32,
	#[serde(default)]
	entries: BTreeMap<String, String>,
}

impl Default for StoreFile {
	fn default() -> Self {
		Self {
			schema: STORE_SCHEMA_VERSION,
			entries: BTreeMap::new(),
		}
	}
}

/// JSON-file backend so a session survives process restarts (the CLI's "page reload").
///
/// The whole file is rewritten on every mutation. Unreadable files load as empty.
#[derive(Debug)]
pub struct FileBackend {
	path: PathBuf,
	file: Mutex<StoreFile>,
}

impl FileBackend {
	pub fn open(path: impl Into<PathBuf>) -> Self {
		let path = path.into();
		let file = fs::read_to_string(&path)
			.ok()
			.and_then(|content| serde_json::from_str::<StoreFile>(&content).ok())
			.filter(|file| file.schema == STORE_SCHEMA_VERSION)
			.unwrap_or_default();
		Self {
			path,
			file: Mutex::new(file),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn save(&self, file: &StoreFile) -> Result<()> {
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent)?;
		}
		let json = serde_json::to_string_pretty(file)?;
		fs::write(&self.path, json)?;
		Ok(())
	}
}

impl StorageBackend for FileBackend {
	fn get(&self, key: &str) -> Result<Option<String>> {
		Ok(self.file.lock().entries.get(key).cloned())
	}

	fn set(&self, key: &str, value: &str) -> Result<()> {
		let mut file = self.file.lock();
		file.entries.insert(key.to_string(), value.to_string());
		self.save(&file)
	}

	fn remove(&self, key: &str) -> Result<bool> {
		let mut file = self.file.lock();
		if file.entries.remove(key).is_none() {
			return Ok(false);
		}
		self.save(&file)?;
		Ok(true)
	}

	fn keys(&self) -> Result<Vec<String>> {
		Ok(self.file.lock().entries.keys().cloned().collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn file_backend_persists_across_reopen() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested").join("store.json");

		let backend = FileBackend::open(&path);
		backend.set("session.id", "abc123").unwrap();
		drop(backend);

		let reopened = FileBackend::open(&path);
		assert_eq!(reopened.get("session.id").unwrap().as_deref(), Some("abc123"));
		assert!(reopened.remove("session.id").unwrap());
		assert!(!reopened.remove("session.id").unwrap());

		let again = FileBackend::open(&path);
		assert!(again.keys().unwrap().is_empty());
	}

	#[test]
	fn corrupt_file_loads_as_empty() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("store.json");
		fs::write(&path, "{ not json").unwrap();

		let backend = FileBackend::open(&path);
		assert!(backend.keys().unwrap().is_empty());
		backend.set("k", "v").unwrap();
		assert_eq!(FileBackend::open(&path).get("k").unwrap().as_deref(), Some("v"));
	}

	#[test]
	fn memory_backend_lists_keys_sorted() {
		let backend = MemoryBackend::new();
		backend.set("session.b", "2").unwrap();
		backend.set("session.a", "1").unwrap();
		assert_eq!(backend.keys().unwrap(), vec!["session.a", "session.b"]);
	}
}
