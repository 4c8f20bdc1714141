//! AES-256-GCM sealing of stored values.
//!
//! Sealed values are `gcm:<base64 nonce>:<base64 ciphertext+tag>`.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

pub(crate) const SEALED_PREFIX: &str = "gcm:";
pub(crate) const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;

/// Derives 256-bit key material from the fingerprint and a random salt.
pub(crate) fn derive_key_material(fingerprint: &str) -> [u8; KEY_LEN] {
	let mut salt = [0u8; SALT_LEN];
	rand::thread_rng().fill_bytes(&mut salt);

	let mut hasher = Sha256::new();
	hasher.update(b"marcus_session:");
	hasher.update(fingerprint.as_bytes());
	hasher.update(b":");
	hasher.update(salt);
	hasher.finalize().into()
}

pub(crate) fn encode_key_material(material: &[u8; KEY_LEN]) -> String {
	BASE64.encode(material)
}

pub(crate) fn decode_key_material(encoded: &str) -> Result<[u8; KEY_LEN]> {
	let bytes = BASE64.decode(encoded.trim()).map_err(|e| Error::Encryption(format!("key material: {e}")))?;
	bytes
		.try_into()
		.map_err(|bytes: Vec<u8>| Error::Encryption(format!("key material has {} bytes, expected {KEY_LEN}", bytes.len())))
}

pub(crate) fn is_sealed(raw: &str) -> bool {
	raw.starts_with(SEALED_PREFIX)
}

pub(crate) struct SessionCipher {
	cipher: Aes256Gcm,
}

impl SessionCipher {
	pub(crate) fn new(material: &[u8; KEY_LEN]) -> Result<Self> {
		let cipher = Aes256Gcm::new_from_slice(material).map_err(|e| Error::Encryption(e.to_string()))?;
		Ok(Self { cipher })
	}

	pub(crate) fn seal(&self, plaintext: &[u8]) -> Result<String> {
		let mut nonce = [0u8; NONCE_LEN];
		rand::thread_rng().fill_bytes(&mut nonce);
		let ciphertext = self
			.cipher
			.encrypt(Nonce::from_slice(&nonce), plaintext)
			.map_err(|_| Error::Encryption("seal failed".to_string()))?;
		Ok(format!("{SEALED_PREFIX}{}:{}", BASE64.encode(nonce), BASE64.encode(ciphertext)))
	}

	pub(crate) fn open(&self, sealed: &str) -> Result<Vec<u8>> {
		let body = sealed
			.strip_prefix(SEALED_PREFIX)
			.ok_or_else(|| Error::Encryption("value is not sealed".to_string()))?;
		let (nonce_b64, ct_b64) = body
			.split_once(':')
			.ok_or_else(|| Error::Encryption("sealed value missing separator".to_string()))?;
		let nonce = BASE64.decode(nonce_b64).map_err(|e| Error::Encryption(format!("nonce: {e}")))?;
		if nonce.len() != NONCE_LEN {
			return Err(Error::Encryption(format!("nonce has {} bytes", nonce.len())));
		}
		let ciphertext = BASE64.decode(ct_b64).map_err(|e| Error::Encryption(format!("ciphertext: {e}")))?;
		self.cipher
			.decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
			.map_err(|_| Error::Encryption("authentication failed".to_string()))
	}
}
