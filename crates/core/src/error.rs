//! Error types for session admission, channel transport, and local security.

use thiserror::Error;

/// Convenient result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	/// Every creation attempt failed; carries the last observed failure.
	#[error("failed to create session after {attempts} attempts: {last_error}")]
	SessionCreationFailed { attempts: u32, last_error: Box<Error> },

	/// The backend no longer knows the session (HTTP 404).
	#[error("session expired or unknown to the backend")]
	SessionExpired,

	#[error("no active session")]
	NoActiveSession,

	/// The backend answered 2xx but reported `success: false`.
	#[error("backend rejected the request: {0}")]
	Rejected(String),

	#[error("channel did not open within {0} ms")]
	ChannelTimeout(u64),

	#[error("channel error: {0}")]
	Channel(String),

	#[error("channel is not open")]
	ChannelClosed,

	#[error("HTTP {status}: {body}")]
	Status { status: u16, body: String },

	#[error("request timed out after {0} ms")]
	RequestTimeout(u64),

	#[error(transparent)]
	Http(#[from] reqwest::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error("encryption failure: {0}")]
	Encryption(String),

	#[error("invalid url: {0}")]
	InvalidUrl(String),

	#[error("configuration error: {0}")]
	Config(String),
}

impl Error {
	/// True for request and channel-open timeouts.
	pub fn is_timeout(&self) -> bool {
		match self {
			Self::RequestTimeout(_) | Self::ChannelTimeout(_) => true,
			Self::Http(err) => err.is_timeout(),
			_ => false,
		}
	}

	/// True when the backend reported the session as gone.
	pub fn is_not_found(&self) -> bool {
		matches!(self, Self::SessionExpired | Self::Status { status: 404, .. })
	}

	/// HTTP status carried by this error, if any.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Status { status, .. } => Some(*status),
			Self::SessionExpired => Some(404),
			Self::Http(err) => err.status().map(|s| s.as_u16()),
			_ => None,
		}
	}
}

impl From<url::ParseError> for Error {
	fn from(err: url::ParseError) -> Self {
		Self::InvalidUrl(err.to_string())
	}
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
	fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
		Self::Channel(err.to_string())
	}
}
