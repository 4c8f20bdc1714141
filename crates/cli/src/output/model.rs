use serde::{Deserialize, Serialize};

/// Current schema version for command output.
pub const SCHEMA_VERSION: u32 = 1;

/// The result envelope returned by all commands.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult<T: Serialize> {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub schema_version: Option<u32>,
	pub ok: bool,
	pub command: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<CommandError>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub duration_ms: Option<u64>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub diagnostics: Vec<Diagnostic>,
}

/// Error information for failed commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
	pub code: ErrorCode,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

/// Standardized error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	SessionCreationFailed,
	SessionExpired,
	NoActiveSession,
	Rejected,
	ChannelError,
	Timeout,
	HttpError,
	StorageError,
	ConfigError,
	IoError,
	InternalError,
}

impl ErrorCode {
	/// Maps a command failure onto a code, looking through any added context.
	pub fn classify(err: &anyhow::Error) -> Self {
		if let Some(err) = err.downcast_ref::<marcus_session::Error>() {
			return Self::from(err);
		}
		if err.downcast_ref::<std::io::Error>().is_some() {
			return Self::IoError;
		}
		Self::InternalError
	}
}

impl From<&marcus_session::Error> for ErrorCode {
	fn from(err: &marcus_session::Error) -> Self {
		use marcus_session::Error;

		if err.is_timeout() {
			return Self::Timeout;
		}
		match err {
			Error::SessionCreationFailed { .. } => Self::SessionCreationFailed,
			Error::SessionExpired => Self::SessionExpired,
			Error::NoActiveSession => Self::NoActiveSession,
			Error::Rejected(_) => Self::Rejected,
			Error::Channel(_) | Error::ChannelClosed => Self::ChannelError,
			Error::Status { .. } | Error::Http(_) => Self::HttpError,
			Error::Encryption(_) | Error::Json(_) => Self::StorageError,
			Error::InvalidUrl(_) | Error::Config(_) => Self::ConfigError,
			Error::Io(_) => Self::IoError,
			Error::RequestTimeout(_) | Error::ChannelTimeout(_) => Self::Timeout,
		}
	}
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ErrorCode::SessionCreationFailed => write!(f, "SESSION_CREATION_FAILED"),
			ErrorCode::SessionExpired => write!(f, "SESSION_EXPIRED"),
			ErrorCode::NoActiveSession => write!(f, "NO_ACTIVE_SESSION"),
			ErrorCode::Rejected => write!(f, "REJECTED"),
			ErrorCode::ChannelError => write!(f, "CHANNEL_ERROR"),
			ErrorCode::Timeout => write!(f, "TIMEOUT"),
			ErrorCode::HttpError => write!(f, "HTTP_ERROR"),
			ErrorCode::StorageError => write!(f, "STORAGE_ERROR"),
			ErrorCode::ConfigError => write!(f, "CONFIG_ERROR"),
			ErrorCode::IoError => write!(f, "IO_ERROR"),
			ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
		}
	}
}

/// Diagnostic message attached to a command result.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
	pub level: DiagnosticLevel,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub source: Option<String>,
}

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
	Info,
	Warning,
	Error,
}
