use std::io::{self, Write};
use std::time::Instant;

use colored::Colorize;
use serde::Serialize;

use crate::output::format::OutputFormat;
use crate::output::model::{CommandError, CommandResult, Diagnostic, DiagnosticLevel, ErrorCode, SCHEMA_VERSION};
use crate::output::EventRecord;

/// Builder for constructing command results.
pub struct ResultBuilder<T: Serialize> {
	command: String,
	data: Option<T>,
	error: Option<CommandError>,
	start_time: Instant,
	diagnostics: Vec<Diagnostic>,
}

impl<T: Serialize> ResultBuilder<T> {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			data: None,
			error: None,
			start_time: Instant::now(),
			diagnostics: Vec::new(),
		}
	}

	pub fn data(mut self, data: T) -> Self {
		self.data = Some(data);
		self
	}

	pub fn error(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
		self.error = Some(CommandError {
			code,
			message: message.into(),
			details: None,
		});
		self
	}

	pub fn error_with_details(mut self, code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Self {
		self.error = Some(CommandError {
			code,
			message: message.into(),
			details: Some(details),
		});
		self
	}

	pub fn diagnostic(mut self, level: DiagnosticLevel, message: impl Into<String>) -> Self {
		self.diagnostics.push(Diagnostic {
			level,
			message: message.into(),
			source: None,
		});
		self
	}

	pub fn build(self) -> CommandResult<T> {
		CommandResult {
			schema_version: Some(SCHEMA_VERSION),
			ok: self.error.is_none() && self.data.is_some(),
			command: self.command,
			data: self.data,
			error: self.error,
			duration_ms: Some(self.start_time.elapsed().as_millis() as u64),
			diagnostics: self.diagnostics,
		}
	}
}

/// Print a command result to stdout in the specified format.
pub fn print_result<T: Serialize>(result: &CommandResult<T>, format: OutputFormat) {
	match format {
		OutputFormat::Json => {
			if let Ok(json) = serde_json::to_string_pretty(result) {
				println!("{json}");
			}
		}
		OutputFormat::Ndjson => {
			if let Ok(json) = serde_json::to_string(result) {
				println!("{json}");
			}
		}
		OutputFormat::Text => print_result_text(result),
	}
}

fn print_result_text<T: Serialize>(result: &CommandResult<T>) {
	let mut stdout = io::stdout().lock();

	if result.ok {
		let _ = writeln!(stdout, "{} {}", "ok".green().bold(), result.command);
		if let Some(ref data) = result.data {
			if let Ok(json) = serde_json::to_string_pretty(data) {
				let _ = writeln!(stdout, "{json}");
			}
		}
	} else if let Some(ref error) = result.error {
		let _ = writeln!(stdout, "{} [{}]: {}", "error".red().bold(), error.code, error.message);
		if let Some(ref details) = error.details {
			if let Ok(json) = serde_json::to_string_pretty(details) {
				let _ = writeln!(stdout, "Details: {json}");
			}
		}
	}

	for diag in &result.diagnostics {
		let prefix = match diag.level {
			DiagnosticLevel::Info => "info".normal(),
			DiagnosticLevel::Warning => "warning".yellow(),
			DiagnosticLevel::Error => "error".red(),
		};
		match diag.source {
			Some(ref source) => {
				let _ = writeln!(stdout, "[{prefix}:{source}] {}", diag.message);
			}
			None => {
				let _ = writeln!(stdout, "[{prefix}] {}", diag.message);
			}
		}
	}

	if let Some(duration_ms) = result.duration_ms {
		let _ = writeln!(stdout, "{}", format!("completed in {duration_ms}ms").dimmed());
	}
}

/// Print one streamed event; JSON formats emit one compact line per event.
pub fn print_event(record: &EventRecord, format: OutputFormat) {
	match format {
		OutputFormat::Json | OutputFormat::Ndjson => {
			if let Ok(json) = serde_json::to_string(record) {
				println!("{json}");
			}
		}
		OutputFormat::Text => {
			let mut line = record.event.cyan().to_string();
			if let Some(code) = record.code {
				line.push_str(&format!(" code={code}"));
			}
			if let Some(ref status) = record.session_status {
				line.push_str(&format!(" status={:?}", status.status));
				if let Some(position) = status.queue_position {
					line.push_str(&format!(" position={position}"));
				}
				if let Some(wait) = status.estimated_wait_time {
					line.push_str(&format!(" wait={wait}s"));
				}
			}
			if let Some(ref queue) = record.queue_status {
				line.push_str(&format!(
					" active={}/{} waiting={}",
					queue.active_sessions, queue.max_concurrent_users, queue.waiting_queue_length
				));
			}
			if let Some(ref message) = record.message {
				line.push_str(&format!(" {}", message.dimmed()));
			}
			println!("{line}");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn data_without_error_is_ok() {
		let result = ResultBuilder::new("queue").data(serde_json::json!({ "waiting": 2 })).build();
		assert!(result.ok);
		assert_eq!(result.schema_version, Some(SCHEMA_VERSION));
		assert!(result.duration_ms.is_some());
	}

	#[test]
	fn error_envelope_omits_data() {
		let result = ResultBuilder::<()>::new("status")
			.error_with_details(ErrorCode::SessionExpired, "gone", serde_json::json!({ "status": 404 }))
			.diagnostic(DiagnosticLevel::Info, "local state cleared")
			.build();
		let json = serde_json::to_value(&result).unwrap();
		assert_eq!(json["ok"], false);
		assert_eq!(json["error"]["code"], "SESSION_EXPIRED");
		assert_eq!(json["error"]["details"]["status"], 404);
		assert_eq!(json["diagnostics"][0]["level"], "info");
		assert!(json.get("data").is_none());
	}
}
