use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "marcus-session", version, about = "Hold a MARCUS admission session from the terminal")]
pub struct Cli {
	/// Increase log verbosity (-v info, -vv debug, -vvv trace)
	#[arg(short, long, global = true, action = ArgAction::Count)]
	pub verbose: u8,

	/// Output format
	#[arg(short = 'f', long, global = true, value_enum, default_value_t = OutputFormat::Text)]
	pub format: OutputFormat,

	/// Sealed session state file
	#[arg(long, global = true, value_name = "PATH")]
	pub state: Option<PathBuf>,

	/// JSON config file (camelCase keys)
	#[arg(long, global = true, value_name = "PATH")]
	pub config: Option<PathBuf>,

	/// Override the admission API base URL
	#[arg(long, global = true, value_name = "URL")]
	pub api_url: Option<String>,

	/// Override the realtime channel base URL
	#[arg(long, global = true, value_name = "URL")]
	pub ws_url: Option<String>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Create a session, or reuse the stored one while the backend still knows it
	Create {
		#[arg(long)]
		user_id: Option<String>,
	},
	/// Fetch admission status for the stored session
	Status,
	/// Show global queue counters
	Queue,
	/// Send one heartbeat for the stored session
	Heartbeat,
	/// End the stored session on the backend and clear local state
	End,
	/// Keep the session alive and stream its events
	Watch {
		#[arg(long)]
		user_id: Option<String>,
		/// Stop after this many seconds instead of waiting for Ctrl-C
		#[arg(long, value_name = "SECS")]
		duration: Option<u64>,
		/// End the session when the watch stops
		#[arg(long)]
		end_on_exit: bool,
	},
	/// Re-key the sealed state file
	RotateKey,
	/// Print the security journal and session metrics
	SecurityLog {
		/// Only fingerprint, invalidation and devtools events
		#[arg(long)]
		critical: bool,
	},
	/// Print the effective configuration
	Config,
}

impl Commands {
	pub fn name(&self) -> &'static str {
		match self {
			Self::Create { .. } => "create",
			Self::Status => "status",
			Self::Queue => "queue",
			Self::Heartbeat => "heartbeat",
			Self::End => "end",
			Self::Watch { .. } => "watch",
			Self::RotateKey => "rotate-key",
			Self::SecurityLog { .. } => "security-log",
			Self::Config => "config",
		}
	}
}
