//! Resolved settings shared by every command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use marcus_session::{FileBackend, SessionConfig, SessionLifecycleManager};

use crate::cli::Cli;
use crate::output::OutputFormat;

const APP_DIR: &str = "marcus";
const CONFIG_FILE: &str = "config.json";
const STATE_FILE: &str = "session.json";

#[derive(Debug, Clone)]
pub struct CommandContext {
	pub format: OutputFormat,
	config: SessionConfig,
	config_path: PathBuf,
	state_path: PathBuf,
}

impl CommandContext {
	/// Loads the config file, then applies `--api-url` / `--ws-url` on top of it and the environment.
	pub fn from_cli(cli: &Cli) -> Result<Self> {
		let config_path = cli.config.clone().unwrap_or_else(|| app_dir(dirs::config_dir()).join(CONFIG_FILE));
		let state_path = cli.state.clone().unwrap_or_else(|| app_dir(dirs::data_local_dir()).join(STATE_FILE));

		let mut config = SessionConfig::load(&config_path)
			.map_err(|err| marcus_session::Error::Config(format!("{}: {err}", config_path.display())))
			.context("failed to load config")?;
		if let Some(api) = &cli.api_url {
			config.api_base_url = api.clone();
		}
		if let Some(ws) = &cli.ws_url {
			config.ws_base_url = Some(ws.clone());
		}
		config.validate()?;

		Ok(Self {
			format: cli.format,
			config,
			config_path,
			state_path,
		})
	}

	pub fn config(&self) -> &SessionConfig {
		&self.config
	}

	pub fn config_path(&self) -> &Path {
		&self.config_path
	}

	pub fn state_path(&self) -> &Path {
		&self.state_path
	}

	/// Manager over the sealed state file; `background` starts the security tickers.
	pub fn manager(&self, background: bool) -> marcus_session::Result<SessionLifecycleManager> {
		SessionLifecycleManager::builder(self.config.clone())
			.with_storage(Arc::new(FileBackend::open(&self.state_path)))
			.with_background_monitoring(background)
			.build()
	}
}

fn app_dir(base: Option<PathBuf>) -> PathBuf {
	base.or_else(dirs::home_dir).unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR)
}

#[cfg(test)]
mod tests {
	use clap::Parser;

	use super::*;

	#[test]
	fn flags_override_file_values() {
		let dir = tempfile::tempdir().unwrap();
		let config_path = dir.path().join("config.json");
		std::fs::write(&config_path, r#"{ "apiBaseUrl": "http://10.0.0.2:9000", "heartbeatIntervalMs": 5000 }"#).unwrap();

		let cli = Cli::try_parse_from([
			"marcus-session",
			"config",
			"--config",
			config_path.to_str().unwrap(),
			"--api-url",
			"https://queue.example.org/api",
		])
		.unwrap();
		let ctx = CommandContext::from_cli(&cli).unwrap();
		assert_eq!(ctx.config().api_base_url, "https://queue.example.org/api");
		assert_eq!(ctx.config().heartbeat_interval_ms, 5_000);
		assert_eq!(ctx.config().channel_base_url().unwrap(), "wss://queue.example.org/api");
	}

	#[test]
	fn default_state_lives_under_app_dir() {
		let cli = Cli::try_parse_from(["marcus-session", "config", "--api-url", "http://127.0.0.1:9"]).unwrap();
		let ctx = CommandContext::from_cli(&cli).unwrap();
		assert!(ctx.state_path().ends_with("marcus/session.json"));
	}

	#[test]
	fn bad_channel_override_is_rejected() {
		let cli = Cli::try_parse_from(["marcus-session", "config", "--api-url", "http://127.0.0.1:9", "--ws-url", "ftp://nope"]).unwrap();
		assert!(CommandContext::from_cli(&cli).is_err());
	}
}
