use anyhow::Result;

use crate::context::CommandContext;
use crate::output::{ConfigData, RotateKeyData, SecurityLogData};

pub fn rotate_key(ctx: &CommandContext) -> Result<RotateKeyData> {
	let manager = ctx.manager(false)?;
	let monitor = manager.monitor();
	let rotated = monitor.rotate_key();
	Ok(RotateKeyData {
		rotated,
		fingerprint: monitor.store().fingerprint(),
		session_readable: monitor.stored_session_id().is_some(),
	})
}

/// Journal entries recorded while this process loaded and validated the stored session.
pub fn log(ctx: &CommandContext, critical_only: bool) -> Result<SecurityLogData> {
	let manager = ctx.manager(false)?;
	let metrics = manager.monitor().metrics();
	let events = metrics
		.security_events
		.into_iter()
		.filter(|event| !critical_only || event.kind.is_critical())
		.collect();
	Ok(SecurityLogData {
		session_id: manager.session_id(),
		fingerprint: metrics.current_fingerprint,
		activity_count: metrics.activity_count,
		events,
	})
}

pub fn config(ctx: &CommandContext) -> Result<ConfigData> {
	Ok(ConfigData {
		config_path: ctx.config_path().to_path_buf(),
		state_path: ctx.state_path().to_path_buf(),
		channel_url: ctx.config().channel_base_url()?,
		config: ctx.config().clone(),
	})
}

