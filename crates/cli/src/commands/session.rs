use anyhow::Result;
use marcus_session::protocol::QueueStatus;
use marcus_session::{HeartbeatRoute, Session, StatusReport};

use crate::context::CommandContext;
use crate::output::{EndData, HeartbeatData};

pub async fn create(ctx: &CommandContext, user_id: Option<&str>) -> Result<Session> {
	let manager = ctx.manager(false)?;
	Ok(manager.create_or_recover(user_id).await?)
}

pub async fn status(ctx: &CommandContext) -> Result<StatusReport> {
	let manager = ctx.manager(false)?;
	Ok(manager.status().await?)
}

pub async fn queue(ctx: &CommandContext) -> Result<QueueStatus> {
	let manager = ctx.manager(false)?;
	Ok(manager.queue_status().await?)
}

/// One-shot processes never open the channel, so this always travels over HTTP.
pub async fn heartbeat(ctx: &CommandContext) -> Result<HeartbeatData> {
	let manager = ctx.manager(false)?;
	let data = match manager.heartbeat().await? {
		HeartbeatRoute::Channel => HeartbeatData {
			route: "channel",
			session_status: None,
		},
		HeartbeatRoute::Http(session_status) => HeartbeatData {
			route: "http",
			session_status,
		},
	};
	Ok(data)
}

pub async fn end(ctx: &CommandContext) -> Result<EndData> {
	let manager = ctx.manager(false)?;
	let session_id = manager.session_id();
	let outcome = manager.end().await?;
	Ok(EndData::new(outcome, session_id))
}
