//! Command handlers. Each returns its payload; [`dispatch`] wraps it in the result envelope.

mod security;
mod session;
mod watch;

use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::cli::Commands;
use crate::context::CommandContext;
use crate::output::{ErrorCode, ResultBuilder, print_result};

/// Runs one command and prints its envelope. Returns whether it succeeded.
pub async fn dispatch(command: Commands, ctx: &CommandContext) -> bool {
	let name = command.name();
	match command {
		Commands::Create { user_id } => finish(ResultBuilder::new(name), session::create(ctx, user_id.as_deref()).await, ctx),
		Commands::Status => finish(ResultBuilder::new(name), session::status(ctx).await, ctx),
		Commands::Queue => finish(ResultBuilder::new(name), session::queue(ctx).await, ctx),
		Commands::Heartbeat => finish(ResultBuilder::new(name), session::heartbeat(ctx).await, ctx),
		Commands::End => finish(ResultBuilder::new(name), session::end(ctx).await, ctx),
		Commands::Watch {
			user_id,
			duration,
			end_on_exit,
		} => finish(ResultBuilder::new(name), watch::run(ctx, user_id.as_deref(), duration, end_on_exit).await, ctx),
		Commands::RotateKey => finish(ResultBuilder::new(name), security::rotate_key(ctx), ctx),
		Commands::SecurityLog { critical } => finish(ResultBuilder::new(name), security::log(ctx, critical), ctx),
		Commands::Config => finish(ResultBuilder::new(name), security::config(ctx), ctx),
	}
}

fn finish<T: Serialize>(builder: ResultBuilder<T>, outcome: anyhow::Result<T>, ctx: &CommandContext) -> bool {
	let (result, ok) = match outcome {
		Ok(data) => (builder.data(data).build(), true),
		Err(err) => {
			let code = ErrorCode::classify(&err);
			error!(target = "marcus.cli", code = %code, error = %err, "command failed");
			let builder = match err.downcast_ref::<marcus_session::Error>() {
				Some(marcus_session::Error::SessionCreationFailed { attempts, last_error }) => builder.error_with_details(
					code,
					format!("{err:#}"),
					json!({ "attempts": attempts, "lastError": last_error.to_string() }),
				),
				Some(inner) if inner.status().is_some() => {
					builder.error_with_details(code, format!("{err:#}"), json!({ "status": inner.status() }))
				}
				_ => builder.error(code, format!("{err:#}")),
			};
			(builder.build(), false)
		}
	};
	print_result(&result, ctx.format);
	ok
}
