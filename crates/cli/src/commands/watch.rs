use std::time::Duration;

use anyhow::Result;
use marcus_session::EventKind;
use tokio::sync::mpsc;
use tracing::info;

use crate::context::CommandContext;
use crate::output::{EndData, EventRecord, WatchSummary, print_event};

/// Holds the session open with background monitoring and streams every bus event.
pub async fn run(ctx: &CommandContext, user_id: Option<&str>, duration: Option<u64>, end_on_exit: bool) -> Result<WatchSummary> {
	let manager = ctx.manager(true)?;

	let (tx, mut rx) = mpsc::unbounded_channel();
	for kind in EventKind::ALL {
		let tx = tx.clone();
		manager.events().on(kind, move |event| {
			let _ = tx.send(EventRecord::from(event));
		});
	}
	drop(tx);

	let session = manager.create_or_recover(user_id).await?;
	info!(target = "marcus.cli", session_id = %session.id, "watching session");

	// Events raised while recovering describe the replaced session, not this one.
	let mut seen = 0;
	while let Ok(record) = rx.try_recv() {
		seen += 1;
		print_event(&record, ctx.format);
	}

	let deadline = async {
		match duration {
			Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
			None => std::future::pending().await,
		}
	};
	tokio::pin!(deadline);
	let interrupt = tokio::signal::ctrl_c();
	tokio::pin!(interrupt);

	let stopped_by = loop {
		tokio::select! {
			_ = &mut deadline => break "duration",
			_ = &mut interrupt => break "interrupt",
			Some(record) = rx.recv() => {
				seen += 1;
				print_event(&record, ctx.format);
				match record.event {
					"sessionExpired" => break "expired",
					"reconnectFailed" => break "reconnect_failed",
					_ => {}
				}
			}
		}
	};

	let ended = if end_on_exit && manager.is_active() {
		let session_id = manager.session_id();
		Some(EndData::new(manager.end().await?, session_id))
	} else {
		None
	};

	Ok(WatchSummary {
		session_id: session.id,
		events: seen,
		stopped_by,
		ended,
	})
}
