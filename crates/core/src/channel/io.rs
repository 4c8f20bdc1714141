//! Socket reader and writer loops.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use marcus_protocol::{InboundMessage, OutboundMessage};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use super::ChannelInner;
use crate::event_bus::SessionEvent;

pub(super) type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(super) type Outbound = mpsc::UnboundedSender<Message>;

/// How the inbound stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Closure {
	pub code: Option<u16>,
	pub reason: String,
}

impl Closure {
	pub fn is_normal(&self) -> bool {
		self.code == Some(1000)
	}
}

pub(super) fn text(message: OutboundMessage) -> Message {
	Message::Text(message.to_json())
}

pub(super) async fn write_loop(mut sink: SplitSink<Socket, Message>, mut rx: mpsc::UnboundedReceiver<Message>) {
	while let Some(message) = rx.recv().await {
		let closing = message.is_close();
		if let Err(err) = sink.send(message).await {
			debug!(target = "marcus.channel", error = %err, "channel write failed");
			break;
		}
		if closing {
			break;
		}
	}
	let _ = sink.close().await;
}

/// Waits for `ready` so the open notification precedes any inbound message.
pub(super) async fn read_loop(
	inner: Arc<ChannelInner>,
	epoch: u64,
	mut stream: SplitStream<Socket>,
	outbound: Outbound,
	ready: oneshot::Receiver<()>,
) {
	let _ = ready.await;
	let closure = loop {
		match stream.next().await {
			Some(Ok(Message::Text(raw))) => dispatch(&inner, &raw, &outbound),
			Some(Ok(Message::Close(frame))) => {
				break match frame {
					Some(frame) => Closure {
						code: Some(u16::from(frame.code)),
						reason: frame.reason.into_owned(),
					},
					None => Closure {
						code: None,
						reason: "close frame without status".to_string(),
					},
				};
			}
			Some(Ok(other)) => trace!(target = "marcus.channel", kind = ?other, "non-text frame ignored"),
			Some(Err(err)) => {
				warn!(target = "marcus.channel", error = %err, "channel read failed");
				break Closure {
					code: None,
					reason: err.to_string(),
				};
			}
			None => {
				break Closure {
					code: None,
					reason: "stream ended".to_string(),
				};
			}
		}
	};
	drop(outbound);
	inner.on_closed(epoch, closure);
}

fn dispatch(inner: &ChannelInner, raw: &str, outbound: &Outbound) {
	let message = match serde_json::from_str::<InboundMessage>(raw) {
		Ok(message) => message,
		Err(err) => {
			warn!(target = "marcus.channel", error = %err, "malformed channel message ignored");
			return;
		}
	};

	trace!(target = "marcus.channel", kind = message.kind(), "channel message");
	match message {
		InboundMessage::Ping => {
			if outbound.send(text(OutboundMessage::Pong)).is_err() {
				debug!(target = "marcus.channel", "pong dropped; writer gone");
			}
		}
		InboundMessage::StatusUpdate {
			session_status,
			queue_status,
		} => {
			inner.bus.emit(SessionEvent::StatusUpdate {
				session_status,
				queue_status,
			});
		}
		InboundMessage::QueueUpdate {
			session_status,
			queue_status,
		} => {
			inner.bus.emit(SessionEvent::QueueUpdate {
				session_status,
				queue_status,
			});
		}
		InboundMessage::Unknown => {
			debug!(target = "marcus.channel", payload = raw, "unknown channel message type ignored");
		}
	}
}
