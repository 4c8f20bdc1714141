//! RealtimeChannel against a local WebSocket server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use marcus_session::{ConnectionState, EventBus, EventKind, RealtimeChannel, SessionConfig, SessionEvent};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

fn config(port: u16) -> SessionConfig {
	SessionConfig {
		connect_timeout_ms: 2_000,
		reconnect_initial_delay_ms: 20,
		reconnect_cap_ms: 200,
		..SessionConfig::new(format!("http://127.0.0.1:{port}"))
	}
}

fn recorder(bus: &EventBus) -> mpsc::UnboundedReceiver<SessionEvent> {
	let (tx, rx) = mpsc::unbounded_channel();
	for kind in EventKind::ALL {
		let tx = tx.clone();
		bus.on(kind, move |event| {
			let _ = tx.send(event.clone());
		});
	}
	rx
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
	tokio::time::timeout(Duration::from_secs(5), rx.recv())
		.await
		.expect("timed out waiting for event")
		.expect("event bus dropped")
}

fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
	let mut events = Vec::new();
	while let Ok(event) = rx.try_recv() {
		events.push(event);
	}
	events
}

fn parse(message: Message) -> Value {
	match message {
		Message::Text(text) => serde_json::from_str(&text).expect("client sent JSON"),
		other => panic!("expected text frame, got {other:?}"),
	}
}

#[tokio::test]
async fn ping_is_answered_with_pong_and_normal_close_does_not_reconnect() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let port = listener.local_addr().unwrap().port();

	let server = tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		let mut path = String::new();
		let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
			path = req.uri().path().to_string();
			Ok(resp)
		})
		.await
		.unwrap();
		let (mut tx, mut rx) = ws.split();

		tx.send(Message::Text(json!({ "type": "ping" }).to_string())).await.unwrap();
		let reply = parse(rx.next().await.unwrap().unwrap());

		tx.send(Message::Text(
			json!({
				"type": "queue_update",
				"queue_status": { "active_sessions": 5, "max_concurrent_users": 5, "waiting_queue_length": 2, "available_slots": 0 }
			})
			.to_string(),
		))
		.await
		.unwrap();
		tx.send(Message::Text("not json".to_string())).await.unwrap();
		tx.send(Message::Text(json!({ "type": "something_new" }).to_string())).await.unwrap();
		tx.send(Message::Close(Some(CloseFrame {
			code: CloseCode::Normal,
			reason: "bye".into(),
		})))
		.await
		.unwrap();
		(path, reply)
	});

	let bus = EventBus::new();
	let mut events = recorder(&bus);
	let channel = RealtimeChannel::new(&config(port), bus).unwrap();
	channel.connect("abc123").await.unwrap();
	assert_eq!(next_event(&mut events).await, SessionEvent::Connected);

	let (path, reply) = server.await.unwrap();
	assert_eq!(path, "/session/ws/abc123");
	assert_eq!(reply, json!({ "type": "pong" }));

	match next_event(&mut events).await {
		SessionEvent::QueueUpdate { queue_status, .. } => assert_eq!(queue_status.unwrap().waiting_queue_length, 2),
		other => panic!("expected queue update, got {other:?}"),
	}
	match next_event(&mut events).await {
		SessionEvent::Disconnected { code, .. } => assert_eq!(code, Some(1000)),
		other => panic!("expected disconnect, got {other:?}"),
	}

	tokio::time::sleep(Duration::from_millis(200)).await;
	assert!(drain(&mut events).is_empty());
	assert_eq!(channel.reconnect_attempts(), 0);
	assert_eq!(channel.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn abnormal_close_reconnects_and_resets_budget() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let port = listener.local_addr().unwrap().port();

	let server = tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
		ws.close(Some(CloseFrame {
			code: CloseCode::Error,
			reason: "restarting".into(),
		}))
		.await
		.unwrap();

		let (stream, _) = listener.accept().await.unwrap();
		let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
		let heartbeat = parse(ws.next().await.unwrap().unwrap());
		ws.close(None).await.ok();
		heartbeat
	});

	let bus = EventBus::new();
	let mut events = recorder(&bus);
	let channel = RealtimeChannel::new(&config(port), bus).unwrap();
	channel.connect("abc123").await.unwrap();

	assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
	match next_event(&mut events).await {
		SessionEvent::Disconnected { code, .. } => assert_eq!(code, Some(1011)),
		other => panic!("expected abnormal disconnect, got {other:?}"),
	}
	assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
	assert_eq!(channel.reconnect_attempts(), 0);

	channel.heartbeat().unwrap();
	assert_eq!(server.await.unwrap(), json!({ "type": "heartbeat" }));
	channel.shutdown();
}

#[tokio::test]
async fn reconnect_budget_is_capped_at_five_attempts() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let port = listener.local_addr().unwrap().port();

	let server = tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
		// Drop the socket and the listener: the stream ends without a close frame
		// and every later connect is refused.
		drop(ws);
		drop(listener);
	});

	let bus = EventBus::new();
	let mut events = recorder(&bus);
	let channel = RealtimeChannel::new(&config(port), bus).unwrap();
	channel.connect("abc123").await.unwrap();
	server.await.unwrap();

	assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
	match next_event(&mut events).await {
		SessionEvent::Disconnected { code, .. } => assert_eq!(code, None),
		other => panic!("expected disconnect, got {other:?}"),
	}
	assert_eq!(next_event(&mut events).await, SessionEvent::ReconnectFailed);
	assert_eq!(channel.reconnect_attempts(), 5);
	assert_eq!(channel.state(), ConnectionState::Disconnected);

	tokio::time::sleep(Duration::from_millis(300)).await;
	assert!(drain(&mut events).is_empty());
	assert!(channel.heartbeat().is_err());
}

#[tokio::test]
async fn shutdown_sends_normal_close_and_cancels_reconnect() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let port = listener.local_addr().unwrap().port();

	let server = tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
		loop {
			match ws.next().await {
				Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
				Some(Ok(_)) => continue,
				_ => return None,
			}
		}
	});

	let bus = EventBus::new();
	let mut events = recorder(&bus);
	let channel = RealtimeChannel::new(&config(port), bus).unwrap();
	channel.connect("abc123").await.unwrap();
	assert_eq!(next_event(&mut events).await, SessionEvent::Connected);

	channel.shutdown();
	assert_eq!(channel.state(), ConnectionState::Disconnected);
	assert_eq!(server.await.unwrap(), Some(1000));

	match next_event(&mut events).await {
		SessionEvent::Disconnected { code, .. } => assert_eq!(code, Some(1000)),
		other => panic!("expected disconnect, got {other:?}"),
	}
	tokio::time::sleep(Duration::from_millis(200)).await;
	assert!(drain(&mut events).is_empty());
}
