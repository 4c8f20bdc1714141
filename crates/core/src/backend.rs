//! HTTP client for the session admission API.
//!
//! [`SessionBackend`] is the seam the lifecycle manager talks through;
//! [`HttpBackend`] is the production implementation on `reqwest`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use marcus_protocol::{CreateSessionResponse, ErrorBody, HeartbeatResponse, QueueResponse, RemoveResponse, StatusResponse};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::security::SecurityMonitor;

/// Transport that carried a teardown notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadDelivery {
	/// Detached request queued on the running async runtime.
	Beacon,
	/// Blocking request completed on a dedicated thread.
	Blocking,
	/// Neither transport could deliver.
	Undelivered,
}

/// Admission API operations.
///
/// Every method maps a 404 to [`Error::SessionExpired`] except `create`.
#[async_trait]
pub trait SessionBackend: Send + Sync {
	async fn create(&self, user_id: Option<&str>) -> Result<CreateSessionResponse>;

	async fn status(&self, session_id: &str) -> Result<StatusResponse>;

	async fn queue(&self) -> Result<QueueResponse>;

	async fn heartbeat(&self, session_id: &str) -> Result<HeartbeatResponse>;

	/// `DELETE /session/remove/{id}`, retried as `POST` when the server answers 405.
	async fn remove(&self, session_id: &str) -> Result<RemoveResponse>;

	/// Synchronous best-effort removal used while the host is going away.
	fn send_unload(&self, session_id: &str) -> UnloadDelivery;
}

pub struct HttpBackend {
	client: reqwest::Client,
	config: SessionConfig,
	timeout: Duration,
	monitor: Option<Arc<SecurityMonitor>>,
}

impl std::fmt::Debug for HttpBackend {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HttpBackend")
			.field("base_url", &self.config.api_base_url)
			.field("timeout", &self.timeout)
			.finish()
	}
}

impl HttpBackend {
	pub fn new(config: &SessionConfig) -> Result<Self> {
		let client = reqwest::Client::builder()
			.user_agent(concat!("marcus-session/", env!("CARGO_PKG_VERSION")))
			.build()?;
		Ok(Self {
			client,
			config: config.clone(),
			timeout: config.request_timeout(),
			monitor: None,
		})
	}

	/// Counts every outbound request against `monitor`'s rate window.
	pub fn with_monitor(mut self, monitor: Arc<SecurityMonitor>) -> Self {
		self.monitor = Some(monitor);
		self
	}

	async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
		if let Some(monitor) = &self.monitor {
			monitor.record_request();
		}
		match tokio::time::timeout(self.timeout, request.send()).await {
			Ok(result) => Ok(result?),
			Err(_) => Err(Error::RequestTimeout(self.timeout.as_millis() as u64)),
		}
	}

	async fn call<T: DeserializeOwned>(&self, method: Method, path: &str, not_found_expires: bool) -> Result<T> {
		let url = self.config.api_url(path);
		debug!(target = "marcus.session", %method, url = %url, "admission request");
		let response = self.send(self.client.request(method, &url)).await?;
		self.decode(response, not_found_expires).await
	}

	async fn decode<T: DeserializeOwned>(&self, response: reqwest::Response, not_found_expires: bool) -> Result<T> {
		let status = response.status();
		if status == StatusCode::NOT_FOUND && not_found_expires {
			return Err(Error::SessionExpired);
		}
		if !status.is_success() {
			return Err(status_error(status, response).await);
		}
		let body = match tokio::time::timeout(self.timeout, response.bytes()).await {
			Ok(bytes) => bytes?,
			Err(_) => return Err(Error::RequestTimeout(self.timeout.as_millis() as u64)),
		};
		Ok(serde_json::from_slice(&body)?)
	}
}

async fn status_error(status: StatusCode, response: reqwest::Response) -> Error {
	let text = response.text().await.unwrap_or_default();
	let body = serde_json::from_str::<ErrorBody>(&text).map(|b| b.detail).unwrap_or(text);
	Error::Status {
		status: status.as_u16(),
		body,
	}
}

#[async_trait]
impl SessionBackend for HttpBackend {
	async fn create(&self, user_id: Option<&str>) -> Result<CreateSessionResponse> {
		let url = self.config.api_url("/session/create");
		let mut request = self.client.post(&url);
		if let Some(user_id) = user_id {
			request = request.query(&[("user_id", user_id)]);
		}
		debug!(target = "marcus.session", url = %url, user_id, "creating session");
		let response = self.send(request).await?;
		self.decode(response, false).await
	}

	async fn status(&self, session_id: &str) -> Result<StatusResponse> {
		self.call(Method::GET, &format!("/session/status/{session_id}"), true).await
	}

	async fn queue(&self) -> Result<QueueResponse> {
		self.call(Method::GET, "/session/queue", false).await
	}

	async fn heartbeat(&self, session_id: &str) -> Result<HeartbeatResponse> {
		self.call(Method::POST, &format!("/session/heartbeat/{session_id}"), true).await
	}

	async fn remove(&self, session_id: &str) -> Result<RemoveResponse> {
		let path = format!("/session/remove/{session_id}");
		let response = self.send(self.client.delete(self.config.api_url(&path))).await?;
		if response.status() == StatusCode::METHOD_NOT_ALLOWED {
			debug!(target = "marcus.session", session_id, "DELETE not allowed; retrying removal with POST");
			let response = self.send(self.client.post(self.config.api_url(&path))).await?;
			return self.decode(response, true).await;
		}
		self.decode(response, true).await
	}

	fn send_unload(&self, session_id: &str) -> UnloadDelivery {
		let url = self.config.api_url(&format!("/session/remove/{session_id}"));
		if let Some(monitor) = &self.monitor {
			monitor.record_request();
		}

		if let Ok(handle) = tokio::runtime::Handle::try_current() {
			let request = self.client.post(&url).json(&serde_json::json!({}));
			handle.spawn(async move {
				if let Err(err) = request.send().await {
					debug!(target = "marcus.session", error = %err, "unload beacon failed");
				}
			});
			return UnloadDelivery::Beacon;
		}

		let timeout = self.timeout;
		let worker = std::thread::Builder::new().name("marcus-unload".to_string()).spawn(move || -> reqwest::Result<StatusCode> {
			let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
			client.post(&url).json(&serde_json::json!({})).send().map(|r| r.status())
		});
		match worker.map(|w| w.join()) {
			Ok(Ok(Ok(status))) if status.is_success() || status == StatusCode::NOT_FOUND => UnloadDelivery::Blocking,
			Ok(Ok(Ok(status))) => {
				warn!(target = "marcus.session", %status, "blocking unload rejected");
				UnloadDelivery::Undelivered
			}
			Ok(Ok(Err(err))) => {
				warn!(target = "marcus.session", error = %err, "blocking unload failed");
				UnloadDelivery::Undelivered
			}
			Ok(Err(_)) | Err(_) => {
				warn!(target = "marcus.session", "unload worker thread unavailable");
				UnloadDelivery::Undelivered
			}
		}
	}
}
