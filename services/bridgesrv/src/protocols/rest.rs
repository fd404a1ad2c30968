//! REST bridge: channels mirrored over HTTP
//!
//! Reads GET the remote channel path and parse the body into the declared
//! channel type; writes POST `{"value": ...}` with the consumed staged
//! value. The executor records the outcome of the last request per path so
//! callers can probe remote availability without issuing extra requests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tracing::debug;

use edge_core::ChannelValue;
use errors::{EdgeError, EdgeResult};

use crate::core::bridge::ProtocolExecutor;
use crate::core::convert;
use crate::core::task::{Task, TaskAddress};

/// Remote channel path: component id + channel id on the peer edge
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RestAddress {
    pub component_id: String,
    pub channel_id: String,
}

impl RestAddress {
    pub fn new(component_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            component_id: component_id.into(),
            channel_id: channel_id.into(),
        }
    }

    /// Path relative to the peer's channel API root
    pub fn path(&self) -> String {
        format!("{}/{}", self.component_id, self.channel_id)
    }
}

/// Raw HTTP operations against the peer. Split out so tests can stand in
/// a scripted client for the real one.
#[async_trait]
pub trait RestClient: Send + Sync {
    async fn get(&self, path: &str) -> EdgeResult<String>;
    async fn post(&self, path: &str, body: &str) -> EdgeResult<()>;
}

/// reqwest-backed client against a channel API base URL
pub struct HttpRestClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRestClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> EdgeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EdgeError::transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl RestClient for HttpRestClient {
    async fn get(&self, path: &str) -> EdgeResult<String> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EdgeError::transport(format!("GET {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(EdgeError::transport(format!("GET {url}: HTTP {status}")));
        }
        response
            .text()
            .await
            .map_err(|e| EdgeError::transport(format!("GET {url}: {e}")))
    }

    async fn post(&self, path: &str, body: &str) -> EdgeResult<()> {
        let url = self.url(path);
        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| EdgeError::transport(format!("POST {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(EdgeError::transport(format!("POST {url}: HTTP {status}")));
        }
        Ok(())
    }
}

/// Outcome of the most recent request per remote path
#[derive(Debug, Clone)]
struct LastResponse {
    success: bool,
    detail: String,
}

pub struct RestExecutor {
    client: Box<dyn RestClient>,
    responses: Mutex<HashMap<String, LastResponse>>,
}

impl RestExecutor {
    pub fn new(client: Box<dyn RestClient>) -> Self {
        Self {
            client,
            responses: Mutex::new(HashMap::new()),
        }
    }

    /// Did the last request against this remote path succeed? `None` when
    /// the path has not been touched yet.
    pub fn was_success(&self, path: &str) -> Option<bool> {
        self.responses.lock().get(path).map(|r| r.success)
    }

    /// Detail of the last request against this remote path: the response
    /// body on success, the error text on failure.
    pub fn last_response(&self, path: &str) -> Option<String> {
        self.responses.lock().get(path).map(|r| r.detail.clone())
    }

    fn record(&self, path: &str, success: bool, detail: impl Into<String>) {
        self.responses.lock().insert(
            path.to_string(),
            LastResponse {
                success,
                detail: detail.into(),
            },
        );
    }

    fn address<'a>(&self, task: &'a Task) -> EdgeResult<&'a RestAddress> {
        match &task.address {
            TaskAddress::Rest(addr) => Ok(addr),
            other => Err(EdgeError::addressing(format!(
                "REST executor got a non-REST task address: {other:?}"
            ))),
        }
    }
}

#[async_trait]
impl ProtocolExecutor for RestExecutor {
    fn protocol(&self) -> &'static str {
        "rest"
    }

    async fn execute_read(&self, task: &mut Task) -> EdgeResult<Option<ChannelValue>> {
        let path = self.address(task)?.path();
        let body = match self.client.get(&path).await {
            Ok(body) => body,
            Err(e) => {
                self.record(&path, false, e.to_string());
                return Err(e);
            },
        };
        match convert::parse_text(&body, task.channel.channel_type()) {
            Ok(value) => {
                self.record(&path, true, body);
                debug!(%path, %value, "REST read");
                Ok(Some(value))
            },
            Err(e) => {
                self.record(&path, false, e.to_string());
                Err(e)
            },
        }
    }

    async fn execute_write(&self, task: &mut Task, value: ChannelValue) -> EdgeResult<()> {
        let path = self.address(task)?.path();
        let body = json!({ "value": convert::render_text(&value) }).to_string();
        match self.client.post(&path, &body).await {
            Ok(()) => {
                self.record(&path, true, body);
                Ok(())
            },
            Err(e) => {
                self.record(&path, false, e.to_string());
                Err(e)
            },
        }
    }
}
