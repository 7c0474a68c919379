use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{Result, SentrycamError};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// One pending operator command fetched from the pull channel
#[derive(Debug, Clone)]
pub struct RemoteCommand {
    /// Monotonic identifier assigned by the remote service
    pub id: i64,
    /// Command text, if the update carried any
    pub text: Option<String>,
}

/// Remote push/pull capability: photo and document delivery plus
/// cursor-based command polling.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn send_photo(
        &self,
        token: &str,
        chat_id: &str,
        payload: Vec<u8>,
        filename: &str,
        caption: &str,
    ) -> Result<()>;

    async fn send_document(
        &self,
        token: &str,
        chat_id: &str,
        payload: Vec<u8>,
        filename: &str,
    ) -> Result<()>;

    async fn send_message(&self, token: &str, chat_id: &str, text: &str) -> Result<()>;

    /// Fetch commands with ids >= `offset`, long-polling up to `timeout_secs`
    async fn get_updates(
        &self,
        token: &str,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<RemoteCommand>>;
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    text: Option<String>,
}

/// Telegram Bot API transport.
///
/// Field names (`chat_id`, `caption`, `photo`, `document`, `text`) are the
/// delivery contract with the remote service and must not change.
pub struct TelegramTransport {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramTransport {
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_API_BASE)
    }

    /// Point the transport at a different API base, e.g. a local test server
    pub fn with_base_url<S: Into<String>>(base_url: S) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn method_url(&self, token: &str, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, token, method)
    }

    async fn check_status(&self, response: reqwest::Response, method: &str) -> Result<()> {
        let http_status = response.status();
        if !http_status.is_success() {
            return Err(SentrycamError::transport(format!(
                "{} returned HTTP {}",
                method, http_status
            )));
        }

        let status: ApiStatus = response.json().await?;
        if !status.ok {
            return Err(SentrycamError::transport(format!(
                "{} rejected: {}",
                method,
                status.description.unwrap_or_else(|| "no description".to_string())
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl RemoteTransport for TelegramTransport {
    async fn send_photo(
        &self,
        token: &str,
        chat_id: &str,
        payload: Vec<u8>,
        filename: &str,
        caption: &str,
    ) -> Result<()> {
        debug!("Uploading photo {} ({} bytes)", filename, payload.len());

        let part = Part::bytes(payload)
            .file_name(filename.to_string())
            .mime_str("image/jpeg")?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("photo", part);

        let response = self
            .client
            .post(self.method_url(token, "sendPhoto"))
            .multipart(form)
            .send()
            .await?;

        self.check_status(response, "sendPhoto").await
    }

    async fn send_document(
        &self,
        token: &str,
        chat_id: &str,
        payload: Vec<u8>,
        filename: &str,
    ) -> Result<()> {
        debug!("Uploading document {} ({} bytes)", filename, payload.len());

        let part = Part::bytes(payload)
            .file_name(filename.to_string())
            .mime_str("application/zip")?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", part);

        let response = self
            .client
            .post(self.method_url(token, "sendDocument"))
            .multipart(form)
            .send()
            .await?;

        self.check_status(response, "sendDocument").await
    }

    async fn send_message(&self, token: &str, chat_id: &str, text: &str) -> Result<()> {
        let response = self
            .client
            .post(self.method_url(token, "sendMessage"))
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await?;

        self.check_status(response, "sendMessage").await
    }

    async fn get_updates(
        &self,
        token: &str,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<RemoteCommand>> {
        trace!("Polling updates from offset {}", offset);

        let response = self
            .client
            .get(self.method_url(token, "getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", timeout_secs.to_string()),
            ])
            // Leave headroom over the server-side long-poll window
            .timeout(Duration::from_secs(timeout_secs + 10))
            .send()
            .await?;

        let http_status = response.status();
        if !http_status.is_success() {
            return Err(SentrycamError::transport(format!(
                "getUpdates returned HTTP {}",
                http_status
            )));
        }

        let updates: UpdatesResponse = response.json().await?;
        if !updates.ok {
            return Err(SentrycamError::transport("getUpdates rejected"));
        }

        Ok(updates
            .result
            .into_iter()
            .map(|u| RemoteCommand {
                id: u.update_id,
                text: u.message.and_then(|m| m.text),
            })
            .collect())
    }
}
