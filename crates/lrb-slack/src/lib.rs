//! Slack adapter: Web API client implementing [`PlatformPort`], plus a
//! `conversations.history` poller feeding inbound events to the relay engine.

pub mod poller;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

use lrb_core::{
    domain::{Attachment, AuthorDisplay, ChannelId, FilePayload, MessageRef, Platform, UserId},
    errors::Error,
    formatting,
    ports::PlatformPort,
    relay::files,
    Result,
};

use crate::types::SlackMessage;

pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

const MAX_RETRY_AFTER: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct SlackClient {
    token: String,
    api_base: String,
    http: reqwest::Client,
}

impl SlackClient {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self> {
        Self::with_api_base(token, timeout, DEFAULT_API_BASE)
    }

    pub fn with_api_base(
        token: impl Into<String>,
        timeout: Duration,
        api_base: &str,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("slack client build error: {e}")))?;
        Ok(Self {
            token: token.into(),
            api_base: api_base.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base)
    }

    /// Send, waiting out one 429, and unwrap Slack's `{"ok": …}` envelope.
    async fn call(
        &self,
        method: &str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<Value> {
        let mut resp = build()
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Error::External(format!("slack {method} request error: {e}")))?;

        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            let wait = retry_after(&resp).unwrap_or(Duration::from_secs(1));
            if wait > MAX_RETRY_AFTER {
                return Err(Error::External(format!(
                    "slack {method} rate limited for {wait:?}"
                )));
            }
            tracing::warn!(method, ?wait, "slack rate limited; waiting");
            tokio::time::sleep(wait).await;
            resp = build()
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(|e| Error::External(format!("slack {method} request error: {e}")))?;
        }

        if !resp.status().is_success() {
            return Err(Error::External(format!(
                "slack {method} failed: {}",
                resp.status()
            )));
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("slack {method} json error: {e}")))?;
        check_ok(method, v)
    }

    async fn post(&self, method: &str, body: &Value) -> Result<Value> {
        let url = self.method_url(method);
        self.call(method, || self.http.post(&url).json(body)).await
    }

    async fn get(&self, method: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = self.method_url(method);
        self.call(method, || self.http.get(&url).query(query)).await
    }

    /// The bot's own user id.
    pub async fn auth_test(&self) -> Result<String> {
        let v = self.post("auth.test", &json!({})).await?;
        str_field(&v, &["user_id"])
            .map(str::to_string)
            .ok_or_else(|| Error::External("slack auth.test: missing user_id".to_string()))
    }

    /// Most recent messages of `channel`, newest first.
    pub async fn history(&self, channel: &ChannelId, limit: u8) -> Result<Vec<SlackMessage>> {
        let limit = limit.to_string();
        let v = self
            .get(
                "conversations.history",
                &[("channel", channel.0.as_str()), ("limit", limit.as_str())],
            )
            .await?;
        let messages = v.get("messages").cloned().unwrap_or(Value::Array(Vec::new()));
        Ok(serde_json::from_value(messages)?)
    }

    async fn reaction(&self, method: &str, msg: &MessageRef, name: &str, benign: &str) -> Result<()> {
        let body = json!({
            "channel": msg.channel_id.0,
            "timestamp": msg.message_id.0,
            "name": name.trim_matches(':'),
        });
        match self.post(method, &body).await {
            Err(Error::External(e)) if e.ends_with(benign) => {
                tracing::debug!(method, %msg, "reaction already in requested state");
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }
}

fn check_ok(method: &str, v: Value) -> Result<Value> {
    if v.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(v);
    }
    let err = v
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error");
    Err(Error::External(format!("slack {method}: {err}")))
}

fn str_field<'a>(v: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(v, |cur, key| cur.get(key))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    let secs: u64 = resp
        .headers()
        .get("retry-after")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    Some(Duration::from_secs(secs))
}

#[async_trait]
impl PlatformPort for SlackClient {
    fn platform(&self) -> Platform {
        Platform::Slack
    }

    async fn send_message(
        &self,
        channel: &ChannelId,
        text: &str,
        author: &AuthorDisplay,
    ) -> Result<MessageRef> {
        let body = types::mirror_message_body(&channel.0, text, author);
        let v = self.post("chat.postMessage", &body).await?;
        let ts = str_field(&v, &["ts"])
            .ok_or_else(|| Error::External("slack chat.postMessage: missing ts".to_string()))?;
        let posted_in = str_field(&v, &["channel"]).unwrap_or(&channel.0);
        Ok(MessageRef::new(Platform::Slack, posted_in, ts))
    }

    async fn send_file(
        &self,
        channel: &ChannelId,
        file: &FilePayload,
        author: &AuthorDisplay,
    ) -> Result<MessageRef> {
        let length = file.bytes.len().to_string();
        let ticket = self
            .get(
                "files.getUploadURLExternal",
                &[("filename", file.filename.as_str()), ("length", length.as_str())],
            )
            .await?;
        let (Some(upload_url), Some(file_id)) = (
            str_field(&ticket, &["upload_url"]),
            str_field(&ticket, &["file_id"]),
        ) else {
            return Err(Error::External(
                "slack files.getUploadURLExternal: missing upload_url/file_id".to_string(),
            ));
        };

        let resp = self
            .http
            .post(upload_url)
            .body(file.bytes.clone())
            .send()
            .await
            .map_err(|e| Error::External(format!("slack file upload error: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::External(format!(
                "slack file upload failed: {}",
                resp.status()
            )));
        }

        let complete = self
            .post(
                "files.completeUploadExternal",
                &json!({
                    "files": [{ "id": file_id, "title": file.filename }],
                    "channel_id": channel.0,
                    "initial_comment": formatting::file_comment(author),
                }),
            )
            .await?;

        // Slack shares the file asynchronously; without a share ts, the file id
        // stands in as the mirror id.
        let id = types::shared_ts(&complete, &channel.0).unwrap_or_else(|| {
            tracing::debug!(file_id, "upload share ts not reported yet");
            file_id.to_string()
        });
        Ok(MessageRef::new(Platform::Slack, channel.0.clone(), id))
    }

    async fn add_reaction(&self, msg: &MessageRef, emoji: &str) -> Result<()> {
        self.reaction("reactions.add", msg, emoji, "already_reacted")
            .await
    }

    async fn remove_reaction(&self, msg: &MessageRef, emoji: &str) -> Result<()> {
        self.reaction("reactions.remove", msg, emoji, "no_reaction")
            .await
    }

    async fn fetch_display_name(&self, user: &UserId) -> Result<String> {
        let v = self.get("users.info", &[("user", user.0.as_str())]).await?;
        str_field(&v, &["user", "real_name"])
            .or_else(|| str_field(&v, &["user", "profile", "display_name"]))
            .or_else(|| str_field(&v, &["user", "name"]))
            .map(str::to_string)
            .ok_or_else(|| Error::External(format!("slack users.info: no name for {user}")))
    }

    async fn fetch_channel_name(&self, channel: &ChannelId) -> Result<String> {
        let v = self
            .get("conversations.info", &[("channel", channel.0.as_str())])
            .await?;
        str_field(&v, &["channel", "name"])
            .map(str::to_string)
            .ok_or_else(|| Error::External(format!("slack conversations.info: no name for {channel}")))
    }

    async fn download_file(&self, attachment: &Attachment, max_bytes: u64) -> Result<Vec<u8>> {
        let mut resp = self
            .http
            .get(&attachment.url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Error::External(format!("slack download error: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::External(format!(
                "download of {} failed: {}",
                attachment.filename,
                resp.status()
            )));
        }

        let mut out = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| Error::External(format!("slack download error: {e}")))?
        {
            files::append_capped(&mut out, &chunk, max_bytes, &attachment.filename)?;
        }
        Ok(out)
    }
}
