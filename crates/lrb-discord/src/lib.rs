//! Discord adapter: REST v10 client implementing [`PlatformPort`], plus a
//! channel poller feeding inbound events to the relay engine.

pub mod poller;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;

use lrb_core::{
    domain::{Attachment, AuthorDisplay, ChannelId, FilePayload, MessageRef, Platform, UserId},
    errors::Error,
    ports::PlatformPort,
    relay::files,
    Result,
};

use crate::types::{DiscordChannel, DiscordMessage, DiscordUser};

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Longest rate-limit wait we are willing to honour inline.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct DiscordClient {
    token: String,
    api_base: Url,
    http: reqwest::Client,
}

impl DiscordClient {
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
            .user_agent(concat!("DiscordBot (lrb, ", env!("CARGO_PKG_VERSION"), ")"))
            .build()
            .map_err(|e| Error::External(format!("discord client build error: {e}")))?;
        let api_base = Url::parse(api_base)
            .map_err(|e| Error::Config(format!("invalid discord api base {api_base}: {e}")))?;
        Ok(Self {
            token: token.into(),
            api_base,
            http,
        })
    }

    /// `api_base` + percent-encoded path segments.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config("discord api base cannot be a base url".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
    }

    /// Send a request built by `build`, waiting out one 429 if Discord asks us to.
    async fn send(
        &self,
        what: &str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let mut resp = build()
            .send()
            .await
            .map_err(|e| Error::External(format!("discord {what} request error: {e}")))?;

        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            let wait = retry_after(&resp).unwrap_or(Duration::from_secs(1));
            if wait > MAX_RETRY_AFTER {
                return Err(Error::External(format!(
                    "discord {what} rate limited for {wait:?}"
                )));
            }
            tracing::warn!(what, ?wait, "discord rate limited; waiting");
            tokio::time::sleep(wait).await;
            resp = build()
                .send()
                .await
                .map_err(|e| Error::External(format!("discord {what} request error: {e}")))?;
        }

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "discord {what} failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        what: &str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<T> {
        let resp = self.send(what, build).await?;
        resp.json::<T>()
            .await
            .map_err(|e| Error::External(format!("discord {what} json error: {e}")))
    }

    pub async fn current_user(&self) -> Result<DiscordUser> {
        let url = self.endpoint(&["users", "@me"])?;
        self.send_json("users/@me", || self.request(Method::GET, url.clone()))
            .await
    }

    pub async fn channel_messages(
        &self,
        channel: &ChannelId,
        limit: u8,
    ) -> Result<Vec<DiscordMessage>> {
        let mut url = self.endpoint(&["channels", channel.0.as_str(), "messages"])?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        self.send_json("channel messages", || self.request(Method::GET, url.clone()))
            .await
    }

    /// Users who reacted to `msg` with `emoji` (first 100).
    pub async fn reactors(&self, msg: &MessageRef, emoji: &str) -> Result<Vec<DiscordUser>> {
        let mut url = self.endpoint(&[
            "channels",
            msg.channel_id.0.as_str(),
            "messages",
            msg.message_id.0.as_str(),
            "reactions",
            emoji,
        ])?;
        url.query_pairs_mut().append_pair("limit", "100");
        self.send_json("reactors", || self.request(Method::GET, url.clone()))
            .await
    }

    fn own_reaction_url(&self, msg: &MessageRef, emoji: &str) -> Result<Url> {
        self.endpoint(&[
            "channels",
            msg.channel_id.0.as_str(),
            "messages",
            msg.message_id.0.as_str(),
            "reactions",
            emoji,
            "@me",
        ])
    }

    fn sent_ref(&self, channel: &ChannelId, sent: DiscordMessage) -> MessageRef {
        let channel_id = if sent.channel_id.is_empty() {
            channel.0.clone()
        } else {
            sent.channel_id
        };
        MessageRef::new(Platform::Discord, channel_id, sent.id)
    }
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    let secs: f64 = resp
        .headers()
        .get("retry-after")?
        .to_str()
        .ok()?
        .parse()
        .ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

#[async_trait]
impl PlatformPort for DiscordClient {
    fn platform(&self) -> Platform {
        Platform::Discord
    }

    async fn send_message(
        &self,
        channel: &ChannelId,
        text: &str,
        author: &AuthorDisplay,
    ) -> Result<MessageRef> {
        let url = self.endpoint(&["channels", channel.0.as_str(), "messages"])?;
        let body = types::mirror_message_body(text, author);
        let sent: DiscordMessage = self
            .send_json("create message", || {
                self.request(Method::POST, url.clone()).json(&body)
            })
            .await?;
        Ok(self.sent_ref(channel, sent))
    }

    async fn send_file(
        &self,
        channel: &ChannelId,
        file: &FilePayload,
        author: &AuthorDisplay,
    ) -> Result<MessageRef> {
        let url = self.endpoint(&["channels", channel.0.as_str(), "messages"])?;
        let payload = types::mirror_file_payload(&file.filename, author).to_string();
        let build = || {
            let form = reqwest::multipart::Form::new()
                .text("payload_json", payload.clone())
                .part(
                    "files[0]",
                    reqwest::multipart::Part::bytes(file.bytes.clone())
                        .file_name(file.filename.clone()),
                );
            self.request(Method::POST, url.clone()).multipart(form)
        };
        let sent: DiscordMessage = self.send_json("upload file", build).await?;
        Ok(self.sent_ref(channel, sent))
    }

    async fn add_reaction(&self, msg: &MessageRef, emoji: &str) -> Result<()> {
        let url = self.own_reaction_url(msg, emoji)?;
        self.send("add reaction", || {
            self.request(Method::PUT, url.clone())
                .header(reqwest::header::CONTENT_LENGTH, "0")
        })
        .await?;
        Ok(())
    }

    async fn remove_reaction(&self, msg: &MessageRef, emoji: &str) -> Result<()> {
        let url = self.own_reaction_url(msg, emoji)?;
        self.send("remove reaction", || self.request(Method::DELETE, url.clone()))
            .await?;
        Ok(())
    }

    async fn fetch_display_name(&self, user: &UserId) -> Result<String> {
        let url = self.endpoint(&["users", user.0.as_str()])?;
        let u: DiscordUser = self
            .send_json("get user", || self.request(Method::GET, url.clone()))
            .await?;
        Ok(u.display_name().to_string())
    }

    async fn fetch_channel_name(&self, channel: &ChannelId) -> Result<String> {
        let url = self.endpoint(&["channels", channel.0.as_str()])?;
        let c: DiscordChannel = self
            .send_json("get channel", || self.request(Method::GET, url.clone()))
            .await?;
        Ok(c.name.unwrap_or(c.id))
    }

    async fn download_file(&self, attachment: &Attachment, max_bytes: u64) -> Result<Vec<u8>> {
        // CDN urls are signed; no bot token.
        let resp = self
            .http
            .get(&attachment.url)
            .send()
            .await
            .map_err(|e| Error::External(format!("discord download error: {e}")))?;
        read_capped(resp, &attachment.filename, max_bytes).await
    }
}

/// Read a download body, giving up as soon as it exceeds `max_bytes`.
async fn read_capped(
    mut resp: reqwest::Response,
    filename: &str,
    max_bytes: u64,
) -> Result<Vec<u8>> {
    if !resp.status().is_success() {
        return Err(Error::External(format!(
            "download of {filename} failed: {}",
            resp.status()
        )));
    }
    if resp.content_length().is_some_and(|len| len > max_bytes) {
        return Err(Error::PayloadRejected(format!(
            "{filename}: declared length exceeds {max_bytes} bytes"
        )));
    }

    let mut out = Vec::new();
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| Error::External(format!("download of {filename} failed: {e}")))?
    {
        files::append_capped(&mut out, &chunk, max_bytes, filename)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> DiscordClient {
        DiscordClient::new("token", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn endpoint_percent_encodes_emoji() {
        let msg = MessageRef::new(Platform::Discord, "10", "20");
        let url = client().own_reaction_url(&msg, "👍").unwrap();
        assert_eq!(
            url.as_str(),
            "https://discord.com/api/v10/channels/10/messages/20/reactions/%F0%9F%91%8D/@me"
        );
    }

    #[test]
    fn endpoint_keeps_custom_emoji_separator() {
        let msg = MessageRef::new(Platform::Discord, "10", "20");
        let url = client().own_reaction_url(&msg, "party:123").unwrap();
        assert!(url.as_str().ends_with("/reactions/party:123/@me"), "{url}");
    }

    #[test]
    fn messages_endpoint_with_limit() {
        let c = client();
        let mut url = c.endpoint(&["channels", "10", "messages"]).unwrap();
        url.query_pairs_mut().append_pair("limit", "50");
        assert_eq!(
            url.as_str(),
            "https://discord.com/api/v10/channels/10/messages?limit=50"
        );
    }

    #[test]
    fn sent_ref_falls_back_to_target_channel() {
        let sent: DiscordMessage = serde_json::from_value(serde_json::json!({
            "id": "900",
            "channel_id": "",
            "author": { "id": "1", "username": "relay", "bot": true },
        }))
        .unwrap();
        let r = client().sent_ref(&ChannelId::from("77"), sent);
        assert_eq!(r, MessageRef::new(Platform::Discord, "77", "900"));
    }
}
