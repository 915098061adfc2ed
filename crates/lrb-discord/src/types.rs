//! Discord REST v10 payloads (only the fields the relay reads).

use serde::Deserialize;
use serde_json::{json, Value};

use lrb_core::{
    domain::{Attachment, AuthorDisplay, InboundMessage, MessageRef, Platform, UserId},
    formatting::{self, DISCORD_EMBED_DESCRIPTION_MAX},
};

/// Embed accent colour (blue).
pub const EMBED_COLOR: u32 = 0x3498db;

#[derive(Clone, Debug, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

impl DiscordUser {
    pub fn display_name(&self) -> &str {
        self.global_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.username)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DiscordAttachment {
    pub id: String,
    pub filename: String,
    pub size: u64,
    pub url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DiscordEmoji {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl DiscordEmoji {
    /// Unicode emoji as-is, custom emoji as `name:id` (the form the reaction
    /// endpoints accept).
    pub fn notation(&self) -> Option<String> {
        match (&self.name, &self.id) {
            (Some(name), Some(id)) => Some(format!("{name}:{id}")),
            (Some(name), None) => Some(name.clone()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DiscordReaction {
    pub count: u32,
    pub emoji: DiscordEmoji,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DiscordMessage {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub content: String,
    pub author: DiscordUser,
    #[serde(default)]
    pub attachments: Vec<DiscordAttachment>,
    #[serde(default)]
    pub reactions: Vec<DiscordReaction>,
    #[serde(default)]
    pub webhook_id: Option<String>,
}

impl DiscordMessage {
    pub fn reference(&self) -> MessageRef {
        MessageRef::new(Platform::Discord, self.channel_id.clone(), self.id.clone())
    }

    pub fn to_inbound(&self) -> InboundMessage {
        InboundMessage {
            source: self.reference(),
            author_id: UserId(self.author.id.clone()),
            author_is_bot: self.author.bot || self.webhook_id.is_some(),
            text: formatting::flatten_discord_markup(&self.content),
            attachments: self
                .attachments
                .iter()
                .map(|a| Attachment {
                    id: a.id.clone(),
                    filename: a.filename.clone(),
                    size: Some(a.size),
                    url: a.url.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DiscordChannel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Body of `POST /channels/{id}/messages` for a relayed text message.
pub fn mirror_message_body(text: &str, author: &AuthorDisplay) -> Value {
    json!({
        "embeds": [{
            "title": formatting::mirror_title(author),
            "description": formatting::truncate_chars(text, DISCORD_EMBED_DESCRIPTION_MAX),
            "color": EMBED_COLOR,
            "author": { "name": author.author_name },
            "footer": { "text": formatting::mirror_attribution(author) },
        }],
        "allowed_mentions": { "parse": [] },
    })
}

/// `payload_json` part of a relayed file upload.
pub fn mirror_file_payload(filename: &str, author: &AuthorDisplay) -> Value {
    json!({
        "content": formatting::file_comment(author),
        "attachments": [{ "id": 0, "filename": filename }],
        "allowed_mentions": { "parse": [] },
    })
}
