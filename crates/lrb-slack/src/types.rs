//! Slack Web API payloads (only the fields the relay reads).

use serde::Deserialize;
use serde_json::{json, Value};

use lrb_core::{
    domain::{Attachment, AuthorDisplay, InboundMessage, MessageRef, Platform, UserId},
    formatting::{self, SLACK_SECTION_TEXT_MAX},
    inbound::ReactionSnapshot,
};

/// Header block text limit.
const SLACK_HEADER_MAX: usize = 150;

#[derive(Clone, Debug, Deserialize)]
pub struct SlackFile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub url_private_download: Option<String>,
    #[serde(default)]
    pub url_private: Option<String>,
}

impl SlackFile {
    fn to_attachment(&self) -> Option<Attachment> {
        let url = self
            .url_private_download
            .as_ref()
            .or(self.url_private.as_ref())?;
        Some(Attachment {
            id: self.id.clone(),
            filename: self.name.clone().unwrap_or_else(|| self.id.clone()),
            size: self.size,
            url: url.clone(),
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SlackReaction {
    pub name: String,
    #[serde(default)]
    pub users: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SlackMessage {
    pub ts: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub files: Vec<SlackFile>,
    #[serde(default)]
    pub reactions: Vec<SlackReaction>,
}

impl SlackMessage {
    /// Ordinary posts only; joins, topic changes, edits and deletions are not relayed.
    pub fn is_relayable(&self) -> bool {
        matches!(
            self.subtype.as_deref(),
            None | Some("file_share") | Some("thread_broadcast") | Some("bot_message")
        )
    }

    pub fn is_from_bot(&self, bot_user_id: &str) -> bool {
        self.bot_id.is_some()
            || self.subtype.as_deref() == Some("bot_message")
            || self.user.as_deref() == Some(bot_user_id)
    }

    pub fn reference(&self, channel: &str) -> MessageRef {
        MessageRef::new(Platform::Slack, channel, self.ts.clone())
    }

    pub fn to_inbound(&self, channel: &str, bot_user_id: &str) -> InboundMessage {
        InboundMessage {
            source: self.reference(channel),
            author_id: UserId(self.user.clone().unwrap_or_default()),
            author_is_bot: self.is_from_bot(bot_user_id),
            text: formatting::flatten_slack_markup(&self.text),
            attachments: self.files.iter().filter_map(SlackFile::to_attachment).collect(),
        }
    }

    pub fn reaction_snapshot(&self) -> ReactionSnapshot {
        self.reactions
            .iter()
            .filter(|r| !r.users.is_empty())
            .map(|r| (r.name.clone(), r.users.iter().cloned().collect()))
            .collect()
    }
}

/// `chat.postMessage` body for a relayed Discord message.
pub fn mirror_message_body(channel: &str, text: &str, author: &AuthorDisplay) -> Value {
    json!({
        "channel": channel,
        "text": format!("{}: {}", formatting::mirror_title(author), text),
        "blocks": [
            {
                "type": "header",
                "text": {
                    "type": "plain_text",
                    "text": formatting::truncate_chars(&formatting::mirror_title(author), SLACK_HEADER_MAX),
                },
            },
            {
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": formatting::truncate_chars(text, SLACK_SECTION_TEXT_MAX),
                },
            },
            {
                "type": "context",
                "elements": [{
                    "type": "mrkdwn",
                    "text": formatting::mirror_attribution(author),
                }],
            },
        ],
        "unfurl_links": false,
    })
}

/// The `ts` of the message a completed upload was shared as, if Slack reported it.
pub fn shared_ts(complete: &Value, channel: &str) -> Option<String> {
    let shares = complete.get("files")?.get(0)?.get("shares")?;
    ["public", "private"].iter().find_map(|kind| {
        shares
            .get(kind)?
            .get(channel)?
            .get(0)?
            .get("ts")?
            .as_str()
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(v: Value) -> SlackMessage {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn plain_user_message_is_relayable_and_flattened() {
        let m = parse(json!({
            "type": "message", "ts": "1700000000.000100", "user": "U1",
            "text": "ping <@U2|bob>",
        }));
        assert!(m.is_relayable());
        let inbound = m.to_inbound("C1", "UBOT");
        assert_eq!(inbound.text, "ping @bob");
        assert!(!inbound.author_is_bot);
        assert_eq!(inbound.source, MessageRef::new(Platform::Slack, "C1", "1700000000.000100"));
    }

    #[test]
    fn bot_detection_covers_all_markers() {
        let by_bot_id = parse(json!({"ts": "1.0", "bot_id": "B1", "text": "x"}));
        let by_subtype = parse(json!({"ts": "1.0", "subtype": "bot_message", "text": "x"}));
        let by_self = parse(json!({"ts": "1.0", "user": "UBOT", "text": "x"}));
        for m in [by_bot_id, by_subtype, by_self] {
            assert!(m.is_from_bot("UBOT"));
        }
    }

    #[test]
    fn joins_and_edits_are_not_relayable() {
        for subtype in ["channel_join", "message_changed", "message_deleted"] {
            let m = parse(json!({"ts": "1.0", "subtype": subtype, "text": "x"}));
            assert!(!m.is_relayable(), "{subtype}");
        }
    }

    #[test]
    fn files_become_attachments() {
        let m = parse(json!({
            "ts": "1.0", "user": "U1", "text": "", "subtype": "file_share",
            "files": [
                {"id": "F1", "name": "a.pdf", "size": 10, "url_private_download": "https://files/a"},
                {"id": "F2", "name": "gone.txt"},
            ],
        }));
        let inbound = m.to_inbound("C1", "UBOT");
        assert_eq!(inbound.attachments.len(), 1);
        assert_eq!(inbound.attachments[0].filename, "a.pdf");
        assert_eq!(inbound.attachments[0].size, Some(10));
    }

    #[test]
    fn reactions_snapshot_by_name() {
        let m = parse(json!({
            "ts": "1.0", "text": "x",
            "reactions": [{"name": "+1", "users": ["U1", "U2"], "count": 2}],
        }));
        let snap = m.reaction_snapshot();
        assert_eq!(snap["+1"].len(), 2);
    }

    #[test]
    fn blocks_carry_header_text_and_context() {
        let author = AuthorDisplay {
            author_name: "alice".to_string(),
            channel_name: "general".to_string(),
            origin: Platform::Discord,
        };
        let body = mirror_message_body("C4", "hello", &author);
        assert_eq!(body["channel"], "C4");
        assert_eq!(body["blocks"][0]["text"]["text"], "Message from Discord #general");
        assert_eq!(body["blocks"][1]["text"]["text"], "hello");
        assert_eq!(body["blocks"][2]["elements"][0]["text"], "Sent by *alice* from Discord");
        assert_eq!(body["text"], "Message from Discord #general: hello");
    }

    #[test]
    fn shared_ts_is_read_from_public_or_private_shares() {
        let complete = json!({
            "ok": true,
            "files": [{"id": "F1", "shares": {"private": {"C4": [{"ts": "1700.000200"}]}}}],
        });
        assert_eq!(shared_ts(&complete, "C4").as_deref(), Some("1700.000200"));
        assert_eq!(shared_ts(&json!({"ok": true, "files": [{"id": "F1"}]}), "C4"), None);
    }
}
