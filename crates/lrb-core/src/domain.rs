use std::fmt;

/// One of the two bridged chat platforms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Platform {
    Discord,
    Slack,
}

impl Platform {
    /// The platform on the other side of the bridge.
    pub fn other(self) -> Self {
        match self {
            Platform::Discord => Platform::Slack,
            Platform::Slack => Platform::Discord,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Discord => "discord",
            Platform::Slack => "slack",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Platform::Discord => "Discord",
            Platform::Slack => "Slack",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform channel id (Discord snowflake or Slack `C…` id).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub String);

/// Platform user id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

/// Platform message id (Discord snowflake or Slack `ts`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub String);

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stable reference to a message on either platform.
///
/// Reactions need the channel as well as the id on both platforms, so the
/// channel travels with every reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub platform: Platform,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

impl MessageRef {
    pub fn new(
        platform: Platform,
        channel_id: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            channel_id: ChannelId(channel_id.into()),
            message_id: MessageId(message_id.into()),
        }
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.platform, self.channel_id, self.message_id)
    }
}

/// File attached to an inbound message (not yet downloaded).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    /// Size reported by the platform, if any.
    pub size: Option<u64>,
    pub url: String,
}

/// A downloaded file ready for upload.
#[derive(Clone, Debug)]
pub struct FilePayload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Who and where a relayed message came from, as rendered on the destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorDisplay {
    pub author_name: String,
    pub channel_name: String,
    pub origin: Platform,
}

/// A message observed on one of the platforms.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub source: MessageRef,
    pub author_id: UserId,
    pub author_is_bot: bool,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReactionAction {
    Add,
    Remove,
}

impl fmt::Display for ReactionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReactionAction::Add => f.write_str("add"),
            ReactionAction::Remove => f.write_str("remove"),
        }
    }
}

/// A reaction added to or removed from a message.
#[derive(Clone, Debug)]
pub struct ReactionEvent {
    pub message: MessageRef,
    /// Platform-native notation (Discord unicode, Slack short name).
    pub emoji: String,
    pub actor_id: UserId,
    pub actor_is_bot: bool,
    pub action: ReactionAction,
}

/// Everything a platform listener can hand to the relay engine.
#[derive(Clone, Debug)]
pub enum InboundEvent {
    Message(InboundMessage),
    Reaction(ReactionEvent),
}

impl InboundEvent {
    pub fn platform(&self) -> Platform {
        match self {
            InboundEvent::Message(m) => m.source.platform,
            InboundEvent::Reaction(r) => r.message.platform,
        }
    }
}
