use async_trait::async_trait;

use crate::{
    domain::{
        Attachment, AuthorDisplay, ChannelId, FilePayload, MessageRef, Platform, UserId,
    },
    Result,
};

/// Outbound side of a platform adapter.
///
/// Discord and Slack implement this over their REST APIs; the relay engine only
/// ever talks to platforms through it. Implementations must not retry on their
/// own beyond honouring an explicit rate-limit response.
#[async_trait]
pub trait PlatformPort: Send + Sync {
    fn platform(&self) -> Platform;

    async fn send_message(
        &self,
        channel: &ChannelId,
        text: &str,
        author: &AuthorDisplay,
    ) -> Result<MessageRef>;

    async fn send_file(
        &self,
        channel: &ChannelId,
        file: &FilePayload,
        author: &AuthorDisplay,
    ) -> Result<MessageRef>;

    async fn add_reaction(&self, msg: &MessageRef, emoji: &str) -> Result<()>;
    async fn remove_reaction(&self, msg: &MessageRef, emoji: &str) -> Result<()>;

    async fn fetch_display_name(&self, user: &UserId) -> Result<String>;
    async fn fetch_channel_name(&self, channel: &ChannelId) -> Result<String>;

    /// Download an attachment fully into memory.
    ///
    /// Must fail with [`crate::Error::PayloadRejected`] as soon as more than
    /// `max_bytes` have been received.
    async fn download_file(&self, attachment: &Attachment, max_bytes: u64) -> Result<Vec<u8>>;
}
