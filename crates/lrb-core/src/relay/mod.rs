//! Relay engine: filter → correlate → dispatch, for messages and reactions.
//!
//! Per inbound message:
//!
//! ```text
//! RECEIVED -> FILTERED_OUT
//! RECEIVED -> ACCEPTED -> DISPATCHED -> CORRELATED
//! RECEIVED -> ACCEPTED -> DISPATCH_FAILED
//! ```
//!
//! Nothing here is retried, and no error escapes an event: every outcome is a
//! [`RelayOutcome`] value, logged and counted.

pub mod files;
pub mod filter;
pub mod log;

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::mpsc;

use crate::{
    config::Config,
    correlation::{CorrelationCache, RelayHandle},
    domain::{
        Attachment, AuthorDisplay, ChannelId, FilePayload, InboundEvent, InboundMessage,
        MessageRef, Platform, ReactionAction, ReactionEvent,
    },
    emoji,
    errors::Error,
    ports::PlatformPort,
    status::RelayStats,
    Result,
};

use self::{
    files::FileLimits,
    filter::{FilterReason, RelayRoutes},
    log::{RelayLog, RelayLogEntry},
};

/// Why a relay action did not complete.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Network, timeout or platform API failure.
    #[error("dispatch failed: {0}")]
    Transient(String),

    /// File too large or of a disallowed type.
    #[error("payload rejected: {0}")]
    PayloadRejected(String),

    /// No live correlation for the referenced message.
    #[error("no correlation for {0}")]
    CorrelationMiss(MessageRef),

    /// Emoji has no equivalent on the other platform.
    #[error("no emoji mapping for {0:?}")]
    MappingMiss(String),
}

impl RelayError {
    fn from_port(op: &str, err: Error) -> Self {
        match err {
            Error::PayloadRejected(reason) => RelayError::PayloadRejected(reason),
            other => RelayError::Transient(format!("{op}: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    FilteredOut(FilterReason),
    Correlated {
        source: MessageRef,
        mirror: MessageRef,
        files_sent: usize,
        files_rejected: usize,
    },
    DispatchFailed {
        source: MessageRef,
        error: RelayError,
    },
    ReactionSynced {
        target: MessageRef,
        emoji: String,
        action: ReactionAction,
    },
    ReactionDropped(RelayError),
}

/// Static relay settings, derived from [`Config`] at startup.
#[derive(Clone, Debug)]
pub struct RelaySettings {
    pub routes: RelayRoutes,
    pub file_limits: FileLimits,
    /// Applied to every outbound platform call separately.
    pub call_timeout: Duration,
}

impl RelaySettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            routes: cfg.routes.clone(),
            file_limits: cfg.file_limits.clone(),
            call_timeout: cfg.call_timeout,
        }
    }
}

pub struct RelayEngine {
    settings: RelaySettings,
    cache: Arc<CorrelationCache>,
    log: Arc<RelayLog>,
    stats: Arc<RelayStats>,
    discord: Arc<dyn PlatformPort>,
    slack: Arc<dyn PlatformPort>,
}

impl RelayEngine {
    pub fn new(
        settings: RelaySettings,
        cache: Arc<CorrelationCache>,
        log: Arc<RelayLog>,
        discord: Arc<dyn PlatformPort>,
        slack: Arc<dyn PlatformPort>,
    ) -> Self {
        debug_assert_eq!(discord.platform(), Platform::Discord);
        debug_assert_eq!(slack.platform(), Platform::Slack);
        Self {
            settings,
            cache,
            log,
            stats: Arc::new(RelayStats::default()),
            discord,
            slack,
        }
    }

    pub fn cache(&self) -> &Arc<CorrelationCache> {
        &self.cache
    }

    pub fn log(&self) -> &Arc<RelayLog> {
        &self.log
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    fn port(&self, platform: Platform) -> &Arc<dyn PlatformPort> {
        match platform {
            Platform::Discord => &self.discord,
            Platform::Slack => &self.slack,
        }
    }

    /// Consume one platform's event stream until the sender side is dropped.
    ///
    /// Events are handled one at a time, each in its own task so that a panic
    /// inside one event cannot take the listener down.
    pub async fn run_listener(self: Arc<Self>, platform: Platform, mut rx: mpsc::Receiver<InboundEvent>) {
        tracing::info!(%platform, "relay listener started");
        while let Some(event) = rx.recv().await {
            let engine = self.clone();
            let handled = tokio::spawn(async move { engine.handle_event(event).await }).await;
            if let Err(e) = handled {
                tracing::error!(%platform, error = %e, "relay event handler panicked");
            }
        }
        tracing::info!(%platform, "relay listener stopped");
    }

    pub async fn handle_event(&self, event: InboundEvent) -> RelayOutcome {
        let outcome = match event {
            InboundEvent::Message(msg) => self.handle_message(msg).await,
            InboundEvent::Reaction(ev) => self.handle_reaction(ev).await,
        };
        self.stats.observe(&outcome);
        outcome
    }

    pub async fn handle_message(&self, msg: InboundMessage) -> RelayOutcome {
        let handle = match filter::admit_message(&self.settings.routes, &self.cache, &msg) {
            Ok(handle) => handle,
            Err(reason) => {
                tracing::debug!(source = %msg.source, %reason, "message filtered out");
                return RelayOutcome::FilteredOut(reason);
            }
        };
        let Some(route) = self.settings.routes.route(msg.source.platform) else {
            return RelayOutcome::FilteredOut(FilterReason::ChannelNotAllowed);
        };
        let target = route.target.clone();
        let source = msg.source.clone();

        let author = self.resolve_author(&msg).await;
        tracing::info!(
            %source,
            author = %author.author_name,
            channel = %author.channel_name,
            attachments = msg.attachments.len(),
            "relaying message"
        );

        let mut mirror: Option<MessageRef> = None;
        let mut first_error: Option<RelayError> = None;
        let mut files_sent = 0usize;
        let mut files_rejected = 0usize;

        if !msg.text.trim().is_empty() {
            let dst = self.port(source.platform.other());
            match self
                .call("send_message", dst.send_message(&target, &msg.text, &author))
                .await
            {
                Ok(sent) => {
                    tracing::info!(%source, mirror = %sent, "message relayed");
                    self.log.record(RelayLogEntry::message_relayed(&source, &sent));
                    self.correlate(&handle, &mut mirror, sent);
                }
                Err(e) => {
                    self.record_failure(&source, &e);
                    first_error.get_or_insert(e);
                }
            }
        }

        for attachment in &msg.attachments {
            match self.relay_file(&source, &target, attachment, &author).await {
                Ok(sent) => {
                    files_sent += 1;
                    tracing::info!(%source, mirror = %sent, file = %attachment.filename, "file relayed");
                    self.log.record(RelayLogEntry::file_relayed(
                        &source,
                        &sent,
                        &attachment.filename,
                    ));
                    self.correlate(&handle, &mut mirror, sent);
                }
                Err(e) => {
                    if matches!(e, RelayError::PayloadRejected(_)) {
                        files_rejected += 1;
                    }
                    self.record_failure(&source, &e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match mirror {
            Some(mirror) => RelayOutcome::Correlated {
                source,
                mirror,
                files_sent,
                files_rejected,
            },
            None => {
                let error = first_error
                    .unwrap_or_else(|| RelayError::Transient("nothing was sent".to_string()));
                tracing::warn!(%source, %error, "message not relayed");
                RelayOutcome::DispatchFailed { source, error }
            }
        }
    }

    pub async fn handle_reaction(&self, ev: ReactionEvent) -> RelayOutcome {
        if let Err(reason) = filter::admit_reaction(&self.settings.routes, &ev) {
            tracing::debug!(message = %ev.message, %reason, "reaction filtered out");
            return RelayOutcome::FilteredOut(reason);
        }

        let Some(target) = self.cache.lookup_counterpart(&ev.message) else {
            tracing::info!(message = %ev.message, emoji = %ev.emoji, "reaction on uncorrelated message dropped");
            return RelayOutcome::ReactionDropped(RelayError::CorrelationMiss(ev.message));
        };

        let Some(mapped) = emoji::to_other_platform(ev.message.platform, &ev.emoji) else {
            tracing::debug!(emoji = %ev.emoji, "no cross-platform emoji; reaction skipped");
            return RelayOutcome::ReactionDropped(RelayError::MappingMiss(ev.emoji));
        };

        let port = self.port(target.platform);
        let res = match ev.action {
            ReactionAction::Add => {
                self.call("add_reaction", port.add_reaction(&target, mapped))
                    .await
            }
            ReactionAction::Remove => {
                self.call("remove_reaction", port.remove_reaction(&target, mapped))
                    .await
            }
        };

        match res {
            Ok(()) => {
                tracing::info!(from = %ev.message, %target, emoji = mapped, action = %ev.action, "reaction synced");
                self.log.record(RelayLogEntry::reaction_synced(
                    &ev.message,
                    &target,
                    mapped,
                    ev.action,
                ));
                RelayOutcome::ReactionSynced {
                    target,
                    emoji: mapped.to_string(),
                    action: ev.action,
                }
            }
            Err(error) => {
                tracing::error!(from = %ev.message, %target, %error, "reaction sync failed");
                self.log.record(RelayLogEntry::reaction_failed(
                    &ev.message,
                    &target,
                    &error.to_string(),
                ));
                RelayOutcome::DispatchFailed {
                    source: ev.message,
                    error,
                }
            }
        }
    }

    /// Attach the first successful send as the mirror; later parts only log.
    fn correlate(&self, handle: &RelayHandle, mirror: &mut Option<MessageRef>, sent: MessageRef) {
        if mirror.is_some() {
            return;
        }
        self.cache.attach_mirror_reference(handle, sent.clone());
        *mirror = Some(sent);
    }

    async fn relay_file(
        &self,
        source: &MessageRef,
        target: &ChannelId,
        attachment: &Attachment,
        author: &AuthorDisplay,
    ) -> std::result::Result<MessageRef, RelayError> {
        let limits = &self.settings.file_limits;
        limits
            .check_declared(attachment)
            .map_err(RelayError::PayloadRejected)?;

        let src = self.port(source.platform);
        let bytes = self
            .call("download_file", src.download_file(attachment, limits.max_bytes))
            .await?;
        limits
            .check_downloaded(&attachment.filename, &bytes)
            .map_err(RelayError::PayloadRejected)?;

        let payload = FilePayload {
            filename: attachment.filename.clone(),
            bytes,
        };
        let dst = self.port(source.platform.other());
        self.call("send_file", dst.send_file(target, &payload, author))
            .await
    }

    async fn resolve_author(&self, msg: &InboundMessage) -> AuthorDisplay {
        let src = self.port(msg.source.platform);
        let (name, channel) = tokio::join!(
            self.call("fetch_display_name", src.fetch_display_name(&msg.author_id)),
            self.call(
                "fetch_channel_name",
                src.fetch_channel_name(&msg.source.channel_id)
            ),
        );

        let author_name = name.unwrap_or_else(|e| {
            tracing::debug!(user = %msg.author_id, error = %e, "display name lookup failed");
            msg.author_id.0.clone()
        });
        let channel_name = channel.unwrap_or_else(|e| {
            tracing::debug!(channel = %msg.source.channel_id, error = %e, "channel name lookup failed");
            msg.source.channel_id.0.clone()
        });

        AuthorDisplay {
            author_name,
            channel_name,
            origin: msg.source.platform,
        }
    }

    fn record_failure(&self, source: &MessageRef, error: &RelayError) {
        match error {
            RelayError::PayloadRejected(reason) => {
                tracing::warn!(%source, %reason, "attachment rejected");
                self.log.record(RelayLogEntry::payload_rejected(source, reason));
            }
            other => {
                tracing::error!(%source, error = %other, "relay dispatch failed");
                self.log
                    .record(RelayLogEntry::dispatch_failed(source, &other.to_string()));
            }
        }
    }

    async fn call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, RelayError> {
        let timeout = self.settings.call_timeout;
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(RelayError::from_port(op, e)),
            Err(_) => Err(RelayError::Transient(format!(
                "{op}: {}",
                Error::Timeout(timeout)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_payload_errors_stay_payload_errors() {
        let e = RelayError::from_port("download_file", Error::PayloadRejected("big".to_string()));
        assert_eq!(e, RelayError::PayloadRejected("big".to_string()));

        let e = RelayError::from_port("send_file", Error::External("503".to_string()));
        assert!(matches!(e, RelayError::Transient(ref s) if s.starts_with("send_file:")));
    }
}
