//! Ordered filter chain deciding whether an inbound event is relayed.
//!
//! Message predicates, first match wins:
//! 1. bot/automated author        → [`FilterReason::BotOrigin`]
//! 2. channel not in the allow-list → [`FilterReason::ChannelNotAllowed`]
//! 3. nothing to relay            → [`FilterReason::EmptyMessage`]
//! 4. already registered          → [`FilterReason::Duplicate`]
//!
//! The duplicate check registers the relay attempt, so it must stay last.

use std::fmt;

use crate::{
    correlation::{CorrelationCache, Registration, RelayHandle},
    domain::{ChannelId, InboundMessage, Platform, ReactionEvent},
};

/// One relay direction: messages from `allow_list` are mirrored into `target`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayRoute {
    pub allow_list: Vec<ChannelId>,
    pub target: ChannelId,
}

/// Both directions; a missing route disables that direction.
#[derive(Clone, Debug, Default)]
pub struct RelayRoutes {
    slack_to_discord: Option<RelayRoute>,
    discord_to_slack: Option<RelayRoute>,
}

impl RelayRoutes {
    pub fn new(slack_to_discord: Option<RelayRoute>, discord_to_slack: Option<RelayRoute>) -> Self {
        Self {
            slack_to_discord,
            discord_to_slack,
        }
    }

    /// Route for messages originating on `source`.
    pub fn route(&self, source: Platform) -> Option<&RelayRoute> {
        match source {
            Platform::Slack => self.slack_to_discord.as_ref(),
            Platform::Discord => self.discord_to_slack.as_ref(),
        }
    }

    pub fn allows(&self, source: Platform, channel: &ChannelId) -> bool {
        self.route(source)
            .map(|r| r.allow_list.contains(channel))
            .unwrap_or(false)
    }

    /// Whether `channel` on `platform` is a relay source or receives mirrored copies.
    pub fn watches(&self, platform: Platform, channel: &ChannelId) -> bool {
        self.allows(platform, channel)
            || self
                .route(platform.other())
                .map(|r| &r.target == channel)
                .unwrap_or(false)
    }

    pub fn watched_channels(&self, platform: Platform) -> Vec<ChannelId> {
        let mut out: Vec<ChannelId> = self
            .route(platform)
            .map(|r| r.allow_list.clone())
            .unwrap_or_default();
        if let Some(r) = self.route(platform.other()) {
            out.push(r.target.clone());
        }
        out.sort();
        out.dedup();
        out
    }
}

/// Why an event was not relayed. Expected control flow, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterReason {
    BotOrigin,
    ChannelNotAllowed,
    EmptyMessage,
    Duplicate,
}

impl FilterReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterReason::BotOrigin => "bot_origin",
            FilterReason::ChannelNotAllowed => "channel_not_allowed",
            FilterReason::EmptyMessage => "empty_message",
            FilterReason::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run the message chain; on acceptance the relay is registered in `cache`.
pub fn admit_message(
    routes: &RelayRoutes,
    cache: &CorrelationCache,
    msg: &InboundMessage,
) -> Result<RelayHandle, FilterReason> {
    if msg.author_is_bot {
        return Err(FilterReason::BotOrigin);
    }
    if !routes.allows(msg.source.platform, &msg.source.channel_id) {
        return Err(FilterReason::ChannelNotAllowed);
    }
    if msg.text.trim().is_empty() && msg.attachments.is_empty() {
        return Err(FilterReason::EmptyMessage);
    }
    match cache.record_outbound(&msg.source) {
        Registration::New(handle) => Ok(handle),
        Registration::Duplicate(_) => Err(FilterReason::Duplicate),
    }
}

/// Reaction chain: bot actor first, then the watched-channel check.
pub fn admit_reaction(routes: &RelayRoutes, ev: &ReactionEvent) -> Result<(), FilterReason> {
    if ev.actor_is_bot {
        return Err(FilterReason::BotOrigin);
    }
    if !routes.watches(ev.message.platform, &ev.message.channel_id) {
        return Err(FilterReason::ChannelNotAllowed);
    }
    Ok(())
}
