//! Polls watched Discord channels and turns what changed into inbound events.

use std::{
    collections::{BTreeSet, HashSet},
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use lrb_core::{
    domain::{ChannelId, InboundEvent, MessageRef, ReactionEvent},
    inbound::{CursorOrder, MessageCursor, ReactionChange, ReactionSnapshot, ReactionTracker},
    Result,
};

use crate::{
    types::{DiscordMessage, DiscordUser},
    DiscordClient,
};

/// Messages whose reactions we keep following, across all channels.
const TRACKED_MESSAGES: usize = 500;

pub struct DiscordPoller {
    client: DiscordClient,
    channels: Vec<ChannelId>,
    interval: Duration,
    history_limit: u8,
}

struct PollState {
    cursor: MessageCursor,
    reactions: ReactionTracker,
    /// Ids of users known to be bots (ourselves included).
    bots: HashSet<String>,
}

impl DiscordPoller {
    pub fn new(
        client: DiscordClient,
        channels: Vec<ChannelId>,
        interval: Duration,
        history_limit: u8,
    ) -> Self {
        Self {
            client,
            channels,
            interval,
            history_limit: history_limit.clamp(1, 100),
        }
    }

    /// Poll until `cancel` fires or the receiving side goes away.
    pub async fn run(
        self,
        tx: mpsc::Sender<InboundEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let me = self
            .client
            .current_user()
            .await
            .context("discord: failed to resolve bot user")?;
        tracing::info!(
            bot = %me.username,
            channels = self.channels.len(),
            "discord poller started"
        );

        let mut state = PollState {
            cursor: MessageCursor::new(CursorOrder::Snowflake),
            reactions: ReactionTracker::new(TRACKED_MESSAGES),
            bots: HashSet::from([me.id]),
        };

        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
              _ = cancel.cancelled() => break,
              _ = tick.tick() => {
                for channel in &self.channels {
                  let events = match self.poll_channel(channel, &mut state).await {
                    Ok(events) => events,
                    Err(e) => {
                      tracing::warn!(%channel, error = %e, "discord poll failed");
                      continue;
                    }
                  };
                  for event in events {
                    if tx.send(event).await.is_err() {
                      tracing::info!("relay listener gone; discord poller stopping");
                      return Ok(());
                    }
                  }
                }
              }
            }
        }
        tracing::info!("discord poller stopped");
        Ok(())
    }

    async fn poll_channel(
        &self,
        channel: &ChannelId,
        state: &mut PollState,
    ) -> Result<Vec<InboundEvent>> {
        let messages = self
            .client
            .channel_messages(channel, self.history_limit)
            .await?;
        Ok(collect_events(&self.client, channel, messages, state).await)
    }
}

/// Where reactor lists come from; the REST client in production.
#[async_trait]
trait ReactorSource: Send + Sync {
    async fn reactors(&self, msg: &MessageRef, emoji: &str) -> Result<Vec<DiscordUser>>;
}

#[async_trait]
impl ReactorSource for DiscordClient {
    async fn reactors(&self, msg: &MessageRef, emoji: &str) -> Result<Vec<DiscordUser>> {
        DiscordClient::reactors(self, msg, emoji).await
    }
}

/// New posts first, then reaction changes. A message whose reactors cannot
/// be fetched keeps its previous snapshot and is retried on the next poll.
async fn collect_events(
    source: &dyn ReactorSource,
    channel: &ChannelId,
    messages: Vec<DiscordMessage>,
    state: &mut PollState,
) -> Vec<InboundEvent> {
    let fresh = state
        .cursor
        .advance(channel, messages.clone(), |m| m.id.as_str());
    let mut events: Vec<InboundEvent> = fresh
        .iter()
        .map(|m| InboundEvent::Message(m.to_inbound()))
        .collect();

    for msg in &messages {
        let reference = msg.reference();
        let known = state.reactions.known(&reference);
        let snapshot = match reaction_snapshot(source, msg, known, &mut state.bots).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(message = %reference, error = %e, "discord reactor lookup failed");
                continue;
            }
        };
        let changes = state.reactions.observe(&reference, snapshot);
        events.extend(
            reaction_events(&reference, changes, &state.bots)
                .into_iter()
                .map(InboundEvent::Reaction),
        );
    }
    events
}

/// Who reacted with what. Reactor lists are only fetched for emojis whose
/// count no longer matches what we already know.
async fn reaction_snapshot(
    source: &dyn ReactorSource,
    msg: &DiscordMessage,
    known: Option<&ReactionSnapshot>,
    bots: &mut HashSet<String>,
) -> Result<ReactionSnapshot> {
    let reference = msg.reference();
    let mut snapshot = ReactionSnapshot::new();
    for reaction in &msg.reactions {
        let Some(notation) = reaction.emoji.notation() else {
            continue;
        };
        let users = match cached_users(known, &notation, reaction.count) {
            Some(users) => users.clone(),
            None => {
                let reactors = source.reactors(&reference, &notation).await?;
                bots.extend(reactors.iter().filter(|u| u.bot).map(|u| u.id.clone()));
                reactors.into_iter().map(|u| u.id).collect()
            }
        };
        if !users.is_empty() {
            snapshot.insert(notation, users);
        }
    }
    Ok(snapshot)
}

fn cached_users<'a>(
    known: Option<&'a ReactionSnapshot>,
    notation: &str,
    count: u32,
) -> Option<&'a BTreeSet<String>> {
    known?
        .get(notation)
        .filter(|users| users.len() == count as usize)
}

fn reaction_events(
    message: &MessageRef,
    changes: Vec<ReactionChange>,
    bots: &HashSet<String>,
) -> Vec<ReactionEvent> {
    changes
        .into_iter()
        .map(|c| ReactionEvent {
            message: message.clone(),
            actor_is_bot: bots.contains(&c.actor_id.0),
            emoji: c.emoji,
            actor_id: c.actor_id,
            action: c.action,
        })
        .collect()
}
