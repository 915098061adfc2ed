//! Polls watched Slack channels via `conversations.history`.

use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use lrb_core::{
    domain::{ChannelId, InboundEvent, ReactionEvent},
    inbound::{CursorOrder, MessageCursor, ReactionTracker},
    Result,
};

use crate::{types::SlackMessage, SlackClient};

const TRACKED_MESSAGES: usize = 500;

pub struct SlackPoller {
    client: SlackClient,
    channels: Vec<ChannelId>,
    interval: Duration,
    history_limit: u8,
}

struct PollState {
    bot_user_id: String,
    cursor: MessageCursor,
    reactions: ReactionTracker,
}

impl SlackPoller {
    pub fn new(
        client: SlackClient,
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

    pub async fn run(
        self,
        tx: mpsc::Sender<InboundEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let bot_user_id = self
            .client
            .auth_test()
            .await
            .context("slack: auth.test failed")?;
        tracing::info!(bot = %bot_user_id, channels = self.channels.len(), "slack poller started");

        let mut state = PollState {
            bot_user_id,
            cursor: MessageCursor::new(CursorOrder::SlackTs),
            reactions: ReactionTracker::new(TRACKED_MESSAGES),
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
                      tracing::warn!(%channel, error = %e, "slack poll failed");
                      continue;
                    }
                  };
                  for event in events {
                    if tx.send(event).await.is_err() {
                      tracing::info!("relay listener gone; slack poller stopping");
                      return Ok(());
                    }
                  }
                }
              }
            }
        }
        tracing::info!("slack poller stopped");
        Ok(())
    }

    async fn poll_channel(
        &self,
        channel: &ChannelId,
        state: &mut PollState,
    ) -> Result<Vec<InboundEvent>> {
        let messages = self.client.history(channel, self.history_limit).await?;
        Ok(collect_events(channel, messages, state))
    }
}

/// New posts first (oldest to newest), then reaction changes.
fn collect_events(
    channel: &ChannelId,
    messages: Vec<SlackMessage>,
    state: &mut PollState,
) -> Vec<InboundEvent> {
    let fresh = state
        .cursor
        .advance(channel, messages.clone(), |m| m.ts.as_str());
    let mut events: Vec<InboundEvent> = fresh
        .iter()
        .filter(|m| m.is_relayable())
        .map(|m| InboundEvent::Message(m.to_inbound(&channel.0, &state.bot_user_id)))
        .collect();

    for msg in &messages {
        let reference = msg.reference(&channel.0);
        let changes = state.reactions.observe(&reference, msg.reaction_snapshot());
        events.extend(changes.into_iter().map(|c| {
            InboundEvent::Reaction(ReactionEvent {
                message: reference.clone(),
                actor_is_bot: c.actor_id.0 == state.bot_user_id,
                emoji: c.emoji,
                actor_id: c.actor_id,
                action: c.action,
            })
        }));
    }
    events
}
