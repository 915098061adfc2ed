//! Shared helpers for the polling listeners: message cursors and reaction diffs.
//!
//! Both platforms are polled, so new messages and reaction changes are derived
//! by comparing what a poll returns with what the previous poll saw. The first
//! poll of a channel only sets a baseline; history is never replayed.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::domain::{ChannelId, MessageRef, ReactionAction, UserId};

/// How message ids order within a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorOrder {
    /// Discord snowflakes: numeric, increasing with time.
    Snowflake,
    /// Slack `ts`: `"<seconds>.<micros>"`.
    SlackTs,
}

impl CursorOrder {
    /// Sort key for a message id; `None` if the id is malformed.
    pub fn key(self, id: &str) -> Option<u128> {
        match self {
            CursorOrder::Snowflake => id.parse::<u64>().ok().map(u128::from),
            CursorOrder::SlackTs => {
                let (secs, frac) = id.split_once('.').unwrap_or((id, ""));
                let secs: u64 = secs.parse().ok()?;
                if frac.len() > 6 || !frac.chars().all(|c| c.is_ascii_digit()) {
                    return None;
                }
                let micros: u64 = format!("{frac:0<6}").parse().ok()?;
                Some(u128::from(secs) * 1_000_000 + u128::from(micros))
            }
        }
    }
}

/// Per-channel high-water mark.
#[derive(Debug)]
pub struct MessageCursor {
    order: CursorOrder,
    marks: HashMap<ChannelId, u128>,
}

impl MessageCursor {
    pub fn new(order: CursorOrder) -> Self {
        Self {
            order,
            marks: HashMap::new(),
        }
    }

    pub fn is_baselined(&self, channel: &ChannelId) -> bool {
        self.marks.contains_key(channel)
    }

    /// Keep the items newer than the channel's mark, oldest first, and move the
    /// mark past them. The first call for a channel only records the baseline.
    pub fn advance<T>(
        &mut self,
        channel: &ChannelId,
        items: Vec<T>,
        id_of: impl Fn(&T) -> &str,
    ) -> Vec<T> {
        let mut keyed: Vec<(u128, T)> = items
            .into_iter()
            .filter_map(|item| self.order.key(id_of(&item)).map(|k| (k, item)))
            .collect();
        let newest = keyed.iter().map(|(k, _)| *k).max();

        let Some(mark) = self.marks.get(channel).copied() else {
            self.marks.insert(channel.clone(), newest.unwrap_or(0));
            return Vec::new();
        };

        keyed.retain(|(k, _)| *k > mark);
        keyed.sort_by_key(|(k, _)| *k);
        if let Some(newest) = newest {
            self.marks.insert(channel.clone(), mark.max(newest));
        }
        keyed.into_iter().map(|(_, item)| item).collect()
    }
}

/// Emoji (platform notation) → ids of users who reacted with it.
pub type ReactionSnapshot = BTreeMap<String, BTreeSet<String>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionChange {
    pub emoji: String,
    pub actor_id: UserId,
    pub action: ReactionAction,
}

/// Remembers the last reaction snapshot of recently seen messages.
#[derive(Debug)]
pub struct ReactionTracker {
    capacity: usize,
    seen: HashMap<MessageRef, ReactionSnapshot>,
    order: VecDeque<MessageRef>,
}

impl ReactionTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn known(&self, message: &MessageRef) -> Option<&ReactionSnapshot> {
        self.seen.get(message)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Store `snapshot` for `message` and return what changed since the last one.
    ///
    /// Nothing is emitted the first time a message is seen.
    pub fn observe(&mut self, message: &MessageRef, snapshot: ReactionSnapshot) -> Vec<ReactionChange> {
        let Some(previous) = self.seen.get_mut(message) else {
            self.insert(message.clone(), snapshot);
            return Vec::new();
        };

        let mut changes = Vec::new();
        for (emoji, users) in &snapshot {
            let before = previous.get(emoji);
            for user in users {
                if !before.is_some_and(|b| b.contains(user)) {
                    changes.push(ReactionChange {
                        emoji: emoji.clone(),
                        actor_id: UserId(user.clone()),
                        action: ReactionAction::Add,
                    });
                }
            }
        }
        for (emoji, users) in previous.iter() {
            let after = snapshot.get(emoji);
            for user in users {
                if !after.is_some_and(|a| a.contains(user)) {
                    changes.push(ReactionChange {
                        emoji: emoji.clone(),
                        actor_id: UserId(user.clone()),
                        action: ReactionAction::Remove,
                    });
                }
            }
        }

        *previous = snapshot;
        changes
    }

    fn insert(&mut self, message: MessageRef, snapshot: ReactionSnapshot) {
        while self.seen.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.seen.remove(&oldest);
        }
        self.order.push_back(message.clone());
        self.seen.insert(message, snapshot);
    }
}
