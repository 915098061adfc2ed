//! Operational log of relay successes and failures.
//!
//! Keeps the most recent entries in memory (for a log/statistics command) and
//! appends every entry to a file, either as a plain line or as JSON.

use std::{
    collections::VecDeque,
    fmt,
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::Utc;
use serde::Serialize;

use crate::{
    domain::{MessageRef, Platform, ReactionAction},
    Result,
};

const MAX_DETAIL: usize = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => f.write_str("INFO"),
            LogLevel::Warn => f.write_str("WARN"),
            LogLevel::Error => f.write_str("ERROR"),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RelayLogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub event: String,
    /// `slack->discord` / `discord->slack`
    pub direction: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl RelayLogEntry {
    fn new(level: LogLevel, event: &str, from: Platform) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            level,
            event: event.to_string(),
            direction: format!("{from}->{}", from.other()),
            source: None,
            mirror: None,
            detail: None,
        }
    }

    fn with_source(mut self, source: &MessageRef) -> Self {
        self.source = Some(source.to_string());
        self
    }

    fn with_mirror(mut self, mirror: &MessageRef) -> Self {
        self.mirror = Some(mirror.to_string());
        self
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(truncate_text(&detail.into(), MAX_DETAIL));
        self
    }

    pub fn message_relayed(source: &MessageRef, mirror: &MessageRef) -> Self {
        Self::new(LogLevel::Info, "message_relayed", source.platform)
            .with_source(source)
            .with_mirror(mirror)
    }

    pub fn file_relayed(source: &MessageRef, mirror: &MessageRef, filename: &str) -> Self {
        Self::new(LogLevel::Info, "file_relayed", source.platform)
            .with_source(source)
            .with_mirror(mirror)
            .with_detail(filename)
    }

    pub fn payload_rejected(source: &MessageRef, reason: &str) -> Self {
        Self::new(LogLevel::Warn, "payload_rejected", source.platform)
            .with_source(source)
            .with_detail(reason)
    }

    pub fn dispatch_failed(source: &MessageRef, error: &str) -> Self {
        Self::new(LogLevel::Error, "dispatch_failed", source.platform)
            .with_source(source)
            .with_detail(error)
    }

    pub fn reaction_synced(
        from: &MessageRef,
        target: &MessageRef,
        emoji: &str,
        action: ReactionAction,
    ) -> Self {
        Self::new(LogLevel::Info, "reaction_synced", from.platform)
            .with_source(from)
            .with_mirror(target)
            .with_detail(format!("{action} {emoji}"))
    }

    pub fn reaction_failed(from: &MessageRef, target: &MessageRef, error: &str) -> Self {
        Self::new(LogLevel::Error, "reaction_failed", from.platform)
            .with_source(from)
            .with_mirror(target)
            .with_detail(error)
    }
}

impl fmt::Display for RelayLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} [{}]",
            self.timestamp, self.level, self.event, self.direction
        )?;
        if let Some(s) = &self.source {
            write!(f, " {s}")?;
        }
        if let Some(m) = &self.mirror {
            write!(f, " -> {m}")?;
        }
        if let Some(d) = &self.detail {
            write!(f, ": {d}")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct RelayLog {
    path: Option<PathBuf>,
    json: bool,
    capacity: usize,
    entries: Mutex<VecDeque<RelayLogEntry>>,
}

impl RelayLog {
    pub fn new(path: impl Into<PathBuf>, json: bool, capacity: usize) -> Self {
        Self {
            path: Some(path.into()),
            json,
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// No file sink; used by tests and when the log path is not writable.
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            path: None,
            json: false,
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<RelayLogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, entry: RelayLogEntry) {
        if let Err(e) = self.append_to_file(&entry) {
            tracing::warn!(error = %e, "failed to append relay log entry");
        }

        let mut entries = self.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// The last `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<RelayLogEntry> {
        let entries = self.lock();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries and truncate the file sink.
    pub fn clear(&self) -> Result<()> {
        self.lock().clear();
        if let Some(path) = &self.path {
            File::create(path)?;
        }
        Ok(())
    }

    fn append_to_file(&self, entry: &RelayLogEntry) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if self.json {
            let line = serde_json::to_string(entry)?;
            writeln!(file, "{line}")?;
        } else {
            writeln!(file, "{entry}")?;
        }
        Ok(())
    }
}

fn truncate_text(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("...");
    out
}
