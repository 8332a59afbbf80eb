#![forbid(unsafe_code)]

//! Pending vs. landed commit bookkeeping.
//!
//! The [`CommitTracker`] answers "has the last write landed?". The unified
//! state registers a pending entry for every accepted update and records a
//! commit once persistence confirms it. Dependent operations (adding a new
//! item, gesture commits) consult [`CommitTracker::flush`] as a barrier.
//!
//! # Invariants
//!
//! 1. Recording commit `v` retires every pending entry with version `<= v`:
//!    a superseded write can never land after a newer one.
//! 2. The last commit only moves forward.
//! 3. A pending entry older than `flush_timeout_ms` is abandoned by the next
//!    `flush`, so the barrier always resolves in bounded time.

use std::collections::{BTreeMap, VecDeque};

use gridsync_layout::ContentHash;
use serde::{Deserialize, Serialize};

/// Default bound on how long a pending commit may hold the barrier.
pub const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 2_000;
/// Default number of landed commits retained for diagnostics.
pub const DEFAULT_COMMIT_HISTORY: usize = 32;

/// Commit tracker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitTrackerConfig {
    pub flush_timeout_ms: u64,
    pub history_limit: usize,
}

impl Default for CommitTrackerConfig {
    fn default() -> Self {
        Self {
            flush_timeout_ms: DEFAULT_FLUSH_TIMEOUT_MS,
            history_limit: DEFAULT_COMMIT_HISTORY,
        }
    }
}

/// Record of one landed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMetadata {
    pub version: u64,
    pub hash: ContentHash,
    pub timestamp_ms: u64,
}

/// A write that has been accepted but not yet confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommit {
    pub version: u64,
    pub hash: ContentHash,
    pub tracked_at_ms: u64,
}

/// State of the commit barrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitBarrier {
    /// Nothing outstanding.
    Settled { last: Option<CommitMetadata> },
    /// Writes are still in flight; re-check no later than `deadline_ms`.
    Waiting {
        outstanding: Vec<PendingCommit>,
        deadline_ms: u64,
    },
    /// Outstanding writes exceeded the timeout and were abandoned.
    TimedOut {
        abandoned: Vec<PendingCommit>,
        last: Option<CommitMetadata>,
    },
}

impl CommitBarrier {
    /// True once the barrier no longer holds dependents back.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        !matches!(self, Self::Waiting { .. })
    }

    /// Last landed commit, when known.
    #[must_use]
    pub fn last_commit(&self) -> Option<CommitMetadata> {
        match self {
            Self::Settled { last } | Self::TimedOut { last, .. } => *last,
            Self::Waiting { .. } => None,
        }
    }
}

/// Tracks pending and landed commits for one page session.
#[derive(Debug, Clone, Default)]
pub struct CommitTracker {
    config: CommitTrackerConfig,
    pending: BTreeMap<u64, PendingCommit>,
    last: Option<CommitMetadata>,
    history: VecDeque<CommitMetadata>,
}

impl CommitTracker {
    #[must_use]
    pub fn new(config: CommitTrackerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn config(&self) -> CommitTrackerConfig {
        self.config
    }

    pub fn track_pending(&mut self, version: u64, hash: ContentHash, now_ms: u64) {
        self.pending.insert(
            version,
            PendingCommit {
                version,
                hash,
                tracked_at_ms: now_ms,
            },
        );
    }

    /// Record a landed write, retiring it and every older pending entry.
    pub fn record_commit(&mut self, commit: CommitMetadata) {
        let newer = self.pending.split_off(&(commit.version + 1));
        let retired = std::mem::replace(&mut self.pending, newer);
        if let Some(entry) = retired.get(&commit.version)
            && entry.hash != commit.hash
        {
            tracing::warn!(
                target: "gridsync.commit",
                version = commit.version,
                expected = %entry.hash.short(),
                landed = %commit.hash.short(),
                "commit landed with a different hash than was tracked"
            );
        }
        if self.last.is_none_or(|last| commit.version >= last.version) {
            self.last = Some(commit);
        }
        self.history.push_back(commit);
        while self.history.len() > self.config.history_limit.max(1) {
            self.history.pop_front();
        }
        tracing::trace!(
            target: "gridsync.commit",
            version = commit.version,
            hash = %commit.hash.short(),
            retired = retired.len(),
            "commit recorded"
        );
    }

    /// Give up on a pending entry (coalesced away, rejected, or failed).
    pub fn abandon(&mut self, version: u64) -> Option<PendingCommit> {
        self.pending.remove(&version)
    }

    /// Evaluate the barrier, abandoning entries older than the timeout.
    pub fn flush(&mut self, now_ms: u64) -> CommitBarrier {
        let timeout = self.config.flush_timeout_ms;
        let expired: Vec<u64> = self
            .pending
            .values()
            .filter(|entry| now_ms.saturating_sub(entry.tracked_at_ms) >= timeout)
            .map(|entry| entry.version)
            .collect();
        let abandoned: Vec<PendingCommit> = expired
            .into_iter()
            .filter_map(|version| self.pending.remove(&version))
            .collect();
        if !abandoned.is_empty() {
            tracing::warn!(
                target: "gridsync.commit",
                abandoned = abandoned.len(),
                timeout_ms = timeout,
                "pending commits abandoned after flush timeout"
            );
        }

        if let Some(oldest) = self.pending.values().map(|entry| entry.tracked_at_ms).min() {
            return CommitBarrier::Waiting {
                outstanding: self.pending.values().copied().collect(),
                deadline_ms: oldest.saturating_add(timeout),
            };
        }
        if abandoned.is_empty() {
            CommitBarrier::Settled { last: self.last }
        } else {
            CommitBarrier::TimedOut {
                abandoned,
                last: self.last,
            }
        }
    }

    /// Whether `version` (or a newer write that superseded it) has landed.
    #[must_use]
    pub fn has_landed(&self, version: u64) -> bool {
        self.last.is_some_and(|last| last.version >= version)
    }

    #[must_use]
    pub fn get_last_commit(&self) -> Option<CommitMetadata> {
        self.last
    }

    #[must_use]
    pub fn get_pending_commits(&self) -> Vec<PendingCommit> {
        self.pending.values().copied().collect()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Landed commits, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &CommitMetadata> + '_ {
        self.history.iter()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.last = None;
        self.history.clear();
    }
}
