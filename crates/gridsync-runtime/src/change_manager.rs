#![forbid(unsafe_code)]

//! Debounced, deduplicated funnel for every layout mutation.
//!
//! [`LayoutChangeManager`] is the single place where layout changes are
//! declared. It hashes each payload, drops payloads identical to the last
//! dispatched one, blocks late external echoes while a gesture is in
//! progress, and coalesces rapid changes per [`DebounceKey`] so only the most
//! recent payload of a key is ever dispatched.
//!
//! # Timing model
//!
//! The manager never reads a clock. Each queued payload gets a `due_ms`
//! deadline; the host calls [`poll`](LayoutChangeManager::poll) with the
//! current time to dispatch due payloads, or
//! [`flush`](LayoutChangeManager::flush) to dispatch everything at once.
//! User-originated sources use a debounce of 0, so they are due immediately
//! and leave with the very next `poll`.
//!
//! # Invariants
//!
//! 1. At most one pending payload per debounce key (last write wins).
//! 2. A dispatched payload never hashes equal to the previously dispatched one.
//! 3. `external-sync` payloads are never queued while an operation is active.
//! 4. After `flush`, nothing is pending.
//!
//! # Failure Modes
//!
//! None: queuing never fails. Payloads are not validated here.

use std::collections::BTreeMap;
use std::fmt;

use gridsync_layout::{
    ChangeSource, ContentHash, LayoutChangeOrigin, OperationId, OperationKind, ResponsiveLayouts,
    content_hash,
};
use serde::{Deserialize, Serialize};

/// Default debounce for non-user sources.
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;
/// Default debounce for user-originated sources.
pub const DEFAULT_USER_DEBOUNCE_MS: u64 = 0;
/// How long a stopped operation lingers before it is destroyed.
pub const DEFAULT_OPERATION_GRACE_MS: u64 = 1_000;

/// Change manager tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeManagerConfig {
    /// Debounce applied to non-user sources.
    pub debounce_ms: u64,
    /// Debounce applied to user-originated sources.
    pub user_debounce_ms: u64,
    /// Linger window after `stop_operation`, absorbing late grid events.
    pub operation_grace_ms: u64,
    /// Keep blocking `external-sync` while a stopped operation lingers.
    pub block_external_during_grace: bool,
}

impl Default for ChangeManagerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            user_debounce_ms: DEFAULT_USER_DEBOUNCE_MS,
            operation_grace_ms: DEFAULT_OPERATION_GRACE_MS,
            block_external_during_grace: true,
        }
    }
}

/// Coalescing key: only the latest payload per key is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DebounceKey {
    Explicit(String),
    Operation(OperationId),
    Source(ChangeSource),
}

impl DebounceKey {
    /// Explicit key if given, else the operation id, else the source.
    #[must_use]
    pub fn resolve(explicit: Option<&str>, origin: &LayoutChangeOrigin) -> Self {
        match (explicit, origin.operation_id) {
            (Some(key), _) => Self::Explicit(key.to_owned()),
            (None, Some(id)) => Self::Operation(id),
            (None, None) => Self::Source(origin.source),
        }
    }
}

impl fmt::Display for DebounceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit(key) => f.write_str(key),
            Self::Operation(id) => write!(f, "{id}"),
            Self::Source(source) => f.write_str(source.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingChange {
    layouts: ResponsiveLayouts,
    origin: LayoutChangeOrigin,
    hash: ContentHash,
    due_ms: u64,
    seq: u64,
}

/// A payload leaving the manager.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedChange {
    pub key: DebounceKey,
    pub layouts: ResponsiveLayouts,
    pub origin: LayoutChangeOrigin,
    pub hash: ContentHash,
}

/// Result of one `poll` or `flush`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchBatch {
    /// Payloads to apply, in dispatch order.
    pub delivered: Vec<DispatchedChange>,
    /// Origins of due payloads dropped at dispatch time as duplicates.
    pub dropped: Vec<LayoutChangeOrigin>,
}

impl DispatchBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty() && self.dropped.is_empty()
    }
}

/// Result of [`LayoutChangeManager::queue_layout_change`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOutcome {
    /// Stored under `key`; `replaced` is the origin of the payload it
    /// coalesced away, if any.
    Queued {
        key: DebounceKey,
        due_ms: u64,
        replaced: Option<LayoutChangeOrigin>,
    },
    /// Identical to the last dispatched payload. Any payload pending under
    /// the same key is cancelled, since the latest intent is "no change".
    DuplicateOfDispatched { cancelled: Option<LayoutChangeOrigin> },
    /// An `external-sync` arrived while operations were in progress.
    BlockedByOperation { active: Vec<OperationId> },
}

/// Lifecycle of a tracked gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Active,
    /// Stopped; destroyed once `until_ms` passes.
    Lingering { until_ms: u64 },
}

/// One drag/resize operation known to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedOperation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub started_ms: u64,
    pub status: OperationStatus,
}

/// Monotonic counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeManagerStats {
    pub queued: u64,
    pub coalesced: u64,
    pub duplicates: u64,
    pub blocked: u64,
    pub dispatched: u64,
}

/// Debounced layout change queue with operation-aware gating.
#[derive(Debug, Clone, Default)]
pub struct LayoutChangeManager {
    config: ChangeManagerConfig,
    pending: BTreeMap<DebounceKey, PendingChange>,
    operations: BTreeMap<OperationId, TrackedOperation>,
    last_dispatched: Option<ContentHash>,
    next_seq: u64,
    stats: ChangeManagerStats,
}

impl LayoutChangeManager {
    #[must_use]
    pub fn new(config: ChangeManagerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn config(&self) -> ChangeManagerConfig {
        self.config
    }

    /// Declare a layout change.
    pub fn queue_layout_change(
        &mut self,
        layouts: ResponsiveLayouts,
        origin: LayoutChangeOrigin,
        key: Option<&str>,
        debounce_override_ms: Option<u64>,
        now_ms: u64,
    ) -> QueueOutcome {
        let key = DebounceKey::resolve(key, &origin);
        let hash = content_hash(&layouts);

        if self.last_dispatched == Some(hash) {
            self.stats.duplicates += 1;
            let cancelled = self.pending.remove(&key).map(|entry| entry.origin);
            tracing::debug!(
                target: "gridsync.change",
                key = %key,
                source = %origin.source,
                hash = %hash.short(),
                cancelled_pending = cancelled.is_some(),
                "layout change identical to last dispatch dropped"
            );
            return QueueOutcome::DuplicateOfDispatched { cancelled };
        }

        if origin.source == ChangeSource::ExternalSync && self.blocks_external(now_ms) {
            self.stats.blocked += 1;
            let active = self.active_operations(now_ms);
            tracing::debug!(
                target: "gridsync.change",
                hash = %hash.short(),
                operations = active.len(),
                "external sync blocked by in-progress operation"
            );
            return QueueOutcome::BlockedByOperation { active };
        }

        let delay = debounce_override_ms.unwrap_or(if origin.source.is_user_originated() {
            self.config.user_debounce_ms
        } else {
            self.config.debounce_ms
        });
        let due_ms = now_ms.saturating_add(delay);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.stats.queued += 1;

        let replaced = self
            .pending
            .insert(
                key.clone(),
                PendingChange {
                    layouts,
                    origin,
                    hash,
                    due_ms,
                    seq,
                },
            )
            .map(|previous| previous.origin);
        if replaced.is_some() {
            self.stats.coalesced += 1;
        }

        tracing::trace!(
            target: "gridsync.change",
            key = %key,
            source = %origin.source,
            due_ms,
            coalesced = replaced.is_some(),
            "layout change queued"
        );
        QueueOutcome::Queued {
            key,
            due_ms,
            replaced,
        }
    }

    /// Dispatch every payload whose deadline has passed and destroy expired
    /// operations.
    pub fn poll(&mut self, now_ms: u64) -> DispatchBatch {
        self.expire_operations(now_ms);
        let due: Vec<DebounceKey> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.due_ms <= now_ms)
            .map(|(key, _)| key.clone())
            .collect();
        self.dispatch_keys(due)
    }

    /// Cancel all timers and dispatch everything that is pending.
    pub fn flush(&mut self) -> DispatchBatch {
        let all: Vec<DebounceKey> = self.pending.keys().cloned().collect();
        let batch = self.dispatch_keys(all);
        debug_assert!(self.pending.is_empty());
        batch
    }

    fn dispatch_keys(&mut self, keys: Vec<DebounceKey>) -> DispatchBatch {
        let mut entries: Vec<(DebounceKey, PendingChange)> = keys
            .into_iter()
            .filter_map(|key| self.pending.remove(&key).map(|entry| (key, entry)))
            .collect();
        entries.sort_by_key(|(_, entry)| (entry.due_ms, entry.seq));

        let mut batch = DispatchBatch::default();
        for (key, entry) in entries {
            if self.last_dispatched == Some(entry.hash) {
                self.stats.duplicates += 1;
                batch.dropped.push(entry.origin);
                continue;
            }
            self.last_dispatched = Some(entry.hash);
            self.stats.dispatched += 1;
            batch.delivered.push(DispatchedChange {
                key,
                layouts: entry.layouts,
                origin: entry.origin,
                hash: entry.hash,
            });
        }
        batch
    }

    /// Begin tracking an operation. Restarting a lingering id reactivates it.
    pub fn start_operation(&mut self, id: OperationId, kind: OperationKind, now_ms: u64) {
        self.operations.insert(
            id,
            TrackedOperation {
                id,
                kind,
                started_ms: now_ms,
                status: OperationStatus::Active,
            },
        );
    }

    /// Mark an operation finished; it lingers for the configured grace window.
    /// Returns false when the id is unknown or already stopped.
    pub fn stop_operation(&mut self, id: OperationId, now_ms: u64) -> bool {
        let until_ms = now_ms.saturating_add(self.config.operation_grace_ms);
        match self.operations.get_mut(&id) {
            Some(op) if op.status == OperationStatus::Active => {
                op.status = OperationStatus::Lingering { until_ms };
                true
            }
            _ => false,
        }
    }

    fn expire_operations(&mut self, now_ms: u64) {
        self.operations.retain(|_, op| match op.status {
            OperationStatus::Active => true,
            OperationStatus::Lingering { until_ms } => until_ms > now_ms,
        });
    }

    fn blocks_external(&self, now_ms: u64) -> bool {
        self.operations.values().any(|op| match op.status {
            OperationStatus::Active => true,
            OperationStatus::Lingering { until_ms } => {
                self.config.block_external_during_grace && until_ms > now_ms
            }
        })
    }

    /// Operations that currently gate external syncs.
    #[must_use]
    pub fn active_operations(&self, now_ms: u64) -> Vec<OperationId> {
        self.operations
            .values()
            .filter(|op| match op.status {
                OperationStatus::Active => true,
                OperationStatus::Lingering { until_ms } => {
                    self.config.block_external_during_grace && until_ms > now_ms
                }
            })
            .map(|op| op.id)
            .collect()
    }

    #[must_use]
    pub fn has_active_operations(&self) -> bool {
        self.operations
            .values()
            .any(|op| op.status == OperationStatus::Active)
    }

    #[must_use]
    pub fn is_operation_active(&self, id: OperationId) -> bool {
        self.operations
            .get(&id)
            .is_some_and(|op| op.status == OperationStatus::Active)
    }

    #[must_use]
    pub fn operation(&self, id: OperationId) -> Option<&TrackedOperation> {
        self.operations.get(&id)
    }

    /// Earliest pending deadline, for hosts that arm a real timer.
    #[must_use]
    pub fn next_due_ms(&self) -> Option<u64> {
        self.pending.values().map(|entry| entry.due_ms).min()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn last_dispatched(&self) -> Option<ContentHash> {
        self.last_dispatched
    }

    /// Override the dedup baseline (initial load, failed persistence).
    pub fn set_last_dispatched(&mut self, hash: Option<ContentHash>) {
        self.last_dispatched = hash;
    }

    pub fn reset_dispatched_hash(&mut self) {
        self.last_dispatched = None;
    }

    #[must_use]
    pub const fn stats(&self) -> ChangeManagerStats {
        self.stats
    }

    /// Destroy: drop every pending payload and operation.
    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            tracing::debug!(
                target: "gridsync.change",
                discarded = self.pending.len(),
                "pending layout changes discarded"
            );
        }
        self.pending.clear();
        self.operations.clear();
    }

    /// Destroy and forget the dedup baseline.
    pub fn reset(&mut self) {
        self.clear();
        self.reset_dispatched_hash();
    }
}
