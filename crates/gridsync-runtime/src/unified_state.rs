#![forbid(unsafe_code)]

//! The canonical layout snapshot and its single write path.
//!
//! [`UnifiedLayoutState`] owns the canonical [`ResponsiveLayouts`] of one page
//! session and wires the [`LayoutChangeManager`] and [`CommitTracker`]
//! together behind a small imperative contract:
//!
//! - [`update_layouts`](UnifiedLayoutState::update_layouts) accepts, rejects
//!   or coalesces a write,
//! - [`poll`](UnifiedLayoutState::poll) / [`flush`](UnifiedLayoutState::flush)
//!   dispatch accepted writes to the [`LayoutPersister`],
//! - [`reset_layouts`](UnifiedLayoutState::reset_layouts) switches pages.
//!
//! # Snapshots
//!
//! | snapshot  | meaning                                                  |
//! |-----------|----------------------------------------------------------|
//! | current   | latest accepted payload ("last stable"), what is shown   |
//! | committed | last payload the persister confirmed (canonical)         |
//!
//! # Invariants
//!
//! 1. Every accepted update gets `version = latest + 1`; nothing else moves
//!    the version counters.
//! 2. A write whose version is below the committed version never reaches
//!    the committed snapshot, neither at `update_layouts` time nor at
//!    dispatch time.
//! 3. The committed snapshot only changes when a write lands.
//! 4. After `reset_layouts`, nothing queued or in flight before the reset
//!    can land (tickets carry the session epoch).
//!
//! # Failure Modes
//!
//! Only persistence can fail. A failure is logged at `error`, handed to the
//! error handler, and recorded as [`StateEvent::PersistFailed`]; the committed
//! snapshot keeps its last-good value.

use std::collections::BTreeMap;
use std::fmt;

use gridsync_layout::{
    ChangeSource, ContentHash, LayoutChangeOrigin, OperationId, OperationKind, ResponsiveLayouts,
    compare_semantically, content_hash,
};

use crate::change_manager::{DispatchBatch, LayoutChangeManager, QueueOutcome};
use crate::commit_tracker::{CommitBarrier, CommitMetadata, CommitTracker, PendingCommit};
use crate::config::CoordinationConfig;
use crate::persist::{
    CommitTicket, LayoutPersister, PersistError, PersistFailure, PersistRequest, PersistStatus,
};

// =========================================================================
// Public types
// =========================================================================

/// Per-call options for [`UnifiedLayoutState::update_layouts`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Coalescing key; defaults to the operation id, then the source.
    pub debounce_key: Option<String>,
    /// Debounce for this call instead of the source default.
    pub debounce_override_ms: Option<u64>,
}

impl UpdateOptions {
    #[must_use]
    pub fn keyed(key: impl Into<String>) -> Self {
        Self {
            debounce_key: Some(key.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_debounce(mut self, ms: u64) -> Self {
        self.debounce_override_ms = Some(ms);
        self
    }
}

/// Result of [`UnifiedLayoutState::update_layouts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// First `initial-load`: the state is initialized without persisting.
    Initialized { hash: ContentHash },
    /// Accepted and queued for persistence under `version`.
    Accepted { version: u64, hash: ContentHash },
    /// Semantically equal to the current snapshot.
    NoOp,
    /// `origin.version` is older than the committed version.
    Stale { incoming: u64, committed: u64 },
    /// External sync refused while a gesture is in progress.
    Blocked { active: Vec<OperationId> },
}

impl UpdateOutcome {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. } | Self::Initialized { .. })
    }
}

/// Notable state changes, drained by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEvent {
    Initialized {
        hash: ContentHash,
    },
    Committed {
        version: u64,
        hash: ContentHash,
        source: ChangeSource,
    },
    PersistPending {
        ticket: CommitTicket,
    },
    PersistFailed(PersistFailure),
    /// A queued write was superseded by a commit before it was dispatched.
    DroppedStale {
        version: u64,
        committed: u64,
    },
    Reset {
        epoch: u64,
    },
}

/// Monotonic counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateStats {
    pub accepted: u64,
    pub no_ops: u64,
    pub stale: u64,
    pub blocked: u64,
    pub committed: u64,
    pub failed: u64,
}

/// Result of [`UnifiedLayoutState::flush`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    /// Last committed version.
    pub version: u64,
    /// Hash of the committed snapshot, if any write or load established one.
    pub hash: Option<ContentHash>,
    /// Persistence barrier after the drain.
    pub barrier: CommitBarrier,
}

#[derive(Debug, Clone)]
struct InFlightWrite {
    layouts: ResponsiveLayouts,
    origin: LayoutChangeOrigin,
    hash: ContentHash,
}

type ErrorHandler = Box<dyn FnMut(&PersistFailure)>;

// =========================================================================
// UnifiedLayoutState
// =========================================================================

/// Canonical layout owner for one page session.
pub struct UnifiedLayoutState {
    manager: LayoutChangeManager,
    tracker: CommitTracker,
    persister: Box<dyn LayoutPersister>,
    error_handler: Option<ErrorHandler>,
    current: Option<ResponsiveLayouts>,
    current_hash: Option<ContentHash>,
    committed: Option<ResponsiveLayouts>,
    committed_hash: Option<ContentHash>,
    committed_version: u64,
    latest_version: u64,
    epoch: u64,
    in_flight: BTreeMap<u64, InFlightWrite>,
    events: Vec<StateEvent>,
    stats: StateStats,
}

impl fmt::Debug for UnifiedLayoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnifiedLayoutState")
            .field("epoch", &self.epoch)
            .field("committed_version", &self.committed_version)
            .field("latest_version", &self.latest_version)
            .field("current_hash", &self.current_hash.map(|h| h.short()))
            .field("committed_hash", &self.committed_hash.map(|h| h.short()))
            .field("in_flight", &self.in_flight.len())
            .field("pending", &self.manager.pending_len())
            .finish_non_exhaustive()
    }
}

impl UnifiedLayoutState {
    /// Create a session. `None` leaves the state uninitialized until the
    /// first update or reset.
    pub fn new(
        initial: Option<ResponsiveLayouts>,
        persister: impl LayoutPersister + 'static,
        config: &CoordinationConfig,
    ) -> Self {
        let mut state = Self {
            manager: LayoutChangeManager::new(config.change),
            tracker: CommitTracker::new(config.commit),
            persister: Box::new(persister),
            error_handler: None,
            current: None,
            current_hash: None,
            committed: None,
            committed_hash: None,
            committed_version: 0,
            latest_version: 0,
            epoch: 0,
            in_flight: BTreeMap::new(),
            events: Vec::new(),
            stats: StateStats::default(),
        };
        if let Some(layouts) = initial {
            state.install_baseline(layouts);
        }
        state
    }

    /// Receive persistence failures as they happen.
    pub fn set_error_handler(&mut self, handler: impl FnMut(&PersistFailure) + 'static) {
        self.error_handler = Some(Box::new(handler));
    }

    fn install_baseline(&mut self, layouts: ResponsiveLayouts) -> ContentHash {
        let hash = content_hash(&layouts);
        self.current = Some(layouts.clone());
        self.current_hash = Some(hash);
        self.committed = Some(layouts);
        self.committed_hash = Some(hash);
        self.manager.set_last_dispatched(Some(hash));
        hash
    }

    // ---------------------------------------------------------------------
    // Write path
    // ---------------------------------------------------------------------

    /// Submit a layout write.
    pub fn update_layouts(
        &mut self,
        layouts: ResponsiveLayouts,
        origin: LayoutChangeOrigin,
        options: &UpdateOptions,
        now_ms: u64,
    ) -> UpdateOutcome {
        if origin.source == ChangeSource::InitialLoad {
            if self.current.is_some() {
                // A baseline is never written back; a second one is a late
                // echo of the first load.
                self.stats.no_ops += 1;
                tracing::debug!(
                    target: "gridsync.state",
                    hash = %content_hash(&layouts).short(),
                    "initial load after initialization ignored"
                );
                return UpdateOutcome::NoOp;
            }
            let hash = self.install_baseline(layouts);
            self.events.push(StateEvent::Initialized { hash });
            tracing::debug!(
                target: "gridsync.state",
                hash = %hash.short(),
                "layout state initialized"
            );
            return UpdateOutcome::Initialized { hash };
        }

        if let Some(incoming) = origin.version
            && incoming < self.committed_version
        {
            self.stats.stale += 1;
            tracing::debug!(
                target: "gridsync.state",
                source = %origin.source,
                incoming,
                committed = self.committed_version,
                "stale layout update rejected"
            );
            return UpdateOutcome::Stale {
                incoming,
                committed: self.committed_version,
            };
        }

        if self
            .current
            .as_ref()
            .is_some_and(|current| compare_semantically(current, &layouts))
        {
            self.stats.no_ops += 1;
            tracing::debug!(
                target: "gridsync.state",
                source = %origin.source,
                "layout update is a semantic no-op"
            );
            return UpdateOutcome::NoOp;
        }

        let version = self.latest_version + 1;
        let stamped = origin.with_version(version);
        let key = options.debounce_key.as_deref();
        let debounce = options.debounce_override_ms;
        let mut outcome =
            self.manager
                .queue_layout_change(layouts.clone(), stamped, key, debounce, now_ms);
        if let QueueOutcome::DuplicateOfDispatched { cancelled } = outcome {
            if let Some(cancelled) = cancelled.and_then(|origin| origin.version) {
                self.tracker.abandon(cancelled);
            }
            if self.manager.pending_len() > 0 {
                // Payloads under other keys would land after this one; queue
                // it as a real write so the dispatch-time version guard
                // orders them.
                self.manager.reset_dispatched_hash();
                outcome =
                    self.manager
                        .queue_layout_change(layouts.clone(), stamped, key, debounce, now_ms);
            }
        }

        match outcome {
            QueueOutcome::Queued { replaced, .. } => {
                let hash = content_hash(&layouts);
                if let Some(superseded) = replaced.and_then(|origin| origin.version) {
                    self.tracker.abandon(superseded);
                }
                self.latest_version = version;
                self.current = Some(layouts);
                self.current_hash = Some(hash);
                self.tracker.track_pending(version, hash, now_ms);
                self.stats.accepted += 1;
                tracing::trace!(
                    target: "gridsync.state",
                    source = %origin.source,
                    version,
                    hash = %hash.short(),
                    "layout update accepted"
                );
                UpdateOutcome::Accepted { version, hash }
            }
            QueueOutcome::DuplicateOfDispatched { .. } => {
                // Back to what was last dispatched: the display follows the
                // payload and nothing needs writing.
                self.current_hash = Some(content_hash(&layouts));
                self.current = Some(layouts);
                self.stats.no_ops += 1;
                UpdateOutcome::NoOp
            }
            QueueOutcome::BlockedByOperation { active } => {
                self.stats.blocked += 1;
                UpdateOutcome::Blocked { active }
            }
        }
    }

    /// Dispatch writes whose debounce elapsed. Returns the number of writes
    /// handed to the persister.
    pub fn poll(&mut self, now_ms: u64) -> usize {
        let batch = self.manager.poll(now_ms);
        self.process_batch(batch, now_ms)
    }

    /// Drain the change queue, then evaluate the persistence barrier.
    pub fn flush(&mut self, now_ms: u64) -> FlushReport {
        let batch = self.manager.flush();
        self.process_batch(batch, now_ms);
        let barrier = self.tracker.flush(now_ms);
        FlushReport {
            version: self.committed_version,
            hash: self.committed_hash,
            barrier,
        }
    }

    /// Re-evaluate the persistence barrier without draining the queue.
    pub fn barrier(&mut self, now_ms: u64) -> CommitBarrier {
        self.tracker.flush(now_ms)
    }

    fn process_batch(&mut self, batch: DispatchBatch, now_ms: u64) -> usize {
        for origin in &batch.dropped {
            if let Some(version) = origin.version {
                self.tracker.abandon(version);
            }
        }

        let mut persisted = 0;
        for change in batch.delivered {
            let version = change.origin.version.unwrap_or(self.latest_version);
            if version < self.committed_version {
                self.tracker.abandon(version);
                self.manager.set_last_dispatched(self.committed_hash);
                self.stats.stale += 1;
                self.events.push(StateEvent::DroppedStale {
                    version,
                    committed: self.committed_version,
                });
                tracing::debug!(
                    target: "gridsync.state",
                    version,
                    committed = self.committed_version,
                    "stale layout dropped at dispatch"
                );
                continue;
            }

            let request = PersistRequest {
                ticket: CommitTicket {
                    epoch: self.epoch,
                    version,
                },
                layouts: change.layouts,
                origin: change.origin,
                hash: change.hash,
            };
            persisted += 1;
            match self.persister.persist(&request) {
                Ok(PersistStatus::Landed) => {
                    self.land(request.layouts, request.origin, request.hash, version, now_ms);
                }
                Ok(PersistStatus::InFlight) => {
                    self.events.push(StateEvent::PersistPending {
                        ticket: request.ticket,
                    });
                    self.in_flight.insert(
                        version,
                        InFlightWrite {
                            layouts: request.layouts,
                            origin: request.origin,
                            hash: request.hash,
                        },
                    );
                }
                Err(error) => self.fail(request.ticket, request.origin.source, error),
            }
        }
        persisted
    }

    fn land(
        &mut self,
        layouts: ResponsiveLayouts,
        origin: LayoutChangeOrigin,
        hash: ContentHash,
        version: u64,
        now_ms: u64,
    ) {
        self.committed = Some(layouts);
        self.committed_hash = Some(hash);
        self.committed_version = version;
        self.tracker.record_commit(CommitMetadata {
            version,
            hash,
            timestamp_ms: now_ms,
        });
        self.in_flight = self.in_flight.split_off(&(version + 1));
        self.stats.committed += 1;
        self.events.push(StateEvent::Committed {
            version,
            hash,
            source: origin.source,
        });
        tracing::debug!(
            target: "gridsync.state",
            source = %origin.source,
            version,
            hash = %hash.short(),
            "layout committed"
        );
    }

    fn fail(&mut self, ticket: CommitTicket, source: ChangeSource, error: PersistError) {
        self.tracker.abandon(ticket.version);
        // Fall back to the newest write storage may still accept, not to
        // the last confirmed one.
        let (survivor, survivor_hash) = match self.in_flight.last_key_value() {
            Some((_, write)) => (Some(&write.layouts), Some(write.hash)),
            None => (self.committed.as_ref(), self.committed_hash),
        };
        self.manager.set_last_dispatched(survivor_hash);
        if ticket.version == self.latest_version
            && let Some(survivor) = survivor
        {
            self.current = Some(survivor.clone());
            self.current_hash = survivor_hash;
        }
        let failure = PersistFailure {
            ticket,
            source,
            error,
        };
        self.stats.failed += 1;
        tracing::error!(
            target: "gridsync.state",
            source = %source,
            version = ticket.version,
            error = %failure.error,
            "layout persistence failed"
        );
        if let Some(handler) = self.error_handler.as_mut() {
            handler(&failure);
        }
        self.events.push(StateEvent::PersistFailed(failure));
    }

    /// Confirm a write the persister answered with `InFlight`.
    ///
    /// Returns false for tickets from a previous epoch, unknown tickets, and
    /// writes already superseded by a newer commit.
    pub fn confirm_persisted(&mut self, ticket: CommitTicket, now_ms: u64) -> bool {
        if ticket.epoch != self.epoch {
            tracing::debug!(
                target: "gridsync.state",
                epoch = ticket.epoch,
                current_epoch = self.epoch,
                version = ticket.version,
                "confirmation from previous page session ignored"
            );
            return false;
        }
        let Some(write) = self.in_flight.remove(&ticket.version) else {
            return false;
        };
        if ticket.version < self.committed_version {
            return false;
        }
        self.land(write.layouts, write.origin, write.hash, ticket.version, now_ms);
        true
    }

    /// Report that an `InFlight` write failed after all.
    pub fn report_persist_failure(&mut self, ticket: CommitTicket, error: PersistError) -> bool {
        if ticket.epoch != self.epoch {
            return false;
        }
        let Some(write) = self.in_flight.remove(&ticket.version) else {
            return false;
        };
        self.fail(ticket, write.origin.source, error);
        true
    }

    /// Hard reset for page navigation.
    ///
    /// Discards queued and in-flight writes, forgets every version and
    /// commit, and installs `layouts` (or the uninitialized state) as both
    /// the current and committed snapshot.
    pub fn reset_layouts(&mut self, layouts: Option<ResponsiveLayouts>) {
        let discarded = self.manager.pending_len() + self.in_flight.len();
        self.manager.clear();
        self.manager.reset_dispatched_hash();
        self.tracker.reset();
        self.in_flight.clear();
        self.committed_version = 0;
        self.latest_version = 0;
        self.epoch += 1;
        self.current = None;
        self.current_hash = None;
        self.committed = None;
        self.committed_hash = None;
        if let Some(layouts) = layouts {
            self.install_baseline(layouts);
        }
        self.events.push(StateEvent::Reset { epoch: self.epoch });
        tracing::debug!(
            target: "gridsync.state",
            epoch = self.epoch,
            discarded,
            initialized = self.current.is_some(),
            "layout state reset"
        );
    }

    // ---------------------------------------------------------------------
    // Operations
    // ---------------------------------------------------------------------

    pub fn start_operation(&mut self, id: OperationId, kind: OperationKind, now_ms: u64) {
        self.manager.start_operation(id, kind, now_ms);
    }

    pub fn stop_operation(&mut self, id: OperationId, now_ms: u64) -> bool {
        self.manager.stop_operation(id, now_ms)
    }

    #[must_use]
    pub fn has_active_operations(&self) -> bool {
        self.manager.has_active_operations()
    }

    // ---------------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.current.is_some()
    }

    /// Latest accepted snapshot.
    #[must_use]
    pub fn current_layouts(&self) -> Option<&ResponsiveLayouts> {
        self.current.as_ref()
    }

    /// Last snapshot that landed.
    #[must_use]
    pub fn get_committed_layouts(&self) -> Option<&ResponsiveLayouts> {
        self.committed.as_ref()
    }

    /// Whether `layouts` is semantically equal to the current snapshot.
    #[must_use]
    pub fn compare_with_current(&self, layouts: &ResponsiveLayouts) -> bool {
        self.current
            .as_ref()
            .is_some_and(|current| compare_semantically(current, layouts))
    }

    /// Hash of the current snapshot (of an empty layout when uninitialized).
    #[must_use]
    pub fn get_layout_hash(&self) -> ContentHash {
        self.current_hash
            .unwrap_or_else(|| content_hash(&ResponsiveLayouts::new()))
    }

    #[must_use]
    pub const fn committed_version(&self) -> u64 {
        self.committed_version
    }

    #[must_use]
    pub const fn latest_version(&self) -> u64 {
        self.latest_version
    }

    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn pending_commits(&self) -> Vec<PendingCommit> {
        self.tracker.get_pending_commits()
    }

    #[must_use]
    pub fn last_commit(&self) -> Option<CommitMetadata> {
        self.tracker.get_last_commit()
    }

    #[must_use]
    pub fn has_landed(&self, version: u64) -> bool {
        self.tracker.has_landed(version)
    }

    /// Writes the persister answered with `InFlight` and not yet settled.
    #[must_use]
    pub fn in_flight(&self) -> Vec<CommitTicket> {
        self.in_flight
            .keys()
            .map(|&version| CommitTicket {
                epoch: self.epoch,
                version,
            })
            .collect()
    }

    #[must_use]
    pub fn next_due_ms(&self) -> Option<u64> {
        self.manager.next_due_ms()
    }

    #[must_use]
    pub fn change_manager(&self) -> &LayoutChangeManager {
        &self.manager
    }

    #[must_use]
    pub fn commit_tracker(&self) -> &CommitTracker {
        &self.tracker
    }

    pub fn drain_events(&mut self) -> Vec<StateEvent> {
        std::mem::take(&mut self.events)
    }

    #[must_use]
    pub const fn stats(&self) -> StateStats {
        self.stats
    }
}
