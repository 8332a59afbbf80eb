#![forbid(unsafe_code)]

//! Layout change coordination runtime.
//!
//! Reduces a noisy stream of grid mutations (drag and resize motion,
//! programmatic add/remove, externally pushed layouts) to one canonical,
//! versioned snapshot that is safe to persist.
//!
//! Components, leaf first:
//!
//! - [`change_manager`]: debounced, deduplicated change queue with
//!   operation-aware gating.
//! - [`commit_tracker`]: pending vs. landed writes and the commit barrier.
//! - [`persist`]: the seam to the page persistence collaborator.
//! - [`unified_state`]: owner of the canonical snapshot and its write path.
//! - [`interaction`]: the drag/resize double buffer state machine.
//! - [`config`]: every threshold above as data.
//!
//! The engine is single-threaded and deterministic: time enters only as
//! `now_ms` arguments, and timers are deadlines fired by `poll` / `tick`.
//! [`clock`] provides time sources for hosts.

pub mod cancellation;
pub mod change_manager;
pub mod clock;
pub mod commit_tracker;
pub mod config;
pub mod interaction;
pub mod persist;
pub mod unified_state;

pub use cancellation::{CancellationSource, CancellationToken};
pub use change_manager::{
    ChangeManagerConfig, ChangeManagerStats, DebounceKey, DispatchBatch, DispatchedChange,
    LayoutChangeManager, OperationStatus, QueueOutcome, TrackedOperation,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use commit_tracker::{
    CommitBarrier, CommitMetadata, CommitTracker, CommitTrackerConfig, PendingCommit,
};
pub use config::{ConfigError, CoordinationConfig};
pub use interaction::{
    AddItemError, GridChangeOutcome, InteractionConfig, InteractionController, InteractionEffect,
    InteractionNoopReason, InteractionPhase, InteractionState, InteractionTransition,
};
pub use persist::{
    CommitTicket, LayoutPersister, NullPersister, PersistError, PersistFailure, PersistMode,
    PersistRequest, PersistStatus, RecordingPersister,
};
pub use unified_state::{
    FlushReport, StateEvent, StateStats, UnifiedLayoutState, UpdateOptions, UpdateOutcome,
};
