#![forbid(unsafe_code)]

//! Double-buffered drag/resize lifecycle.
//!
//! The [`InteractionController`] sits between the grid library and
//! [`UnifiedLayoutState`]. While a gesture is active, grid reports only touch
//! a disposable *working buffer* (what the renderer shows for the active
//! breakpoint); nothing reaches persistence until the gesture ends and its
//! scheduled commit fires.
//!
//! ```text
//! Idle -> Dragging|Resizing -> Grace -> Commit -> Idle
//!              \                 \
//!               `-> Idle (cancel) `-> Idle (cancel)
//! ```
//!
//! Every step returns an [`InteractionTransition`]. Steps the transition
//! table does not allow produce [`InteractionEffect::Noop`] and leave the
//! state untouched; they are never coerced into a valid transition.
//!
//! # Timing
//!
//! Like the rest of the engine the controller never reads a clock. A gesture
//! end schedules the commit at `now + commit_delay()`; [`tick`] fires it.
//! A commit waiting on asynchronous persistence returns to `Idle` once the
//! barrier resolves or `safety_timeout_ms()` elapses, whichever comes first.
//!
//! [`tick`]: InteractionController::tick

use std::collections::VecDeque;
use std::fmt;

use gridsync_layout::{
    BounceConfig, BounceDetector, BounceEvent, Breakpoint, ChangeSource, GridItem, ItemChange,
    LayoutChangeOrigin, LayoutItem, LayoutValidationError, OperationId, OperationKind,
    ResponsiveLayouts, semantic_diff,
};
use serde::{Deserialize, Serialize};

use crate::cancellation::{CancellationSource, CancellationToken};
use crate::commit_tracker::CommitBarrier;
use crate::unified_state::{UnifiedLayoutState, UpdateOptions, UpdateOutcome};

/// Default window after pointer-up in which grid events are late echoes.
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 300;
/// Default cap on the delay between gesture end and commit.
pub const DEFAULT_COMMIT_DELAY_CAP_MS: u64 = 40;
/// Lower bound for the commit safety timeout.
pub const DEFAULT_SAFETY_TIMEOUT_MIN_MS: u64 = 600;

const TRANSITION_HISTORY_LIMIT: usize = 64;

// =========================================================================
// Configuration
// =========================================================================

/// Gesture timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    pub grace_period_ms: u64,
    pub commit_delay_cap_ms: u64,
    /// Explicit commit delay, replacing `min(grace, cap)`.
    pub commit_delay_ms: Option<u64>,
    pub safety_timeout_min_ms: u64,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            commit_delay_cap_ms: DEFAULT_COMMIT_DELAY_CAP_MS,
            commit_delay_ms: None,
            safety_timeout_min_ms: DEFAULT_SAFETY_TIMEOUT_MIN_MS,
        }
    }
}

impl InteractionConfig {
    /// Delay between gesture end and the scheduled commit.
    #[must_use]
    pub fn commit_delay(&self) -> u64 {
        self.commit_delay_ms
            .unwrap_or_else(|| self.grace_period_ms.min(self.commit_delay_cap_ms))
    }

    /// Bound on how long a commit may wait for persistence.
    #[must_use]
    pub fn safety_timeout_ms(&self) -> u64 {
        self.grace_period_ms
            .saturating_mul(2)
            .max(self.safety_timeout_min_ms)
    }
}

// =========================================================================
// States and transitions
// =========================================================================

/// Tagless lifecycle phase, used by the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionPhase {
    Idle,
    Dragging,
    Resizing,
    Grace,
    Commit,
}

impl InteractionPhase {
    /// The transition table.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Dragging | Self::Resizing)
                | (Self::Dragging | Self::Resizing, Self::Grace | Self::Idle)
                | (Self::Grace, Self::Commit | Self::Idle)
                | (Self::Commit, Self::Idle)
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Dragging => "dragging",
            Self::Resizing => "resizing",
            Self::Grace => "grace",
            Self::Commit => "commit",
        }
    }
}

impl fmt::Display for InteractionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state with its per-phase data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionState {
    Idle,
    Dragging {
        operation: OperationId,
        breakpoint: Breakpoint,
        started_ms: u64,
    },
    Resizing {
        operation: OperationId,
        breakpoint: Breakpoint,
        started_ms: u64,
    },
    /// Gesture ended; late grid events are ignored until the commit fires.
    Grace {
        operation: OperationId,
        kind: OperationKind,
        breakpoint: Breakpoint,
        version: u64,
        commit_due_ms: u64,
    },
    /// Commit submitted; waiting for persistence to settle.
    Commit {
        operation: OperationId,
        breakpoint: Breakpoint,
        /// `None` when the gesture left the layout unchanged.
        version: Option<u64>,
        deadline_ms: u64,
    },
}

impl InteractionState {
    #[must_use]
    pub const fn phase(&self) -> InteractionPhase {
        match self {
            Self::Idle => InteractionPhase::Idle,
            Self::Dragging { .. } => InteractionPhase::Dragging,
            Self::Resizing { .. } => InteractionPhase::Resizing,
            Self::Grace { .. } => InteractionPhase::Grace,
            Self::Commit { .. } => InteractionPhase::Commit,
        }
    }

    #[must_use]
    pub const fn operation(&self) -> Option<OperationId> {
        match self {
            Self::Idle => None,
            Self::Dragging { operation, .. }
            | Self::Resizing { operation, .. }
            | Self::Grace { operation, .. }
            | Self::Commit { operation, .. } => Some(*operation),
        }
    }

    #[must_use]
    pub const fn breakpoint(&self) -> Option<Breakpoint> {
        match self {
            Self::Idle => None,
            Self::Dragging { breakpoint, .. }
            | Self::Resizing { breakpoint, .. }
            | Self::Grace { breakpoint, .. }
            | Self::Commit { breakpoint, .. } => Some(*breakpoint),
        }
    }

    /// Whether a pointer gesture is in progress.
    #[must_use]
    pub const fn is_gesture(&self) -> bool {
        matches!(self, Self::Dragging { .. } | Self::Resizing { .. })
    }
}

/// Why a step was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionNoopReason {
    /// The requested phase change is not in the transition table.
    InvalidTransition,
    GestureAlreadyActive,
    NoActiveGesture,
    /// A commit is waiting on persistence and cannot be aborted.
    CommitInProgress,
    /// No layout has been loaded yet.
    Uninitialized,
}

/// Effect of one lifecycle step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionEffect {
    GestureStarted {
        operation: OperationId,
        kind: OperationKind,
        breakpoint: Breakpoint,
    },
    CommitScheduled {
        version: u64,
        due_ms: u64,
    },
    CommitSubmitted {
        outcome: UpdateOutcome,
    },
    /// The commit's writes have settled; `landed` is false when persistence
    /// failed. A commit with nothing to write settles with `version: None`.
    CommitSettled {
        version: Option<u64>,
        landed: bool,
    },
    CommitTimedOut {
        version: Option<u64>,
    },
    Cancelled {
        operation: OperationId,
    },
    Reset,
    Noop {
        reason: InteractionNoopReason,
    },
}

/// One state-machine step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionTransition {
    pub transition_id: u64,
    pub from: InteractionState,
    pub to: InteractionState,
    pub effect: InteractionEffect,
}

impl InteractionTransition {
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        matches!(self.effect, InteractionEffect::Noop { .. })
    }
}

/// How an upstream grid report was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum GridChangeOutcome {
    /// Applied to the working buffer of the active gesture.
    Buffered { changed: usize },
    /// Arrived after pointer-up; ignored.
    LateEvent { phase: InteractionPhase },
    /// Report for a breakpoint other than the one being edited.
    OtherBreakpoint { active: Breakpoint },
    /// Matches the canonical snapshot.
    InSync,
    /// Reverses a just-committed move; `display` is the re-applied intended
    /// snapshot.
    BounceRejected {
        events: Vec<BounceEvent>,
        display: ResponsiveLayouts,
    },
    /// Differs from canonical outside a gesture; not persisted.
    Diverged { changes: Vec<ItemChange> },
    Uninitialized,
}

/// Why a drop/add was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum AddItemError {
    /// A gesture or commit is in progress.
    Busy { phase: InteractionPhase },
    /// Earlier writes have not settled yet.
    CommitsOutstanding { count: usize },
    Uninitialized,
    DuplicateItem { breakpoint: Breakpoint, id: String },
    Invalid(LayoutValidationError),
}

impl fmt::Display for AddItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy { phase } => write!(f, "cannot add an item while {phase}"),
            Self::CommitsOutstanding { count } => {
                write!(f, "{count} layout write(s) still in flight")
            }
            Self::Uninitialized => f.write_str("no layout loaded"),
            Self::DuplicateItem { breakpoint, id } => {
                write!(f, "item '{id}' already exists on {breakpoint}")
            }
            Self::Invalid(err) => write!(f, "resulting layout is invalid: {err}"),
        }
    }
}

impl std::error::Error for AddItemError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Invalid(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct ScheduledCommit {
    source: CancellationSource,
    token: CancellationToken,
}

/// `current` with the geometry of `working`'s items on `bp`. Items only
/// one side knows about are left as `current` has them.
fn overlay_working(
    current: &ResponsiveLayouts,
    working: &ResponsiveLayouts,
    bp: Breakpoint,
) -> ResponsiveLayouts {
    let report: Vec<GridItem> = working
        .items(bp)
        .iter()
        .map(|item| GridItem::new(item.id.clone(), item.x, item.y, item.w, item.h))
        .collect();
    let mut merged = current.clone();
    merged.apply_grid_items(bp, &report);
    merged
}

// =========================================================================
// Controller
// =========================================================================

/// Drag/resize lifecycle over a [`UnifiedLayoutState`].
#[derive(Debug)]
pub struct InteractionController {
    config: InteractionConfig,
    layout: UnifiedLayoutState,
    bounce: BounceDetector,
    state: InteractionState,
    working: Option<ResponsiveLayouts>,
    intended: Option<ResponsiveLayouts>,
    scheduled: Option<ScheduledCommit>,
    local_version: u64,
    next_operation: u64,
    transition_counter: u64,
    history: VecDeque<InteractionTransition>,
}

impl InteractionController {
    #[must_use]
    pub fn new(
        layout: UnifiedLayoutState,
        config: InteractionConfig,
        bounce: BounceConfig,
    ) -> Self {
        Self {
            config,
            layout,
            bounce: BounceDetector::new(bounce),
            state: InteractionState::Idle,
            working: None,
            intended: None,
            scheduled: None,
            local_version: 0,
            next_operation: 1,
            transition_counter: 0,
            history: VecDeque::with_capacity(TRANSITION_HISTORY_LIMIT),
        }
    }

    #[must_use]
    pub const fn config(&self) -> InteractionConfig {
        self.config
    }

    #[must_use]
    pub const fn state(&self) -> InteractionState {
        self.state
    }

    #[must_use]
    pub const fn phase(&self) -> InteractionPhase {
        self.state.phase()
    }

    #[must_use]
    pub const fn layout_state(&self) -> &UnifiedLayoutState {
        &self.layout
    }

    pub fn layout_state_mut(&mut self) -> &mut UnifiedLayoutState {
        &mut self.layout
    }

    #[must_use]
    pub const fn bounce_detector(&self) -> &BounceDetector {
        &self.bounce
    }

    /// Scratch copy edited by the active gesture.
    #[must_use]
    pub fn working_layouts(&self) -> Option<&ResponsiveLayouts> {
        self.working.as_ref()
    }

    /// Last snapshot a gesture commit intended to show.
    #[must_use]
    pub fn intended_layouts(&self) -> Option<&ResponsiveLayouts> {
        self.intended.as_ref()
    }

    /// Recent transitions, oldest first.
    pub fn transitions(&self) -> impl Iterator<Item = &InteractionTransition> + '_ {
        self.history.iter()
    }

    /// Token of the commit scheduled by the last gesture end. Cancelled when
    /// the gesture is cancelled, replaced or reset away.
    #[must_use]
    pub fn scheduled_commit(&self) -> Option<CancellationToken> {
        self.scheduled.as_ref().map(|scheduled| scheduled.token.clone())
    }

    /// What the renderer should show: the current snapshot with the working
    /// geometry laid over the breakpoint being edited.
    #[must_use]
    pub fn display_layouts(&self) -> Option<ResponsiveLayouts> {
        let current = self.layout.current_layouts()?;
        match (&self.working, self.state.breakpoint()) {
            (Some(working), Some(bp)) => Some(overlay_working(current, working, bp)),
            _ => Some(current.clone()),
        }
    }

    // ---------------------------------------------------------------------
    // Transition plumbing
    // ---------------------------------------------------------------------

    fn record(
        &mut self,
        from: InteractionState,
        effect: InteractionEffect,
    ) -> InteractionTransition {
        self.transition_counter = self.transition_counter.saturating_add(1);
        let transition = InteractionTransition {
            transition_id: self.transition_counter,
            from,
            to: self.state,
            effect,
        };
        if self.history.len() == TRANSITION_HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(transition.clone());
        transition
    }

    fn noop(&mut self, reason: InteractionNoopReason) -> InteractionTransition {
        tracing::warn!(
            target: "gridsync.interaction",
            phase = %self.state.phase(),
            ?reason,
            "interaction step rejected"
        );
        let from = self.state;
        self.record(from, InteractionEffect::Noop { reason })
    }

    /// Move to `next` if the table allows it.
    fn advance(
        &mut self,
        next: InteractionState,
        effect: InteractionEffect,
    ) -> InteractionTransition {
        let from = self.state;
        if !from.phase().can_transition_to(next.phase()) {
            return self.noop(InteractionNoopReason::InvalidTransition);
        }
        self.state = next;
        tracing::trace!(
            target: "gridsync.interaction",
            from = %from.phase(),
            to = %next.phase(),
            "interaction transition"
        );
        self.record(from, effect)
    }

    fn next_operation_id(&mut self) -> OperationId {
        let id = OperationId::new(self.next_operation);
        self.next_operation += 1;
        id
    }

    // ---------------------------------------------------------------------
    // Gesture lifecycle
    // ---------------------------------------------------------------------

    /// Pointer-down on an item: copy the canonical snapshot into the working
    /// buffer and start tracking the operation.
    pub fn begin_gesture(
        &mut self,
        kind: OperationKind,
        breakpoint: Breakpoint,
        now_ms: u64,
    ) -> InteractionTransition {
        if self.state.is_gesture() {
            return self.noop(InteractionNoopReason::GestureAlreadyActive);
        }
        let next_phase = match kind {
            OperationKind::Drag => InteractionPhase::Dragging,
            OperationKind::Resize => InteractionPhase::Resizing,
        };
        if !self.state.phase().can_transition_to(next_phase) {
            return self.noop(InteractionNoopReason::InvalidTransition);
        }
        let Some(current) = self.layout.current_layouts().cloned() else {
            return self.noop(InteractionNoopReason::Uninitialized);
        };

        let operation = self.next_operation_id();
        self.bounce.record_items(current.items(breakpoint), now_ms);
        self.working = Some(current);
        self.layout.start_operation(operation, kind, now_ms);

        let next = match kind {
            OperationKind::Drag => InteractionState::Dragging {
                operation,
                breakpoint,
                started_ms: now_ms,
            },
            OperationKind::Resize => InteractionState::Resizing {
                operation,
                breakpoint,
                started_ms: now_ms,
            },
        };
        tracing::debug!(
            target: "gridsync.interaction",
            %operation,
            ?kind,
            %breakpoint,
            "gesture started"
        );
        self.advance(
            next,
            InteractionEffect::GestureStarted {
                operation,
                kind,
                breakpoint,
            },
        )
    }

    /// Pointer-up: schedule the commit and enter the grace phase.
    pub fn end_gesture(&mut self, now_ms: u64) -> InteractionTransition {
        let (operation, kind, breakpoint) = match self.state {
            InteractionState::Dragging {
                operation,
                breakpoint,
                ..
            } => (operation, OperationKind::Drag, breakpoint),
            InteractionState::Resizing {
                operation,
                breakpoint,
                ..
            } => (operation, OperationKind::Resize, breakpoint),
            _ => return self.noop(InteractionNoopReason::NoActiveGesture),
        };

        self.local_version = self.local_version.max(self.layout.latest_version()) + 1;
        let version = self.local_version;
        let commit_due_ms = now_ms.saturating_add(self.config.commit_delay());
        let source = CancellationSource::new();
        let token = source.token();
        if let Some(previous) = self.scheduled.replace(ScheduledCommit { source, token }) {
            previous.source.cancel();
        }

        tracing::debug!(
            target: "gridsync.interaction",
            %operation,
            version,
            due_ms = commit_due_ms,
            "gesture ended; commit scheduled"
        );
        self.advance(
            InteractionState::Grace {
                operation,
                kind,
                breakpoint,
                version,
                commit_due_ms,
            },
            InteractionEffect::CommitScheduled {
                version,
                due_ms: commit_due_ms,
            },
        )
    }

    /// Abort the gesture (or its scheduled commit) without writing anything.
    pub fn cancel_gesture(&mut self, now_ms: u64) -> InteractionTransition {
        let operation = match self.state {
            InteractionState::Dragging { operation, .. }
            | InteractionState::Resizing { operation, .. }
            | InteractionState::Grace { operation, .. } => operation,
            InteractionState::Commit { .. } => {
                return self.noop(InteractionNoopReason::CommitInProgress);
            }
            InteractionState::Idle => return self.noop(InteractionNoopReason::NoActiveGesture),
        };
        if let Some(scheduled) = &self.scheduled {
            scheduled.source.cancel();
        }
        self.working = None;
        self.layout.stop_operation(operation, now_ms);
        tracing::debug!(
            target: "gridsync.interaction",
            %operation,
            "gesture cancelled"
        );
        self.advance(
            InteractionState::Idle,
            InteractionEffect::Cancelled { operation },
        )
    }

    /// Feed a raw grid report for one breakpoint.
    pub fn apply_grid_change(
        &mut self,
        breakpoint: Breakpoint,
        report: &[GridItem],
        now_ms: u64,
    ) -> GridChangeOutcome {
        match self.state {
            InteractionState::Dragging {
                breakpoint: active,
                ..
            }
            | InteractionState::Resizing {
                breakpoint: active,
                ..
            } => {
                if breakpoint != active {
                    return GridChangeOutcome::OtherBreakpoint { active };
                }
                let changed = self
                    .working
                    .as_mut()
                    .map_or(0, |working| working.apply_grid_items(breakpoint, report));
                GridChangeOutcome::Buffered { changed }
            }
            InteractionState::Grace { .. } | InteractionState::Commit { .. } => {
                tracing::debug!(
                    target: "gridsync.interaction",
                    phase = %self.state.phase(),
                    items = report.len(),
                    "late grid event ignored"
                );
                GridChangeOutcome::LateEvent {
                    phase: self.state.phase(),
                }
            }
            InteractionState::Idle => self.reconcile_idle_report(breakpoint, report, now_ms),
        }
    }

    fn reconcile_idle_report(
        &mut self,
        breakpoint: Breakpoint,
        report: &[GridItem],
        now_ms: u64,
    ) -> GridChangeOutcome {
        let Some(current) = self.layout.current_layouts() else {
            return GridChangeOutcome::Uninitialized;
        };
        let mut candidate = current.clone();
        if candidate.apply_grid_items(breakpoint, report) == 0 {
            return GridChangeOutcome::InSync;
        }

        let events = self.bounce.detect_in_items(report, now_ms);
        if !events.is_empty()
            && let Some(intended) = self.intended.clone()
        {
            for event in &events {
                tracing::debug!(
                    target: "gridsync.bounce",
                    item = %event.item_id,
                    from = %event.from,
                    reverted_to = %event.reverted_to,
                    elapsed_ms = event.elapsed_ms,
                    "bounce detected; re-applying intended layout"
                );
            }
            let origin = LayoutChangeOrigin::new(ChangeSource::UserBounceRecovery, now_ms);
            self.layout
                .update_layouts(intended.clone(), origin, &UpdateOptions::default(), now_ms);
            return GridChangeOutcome::BounceRejected {
                events,
                display: intended,
            };
        }

        let changes = semantic_diff(current, &candidate);
        tracing::debug!(
            target: "gridsync.interaction",
            %breakpoint,
            changes = changes.len(),
            "idle grid report diverges from canonical layout"
        );
        GridChangeOutcome::Diverged { changes }
    }

    /// Drive timers: dispatch due writes, fire a scheduled commit, resolve a
    /// commit waiting on persistence.
    pub fn tick(&mut self, now_ms: u64) -> Vec<InteractionTransition> {
        self.layout.poll(now_ms);
        match self.state {
            InteractionState::Grace { commit_due_ms, .. } if now_ms >= commit_due_ms => {
                self.run_commit(now_ms)
            }
            InteractionState::Commit { deadline_ms, .. } => {
                let barrier = self.layout.barrier(now_ms);
                if barrier.is_resolved() {
                    vec![self.settle(&barrier, now_ms)]
                } else if now_ms >= deadline_ms {
                    vec![self.time_out(now_ms)]
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }

    fn run_commit(&mut self, now_ms: u64) -> Vec<InteractionTransition> {
        let InteractionState::Grace {
            operation,
            kind,
            breakpoint,
            version,
            ..
        } = self.state
        else {
            return Vec::new();
        };
        let span = tracing::debug_span!("interaction.commit", %operation, version);
        let _guard = span.enter();

        let armed = self
            .scheduled
            .take()
            .is_some_and(|scheduled| !scheduled.token.is_cancelled());
        if !armed {
            tracing::debug!(
                target: "gridsync.interaction",
                %operation,
                "scheduled commit was cancelled"
            );
            return vec![self.cancel_gesture(now_ms)];
        }
        // Writes accepted during the gesture live in `current`; only the
        // edited breakpoint's geometry comes from the working copy.
        let Some(current) = self.layout.current_layouts() else {
            return vec![self.cancel_gesture(now_ms)];
        };
        let layouts = match self.working.take() {
            Some(working) => overlay_working(current, &working, breakpoint),
            None => current.clone(),
        };

        let origin = LayoutChangeOrigin::new(kind.change_source(), now_ms)
            .with_operation(operation)
            .with_version(version);
        let outcome =
            self.layout
                .update_layouts(layouts.clone(), origin, &UpdateOptions::default(), now_ms);
        if matches!(
            outcome,
            UpdateOutcome::Accepted { .. } | UpdateOutcome::NoOp
        ) {
            self.bounce.record_items(layouts.items(breakpoint), now_ms);
            self.intended = Some(layouts);
        }
        let assigned = match outcome {
            UpdateOutcome::Accepted { version, .. } => Some(version),
            UpdateOutcome::NoOp => None,
            _ => Some(self.layout.latest_version()),
        };

        let deadline_ms = now_ms.saturating_add(self.config.safety_timeout_ms());
        let submitted = self.advance(
            InteractionState::Commit {
                operation,
                breakpoint,
                version: assigned,
                deadline_ms,
            },
            InteractionEffect::CommitSubmitted { outcome },
        );

        let report = self.layout.flush(now_ms);
        let mut transitions = vec![submitted];
        if report.barrier.is_resolved() {
            transitions.push(self.settle(&report.barrier, now_ms));
        } else {
            tracing::debug!(
                target: "gridsync.interaction",
                deadline_ms,
                "commit waiting on persistence"
            );
        }
        transitions
    }

    fn finish(&mut self, now_ms: u64, effect: InteractionEffect) -> InteractionTransition {
        if let Some(operation) = self.state.operation() {
            self.layout.stop_operation(operation, now_ms);
        }
        self.working = None;
        self.advance(InteractionState::Idle, effect)
    }

    fn settle(&mut self, barrier: &CommitBarrier, now_ms: u64) -> InteractionTransition {
        let InteractionState::Commit { version, .. } = self.state else {
            return self.noop(InteractionNoopReason::InvalidTransition);
        };
        if let CommitBarrier::TimedOut { abandoned, .. } = barrier {
            tracing::warn!(
                target: "gridsync.interaction",
                version,
                abandoned = abandoned.len(),
                "commit flush timed out; returning to idle"
            );
            return self.finish(now_ms, InteractionEffect::CommitTimedOut { version });
        }
        let landed = version.is_none_or(|version| self.layout.has_landed(version));
        tracing::info!(
            target: "gridsync.interaction",
            version,
            landed,
            committed_version = self.layout.committed_version(),
            "layout commit settled"
        );
        self.finish(
            now_ms,
            InteractionEffect::CommitSettled { version, landed },
        )
    }

    fn time_out(&mut self, now_ms: u64) -> InteractionTransition {
        let version = match self.state {
            InteractionState::Commit { version, .. } => version,
            _ => None,
        };
        tracing::warn!(
            target: "gridsync.interaction",
            version,
            safety_timeout_ms = self.config.safety_timeout_ms(),
            "commit safety timeout elapsed; returning to idle"
        );
        self.finish(now_ms, InteractionEffect::CommitTimedOut { version })
    }

    // ---------------------------------------------------------------------
    // Discrete edits
    // ---------------------------------------------------------------------

    /// Drop a new item onto the grid.
    ///
    /// Waits for nothing: if earlier writes have not settled the call is
    /// refused, and the host retries after the next `tick`.
    pub fn add_item(
        &mut self,
        breakpoint: Breakpoint,
        item: LayoutItem,
        now_ms: u64,
    ) -> Result<UpdateOutcome, AddItemError> {
        if self.state != InteractionState::Idle {
            return Err(AddItemError::Busy {
                phase: self.state.phase(),
            });
        }
        let report = self.layout.flush(now_ms);
        if let CommitBarrier::Waiting { outstanding, .. } = &report.barrier {
            return Err(AddItemError::CommitsOutstanding {
                count: outstanding.len(),
            });
        }
        let Some(mut base) = self.layout.get_committed_layouts().cloned() else {
            return Err(AddItemError::Uninitialized);
        };
        if base.item(breakpoint, &item.id).is_some() {
            return Err(AddItemError::DuplicateItem {
                breakpoint,
                id: item.id,
            });
        }
        let id = item.id.clone();
        base.insert_item(breakpoint, item);
        base.validate().map_err(AddItemError::Invalid)?;

        let origin = LayoutChangeOrigin::new(ChangeSource::DropAdd, now_ms);
        let outcome = self
            .layout
            .update_layouts(base, origin, &UpdateOptions::default(), now_ms);
        tracing::debug!(
            target: "gridsync.interaction",
            item = %id,
            %breakpoint,
            accepted = outcome.is_accepted(),
            "item dropped onto grid"
        );
        Ok(outcome)
    }

    /// Remove an item from every breakpoint.
    pub fn remove_item(&mut self, id: &str, now_ms: u64) -> UpdateOutcome {
        let Some(mut next) = self.layout.current_layouts().cloned() else {
            return UpdateOutcome::NoOp;
        };
        if next.remove_item_everywhere(id) == 0 {
            return UpdateOutcome::NoOp;
        }
        if let Some(working) = self.working.as_mut() {
            working.remove_item_everywhere(id);
        }
        if let Some(intended) = self.intended.as_mut() {
            intended.remove_item_everywhere(id);
        }
        self.bounce.forget(id);
        let origin = LayoutChangeOrigin::new(ChangeSource::UserRemove, now_ms);
        self.layout
            .update_layouts(next, origin, &UpdateOptions::default(), now_ms)
    }

    /// Apply an authoritative layout pushed from outside. Blocked while a
    /// gesture is in progress.
    pub fn sync_external(&mut self, layouts: ResponsiveLayouts, now_ms: u64) -> UpdateOutcome {
        let origin = LayoutChangeOrigin::new(ChangeSource::ExternalSync, now_ms);
        self.layout
            .update_layouts(layouts, origin, &UpdateOptions::default(), now_ms)
    }

    /// Page change: drop every buffer, schedule and history, and reset the
    /// layout state. Bypasses the transition table.
    pub fn reset(
        &mut self,
        layouts: Option<ResponsiveLayouts>,
        now_ms: u64,
    ) -> InteractionTransition {
        if let Some(scheduled) = &self.scheduled {
            scheduled.source.cancel();
        }
        let from = self.state;
        self.working = None;
        self.intended = None;
        self.bounce.clear();
        self.local_version = 0;
        self.layout.reset_layouts(layouts);
        self.state = InteractionState::Idle;
        tracing::debug!(
            target: "gridsync.interaction",
            from = %from.phase(),
            now_ms,
            "interaction reset"
        );
        self.record(from, InteractionEffect::Reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinationConfig;
    use crate::persist::{NullPersister, PersistMode, RecordingPersister};
    use gridsync_layout::ItemRect;

    fn initial() -> ResponsiveLayouts {
        ResponsiveLayouts::new()
            .with_breakpoint(
                Breakpoint::Desktop,
                vec![
                    LayoutItem::new("m1", "clock", "core").sized(2, 2),
                    LayoutItem::new("m2", "notes", "core").at(4, 0).sized(2, 2),
                ],
            )
            .with_breakpoint(
                Breakpoint::Mobile,
                vec![LayoutItem::new("m1", "clock", "core").sized(1, 1)],
            )
    }

    fn controller_with(persister: impl crate::persist::LayoutPersister + 'static) -> InteractionController {
        let config = CoordinationConfig::default();
        let layout = UnifiedLayoutState::new(Some(initial()), persister, &config);
        InteractionController::new(layout, config.interaction, config.bounce)
    }

    fn controller() -> InteractionController {
        controller_with(NullPersister)
    }

    fn drag_m1_to(ctl: &mut InteractionController, x: u32, y: u32, now: u64) {
        ctl.begin_gesture(OperationKind::Drag, Breakpoint::Desktop, now);
        ctl.apply_grid_change(
            Breakpoint::Desktop,
            &[GridItem::new("m1", x, y, 2, 2)],
            now + 1,
        );
        ctl.end_gesture(now + 2);
    }

    fn committed_m1(ctl: &InteractionController) -> ItemRect {
        ctl.layout_state()
            .get_committed_layouts()
            .and_then(|l| l.item(Breakpoint::Desktop, "m1"))
            .map(LayoutItem::rect)
            .expect("m1 committed")
    }

    #[test]
    fn config_derives_delay_and_timeout() {
        let config = InteractionConfig::default();
        assert_eq!(config.commit_delay(), 40);
        assert_eq!(config.safety_timeout_ms(), 600);
        let slow = InteractionConfig {
            grace_period_ms: 500,
            commit_delay_ms: Some(5),
            ..config
        };
        assert_eq!(slow.commit_delay(), 5);
        assert_eq!(slow.safety_timeout_ms(), 1_000);
    }

    #[test]
    fn transition_table() {
        use InteractionPhase::*;
        assert!(Idle.can_transition_to(Dragging));
        assert!(Dragging.can_transition_to(Grace));
        assert!(Grace.can_transition_to(Commit));
        assert!(Commit.can_transition_to(Idle));
        assert!(!Grace.can_transition_to(Dragging));
        assert!(!Idle.can_transition_to(Commit));
        assert!(!Commit.can_transition_to(Grace));
    }

    #[test]
    fn full_drag_lifecycle_commits_working_buffer() {
        let mut ctl = controller();
        let start = ctl.begin_gesture(OperationKind::Drag, Breakpoint::Desktop, 0);
        assert_eq!(start.from, InteractionState::Idle);
        assert_eq!(start.to.phase(), InteractionPhase::Dragging);

        let outcome =
            ctl.apply_grid_change(Breakpoint::Desktop, &[GridItem::new("m1", 3, 1, 2, 2)], 10);
        assert_eq!(outcome, GridChangeOutcome::Buffered { changed: 1 });
        // Nothing reaches the layout state while dragging.
        assert_eq!(committed_m1(&ctl), ItemRect::new(0, 0, 2, 2));
        assert_eq!(ctl.layout_state().latest_version(), 0);

        let end = ctl.end_gesture(20);
        assert!(matches!(
            end.effect,
            InteractionEffect::CommitScheduled { version: 1, due_ms: 60 }
        ));
        assert!(ctl.tick(59).is_empty());

        let steps = ctl.tick(60);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].to.phase(), InteractionPhase::Commit);
        assert!(matches!(
            steps[1].effect,
            InteractionEffect::CommitSettled { landed: true, .. }
        ));
        assert_eq!(ctl.phase(), InteractionPhase::Idle);
        assert_eq!(committed_m1(&ctl), ItemRect::new(3, 1, 2, 2));
        assert!(ctl.working_layouts().is_none());
    }

    #[test]
    fn display_uses_working_buffer_only_for_active_breakpoint() {
        let mut ctl = controller();
        ctl.begin_gesture(OperationKind::Resize, Breakpoint::Mobile, 0);
        ctl.apply_grid_change(Breakpoint::Mobile, &[GridItem::new("m1", 0, 0, 1, 3)], 1);
        let display = ctl.display_layouts().expect("display");
        assert_eq!(
            display.item(Breakpoint::Mobile, "m1").map(LayoutItem::rect),
            Some(ItemRect::new(0, 0, 1, 3))
        );
        assert_eq!(
            display.item(Breakpoint::Desktop, "m1").map(LayoutItem::rect),
            Some(ItemRect::new(0, 0, 2, 2))
        );
        assert_eq!(
            ctl.apply_grid_change(Breakpoint::Desktop, &[GridItem::new("m1", 5, 5, 2, 2)], 2),
            GridChangeOutcome::OtherBreakpoint {
                active: Breakpoint::Mobile
            }
        );
    }

    #[test]
    fn late_events_in_grace_are_ignored() {
        let mut ctl = controller();
        drag_m1_to(&mut ctl, 3, 1, 0);
        let late =
            ctl.apply_grid_change(Breakpoint::Desktop, &[GridItem::new("m1", 0, 0, 2, 2)], 5);
        assert_eq!(
            late,
            GridChangeOutcome::LateEvent {
                phase: InteractionPhase::Grace
            }
        );
        ctl.tick(100);
        assert_eq!(committed_m1(&ctl), ItemRect::new(3, 1, 2, 2));
    }

    #[test]
    fn invalid_transitions_are_noops() {
        let mut ctl = controller();
        assert!(ctl.end_gesture(0).is_noop());
        assert!(ctl.cancel_gesture(0).is_noop());

        drag_m1_to(&mut ctl, 3, 1, 0);
        let rejected = ctl.begin_gesture(OperationKind::Drag, Breakpoint::Desktop, 3);
        assert_eq!(
            rejected.effect,
            InteractionEffect::Noop {
                reason: InteractionNoopReason::InvalidTransition
            }
        );
        assert_eq!(ctl.phase(), InteractionPhase::Grace);

        let mut ctl = controller();
        ctl.begin_gesture(OperationKind::Drag, Breakpoint::Desktop, 0);
        let again = ctl.begin_gesture(OperationKind::Resize, Breakpoint::Desktop, 1);
        assert_eq!(
            again.effect,
            InteractionEffect::Noop {
                reason: InteractionNoopReason::GestureAlreadyActive
            }
        );
    }

    #[test]
    fn cancel_during_gesture_writes_nothing() {
        let recorder = RecordingPersister::new();
        let mut ctl = controller_with(recorder.clone());
        ctl.begin_gesture(OperationKind::Drag, Breakpoint::Desktop, 0);
        ctl.apply_grid_change(Breakpoint::Desktop, &[GridItem::new("m1", 3, 1, 2, 2)], 1);
        let cancel = ctl.cancel_gesture(2);
        assert!(matches!(cancel.effect, InteractionEffect::Cancelled { .. }));
        ctl.tick(1_000);
        assert!(recorder.is_empty());
        assert_eq!(ctl.layout_state().latest_version(), 0);
    }

    #[test]
    fn cancel_in_grace_cancels_scheduled_commit() {
        let recorder = RecordingPersister::new();
        let mut ctl = controller_with(recorder.clone());
        drag_m1_to(&mut ctl, 3, 1, 0);
        let token = ctl.scheduled_commit().expect("commit scheduled");
        assert!(!token.is_cancelled());
        let cancel = ctl.cancel_gesture(10);
        assert_eq!(cancel.from.phase(), InteractionPhase::Grace);
        assert!(token.is_cancelled());
        assert!(ctl.tick(500).is_empty());
        assert!(recorder.is_empty());
        assert_eq!(committed_m1(&ctl), ItemRect::new(0, 0, 2, 2));
    }

    #[test]
    fn cancelled_token_suppresses_due_commit() {
        let recorder = RecordingPersister::new();
        let mut ctl = controller_with(recorder.clone());
        drag_m1_to(&mut ctl, 3, 1, 0);
        if let Some(scheduled) = &ctl.scheduled {
            scheduled.source.cancel();
        }
        assert_eq!(ctl.phase(), InteractionPhase::Grace);

        let steps = ctl.tick(100);
        assert_eq!(steps.len(), 1);
        assert!(matches!(steps[0].effect, InteractionEffect::Cancelled { .. }));
        assert_eq!(ctl.phase(), InteractionPhase::Idle);
        assert!(recorder.is_empty());
        assert_eq!(committed_m1(&ctl), ItemRect::new(0, 0, 2, 2));
    }

    #[test]
    fn fired_commit_releases_its_token() {
        let mut ctl = controller();
        drag_m1_to(&mut ctl, 3, 1, 0);
        let token = ctl.scheduled_commit().expect("commit scheduled");
        ctl.tick(42);
        assert!(ctl.scheduled_commit().is_none());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn unchanged_gesture_settles_without_version() {
        let recorder = RecordingPersister::new();
        let mut ctl = controller_with(recorder.clone());
        drag_m1_to(&mut ctl, 0, 0, 0);
        let steps = ctl.tick(42);
        assert_eq!(steps.len(), 2);
        assert_eq!(
            steps[0].effect,
            InteractionEffect::CommitSubmitted {
                outcome: UpdateOutcome::NoOp
            }
        );
        assert_eq!(
            steps[1].effect,
            InteractionEffect::CommitSettled {
                version: None,
                landed: true
            }
        );
        assert!(recorder.is_empty());
    }

    #[test]
    fn commit_keeps_items_added_to_edited_breakpoint_mid_gesture() {
        let mut ctl = controller();
        ctl.begin_gesture(OperationKind::Drag, Breakpoint::Desktop, 0);
        ctl.apply_grid_change(Breakpoint::Desktop, &[GridItem::new("m1", 3, 1, 2, 2)], 1);

        let mut dropped = initial();
        dropped.insert_item(
            Breakpoint::Desktop,
            LayoutItem::new("m3", "weather", "core").at(0, 4).sized(2, 2),
        );
        let origin = LayoutChangeOrigin::new(ChangeSource::DropAdd, 2);
        assert!(
            ctl.layout_state_mut()
                .update_layouts(dropped, origin, &UpdateOptions::default(), 2)
                .is_accepted()
        );
        ctl.tick(2);
        let display = ctl.display_layouts().expect("display");
        assert!(display.item(Breakpoint::Desktop, "m3").is_some());

        ctl.end_gesture(3);
        ctl.tick(43);
        let committed = ctl.layout_state().get_committed_layouts().expect("committed");
        assert!(committed.item(Breakpoint::Desktop, "m3").is_some());
        assert_eq!(committed_m1(&ctl), ItemRect::new(3, 1, 2, 2));
        assert_eq!(ctl.display_layouts().as_ref(), Some(committed));
    }

    #[test]
    fn deferred_persistence_holds_commit_until_confirmed() {
        let recorder = RecordingPersister::new();
        recorder.set_mode(PersistMode::Defer);
        let mut ctl = controller_with(recorder.clone());
        drag_m1_to(&mut ctl, 3, 1, 0);
        let steps = ctl.tick(42);
        assert_eq!(steps.len(), 1);
        assert_eq!(ctl.phase(), InteractionPhase::Commit);
        assert!(ctl.cancel_gesture(43).is_noop());

        let ticket = recorder.last_request().expect("request").ticket;
        assert!(ctl.layout_state_mut().confirm_persisted(ticket, 50));
        let steps = ctl.tick(51);
        assert!(matches!(
            steps[0].effect,
            InteractionEffect::CommitSettled { landed: true, .. }
        ));
        assert_eq!(ctl.phase(), InteractionPhase::Idle);
    }

    #[test]
    fn safety_timeout_returns_to_idle() {
        let recorder = RecordingPersister::new();
        recorder.set_mode(PersistMode::Defer);
        let mut ctl = controller_with(recorder);
        drag_m1_to(&mut ctl, 3, 1, 0);
        ctl.tick(42);
        assert!(ctl.tick(42 + 599).is_empty());
        let steps = ctl.tick(42 + 600);
        assert!(matches!(
            steps[0].effect,
            InteractionEffect::CommitTimedOut { .. }
        ));
        assert_eq!(ctl.phase(), InteractionPhase::Idle);
        assert_eq!(committed_m1(&ctl), ItemRect::new(0, 0, 2, 2));
    }

    #[test]
    fn bounce_after_commit_reapplies_intended() {
        let mut ctl = controller();
        drag_m1_to(&mut ctl, 3, 1, 0);
        ctl.tick(42);
        let outcome =
            ctl.apply_grid_change(Breakpoint::Desktop, &[GridItem::new("m1", 0, 0, 2, 2)], 100);
        match outcome {
            GridChangeOutcome::BounceRejected { events, display } => {
                assert_eq!(events.len(), 1);
                assert_eq!(
                    display.item(Breakpoint::Desktop, "m1").map(LayoutItem::rect),
                    Some(ItemRect::new(3, 1, 2, 2))
                );
            }
            other => panic!("expected bounce, got {other:?}"),
        }
        ctl.tick(101);
        assert_eq!(committed_m1(&ctl), ItemRect::new(3, 1, 2, 2));
    }

    #[test]
    fn idle_divergence_is_reported_not_persisted() {
        let recorder = RecordingPersister::new();
        let mut ctl = controller_with(recorder.clone());
        let outcome =
            ctl.apply_grid_change(Breakpoint::Desktop, &[GridItem::new("m2", 8, 0, 2, 2)], 5);
        assert!(matches!(outcome, GridChangeOutcome::Diverged { ref changes } if changes.len() == 1));
        assert_eq!(
            ctl.apply_grid_change(Breakpoint::Desktop, &[GridItem::new("m2", 4, 0, 2, 2)], 6),
            GridChangeOutcome::InSync
        );
        ctl.tick(1_000);
        assert!(recorder.is_empty());
    }

    #[test]
    fn add_item_inserts_against_committed_snapshot() {
        let mut ctl = controller();
        let outcome = ctl
            .add_item(
                Breakpoint::Desktop,
                LayoutItem::new("m3", "weather", "core").at(0, 4).sized(2, 2),
                0,
            )
            .expect("added");
        assert!(outcome.is_accepted());
        ctl.tick(0);
        let committed = ctl.layout_state().get_committed_layouts().expect("committed");
        assert!(committed.item(Breakpoint::Desktop, "m3").is_some());
        assert_eq!(committed.items(Breakpoint::Desktop).len(), 3);
    }

    #[test]
    fn add_item_rejections() {
        let mut ctl = controller();
        let dup = ctl.add_item(Breakpoint::Desktop, LayoutItem::new("m1", "clock", "core"), 0);
        assert!(matches!(dup, Err(AddItemError::DuplicateItem { .. })));

        let mismatch = ctl.add_item(
            Breakpoint::Tablet,
            LayoutItem::new("m1", "notes", "core"),
            0,
        );
        assert!(matches!(mismatch, Err(AddItemError::Invalid(_))));

        ctl.begin_gesture(OperationKind::Drag, Breakpoint::Desktop, 0);
        let busy = ctl.add_item(Breakpoint::Desktop, LayoutItem::new("m9", "x", "core"), 1);
        assert_eq!(
            busy,
            Err(AddItemError::Busy {
                phase: InteractionPhase::Dragging
            })
        );
    }

    #[test]
    fn add_item_waits_for_outstanding_writes() {
        let recorder = RecordingPersister::new();
        recorder.set_mode(PersistMode::Defer);
        let mut ctl = controller_with(recorder);
        ctl.remove_item("m2", 0);
        let refused = ctl.add_item(Breakpoint::Desktop, LayoutItem::new("m3", "x", "core"), 1);
        assert_eq!(refused, Err(AddItemError::CommitsOutstanding { count: 1 }));
    }

    #[test]
    fn remove_item_removes_everywhere() {
        let mut ctl = controller();
        assert!(ctl.remove_item("m1", 0).is_accepted());
        assert_eq!(ctl.remove_item("missing", 0), UpdateOutcome::NoOp);
        ctl.layout_state_mut().flush(200);
        let committed = ctl.layout_state().get_committed_layouts().expect("committed");
        assert!(committed.item(Breakpoint::Desktop, "m1").is_none());
        assert!(committed.item(Breakpoint::Mobile, "m1").is_none());
    }

    #[test]
    fn external_sync_blocked_during_gesture() {
        let mut ctl = controller();
        ctl.begin_gesture(OperationKind::Drag, Breakpoint::Desktop, 0);
        let pushed = initial().with_breakpoint(Breakpoint::Wide, Vec::new());
        let mut moved = initial();
        if let Some(item) = moved.item_mut(Breakpoint::Desktop, "m2") {
            item.x = 9;
        }
        assert!(matches!(
            ctl.sync_external(moved, 1),
            UpdateOutcome::Blocked { .. }
        ));
        assert_eq!(ctl.sync_external(pushed, 2), UpdateOutcome::NoOp);
    }

    #[test]
    fn reset_cancels_everything() {
        let mut ctl = controller();
        drag_m1_to(&mut ctl, 3, 1, 0);
        let token = ctl.scheduled_commit().expect("commit scheduled");
        let reset = ctl.reset(None, 10);
        assert!(token.is_cancelled());
        assert_eq!(reset.effect, InteractionEffect::Reset);
        assert_eq!(reset.from.phase(), InteractionPhase::Grace);
        assert!(ctl.tick(1_000).is_empty());
        assert!(!ctl.layout_state().is_initialized());
        assert!(ctl.display_layouts().is_none());
        assert!(
            ctl.begin_gesture(OperationKind::Drag, Breakpoint::Desktop, 1_001)
                .is_noop()
        );
    }

    #[test]
    fn transition_ids_are_monotonic_and_history_bounded() {
        let mut ctl = controller();
        for i in 0..100 {
            ctl.end_gesture(i);
        }
        let ids: Vec<u64> = ctl.transitions().map(|t| t.transition_id).collect();
        assert_eq!(ids.len(), TRANSITION_HISTORY_LIMIT);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ids.last(), Some(&100));
    }
}
