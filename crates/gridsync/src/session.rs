#![forbid(unsafe_code)]

//! Clock-driven page session.
//!
//! [`PageSession`] is the imperative contract a UI host talks to: it owns an
//! [`InteractionController`] (and through it the [`UnifiedLayoutState`]) and
//! stamps every call with the session [`Clock`], so hosts never pass
//! timestamps around. Timers still only fire from [`PageSession::tick`]; a
//! host schedules its next wake-up with [`PageSession::next_deadline_ms`].

use gridsync_layout::{
    Breakpoint, ChangeSource, GridItem, LayoutChangeOrigin, LayoutItem, OperationId,
    OperationKind, ResponsiveLayouts,
};
use gridsync_runtime::{
    AddItemError, Clock, CoordinationConfig, FlushReport, GridChangeOutcome,
    InteractionController, InteractionPhase, InteractionState, InteractionTransition,
    LayoutPersister, MonotonicClock, PersistFailure, StateEvent, UnifiedLayoutState,
    UpdateOptions, UpdateOutcome,
};

/// One page's layout session.
#[derive(Debug)]
pub struct PageSession<C: Clock = MonotonicClock> {
    controller: InteractionController,
    clock: C,
}

impl PageSession<MonotonicClock> {
    /// Session with default thresholds on the wall clock.
    pub fn new(
        initial: Option<ResponsiveLayouts>,
        persister: impl LayoutPersister + 'static,
    ) -> Self {
        Self::with_clock(
            initial,
            persister,
            &CoordinationConfig::default(),
            MonotonicClock::new(),
        )
    }
}

impl<C: Clock> PageSession<C> {
    pub fn with_clock(
        initial: Option<ResponsiveLayouts>,
        persister: impl LayoutPersister + 'static,
        config: &CoordinationConfig,
        clock: C,
    ) -> Self {
        let layout = UnifiedLayoutState::new(initial, persister, config);
        Self {
            controller: InteractionController::new(layout, config.interaction, config.bounce),
            clock,
        }
    }

    fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn controller(&self) -> &InteractionController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut InteractionController {
        &mut self.controller
    }

    pub fn layout_state(&self) -> &UnifiedLayoutState {
        self.controller.layout_state()
    }

    pub fn set_error_handler(&mut self, handler: impl FnMut(&PersistFailure) + 'static) {
        self.controller.layout_state_mut().set_error_handler(handler);
    }

    // ---------------------------------------------------------------------
    // Layout state contract
    // ---------------------------------------------------------------------

    /// Submit a write from `source`, stamped with the session clock.
    pub fn update_layouts(
        &mut self,
        layouts: ResponsiveLayouts,
        source: ChangeSource,
        options: &UpdateOptions,
    ) -> UpdateOutcome {
        let now = self.now();
        self.update_with_origin(layouts, LayoutChangeOrigin::new(source, now), options)
    }

    /// Submit a write with a caller-built origin (operation id, version).
    pub fn update_with_origin(
        &mut self,
        layouts: ResponsiveLayouts,
        origin: LayoutChangeOrigin,
        options: &UpdateOptions,
    ) -> UpdateOutcome {
        let now = self.now();
        self.controller
            .layout_state_mut()
            .update_layouts(layouts, origin, options, now)
    }

    pub fn start_operation(&mut self, id: OperationId, kind: OperationKind) {
        let now = self.now();
        self.controller
            .layout_state_mut()
            .start_operation(id, kind, now);
    }

    pub fn stop_operation(&mut self, id: OperationId) -> bool {
        let now = self.now();
        self.controller.layout_state_mut().stop_operation(id, now)
    }

    pub fn flush(&mut self) -> FlushReport {
        let now = self.now();
        self.controller.layout_state_mut().flush(now)
    }

    pub fn drain_events(&mut self) -> Vec<StateEvent> {
        self.controller.layout_state_mut().drain_events()
    }

    // ---------------------------------------------------------------------
    // Interaction contract
    // ---------------------------------------------------------------------

    pub fn begin_drag(&mut self, breakpoint: Breakpoint) -> InteractionTransition {
        let now = self.now();
        self.controller
            .begin_gesture(OperationKind::Drag, breakpoint, now)
    }

    pub fn begin_resize(&mut self, breakpoint: Breakpoint) -> InteractionTransition {
        let now = self.now();
        self.controller
            .begin_gesture(OperationKind::Resize, breakpoint, now)
    }

    /// Raw grid-library report for one breakpoint.
    pub fn grid_changed(&mut self, breakpoint: Breakpoint, report: &[GridItem]) -> GridChangeOutcome {
        let now = self.now();
        self.controller.apply_grid_change(breakpoint, report, now)
    }

    pub fn end_gesture(&mut self) -> InteractionTransition {
        let now = self.now();
        self.controller.end_gesture(now)
    }

    pub fn cancel_gesture(&mut self) -> InteractionTransition {
        let now = self.now();
        self.controller.cancel_gesture(now)
    }

    /// Fire due timers.
    pub fn tick(&mut self) -> Vec<InteractionTransition> {
        let now = self.now();
        self.controller.tick(now)
    }

    pub fn add_item(
        &mut self,
        breakpoint: Breakpoint,
        item: LayoutItem,
    ) -> Result<UpdateOutcome, AddItemError> {
        let now = self.now();
        self.controller.add_item(breakpoint, item, now)
    }

    pub fn remove_item(&mut self, id: &str) -> UpdateOutcome {
        let now = self.now();
        self.controller.remove_item(id, now)
    }

    pub fn sync_external(&mut self, layouts: ResponsiveLayouts) -> UpdateOutcome {
        let now = self.now();
        self.controller.sync_external(layouts, now)
    }

    /// Page navigation.
    pub fn reset(&mut self, layouts: Option<ResponsiveLayouts>) -> InteractionTransition {
        let now = self.now();
        self.controller.reset(layouts, now)
    }

    // ---------------------------------------------------------------------
    // Views
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn phase(&self) -> InteractionPhase {
        self.controller.phase()
    }

    /// What the grid should render right now.
    #[must_use]
    pub fn display_layouts(&self) -> Option<ResponsiveLayouts> {
        self.controller.display_layouts()
    }

    #[must_use]
    pub fn committed_layouts(&self) -> Option<&ResponsiveLayouts> {
        self.layout_state().get_committed_layouts()
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do.
    #[must_use]
    pub fn next_deadline_ms(&self) -> Option<u64> {
        let timer = match self.controller.state() {
            InteractionState::Grace { commit_due_ms, .. } => Some(commit_due_ms),
            InteractionState::Commit { deadline_ms, .. } => Some(deadline_ms),
            _ => None,
        };
        match (timer, self.layout_state().next_due_ms()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}
