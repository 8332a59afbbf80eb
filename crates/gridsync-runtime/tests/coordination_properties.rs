#![forbid(unsafe_code)]

//! End-to-end properties of the coordination engine: idempotence, staleness
//! rejection, coalescing, bounce recovery, the flush barrier, and the
//! drag / external-sync / page-reset scenarios.
//!
//! Run:
//!   cargo test -p gridsync-runtime --test coordination_properties

use gridsync_layout::{
    Breakpoint, ChangeSource, GridItem, ItemRect, LayoutChangeOrigin, LayoutItem, OperationId,
    OperationKind, ResponsiveLayouts,
};
use gridsync_runtime::{
    ChangeManagerConfig, CommitBarrier, CoordinationConfig, GridChangeOutcome,
    InteractionController, InteractionPhase, LayoutChangeManager, PersistMode, QueueOutcome,
    PersistError, RecordingPersister, UnifiedLayoutState, UpdateOptions, UpdateOutcome,
};

// ============================================================================
// Fixtures
// ============================================================================

fn page(items: &[(&str, u32, u32)]) -> ResponsiveLayouts {
    ResponsiveLayouts::new().with_breakpoint(
        Breakpoint::Desktop,
        items
            .iter()
            .map(|&(id, x, y)| LayoutItem::new(id, format!("mod-{id}"), "core").at(x, y).sized(2, 2))
            .collect(),
    )
}

fn state(recorder: &RecordingPersister) -> UnifiedLayoutState {
    UnifiedLayoutState::new(
        Some(page(&[("m1", 0, 0)])),
        recorder.clone(),
        &CoordinationConfig::default(),
    )
}

fn controller(recorder: &RecordingPersister) -> InteractionController {
    let config = CoordinationConfig::default();
    let layout = UnifiedLayoutState::new(Some(page(&[("m1", 0, 0)])), recorder.clone(), &config);
    InteractionController::new(layout, config.interaction, config.bounce)
}

fn drag(ts: u64) -> LayoutChangeOrigin {
    LayoutChangeOrigin::new(ChangeSource::UserDrag, ts)
}

fn external(ts: u64) -> LayoutChangeOrigin {
    LayoutChangeOrigin::new(ChangeSource::ExternalSync, ts)
}

fn committed_rect(layout: &UnifiedLayoutState, id: &str) -> Option<ItemRect> {
    layout
        .get_committed_layouts()
        .and_then(|l| l.item(Breakpoint::Desktop, id))
        .map(LayoutItem::rect)
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn idempotent_updates_write_once() {
    let recorder = RecordingPersister::new();
    let mut layout = state(&recorder);
    let target = page(&[("m1", 4, 4)]);
    let opts = UpdateOptions::default();

    let first = layout.update_layouts(target.clone(), drag(0), &opts, 0);
    let second = layout.update_layouts(target.clone(), drag(1), &opts, 1);
    assert!(first.is_accepted());
    assert_eq!(second, UpdateOutcome::NoOp);

    layout.flush(2);
    let third = layout.update_layouts(target, drag(3), &opts, 3);
    assert_eq!(third, UpdateOutcome::NoOp);
    layout.flush(4);
    assert_eq!(recorder.len(), 1);
}

#[test]
fn stale_update_leaves_committed_state_untouched() {
    let recorder = RecordingPersister::new();
    let mut layout = state(&recorder);
    let opts = UpdateOptions::default();
    for x in 1..=5u32 {
        layout.update_layouts(page(&[("m1", x, 0)]), drag(u64::from(x)), &opts, u64::from(x));
        layout.poll(u64::from(x));
    }
    assert_eq!(layout.committed_version(), 5);
    let before = layout.get_committed_layouts().cloned();

    let outcome = layout.update_layouts(page(&[("m1", 9, 9)]), drag(10).with_version(3), &opts, 10);
    assert_eq!(
        outcome,
        UpdateOutcome::Stale {
            incoming: 3,
            committed: 5
        }
    );
    layout.flush(11);
    assert_eq!(layout.committed_version(), 5);
    assert_eq!(layout.get_committed_layouts().cloned(), before);
}

#[test]
fn rapid_drag_events_under_one_operation_dispatch_once() {
    let mut manager = LayoutChangeManager::new(ChangeManagerConfig {
        user_debounce_ms: 16,
        ..ChangeManagerConfig::default()
    });
    let op = OperationId::new(7);
    for x in 1..=20u32 {
        let outcome = manager.queue_layout_change(
            page(&[("m1", x, 0)]),
            drag(u64::from(x)).with_operation(op),
            None,
            None,
            u64::from(x),
        );
        assert!(matches!(outcome, QueueOutcome::Queued { .. }));
    }
    assert!(manager.poll(20).is_empty());
    let batch = manager.poll(36);
    assert_eq!(batch.delivered.len(), 1);
    assert_eq!(batch.delivered[0].layouts, page(&[("m1", 20, 0)]));
    assert_eq!(manager.stats().coalesced, 19);
}

#[test]
fn bounce_is_replaced_by_intended_position() {
    let recorder = RecordingPersister::new();
    let mut ctl = controller(&recorder);

    ctl.begin_gesture(OperationKind::Drag, Breakpoint::Desktop, 1_000);
    ctl.apply_grid_change(Breakpoint::Desktop, &[GridItem::new("m1", 3, 1, 2, 2)], 1_010);
    ctl.end_gesture(1_020);
    ctl.tick(1_060);
    assert_eq!(ctl.phase(), InteractionPhase::Idle);

    // Stale recompute reports the pre-drag position (A -> B -> A).
    let outcome =
        ctl.apply_grid_change(Breakpoint::Desktop, &[GridItem::new("m1", 0, 0, 2, 2)], 1_150);
    let GridChangeOutcome::BounceRejected { display, .. } = outcome else {
        panic!("expected bounce rejection, got {outcome:?}");
    };
    assert_eq!(
        display.item(Breakpoint::Desktop, "m1").map(LayoutItem::rect),
        Some(ItemRect::new(3, 1, 2, 2))
    );
    ctl.tick(1_200);
    assert_eq!(
        committed_rect(ctl.layout_state(), "m1"),
        Some(ItemRect::new(3, 1, 2, 2))
    );

    // Outside the window the same report is an ordinary divergence.
    let late =
        ctl.apply_grid_change(Breakpoint::Desktop, &[GridItem::new("m1", 0, 0, 2, 2)], 2_000);
    assert!(matches!(late, GridChangeOutcome::Diverged { .. }));
}

#[test]
fn flush_barrier_commits_last_accepted_payload() {
    let recorder = RecordingPersister::new();
    let mut layout = state(&recorder);
    let opts = UpdateOptions::default();
    let mut last_accepted = None;
    let updates = [
        (page(&[("m1", 1, 0)]), external(0)),
        (page(&[("m1", 2, 0)]), drag(1)),
        (page(&[("m1", 2, 0)]), drag(2)),
        (page(&[("m1", 1, 1)]), drag(3).with_version(0)),
        (page(&[("m1", 5, 5)]), external(4)),
    ];
    for (layouts, origin) in updates {
        let ts = origin.timestamp_ms;
        if layout.update_layouts(layouts.clone(), origin, &opts, ts).is_accepted() {
            last_accepted = Some(layouts);
        }
    }
    let report = layout.flush(10);
    assert!(matches!(report.barrier, CommitBarrier::Settled { .. }));
    assert_eq!(layout.get_committed_layouts().cloned(), last_accepted);
}

#[test]
fn writes_accepted_mid_gesture_survive_the_gesture_commit() {
    let recorder = RecordingPersister::new();
    let mut ctl = controller(&recorder);

    ctl.begin_gesture(OperationKind::Drag, Breakpoint::Desktop, 0);
    ctl.apply_grid_change(Breakpoint::Desktop, &[GridItem::new("m1", 4, 2, 2, 2)], 5);

    let mut dropped = page(&[("m1", 0, 0)]);
    dropped.insert_item(
        Breakpoint::Mobile,
        LayoutItem::new("m9", "mod-m9", "core").sized(1, 1),
    );
    let origin = LayoutChangeOrigin::new(ChangeSource::DropAdd, 10);
    let outcome = ctl
        .layout_state_mut()
        .update_layouts(dropped, origin, &UpdateOptions::default(), 10);
    assert!(matches!(outcome, UpdateOutcome::Accepted { version: 1, .. }));
    ctl.tick(10);
    assert_eq!(ctl.layout_state().committed_version(), 1);

    ctl.end_gesture(20);
    ctl.tick(20 + ctl.config().commit_delay());
    assert_eq!(ctl.phase(), InteractionPhase::Idle);

    let committed = ctl
        .layout_state()
        .get_committed_layouts()
        .cloned()
        .expect("committed layout");
    assert!(committed.item(Breakpoint::Mobile, "m9").is_some());
    assert_eq!(
        committed_rect(ctl.layout_state(), "m1"),
        Some(ItemRect::new(4, 2, 2, 2))
    );
    assert_eq!(ctl.display_layouts(), Some(committed));
    assert_eq!(recorder.len(), 2);
}

#[test]
fn out_of_order_persist_results_converge_display_and_storage() {
    let recorder = RecordingPersister::new();
    recorder.set_mode(PersistMode::Defer);
    let mut layout = state(&recorder);
    let opts = UpdateOptions::default();

    layout.update_layouts(page(&[("m1", 4, 0)]), drag(0), &opts, 0);
    layout.poll(0);
    let first = recorder.last_request().expect("first write").ticket;
    layout.update_layouts(page(&[("m1", 8, 0)]), drag(1), &opts, 1);
    layout.poll(1);
    let second = recorder.last_request().expect("second write").ticket;

    // The newer write fails first, then the older one lands.
    assert!(layout.report_persist_failure(
        second,
        PersistError::Transport {
            reason: "connection reset".into()
        }
    ));
    assert!(layout.confirm_persisted(first, 2));
    assert_eq!(layout.current_layouts(), layout.get_committed_layouts());
    assert_eq!(
        committed_rect(&layout, "m1"),
        Some(ItemRect::new(4, 0, 2, 2))
    );

    recorder.set_mode(PersistMode::Land);
    let back = layout.update_layouts(page(&[("m1", 0, 0)]), drag(3), &opts, 3);
    assert!(back.is_accepted());
    assert!(layout.flush(4).barrier.is_resolved());
    assert_eq!(layout.current_layouts(), layout.get_committed_layouts());
    assert_eq!(
        committed_rect(&layout, "m1"),
        Some(ItemRect::new(0, 0, 2, 2))
    );
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn scenario_drag_commit_updates_canonical_item() {
    let recorder = RecordingPersister::new();
    let mut ctl = controller(&recorder);

    ctl.begin_gesture(OperationKind::Drag, Breakpoint::Desktop, 0);
    ctl.apply_grid_change(Breakpoint::Desktop, &[GridItem::new("m1", 1, 0, 2, 2)], 5);
    ctl.apply_grid_change(Breakpoint::Desktop, &[GridItem::new("m1", 3, 1, 2, 2)], 10);
    ctl.end_gesture(15);
    ctl.tick(15 + ctl.config().commit_delay());

    let committed = ctl
        .layout_state()
        .get_committed_layouts()
        .expect("committed layout");
    let m1 = &committed.items(Breakpoint::Desktop)[0];
    assert_eq!(m1.id, "m1");
    assert_eq!(m1.rect(), ItemRect::new(3, 1, 2, 2));
    assert_eq!(recorder.len(), 1);
    assert_eq!(
        recorder.last_request().map(|r| r.origin.source),
        Some(ChangeSource::UserDrag)
    );
}

#[test]
fn scenario_external_sync_blocked_during_drag() {
    let recorder = RecordingPersister::new();
    let mut ctl = controller(&recorder);

    ctl.begin_gesture(OperationKind::Drag, Breakpoint::Desktop, 0);
    ctl.apply_grid_change(Breakpoint::Desktop, &[GridItem::new("m1", 6, 2, 2, 2)], 5);
    let first = ctl.sync_external(page(&[("m1", 8, 8)]), 10);
    let second = ctl.sync_external(page(&[("m1", 9, 9)]), 20);
    assert!(matches!(first, UpdateOutcome::Blocked { .. }));
    assert!(matches!(second, UpdateOutcome::Blocked { .. }));
    assert_eq!(
        committed_rect(ctl.layout_state(), "m1"),
        Some(ItemRect::new(0, 0, 2, 2))
    );

    ctl.end_gesture(30);
    // A late echo during grace is still blocked.
    assert!(matches!(
        ctl.sync_external(page(&[("m1", 8, 8)]), 40),
        UpdateOutcome::Blocked { .. }
    ));
    ctl.tick(70);
    assert_eq!(
        committed_rect(ctl.layout_state(), "m1"),
        Some(ItemRect::new(6, 2, 2, 2))
    );
    assert_eq!(recorder.len(), 1);
}

#[test]
fn scenario_reset_drops_pre_reset_writes() {
    let recorder = RecordingPersister::new();
    recorder.set_mode(PersistMode::Defer);
    let mut layout = state(&recorder);
    let opts = UpdateOptions::default();

    layout.update_layouts(page(&[("m1", 1, 1)]), drag(0), &opts, 0);
    layout.poll(0);
    let in_flight = recorder.last_request().expect("in flight").ticket;
    layout.update_layouts(page(&[("m1", 2, 2)]), external(1), &opts, 1);

    layout.reset_layouts(None);
    let other_page = page(&[("w1", 0, 0), ("w2", 2, 0)]);
    let outcome = layout.update_layouts(other_page.clone(), external(2), &opts, 2);
    assert!(outcome.is_accepted());

    assert!(!layout.confirm_persisted(in_flight, 3));
    recorder.set_mode(PersistMode::Land);
    layout.flush(200);

    let writes = recorder.requests();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[1].layouts, other_page);
    assert_eq!(writes[1].ticket.epoch, 1);
    assert_eq!(layout.get_committed_layouts(), Some(&other_page));
    assert!(committed_rect(&layout, "m1").is_none());
}
