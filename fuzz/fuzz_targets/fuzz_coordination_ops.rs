#![no_main]

use arbitrary::Arbitrary;
use gridsync_layout::{
    Breakpoint, ChangeSource, GridItem, LayoutChangeOrigin, LayoutItem, OperationKind,
    ResponsiveLayouts,
};
use gridsync_runtime::{
    CoordinationConfig, InteractionController, InteractionPhase, PersistMode, RecordingPersister,
    UnifiedLayoutState, UpdateOptions,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Op {
    Begin { resize: bool },
    Move { item: u8, x: u8, y: u8 },
    End,
    Cancel,
    Tick { advance: u16 },
    External { x: u8, y: u8 },
    Update { x: u8, y: u8, version: Option<u8> },
    Remove { item: u8 },
    SetMode { mode: u8 },
    Confirm,
    Reset,
}

fn page(offset: u32) -> ResponsiveLayouts {
    ResponsiveLayouts::new().with_breakpoint(
        Breakpoint::Desktop,
        (0..3u32)
            .map(|i| {
                LayoutItem::new(format!("m{i}"), "clock", "core")
                    .at((i * 3 + offset) % 12, 0)
                    .sized(2, 2)
            })
            .collect(),
    )
}

fuzz_target!(|ops: Vec<Op>| {
    let recorder = RecordingPersister::new();
    let config = CoordinationConfig::default();
    let layout = UnifiedLayoutState::new(Some(page(0)), recorder.clone(), &config);
    let mut ctl = InteractionController::new(layout, config.interaction, config.bounce);
    let mut now = 0u64;
    let mut committed = 0u64;
    let mut epoch = 0u64;

    for op in ops.into_iter().take(256) {
        match op {
            Op::Begin { resize } => {
                let kind = if resize { OperationKind::Resize } else { OperationKind::Drag };
                ctl.begin_gesture(kind, Breakpoint::Desktop, now);
            }
            Op::Move { item, x, y } => {
                let report = [GridItem::new(
                    format!("m{}", item % 3),
                    u32::from(x % 12),
                    u32::from(y % 12),
                    2,
                    2,
                )];
                ctl.apply_grid_change(Breakpoint::Desktop, &report, now);
            }
            Op::End => {
                ctl.end_gesture(now);
            }
            Op::Cancel => {
                ctl.cancel_gesture(now);
            }
            Op::Tick { advance } => {
                now += u64::from(advance);
                ctl.tick(now);
            }
            Op::External { x, y } => {
                let mut layouts = page(u32::from(x % 12));
                layouts.apply_grid_items(
                    Breakpoint::Desktop,
                    &[GridItem::new("m0", u32::from(x % 12), u32::from(y % 12), 2, 2)],
                );
                ctl.sync_external(layouts, now);
            }
            Op::Update { x, y, version } => {
                let mut origin = LayoutChangeOrigin::new(ChangeSource::UserDrag, now);
                if let Some(v) = version {
                    origin = origin.with_version(u64::from(v));
                }
                let layouts = page(u32::from(x % 12) + u32::from(y % 3));
                ctl.layout_state_mut()
                    .update_layouts(layouts, origin, &UpdateOptions::default(), now);
            }
            Op::Remove { item } => {
                ctl.remove_item(&format!("m{}", item % 3), now);
            }
            Op::SetMode { mode } => recorder.set_mode(match mode % 3 {
                0 => PersistMode::Land,
                1 => PersistMode::Defer,
                _ => PersistMode::Fail(gridsync_runtime::PersistError::Transport {
                    reason: "fuzz".into(),
                }),
            }),
            Op::Confirm => {
                if let Some(ticket) = ctl.layout_state().in_flight().first().copied() {
                    ctl.layout_state_mut().confirm_persisted(ticket, now);
                }
            }
            Op::Reset => {
                ctl.reset(Some(page(1)), now);
                assert_eq!(ctl.phase(), InteractionPhase::Idle);
                committed = 0;
            }
        }

        let state = ctl.layout_state();
        if state.epoch() != epoch {
            epoch = state.epoch();
            committed = 0;
        }
        assert!(state.committed_version() >= committed, "committed version went backwards");
        assert!(state.latest_version() >= state.committed_version());
        committed = state.committed_version();
        if !ctl.state().is_gesture() {
            assert!(ctl.working_layouts().is_none() || ctl.phase() != InteractionPhase::Idle);
        }
    }
});
