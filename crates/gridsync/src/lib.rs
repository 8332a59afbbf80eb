#![forbid(unsafe_code)]

//! gridsync public facade crate.
//!
//! Re-exports the layout model and the coordination runtime, and adds
//! [`PageSession`], a clock-driven wrapper that UI hosts drive with
//! pointer events, grid reports and periodic ticks.
//!
//! ```
//! use gridsync::prelude::*;
//!
//! let page = ResponsiveLayouts::new().with_breakpoint(
//!     Breakpoint::Desktop,
//!     vec![LayoutItem::new("m1", "clock", "core").sized(2, 2)],
//! );
//! let mut session = PageSession::new(Some(page), NullPersister);
//! session.begin_drag(Breakpoint::Desktop);
//! session.grid_changed(Breakpoint::Desktop, &[GridItem::new("m1", 4, 0, 2, 2)]);
//! session.end_gesture();
//! assert_eq!(session.phase(), InteractionPhase::Grace);
//! ```

#[cfg(feature = "tracing-subscriber")]
pub mod logging;
pub mod session;

pub use session::PageSession;

// --- Layout re-exports -----------------------------------------------------

pub use gridsync_layout::{
    BounceConfig, BounceEvent, Breakpoint, ChangeSource, ContentHash, GridItem, ItemChange,
    ItemRect, LayoutChangeOrigin, LayoutItem, LayoutValidationError, OperationId, OperationKind,
    ResponsiveLayouts, compare_semantically, content_hash, semantic_diff,
};

// --- Runtime re-exports ----------------------------------------------------

pub use gridsync_runtime::{
    AddItemError, CancellationToken, Clock, CommitBarrier, CommitMetadata, CommitTicket, ConfigError,
    CoordinationConfig, FlushReport, GridChangeOutcome, InteractionEffect, InteractionPhase,
    InteractionTransition, LayoutPersister, ManualClock, MonotonicClock, NullPersister,
    PersistError, PersistFailure, PersistRequest, PersistStatus, StateEvent, UpdateOptions,
    UpdateOutcome,
};

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        Breakpoint, ChangeSource, CommitBarrier, CoordinationConfig, GridChangeOutcome, GridItem,
        InteractionPhase, LayoutItem, LayoutPersister, NullPersister, PageSession, PersistError,
        PersistRequest, PersistStatus, ResponsiveLayouts, UpdateOptions, UpdateOutcome,
    };

    pub use crate::{layout, runtime};
}

pub use gridsync_layout as layout;
pub use gridsync_runtime as runtime;
