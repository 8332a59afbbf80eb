#![forbid(unsafe_code)]

//! Responsive grid layout model for gridsync.
//!
//! This crate holds the pure data side of the layout coordination engine:
//!
//! - [`model`]: [`LayoutItem`], [`Breakpoint`] and [`ResponsiveLayouts`], plus
//!   normalization of raw grid-library reports ([`GridItem`]).
//! - [`origin`]: provenance of a layout change ([`LayoutChangeOrigin`]).
//! - [`hash`]: semantic equality and a stable [`ContentHash`].
//! - [`bounce`]: A→B→A reversal detection for just-finished gestures.
//!
//! Nothing in here reads the clock or performs I/O; timestamps are supplied
//! by the caller as milliseconds on a host-chosen monotonic timeline.

pub mod bounce;
pub mod hash;
pub mod model;
pub mod origin;

pub use bounce::{BounceConfig, BounceDetector, BounceEvent, PositionSample};
pub use hash::{ContentHash, ItemChange, compare_semantically, content_hash, semantic_diff};
pub use model::{
    Breakpoint, GridItem, ItemRect, LayoutItem, LayoutValidationError, ParseBreakpointError,
    ResponsiveLayouts,
};
pub use origin::{ChangeSource, LayoutChangeOrigin, OperationId, OperationKind};
