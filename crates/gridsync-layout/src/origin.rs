#![forbid(unsafe_code)]

//! Provenance of layout changes.
//!
//! Every mutation entering the coordinator carries a [`LayoutChangeOrigin`]
//! describing who produced it, when, under which gesture and (optionally)
//! against which version. Gating rules in the change manager and the
//! staleness guard in the unified state are driven entirely by this record.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Who produced a layout change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeSource {
    UserDrag,
    UserResize,
    UserRemove,
    UserBounceRecovery,
    ExternalSync,
    InitialLoad,
    DropAdd,
}

impl ChangeSource {
    /// Sources dispatched with the near-zero user debounce so the grid stays
    /// visually responsive.
    #[must_use]
    pub const fn is_user_originated(self) -> bool {
        matches!(
            self,
            Self::UserDrag | Self::UserResize | Self::DropAdd | Self::UserBounceRecovery
        )
    }

    /// Kebab-case name, also used as the default debounce key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserDrag => "user-drag",
            Self::UserResize => "user-resize",
            Self::UserRemove => "user-remove",
            Self::UserBounceRecovery => "user-bounce-recovery",
            Self::ExternalSync => "external-sync",
            Self::InitialLoad => "initial-load",
            Self::DropAdd => "drop-add",
        }
    }
}

impl fmt::Display for ChangeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of one drag or resize gesture.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OperationId(u64);

impl OperationId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Gesture kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Drag,
    Resize,
}

impl OperationKind {
    /// The change source used when this gesture commits.
    #[must_use]
    pub const fn change_source(self) -> ChangeSource {
        match self {
            Self::Drag => ChangeSource::UserDrag,
            Self::Resize => ChangeSource::UserResize,
        }
    }
}

/// Provenance record attached to every queued layout change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutChangeOrigin {
    pub source: ChangeSource,
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<OperationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl LayoutChangeOrigin {
    #[must_use]
    pub const fn new(source: ChangeSource, timestamp_ms: u64) -> Self {
        Self {
            source,
            timestamp_ms,
            operation_id: None,
            version: None,
        }
    }

    #[must_use]
    pub const fn with_operation(mut self, id: OperationId) -> Self {
        self.operation_id = Some(id);
        self
    }

    #[must_use]
    pub const fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }
}
