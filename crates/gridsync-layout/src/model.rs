#![forbid(unsafe_code)]

//! Layout entity model: items placed on a responsive grid.
//!
//! A [`ResponsiveLayouts`] maps each [`Breakpoint`] to the items placed in
//! that bucket. Item order carries no meaning; the item identifier is the key.
//!
//! # Invariants
//!
//! 1. Item identifiers are unique within a breakpoint.
//! 2. An identifier present in several breakpoints refers to the same module
//!    (`module_id` and `plugin_id` agree).
//! 3. Positions and sizes are grid cells; they are unsigned by construction.
//!
//! [`ResponsiveLayouts::validate`] reports violations of (1) and (2). The
//! coordination layer never validates on its own: callers that construct new
//! items (drop/add) validate before submitting.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =========================================================================
// Breakpoints
// =========================================================================

/// Named responsive layout bucket, ordered from narrowest to widest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Breakpoint {
    Mobile,
    Tablet,
    Desktop,
    Wide,
    Ultrawide,
}

impl Breakpoint {
    /// All breakpoints in ascending width order.
    pub const ALL: [Breakpoint; 5] = [
        Breakpoint::Mobile,
        Breakpoint::Tablet,
        Breakpoint::Desktop,
        Breakpoint::Wide,
        Breakpoint::Ultrawide,
    ];

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
            Self::Desktop => "desktop",
            Self::Wide => "wide",
            Self::Ultrawide => "ultrawide",
        }
    }
}

impl fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a breakpoint name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseBreakpointError {
    pub name: String,
}

impl fmt::Display for ParseBreakpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown breakpoint {:?}", self.name)
    }
}

impl std::error::Error for ParseBreakpointError {}

impl FromStr for Breakpoint {
    type Err = ParseBreakpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|bp| bp.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseBreakpointError { name: s.to_owned() })
    }
}

// =========================================================================
// Geometry
// =========================================================================

/// Position and size of one item, in grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ItemRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl ItemRect {
    #[must_use]
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }
}

impl fmt::Display for ItemRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{} {}x{})", self.x, self.y, self.w, self.h)
    }
}

/// Raw item geometry as reported by the grid library for one breakpoint.
///
/// The grid library knows nothing about modules; it only moves boxes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridItem {
    #[serde(rename = "i", alias = "id")]
    pub id: String,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl GridItem {
    #[must_use]
    pub fn new(id: impl Into<String>, x: u32, y: u32, w: u32, h: u32) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            w,
            h,
        }
    }

    #[must_use]
    pub const fn rect(&self) -> ItemRect {
        ItemRect::new(self.x, self.y, self.w, self.h)
    }
}

// =========================================================================
// Layout items
// =========================================================================

fn default_true() -> bool {
    true
}

/// One placed module on the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutItem {
    /// Identifier, stable for the lifetime of the placed module.
    #[serde(rename = "i", alias = "id")]
    pub id: String,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_h: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_h: Option<u32>,
    #[serde(default)]
    pub module_id: String,
    #[serde(default)]
    pub plugin_id: String,
    /// Opaque module configuration; never inspected by the coordinator.
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default = "default_true")]
    pub is_draggable: bool,
    #[serde(default = "default_true")]
    pub is_resizable: bool,
    #[serde(default, rename = "static")]
    pub is_static: bool,
}

impl LayoutItem {
    /// Create a 1x1 item at the origin.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        module_id: impl Into<String>,
        plugin_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            x: 0,
            y: 0,
            w: 1,
            h: 1,
            min_w: None,
            max_w: None,
            min_h: None,
            max_h: None,
            module_id: module_id.into(),
            plugin_id: plugin_id.into(),
            config: serde_json::Value::Null,
            is_draggable: true,
            is_resizable: true,
            is_static: false,
        }
    }

    /// Set the position (builder pattern).
    #[must_use]
    pub fn at(mut self, x: u32, y: u32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    /// Set the size (builder pattern).
    #[must_use]
    pub fn sized(mut self, w: u32, h: u32) -> Self {
        self.w = w;
        self.h = h;
        self
    }

    /// Attach opaque module configuration (builder pattern).
    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Mark the item static: not draggable, not resizable.
    #[must_use]
    pub fn pinned(mut self) -> Self {
        self.is_static = true;
        self.is_draggable = false;
        self.is_resizable = false;
        self
    }

    #[must_use]
    pub const fn rect(&self) -> ItemRect {
        ItemRect::new(self.x, self.y, self.w, self.h)
    }

    pub fn set_rect(&mut self, rect: ItemRect) {
        self.x = rect.x;
        self.y = rect.y;
        self.w = rect.w;
        self.h = rect.h;
    }

    /// Whether two items refer to the same module.
    #[must_use]
    pub fn same_module(&self, other: &Self) -> bool {
        self.module_id == other.module_id && self.plugin_id == other.plugin_id
    }
}

// =========================================================================
// Responsive layouts
// =========================================================================

/// Items per breakpoint. Order within a breakpoint is not significant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponsiveLayouts {
    layouts: BTreeMap<Breakpoint, Vec<LayoutItem>>,
}

impl ResponsiveLayouts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the items of one breakpoint (builder pattern).
    #[must_use]
    pub fn with_breakpoint(mut self, bp: Breakpoint, items: Vec<LayoutItem>) -> Self {
        self.layouts.insert(bp, items);
        self
    }

    /// Items of a breakpoint; empty when the breakpoint is absent.
    #[must_use]
    pub fn items(&self, bp: Breakpoint) -> &[LayoutItem] {
        self.layouts.get(&bp).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn item(&self, bp: Breakpoint, id: &str) -> Option<&LayoutItem> {
        self.items(bp).iter().find(|item| item.id == id)
    }

    pub fn item_mut(&mut self, bp: Breakpoint, id: &str) -> Option<&mut LayoutItem> {
        self.layouts
            .get_mut(&bp)
            .and_then(|items| items.iter_mut().find(|item| item.id == id))
    }

    /// Replace the items of a breakpoint.
    pub fn set_items(&mut self, bp: Breakpoint, items: Vec<LayoutItem>) {
        self.layouts.insert(bp, items);
    }

    /// Insert an item, replacing any item with the same id in that breakpoint.
    pub fn insert_item(&mut self, bp: Breakpoint, item: LayoutItem) {
        let items = self.layouts.entry(bp).or_default();
        match items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
    }

    /// Remove an item from every breakpoint. Returns how many were removed.
    pub fn remove_item_everywhere(&mut self, id: &str) -> usize {
        let mut removed = 0;
        for items in self.layouts.values_mut() {
            let before = items.len();
            items.retain(|item| item.id != id);
            removed += before - items.len();
        }
        removed
    }

    /// Breakpoints that are present (possibly with zero items).
    pub fn breakpoints(&self) -> impl Iterator<Item = Breakpoint> + '_ {
        self.layouts.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Breakpoint, &[LayoutItem])> + '_ {
        self.layouts.iter().map(|(bp, items)| (*bp, items.as_slice()))
    }

    /// Total number of placed items across all breakpoints.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.layouts.values().map(Vec::len).sum()
    }

    /// True when no breakpoint holds any item.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }

    /// Merge a raw grid-library report into this model.
    ///
    /// Matching items take the reported geometry and keep their module
    /// identity, configuration and flags. Reported ids without a model item
    /// are ignored; model items missing from the report are kept. Returns the
    /// number of items whose geometry changed.
    pub fn apply_grid_items(&mut self, bp: Breakpoint, report: &[GridItem]) -> usize {
        let Some(items) = self.layouts.get_mut(&bp) else {
            return 0;
        };
        let mut changed = 0;
        for grid_item in report {
            if let Some(item) = items.iter_mut().find(|item| item.id == grid_item.id) {
                let rect = grid_item.rect();
                if item.rect() != rect {
                    item.set_rect(rect);
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Check identifier uniqueness, non-zero sizes and cross-breakpoint
    /// module agreement.
    pub fn validate(&self) -> Result<(), LayoutValidationError> {
        let mut modules: BTreeMap<&str, (&str, &str)> = BTreeMap::new();
        for (bp, items) in &self.layouts {
            let mut seen: Vec<&str> = Vec::with_capacity(items.len());
            for item in items {
                if item.id.is_empty() {
                    return Err(LayoutValidationError::EmptyItemId { breakpoint: *bp });
                }
                if seen.contains(&item.id.as_str()) {
                    return Err(LayoutValidationError::DuplicateItem {
                        breakpoint: *bp,
                        id: item.id.clone(),
                    });
                }
                seen.push(&item.id);
                if item.w == 0 || item.h == 0 {
                    return Err(LayoutValidationError::ZeroSize {
                        breakpoint: *bp,
                        id: item.id.clone(),
                    });
                }
                let identity = (item.module_id.as_str(), item.plugin_id.as_str());
                match modules.get(item.id.as_str()) {
                    Some(first) if *first != identity => {
                        return Err(LayoutValidationError::ModuleMismatch {
                            id: item.id.clone(),
                            first: format!("{}/{}", first.1, first.0),
                            second: format!("{}/{}", identity.1, identity.0),
                        });
                    }
                    Some(_) => {}
                    None => {
                        modules.insert(&item.id, identity);
                    }
                }
            }
        }
        Ok(())
    }
}

impl FromIterator<(Breakpoint, Vec<LayoutItem>)> for ResponsiveLayouts {
    fn from_iter<I: IntoIterator<Item = (Breakpoint, Vec<LayoutItem>)>>(iter: I) -> Self {
        Self {
            layouts: iter.into_iter().collect(),
        }
    }
}

/// Structural problems found by [`ResponsiveLayouts::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutValidationError {
    /// Two items share an id within one breakpoint.
    DuplicateItem { breakpoint: Breakpoint, id: String },
    /// The same id names different modules in different breakpoints.
    ModuleMismatch {
        id: String,
        first: String,
        second: String,
    },
    /// An item has an empty identifier.
    EmptyItemId { breakpoint: Breakpoint },
    /// An item has zero width or height.
    ZeroSize { breakpoint: Breakpoint, id: String },
}

impl fmt::Display for LayoutValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateItem { breakpoint, id } => {
                write!(f, "duplicate item {id:?} in breakpoint {breakpoint}")
            }
            Self::ModuleMismatch { id, first, second } => write!(
                f,
                "item {id:?} refers to module {first} and {second} in different breakpoints"
            ),
            Self::EmptyItemId { breakpoint } => {
                write!(f, "item with empty id in breakpoint {breakpoint}")
            }
            Self::ZeroSize { breakpoint, id } => {
                write!(f, "item {id:?} in breakpoint {breakpoint} has zero size")
            }
        }
    }
}

impl std::error::Error for LayoutValidationError {}
