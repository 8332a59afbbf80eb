#![forbid(unsafe_code)]

//! Semantic equality and stable content hashing for [`ResponsiveLayouts`].
//!
//! Only the fields that define what the user sees on the grid participate:
//! `id`, `x`, `y`, `w`, `h`, `module_id` and `plugin_id`. Item order, size
//! bounds, flags and module configuration are ignored, and an empty
//! breakpoint is indistinguishable from an absent one.
//!
//! # Invariants
//!
//! 1. `compare_semantically(a, b)` implies `content_hash(a) == content_hash(b)`.
//! 2. Both functions are independent of item order within a breakpoint.
//! 3. The hash is stable across processes and platforms (BLAKE3 over a
//!    length-prefixed little-endian encoding).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Breakpoint, ItemRect, ResponsiveLayouts};

const HASH_DOMAIN: &[u8] = b"gridsync-layout/content/v1";

/// 32-byte BLAKE3 digest of the semantic projection of a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        self.0[..6].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SemanticItem<'a> {
    id: &'a str,
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    module_id: &'a str,
    plugin_id: &'a str,
}

fn projection(layouts: &ResponsiveLayouts) -> Vec<(Breakpoint, Vec<SemanticItem<'_>>)> {
    layouts
        .iter()
        .filter(|(_, items)| !items.is_empty())
        .map(|(bp, items)| {
            let mut projected: Vec<SemanticItem<'_>> = items
                .iter()
                .map(|item| SemanticItem {
                    id: &item.id,
                    x: item.x,
                    y: item.y,
                    w: item.w,
                    h: item.h,
                    module_id: &item.module_id,
                    plugin_id: &item.plugin_id,
                })
                .collect();
            projected.sort_unstable();
            (bp, projected)
        })
        .collect()
}

fn update_str(hasher: &mut blake3::Hasher, value: &str) {
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

/// Deterministic, order-independent digest of a layout.
#[must_use]
pub fn content_hash(layouts: &ResponsiveLayouts) -> ContentHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(HASH_DOMAIN);
    for (bp, items) in projection(layouts) {
        update_str(&mut hasher, bp.as_str());
        hasher.update(&(items.len() as u64).to_le_bytes());
        for item in items {
            update_str(&mut hasher, item.id);
            for field in [item.x, item.y, item.w, item.h] {
                hasher.update(&field.to_le_bytes());
            }
            update_str(&mut hasher, item.module_id);
            update_str(&mut hasher, item.plugin_id);
        }
    }
    ContentHash(*hasher.finalize().as_bytes())
}

/// True iff every breakpoint holds the same item set under
/// position/size/module identity.
#[must_use]
pub fn compare_semantically(a: &ResponsiveLayouts, b: &ResponsiveLayouts) -> bool {
    projection(a) == projection(b)
}

/// One semantic difference between two layouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemChange {
    Added {
        breakpoint: Breakpoint,
        id: String,
    },
    Removed {
        breakpoint: Breakpoint,
        id: String,
    },
    Moved {
        breakpoint: Breakpoint,
        id: String,
        from: ItemRect,
        to: ItemRect,
    },
    ModuleChanged {
        breakpoint: Breakpoint,
        id: String,
    },
}

/// List per-item differences from `before` to `after`, in breakpoint then id
/// order.
#[must_use]
pub fn semantic_diff(before: &ResponsiveLayouts, after: &ResponsiveLayouts) -> Vec<ItemChange> {
    let mut changes = Vec::new();
    for bp in Breakpoint::ALL {
        let old = before.items(bp);
        let new = after.items(bp);
        let mut ids: Vec<&str> = old.iter().chain(new).map(|item| item.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        for id in ids {
            let previous = old.iter().find(|item| item.id == id);
            let current = new.iter().find(|item| item.id == id);
            match (previous, current) {
                (None, Some(_)) => changes.push(ItemChange::Added {
                    breakpoint: bp,
                    id: id.to_owned(),
                }),
                (Some(_), None) => changes.push(ItemChange::Removed {
                    breakpoint: bp,
                    id: id.to_owned(),
                }),
                (Some(p), Some(c)) if !p.same_module(c) => {
                    changes.push(ItemChange::ModuleChanged {
                        breakpoint: bp,
                        id: id.to_owned(),
                    });
                }
                (Some(p), Some(c)) if p.rect() != c.rect() => changes.push(ItemChange::Moved {
                    breakpoint: bp,
                    id: id.to_owned(),
                    from: p.rect(),
                    to: c.rect(),
                }),
                _ => {}
            }
        }
    }
    changes
}
