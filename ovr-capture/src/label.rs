//! Labels map human readable names to the 32-bit IDs used on the wire.
//!
//! A label is registered with a context the first time it is used there. The registry keeps
//! every registered name so that a newly connected client receives the full table before any
//! event that references it.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use ovr_capture_core::string_hash32;
use crate::sync::SpinLock;

pub struct Label {
    hash: u32,
    name: Cow<'static, str>,
    /// ID of the last context this label was registered with, 0 if none
    registered_in: AtomicU64,
}

impl Label {
    /// Label with a precomputed hash, usable in `static` items. `hash` must equal
    /// `string_hash32(name)`; the `label!` macro computes it at compile time.
    pub const fn from_static(hash: u32, name: &'static str) -> Self {
        Self {
            hash,
            name: Cow::Borrowed(name),
            registered_in: AtomicU64::new(0),
        }
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        let name = name.into();
        Self {
            hash: string_hash32(&name),
            name,
            registered_in: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.hash
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub(crate) fn is_registered_in(&self, context_id: u64) -> bool {
        self.registered_in.load(Ordering::Acquire) == context_id
    }

    pub(crate) fn mark_registered_in(&self, context_id: u64) {
        self.registered_in.store(context_id, Ordering::Release);
    }
}

impl Clone for Label {
    fn clone(&self) -> Self {
        Self {
            hash: self.hash,
            name: self.name.clone(),
            registered_in: AtomicU64::new(0),
        }
    }
}

impl std::fmt::Debug for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Label").field("id", &format_args!("{:#010x}", self.hash)).field("name", &self.name).finish()
    }
}

/// Label whose name is only known at runtime, e.g. a discovered thermal zone.
///
/// Only the first `conditional_init` wins, later names are ignored.
pub struct LazyLabel {
    cell: OnceLock<Label>,
}

impl LazyLabel {
    pub const fn new() -> Self {
        Self { cell: OnceLock::new() }
    }

    pub fn conditional_init(&self, name: impl Into<Cow<'static, str>>) -> &Label {
        self.cell.get_or_init(|| Label::new(name))
    }

    pub fn get(&self) -> Option<&Label> {
        self.cell.get()
    }
}

impl Default for LazyLabel {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct LabelTable {
    entries: Vec<(u32, Cow<'static, str>)>,
    known: HashSet<u32>,
}

#[derive(Default)]
pub struct LabelRegistry {
    table: SpinLock<LabelTable>,
}

impl LabelRegistry {
    /// Adds the label to the table. Returns `true` if it was new and `is_live()` (evaluated
    /// under the registry lock) says it must be announced to the connected client right away.
    ///
    /// Colliding hashes keep the first name.
    pub fn register(&self, label: &Label, is_live: impl FnOnce() -> bool) -> bool {
        debug_assert_eq!(label.id(), string_hash32(label.name()), "label {:?} built with a foreign hash", label.name());
        let mut table = self.table.lock();
        if !table.known.insert(label.id()) {
            return false;
        }
        table.entries.push((label.id(), label.name.clone()));
        is_live()
    }

    /// Runs `f` over every registered label while holding the registry lock. Registrations
    /// from other threads wait until `f` returns.
    pub fn replay<R>(&self, f: impl FnOnce(&[(u32, Cow<'static, str>)]) -> R) -> R {
        let table = self.table.lock();
        f(&table.entries)
    }

    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
