//! Per-field change detection.
//!
//! A `DirtyTracker` records which fields of a record changed since the last
//! clear. Fields are described by a `bitflags` set so the tracker itself can
//! stay generic over the record it serves.
//!
//! Writes go through [`DirtyTracker::set`], which compares before assigning:
//! writing an unchanged value never marks the field.

use bitflags::Flags;

/// Sticky set of fields changed since the last [`DirtyTracker::clear`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyTracker<F> {
    dirty: F,
}

impl<F: Flags + Copy> Default for DirtyTracker<F> {
    fn default() -> Self {
        Self { dirty: F::empty() }
    }
}

impl<F: Flags + Copy> DirtyTracker<F> {
    /// A tracker with no dirty fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker with every known field marked dirty.
    pub fn all_dirty() -> Self {
        Self { dirty: F::all() }
    }

    /// Stores `value` into `slot` if it differs, marking `field`.
    ///
    /// Returns whether the stored value changed.
    pub fn set<T: PartialEq>(&mut self, field: F, slot: &mut T, value: T) -> bool {
        if *slot == value {
            return false;
        }
        *slot = value;
        self.dirty.insert(field);
        true
    }

    pub fn is_dirty(&self, field: F) -> bool {
        self.dirty.contains(field)
    }

    /// True iff at least one field is dirty.
    pub fn is_any_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// The full set of dirty fields.
    pub fn dirty(&self) -> F {
        self.dirty
    }

    pub fn clear(&mut self) {
        self.dirty = F::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    bitflags::bitflags! {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        struct Fields: u8 {
            const A = 1 << 0;
            const B = 1 << 1;
        }
    }

    #[test]
    fn set_marks_only_on_change() {
        let mut tracker = DirtyTracker::<Fields>::new();
        let mut a = 1;

        assert!(!tracker.set(Fields::A, &mut a, 1));
        assert!(!tracker.is_any_dirty());

        assert!(tracker.set(Fields::A, &mut a, 2));
        assert_eq!(a, 2);
        assert!(tracker.is_dirty(Fields::A));
        assert!(!tracker.is_dirty(Fields::B));
        assert!(tracker.is_any_dirty());
    }

    #[test]
    fn dirt_is_sticky_until_clear() {
        let mut tracker = DirtyTracker::<Fields>::new();
        let mut b = false;
        tracker.set(Fields::B, &mut b, true);
        // Writing the original value back keeps the field dirty.
        tracker.set(Fields::B, &mut b, false);
        assert!(tracker.is_dirty(Fields::B));

        tracker.clear();
        assert!(!tracker.is_any_dirty());
        assert_eq!(tracker.dirty(), Fields::empty());
    }

    #[test]
    fn all_dirty_covers_every_field() {
        let tracker = DirtyTracker::<Fields>::all_dirty();
        assert!(tracker.is_dirty(Fields::A));
        assert!(tracker.is_dirty(Fields::B));
    }
}
