//! Per-object world data.
//!
//! The authoritative-intent state of one game object with dirty tracking.
//! Every write goes through an explicit setter that compares, assigns and
//! flags; unchanged writes are no-ops.

use world_shared::{dirty::DirtyTracker, math::Coordinate};

bitflags::bitflags! {
    /// World-data fields, usable as a single field or a set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WorldField: u8 {
        const POSITION = 1 << 0;
        const DESTINATION = 1 << 1;
        const ROTATION = 1 << 2;
        const SELECTED = 1 << 3;
        const HIGHLIGHTED = 1 << 4;
    }
}

/// A single field write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WorldDataChange {
    Position(Coordinate),
    Destination(Coordinate),
    Rotation(Coordinate),
    Selected(bool),
    Highlighted(bool),
}

impl WorldDataChange {
    pub fn field(&self) -> WorldField {
        match self {
            WorldDataChange::Position(_) => WorldField::POSITION,
            WorldDataChange::Destination(_) => WorldField::DESTINATION,
            WorldDataChange::Rotation(_) => WorldField::ROTATION,
            WorldDataChange::Selected(_) => WorldField::SELECTED,
            WorldDataChange::Highlighted(_) => WorldField::HIGHLIGHTED,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameObjectWorldData {
    position: Coordinate,
    destination: Coordinate,
    rotation: Coordinate,
    selected: bool,
    highlighted: bool,
    dirty: DirtyTracker<WorldField>,
}

impl GameObjectWorldData {
    /// An idle object at `position`. Every field starts dirty so the first
    /// tick pushes the full state to the visual.
    pub fn new(position: Coordinate) -> Self {
        Self {
            position,
            destination: position,
            rotation: Coordinate::ZERO,
            selected: false,
            highlighted: false,
            dirty: DirtyTracker::all_dirty(),
        }
    }

    pub fn position(&self) -> Coordinate {
        self.position
    }

    pub fn destination(&self) -> Coordinate {
        self.destination
    }

    pub fn rotation(&self) -> Coordinate {
        self.rotation
    }

    pub fn selected(&self) -> bool {
        self.selected
    }

    pub fn highlighted(&self) -> bool {
        self.highlighted
    }

    /// True while the object still has somewhere to go.
    pub fn is_moving(&self) -> bool {
        self.position != self.destination
    }

    pub fn set_position(&mut self, value: Coordinate) -> bool {
        self.dirty
            .set(WorldField::POSITION, &mut self.position, value)
    }

    pub fn set_destination(&mut self, value: Coordinate) -> bool {
        self.dirty
            .set(WorldField::DESTINATION, &mut self.destination, value)
    }

    pub fn set_rotation(&mut self, value: Coordinate) -> bool {
        self.dirty
            .set(WorldField::ROTATION, &mut self.rotation, value)
    }

    pub fn set_selected(&mut self, value: bool) -> bool {
        self.dirty
            .set(WorldField::SELECTED, &mut self.selected, value)
    }

    pub fn set_highlighted(&mut self, value: bool) -> bool {
        self.dirty
            .set(WorldField::HIGHLIGHTED, &mut self.highlighted, value)
    }

    /// Applies one field write. Returns whether the value changed.
    pub fn apply(&mut self, change: WorldDataChange) -> bool {
        match change {
            WorldDataChange::Position(v) => self.set_position(v),
            WorldDataChange::Destination(v) => self.set_destination(v),
            WorldDataChange::Rotation(v) => self.set_rotation(v),
            WorldDataChange::Selected(v) => self.set_selected(v),
            WorldDataChange::Highlighted(v) => self.set_highlighted(v),
        }
    }

    pub fn is_dirty(&self, field: WorldField) -> bool {
        self.dirty.is_dirty(field)
    }

    pub fn is_any_dirty(&self) -> bool {
        self.dirty.is_any_dirty()
    }

    pub fn dirty(&self) -> WorldField {
        self.dirty.dirty()
    }

    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(position: Coordinate) -> GameObjectWorldData {
        let mut data = GameObjectWorldData::new(position);
        data.clear_dirty();
        data
    }

    #[test]
    fn new_record_is_idle_and_fully_dirty() {
        let data = GameObjectWorldData::new(Coordinate::new(1.0, 0.1, 2.0));
        assert_eq!(data.destination(), data.position());
        assert!(!data.is_moving());
        assert_eq!(data.dirty(), WorldField::all());
    }

    #[test]
    fn equal_coordinate_write_is_not_dirty() {
        let mut data = clean(Coordinate::new(1.0, 2.0, 3.0));
        assert!(!data.set_position(Coordinate::new(1.0, 2.0, 3.0)));
        assert!(!data.is_any_dirty());

        assert!(data.set_position(Coordinate::new(1.0, 2.0, 3.5)));
        assert!(data.is_dirty(WorldField::POSITION));
        assert!(!data.is_dirty(WorldField::DESTINATION));
    }

    #[test]
    fn dirty_iff_value_differs_over_a_sequence() {
        let mut data = clean(Coordinate::ZERO);
        let writes = [false, true, true, false, false];
        let mut stored = false;
        for value in writes {
            data.clear_dirty();
            let changed = data.apply(WorldDataChange::Selected(value));
            assert_eq!(changed, value != stored);
            assert_eq!(data.is_dirty(WorldField::SELECTED), value != stored);
            assert_eq!(data.is_any_dirty(), value != stored);
            stored = value;
        }
    }

    #[test]
    fn clear_resets_every_field() {
        let mut data = clean(Coordinate::ZERO);
        data.set_highlighted(true);
        data.set_rotation(Coordinate::new(0.0, 1.0, 0.0));
        data.set_destination(Coordinate::new(4.0, 0.0, 0.0));
        assert_eq!(
            data.dirty(),
            WorldField::HIGHLIGHTED | WorldField::ROTATION | WorldField::DESTINATION
        );
        assert!(data.is_moving());

        data.clear_dirty();
        assert!(!data.is_any_dirty());
        assert_eq!(data.dirty(), WorldField::empty());
    }

    #[test]
    fn change_reports_its_field() {
        assert_eq!(
            WorldDataChange::Highlighted(true).field(),
            WorldField::HIGHLIGHTED
        );
        assert_eq!(
            WorldDataChange::Destination(Coordinate::ZERO).field(),
            WorldField::DESTINATION
        );
    }
}
