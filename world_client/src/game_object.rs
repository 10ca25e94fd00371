//! Game objects.
//!
//! A `GameObject` binds world data to a visual handle under a stable key.
//! Once per tick it pushes dirty fields to the visual and clears the dirt.
//! Movable objects carry a [`MovementController`] that plans a bounded step
//! toward the destination; the game world writes that step back through its
//! setter.

use std::time::Duration;

use world_shared::{
    math::Coordinate,
    scene::{NodeId, RingStyle, VisualHandle},
};

use crate::{
    frame::{Throttle, Update},
    world_data::{GameObjectWorldData, WorldField},
};

pub const SELECTED_RING_COLOR: u32 = 0x336699;
pub const HIGHLIGHT_RING_COLOR: u32 = 0xdfebff;
pub const HIGHLIGHT_OPACITY: f32 = 0.7;
pub const DEFAULT_LABEL_INTERVAL: Duration = Duration::from_millis(250);

/// Called with the object key when a movable object reaches its destination.
pub type ArrivalHook = Box<dyn FnMut(&str, &GameObjectWorldData)>;

/// Bounded per-axis destination seeking at a fixed speed.
pub struct MovementController {
    speed: f32,
    on_arrival: Option<ArrivalHook>,
}

impl std::fmt::Debug for MovementController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MovementController")
            .field("speed", &self.speed)
            .field("on_arrival", &self.on_arrival.is_some())
            .finish()
    }
}

impl MovementController {
    pub fn new(speed: f32) -> Self {
        Self {
            speed,
            on_arrival: None,
        }
    }

    pub fn with_arrival_hook(mut self, hook: ArrivalHook) -> Self {
        self.on_arrival = Some(hook);
        self
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Next position after `delta` seconds, never past `destination`.
    pub fn next_position(&self, source: Coordinate, destination: Coordinate, delta: f32) -> Coordinate {
        source.step_towards(destination, self.speed * delta)
    }
}

pub struct GameObject {
    key: String,
    visual: Box<dyn VisualHandle>,
    world_data: GameObjectWorldData,
    movement: Option<MovementController>,
    label: Throttle,
}

impl std::fmt::Debug for GameObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameObject")
            .field("key", &self.key)
            .field("root", &self.visual.root())
            .field("world_data", &self.world_data)
            .field("movement", &self.movement)
            .finish()
    }
}

impl GameObject {
    /// A static object.
    pub fn new(
        key: impl Into<String>,
        visual: Box<dyn VisualHandle>,
        world_data: GameObjectWorldData,
    ) -> Self {
        Self {
            key: key.into(),
            visual,
            world_data,
            movement: None,
            label: Throttle::new(DEFAULT_LABEL_INTERVAL),
        }
    }

    /// An object that seeks its destination.
    pub fn moveable(
        key: impl Into<String>,
        visual: Box<dyn VisualHandle>,
        world_data: GameObjectWorldData,
        movement: MovementController,
    ) -> Self {
        let mut obj = Self::new(key, visual, world_data);
        obj.movement = Some(movement);
        obj
    }

    pub fn with_label_interval(mut self, interval: Duration) -> Self {
        self.label = Throttle::new(interval);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn root(&self) -> NodeId {
        self.visual.root()
    }

    pub fn world_data(&self) -> &GameObjectWorldData {
        &self.world_data
    }

    /// Direct access bypasses listener notification; use the game world's
    /// setter for anything observable.
    pub(crate) fn world_data_mut(&mut self) -> &mut GameObjectWorldData {
        &mut self.world_data
    }

    pub fn is_moveable(&self) -> bool {
        self.movement.is_some()
    }

    /// Where movement wants this object after `delta` seconds. `None` for
    /// static objects and for objects already at their destination.
    pub fn next_position(&self, delta: f32) -> Option<Coordinate> {
        let movement = self.movement.as_ref()?;
        let data = &self.world_data;
        if !data.is_moving() {
            return None;
        }
        Some(movement.next_position(data.position(), data.destination(), delta))
    }

    /// Runs the arrival hook if a movable object now sits on its
    /// destination. Called once per applied step.
    pub(crate) fn report_arrival(&mut self) {
        if self.world_data.is_moving() {
            return;
        }
        if let Some(hook) = self.movement.as_mut().and_then(|m| m.on_arrival.as_mut()) {
            hook(&self.key, &self.world_data);
        }
    }

    fn label_text(&self) -> String {
        let p = self.world_data.position();
        format!("{} ({:.1}, {:.1})", self.key, p.x, p.z)
    }

    fn apply_dirty(&mut self) {
        let data = &self.world_data;
        let dirty = data.dirty();

        if dirty.contains(WorldField::POSITION) {
            self.visual.set_position(data.position());
        }
        if dirty.contains(WorldField::ROTATION) {
            self.visual.set_rotation(data.rotation());
        }
        if dirty.intersects(WorldField::SELECTED | WorldField::HIGHLIGHTED) {
            let ring = if data.selected() {
                RingStyle::shown(SELECTED_RING_COLOR)
            } else if data.highlighted() {
                RingStyle::shown(HIGHLIGHT_RING_COLOR)
            } else {
                RingStyle::HIDDEN
            };
            self.visual.set_ring(ring);
        }
        if dirty.contains(WorldField::HIGHLIGHTED) {
            let opacity = if data.highlighted() {
                HIGHLIGHT_OPACITY
            } else {
                1.0
            };
            self.visual.set_opacity(opacity);
        }
    }
}

impl Update for GameObject {
    fn update(&mut self, time: f64, _delta: f32) {
        if self.label.ready(time) {
            let text = self.label_text();
            self.visual.set_label(&text);
        }

        if !self.world_data.is_any_dirty() {
            return;
        }
        self.apply_dirty();
        self.world_data.clear_dirty();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use world_shared::headless::HeadlessScene;
    use world_shared::scene::VisualFactory;

    use super::*;

    /// Records every visual call.
    struct RecordingVisual {
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl VisualHandle for RecordingVisual {
        fn root(&self) -> NodeId {
            NodeId(1)
        }
        fn set_position(&mut self, p: Coordinate) {
            self.calls.borrow_mut().push(format!("position {} {} {}", p.x, p.y, p.z));
        }
        fn set_rotation(&mut self, _r: Coordinate) {
            self.calls.borrow_mut().push("rotation".to_string());
        }
        fn set_ring(&mut self, ring: RingStyle) {
            self.calls
                .borrow_mut()
                .push(format!("ring {} {:x}", ring.visible, ring.color));
        }
        fn set_opacity(&mut self, o: f32) {
            self.calls.borrow_mut().push(format!("opacity {o}"));
        }
        fn set_label(&mut self, _t: &str) {
            self.calls.borrow_mut().push("label".to_string());
        }
    }

    fn recorded(world_data: GameObjectWorldData) -> (GameObject, Rc<RefCell<Vec<String>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let visual = RecordingVisual {
            calls: Rc::clone(&calls),
        };
        (GameObject::new("obj", Box::new(visual), world_data), calls)
    }

    fn mover(from: Coordinate, to: Coordinate, arrivals: Rc<Cell<u32>>) -> GameObject {
        let scene = HeadlessScene::new();
        let visual = scene.factory(1.0).create("tower", "mover").unwrap();
        let mut data = GameObjectWorldData::new(from);
        data.set_destination(to);
        let movement = MovementController::new(5.0).with_arrival_hook(Box::new(move |_, _| {
            arrivals.set(arrivals.get() + 1);
        }));
        GameObject::moveable("mover", visual, data, movement)
    }

    #[test]
    fn first_tick_pushes_full_state_then_clears() {
        let (mut obj, calls) = recorded(GameObjectWorldData::new(Coordinate::new(1.0, 0.1, 2.0)));
        obj.update(0.0, 0.016);

        let calls = calls.borrow();
        assert!(calls.contains(&"position 1 0.1 2".to_string()));
        assert!(calls.contains(&"rotation".to_string()));
        assert!(calls.contains(&"ring false 0".to_string()));
        assert!(calls.contains(&"opacity 1".to_string()));
        assert!(!obj.world_data().is_any_dirty());
    }

    #[test]
    fn clean_object_takes_fast_path() {
        let (mut obj, calls) = recorded(GameObjectWorldData::new(Coordinate::ZERO));
        obj.update(0.0, 0.016);
        calls.borrow_mut().clear();

        // Inside the label interval and nothing dirty: no visual calls.
        obj.update(10.0, 0.016);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn selection_takes_precedence_over_highlight() {
        let (mut obj, calls) = recorded(GameObjectWorldData::new(Coordinate::ZERO));
        obj.update(0.0, 0.016);
        calls.borrow_mut().clear();

        obj.world_data_mut().set_highlighted(true);
        obj.world_data_mut().set_selected(true);
        obj.update(10.0, 0.016);
        assert_eq!(
            *calls.borrow(),
            vec![
                format!("ring true {:x}", SELECTED_RING_COLOR),
                format!("opacity {HIGHLIGHT_OPACITY}"),
            ]
        );

        calls.borrow_mut().clear();
        obj.world_data_mut().set_selected(false);
        obj.update(20.0, 0.016);
        assert_eq!(
            *calls.borrow(),
            vec![format!("ring true {:x}", HIGHLIGHT_RING_COLOR)]
        );
    }

    #[test]
    fn label_is_throttled_on_host_time() {
        let (obj, calls) = recorded(GameObjectWorldData::new(Coordinate::ZERO));
        let mut obj = obj.with_label_interval(Duration::from_millis(100));
        for t in [0.0, 30.0, 60.0, 90.0, 120.0, 150.0] {
            obj.update(t, 0.03);
        }
        let labels = calls.borrow().iter().filter(|c| *c == "label").count();
        assert_eq!(labels, 2);
    }

    #[test]
    fn step_is_speed_times_delta() {
        let obj = mover(
            Coordinate::new(0.0, 0.0, 0.0),
            Coordinate::new(10.0, 0.0, 0.0),
            Rc::new(Cell::new(0)),
        );
        assert_eq!(obj.next_position(1.0), Some(Coordinate::new(5.0, 0.0, 0.0)));
        assert_eq!(obj.next_position(0.5), Some(Coordinate::new(2.5, 0.0, 0.0)));
        // Planning a step does not move the object.
        assert_eq!(obj.world_data().position(), Coordinate::ZERO);
    }

    #[test]
    fn final_step_snaps_without_overshoot() {
        let obj = mover(
            Coordinate::new(9.0, 0.0, 0.0),
            Coordinate::new(10.0, 0.0, 0.0),
            Rc::new(Cell::new(0)),
        );
        assert_eq!(obj.next_position(1.0), Some(Coordinate::new(10.0, 0.0, 0.0)));
    }

    #[test]
    fn arrival_hook_needs_every_axis_on_target() {
        let arrivals = Rc::new(Cell::new(0));
        let mut obj = mover(
            Coordinate::new(0.0, 0.0, 0.0),
            Coordinate::new(2.0, 0.0, 12.0),
            arrivals.clone(),
        );

        obj.world_data_mut().set_position(Coordinate::new(2.0, 0.0, 5.0));
        obj.report_arrival();
        assert_eq!(arrivals.get(), 0);

        obj.world_data_mut().set_position(Coordinate::new(2.0, 0.0, 12.0));
        obj.report_arrival();
        assert_eq!(arrivals.get(), 1);
        assert_eq!(obj.next_position(1.0), None);
    }

    #[test]
    fn static_objects_never_move() {
        let scene = HeadlessScene::new();
        let visual = scene.factory(1.0).create("tower", "static").unwrap();
        let mut data = GameObjectWorldData::new(Coordinate::ZERO);
        data.set_destination(Coordinate::new(10.0, 0.0, 0.0));
        let mut obj = GameObject::new("static", visual, data);
        assert!(!obj.is_moveable());
        assert_eq!(obj.next_position(1.0), None);

        obj.update(0.0, 1.0);
        assert_eq!(obj.world_data().position(), Coordinate::ZERO);
    }
}
