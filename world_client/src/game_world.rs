//! Game world.
//!
//! Owns every [`GameObject`], mediates picking against the scene, and is the
//! only path through which observable world data changes: the setter dedupes
//! writes and fans changes out to per-field listeners.

use std::collections::HashMap;

use anyhow::bail;
use tracing::{debug, Span};
use world_shared::{
    math::{Coordinate, Ray},
    scene::{NodeId, RayHit, Scene},
};

use crate::{
    frame::Update,
    game_object::GameObject,
    world_data::{GameObjectWorldData, WorldDataChange, WorldField},
};

/// Where a world-data write came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// User intent or local prediction.
    Local,
    /// Applied from a server message.
    Server,
}

/// Notified with `(key, world_data, origin)` after a field changed.
pub type WorldDataListener = Box<dyn FnMut(&str, &GameObjectWorldData, ChangeOrigin)>;

pub struct GameWorld {
    scene: Box<dyn Scene>,
    game_objects: Vec<GameObject>,
    listeners: HashMap<WorldField, Vec<WorldDataListener>>,
    log: Span,
}

impl GameWorld {
    pub fn new(scene: Box<dyn Scene>, log: Span) -> Self {
        Self {
            scene,
            game_objects: Vec::new(),
            listeners: HashMap::new(),
            log,
        }
    }

    /// Adds an object and places its visual in the scene.
    pub fn add_game_object(&mut self, obj: GameObject) -> anyhow::Result<()> {
        if self.game_object(obj.key()).is_some() {
            bail!("game object {} already exists", obj.key());
        }
        debug!(parent: &self.log, key = %obj.key(), "Adding game object");
        self.scene.insert(obj.root());
        self.game_objects.push(obj);
        Ok(())
    }

    /// Removes an object and its visual. Returns it if it existed.
    pub fn remove_game_object(&mut self, key: &str) -> Option<GameObject> {
        let index = self.game_objects.iter().position(|o| o.key() == key)?;
        let obj = self.game_objects.remove(index);
        self.scene.remove(obj.root());
        debug!(parent: &self.log, key = %key, "Removed game object");
        Some(obj)
    }

    pub fn game_object(&self, key: &str) -> Option<&GameObject> {
        self.game_objects.iter().find(|o| o.key() == key)
    }

    /// All objects in insertion order.
    pub fn game_objects(&self) -> &[GameObject] {
        &self.game_objects
    }

    pub fn len(&self) -> usize {
        self.game_objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.game_objects.is_empty()
    }

    /// Registers a listener for one field. Listeners accumulate.
    pub fn add_set_game_object_world_data_listener(
        &mut self,
        field: WorldField,
        listener: WorldDataListener,
    ) {
        self.listeners.entry(field).or_default().push(listener);
    }

    /// Writes one field on the object keyed `id`.
    ///
    /// Listeners for the field run only if the value changed. An unknown id
    /// is a no-op. Returns whether anything changed.
    pub fn set_game_object_world_data(
        &mut self,
        id: &str,
        change: WorldDataChange,
        origin: ChangeOrigin,
    ) -> bool {
        let Some(index) = self.game_objects.iter().position(|o| o.key() == id) else {
            return false;
        };
        self.apply_at(index, change, origin)
    }

    fn apply_at(&mut self, index: usize, change: WorldDataChange, origin: ChangeOrigin) -> bool {
        let obj = &mut self.game_objects[index];
        if !obj.world_data_mut().apply(change) {
            return false;
        }
        if let Some(listeners) = self.listeners.get_mut(&change.field()) {
            for listener in listeners.iter_mut() {
                listener(obj.key(), obj.world_data(), origin);
            }
        }
        true
    }

    /// Sends every selected movable object toward `destination` on the
    /// ground plane. Each object keeps its current destination height.
    pub fn set_selected_game_objects_destination(&mut self, destination: Coordinate) {
        let moves: Vec<(String, Coordinate)> = self
            .game_objects
            .iter()
            .filter(|o| o.world_data().selected() && o.is_moveable())
            .map(|o| {
                let current = o.world_data().destination();
                (
                    o.key().to_string(),
                    Coordinate::new(destination.x, current.y, destination.z),
                )
            })
            .collect();

        for (key, dest) in moves {
            self.set_game_object_world_data(
                &key,
                WorldDataChange::Destination(dest),
                ChangeOrigin::Local,
            );
        }
    }

    /// Selects `target`; with `clear_others` every other selection is dropped.
    pub fn select_game_object(&mut self, target: Option<&str>, clear_others: bool) {
        let writes: Vec<(String, bool)> = self
            .game_objects
            .iter()
            .filter(|o| o.world_data().selected() || Some(o.key()) == target)
            .filter_map(|o| {
                if Some(o.key()) == target {
                    Some((o.key().to_string(), true))
                } else if clear_others {
                    Some((o.key().to_string(), false))
                } else {
                    None
                }
            })
            .collect();

        for (key, selected) in writes {
            self.set_game_object_world_data(
                &key,
                WorldDataChange::Selected(selected),
                ChangeOrigin::Local,
            );
        }
    }

    /// Makes `target` the only highlighted object, or clears the highlight.
    pub fn hover_game_object(&mut self, target: Option<&str>) {
        let writes: Vec<(String, bool)> = self
            .game_objects
            .iter()
            .filter(|o| o.world_data().highlighted() || Some(o.key()) == target)
            .map(|o| (o.key().to_string(), Some(o.key()) == target))
            .collect();

        for (key, highlighted) in writes {
            self.set_game_object_world_data(
                &key,
                WorldDataChange::Highlighted(highlighted),
                ChangeOrigin::Local,
            );
        }
    }

    /// Nearest object hit by `ray`.
    pub fn get_game_object_intersection(&self, ray: &Ray) -> Option<&GameObject> {
        let roots: Vec<NodeId> = self.game_objects.iter().map(|o| o.root()).collect();
        self.scene
            .intersect(ray, Some(&roots))
            .iter()
            .find_map(|hit| self.owner_of(hit.node))
    }

    /// Every hit in the scene, terrain included, nearest first.
    pub fn get_scene_intersection(&self, ray: &Ray) -> Vec<RayHit> {
        self.scene.intersect(ray, None)
    }

    /// Walks up from `node` to the first ancestor tagged with an object key.
    fn owner_of(&self, node: NodeId) -> Option<&GameObject> {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if let Some(key) = self.scene.object_key(current) {
                return self.game_object(&key);
            }
            cursor = self.scene.parent(current);
        }
        None
    }
}

impl Update for GameWorld {
    fn update(&mut self, time: f64, delta: f32) {
        // Predicted steps go through the setter before the visual sync.
        for index in 0..self.game_objects.len() {
            if let Some(next) = self.game_objects[index].next_position(delta) {
                let moved = self.apply_at(index, WorldDataChange::Position(next), ChangeOrigin::Local);
                if moved {
                    self.game_objects[index].report_arrival();
                }
            }
            self.game_objects[index].update(time, delta);
        }
    }
}
