//! Input handling.
//!
//! Pointer events arrive already turned into world-space rays by whatever
//! owns the camera. This module maps them onto world operations:
//! - move: hover the picked object, or nothing
//! - primary click: select the picked object and clear the rest
//! - secondary click: send the selection to the first scene hit

use world_shared::math::Ray;

use crate::game_world::GameWorld;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Move(Ray),
    Click { button: PointerButton, ray: Ray },
}

/// Applies one pointer event to the world.
pub fn apply_pointer(world: &mut GameWorld, event: &PointerEvent) {
    match *event {
        PointerEvent::Move(ray) => {
            let target = picked_key(world, &ray);
            world.hover_game_object(target.as_deref());
        }
        PointerEvent::Click {
            button: PointerButton::Primary,
            ray,
        } => {
            let target = picked_key(world, &ray);
            world.select_game_object(target.as_deref(), true);
        }
        PointerEvent::Click {
            button: PointerButton::Secondary,
            ray,
        } => {
            if let Some(hit) = world.get_scene_intersection(&ray).first() {
                world.set_selected_game_objects_destination(hit.point);
            }
        }
    }
}

fn picked_key(world: &GameWorld, ray: &Ray) -> Option<String> {
    world
        .get_game_object_intersection(ray)
        .map(|obj| obj.key().to_string())
}

#[cfg(test)]
mod tests {
    use tracing::Span;
    use world_shared::headless::HeadlessScene;
    use world_shared::math::Coordinate;
    use world_shared::scene::VisualFactory;

    use super::*;
    use crate::frame::Update;
    use crate::game_object::{GameObject, MovementController};
    use crate::world_data::GameObjectWorldData;

    fn world(scene: &HeadlessScene) -> GameWorld {
        let mut world = GameWorld::new(Box::new(scene.clone()), Span::none());
        let mut factory = scene.factory(1.0);
        for (key, x) in [("a", 0.0), ("b", 10.0)] {
            let visual = factory.create("tower", key).unwrap();
            let data = GameObjectWorldData::new(Coordinate::new(x, 0.1, 0.0));
            world
                .add_game_object(GameObject::moveable(
                    key,
                    visual,
                    data,
                    MovementController::new(5.0),
                ))
                .unwrap();
        }
        world.update(0.0, 0.0);
        world
    }

    fn click(button: PointerButton, x: f32, z: f32) -> PointerEvent {
        PointerEvent::Click {
            button,
            ray: Ray::top_down(x, z),
        }
    }

    #[test]
    fn moving_over_objects_moves_the_highlight() {
        let scene = HeadlessScene::new();
        let mut world = world(&scene);
        let lit = |w: &GameWorld| -> Vec<String> {
            w.game_objects()
                .iter()
                .filter(|o| o.world_data().highlighted())
                .map(|o| o.key().to_string())
                .collect()
        };

        apply_pointer(&mut world, &PointerEvent::Move(Ray::top_down(0.0, 0.0)));
        assert_eq!(lit(&world), vec!["a"]);
        apply_pointer(&mut world, &PointerEvent::Move(Ray::top_down(10.0, 0.0)));
        assert_eq!(lit(&world), vec!["b"]);
        apply_pointer(&mut world, &PointerEvent::Move(Ray::top_down(5.0, 5.0)));
        assert!(lit(&world).is_empty());
    }

    #[test]
    fn click_selects_and_right_click_sends() {
        let scene = HeadlessScene::new();
        let mut world = world(&scene);

        apply_pointer(&mut world, &click(PointerButton::Primary, 10.0, 0.0));
        apply_pointer(&mut world, &click(PointerButton::Secondary, 20.0, -6.0));

        let a = world.game_object("a").unwrap().world_data();
        let b = world.game_object("b").unwrap().world_data();
        assert!(!a.selected());
        assert!(b.selected());
        assert_eq!(a.destination(), a.position());
        assert_eq!(b.destination(), Coordinate::new(20.0, 0.1, -6.0));

        // Clicking empty ground clears the selection.
        apply_pointer(&mut world, &click(PointerButton::Primary, 40.0, 40.0));
        assert!(!world.game_object("b").unwrap().world_data().selected());
    }
}
