//! Math types.
//!
//! Values are `Copy` and replaced wholesale on update, so equality is a
//! plain per-axis comparison.

use serde::{Deserialize, Serialize};

/// A point or orientation in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Coordinate {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Coordinate {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Builds a coordinate from a ground-plane `[x, z]` pair at height `y`.
    pub const fn from_ground(ground: (f32, f32), y: f32) -> Self {
        Self::new(ground.0, y, ground.1)
    }

    /// Projects onto the ground plane as `[x, z]`.
    pub fn ground(self) -> (f32, f32) {
        (self.x, self.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn scale(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    /// Moves each axis independently toward `destination` by at most
    /// `max_step`, landing exactly on the destination axis once it is
    /// within reach.
    pub fn step_towards(self, destination: Self, max_step: f32) -> Self {
        Self::new(
            step_axis(self.x, destination.x, max_step),
            step_axis(self.y, destination.y, max_step),
            step_axis(self.z, destination.z, max_step),
        )
    }
}

fn step_axis(source: f32, destination: f32, max_step: f32) -> f32 {
    let diff = destination - source;
    if diff.abs() <= max_step {
        return destination;
    }
    source + diff.signum() * max_step
}

/// A half-line used for picking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Coordinate,
    /// Not required to be normalized.
    pub direction: Coordinate,
}

impl Ray {
    pub const fn new(origin: Coordinate, direction: Coordinate) -> Self {
        Self { origin, direction }
    }

    /// A ray pointing straight down onto the ground-plane point `(x, z)`.
    pub fn top_down(x: f32, z: f32) -> Self {
        Self::new(Coordinate::new(x, 1000.0, z), Coordinate::new(0.0, -1.0, 0.0))
    }

    pub fn at(&self, t: f32) -> Coordinate {
        self.origin.add(self.direction.scale(t))
    }
}
