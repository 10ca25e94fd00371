//! Scene abstraction.
//!
//! The sync core does not depend on a graphics backend. These traits are the
//! surface a renderer, asset loader and picking layer would satisfy; see
//! [`crate::headless`] for an in-memory implementation.

use crate::math::{Coordinate, Ray};

/// Opaque scene-graph node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// A ray intersection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// The innermost node that was hit.
    pub node: NodeId,
    pub point: Coordinate,
    pub distance: f32,
}

/// Selection ring appearance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStyle {
    pub visible: bool,
    pub color: u32,
}

impl RingStyle {
    pub const HIDDEN: Self = Self {
        visible: false,
        color: 0,
    };

    pub const fn shown(color: u32) -> Self {
        Self {
            visible: true,
            color,
        }
    }
}

/// The scene graph a game world places its visuals into.
pub trait Scene {
    /// Inserts a visual root. It is never reparented afterwards.
    fn insert(&mut self, root: NodeId);

    fn remove(&mut self, root: NodeId);

    /// Intersects `ray` against the scene, nearest hit first.
    ///
    /// With `roots` set only those subtrees are tested; otherwise everything
    /// is, static terrain included.
    fn intersect(&self, ray: &Ray, roots: Option<&[NodeId]>) -> Vec<RayHit>;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Game-object key tagged on `node`, if any.
    fn object_key(&self, node: NodeId) -> Option<String>;
}

/// Renderable representation bound to one game object.
pub trait VisualHandle {
    fn root(&self) -> NodeId;
    fn set_position(&mut self, position: Coordinate);
    fn set_rotation(&mut self, rotation: Coordinate);
    fn set_ring(&mut self, ring: RingStyle);
    fn set_opacity(&mut self, opacity: f32);
    fn set_label(&mut self, text: &str);
}

/// Asset loader: produces ready-to-place visuals keyed by model name.
pub trait VisualFactory {
    /// Creates a visual for `model` whose root is tagged with `key`.
    fn create(&mut self, model: &str, key: &str) -> anyhow::Result<Box<dyn VisualHandle>>;
}
