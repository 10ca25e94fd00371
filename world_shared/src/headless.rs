//! Headless scene.
//!
//! An in-memory scene graph implementing [`Scene`], [`VisualHandle`] and
//! [`VisualFactory`] for tests and the console client. Each visual is a
//! key-tagged root group with one child model node; models are picked as
//! bounding spheres and the terrain is the plane `y = 0`.
//!
//! Visuals and the scene share the graph through `Rc<RefCell<_>>`; the whole
//! client runs on one thread.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use anyhow::bail;
use tracing::trace;

use crate::math::{Coordinate, Ray};
use crate::scene::{NodeId, RayHit, RingStyle, Scene, VisualFactory, VisualHandle};

/// Node id reported for terrain hits.
pub const GROUND: NodeId = NodeId(0);

/// Observable state of one visual root.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualState {
    pub model: String,
    pub position: Coordinate,
    pub rotation: Coordinate,
    pub ring: RingStyle,
    pub opacity: f32,
    pub label: String,
    /// Number of label writes, to observe throttling.
    pub label_writes: u32,
}

#[derive(Debug)]
struct Node {
    parent: Option<NodeId>,
    key: Option<String>,
    local: Coordinate,
    radius: f32,
    visual: Option<VisualState>,
}

#[derive(Debug)]
struct SceneGraph {
    next_id: u64,
    nodes: BTreeMap<NodeId, Node>,
    inserted: BTreeSet<NodeId>,
}

impl SceneGraph {
    fn alloc(&mut self, node: Node) -> NodeId {
        self.next_id += 1;
        let id = NodeId(self.next_id);
        self.nodes.insert(id, node);
        id
    }

    fn top(&self, mut node: NodeId) -> NodeId {
        while let Some(parent) = self.nodes.get(&node).and_then(|n| n.parent) {
            node = parent;
        }
        node
    }

    fn world_position(&self, node: NodeId) -> Coordinate {
        let mut pos = Coordinate::ZERO;
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            let Some(n) = self.nodes.get(&id) else { break };
            pos = pos.add(n.local);
            cursor = n.parent;
        }
        pos
    }

    /// Drops `root` and every node below it.
    fn release(&mut self, root: NodeId) {
        let doomed: Vec<NodeId> = self
            .nodes
            .keys()
            .copied()
            .filter(|id| self.top(*id) == root)
            .collect();
        for id in doomed {
            self.nodes.remove(&id);
        }
        self.inserted.remove(&root);
    }

    fn visual_mut(&mut self, root: NodeId) -> Option<&mut VisualState> {
        self.nodes.get_mut(&root).and_then(|n| n.visual.as_mut())
    }
}

/// Shared handle to a headless scene graph.
#[derive(Debug, Clone)]
pub struct HeadlessScene {
    graph: Rc<RefCell<SceneGraph>>,
    ground: bool,
}

impl Default for HeadlessScene {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessScene {
    /// A scene with a ground plane.
    pub fn new() -> Self {
        Self {
            graph: Rc::new(RefCell::new(SceneGraph {
                next_id: GROUND.0,
                nodes: BTreeMap::new(),
                inserted: BTreeSet::new(),
            })),
            ground: true,
        }
    }

    /// A visual factory creating spheres of `radius` in this scene.
    pub fn factory(&self, radius: f32) -> HeadlessFactory {
        HeadlessFactory {
            graph: Rc::clone(&self.graph),
            radius,
            known_models: None,
        }
    }

    pub fn contains(&self, root: NodeId) -> bool {
        self.graph.borrow().inserted.contains(&root)
    }

    /// Current state of a visual root.
    pub fn visual(&self, root: NodeId) -> Option<VisualState> {
        self.graph
            .borrow()
            .nodes
            .get(&root)
            .and_then(|n| n.visual.clone())
    }

    /// Nodes alive in the graph, inserted or not.
    pub fn node_count(&self) -> usize {
        self.graph.borrow().nodes.len()
    }

    /// Child nodes of `node`.
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.graph
            .borrow()
            .nodes
            .iter()
            .filter(|(_, n)| n.parent == Some(node))
            .map(|(id, _)| *id)
            .collect()
    }
}

impl Scene for HeadlessScene {
    fn insert(&mut self, root: NodeId) {
        self.graph.borrow_mut().inserted.insert(root);
    }

    fn remove(&mut self, root: NodeId) {
        self.graph.borrow_mut().inserted.remove(&root);
    }

    fn intersect(&self, ray: &Ray, roots: Option<&[NodeId]>) -> Vec<RayHit> {
        let graph = self.graph.borrow();
        let dir_len = ray.direction.len_sq().sqrt();
        if dir_len == 0.0 {
            return Vec::new();
        }

        let mut hits = Vec::new();
        for (id, node) in &graph.nodes {
            if node.radius <= 0.0 {
                continue;
            }
            let top = graph.top(*id);
            let in_scope = match roots {
                Some(roots) => roots.contains(&top),
                None => graph.inserted.contains(&top),
            };
            if !in_scope {
                continue;
            }
            let center = graph.world_position(*id);
            if let Some(t) = ray_sphere(ray, center, node.radius) {
                hits.push(RayHit {
                    node: *id,
                    point: ray.at(t),
                    distance: t * dir_len,
                });
            }
        }

        if roots.is_none() && self.ground && ray.direction.y != 0.0 {
            let t = -ray.origin.y / ray.direction.y;
            if t >= 0.0 {
                hits.push(RayHit {
                    node: GROUND,
                    point: ray.at(t),
                    distance: t * dir_len,
                });
            }
        }

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.graph.borrow().nodes.get(&node).and_then(|n| n.parent)
    }

    fn object_key(&self, node: NodeId) -> Option<String> {
        self.graph
            .borrow()
            .nodes
            .get(&node)
            .and_then(|n| n.key.clone())
    }
}

/// Smallest non-negative `t` where the ray meets the sphere.
fn ray_sphere(ray: &Ray, center: Coordinate, radius: f32) -> Option<f32> {
    let oc = ray.origin.sub(center);
    let a = ray.direction.len_sq();
    let b = 2.0 * ray.direction.dot(oc);
    let c = oc.len_sq() - radius * radius;
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return None;
    }
    let sqrt = disc.sqrt();
    let near = (-b - sqrt) / (2.0 * a);
    let far = (-b + sqrt) / (2.0 * a);
    if near >= 0.0 {
        Some(near)
    } else if far >= 0.0 {
        Some(far)
    } else {
        None
    }
}

/// Creates headless visuals.
#[derive(Debug, Clone)]
pub struct HeadlessFactory {
    graph: Rc<RefCell<SceneGraph>>,
    radius: f32,
    known_models: Option<BTreeSet<String>>,
}

impl HeadlessFactory {
    /// Restricts the factory to `models`; other names fail to load.
    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_models = Some(models.into_iter().map(Into::into).collect());
        self
    }
}

impl VisualFactory for HeadlessFactory {
    fn create(&mut self, model: &str, key: &str) -> anyhow::Result<Box<dyn VisualHandle>> {
        if let Some(known) = &self.known_models {
            if !known.contains(model) {
                bail!("unknown model {model}");
            }
        }

        let mut graph = self.graph.borrow_mut();
        let root = graph.alloc(Node {
            parent: None,
            key: Some(key.to_string()),
            local: Coordinate::ZERO,
            radius: 0.0,
            visual: Some(VisualState {
                model: model.to_string(),
                position: Coordinate::ZERO,
                rotation: Coordinate::ZERO,
                ring: RingStyle::HIDDEN,
                opacity: 1.0,
                label: String::new(),
                label_writes: 0,
            }),
        });
        graph.alloc(Node {
            parent: Some(root),
            key: None,
            local: Coordinate::ZERO,
            radius: self.radius,
            visual: None,
        });
        trace!(model, key, root = root.0, "Headless visual created");

        Ok(Box::new(HeadlessVisual {
            graph: Rc::clone(&self.graph),
            root,
        }))
    }
}

/// A visual living in a [`HeadlessScene`]. Its nodes are freed on drop.
#[derive(Debug)]
pub struct HeadlessVisual {
    graph: Rc<RefCell<SceneGraph>>,
    root: NodeId,
}

impl HeadlessVisual {
    fn with_state(&mut self, f: impl FnOnce(&mut VisualState)) {
        if let Some(state) = self.graph.borrow_mut().visual_mut(self.root) {
            f(state);
        }
    }
}

impl Drop for HeadlessVisual {
    fn drop(&mut self) {
        if let Ok(mut graph) = self.graph.try_borrow_mut() {
            graph.release(self.root);
            trace!(root = self.root.0, "Headless visual released");
        }
    }
}

impl VisualHandle for HeadlessVisual {
    fn root(&self) -> NodeId {
        self.root
    }

    fn set_position(&mut self, position: Coordinate) {
        if let Some(node) = self.graph.borrow_mut().nodes.get_mut(&self.root) {
            node.local = position;
        }
        self.with_state(|s| s.position = position);
    }

    fn set_rotation(&mut self, rotation: Coordinate) {
        self.with_state(|s| s.rotation = rotation);
    }

    fn set_ring(&mut self, ring: RingStyle) {
        self.with_state(|s| s.ring = ring);
    }

    fn set_opacity(&mut self, opacity: f32) {
        self.with_state(|s| s.opacity = opacity);
    }

    fn set_label(&mut self, text: &str) {
        self.with_state(|s| {
            s.label = text.to_string();
            s.label_writes += 1;
        });
    }
}
