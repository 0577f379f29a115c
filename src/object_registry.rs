use std::collections::HashMap;

use glam::{Mat4, Vec3};
use uuid::Uuid;

use crate::camera_registry::CameraRegistry;
use crate::geometry_registry::GeometryRegistry;
use crate::helpers::SceneHelperRegistry;
use crate::material_registry::{Material, MaterialRegistry};
use crate::node::{NodeKind, ObjectGroup, SceneNode};
use crate::texture_cache::TextureCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    Translate,
    Rotate,
    Scale,
}

/// The sibling managers an object mutation cascades into, borrowed explicitly
/// per call instead of held ambiently.
pub struct SceneDeps<'a> {
    pub geometries: &'a mut GeometryRegistry,
    pub materials: &'a mut MaterialRegistry,
    pub cameras: &'a mut CameraRegistry,
    pub helpers: &'a mut SceneHelperRegistry,
    pub textures: &'a TextureCache,
}

/// A visible mesh instance flattened out of the graph for drawing or picking.
pub struct MeshInstance {
    pub id: Uuid,
    pub world: Mat4,
    pub geometry: Uuid,
    pub material: Option<Uuid>,
    pub render_order: i32,
}

/// The scene graph itself: an id-indexed arena of nodes. Every node in the
/// scene is resolvable through this index; child order is owned by the parent
/// node's children list.
#[derive(Default)]
pub struct ObjectRegistry {
    nodes: HashMap<Uuid, SceneNode>,
    roots: Vec<Uuid>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_object(&self, id: Uuid) -> Option<&SceneNode> {
        self.nodes.get(&id)
    }

    pub fn get_object_mut(&mut self, id: Uuid) -> Option<&mut SceneNode> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn roots(&self) -> &[Uuid] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn world_matrix(&self, id: Uuid) -> Option<Mat4> {
        let node = self.nodes.get(&id)?;
        let mut matrix = node.local_matrix();
        let mut cursor = node.parent;
        while let Some(parent_id) = cursor {
            let parent = self.nodes.get(&parent_id)?;
            matrix = parent.local_matrix() * matrix;
            cursor = parent.parent;
        }
        Some(matrix)
    }

    pub fn world_translation(&self, id: Uuid) -> Option<Vec3> {
        self.world_matrix(id).map(|m| m.transform_point3(Vec3::ZERO))
    }

    /// Visibility in the scene: a node renders only while it and every
    /// ancestor are visible.
    pub fn is_visible_in_scene(&self, id: Uuid) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            match self.nodes.get(&current) {
                Some(node) if node.visible => cursor = node.parent,
                _ => return false,
            }
        }
        true
    }

    /// Adds a node hierarchy, registering every descendant's geometry,
    /// materials, camera role, and helper before splicing the root of the
    /// hierarchy under `parent` (or at scene root) at `index`.
    pub fn add_object(
        &mut self,
        group: ObjectGroup,
        parent: Option<Uuid>,
        index: Option<usize>,
        deps: &mut SceneDeps<'_>,
    ) -> Option<Uuid> {
        if let Some(parent_id) = parent {
            if !self.nodes.contains_key(&parent_id) {
                log::warn!("[objects] add skipped, parent {parent_id} not in scene");
                return None;
            }
        }
        if self.nodes.contains_key(&group.node.id) {
            log::warn!("[objects] add skipped, node {} already in scene", group.node.id);
            return None;
        }
        let id = self.insert_group(group, parent, deps);
        match parent {
            Some(parent_id) => {
                let children = &mut self
                    .nodes
                    .get_mut(&parent_id)
                    .expect("parent checked above")
                    .children;
                let at = index.unwrap_or(children.len()).min(children.len());
                children.insert(at, id);
            }
            None => {
                let at = index.unwrap_or(self.roots.len()).min(self.roots.len());
                self.roots.insert(at, id);
            }
        }
        Some(id)
    }

    fn insert_group(
        &mut self,
        group: ObjectGroup,
        parent: Option<Uuid>,
        deps: &mut SceneDeps<'_>,
    ) -> Uuid {
        let ObjectGroup { mut node, geometry, materials, children } = group;
        node.parent = parent;
        node.children.clear();
        let id = node.id;

        if let Some(geometry) = geometry {
            deps.geometries.add(geometry);
        } else if let Some(geometry_id) = node.geometry {
            if !deps.geometries.has(geometry_id) {
                log::warn!("[objects] node {id} references unregistered geometry {geometry_id}");
            }
        }
        deps.materials.add_materials(&materials);
        for material_id in &node.materials {
            if deps.materials.material(*material_id).is_none() {
                log::warn!("[objects] node {id} references unregistered material {material_id}");
            }
        }
        if node.kind == NodeKind::Camera {
            deps.cameras.register_node_camera(&node);
        }
        deps.helpers.add_helper(&node);

        self.nodes.insert(id, node);
        for child in children {
            if self.nodes.contains_key(&child.node.id) {
                log::warn!("[objects] skipping duplicate child {}", child.node.id);
                continue;
            }
            let child_id = self.insert_group(child, Some(id), deps);
            self.nodes.get_mut(&id).expect("node just inserted").children.push(child_id);
        }

        let world = self.world_translation(id).unwrap_or(Vec3::ZERO);
        if let Some(node) = self.nodes.get(&id) {
            deps.helpers.update_helper(node, world);
        }
        id
    }

    /// Removes a node and its descendants, detaching every registration the
    /// add cascade created. Guarded: a parentless node (the scene root, an
    /// unparented camera) is never removed.
    pub fn remove_object(&mut self, id: Uuid, deps: &mut SceneDeps<'_>) -> bool {
        match self.nodes.get(&id) {
            None => {
                log::warn!("[objects] remove skipped, node {id} not in scene");
                false
            }
            Some(node) if node.parent.is_none() => {
                log::warn!("[objects] refusing to remove unparented node {id}");
                false
            }
            Some(_) => self.remove_subtree(id, deps, false),
        }
    }

    fn remove_subtree(&mut self, id: Uuid, deps: &mut SceneDeps<'_>, need_delete_image: bool) -> bool {
        let Some(detached) = self.detach_subtree(id) else {
            return false;
        };
        release_scene_roles(&detached, deps);
        release_resources(&detached, deps, need_delete_image);
        true
    }

    /// Unlinks a node and its descendants from the arena and the parent's
    /// children list, returning them children-first. Registrations are NOT
    /// released here; the caller decides when (a swap releases only after the
    /// replacement is registered, so shared resources never transit zero).
    fn detach_subtree(&mut self, id: Uuid) -> Option<Vec<SceneNode>> {
        let parent = self.nodes.get(&id)?.parent;
        let mut order = Vec::new();
        self.collect_subtree(id, &mut order);
        let mut detached = Vec::with_capacity(order.len());
        for &member in order.iter().rev() {
            if let Some(node) = self.nodes.remove(&member) {
                detached.push(node);
            }
        }
        match parent {
            Some(parent_id) => {
                if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
                    parent_node.children.retain(|child| *child != id);
                }
            }
            None => self.roots.retain(|root| *root != id),
        }
        Some(detached)
    }

    fn collect_subtree(&self, id: Uuid, order: &mut Vec<Uuid>) {
        order.push(id);
        if let Some(node) = self.nodes.get(&id) {
            for child in node.children.clone() {
                self.collect_subtree(child, order);
            }
        }
    }

    /// Replaces the node known under `old_id` with a freshly built hierarchy,
    /// preserving identity (name, render order, parent, id) and migrating the
    /// old material property-by-property into a fresh material of the new
    /// node's material type. The old node's cached images stay in place. An
    /// unknown `old_id` degrades to a plain add at scene root.
    pub fn swap_object_mesh(
        &mut self,
        old_id: Uuid,
        mut group: ObjectGroup,
        slot_index: Option<usize>,
        deps: &mut SceneDeps<'_>,
    ) -> Option<Uuid> {
        if !self.nodes.contains_key(&old_id) {
            log::warn!("[objects] swap target {old_id} not in scene, adding instead");
            return self.add_object(group, None, None, deps);
        }
        let (old_name, old_render_order, old_parent, old_material) = {
            let old = self.nodes.get(&old_id).expect("checked above");
            (old.name.clone(), old.render_order, old.parent, old.primary_material())
        };
        let snapshot = old_material.and_then(|id| deps.materials.material(id).cloned());

        if let (Some(snapshot), Some(payload)) = (snapshot.as_ref(), group.materials.first_mut()) {
            let mut migrated = Material::migrated_from(snapshot, payload.kind);
            migrated.uuid = payload.uuid;
            *payload = migrated;
        }

        let slot = slot_index.or_else(|| {
            old_parent.and_then(|parent_id| {
                self.nodes
                    .get(&parent_id)
                    .and_then(|parent| parent.children.iter().position(|child| *child == old_id))
            })
            .or_else(|| self.roots.iter().position(|root| *root == old_id))
        });

        let detached = self.detach_subtree(old_id).unwrap_or_default();
        // Helper and camera roles are keyed by node id, which the new node
        // inherits; drop them before it registers its own.
        release_scene_roles(&detached, deps);

        group.node.id = old_id;
        group.node.name = old_name;
        group.node.render_order = old_render_order;
        let added = self.add_object(group, old_parent, slot, deps);
        // Shared resources release only now, so texture maps the migrated
        // material still consumes never transit zero consumers.
        release_resources(&detached, deps, false);
        added
    }

    /// Applies a transform by kind. Translation and scale assign directly;
    /// rotation assigns the three per-axis angles that compose axis by axis
    /// in the node's orientation.
    pub fn set_object_transform(
        &mut self,
        id: Uuid,
        value: Vec3,
        kind: TransformKind,
        helpers: &mut SceneHelperRegistry,
    ) {
        let Some(node) = self.nodes.get_mut(&id) else {
            log::warn!("[objects] transform skipped, node {id} not in scene");
            return;
        };
        match kind {
            TransformKind::Translate => node.translation = value,
            TransformKind::Rotate => node.rotation = value,
            TransformKind::Scale => node.scale = value,
        }
        let world = self.world_translation(id).unwrap_or(value);
        if let Some(node) = self.nodes.get(&id) {
            helpers.update_helper(node, world);
        }
    }

    pub fn count_material_consumers(&self, material: Uuid) -> usize {
        self.nodes
            .values()
            .filter(|node| node.materials.iter().any(|id| *id == material))
            .count()
    }

    /// Flattens the graph into drawable mesh instances, honoring inherited
    /// visibility and render order.
    pub fn visible_meshes(&self) -> Vec<MeshInstance> {
        let mut instances: Vec<MeshInstance> = self
            .nodes
            .values()
            .filter(|node| node.is_mesh() && node.geometry.is_some())
            .filter(|node| self.is_visible_in_scene(node.id))
            .filter_map(|node| {
                let world = self.world_matrix(node.id)?;
                Some(MeshInstance {
                    id: node.id,
                    world,
                    geometry: node.geometry.expect("filtered above"),
                    material: node.primary_material(),
                    render_order: node.render_order,
                })
            })
            .collect();
        instances.sort_by_key(|instance| instance.render_order);
        instances
    }

    pub fn ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.nodes.keys().copied()
    }
}

fn release_scene_roles(nodes: &[SceneNode], deps: &mut SceneDeps<'_>) {
    for node in nodes {
        if node.kind == NodeKind::Camera {
            deps.cameras.unregister(node.id);
        }
        deps.helpers.remove_helper(node.id);
    }
}

fn release_resources(nodes: &[SceneNode], deps: &mut SceneDeps<'_>, need_delete_image: bool) {
    for node in nodes {
        for material in &node.materials {
            deps.materials.remove_material(*material, need_delete_image, deps.textures);
        }
        if let Some(geometry) = node.geometry {
            deps.geometries.remove(geometry);
        }
    }
}
