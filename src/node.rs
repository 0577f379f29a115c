use glam::{Mat4, Quat, Vec3};
use smallvec::SmallVec;
use uuid::Uuid;

use crate::geometry_registry::Geometry;
use crate::material_registry::Material;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    Point,
    Directional,
    Spot,
    Hemisphere,
    RectArea,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Group,
    Mesh,
    Light(LightKind),
    Camera,
}

/// Light parameters carried by light nodes; ignored for every other kind.
#[derive(Debug, Clone, Copy)]
pub struct LightParams {
    pub color: [f32; 3],
    pub intensity: f32,
}

impl Default for LightParams {
    fn default() -> Self {
        Self { color: [1.0, 1.0, 1.0], intensity: 1.0 }
    }
}

/// An entity in the scene graph. Nodes live in the ObjectRegistry arena and
/// reference each other (and their geometry/material resources) by uuid.
#[derive(Debug, Clone)]
pub struct SceneNode {
    pub id: Uuid,
    pub name: String,
    pub kind: NodeKind,
    pub translation: Vec3,
    /// Euler angles in radians, applied axis by axis (X, then Y, then Z).
    pub rotation: Vec3,
    pub scale: Vec3,
    pub render_order: i32,
    pub visible: bool,
    pub skinned: bool,
    pub geometry: Option<Uuid>,
    pub materials: SmallVec<[Uuid; 1]>,
    pub light: Option<LightParams>,
    pub(crate) parent: Option<Uuid>,
    pub(crate) children: Vec<Uuid>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        let light = match kind {
            NodeKind::Light(_) => Some(LightParams::default()),
            _ => None,
        };
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            translation: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
            render_order: 0,
            visible: true,
            skinned: false,
            geometry: None,
            materials: SmallVec::new(),
            light,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<Uuid> {
        self.parent
    }

    pub fn children(&self) -> &[Uuid] {
        &self.children
    }

    /// Orientation built from three independent per-axis rotations rather than
    /// one combined euler conversion; axis order matches the authoring tool.
    pub fn orientation(&self) -> Quat {
        Quat::from_rotation_x(self.rotation.x)
            * Quat::from_rotation_y(self.rotation.y)
            * Quat::from_rotation_z(self.rotation.z)
    }

    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.orientation(), self.translation)
    }

    pub fn is_mesh(&self) -> bool {
        self.kind == NodeKind::Mesh
    }

    pub fn primary_material(&self) -> Option<Uuid> {
        self.materials.first().copied()
    }
}

/// A node plus the resources it brings into the scene, shaped as a tree so a
/// whole hierarchy can be added in one call. Resource payloads ride alongside
/// the node; shared materials may appear in several payloads with one uuid.
pub struct ObjectGroup {
    pub node: SceneNode,
    pub geometry: Option<Geometry>,
    pub materials: Vec<Material>,
    pub children: Vec<ObjectGroup>,
}

impl ObjectGroup {
    pub fn new(node: SceneNode) -> Self {
        Self { node, geometry: None, materials: Vec::new(), children: Vec::new() }
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        let id = geometry.id;
        self.node.geometry = Some(id);
        self.geometry = Some(geometry);
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.node.materials.push(material.uuid);
        self.materials.push(material);
        self
    }

    /// References an already-registered material without carrying a payload.
    pub fn with_material_ref(mut self, material: &Material) -> Self {
        self.node.materials.push(material.uuid);
        self.materials.push(material.clone());
        self
    }

    pub fn with_child(mut self, child: ObjectGroup) -> Self {
        self.children.push(child);
        self
    }

    pub fn id(&self) -> Uuid {
        self.node.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_axis_orientation_matches_sequential_rotations() {
        let mut node = SceneNode::new("n", NodeKind::Mesh);
        node.rotation = Vec3::new(0.3, -1.1, 0.7);
        let expected = Quat::from_rotation_x(0.3)
            * Quat::from_rotation_y(-1.1)
            * Quat::from_rotation_z(0.7);
        let diff = node.orientation().dot(expected).abs();
        assert!(diff > 0.9999, "orientation diverged: dot {diff}");
    }

    #[test]
    fn light_nodes_carry_default_params() {
        let node = SceneNode::new("sun", NodeKind::Light(LightKind::Directional));
        assert!(node.light.is_some());
        assert!(SceneNode::new("box", NodeKind::Mesh).light.is_none());
    }
}
