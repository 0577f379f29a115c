use std::collections::HashMap;

use glam::Vec3;
use uuid::Uuid;

use crate::node::{LightKind, NodeKind, SceneNode};

pub(crate) const PICKER_HALF_EXTENT: f32 = 0.4;
pub(crate) const TRANSLATE_SNAP_STEP: f32 = 0.05;
pub(crate) const ROTATE_SNAP_STEP_RADIANS: f32 = 15.0_f32.to_radians();
pub(crate) const SCALE_SNAP_STEP: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperKind {
    Camera,
    PointLight,
    DirectionalLight,
    SpotLight,
    HemisphereLight,
    RectAreaLight,
    Skeleton,
}

impl HelperKind {
    pub fn is_light(self) -> bool {
        matches!(
            self,
            HelperKind::PointLight
                | HelperKind::DirectionalLight
                | HelperKind::SpotLight
                | HelperKind::HemisphereLight
                | HelperKind::RectAreaLight
        )
    }
}

/// Invisible pickable stand-in attached to a helper. Hit-tests resolve back to
/// the owner node, never to the proxy itself.
#[derive(Debug, Clone)]
pub struct PickerProxy {
    pub owner: Uuid,
    pub center: Vec3,
    pub half_extent: Vec3,
}

#[derive(Debug, Clone)]
pub struct Helper {
    pub id: Uuid,
    pub owner: Uuid,
    pub kind: HelperKind,
    pub enabled: bool,
    pub visible: bool,
    pub position: Vec3,
    pub color: [f32; 3],
    pub picker: PickerProxy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperFilter {
    All,
    Lights,
    Cameras,
    Skeletons,
}

impl HelperFilter {
    fn matches(self, kind: HelperKind) -> bool {
        match self {
            HelperFilter::All => true,
            HelperFilter::Lights => kind.is_light(),
            HelperFilter::Cameras => kind == HelperKind::Camera,
            HelperFilter::Skeletons => kind == HelperKind::Skeleton,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformMode {
    Translate,
    Rotate,
    Scale,
}

impl Default for TransformMode {
    fn default() -> Self {
        TransformMode::Translate
    }
}

/// The transform gizmo. Its visibility is tracked independently of the helper
/// scene and ORed into it, so an attached gizmo stays usable while helpers
/// are hidden.
#[derive(Debug, Default)]
pub struct TransformControl {
    pub mode: TransformMode,
    attached: Option<Uuid>,
    pub visible: bool,
}

impl TransformControl {
    pub fn attached(&self) -> Option<Uuid> {
        self.attached
    }

    pub fn snap_step(&self) -> f32 {
        match self.mode {
            TransformMode::Translate => TRANSLATE_SNAP_STEP,
            TransformMode::Rotate => ROTATE_SNAP_STEP_RADIANS,
            TransformMode::Scale => SCALE_SNAP_STEP,
        }
    }
}

/// One auxiliary visual aid per helper-eligible node. Helpers never refresh
/// themselves; every mutation path ends with an explicit `update_helper`.
pub struct SceneHelperRegistry {
    helpers: HashMap<Uuid, Helper>,
    light_helpers_visible: bool,
    helpers_visible: bool,
    control: TransformControl,
}

pub fn helper_kind_for(node: &SceneNode) -> Option<HelperKind> {
    match node.kind {
        NodeKind::Camera => Some(HelperKind::Camera),
        NodeKind::Light(LightKind::Point) => Some(HelperKind::PointLight),
        NodeKind::Light(LightKind::Directional) => Some(HelperKind::DirectionalLight),
        NodeKind::Light(LightKind::Spot) => Some(HelperKind::SpotLight),
        NodeKind::Light(LightKind::Hemisphere) => Some(HelperKind::HemisphereLight),
        NodeKind::Light(LightKind::RectArea) => Some(HelperKind::RectAreaLight),
        NodeKind::Mesh if node.skinned => Some(HelperKind::Skeleton),
        _ => None,
    }
}

impl SceneHelperRegistry {
    pub fn new(light_helpers_visible: bool) -> Self {
        Self {
            helpers: HashMap::new(),
            light_helpers_visible,
            helpers_visible: true,
            control: TransformControl::default(),
        }
    }

    pub fn get(&self, owner: Uuid) -> Option<&Helper> {
        self.helpers.get(&owner)
    }

    pub fn len(&self) -> usize {
        self.helpers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.helpers.is_empty()
    }

    pub fn helpers(&self) -> impl Iterator<Item = &Helper> {
        self.helpers.values()
    }

    pub fn light_helpers_visible(&self) -> bool {
        self.light_helpers_visible
    }

    /// Overall helper-scene visibility: the scene flag ORed with the
    /// independently tracked transform-control visibility.
    pub fn scene_visible(&self) -> bool {
        self.helpers_visible || self.control.visible
    }

    /// Builds the type-appropriate helper if `node` is helper-eligible.
    /// At most one helper exists per node id; a second add is a no-op.
    pub fn add_helper(&mut self, node: &SceneNode) {
        let Some(kind) = helper_kind_for(node) else {
            return;
        };
        if self.helpers.contains_key(&node.id) {
            return;
        }
        let enabled = if kind.is_light() { self.light_helpers_visible } else { false };
        let color = node.light.map(|light| light.color).unwrap_or([1.0, 1.0, 1.0]);
        self.helpers.insert(
            node.id,
            Helper {
                id: Uuid::new_v4(),
                owner: node.id,
                kind,
                enabled,
                visible: false,
                position: node.translation,
                color,
                picker: PickerProxy {
                    owner: node.id,
                    center: node.translation,
                    half_extent: Vec3::splat(PICKER_HALF_EXTENT),
                },
            },
        );
    }

    pub fn remove_helper(&mut self, owner: Uuid) {
        if self.control.attached == Some(owner) {
            self.detach_control();
        }
        if self.helpers.remove(&owner).is_some() {
            log::debug!("[helpers] removed helper for node {owner}");
        }
    }

    /// Explicit refresh; helper state never changes without one of these.
    pub fn update_helper(&mut self, node: &SceneNode, world_translation: Vec3) {
        let Some(helper) = self.helpers.get_mut(&node.id) else {
            return;
        };
        helper.position = world_translation;
        helper.picker.center = world_translation;
        helper.visible = helper.enabled && node.visible;
        if let Some(light) = node.light {
            helper.color = light.color;
        }
    }

    /// Direct enable toggle for one helper, used when the viewport camera
    /// switches and its own helper must hide.
    pub fn set_helper_enabled(&mut self, owner: Uuid, enabled: bool) {
        if let Some(helper) = self.helpers.get_mut(&owner) {
            helper.enabled = enabled;
        }
    }

    /// Targets only helpers whose underlying light matches `light_id`.
    pub fn update_light_helper_visible(&mut self, light_id: Uuid, visible: bool) {
        if let Some(helper) = self.helpers.get_mut(&light_id) {
            if helper.kind.is_light() {
                helper.enabled = visible;
            }
        }
    }

    /// Toggles all helpers matching the filter; with `HelperFilter::All` the
    /// scene-level flag follows too. Light toggles update the shared default
    /// that newly added light helpers inherit.
    pub fn show_helper(&mut self, show: bool, filter: HelperFilter) {
        for helper in self.helpers.values_mut() {
            if filter.matches(helper.kind) {
                helper.enabled = show;
            }
        }
        match filter {
            HelperFilter::All => {
                self.helpers_visible = show;
                self.light_helpers_visible = show;
            }
            HelperFilter::Lights => self.light_helpers_visible = show,
            _ => {}
        }
    }

    pub fn control(&self) -> &TransformControl {
        &self.control
    }

    pub fn set_control_mode(&mut self, mode: TransformMode) {
        self.control.mode = mode;
    }

    pub fn attach_control(&mut self, node_id: Uuid) {
        self.control.attached = Some(node_id);
        self.control.visible = true;
    }

    pub fn detach_control(&mut self) {
        self.control.attached = None;
        self.control.visible = false;
    }

    /// Picker proxies eligible for hit-testing this frame.
    pub fn pickers(&self) -> impl Iterator<Item = &PickerProxy> {
        let scene_visible = self.scene_visible();
        self.helpers
            .values()
            .filter(move |helper| scene_visible && helper.visible)
            .map(|helper| &helper.picker)
    }
}
