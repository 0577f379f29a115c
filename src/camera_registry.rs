use std::collections::HashMap;

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use uuid::Uuid;

use crate::config::CameraConfig;
use crate::node::SceneNode;

const DEFAULT_UP: Vec3 = Vec3::Y;
const CAMERA_TWEEN_SECONDS: f32 = 0.6;
const CAMERA_RESET_EPSILON: f32 = 1e-3;

#[derive(Debug, Clone, Copy)]
pub enum CameraProjection {
    Perspective { fov_y_radians: f32, near: f32, far: f32 },
    Orthographic { half_height: f32, near: f32, far: f32 },
}

#[derive(Debug, Clone)]
pub struct EditorCamera {
    pub id: Uuid,
    pub name: String,
    pub projection: CameraProjection,
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub aspect: f32,
}

impl EditorCamera {
    pub fn perspective(name: impl Into<String>, position: Vec3, target: Vec3, fov_y_radians: f32, near: f32, far: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            projection: CameraProjection::Perspective { fov_y_radians, near, far },
            position,
            target,
            up: DEFAULT_UP,
            aspect: 16.0 / 9.0,
        }
    }

    pub fn orthographic(name: impl Into<String>, position: Vec3, target: Vec3, half_height: f32, near: f32, far: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            projection: CameraProjection::Orthographic { half_height, near, far },
            position,
            target,
            up: DEFAULT_UP,
            aspect: 16.0 / 9.0,
        }
    }

    pub fn is_perspective(&self) -> bool {
        matches!(self.projection, CameraProjection::Perspective { .. })
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        let aspect = self.aspect.max(0.0001);
        match self.projection {
            CameraProjection::Perspective { fov_y_radians, near, far } => {
                Mat4::perspective_rh_gl(fov_y_radians, aspect, near, far)
            }
            CameraProjection::Orthographic { half_height, near, far } => {
                let half_width = half_height * aspect;
                Mat4::orthographic_rh_gl(-half_width, half_width, -half_height, half_height, near, far)
            }
        }
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// World-space ray through a screen position, for picking.
    pub fn screen_ray(&self, screen: Vec2, viewport: (u32, u32)) -> Option<(Vec3, Vec3)> {
        let (width, height) = viewport;
        if width == 0 || height == 0 {
            return None;
        }
        let ndc_x = (2.0 * screen.x / width as f32) - 1.0;
        let ndc_y = 1.0 - (2.0 * screen.y / height as f32);
        let clip = Vec4::new(ndc_x, ndc_y, 1.0, 1.0);
        let inv_view_proj = self.view_projection().inverse();
        let world = inv_view_proj * clip;
        if world.w.abs() < f32::EPSILON {
            return None;
        }
        let world_point = world.truncate() / world.w;
        match self.projection {
            CameraProjection::Perspective { .. } => {
                let dir = (world_point - self.position).normalize();
                Some((self.position, dir))
            }
            CameraProjection::Orthographic { .. } => {
                let dir = (self.target - self.position).normalize();
                let near_clip = Vec4::new(ndc_x, ndc_y, -1.0, 1.0);
                let near_world = inv_view_proj * near_clip;
                if near_world.w.abs() < f32::EPSILON {
                    return None;
                }
                Some((near_world.truncate() / near_world.w, dir))
            }
        }
    }
}

/// Orbit-style controller storing yaw/pitch around a target.
#[derive(Debug, Clone)]
pub struct OrbitControls {
    pub target: Vec3,
    pub radius: f32,
    pub yaw_radians: f32,
    pub pitch_radians: f32,
}

impl OrbitControls {
    pub fn new(target: Vec3, radius: f32) -> Self {
        Self { target, radius: radius.max(0.01), yaw_radians: 0.0, pitch_radians: 0.0 }
    }

    pub fn orbit(&mut self, delta: Vec2) {
        self.yaw_radians += delta.x;
        self.pitch_radians = (self.pitch_radians + delta.y)
            .clamp(-std::f32::consts::FRAC_PI_2 + 0.01, std::f32::consts::FRAC_PI_2 - 0.01);
    }

    pub fn zoom(&mut self, factor: f32) {
        self.radius = (self.radius * factor).clamp(0.1, 10_000.0);
    }

    pub fn position(&self) -> Vec3 {
        let rotation = Quat::from_euler(glam::EulerRot::YXZ, self.yaw_radians, self.pitch_radians, 0.0);
        self.target + rotation * Vec3::new(0.0, 0.0, self.radius)
    }

    fn sync_from(&mut self, camera: &EditorCamera) {
        self.target = camera.target;
        self.radius = (camera.position - camera.target).length().max(0.01);
    }
}

struct CameraTween {
    from: Vec3,
    to: Vec3,
    elapsed: f32,
    duration: f32,
}

fn ease_in_out_quad(t: f32) -> f32 {
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
    }
}

/// Registered camera instances plus the single active viewport camera.
pub struct CameraRegistry {
    cameras: HashMap<Uuid, EditorCamera>,
    active: Uuid,
    default_id: Uuid,
    home_position: Vec3,
    pub controls: OrbitControls,
    tween: Option<CameraTween>,
    needs_render: bool,
}

impl CameraRegistry {
    pub fn new(config: &CameraConfig) -> Self {
        let position = Vec3::from_array(config.position);
        let target = Vec3::from_array(config.target);
        let viewport = EditorCamera::perspective(
            "viewport",
            position,
            target,
            config.fov_degrees.to_radians(),
            config.near,
            config.far,
        );
        let top = EditorCamera::orthographic(
            "top",
            target + Vec3::Y * 50.0,
            target,
            10.0,
            config.near,
            config.far,
        );
        let front = EditorCamera::orthographic(
            "front",
            target + Vec3::Z * 50.0,
            target,
            10.0,
            config.near,
            config.far,
        );
        let default_id = viewport.id;
        let controls = OrbitControls::new(target, (position - target).length());
        let mut cameras = HashMap::new();
        cameras.insert(viewport.id, viewport);
        cameras.insert(top.id, top);
        cameras.insert(front.id, front);
        Self {
            cameras,
            active: default_id,
            default_id,
            home_position: position,
            controls,
            tween: None,
            needs_render: true,
        }
    }

    pub fn active(&self) -> &EditorCamera {
        self.cameras.get(&self.active).expect("active camera registered")
    }

    pub fn active_mut(&mut self) -> &mut EditorCamera {
        self.cameras.get_mut(&self.active).expect("active camera registered")
    }

    pub fn active_id(&self) -> Uuid {
        self.active
    }

    pub fn home_position(&self) -> Vec3 {
        self.home_position
    }

    pub fn get(&self, id: Uuid) -> Option<&EditorCamera> {
        self.cameras.get(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.cameras.contains_key(&id)
    }

    /// Registers the camera instance carried by a camera node entering the
    /// scene, addressable by the node's own id.
    pub fn register_node_camera(&mut self, node: &SceneNode) {
        let mut camera = EditorCamera::perspective(
            node.name.clone(),
            node.translation,
            Vec3::ZERO,
            50.0_f32.to_radians(),
            0.1,
            2000.0,
        );
        camera.id = node.id;
        self.cameras.insert(node.id, camera);
    }

    pub fn unregister(&mut self, id: Uuid) {
        if id == self.default_id {
            log::warn!("[cameras] refusing to unregister the default viewport camera");
            return;
        }
        if self.cameras.remove(&id).is_some() && self.active == id {
            self.active = self.default_id;
            self.reset_controls();
            self.needs_render = true;
        }
    }

    /// Switches the viewport camera to the named instance. Returns the
    /// (previous, next) ids so helper bookkeeping can follow; the caller owns
    /// detaching and reattaching helpers.
    pub fn set_active_by_name(&mut self, name: &str) -> Option<(Uuid, Uuid)> {
        let next = self
            .cameras
            .values()
            .find(|camera| camera.name == name)
            .map(|camera| camera.id)?;
        let previous = self.active;
        self.active = next;
        self.reset_controls();
        self.needs_render = true;
        Some((previous, next))
    }

    pub fn reset_controls(&mut self) {
        let active = self.cameras.get(&self.active).expect("active camera registered").clone();
        self.controls.sync_from(&active);
    }

    /// Applies the surface aspect; orthographic cameras keep their framing.
    pub fn update_aspect(&mut self, aspect: f32) {
        if !aspect.is_finite() || aspect <= 0.0 {
            return;
        }
        for camera in self.cameras.values_mut() {
            if camera.is_perspective() {
                camera.aspect = aspect;
            }
        }
        self.needs_render = true;
    }

    /// Starts an eased, position-only tween toward `target`. Rotation (the
    /// look-at target) stays where it is.
    pub fn to_animate_camera(&mut self, target: Vec3) {
        let from = self.active().position;
        self.tween =
            Some(CameraTween { from, to: target, elapsed: 0.0, duration: CAMERA_TWEEN_SECONDS });
    }

    /// Tweens back to `reference` only when the camera actually moved away
    /// from it; within epsilon this is a no-op.
    pub fn camera_animate_reset(&mut self, reference: Vec3) {
        if (self.active().position - reference).length() <= CAMERA_RESET_EPSILON {
            return;
        }
        self.to_animate_camera(reference);
    }

    pub fn is_animating(&self) -> bool {
        self.tween.is_some()
    }

    /// Advances the tween; returns true while the camera is still moving.
    pub fn advance(&mut self, dt: f32) -> bool {
        let Some(tween) = self.tween.as_mut() else {
            return false;
        };
        tween.elapsed += dt;
        let t = (tween.elapsed / tween.duration).clamp(0.0, 1.0);
        let position = tween.from.lerp(tween.to, ease_in_out_quad(t));
        let finished = t >= 1.0;
        self.active_mut().position = position;
        if finished {
            self.tween = None;
            self.reset_controls();
        }
        self.needs_render = true;
        true
    }

    /// Applies the orbit controller to the active camera.
    pub fn apply_controls(&mut self) {
        if self.tween.is_some() {
            return;
        }
        let position = self.controls.position();
        let target = self.controls.target;
        let camera = self.active_mut();
        camera.position = position;
        camera.target = target;
    }

    pub fn take_needs_render(&mut self) -> bool {
        std::mem::take(&mut self.needs_render)
    }

    pub fn request_render(&mut self) {
        self.needs_render = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CameraRegistry {
        CameraRegistry::new(&CameraConfig::default())
    }

    #[test]
    fn tween_lands_exactly_on_target() {
        let mut cameras = registry();
        let goal = Vec3::new(3.0, 4.0, 5.0);
        cameras.to_animate_camera(goal);
        let mut guard = 0;
        while cameras.advance(0.05) {
            guard += 1;
            assert!(guard < 100, "tween never finished");
        }
        assert!((cameras.active().position - goal).length() < 1e-4);
        assert!(!cameras.is_animating());
    }

    #[test]
    fn reset_skips_within_epsilon() {
        let mut cameras = registry();
        let home = cameras.active().position;
        cameras.camera_animate_reset(home);
        assert!(!cameras.is_animating());
        cameras.camera_animate_reset(home + Vec3::splat(1.0));
        assert!(cameras.is_animating());
    }

    #[test]
    fn aspect_only_touches_perspective_cameras() {
        let mut cameras = registry();
        cameras.update_aspect(2.0);
        assert!((cameras.active().aspect - 2.0).abs() < f32::EPSILON);
        let (_, top) = cameras.set_active_by_name("top").expect("top camera");
        assert!(cameras.get(top).is_some());
        assert!(!cameras.active().is_perspective());
    }

    #[test]
    fn switch_by_name_resets_controls_target() {
        let mut cameras = registry();
        cameras.controls.target = Vec3::splat(9.0);
        cameras.set_active_by_name("front").expect("front camera");
        assert!((cameras.controls.target - cameras.active().target).length() < 1e-5);
    }
}
