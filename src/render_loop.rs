use std::sync::Arc;

use glam::{Vec2, Vec3};
use uuid::Uuid;

use crate::camera_registry::CameraRegistry;
use crate::config::GridConfig;
use crate::geometry_registry::GeometryRegistry;
use crate::helpers::{Helper, HelperKind, SceneHelperRegistry};
use crate::material_registry::{MaterialGpu, MaterialRegistry};
use crate::object_registry::ObjectRegistry;
use crate::picking;
use crate::renderer::{InstanceData, LineVertex, MeshDraw, Renderer};
use crate::texture_cache::TextureCache;

const GRID_COLOR: [f32; 3] = [0.32, 0.33, 0.36];
const GRID_AXIS_COLOR: [f32; 3] = [0.55, 0.56, 0.6];
const CONTROL_AXIS_LENGTH: f32 = 1.2;

/// The node a pointer pick resolved to. Picker-proxy hits already point at
/// the proxy's owner, never the proxy itself.
#[derive(Debug, Clone, Copy)]
pub struct PickHit {
    pub node: Uuid,
    pub distance: f32,
    pub via_helper: bool,
}

/// Owns the render surface and composes the per-frame draw: main scene, then
/// helper scene, then grid overlay onto the same surface.
pub struct RenderLoop {
    pub renderer: Renderer,
    grid_visible: bool,
    grid_extent: f32,
    grid_step: f32,
}

impl RenderLoop {
    pub fn new(renderer: Renderer, grid: &GridConfig) -> Self {
        Self {
            renderer,
            grid_visible: grid.visible,
            grid_extent: grid.extent,
            grid_step: grid.step.max(0.01),
        }
    }

    pub fn show_grid(&mut self, show: bool) {
        self.grid_visible = show;
    }

    pub fn grid_visible(&self) -> bool {
        self.grid_visible
    }

    /// Draws one frame. A headless render loop (no window yet) is a no-op so
    /// scene mutation keeps working before the surface exists.
    pub fn render(
        &mut self,
        objects: &ObjectRegistry,
        geometries: &mut GeometryRegistry,
        materials: &mut MaterialRegistry,
        textures: &TextureCache,
        cameras: &mut CameraRegistry,
        helpers: &SceneHelperRegistry,
    ) -> anyhow::Result<()> {
        cameras.take_needs_render();
        if !self.renderer.is_initialized() {
            return Ok(());
        }
        let instances_list = objects.visible_meshes();

        let mut instances: Vec<InstanceData> = Vec::with_capacity(instances_list.len());
        let mut prepared: Vec<Option<Arc<MaterialGpu>>> = Vec::with_capacity(instances_list.len());
        for instance in &instances_list {
            if let Err(err) = geometries.ensure_gpu(instance.geometry, &mut self.renderer) {
                log::warn!("[render] geometry upload failed for node {}: {err:?}", instance.id);
            }
            let material = match instance.material {
                Some(material_id) => {
                    match materials.prepare_material_gpu(material_id, textures, &mut self.renderer) {
                        Ok(gpu) => Some(gpu),
                        Err(err) => {
                            log::warn!(
                                "[render] material upload failed for node {}: {err:?}",
                                instance.id
                            );
                            self.renderer.fallback_material().ok()
                        }
                    }
                }
                None => self.renderer.fallback_material().ok(),
            };
            prepared.push(material);
            let color = instance
                .material
                .and_then(|id| materials.material(id))
                .map(|material| {
                    [material.color[0], material.color[1], material.color[2], material.opacity]
                })
                .unwrap_or([1.0, 1.0, 1.0, 1.0]);
            instances.push(InstanceData { model: instance.world.to_cols_array_2d(), color });
        }

        let draws: Vec<MeshDraw<'_>> = instances_list
            .iter()
            .enumerate()
            .filter_map(|(index, instance)| {
                let geometry = geometries.gpu(instance.geometry)?;
                Some(MeshDraw {
                    geometry,
                    material: prepared[index].as_deref().map(|gpu| gpu.bind_group()),
                    instance_index: index as u32,
                })
            })
            .collect();

        let mut helper_lines = Vec::new();
        if helpers.scene_visible() {
            for helper in helpers.helpers().filter(|helper| helper.visible) {
                push_helper_lines(&mut helper_lines, helper);
            }
            let control = helpers.control();
            if control.visible {
                if let Some(center) =
                    control.attached().and_then(|id| objects.world_translation(id))
                {
                    push_control_lines(&mut helper_lines, center);
                }
            }
        }
        let grid_lines = if self.grid_visible {
            build_grid_lines(self.grid_extent, self.grid_step)
        } else {
            Vec::new()
        };

        let view_proj = cameras.active().view_projection();
        match self.renderer.render_frame(view_proj, &draws, &instances, &helper_lines, &grid_lines)
        {
            Ok(()) => Ok(()),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                let size = self.renderer.size();
                self.renderer.resize(size);
                Ok(())
            }
            Err(err) => {
                log::warn!("[render] frame skipped: {err}");
                Ok(())
            }
        }
    }

    /// Converts a pointer position into the nearest picked node, testing all
    /// visible mesh nodes plus every helper picker proxy.
    pub fn pick(
        &self,
        pointer: Vec2,
        objects: &ObjectRegistry,
        geometries: &GeometryRegistry,
        cameras: &CameraRegistry,
        helpers: &SceneHelperRegistry,
    ) -> Option<PickHit> {
        let size = self.renderer.size();
        let (origin, dir) = cameras.active().screen_ray(pointer, (size.width, size.height))?;
        let mut best: Option<PickHit> = None;

        for instance in objects.visible_meshes() {
            let Some(bounds) = geometries.bounds(instance.geometry) else {
                continue;
            };
            if let Some(distance) = picking::ray_hit_obb(origin, dir, &instance.world, &bounds) {
                if best.map_or(true, |hit| distance < hit.distance) {
                    best = Some(PickHit { node: instance.id, distance, via_helper: false });
                }
            }
        }
        for picker in helpers.pickers() {
            let min = picker.center - picker.half_extent;
            let max = picker.center + picker.half_extent;
            if let Some((distance, _)) = picking::ray_aabb_intersection(origin, dir, min, max) {
                if best.map_or(true, |hit| distance < hit.distance) {
                    best = Some(PickHit { node: picker.owner, distance, via_helper: true });
                }
            }
        }
        best
    }
}

fn line(out: &mut Vec<LineVertex>, from: Vec3, to: Vec3, color: [f32; 3]) {
    out.push(LineVertex { position: from.to_array(), color });
    out.push(LineVertex { position: to.to_array(), color });
}

fn push_helper_lines(out: &mut Vec<LineVertex>, helper: &Helper) {
    let p = helper.position;
    let c = helper.color;
    match helper.kind {
        HelperKind::PointLight => {
            let r = 0.4;
            line(out, p - Vec3::X * r, p + Vec3::X * r, c);
            line(out, p - Vec3::Y * r, p + Vec3::Y * r, c);
            line(out, p - Vec3::Z * r, p + Vec3::Z * r, c);
            line(out, p + Vec3::new(-r, 0.0, 0.0), p + Vec3::new(0.0, r, 0.0), c);
            line(out, p + Vec3::new(0.0, r, 0.0), p + Vec3::new(r, 0.0, 0.0), c);
            line(out, p + Vec3::new(r, 0.0, 0.0), p + Vec3::new(0.0, -r, 0.0), c);
            line(out, p + Vec3::new(0.0, -r, 0.0), p + Vec3::new(-r, 0.0, 0.0), c);
        }
        HelperKind::DirectionalLight => {
            let tip = p - Vec3::Y * 1.5;
            line(out, p, tip, c);
            line(out, tip, tip + Vec3::new(0.15, 0.3, 0.0), c);
            line(out, tip, tip + Vec3::new(-0.15, 0.3, 0.0), c);
            let r = 0.3;
            line(out, p + Vec3::new(-r, 0.0, -r), p + Vec3::new(r, 0.0, -r), c);
            line(out, p + Vec3::new(r, 0.0, -r), p + Vec3::new(r, 0.0, r), c);
            line(out, p + Vec3::new(r, 0.0, r), p + Vec3::new(-r, 0.0, r), c);
            line(out, p + Vec3::new(-r, 0.0, r), p + Vec3::new(-r, 0.0, -r), c);
        }
        HelperKind::SpotLight => {
            let depth = 1.2;
            let r = 0.5;
            let base = p - Vec3::Y * depth;
            for corner in [
                base + Vec3::new(-r, 0.0, -r),
                base + Vec3::new(r, 0.0, -r),
                base + Vec3::new(r, 0.0, r),
                base + Vec3::new(-r, 0.0, r),
            ] {
                line(out, p, corner, c);
            }
            line(out, base + Vec3::new(-r, 0.0, -r), base + Vec3::new(r, 0.0, -r), c);
            line(out, base + Vec3::new(r, 0.0, -r), base + Vec3::new(r, 0.0, r), c);
            line(out, base + Vec3::new(r, 0.0, r), base + Vec3::new(-r, 0.0, r), c);
            line(out, base + Vec3::new(-r, 0.0, r), base + Vec3::new(-r, 0.0, -r), c);
        }
        HelperKind::HemisphereLight => {
            let r = 0.45;
            line(out, p - Vec3::X * r, p + Vec3::X * r, c);
            line(out, p - Vec3::X * r, p + Vec3::Y * r, c);
            line(out, p + Vec3::Y * r, p + Vec3::X * r, c);
            line(out, p - Vec3::Z * r, p + Vec3::Y * r, c);
            line(out, p + Vec3::Y * r, p + Vec3::Z * r, c);
        }
        HelperKind::RectAreaLight => {
            let w = 0.6;
            let h = 0.4;
            line(out, p + Vec3::new(-w, -h, 0.0), p + Vec3::new(w, -h, 0.0), c);
            line(out, p + Vec3::new(w, -h, 0.0), p + Vec3::new(w, h, 0.0), c);
            line(out, p + Vec3::new(w, h, 0.0), p + Vec3::new(-w, h, 0.0), c);
            line(out, p + Vec3::new(-w, h, 0.0), p + Vec3::new(-w, -h, 0.0), c);
        }
        HelperKind::Camera => {
            let depth = 0.8;
            let r = 0.35;
            let back = p + Vec3::Z * depth;
            for corner in [
                back + Vec3::new(-r, -r, 0.0),
                back + Vec3::new(r, -r, 0.0),
                back + Vec3::new(r, r, 0.0),
                back + Vec3::new(-r, r, 0.0),
            ] {
                line(out, p, corner, c);
            }
            line(out, back + Vec3::new(-r, -r, 0.0), back + Vec3::new(r, -r, 0.0), c);
            line(out, back + Vec3::new(r, -r, 0.0), back + Vec3::new(r, r, 0.0), c);
            line(out, back + Vec3::new(r, r, 0.0), back + Vec3::new(-r, r, 0.0), c);
            line(out, back + Vec3::new(-r, r, 0.0), back + Vec3::new(-r, -r, 0.0), c);
        }
        HelperKind::Skeleton => {
            line(out, p, p + Vec3::Y * 1.0, c);
            line(out, p + Vec3::Y * 0.5, p + Vec3::new(0.4, 0.7, 0.0), c);
            line(out, p + Vec3::Y * 0.5, p + Vec3::new(-0.4, 0.7, 0.0), c);
        }
    }
}

fn push_control_lines(out: &mut Vec<LineVertex>, center: Vec3) {
    line(out, center, center + Vec3::X * CONTROL_AXIS_LENGTH, [0.9, 0.2, 0.2]);
    line(out, center, center + Vec3::Y * CONTROL_AXIS_LENGTH, [0.2, 0.9, 0.2]);
    line(out, center, center + Vec3::Z * CONTROL_AXIS_LENGTH, [0.2, 0.4, 0.9]);
}

fn build_grid_lines(extent: f32, step: f32) -> Vec<LineVertex> {
    let mut out = Vec::new();
    let count = (extent / step).floor() as i32;
    for i in -count..=count {
        let offset = i as f32 * step;
        let color = if i == 0 { GRID_AXIS_COLOR } else { GRID_COLOR };
        line(&mut out, Vec3::new(offset, 0.0, -extent), Vec3::new(offset, 0.0, extent), color);
        line(&mut out, Vec3::new(-extent, 0.0, offset), Vec3::new(extent, 0.0, offset), color);
    }
    out
}
