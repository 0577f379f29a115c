use anyhow::{Context, Result};
use glam::{Vec2, Vec3};
use uuid::Uuid;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::window::WindowId;

use crate::camera_registry::CameraRegistry;
use crate::config::EngineConfig;
use crate::geometry_registry::GeometryRegistry;
use crate::helpers::{HelperFilter, SceneHelperRegistry, TransformMode};
use crate::material_registry::{
    MaterialKind, MaterialRegistry, MaterialValue, SetMaterialValue,
};
use crate::node::{LightParams, ObjectGroup, SceneNode};
use crate::object_registry::{ObjectRegistry, SceneDeps, TransformKind};
use crate::asset_store::PersistentAssetStore;
use crate::render_loop::{PickHit, RenderLoop};
use crate::renderer::Renderer;
use crate::texture_cache::{RealizedTexture, TextureCache};
use crate::time::Time;

/// The engine core: every manager wired together at construction time. The
/// facade routes id-addressed commands to the owning manager and hands each
/// operation only the sibling managers it needs.
///
/// Asynchronous resource work (fetch, decode) runs on a current-thread tokio
/// runtime whose `LocalSet` is pumped once per tick: deferred continuations
/// interleave with synchronous scene mutation, and nothing ever runs on
/// another OS thread.
pub struct Engine {
    pub objects: ObjectRegistry,
    pub geometries: GeometryRegistry,
    pub materials: MaterialRegistry,
    pub textures: TextureCache,
    pub store: PersistentAssetStore,
    pub cameras: CameraRegistry,
    pub helpers: SceneHelperRegistry,
    pub render_loop: RenderLoop,
    time: Time,
    rt: tokio::runtime::Runtime,
    local: tokio::task::LocalSet,
    window_title: String,
    pointer: Vec2,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let store = PersistentAssetStore::open(&config.store.root, config.store.budget_bytes)
            .context("Failed to open persistent asset store")?;
        let textures = TextureCache::new(store.clone());
        let renderer = Renderer::new(
            PhysicalSize::new(config.window.width, config.window.height),
            config.window.vsync,
        );
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build tokio runtime")?;
        Ok(Self {
            objects: ObjectRegistry::new(),
            geometries: GeometryRegistry::new(),
            materials: MaterialRegistry::new(),
            textures,
            store,
            cameras: CameraRegistry::new(&config.camera),
            helpers: SceneHelperRegistry::new(config.helpers.light_helpers_visible),
            render_loop: RenderLoop::new(renderer, &config.grid),
            time: Time::new(),
            rt,
            local: tokio::task::LocalSet::new(),
            window_title: config.window.title.clone(),
            pointer: Vec2::ZERO,
        })
    }

    /// Drives pending deferred work (background fetches, decodes) one
    /// scheduling pass without blocking on anything unfinished.
    pub fn pump(&self) {
        self.rt.block_on(self.local.run_until(tokio::task::yield_now()));
    }

    fn graph_parts(&mut self) -> (&mut ObjectRegistry, SceneDeps<'_>) {
        let Engine { objects, geometries, materials, cameras, helpers, textures, .. } = self;
        (objects, SceneDeps { geometries, materials, cameras, helpers, textures })
    }

    // ---- scene graph -----------------------------------------------------

    pub fn add_object(
        &mut self,
        group: ObjectGroup,
        parent: Option<Uuid>,
        index: Option<usize>,
    ) -> Option<Uuid> {
        let (objects, mut deps) = self.graph_parts();
        let added = objects.add_object(group, parent, index, &mut deps);
        if added.is_some() {
            self.cameras.request_render();
        }
        added
    }

    pub fn remove_object(&mut self, id: Uuid) -> bool {
        let (objects, mut deps) = self.graph_parts();
        let removed = objects.remove_object(id, &mut deps);
        if removed {
            self.cameras.request_render();
        }
        removed
    }

    pub fn swap_object_mesh(
        &mut self,
        old_id: Uuid,
        group: ObjectGroup,
        slot_index: Option<usize>,
    ) -> Option<Uuid> {
        let (objects, mut deps) = self.graph_parts();
        let swapped = objects.swap_object_mesh(old_id, group, slot_index, &mut deps);
        if swapped.is_some() {
            self.cameras.request_render();
        }
        swapped
    }

    pub fn set_object_transform(&mut self, id: Uuid, value: Vec3, kind: TransformKind) {
        let Engine { objects, helpers, cameras, .. } = self;
        objects.set_object_transform(id, value, kind, helpers);
        cameras.request_render();
    }

    pub fn get_object(&self, id: Uuid) -> Option<&SceneNode> {
        self.objects.get_object(id)
    }

    pub fn set_node_visible(&mut self, id: Uuid, visible: bool) {
        if let Some(node) = self.objects.get_object_mut(id) {
            node.visible = visible;
        } else {
            log::warn!("[engine] visibility change skipped, node {id} not in scene");
            return;
        }
        self.refresh_helper(id);
        self.cameras.request_render();
    }

    /// Mutates a light node's parameters; the helper refresh is explicit and
    /// immediate, matching the no-auto-refresh helper rule.
    pub fn update_light(&mut self, id: Uuid, params: LightParams) {
        match self.objects.get_object_mut(id) {
            Some(node) if node.light.is_some() => node.light = Some(params),
            _ => {
                log::warn!("[engine] light update skipped, {id} is not a light in the scene");
                return;
            }
        }
        self.refresh_helper(id);
        self.cameras.request_render();
    }

    pub fn refresh_helper(&mut self, id: Uuid) {
        let Engine { objects, helpers, .. } = self;
        if let Some(node) = objects.get_object(id) {
            let world = objects.world_translation(id).unwrap_or(node.translation);
            helpers.update_helper(node, world);
        }
    }

    // ---- materials -------------------------------------------------------

    pub fn update_material(&mut self, material: Uuid, key: &str, value: MaterialValue) {
        self.update_material_with(material, key, value, false);
    }

    pub fn update_material_with(
        &mut self,
        material: Uuid,
        key: &str,
        value: MaterialValue,
        need_delete_image: bool,
    ) {
        let Engine { materials, textures, rt, local, cameras, .. } = self;
        rt.block_on(local.run_until(materials.set_material_value(
            textures,
            SetMaterialValue { material, key: key.to_string(), value, need_delete_image },
        )));
        cameras.request_render();
    }

    /// Swaps the material registered under `uuid` for one of `new_kind`,
    /// replaying the old property snapshot, then rescans the scene so the
    /// refcount matches the consumers that now resolve to the new material.
    pub fn change_material(&mut self, uuid: Uuid, new_kind: MaterialKind) -> bool {
        let changed = {
            let Engine { materials, textures, rt, local, .. } = self;
            rt.block_on(local.run_until(materials.change_material(textures, uuid, new_kind)))
        };
        if changed {
            let consumers = self.objects.count_material_consumers(uuid);
            self.materials.sync_ref_count(uuid, consumers);
            self.cameras.request_render();
        }
        changed
    }

    pub fn delete_material(&mut self, uuid: Uuid, need_delete_image: bool) {
        let Engine { materials, textures, .. } = self;
        materials.remove_material(uuid, need_delete_image, textures);
    }

    /// Clears the named texture-map slots on one material, optionally freeing
    /// the cached images they pointed at.
    pub fn delete_material_maps(&mut self, material: Uuid, keys: &[&str], need_delete_image: bool) {
        for key in keys {
            self.update_material_with(material, key, MaterialValue::Empty, need_delete_image);
        }
    }

    // ---- textures --------------------------------------------------------

    pub fn add_image_data(&self, uuid: Uuid, url: &str) {
        self.textures.add_image_data(uuid, url);
    }

    pub fn add_image_blob(&self, uuid: Uuid, bytes: Vec<u8>) {
        self.textures.add_image_blob(uuid, bytes);
    }

    pub fn add_texture_image(&mut self, uuid: Uuid) -> bool {
        let Engine { textures, rt, local, .. } = self;
        rt.block_on(local.run_until(textures.add_texture_image(uuid)))
    }

    pub fn add_rgbe_texture_image(&mut self, uuid: Uuid) -> bool {
        let Engine { textures, rt, local, .. } = self;
        rt.block_on(local.run_until(textures.add_rgbe_texture_image(uuid)))
    }

    pub fn get_image(&self, uuid: Uuid) -> Option<RealizedTexture> {
        self.textures.get_image(uuid)
    }

    // ---- cameras ---------------------------------------------------------

    /// Switches the viewport camera, hiding the new viewport camera's own
    /// helper and restoring the one it replaced.
    pub fn change_camera(&mut self, name: &str) -> bool {
        let Some((previous, next)) = self.cameras.set_active_by_name(name) else {
            log::warn!("[engine] change camera skipped, no camera named '{name}'");
            return false;
        };
        self.helpers.set_helper_enabled(next, false);
        self.helpers.set_helper_enabled(previous, true);
        self.refresh_helper(next);
        self.refresh_helper(previous);
        true
    }

    pub fn to_animate_camera(&mut self, target: Vec3) {
        self.cameras.to_animate_camera(target);
    }

    pub fn camera_animate_reset(&mut self, reference: Vec3) {
        self.cameras.camera_animate_reset(reference);
    }

    // ---- helpers & overlays ---------------------------------------------

    pub fn show_helper(&mut self, show: bool, filter: HelperFilter) {
        self.helpers.show_helper(show, filter);
        let ids: Vec<Uuid> = self.objects.ids().collect();
        for id in ids {
            self.refresh_helper(id);
        }
        self.cameras.request_render();
    }

    pub fn update_light_helper_visible(&mut self, light_id: Uuid, visible: bool) {
        self.helpers.update_light_helper_visible(light_id, visible);
        self.refresh_helper(light_id);
        self.cameras.request_render();
    }

    pub fn show_grid(&mut self, show: bool) {
        self.render_loop.show_grid(show);
        self.cameras.request_render();
    }

    pub fn set_control_mode(&mut self, mode: TransformMode) {
        self.helpers.set_control_mode(mode);
    }

    // ---- picking & frame loop -------------------------------------------

    /// Resolves a pointer position to a node and attaches it to the
    /// transform control, exactly as a click in the viewport does.
    pub fn pick_at(&mut self, pointer: Vec2) -> Option<PickHit> {
        let hit = {
            let Engine { render_loop, objects, geometries, cameras, helpers, .. } = self;
            render_loop.pick(pointer, objects, geometries, cameras, helpers)
        };
        match hit {
            Some(hit) => {
                self.helpers.attach_control(hit.node);
                self.cameras.request_render();
                Some(hit)
            }
            None => {
                self.helpers.detach_control();
                None
            }
        }
    }

    /// One tick of the self-scheduling loop: advance deferred async work and
    /// the camera tween, apply orbit controls, then draw.
    pub fn render_tick(&mut self) -> Result<()> {
        self.time.tick();
        let dt = self.time.delta_seconds();
        self.pump();
        self.cameras.advance(dt);
        self.cameras.apply_controls();
        let Engine { objects, geometries, materials, textures, cameras, helpers, render_loop, .. } =
            self;
        render_loop.render(objects, geometries, materials, textures, cameras, helpers)
    }
}

impl ApplicationHandler for Engine {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(err) = self.render_loop.renderer.ensure_window(event_loop, &self.window_title) {
            log::error!("[engine] window initialization failed: {err:?}");
            event_loop.exit();
            return;
        }
        let aspect = self.render_loop.renderer.aspect_ratio();
        self.cameras.update_aspect(aspect);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                self.render_loop.renderer.resize(size);
                self.cameras.update_aspect(self.render_loop.renderer.aspect_ratio());
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.pointer = Vec2::new(position.x as f32, position.y as f32);
            }
            WindowEvent::MouseInput { state: ElementState::Pressed, button: MouseButton::Left, .. } => {
                self.pick_at(self.pointer);
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.render_tick() {
                    log::warn!("[engine] render tick failed: {err:?}");
                }
                if let Some(window) = self.render_loop.renderer.window() {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.render_loop.renderer.window() {
            window.request_redraw();
        }
    }
}

/// Opens a window and runs the engine until the window closes.
pub fn run(config: EngineConfig) -> Result<()> {
    let _ = env_logger::try_init();
    let event_loop = EventLoop::new().context("Failed to create winit event loop")?;
    let mut engine = Engine::new(config)?;
    event_loop.run_app(&mut engine).context("Event loop execution failed")?;
    Ok(())
}
