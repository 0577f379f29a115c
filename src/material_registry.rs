use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use bytemuck::{Pod, Zeroable};
use futures::future::join_all;
use glam::Vec2;
use uuid::Uuid;

use crate::renderer::Renderer;
use crate::texture_cache::{MapRole, TextureCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    Basic,
    Lambert,
    Phong,
    Standard,
    Physical,
}

impl MaterialKind {
    pub fn label(self) -> &'static str {
        match self {
            MaterialKind::Basic => "Basic",
            MaterialKind::Lambert => "Lambert",
            MaterialKind::Phong => "Phong",
            MaterialKind::Standard => "Standard",
            MaterialKind::Physical => "Physical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialSide {
    Front,
    Back,
    Double,
}

pub struct MapSlot {
    pub key: &'static str,
    pub role: MapRole,
    pub rotation_capable: bool,
}

/// Every texture-map slot a material can carry, in replay order. The
/// environment slot ignores per-texture rotation; its orientation is the
/// compound `envMapRotation` field instead.
pub static MAP_SLOTS: [MapSlot; 7] = [
    MapSlot { key: "map", role: MapRole::BaseColor, rotation_capable: true },
    MapSlot { key: "normalMap", role: MapRole::Normal, rotation_capable: true },
    MapSlot { key: "roughnessMap", role: MapRole::Roughness, rotation_capable: true },
    MapSlot { key: "metalnessMap", role: MapRole::Metalness, rotation_capable: true },
    MapSlot { key: "aoMap", role: MapRole::AmbientOcclusion, rotation_capable: true },
    MapSlot { key: "emissiveMap", role: MapRole::Emissive, rotation_capable: true },
    MapSlot { key: "envMap", role: MapRole::Environment, rotation_capable: false },
];

pub fn slot_for_key(key: &str) -> Option<&'static MapSlot> {
    MAP_SLOTS.iter().find(|slot| slot.key == key)
}

#[derive(Debug, Clone)]
pub struct Material {
    pub uuid: Uuid,
    pub name: String,
    pub kind: MaterialKind,
    pub color: [f32; 3],
    pub emissive: [f32; 3],
    pub sheen_color: [f32; 3],
    pub specular_color: [f32; 3],
    pub roughness: f32,
    pub metalness: f32,
    pub shininess: f32,
    pub opacity: f32,
    pub ior: f32,
    pub clearcoat: f32,
    pub env_map_intensity: f32,
    pub env_map_rotation: [f32; 3],
    pub normal_scale: Vec2,
    pub transparent: bool,
    pub wireframe: bool,
    pub flat_shading: bool,
    pub side: MaterialSide,
    pub map: Option<Uuid>,
    pub normal_map: Option<Uuid>,
    pub roughness_map: Option<Uuid>,
    pub metalness_map: Option<Uuid>,
    pub ao_map: Option<Uuid>,
    pub emissive_map: Option<Uuid>,
    pub env_map: Option<Uuid>,
}

impl Material {
    pub fn new(name: impl Into<String>, kind: MaterialKind) -> Self {
        Self::with_uuid(Uuid::new_v4(), name, kind)
    }

    pub fn with_uuid(uuid: Uuid, name: impl Into<String>, kind: MaterialKind) -> Self {
        Self {
            uuid,
            name: name.into(),
            kind,
            color: [1.0, 1.0, 1.0],
            emissive: [0.0, 0.0, 0.0],
            sheen_color: [0.0, 0.0, 0.0],
            specular_color: [1.0, 1.0, 1.0],
            roughness: 1.0,
            metalness: 0.0,
            shininess: 30.0,
            opacity: 1.0,
            ior: 1.5,
            clearcoat: 0.0,
            env_map_intensity: 1.0,
            env_map_rotation: [0.0; 3],
            normal_scale: Vec2::ONE,
            transparent: false,
            wireframe: false,
            flat_shading: false,
            side: MaterialSide::Front,
            map: None,
            normal_map: None,
            roughness_map: None,
            metalness_map: None,
            ao_map: None,
            emissive_map: None,
            env_map: None,
        }
    }

    pub fn slot(&self, key: &str) -> Option<Uuid> {
        match key {
            "map" => self.map,
            "normalMap" => self.normal_map,
            "roughnessMap" => self.roughness_map,
            "metalnessMap" => self.metalness_map,
            "aoMap" => self.ao_map,
            "emissiveMap" => self.emissive_map,
            "envMap" => self.env_map,
            _ => None,
        }
    }

    fn slot_mut(&mut self, key: &str) -> Option<&mut Option<Uuid>> {
        match key {
            "map" => Some(&mut self.map),
            "normalMap" => Some(&mut self.normal_map),
            "roughnessMap" => Some(&mut self.roughness_map),
            "metalnessMap" => Some(&mut self.metalness_map),
            "aoMap" => Some(&mut self.ao_map),
            "emissiveMap" => Some(&mut self.emissive_map),
            "envMap" => Some(&mut self.env_map),
            _ => None,
        }
    }

    pub fn slots(&self) -> impl Iterator<Item = (&'static MapSlot, Uuid)> + '_ {
        MAP_SLOTS.iter().filter_map(|slot| self.slot(slot.key).map(|id| (slot, id)))
    }

    pub fn supports_key(kind: MaterialKind, key: &str) -> bool {
        use MaterialKind::*;
        match key {
            "color" | "opacity" | "transparent" | "wireframe" | "flatShading" | "side"
            | "name" | "map" | "aoMap" | "envMap" => true,
            "emissive" | "emissiveMap" | "normalMap" | "normalScale" => kind != Basic,
            "roughness" | "metalness" | "roughnessMap" | "metalnessMap"
            | "envMapIntensity" | "envMapRotation" => matches!(kind, Standard | Physical),
            "shininess" => kind == Phong,
            "ior" | "clearcoat" | "sheenColor" | "specularColor" => kind == Physical,
            _ => false,
        }
    }

    /// Field-by-field copy into a fresh material of `kind`, used when a node
    /// swap replaces a mesh. Texture maps are cloned by reference (same image
    /// uuid); the env-map rotation is rebuilt component-wise rather than
    /// copied as a unit.
    pub fn migrated_from(snapshot: &Material, kind: MaterialKind) -> Self {
        let mut material = Material::new(snapshot.name.clone(), kind);
        material.color = snapshot.color;
        material.opacity = snapshot.opacity;
        material.transparent = snapshot.transparent;
        material.wireframe = snapshot.wireframe;
        material.flat_shading = snapshot.flat_shading;
        material.side = snapshot.side;
        if Self::supports_key(kind, "emissive") {
            material.emissive = snapshot.emissive;
            material.normal_scale = snapshot.normal_scale;
        }
        if Self::supports_key(kind, "roughness") {
            material.roughness = snapshot.roughness;
            material.metalness = snapshot.metalness;
            material.env_map_intensity = snapshot.env_map_intensity;
            material.env_map_rotation = [
                snapshot.env_map_rotation[0],
                snapshot.env_map_rotation[1],
                snapshot.env_map_rotation[2],
            ];
        }
        if Self::supports_key(kind, "shininess") {
            material.shininess = snapshot.shininess;
        }
        if Self::supports_key(kind, "ior") {
            material.ior = snapshot.ior;
            material.clearcoat = snapshot.clearcoat;
            material.sheen_color = snapshot.sheen_color;
            material.specular_color = snapshot.specular_color;
        }
        for slot in &MAP_SLOTS {
            if !Self::supports_key(kind, slot.key) {
                continue;
            }
            if let (Some(target), Some(id)) = (material.slot_mut(slot.key), snapshot.slot(slot.key))
            {
                *target = Some(id);
            }
        }
        material
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MaterialValue {
    Number(f64),
    Bool(bool),
    Color([f32; 3]),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Text(String),
    Empty,
}

impl MaterialValue {
    fn as_color(&self) -> Option<[f32; 3]> {
        match self {
            MaterialValue::Color(c) | MaterialValue::Vec3(c) => Some(*c),
            MaterialValue::Number(n) => {
                let hex = *n as u32;
                Some([
                    ((hex >> 16) & 0xff) as f32 / 255.0,
                    ((hex >> 8) & 0xff) as f32 / 255.0,
                    (hex & 0xff) as f32 / 255.0,
                ])
            }
            _ => None,
        }
    }

    fn as_f32(&self) -> Option<f32> {
        match self {
            MaterialValue::Number(n) => Some(*n as f32),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            MaterialValue::Bool(b) => Some(*b),
            MaterialValue::Number(n) => Some(*n != 0.0),
            _ => None,
        }
    }

    fn as_vec2(&self) -> Option<Vec2> {
        match self {
            MaterialValue::Vec2([x, y]) => Some(Vec2::new(*x, *y)),
            MaterialValue::Number(n) => Some(Vec2::splat(*n as f32)),
            _ => None,
        }
    }

    fn as_image_uuid(&self) -> Option<Uuid> {
        match self {
            MaterialValue::Text(text) if !text.is_empty() => Uuid::parse_str(text).ok(),
            _ => None,
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self, MaterialValue::Empty)
            || matches!(self, MaterialValue::Text(text) if text.is_empty())
    }
}

pub struct SetMaterialValue {
    pub material: Uuid,
    pub key: String,
    pub value: MaterialValue,
    pub need_delete_image: bool,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct MaterialUniform {
    color_factor: [f32; 4],
    emissive_factor: [f32; 4],
    params: [f32; 4],
    texture_flags: [f32; 4],
}

pub struct MaterialGpu {
    bind_group: Arc<wgpu::BindGroup>,
    _uniform_buffer: Arc<wgpu::Buffer>,
}

impl MaterialGpu {
    pub fn bind_group(&self) -> &wgpu::BindGroup {
        self.bind_group.as_ref()
    }
}

struct MaterialEntry {
    material: Material,
    ref_count: usize,
    gpu: Option<Arc<MaterialGpu>>,
}

/// Reference-counted material arena. Entries are stored once per uuid and
/// counted per consuming node; disposal happens exactly once, at the
/// transition to zero. Texture consumers are counted across materials so a
/// realized texture is dropped with its last consuming material.
#[derive(Default)]
pub struct MaterialRegistry {
    entries: HashMap<Uuid, MaterialEntry>,
    texture_refs: HashMap<Uuid, usize>,
}

impl MaterialRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_material(&mut self, material: &Material) {
        if let Some(entry) = self.entries.get_mut(&material.uuid) {
            entry.ref_count += 1;
            return;
        }
        for (_, id) in material.slots() {
            *self.texture_refs.entry(id).or_insert(0) += 1;
        }
        self.entries.insert(
            material.uuid,
            MaterialEntry { material: material.clone(), ref_count: 1, gpu: None },
        );
    }

    pub fn add_materials(&mut self, materials: &[Material]) {
        for material in materials {
            self.add_material(material);
        }
    }

    pub fn material(&self, uuid: Uuid) -> Option<&Material> {
        self.entries.get(&uuid).map(|entry| &entry.material)
    }

    pub fn ref_count(&self, uuid: Uuid) -> Option<usize> {
        self.entries.get(&uuid).map(|entry| entry.ref_count)
    }

    pub fn texture_ref_count(&self, uuid: Uuid) -> usize {
        self.texture_refs.get(&uuid).copied().unwrap_or(0)
    }

    /// Decrements the refcount; disposes the material (and releases its map
    /// consumers) only when the count reaches zero.
    pub fn remove_material(&mut self, uuid: Uuid, need_delete_image: bool, textures: &TextureCache) {
        let Some(entry) = self.entries.get_mut(&uuid) else {
            log::warn!("[materials] remove skipped, material {uuid} not registered");
            return;
        };
        if entry.ref_count > 1 {
            entry.ref_count -= 1;
            return;
        }
        let entry = self.entries.remove(&uuid).expect("entry present");
        let slots: Vec<Uuid> = entry.material.slots().map(|(_, id)| id).collect();
        for id in slots {
            self.release_texture(id, need_delete_image, textures);
        }
        log::info!("[materials] disposed material {uuid} ('{}')", entry.material.name);
    }

    pub fn remove_materials(&mut self, ids: &[Uuid], need_delete_image: bool, textures: &TextureCache) {
        for id in ids {
            self.remove_material(*id, need_delete_image, textures);
        }
    }

    fn retain_texture(&mut self, uuid: Uuid) {
        *self.texture_refs.entry(uuid).or_insert(0) += 1;
    }

    fn release_texture(&mut self, uuid: Uuid, delete_record: bool, textures: &TextureCache) {
        let remove = match self.texture_refs.get_mut(&uuid) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => true,
            None => false,
        };
        if remove {
            self.texture_refs.remove(&uuid);
            if delete_record {
                textures.delete_image(uuid);
            } else {
                textures.remove_realized(uuid);
            }
        }
    }

    /// Applies one property mutation, dispatched by key shape. Map fields go
    /// through (async) texture loading; repeat/rotation address the realized
    /// textures themselves, so their maps must already exist.
    pub async fn set_material_value(&mut self, textures: &TextureCache, req: SetMaterialValue) {
        let SetMaterialValue { material, key, value, need_delete_image } = req;
        let Some(kind) = self.entries.get(&material).map(|entry| entry.material.kind) else {
            log::warn!("[materials] set '{key}' skipped, material {material} not registered");
            return;
        };

        if key == "repeat" {
            if let Some(repeat) = value.as_vec2() {
                self.propagate_map_transform(material, |id| textures.set_repeat(id, repeat));
            }
            return;
        }
        if key == "rotation" {
            if let Some(rotation) = value.as_f32() {
                self.propagate_map_transform(material, |id| textures.set_rotation(id, rotation));
            }
            return;
        }
        if key == "envMapRotation" {
            if let MaterialValue::Vec3([x, y, z]) = value {
                if Material::supports_key(kind, &key) {
                    if let Some(entry) = self.entries.get_mut(&material) {
                        entry.material.env_map_rotation = [x, y, z];
                        entry.gpu = None;
                    }
                }
            }
            return;
        }
        if let Some(base) = key.strip_suffix("Repeat") {
            if let (Some(slot_id), Some(repeat)) = (self.named_slot(material, base), value.as_vec2())
            {
                textures.set_repeat(slot_id, repeat);
            } else {
                log::debug!("[materials] '{key}' targets no realized map on {material}");
            }
            return;
        }
        if let Some(base) = key.strip_suffix("Rotation") {
            match (self.named_slot(material, base), value.as_f32()) {
                (Some(slot_id), Some(rotation)) => textures.set_rotation(slot_id, rotation),
                _ => log::debug!("[materials] '{key}' targets no realized map on {material}"),
            }
            return;
        }
        if key == "color" || key == "emissive" || key.ends_with("Color") {
            let Some(color) = value.as_color() else {
                log::warn!("[materials] '{key}' needs a color value");
                return;
            };
            if !Material::supports_key(kind, &key) {
                log::debug!("[materials] '{key}' not present on {} material", kind.label());
                return;
            }
            if let Some(entry) = self.entries.get_mut(&material) {
                match key.as_str() {
                    "color" => entry.material.color = color,
                    "emissive" => entry.material.emissive = color,
                    "sheenColor" => entry.material.sheen_color = color,
                    "specularColor" => entry.material.specular_color = color,
                    _ => {
                        log::debug!("[materials] ignoring unknown color key '{key}'");
                        return;
                    }
                }
                entry.gpu = None;
            }
            return;
        }
        if key == "map" || key.ends_with("Map") {
            self.set_map_slot(textures, material, &key, value, need_delete_image).await;
            return;
        }
        if key == "normalScale" {
            if let Some(scale) = value.as_vec2() {
                if Material::supports_key(kind, &key) {
                    if let Some(entry) = self.entries.get_mut(&material) {
                        entry.material.normal_scale = scale;
                        entry.gpu = None;
                    }
                }
            }
            return;
        }
        self.set_plain_field(material, kind, &key, value);
    }

    fn named_slot(&self, material: Uuid, slot_key: &str) -> Option<Uuid> {
        let slot = slot_for_key(slot_key)?;
        if !slot.rotation_capable {
            return None;
        }
        self.entries.get(&material).and_then(|entry| entry.material.slot(slot_key))
    }

    fn propagate_map_transform(&self, material: Uuid, apply: impl Fn(Uuid)) {
        let Some(entry) = self.entries.get(&material) else {
            return;
        };
        for (slot, id) in entry.material.slots() {
            if slot.rotation_capable {
                apply(id);
            }
        }
    }

    async fn set_map_slot(
        &mut self,
        textures: &TextureCache,
        material: Uuid,
        key: &str,
        value: MaterialValue,
        need_delete_image: bool,
    ) {
        let Some(slot) = slot_for_key(key) else {
            log::debug!("[materials] ignoring unknown map key '{key}'");
            return;
        };
        let kind = match self.entries.get(&material) {
            Some(entry) => entry.material.kind,
            None => return,
        };
        if !Material::supports_key(kind, key) {
            log::debug!("[materials] '{key}' not present on {} material", kind.label());
            return;
        }
        if value.is_empty() {
            self.assign_slot(textures, material, key, None, need_delete_image);
            return;
        }
        let Some(image) = value.as_image_uuid() else {
            log::warn!("[materials] '{key}' needs an image uuid, got {value:?}");
            return;
        };
        let loaded = load_map_image(textures, slot.role, image).await;
        if loaded {
            self.assign_slot(textures, material, key, Some(image), need_delete_image);
        } else {
            // Failed loads never throw; the field keeps its previous value.
            log::warn!("[materials] leaving '{key}' untouched on {material}: image {image} failed");
        }
    }

    fn assign_slot(
        &mut self,
        textures: &TextureCache,
        material: Uuid,
        key: &str,
        next: Option<Uuid>,
        need_delete_image: bool,
    ) {
        let previous = {
            let Some(entry) = self.entries.get_mut(&material) else {
                return;
            };
            let Some(slot) = entry.material.slot_mut(key) else {
                return;
            };
            let previous = *slot;
            *slot = next;
            entry.gpu = None;
            previous
        };
        if previous == next {
            return;
        }
        if let Some(id) = next {
            self.retain_texture(id);
        }
        if let Some(id) = previous {
            self.release_texture(id, need_delete_image, textures);
        }
    }

    fn set_plain_field(&mut self, material: Uuid, kind: MaterialKind, key: &str, value: MaterialValue) {
        if !Material::supports_key(kind, key) {
            log::debug!("[materials] ignoring key '{key}' on {} material", kind.label());
            return;
        }
        let Some(entry) = self.entries.get_mut(&material) else {
            return;
        };
        let applied = match key {
            "roughness" => value.as_f32().map(|v| entry.material.roughness = v),
            "metalness" => value.as_f32().map(|v| entry.material.metalness = v),
            "shininess" => value.as_f32().map(|v| entry.material.shininess = v),
            "opacity" => value.as_f32().map(|v| entry.material.opacity = v),
            "ior" => value.as_f32().map(|v| entry.material.ior = v),
            "clearcoat" => value.as_f32().map(|v| entry.material.clearcoat = v),
            "envMapIntensity" => value.as_f32().map(|v| entry.material.env_map_intensity = v),
            "transparent" => value.as_bool().map(|v| entry.material.transparent = v),
            "wireframe" => value.as_bool().map(|v| entry.material.wireframe = v),
            "flatShading" => value.as_bool().map(|v| entry.material.flat_shading = v),
            "side" => value.as_f32().map(|v| {
                entry.material.side = match v as i32 {
                    1 => MaterialSide::Back,
                    2 => MaterialSide::Double,
                    _ => MaterialSide::Front,
                }
            }),
            "name" => match value {
                MaterialValue::Text(ref text) => {
                    entry.material.name = text.clone();
                    Some(())
                }
                _ => None,
            },
            _ => None,
        };
        match applied {
            Some(()) => entry.gpu = None,
            None => log::debug!("[materials] key '{key}' rejected its value"),
        }
    }

    /// Replays a full material snapshot onto `target`. All texture-map loads
    /// are issued and awaited as a batch before any field that mutates the
    /// realized textures (repeat/rotation) could run; the maps must exist
    /// first.
    pub async fn apply_snapshot(
        &mut self,
        textures: &TextureCache,
        target: Uuid,
        snapshot: &Material,
    ) {
        let kind = match self.entries.get(&target) {
            Some(entry) => entry.material.kind,
            None => {
                log::warn!("[materials] snapshot replay skipped, {target} not registered");
                return;
            }
        };
        let wanted: Vec<(&'static MapSlot, Uuid)> = MAP_SLOTS
            .iter()
            .filter(|slot| Material::supports_key(kind, slot.key))
            .filter_map(|slot| snapshot.slot(slot.key).map(|id| (slot, id)))
            .collect();
        let loads = wanted.iter().map(|(slot, id)| async move {
            (slot.key, *id, load_map_image(textures, slot.role, *id).await)
        });
        for (key, id, loaded) in join_all(loads).await {
            if loaded {
                self.assign_slot(textures, target, key, Some(id), false);
            } else {
                log::warn!("[materials] snapshot map '{key}' skipped, image {id} failed");
            }
        }

        let Some(entry) = self.entries.get_mut(&target) else {
            return;
        };
        let material = &mut entry.material;
        material.name = snapshot.name.clone();
        material.color = snapshot.color;
        material.opacity = snapshot.opacity;
        material.transparent = snapshot.transparent;
        material.wireframe = snapshot.wireframe;
        material.flat_shading = snapshot.flat_shading;
        material.side = snapshot.side;
        if Material::supports_key(kind, "emissive") {
            material.emissive = snapshot.emissive;
            material.normal_scale = snapshot.normal_scale;
        }
        if Material::supports_key(kind, "roughness") {
            material.roughness = snapshot.roughness;
            material.metalness = snapshot.metalness;
            material.env_map_intensity = snapshot.env_map_intensity;
            material.env_map_rotation = [
                snapshot.env_map_rotation[0],
                snapshot.env_map_rotation[1],
                snapshot.env_map_rotation[2],
            ];
        }
        if Material::supports_key(kind, "shininess") {
            material.shininess = snapshot.shininess;
        }
        if Material::supports_key(kind, "ior") {
            material.ior = snapshot.ior;
            material.clearcoat = snapshot.clearcoat;
            material.sheen_color = snapshot.sheen_color;
            material.specular_color = snapshot.specular_color;
        }
        entry.gpu = None;
    }

    /// Rebuilds the material under the same uuid as `new_kind`, replaying the
    /// old snapshot through the usual property path. The id-to-material
    /// mapping swaps atomically; consumers keep referencing the uuid.
    pub async fn change_material(
        &mut self,
        textures: &TextureCache,
        uuid: Uuid,
        new_kind: MaterialKind,
    ) -> bool {
        let snapshot = match self.entries.get(&uuid) {
            Some(entry) => entry.material.clone(),
            None => {
                log::warn!("[materials] change skipped, material {uuid} not registered");
                return false;
            }
        };
        if snapshot.kind == new_kind {
            return true;
        }
        let old_slots: Vec<Uuid> = snapshot.slots().map(|(_, id)| id).collect();
        if let Some(entry) = self.entries.get_mut(&uuid) {
            entry.material = Material::with_uuid(uuid, snapshot.name.clone(), new_kind);
            entry.gpu = None;
        }
        self.apply_snapshot(textures, uuid, &snapshot).await;
        for id in old_slots {
            self.release_texture(id, false, textures);
        }
        true
    }

    /// The scene-wide consumer rescan that follows a material type change.
    pub fn sync_ref_count(&mut self, uuid: Uuid, consumers: usize) {
        if let Some(entry) = self.entries.get_mut(&uuid) {
            entry.ref_count = consumers.max(1);
        }
    }

    pub fn prepare_material_gpu(
        &mut self,
        uuid: Uuid,
        textures: &TextureCache,
        renderer: &mut Renderer,
    ) -> Result<Arc<MaterialGpu>> {
        let material = {
            let entry = self
                .entries
                .get(&uuid)
                .ok_or_else(|| anyhow!("Material {uuid} not registered"))?;
            if let Some(gpu) = &entry.gpu {
                return Ok(gpu.clone());
            }
            entry.material.clone()
        };

        let base_color_view = match material.map {
            Some(id) => textures.ensure_gpu(id, renderer)?.view_arc(),
            None => renderer.default_base_color()?,
        };
        let normal_view = match material.normal_map {
            Some(id) => textures.ensure_gpu(id, renderer)?.view_arc(),
            None => renderer.default_normal()?,
        };

        let uniform = MaterialUniform {
            color_factor: [material.color[0], material.color[1], material.color[2], material.opacity],
            emissive_factor: [
                material.emissive[0],
                material.emissive[1],
                material.emissive[2],
                1.0,
            ],
            params: [
                material.metalness,
                material.roughness,
                material.normal_scale.x,
                material.opacity,
            ],
            texture_flags: [
                material.map.is_some() as u32 as f32,
                material.normal_map.is_some() as u32 as f32,
                0.0,
                0.0,
            ],
        };
        let gpu = renderer.create_material_gpu(bytemuck::bytes_of(&uniform), &base_color_view, &normal_view)?;
        let gpu = Arc::new(gpu);
        if let Some(entry) = self.entries.get_mut(&uuid) {
            entry.gpu = Some(gpu.clone());
        }
        Ok(gpu)
    }
}

async fn load_map_image(textures: &TextureCache, role: MapRole, image: Uuid) -> bool {
    let loaded = if role == MapRole::Environment {
        textures.add_rgbe_texture_image(image).await
    } else {
        textures.add_texture_image(image).await
    };
    if loaded {
        textures.apply_role(image, role);
    }
    loaded
}

pub(crate) fn material_gpu_from_parts(
    bind_group: wgpu::BindGroup,
    uniform_buffer: wgpu::Buffer,
) -> MaterialGpu {
    MaterialGpu {
        bind_group: Arc::new(bind_group),
        _uniform_buffer: Arc::new(uniform_buffer),
    }
}
