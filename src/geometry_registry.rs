use std::collections::HashMap;

use anyhow::{anyhow, Result};
use glam::Vec3;
use uuid::Uuid;

use crate::renderer::{GpuGeometry, Renderer};

#[derive(Debug, Clone, Copy)]
pub struct GeometryBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl GeometryBounds {
    pub fn from_positions(positions: &[[f32; 3]]) -> Self {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for p in positions {
            let v = Vec3::from_array(*p);
            min = min.min(v);
            max = max.max(v);
        }
        if positions.is_empty() {
            min = Vec3::ZERO;
            max = Vec3::ZERO;
        }
        Self { min, max }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extent(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }
}

/// CPU-side vertex data for one node. Geometries are owned 1:1 by their node
/// and disposed when the node leaves the graph; sharing happens at the
/// material level, never here.
#[derive(Debug, Clone)]
pub struct Geometry {
    pub id: Uuid,
    pub name: String,
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
    pub bounds: GeometryBounds,
}

impl Geometry {
    pub fn new(
        name: impl Into<String>,
        positions: Vec<[f32; 3]>,
        normals: Vec<[f32; 3]>,
        uvs: Vec<[f32; 2]>,
        indices: Vec<u32>,
    ) -> Self {
        let bounds = GeometryBounds::from_positions(&positions);
        Self { id: Uuid::new_v4(), name: name.into(), positions, normals, uvs, indices, bounds }
    }

    pub fn cube(size: f32) -> Self {
        let h = size * 0.5;
        let faces: [([f32; 3], [[f32; 3]; 4]); 6] = [
            ([0.0, 0.0, 1.0], [[-h, -h, h], [h, -h, h], [h, h, h], [-h, h, h]]),
            ([0.0, 0.0, -1.0], [[h, -h, -h], [-h, -h, -h], [-h, h, -h], [h, h, -h]]),
            ([1.0, 0.0, 0.0], [[h, -h, h], [h, -h, -h], [h, h, -h], [h, h, h]]),
            ([-1.0, 0.0, 0.0], [[-h, -h, -h], [-h, -h, h], [-h, h, h], [-h, h, -h]]),
            ([0.0, 1.0, 0.0], [[-h, h, h], [h, h, h], [h, h, -h], [-h, h, -h]]),
            ([0.0, -1.0, 0.0], [[-h, -h, -h], [h, -h, -h], [h, -h, h], [-h, -h, h]]),
        ];
        let mut positions = Vec::with_capacity(24);
        let mut normals = Vec::with_capacity(24);
        let mut uvs = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, corners) in faces {
            let base = positions.len() as u32;
            for corner in corners {
                positions.push(corner);
                normals.push(normal);
            }
            uvs.extend_from_slice(&[[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]]);
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self::new("cube", positions, normals, uvs, indices)
    }

    pub fn plane(width: f32, depth: f32) -> Self {
        let hw = width * 0.5;
        let hd = depth * 0.5;
        Self::new(
            "plane",
            vec![[-hw, 0.0, hd], [hw, 0.0, hd], [hw, 0.0, -hd], [-hw, 0.0, -hd]],
            vec![[0.0, 1.0, 0.0]; 4],
            vec![[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]],
            vec![0, 1, 2, 0, 2, 3],
        )
    }
}

#[derive(Default)]
pub struct GeometryRegistry {
    entries: HashMap<Uuid, GeometryEntry>,
}

struct GeometryEntry {
    geometry: Geometry,
    gpu: Option<GpuGeometry>,
}

impl GeometryRegistry {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn add(&mut self, geometry: Geometry) {
        self.entries.insert(geometry.id, GeometryEntry { geometry, gpu: None });
    }

    pub fn remove(&mut self, id: Uuid) {
        if self.entries.remove(&id).is_none() {
            log::debug!("[geometry] remove skipped, '{id}' not registered");
        }
    }

    pub fn rename(&mut self, id: Uuid, name: impl Into<String>) {
        match self.entries.get_mut(&id) {
            Some(entry) => entry.geometry.name = name.into(),
            None => log::warn!("[geometry] rename skipped, '{id}' not registered"),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&Geometry> {
        self.entries.get(&id).map(|entry| &entry.geometry)
    }

    pub fn bounds(&self, id: Uuid) -> Option<GeometryBounds> {
        self.entries.get(&id).map(|entry| entry.geometry.bounds)
    }

    pub fn has(&self, id: Uuid) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ensure_gpu(&mut self, id: Uuid, renderer: &mut Renderer) -> Result<&GpuGeometry> {
        let entry =
            self.entries.get_mut(&id).ok_or_else(|| anyhow!("Geometry '{id}' not registered"))?;
        if entry.gpu.is_none() {
            entry.gpu = Some(renderer.create_gpu_geometry(&entry.geometry)?);
        }
        Ok(entry.gpu.as_ref().expect("GPU geometry populated"))
    }

    pub fn gpu(&self, id: Uuid) -> Option<&GpuGeometry> {
        self.entries.get(&id).and_then(|entry| entry.gpu.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_bounds_are_symmetric() {
        let cube = Geometry::cube(2.0);
        assert_eq!(cube.positions.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        assert!((cube.bounds.min - Vec3::splat(-1.0)).length() < 1e-6);
        assert!((cube.bounds.max - Vec3::splat(1.0)).length() < 1e-6);
    }

    #[test]
    fn registry_add_remove_rename() {
        let mut registry = GeometryRegistry::new();
        let geometry = Geometry::plane(1.0, 1.0);
        let id = geometry.id;
        registry.add(geometry);
        assert!(registry.has(id));
        registry.rename(id, "ground");
        assert_eq!(registry.get(id).map(|g| g.name.as_str()), Some("ground"));
        registry.remove(id);
        assert!(!registry.has(id));
        registry.remove(id);
    }
}
