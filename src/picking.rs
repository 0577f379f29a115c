use glam::{Mat4, Vec3};

use crate::geometry_registry::GeometryBounds;

pub fn matrix_is_finite(mat: &Mat4) -> bool {
    mat.to_cols_array().iter().all(|v| v.is_finite())
}

/// Ray versus an axis-aligned box, returning the hit distance and point.
pub fn ray_aabb_intersection(origin: Vec3, dir: Vec3, min: Vec3, max: Vec3) -> Option<(f32, Vec3)> {
    let mut t_min: f32 = 0.0;
    let mut t_max: f32 = f32::INFINITY;
    let origin_arr = origin.to_array();
    let dir_arr = dir.to_array();
    let min_arr = min.to_array();
    let max_arr = max.to_array();
    for i in 0..3 {
        let o = origin_arr[i];
        let d = dir_arr[i];
        let min_axis = min_arr[i];
        let max_axis = max_arr[i];
        if d.abs() < 1e-6 {
            if o < min_axis || o > max_axis {
                return None;
            }
        } else {
            let inv_d = 1.0 / d;
            let mut t1 = (min_axis - o) * inv_d;
            let mut t2 = (max_axis - o) * inv_d;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            t_min = t_min.max(t1);
            t_max = t_max.min(t2);
            if t_min > t_max {
                return None;
            }
        }
    }
    if t_max < 0.0 {
        return None;
    }
    let t_hit = if t_min >= 0.0 { t_min } else { t_max };
    let hit = origin + dir * t_hit;
    Some((t_hit, hit))
}

/// Ray versus an oriented box: the geometry bounds transformed by the node's
/// world matrix. Returns the world-space distance to the hit.
pub fn ray_hit_obb(
    origin: Vec3,
    dir: Vec3,
    world: &Mat4,
    bounds: &GeometryBounds,
) -> Option<f32> {
    let inv = world.inverse();
    if !matrix_is_finite(&inv) {
        return None;
    }
    let origin_local = inv.transform_point3(origin);
    let dir_local = inv.transform_vector3(dir);
    if dir_local.length_squared() <= f32::EPSILON {
        return None;
    }
    let dir_local = dir_local.normalize();
    let (t_local, hit_local) = ray_aabb_intersection(origin_local, dir_local, bounds.min, bounds.max)?;
    if t_local < 0.0 {
        return None;
    }
    let hit_world = world.transform_point3(hit_local);
    Some((hit_world - origin).length())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aabb_hit_from_outside() {
        let hit = ray_aabb_intersection(
            Vec3::new(0.0, 0.0, 5.0),
            Vec3::new(0.0, 0.0, -1.0),
            Vec3::splat(-0.5),
            Vec3::splat(0.5),
        );
        let (t, point) = hit.expect("ray should hit unit box");
        assert!((t - 4.5).abs() < 1e-5);
        assert!((point.z - 0.5).abs() < 1e-5);
    }

    #[test]
    fn aabb_miss_is_none() {
        let miss = ray_aabb_intersection(
            Vec3::new(3.0, 0.0, 5.0),
            Vec3::new(0.0, 0.0, -1.0),
            Vec3::splat(-0.5),
            Vec3::splat(0.5),
        );
        assert!(miss.is_none());
    }

    #[test]
    fn obb_respects_world_transform() {
        let bounds = GeometryBounds { min: Vec3::splat(-0.5), max: Vec3::splat(0.5) };
        let world = Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0));
        let hit = ray_hit_obb(
            Vec3::new(2.0, 0.0, 4.0),
            Vec3::new(0.0, 0.0, -1.0),
            &world,
            &bounds,
        );
        assert!(hit.is_some());
        let miss = ray_hit_obb(
            Vec3::new(0.0, 0.0, 4.0),
            Vec3::new(0.0, 0.0, -1.0),
            &world,
            &bounds,
        );
        assert!(miss.is_none());
    }
}
