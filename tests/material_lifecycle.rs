use std::io::Cursor;

use heron_engine::config::EngineConfig;
use heron_engine::geometry_registry::Geometry;
use heron_engine::material_registry::{Material, MaterialKind, MaterialValue};
use heron_engine::node::{NodeKind, ObjectGroup, SceneNode};
use heron_engine::Engine;
use uuid::Uuid;

fn engine() -> (tempfile::TempDir, Engine) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = EngineConfig::default();
    config.store.root = dir.path().join("cache");
    let engine = Engine::new(config).expect("engine builds headless");
    (dir, engine)
}

fn png_bytes() -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(2, 2, image::Rgba([90, 120, 200, 255]));
    let mut cursor = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut cursor, image::ImageFormat::Png)
        .expect("png encodes");
    cursor.into_inner()
}

fn mesh_group(name: &str, material: Material) -> ObjectGroup {
    ObjectGroup::new(SceneNode::new(name, NodeKind::Mesh))
        .with_geometry(Geometry::cube(1.0))
        .with_material(material)
}

#[test]
fn shared_material_disposes_with_last_consumer() {
    let (_dir, mut engine) = engine();
    let shared = Material::new("mat-1", MaterialKind::Standard);
    let shared_id = shared.uuid;
    let root = engine
        .add_object(ObjectGroup::new(SceneNode::new("root", NodeKind::Group)), None, None)
        .expect("root added");
    let a = engine
        .add_object(mesh_group("a", shared.clone()), Some(root), None)
        .expect("a added");
    let b = engine
        .add_object(mesh_group("b", shared), Some(root), None)
        .expect("b added");

    assert_eq!(engine.materials.ref_count(shared_id), Some(2));

    assert!(engine.remove_object(a));
    assert!(engine.materials.material(shared_id).is_some(), "still referenced by b");
    assert_eq!(engine.materials.ref_count(shared_id), Some(1));

    assert!(engine.remove_object(b));
    assert!(engine.materials.material(shared_id).is_none(), "disposed with last consumer");
}

#[test]
fn color_keys_accept_hex_numbers_and_triples() {
    let (_dir, mut engine) = engine();
    let material = Material::new("painted", MaterialKind::Physical);
    let id = material.uuid;
    engine.materials.add_material(&material);

    engine.update_material(id, "color", MaterialValue::Number(0xff8000 as f64));
    let stored = engine.materials.material(id).expect("material stored");
    assert!((stored.color[0] - 1.0).abs() < 1e-3);
    assert!((stored.color[1] - 128.0 / 255.0).abs() < 1e-3);
    assert!(stored.color[2].abs() < 1e-3);

    engine.update_material(id, "sheenColor", MaterialValue::Color([0.2, 0.4, 0.6]));
    let stored = engine.materials.material(id).expect("material stored");
    assert!((stored.sheen_color[1] - 0.4).abs() < 1e-6);
}

#[test]
fn unknown_and_unsupported_keys_are_ignored() {
    let (_dir, mut engine) = engine();
    let material = Material::new("basic", MaterialKind::Basic);
    let id = material.uuid;
    engine.materials.add_material(&material);

    let before = engine.materials.material(id).expect("stored").clone();
    engine.update_material(id, "roughness", MaterialValue::Number(0.1));
    engine.update_material(id, "iridescence", MaterialValue::Number(0.5));
    let after = engine.materials.material(id).expect("stored");
    assert!((after.roughness - before.roughness).abs() < f32::EPSILON);

    // Mutating an unknown material id is a logged no-op.
    engine.update_material(Uuid::new_v4(), "color", MaterialValue::Number(0.0));
}

#[test]
fn map_assignment_realizes_texture_and_transforms_propagate() {
    let (_dir, mut engine) = engine();
    let material = Material::new("textured", MaterialKind::Standard);
    let id = material.uuid;
    engine.materials.add_material(&material);

    let base = Uuid::new_v4();
    let normal = Uuid::new_v4();
    engine.add_image_blob(base, png_bytes());
    engine.add_image_blob(normal, png_bytes());

    engine.update_material(id, "map", MaterialValue::Text(base.to_string()));
    engine.update_material(id, "normalMap", MaterialValue::Text(normal.to_string()));
    let stored = engine.materials.material(id).expect("stored");
    assert_eq!(stored.map, Some(base));
    assert_eq!(stored.normal_map, Some(normal));
    assert!(engine.get_image(base).is_some(), "map load realized the texture");

    // Primary repeat/rotation fan out to every rotation-capable map.
    engine.update_material(id, "repeat", MaterialValue::Vec2([3.0, 2.0]));
    engine.update_material(id, "rotation", MaterialValue::Number(0.5));
    for image in [base, normal] {
        let realized = engine.get_image(image).expect("realized");
        assert!((realized.repeat.x - 3.0).abs() < 1e-6);
        assert!((realized.rotation - 0.5).abs() < 1e-6);
    }

    // Single-map keys touch only the named map.
    engine.update_material(id, "mapRotation", MaterialValue::Number(1.25));
    assert!((engine.get_image(base).expect("base").rotation - 1.25).abs() < 1e-6);
    assert!((engine.get_image(normal).expect("normal").rotation - 0.5).abs() < 1e-6);
}

#[test]
fn failed_map_load_leaves_field_untouched() {
    let (_dir, mut engine) = engine();
    let material = Material::new("textured", MaterialKind::Standard);
    let id = material.uuid;
    engine.materials.add_material(&material);

    let good = Uuid::new_v4();
    engine.add_image_blob(good, png_bytes());
    engine.update_material(id, "map", MaterialValue::Text(good.to_string()));

    let broken = Uuid::new_v4();
    engine.add_image_blob(broken, b"not an image".to_vec());
    engine.update_material(id, "map", MaterialValue::Text(broken.to_string()));

    let stored = engine.materials.material(id).expect("stored");
    assert_eq!(stored.map, Some(good), "failed load keeps previous value");
}

#[test]
fn change_material_replays_snapshot_into_new_kind() {
    let (_dir, mut engine) = engine();
    let mut material = Material::new("convert", MaterialKind::Standard);
    material.color = [0.8, 0.1, 0.1];
    material.roughness = 0.33;
    let id = material.uuid;

    let root = engine
        .add_object(ObjectGroup::new(SceneNode::new("root", NodeKind::Group)), None, None)
        .expect("root added");
    engine
        .add_object(mesh_group("consumer", material), Some(root), None)
        .expect("consumer added");

    let map = Uuid::new_v4();
    engine.add_image_blob(map, png_bytes());
    engine.update_material(id, "map", MaterialValue::Text(map.to_string()));

    assert!(engine.change_material(id, MaterialKind::Phong));
    let converted = engine.materials.material(id).expect("same id resolves");
    assert_eq!(converted.kind, MaterialKind::Phong);
    assert!((converted.color[0] - 0.8).abs() < 1e-6, "color survived the replay");
    assert_eq!(converted.map, Some(map), "map re-applied from the snapshot");
    assert_eq!(engine.materials.ref_count(id), Some(1), "consumer rescan kept the count");

    assert!(!engine.change_material(Uuid::new_v4(), MaterialKind::Basic));
}

#[test]
fn delete_material_can_also_free_cached_images() {
    let (_dir, mut engine) = engine();
    let material = Material::new("owned", MaterialKind::Standard);
    let id = material.uuid;
    engine.materials.add_material(&material);

    let map = Uuid::new_v4();
    engine.add_image_blob(map, png_bytes());
    engine.update_material(id, "map", MaterialValue::Text(map.to_string()));
    assert!(engine.get_image(map).is_some());

    engine.delete_material(id, true);
    assert!(engine.materials.material(id).is_none());
    assert!(engine.get_image(map).is_none(), "realized texture freed");
    assert!(!engine.textures.has_record(map), "pending record freed too");
}
