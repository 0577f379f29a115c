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
    let image = image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 255, 0, 255]));
    let mut cursor = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut cursor, image::ImageFormat::Png)
        .expect("png encodes");
    cursor.into_inner()
}

#[test]
fn swap_preserves_identity_and_migrates_material() {
    let (_dir, mut engine) = engine();
    let root = engine
        .add_object(ObjectGroup::new(SceneNode::new("root", NodeKind::Group)), None, None)
        .expect("root added");

    let mut original = Material::new("original", MaterialKind::Standard);
    original.color = [0.9, 0.2, 0.1];
    original.roughness = 0.42;
    let original_id = original.uuid;
    let mesh = engine
        .add_object(
            ObjectGroup::new(SceneNode::new("teapot", NodeKind::Mesh))
                .with_geometry(Geometry::cube(1.0))
                .with_material(original),
            Some(root),
            None,
        )
        .expect("mesh added");
    let sibling = engine
        .add_object(ObjectGroup::new(SceneNode::new("sibling", NodeKind::Group)), Some(root), None)
        .expect("sibling added");

    let map = Uuid::new_v4();
    engine.add_image_blob(map, png_bytes());
    engine.update_material(original_id, "map", MaterialValue::Text(map.to_string()));

    let replacement = ObjectGroup::new(SceneNode::new("reloaded", NodeKind::Mesh))
        .with_geometry(Geometry::plane(2.0, 2.0))
        .with_material(Material::new("replacement", MaterialKind::Phong));
    let new_geometry = replacement.node.geometry.expect("replacement geometry");

    let swapped = engine.swap_object_mesh(mesh, replacement, None).expect("swap succeeded");
    assert_eq!(swapped, mesh, "the old id survives the swap");

    let node = engine.get_object(mesh).expect("old id resolves to the new node");
    assert_eq!(node.name, "teapot", "identity fields copied from the old node");
    assert_eq!(node.geometry, Some(new_geometry));
    assert_eq!(node.parent(), Some(root));
    let parent = engine.get_object(root).expect("root resolves");
    assert_eq!(parent.children()[0], mesh, "new node occupies the old slot");
    assert_eq!(parent.children()[1], sibling);

    let material_id = node.primary_material().expect("material slot filled");
    assert_ne!(material_id, original_id, "a fresh material was constructed");
    let migrated = engine.materials.material(material_id).expect("migrated material stored");
    assert_eq!(migrated.kind, MaterialKind::Phong, "new node's material type wins");
    assert!((migrated.color[0] - 0.9).abs() < 1e-6, "properties copied field by field");
    assert_eq!(migrated.map, Some(map), "texture maps cloned by reference");

    assert!(engine.materials.material(original_id).is_none(), "old material disposed");
    assert!(engine.textures.has_record(map), "cached images survive the swap");
    assert!(engine.get_image(map).is_some(), "realized texture still has a consumer");
}

#[test]
fn swap_with_unknown_id_degrades_to_plain_add() {
    let (_dir, mut engine) = engine();
    let ghost = Uuid::new_v4();
    let group = ObjectGroup::new(SceneNode::new("fresh", NodeKind::Mesh))
        .with_geometry(Geometry::cube(1.0))
        .with_material(Material::new("mat", MaterialKind::Standard));

    let added = engine.swap_object_mesh(ghost, group, None).expect("fallback add");
    let node = engine.get_object(added).expect("node added at scene root");
    assert!(node.parent().is_none());
    assert_eq!(node.name, "fresh");
}

#[test]
fn swap_without_materials_keeps_graph_consistent() {
    let (_dir, mut engine) = engine();
    let root = engine
        .add_object(ObjectGroup::new(SceneNode::new("root", NodeKind::Group)), None, None)
        .expect("root added");
    let mesh = engine
        .add_object(
            ObjectGroup::new(SceneNode::new("bare", NodeKind::Mesh))
                .with_geometry(Geometry::cube(1.0)),
            Some(root),
            None,
        )
        .expect("bare mesh added");

    let replacement =
        ObjectGroup::new(SceneNode::new("bare2", NodeKind::Mesh)).with_geometry(Geometry::plane(1.0, 1.0));
    let swapped = engine.swap_object_mesh(mesh, replacement, None).expect("swap succeeded");
    assert_eq!(swapped, mesh);
    assert_eq!(engine.get_object(root).expect("root").children(), &[mesh]);
}
