use glam::Vec3;
use heron_engine::config::EngineConfig;
use heron_engine::geometry_registry::Geometry;
use heron_engine::material_registry::{Material, MaterialKind};
use heron_engine::node::{LightKind, NodeKind, ObjectGroup, SceneNode};
use heron_engine::object_registry::TransformKind;
use heron_engine::Engine;

fn engine() -> (tempfile::TempDir, Engine) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = EngineConfig::default();
    config.store.root = dir.path().join("cache");
    let engine = Engine::new(config).expect("engine builds headless");
    (dir, engine)
}

fn mesh_group(name: &str, material: Material) -> ObjectGroup {
    ObjectGroup::new(SceneNode::new(name, NodeKind::Mesh))
        .with_geometry(Geometry::cube(1.0))
        .with_material(material)
}

#[test]
fn added_nodes_resolve_and_removal_unindexes() {
    let (_dir, mut engine) = engine();
    let root = engine
        .add_object(ObjectGroup::new(SceneNode::new("root", NodeKind::Group)), None, None)
        .expect("root added");
    let child = engine
        .add_object(
            mesh_group("child", Material::new("mat", MaterialKind::Standard)),
            Some(root),
            None,
        )
        .expect("child added");

    assert!(engine.get_object(child).is_some());
    assert_eq!(engine.get_object(root).expect("root resolvable").children(), &[child]);

    assert!(engine.remove_object(child));
    assert!(engine.get_object(child).is_none());
    assert!(engine.get_object(root).expect("root remains").children().is_empty());
}

#[test]
fn unparented_node_removal_is_refused() {
    let (_dir, mut engine) = engine();
    let root = engine
        .add_object(ObjectGroup::new(SceneNode::new("root", NodeKind::Group)), None, None)
        .expect("root added");
    assert!(!engine.remove_object(root));
    assert!(engine.get_object(root).is_some());

    let missing = uuid::Uuid::new_v4();
    assert!(!engine.remove_object(missing));
}

#[test]
fn registration_cascade_covers_every_descendant() {
    let (_dir, mut engine) = engine();
    let material = Material::new("cascade", MaterialKind::Standard);
    let material_id = material.uuid;
    let inner = mesh_group("inner", material);
    let geometry_id = inner.node.geometry.expect("geometry attached");
    let light = ObjectGroup::new(SceneNode::new("sun", NodeKind::Light(LightKind::Directional)));
    let light_id = light.id();
    let group = ObjectGroup::new(SceneNode::new("wrap", NodeKind::Group))
        .with_child(inner)
        .with_child(light);

    let root = engine
        .add_object(ObjectGroup::new(SceneNode::new("root", NodeKind::Group)), None, None)
        .expect("root added");
    let wrap = engine.add_object(group, Some(root), None).expect("group added");

    assert!(engine.geometries.has(geometry_id));
    assert_eq!(engine.materials.ref_count(material_id), Some(1));
    assert!(engine.helpers.get(light_id).is_some());

    assert!(engine.remove_object(wrap));
    assert!(!engine.geometries.has(geometry_id));
    assert!(engine.materials.material(material_id).is_none());
    assert!(engine.helpers.get(light_id).is_none());
}

#[test]
fn splice_index_controls_child_order() {
    let (_dir, mut engine) = engine();
    let root = engine
        .add_object(ObjectGroup::new(SceneNode::new("root", NodeKind::Group)), None, None)
        .expect("root added");
    let first = engine
        .add_object(ObjectGroup::new(SceneNode::new("first", NodeKind::Group)), Some(root), None)
        .expect("first added");
    let second = engine
        .add_object(ObjectGroup::new(SceneNode::new("second", NodeKind::Group)), Some(root), None)
        .expect("second added");
    let wedged = engine
        .add_object(ObjectGroup::new(SceneNode::new("wedged", NodeKind::Group)), Some(root), Some(1))
        .expect("wedged added");
    assert_eq!(engine.get_object(root).expect("root").children(), &[first, wedged, second]);
}

#[test]
fn transform_kinds_apply_and_rotation_is_per_axis() {
    let (_dir, mut engine) = engine();
    let root = engine
        .add_object(ObjectGroup::new(SceneNode::new("root", NodeKind::Group)), None, None)
        .expect("root added");
    let node = engine
        .add_object(
            mesh_group("box", Material::new("mat", MaterialKind::Standard)),
            Some(root),
            None,
        )
        .expect("node added");

    engine.set_object_transform(node, Vec3::new(1.0, 2.0, 3.0), TransformKind::Translate);
    engine.set_object_transform(node, Vec3::new(0.4, -0.2, 0.9), TransformKind::Rotate);
    engine.set_object_transform(node, Vec3::splat(2.0), TransformKind::Scale);

    let placed = engine.get_object(node).expect("node resolvable");
    assert!((placed.translation - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-6);
    assert!((placed.scale - Vec3::splat(2.0)).length() < 1e-6);
    let expected = glam::Quat::from_rotation_x(0.4)
        * glam::Quat::from_rotation_y(-0.2)
        * glam::Quat::from_rotation_z(0.9);
    assert!(placed.orientation().dot(expected).abs() > 0.9999);

    // Unknown ids are logged no-ops, never panics.
    engine.set_object_transform(uuid::Uuid::new_v4(), Vec3::ONE, TransformKind::Translate);
}

#[test]
fn nested_transforms_compose_in_world_matrix() {
    let (_dir, mut engine) = engine();
    let root = engine
        .add_object(ObjectGroup::new(SceneNode::new("root", NodeKind::Group)), None, None)
        .expect("root added");
    let parent = engine
        .add_object(ObjectGroup::new(SceneNode::new("parent", NodeKind::Group)), Some(root), None)
        .expect("parent added");
    let child = engine
        .add_object(
            mesh_group("leaf", Material::new("mat", MaterialKind::Standard)),
            Some(parent),
            None,
        )
        .expect("child added");

    engine.set_object_transform(parent, Vec3::new(5.0, 0.0, 0.0), TransformKind::Translate);
    engine.set_object_transform(child, Vec3::new(0.0, 2.0, 0.0), TransformKind::Translate);

    let world = engine.objects.world_translation(child).expect("world position");
    assert!((world - Vec3::new(5.0, 2.0, 0.0)).length() < 1e-5);
}
