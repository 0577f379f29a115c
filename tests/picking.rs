use glam::{Vec2, Vec3};
use heron_engine::config::EngineConfig;
use heron_engine::geometry_registry::Geometry;
use heron_engine::material_registry::{Material, MaterialKind};
use heron_engine::node::{LightKind, NodeKind, ObjectGroup, SceneNode};
use heron_engine::Engine;

fn engine_with_camera(position: [f32; 3], target: [f32; 3]) -> (tempfile::TempDir, Engine) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = EngineConfig::default();
    config.store.root = dir.path().join("cache");
    config.camera.position = position;
    config.camera.target = target;
    let engine = Engine::new(config).expect("engine builds headless");
    (dir, engine)
}

const CENTER: Vec2 = Vec2::new(640.0, 360.0);

#[test]
fn center_pick_hits_mesh_and_attaches_control() {
    let (_dir, mut engine) = engine_with_camera([0.0, 0.0, 10.0], [0.0, 0.0, 0.0]);
    let root = engine
        .add_object(ObjectGroup::new(SceneNode::new("root", NodeKind::Group)), None, None)
        .expect("root added");
    let cube = engine
        .add_object(
            ObjectGroup::new(SceneNode::new("cube", NodeKind::Mesh))
                .with_geometry(Geometry::cube(1.0))
                .with_material(Material::new("mat", MaterialKind::Standard)),
            Some(root),
            None,
        )
        .expect("cube added");

    let hit = engine.pick_at(CENTER).expect("center ray hits the cube");
    assert_eq!(hit.node, cube);
    assert!(!hit.via_helper);
    assert_eq!(engine.helpers.control().attached(), Some(cube));
}

#[test]
fn nearest_of_two_meshes_wins() {
    let (_dir, mut engine) = engine_with_camera([0.0, 0.0, 10.0], [0.0, 0.0, 0.0]);
    let root = engine
        .add_object(ObjectGroup::new(SceneNode::new("root", NodeKind::Group)), None, None)
        .expect("root added");
    let mut near = SceneNode::new("near", NodeKind::Mesh);
    near.translation = Vec3::new(0.0, 0.0, 4.0);
    let near = engine
        .add_object(
            ObjectGroup::new(near)
                .with_geometry(Geometry::cube(1.0))
                .with_material(Material::new("near", MaterialKind::Standard)),
            Some(root),
            None,
        )
        .expect("near added");
    let far = engine
        .add_object(
            ObjectGroup::new(SceneNode::new("far", NodeKind::Mesh))
                .with_geometry(Geometry::cube(1.0))
                .with_material(Material::new("far", MaterialKind::Standard)),
            Some(root),
            None,
        )
        .expect("far added");

    let hit = engine.pick_at(CENTER).expect("ray hits something");
    assert_eq!(hit.node, near);
    assert_ne!(hit.node, far);
}

#[test]
fn invisible_meshes_are_not_pickable() {
    let (_dir, mut engine) = engine_with_camera([0.0, 0.0, 10.0], [0.0, 0.0, 0.0]);
    let root = engine
        .add_object(ObjectGroup::new(SceneNode::new("root", NodeKind::Group)), None, None)
        .expect("root added");
    let cube = engine
        .add_object(
            ObjectGroup::new(SceneNode::new("cube", NodeKind::Mesh))
                .with_geometry(Geometry::cube(1.0))
                .with_material(Material::new("mat", MaterialKind::Standard)),
            Some(root),
            None,
        )
        .expect("cube added");

    engine.set_node_visible(cube, false);
    assert!(engine.pick_at(CENTER).is_none());
    assert!(engine.helpers.control().attached().is_none(), "miss detaches the control");
}

#[test]
fn helper_picker_resolves_to_owner_light() {
    let (_dir, mut engine) = engine_with_camera([5.0, 0.0, 10.0], [5.0, 0.0, 0.0]);
    let mut light = SceneNode::new("lamp", NodeKind::Light(LightKind::Point));
    light.translation = Vec3::new(5.0, 0.0, 0.0);
    let light = engine
        .add_object(ObjectGroup::new(light), None, None)
        .expect("light added");

    let hit = engine.pick_at(CENTER).expect("picker proxy hit");
    assert!(hit.via_helper, "hit resolved through the invisible proxy");
    assert_eq!(hit.node, light, "proxy back-references its owner node");
    assert_eq!(engine.helpers.control().attached(), Some(light));
}

#[test]
fn light_visibility_toggle_follows_through_refresh() {
    let (_dir, mut engine) = engine_with_camera([0.0, 0.0, 10.0], [0.0, 0.0, 0.0]);
    let light = engine
        .add_object(
            ObjectGroup::new(SceneNode::new("lamp", NodeKind::Light(LightKind::Point))),
            None,
            None,
        )
        .expect("light added");
    assert!(engine.helpers.get(light).expect("helper").visible);

    engine.set_node_visible(light, false);
    assert!(!engine.helpers.get(light).expect("helper").visible);
}
