//! Integration tests for spatial queries

use approx::assert_relative_eq;
use void_scene_physics::*;

const DOWN: [f32; 3] = [0.0, -1.0, 0.0];

/// Three thin static slabs whose top faces sit 1, 5 and 10 units below y = 10
fn slab_scene(buffer_capacity: usize) -> (PhysicsScene, Vec<ShapeId>) {
    let config = SceneConfig::default().with_query_buffer_capacity(buffer_capacity);
    let mut scene = PhysicsScene::new(config).unwrap();
    let body = scene.add_body(BodyDesc::fixed()).unwrap();
    let shapes = [9.0, 5.0, 0.0]
        .iter()
        .map(|top| {
            scene
                .add_shape(
                    body,
                    ShapeDesc::new(ShapeGeometry::cuboid(5.0, 0.05, 5.0)).with_offset(0.0, top - 0.05, 0.0),
                )
                .unwrap()
        })
        .collect();
    (scene, shapes)
}

#[test]
fn test_piercing_hits_sorted_by_distance() {
    let (mut scene, shapes) = slab_scene(32);
    let hits = scene
        .ray_cast_piercing([0.0, 10.0, 0.0], DOWN, 100.0, u32::MAX)
        .unwrap()
        .to_vec();

    assert_eq!(hits.len(), 3);
    for (hit, (shape, distance)) in hits.iter().zip(shapes.iter().zip([1.0, 5.0, 10.0])) {
        assert_eq!(hit.shape, *shape);
        assert_relative_eq!(hit.distance, distance, epsilon = 1e-3);
        assert_relative_eq!(hit.normal[1], 1.0, epsilon = 1e-3);
        assert_eq!(hit.face_index, None);
    }
    assert_eq!(scene.piercing_hits(), hits.as_slice());
}

#[test]
fn test_piercing_independent_of_initial_capacity() {
    let (mut small, _) = slab_scene(1);
    let (mut large, _) = slab_scene(64);

    let a = small
        .ray_cast_piercing([0.0, 10.0, 0.0], DOWN, 100.0, u32::MAX)
        .unwrap()
        .to_vec();
    let b = large
        .ray_cast_piercing([0.0, 10.0, 0.0], DOWN, 100.0, u32::MAX)
        .unwrap()
        .to_vec();
    assert_eq!(a, b);

    // The small engine grew to fit, the large one did not move
    assert!(small.query_engine().buffer_capacities().0 >= 3);
    assert_eq!(large.query_engine().buffer_capacities().0, 64);
}

#[test]
fn test_piercing_respects_max_distance() {
    let (mut scene, shapes) = slab_scene(32);
    let hits = scene
        .ray_cast_piercing([0.0, 10.0, 0.0], DOWN, 6.0, u32::MAX)
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[1].shape, shapes[1]);
}

#[test]
fn test_single_hit_is_nearest() {
    let (mut scene, shapes) = slab_scene(32);
    let hit = scene
        .ray_cast_single([0.0, 10.0, 0.0], DOWN, 100.0, u32::MAX)
        .unwrap()
        .unwrap();
    assert_eq!(hit.shape, shapes[0]);
    assert_relative_eq!(hit.distance, 1.0, epsilon = 1e-3);

    let miss = scene
        .ray_cast_single([0.0, 10.0, 0.0], [0.0, 1.0, 0.0], 100.0, u32::MAX)
        .unwrap();
    assert!(miss.is_none());
}

#[test]
fn test_group_mask_filters_hits() {
    let mut scene = PhysicsScene::new(SceneConfig::default()).unwrap();
    let body = scene.add_body(BodyDesc::fixed()).unwrap();
    let near = scene
        .add_shape(
            body,
            ShapeDesc::new(ShapeGeometry::cuboid(1.0, 0.1, 1.0))
                .with_offset(0.0, 5.0, 0.0)
                .with_group(3),
        )
        .unwrap();
    let far = scene
        .add_shape(body, ShapeDesc::new(ShapeGeometry::cuboid(1.0, 0.1, 1.0)))
        .unwrap();

    let hit = scene
        .ray_cast_single([0.0, 10.0, 0.0], DOWN, 100.0, !(1 << 3))
        .unwrap()
        .unwrap();
    assert_eq!(hit.shape, far);

    let hits = scene
        .ray_cast_piercing([0.0, 10.0, 0.0], DOWN, 100.0, 1 << 3)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].shape, near);
}

#[test]
fn test_triggers_invisible_to_queries() {
    let mut scene = PhysicsScene::new(SceneConfig::default()).unwrap();
    let body = scene.add_body(BodyDesc::fixed()).unwrap();
    scene
        .add_shape(body, ShapeDesc::trigger(ShapeGeometry::cuboid(2.0, 2.0, 2.0)))
        .unwrap();

    assert!(scene
        .ray_cast_single([0.0, 10.0, 0.0], DOWN, 100.0, u32::MAX)
        .unwrap()
        .is_none());
    assert!(scene
        .overlap_sphere(1.0, [0.0, 0.0, 0.0], u32::MAX)
        .unwrap()
        .is_empty());
}

#[test]
fn test_mesh_layers_report_each_triangle_with_remap() {
    let mut scene = PhysicsScene::new(SceneConfig::default()).unwrap();
    let body = scene.add_body(BodyDesc::fixed()).unwrap();
    let quad = |y: f32| [[-1.0, y, -1.0], [1.0, y, -1.0], [1.0, y, 1.0], [-1.0, y, 1.0]];
    let vertices: Vec<[f32; 3]> = quad(0.0).into_iter().chain(quad(-2.0)).collect();
    let mesh = ShapeGeometry::TriMesh {
        vertices,
        indices: vec![[0, 1, 2], [0, 2, 3], [4, 5, 6], [4, 6, 7]],
    };
    let shape = scene
        .add_shape(body, ShapeDesc::new(mesh).with_face_remap(vec![10, 11, 12, 13]))
        .unwrap();

    let hits = scene
        .ray_cast_piercing([0.2, 5.0, 0.3], DOWN, 100.0, u32::MAX)
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.shape == shape));
    assert_relative_eq!(hits[0].distance, 5.0, epsilon = 1e-3);
    assert_relative_eq!(hits[1].distance, 7.0, epsilon = 1e-3);
    assert_eq!(hits[0].face_index, Some(11));
    assert_eq!(hits[1].face_index, Some(13));
}

#[test]
fn test_heightfield_hit_has_face_index() {
    let mut scene = PhysicsScene::new(SceneConfig::default()).unwrap();
    let body = scene.add_body(BodyDesc::fixed()).unwrap();
    let field = ShapeGeometry::HeightField {
        heights: vec![0.0; 9],
        rows: 3,
        cols: 3,
        scale: [10.0, 1.0, 10.0],
    };
    let shape = scene.add_shape(body, ShapeDesc::new(field)).unwrap();

    let hits = scene
        .ray_cast_piercing([1.0, 5.0, 3.0], DOWN, 100.0, u32::MAX)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].shape, shape);
    assert!(hits[0].face_index.is_some());
    assert_relative_eq!(hits[0].distance, 5.0, epsilon = 1e-3);
}

#[test]
fn test_heightfield_faces_agree_from_below() {
    let mut scene = PhysicsScene::new(SceneConfig::default()).unwrap();
    let body = scene.add_body(BodyDesc::fixed()).unwrap();
    // 4 x 4 cells, two triangles each
    let field = ShapeGeometry::HeightField {
        heights: vec![0.0; 25],
        rows: 5,
        cols: 5,
        scale: [10.0, 1.0, 10.0],
    };
    let remap: Vec<u32> = (0..32).map(|i| 1000 + i).collect();
    scene
        .add_shape(body, ShapeDesc::new(field).with_face_remap(remap))
        .unwrap();

    let from_above = scene
        .ray_cast_single([1.0, 5.0, 3.0], DOWN, 100.0, u32::MAX)
        .unwrap()
        .unwrap();
    let face = from_above.face_index.unwrap();
    assert!((1000..1032).contains(&face), "face {face}");

    let from_below = scene
        .ray_cast_single([1.0, -5.0, 3.0], [0.0, 1.0, 0.0], 100.0, u32::MAX)
        .unwrap()
        .unwrap();
    assert_eq!(from_below.face_index, Some(face));

    let pierced = scene
        .ray_cast_piercing([1.0, -5.0, 3.0], [0.0, 1.0, 0.0], 100.0, u32::MAX)
        .unwrap()
        .to_vec();
    assert_eq!(pierced.len(), 1);
    assert_eq!(pierced[0].face_index, Some(face));
    assert_relative_eq!(pierced[0].distance, 5.0, epsilon = 1e-3);
}

#[test]
fn test_piercing_large_heightfield() {
    let mut scene = PhysicsScene::new(SceneConfig::default()).unwrap();
    let body = scene.add_body(BodyDesc::fixed()).unwrap();
    let n = 257;
    let field = ShapeGeometry::HeightField {
        heights: (0..n * n).map(|i| ((i * 31) % 11) as f32 * 0.05).collect(),
        rows: n,
        cols: n,
        scale: [512.0, 1.0, 512.0],
    };
    let shape = scene.add_shape(body, ShapeDesc::new(field)).unwrap();

    for origin in [[12.3, 20.0, -40.7], [-200.1, 20.0, 133.4], [0.7, 20.0, 0.2]] {
        let single = scene
            .ray_cast_single(origin, DOWN, 100.0, u32::MAX)
            .unwrap()
            .unwrap();
        let pierced = scene
            .ray_cast_piercing(origin, DOWN, 100.0, u32::MAX)
            .unwrap()
            .to_vec();
        assert_eq!(pierced.len(), 1);
        assert_eq!(pierced[0].shape, shape);
        assert_eq!(pierced[0].face_index, single.face_index);
        assert_relative_eq!(pierced[0].distance, single.distance, epsilon = 1e-3);
    }
}

#[test]
fn test_overlap_probes() {
    let (mut scene, shapes) = slab_scene(1);

    let found = scene
        .overlap_box([1.0, 0.5, 1.0], [0.0, 9.0, 0.0], [0.0, 0.0, 0.0, 1.0], u32::MAX)
        .unwrap()
        .to_vec();
    assert_eq!(found, vec![shapes[0]]);

    let mut found = scene
        .overlap_capsule(3.0, 0.5, [0.0, 6.5, 0.0], [0.0, 0.0, 0.0, 1.0], u32::MAX)
        .unwrap()
        .to_vec();
    found.sort();
    let mut expected = vec![shapes[0], shapes[1]];
    expected.sort();
    assert_eq!(found, expected);

    assert_eq!(
        scene.overlap_sphere(20.0, [0.0, 5.0, 0.0], u32::MAX).unwrap().len(),
        3
    );
    assert_eq!(scene.overlap_results().len(), 3);
}

#[test]
fn test_invalid_arguments_rejected() {
    let (mut scene, _) = slab_scene(32);
    for max in [0.0, -1.0, f32::NAN] {
        assert!(matches!(
            scene.ray_cast_single([0.0; 3], DOWN, max, u32::MAX),
            Err(PhysicsError::InvalidArgument(_))
        ));
        assert!(matches!(
            scene.ray_cast_piercing([0.0; 3], DOWN, max, u32::MAX),
            Err(PhysicsError::InvalidArgument(_))
        ));
    }
    assert!(matches!(
        scene.overlap_box([1.0; 3], [0.0; 3], [0.0, 0.0, 0.0, 0.0], u32::MAX),
        Err(PhysicsError::InvalidArgument(_))
    ));
    assert!(matches!(
        scene.overlap_sphere(-1.0, [0.0; 3], u32::MAX),
        Err(PhysicsError::InvalidArgument(_))
    ));
}

#[test]
fn test_queries_fail_while_step_in_flight() {
    let (mut scene, _) = slab_scene(32);
    scene.simulate(1.0 / 60.0).unwrap();
    assert!(matches!(
        scene.ray_cast_single([0.0, 10.0, 0.0], DOWN, 100.0, u32::MAX),
        Err(PhysicsError::SimulationInFlight)
    ));
    assert!(matches!(
        scene.overlap_sphere(1.0, [0.0; 3], u32::MAX),
        Err(PhysicsError::SimulationInFlight)
    ));
    scene.fetch_results(true);
    assert!(scene
        .ray_cast_single([0.0, 10.0, 0.0], DOWN, 100.0, u32::MAX)
        .unwrap()
        .is_some());
}
