mod common;

use common::test_utils::{ALL_KINDS, TestEngine, fixture_assets, pushed_translations};
use prism_ngin::{
    EngineConfig, FrameOutcome, ModelId, SkipReason,
    gpu::{Command, Extent2d, ResourceKind},
};

fn presented(outcome: FrameOutcome) -> u32 {
    match outcome {
        FrameOutcome::Presented { image_index } => image_index,
        other => panic!("expected a presented frame, got {other:?}"),
    }
}

#[test]
fn init_render_resize_render() {
    let test = TestEngine::initialized(100, 100);
    assert!(test.engine.is_initialized());
    presented(test.engine.render());
    assert_eq!(test.live(ResourceKind::Swapchain), 1);
    assert_eq!(
        test.live(ResourceKind::Framebuffer),
        test.device.swapchain_image_count()
    );

    test.device.set_surface_extent(Extent2d::new(50, 50));
    test.engine.resize(50, 50);
    presented(test.engine.render());

    assert_eq!(test.live(ResourceKind::Swapchain), 1);
    assert_eq!(test.live(ResourceKind::Pipeline), 1);
    assert_eq!(test.live(ResourceKind::RenderPass), 1);
    assert_eq!(
        test.live(ResourceKind::Framebuffer),
        test.device.swapchain_image_count()
    );
    let camera = test.engine.camera().unwrap();
    assert_eq!(camera.viewport().width, 50.0);
    assert_eq!(camera.scissor().extent, Extent2d::new(50, 50));
    assert_eq!(test.engine.frame_stats().frames_presented, 2);
}

#[test]
fn destroy_releases_every_gpu_object() {
    let test = TestEngine::initialized(64, 48);
    test.engine.load_model("models/cube.obj").unwrap();
    for _ in 0..5 {
        presented(test.engine.render());
    }
    test.engine.resize(32, 32);
    presented(test.engine.render());

    test.engine.destroy();
    for kind in ALL_KINDS {
        assert_eq!(test.live(kind), 0, "{kind:?} leaked");
    }
    assert!(!test.engine.is_initialized());
    assert_eq!(test.engine.render(), FrameOutcome::Skipped(SkipReason::NotReady));
    // idempotent
    test.engine.destroy();
}

#[test]
fn one_draw_per_material_subset() {
    let test = TestEngine::initialized(64, 64);
    presented(test.engine.render());
    assert_eq!(test.draws(), 0);

    test.engine.load_model("models/cube.obj").unwrap();
    test.engine.load_model("models/quad.obj").unwrap();
    presented(test.engine.render());
    // two subsets for the cube, one for the quad
    assert_eq!(test.draws(), 3);

    let commands = test.device.last_render_commands();
    let counts: Vec<u32> = commands
        .iter()
        .filter_map(|c| match c {
            Command::DrawIndexed { index_count, .. } => Some(*index_count),
            _ => None,
        })
        .collect();
    assert_eq!(counts, vec![24, 12, 6]);
    assert!(matches!(commands.first(), Some(Command::BeginRenderPass { .. })));
    assert_eq!(commands.last(), Some(&Command::EndRenderPass));
}

#[test]
fn models_loaded_before_init_are_uploaded_by_it() {
    let test = TestEngine::new(fixture_assets(), EngineConfig::default());
    let id = test.engine.load_model("models/cube.obj").unwrap();
    assert_eq!(id, ModelId(1));
    assert_eq!(test.live(ResourceKind::Buffer), 0);

    test.engine.init(32, 32).unwrap();
    assert_eq!(test.live(ResourceKind::Buffer), 2);
    presented(test.engine.render());
    assert_eq!(test.draws(), 2);
}

#[test]
fn textures_are_shared_between_models() {
    let test = TestEngine::initialized(32, 32);
    test.engine.load_model("models/cube.obj").unwrap();
    test.engine.load_model("models/cube.obj").unwrap();
    test.engine.resize(40, 40);

    assert_eq!(test.decoder.calls(), 1);
    // white fallback, the crate map, the paint colour
    assert_eq!(test.live(ResourceKind::Image) - test.device.swapchain_image_count(), 3);
    assert_eq!(test.live(ResourceKind::DescriptorSet), 3);
}

#[test]
fn texture_uploads_return_their_command_buffers() {
    let test = TestEngine::initialized(32, 32);
    let before = test.live(ResourceKind::CommandBuffer);
    test.engine.load_model("models/cube.obj").unwrap();
    test.engine.load_model("models/quad.obj").unwrap();

    assert_eq!(test.live(ResourceKind::CommandBuffer), before);
    // the crate map and the paint colour were uploaded
    assert_eq!(test.live(ResourceKind::DescriptorSet), 3);
}

#[test]
fn remove_model_frees_its_buffers() {
    let test = TestEngine::initialized(32, 32);
    let cube = test.engine.load_model("models/cube.obj").unwrap();
    let quad = test.engine.load_model("models/quad.obj").unwrap();
    assert_eq!(test.live(ResourceKind::Buffer), 4);

    assert!(test.engine.remove_model(cube));
    assert!(!test.engine.remove_model(cube));
    assert_eq!(test.engine.model_count(), 1);
    assert_eq!(test.live(ResourceKind::Buffer), 2);

    presented(test.engine.render());
    assert_eq!(test.draws(), 1);
    assert!(test.engine.remove_model(quad));
    presented(test.engine.render());
    assert_eq!(test.draws(), 0);
}

#[test]
fn model_positions_reach_the_push_constants() {
    let test = TestEngine::initialized(32, 32);
    let id = test.engine.load_model("models/quad.obj").unwrap();
    assert!(test.engine.set_model_position(id, 1.0, 2.0, 3.0));
    assert!(!test.engine.set_model_position(ModelId(99), 0.0, 0.0, 0.0));

    test.engine.load_model_at("models/quad.obj", -1.0, 0.5, 0.0).unwrap();

    presented(test.engine.render());
    assert_eq!(
        pushed_translations(&test.device.last_render_commands()),
        vec![[1.0, 2.0, 3.0], [-1.0, 0.5, 0.0]]
    );
}

#[test]
fn unreadable_model_is_drawn_as_nothing() {
    let test = TestEngine::initialized(32, 32);
    test.engine.load_model("models/missing.obj").unwrap();
    assert_eq!(test.engine.model_count(), 1);
    presented(test.engine.render());
    assert_eq!(test.draws(), 0);
    assert!(test.engine.last_error().is_none());
}

#[test]
fn camera_moves_stay_in_range() {
    let config = EngineConfig::default()
        .with_distance_range(-10.0, -2.0)
        .with_initial_distance(-5.0);
    let test = TestEngine::new(fixture_assets(), config);
    test.engine.init(32, 32).unwrap();

    test.engine.move_camera(1.0);
    assert_eq!(test.engine.camera().unwrap().distance(), -4.0);
    test.engine.move_camera(100.0);
    assert_eq!(test.engine.camera().unwrap().distance(), -2.0);
    test.engine.move_camera(-100.0);
    assert_eq!(test.engine.camera().unwrap().distance(), -10.0);

    test.engine.set_camera_rotation(0.5, 0.25, 0.0);
    test.engine.rotate_camera(0.5, 0.0, 0.1);
    let camera = test.engine.camera().unwrap();
    assert!((camera.yaw() - 1.0).abs() < 1e-6);
    assert!((camera.pitch() - 0.25).abs() < 1e-6);
    assert!((camera.roll() - 0.1).abs() < 1e-6);
}

#[test]
fn frames_in_flight_follow_the_config() {
    let test = TestEngine::new(
        fixture_assets(),
        EngineConfig::default().with_frames_in_flight(3),
    );
    test.engine.init(16, 16).unwrap();
    assert_eq!(test.live(ResourceKind::Fence), 3);
    assert_eq!(test.live(ResourceKind::Semaphore), 6);
    for _ in 0..10 {
        presented(test.engine.render());
    }
    assert_eq!(test.engine.frame_stats().frames_presented, 10);
}
