//! Runs against the asset tree the build script stages, including the SPIR-V
//! it compiles from `assets/shaders/`. Reads from disk, hence the feature gate.

#[cfg(feature = "integration-tests")]
mod common;

#[test]
#[cfg(feature = "integration-tests")]
fn renders_the_shipped_cube() {
    use std::sync::Arc;

    use prism_ngin::{
        BUILT_ASSETS, Engine, EngineConfig, FrameOutcome, HeadlessDevice,
        gpu::GpuDevice,
        resources::assets::{FsAssetSource, ImageCrateDecoder},
    };

    common::test_utils::init_logger();
    let device = Arc::new(HeadlessDevice::default());
    let engine = Engine::new(
        device.clone() as Arc<dyn GpuDevice>,
        Arc::new(FsAssetSource::new(BUILT_ASSETS)),
        Arc::new(ImageCrateDecoder),
        EngineConfig::default(),
    )
    .unwrap();
    engine.init(320, 240).unwrap();
    engine.load_model("models/cube.obj").unwrap();

    assert!(matches!(engine.render(), FrameOutcome::Presented { .. }));
    assert_eq!(device.stats().last_pass_draws, 2);
    assert!(engine.last_error().is_none());
}
