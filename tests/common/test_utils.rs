#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use prism_ngin::{
    Engine, EngineConfig, HeadlessDevice,
    gpu::{Command, GpuDevice, ResourceKind},
    resources::assets::{AssetSource, DecodedImage, ImageDecoder, MemoryAssetSource},
};

/// Smallest blob the pipeline loader accepts: header words only.
pub const SPIRV_STUB: [u32; 5] = [0x0723_0203, 0x0001_0000, 0, 1, 0];

pub const ALL_KINDS: [ResourceKind; 17] = [
    ResourceKind::Swapchain,
    ResourceKind::Image,
    ResourceKind::ImageView,
    ResourceKind::Sampler,
    ResourceKind::RenderPass,
    ResourceKind::Framebuffer,
    ResourceKind::ShaderModule,
    ResourceKind::DescriptorSetLayout,
    ResourceKind::PipelineLayout,
    ResourceKind::Pipeline,
    ResourceKind::Buffer,
    ResourceKind::DescriptorPool,
    ResourceKind::DescriptorSet,
    ResourceKind::CommandPool,
    ResourceKind::CommandBuffer,
    ResourceKind::Fence,
    ResourceKind::Semaphore,
];

pub const QUAD_OBJ: &str = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 0 1
f 1/1/1 2/2/1 3/3/1 4/4/1
";

/// Cube split over two materials: four sides textured, top and bottom plain.
pub const CUBE_OBJ: &str = "\
mtllib cube.mtl
v -0.5 -0.5 0.5
v 0.5 -0.5 0.5
v 0.5 0.5 0.5
v -0.5 0.5 0.5
v -0.5 -0.5 -0.5
v 0.5 -0.5 -0.5
v 0.5 0.5 -0.5
v -0.5 0.5 -0.5
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 0 1
vn 0 0 -1
vn 1 0 0
vn -1 0 0
vn 0 1 0
vn 0 -1 0
usemtl crate
f 1/1/1 2/2/1 3/3/1 4/4/1
f 6/1/2 5/2/2 8/3/2 7/4/2
f 2/1/3 6/2/3 7/3/3 3/4/3
f 5/1/4 1/2/4 4/3/4 8/4/4
usemtl paint
f 4/1/5 3/2/5 7/3/5 8/4/5
f 5/1/6 6/2/6 2/3/6 1/4/6
";

pub const CUBE_MTL: &str = "\
newmtl crate
Kd 1 1 1
map_Kd textures/crate.png
newmtl paint
Kd 0.8 0.2 0.1
";

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn spirv_bytes() -> Vec<u8> {
    SPIRV_STUB.iter().flat_map(|word| word.to_le_bytes()).collect()
}

/// Asset source holding the default shaders and the quad/cube fixtures.
pub fn fixture_assets() -> MemoryAssetSource {
    let config = EngineConfig::default();
    MemoryAssetSource::new()
        .with(config.vertex_shader, spirv_bytes())
        .with(config.fragment_shader, spirv_bytes())
        .with("models/quad.obj", QUAD_OBJ)
        .with("models/cube.obj", CUBE_OBJ)
        .with("models/cube.mtl", CUBE_MTL)
}

/// Decodes every path to a 2x2 image of one colour and counts the calls.
#[derive(Debug)]
pub struct SolidDecoder {
    pub color: [u8; 4],
    pub calls: AtomicUsize,
}

impl SolidDecoder {
    pub fn new(color: [u8; 4]) -> Self {
        Self {
            color,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageDecoder for SolidDecoder {
    fn decode(&self, _: &dyn AssetSource, _: &str) -> anyhow::Result<DecodedImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(DecodedImage {
            width: 2,
            height: 2,
            pixels: self.color.repeat(4),
        })
    }
}

pub struct TestEngine {
    pub device: Arc<HeadlessDevice>,
    pub decoder: Arc<SolidDecoder>,
    pub engine: Engine,
}

impl TestEngine {
    pub fn new(assets: MemoryAssetSource, config: EngineConfig) -> Self {
        init_logger();
        let device = Arc::new(HeadlessDevice::default());
        let decoder = Arc::new(SolidDecoder::new([200, 100, 50, 255]));
        let engine = Engine::new(
            device.clone() as Arc<dyn GpuDevice>,
            Arc::new(assets),
            decoder.clone(),
            config,
        )
        .expect("engine should be created on a headless device");
        Self {
            device,
            decoder,
            engine,
        }
    }

    pub fn initialized(width: u32, height: u32) -> Self {
        let test = Self::new(fixture_assets(), EngineConfig::default());
        test.engine.init(width, height).expect("init should succeed");
        test
    }

    pub fn live(&self, kind: ResourceKind) -> usize {
        self.device.live_count(kind)
    }

    pub fn draws(&self) -> u64 {
        self.device.stats().last_pass_draws
    }
}

/// Model translations pushed before each model's draws.
pub fn pushed_translations(commands: &[Command]) -> Vec<[f32; 3]> {
    commands
        .iter()
        .filter_map(|command| match command {
            Command::PushConstants { data, .. } => {
                let floats: Vec<f32> = data
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                Some([floats[6], floats[7], floats[8]])
            }
            _ => None,
        })
        .collect()
}
