use std::sync::Arc;

use anyhow::{Context, bail};

use crate::{
    camera::Camera,
    config::EngineConfig,
    data_structures::model::ModelVertex,
    gpu::{
        DescriptorSetLayoutId, GpuDevice, GraphicsPipelineDescriptor, Owned, PipelineId,
        PipelineLayoutId, PushConstantRange, RenderPassId, ShaderStage,
    },
    resources::assets::AssetSource,
};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Per-draw data pushed to the vertex stage.
///
/// The order is part of the shader interface:
/// `[yaw, pitch, roll, viewport_width, viewport_height, distance, x, y, z]`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelPushConstants {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
    pub viewport_width: f32,
    pub viewport_height: f32,
    pub distance: f32,
    pub translation: [f32; 3],
}

impl ModelPushConstants {
    pub const SIZE: u32 = std::mem::size_of::<ModelPushConstants>() as u32;

    pub fn new(camera: &Camera, translation: [f32; 3]) -> Self {
        let viewport = camera.viewport();
        Self {
            yaw: camera.yaw(),
            pitch: camera.pitch(),
            roll: camera.roll(),
            viewport_width: viewport.width,
            viewport_height: viewport.height,
            distance: camera.distance(),
            translation,
        }
    }

    pub fn range() -> PushConstantRange {
        PushConstantRange {
            stage: ShaderStage::Vertex,
            offset: 0,
            size: Self::SIZE,
        }
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        bytemuck::bytes_of(self).to_vec()
    }
}

/// Reads a prebuilt SPIR-V blob from the asset source.
pub fn load_spirv(assets: &dyn AssetSource, path: &str) -> anyhow::Result<Vec<u32>> {
    let bytes = assets.read(path)?;
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        bail!("Shader {path} is {} bytes, not a SPIR-V module", bytes.len());
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        .collect();
    if words[0] != SPIRV_MAGIC {
        bail!("Shader {path} does not start with the SPIR-V magic number");
    }
    Ok(words)
}

/// Descriptor set layout (one image + sampler) and the pipeline layout built on it.
///
/// Both live as long as the device: texture descriptor sets are allocated
/// against the set layout and have to outlive swapchain rebuilds.
#[derive(Debug)]
pub struct ModelLayouts {
    pub set_layout: Owned<DescriptorSetLayoutId>,
    pub pipeline_layout: Owned<PipelineLayoutId>,
}

impl ModelLayouts {
    pub fn new(device: &Arc<dyn GpuDevice>) -> anyhow::Result<Self> {
        let set_layout = Owned::create(device, |d| d.create_descriptor_set_layout())
            .context("Failed to create the texture descriptor set layout")?;
        let pipeline_layout = Owned::create(device, |d| {
            d.create_pipeline_layout(set_layout.get(), ModelPushConstants::range())
        })
        .context("Failed to create the model pipeline layout")?;
        Ok(Self {
            set_layout,
            pipeline_layout,
        })
    }
}

/// Builds the model pipeline for `render_pass`.
///
/// Both shader stages are loaded through `assets`; a missing or malformed
/// stage fails the whole build.
pub fn mk_basic_pipeline(
    device: &Arc<dyn GpuDevice>,
    assets: &dyn AssetSource,
    config: &EngineConfig,
    layout: PipelineLayoutId,
    render_pass: RenderPassId,
) -> anyhow::Result<Owned<PipelineId>> {
    let vertex_code = load_spirv(assets, &config.vertex_shader)
        .with_context(|| format!("Failed to load vertex shader {}", config.vertex_shader))?;
    let fragment_code = load_spirv(assets, &config.fragment_shader)
        .with_context(|| format!("Failed to load fragment shader {}", config.fragment_shader))?;

    // Modules are only needed while the pipeline is created.
    let vertex_shader = Owned::create(device, |d| d.create_shader_module(&vertex_code))?;
    let fragment_shader = Owned::create(device, |d| d.create_shader_module(&fragment_code))?;

    let vertex_layout = ModelVertex::layout();
    let pipeline = Owned::create(device, |d| {
        d.create_graphics_pipeline(&GraphicsPipelineDescriptor {
            label: "Model Pipeline",
            layout,
            render_pass,
            vertex_shader: vertex_shader.get(),
            fragment_shader: fragment_shader.get(),
            vertex_layout: &vertex_layout,
        })
    })
    .context("Failed to create the model pipeline")?;
    Ok(pipeline)
}
