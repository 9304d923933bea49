//! Owner of every GPU resource the renderer draws with.
//!
//! Resources fall into two lifetimes:
//!
//! - device lifetime: pipeline and descriptor set layouts, the texture cache
//! - swapchain lifetime: swapchain, image views, render pass, pipeline,
//!   framebuffers and the per-model vertex/index buffers
//!
//! [`ResourceManager::rebuild`] tears the second group down and recreates it
//! for a new surface size. Loaded meshes survive a rebuild and are uploaded
//! again.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::Context;

use crate::{
    config::EngineConfig,
    data_structures::model::{GpuModel, Mesh, ModelBuffers, ModelId},
    gpu::{
        BufferDescriptor, BufferUsage, DescriptorSetId, Extent2d, FramebufferId, GpuDevice, Owned,
        PipelineId, PipelineLayoutId, RenderPassId,
    },
    pipelines::basic::{ModelLayouts, mk_basic_pipeline},
    resources::assets::{AssetSource, ImageDecoder},
    swapchain::Swapchain,
    texture_cache::TextureCache,
};

/// Everything that has to be recreated when the surface changes.
#[derive(Debug)]
pub struct SwapchainTargets {
    pub framebuffers: Vec<Owned<FramebufferId>>,
    pub pipeline: Owned<PipelineId>,
    pub render_pass: Owned<RenderPassId>,
    pub swapchain: Swapchain,
}

impl SwapchainTargets {
    pub fn framebuffer(&self, image_index: u32) -> Option<FramebufferId> {
        self.framebuffers.get(image_index as usize).map(Owned::get)
    }
}

#[derive(Debug)]
pub struct ResourceManager {
    device: Arc<dyn GpuDevice>,
    assets: Arc<dyn AssetSource>,
    decoder: Arc<dyn ImageDecoder>,
    config: EngineConfig,
    // Field order is teardown order.
    targets: Option<SwapchainTargets>,
    models: BTreeMap<ModelId, GpuModel>,
    next_model: u64,
    textures: TextureCache,
    fallback_texture: usize,
    layouts: ModelLayouts,
}

impl ResourceManager {
    /// Creates the device-lifetime resources. No swapchain exists until the first [`rebuild`](Self::rebuild).
    pub fn new(
        device: Arc<dyn GpuDevice>,
        assets: Arc<dyn AssetSource>,
        decoder: Arc<dyn ImageDecoder>,
        config: EngineConfig,
    ) -> anyhow::Result<Self> {
        let layouts = ModelLayouts::new(&device)?;
        let mut textures = TextureCache::new(&device, layouts.set_layout.get(), config.max_textures)?;
        let fallback_texture = textures
            .fallback_white()
            .context("Failed to create the fallback texture")?;
        Ok(Self {
            device,
            assets,
            decoder,
            config,
            targets: None,
            models: BTreeMap::new(),
            next_model: 0,
            textures,
            fallback_texture,
            layouts,
        })
    }

    pub fn targets(&self) -> Option<&SwapchainTargets> {
        self.targets.as_ref()
    }

    pub fn pipeline_layout(&self) -> PipelineLayoutId {
        self.layouts.pipeline_layout.get()
    }

    pub fn textures(&self) -> &TextureCache {
        &self.textures
    }

    /// Descriptor set of a texture slot, the fallback texture's for unknown slots.
    pub fn texture_set(&self, slot: usize) -> Option<DescriptorSetId> {
        self.textures
            .descriptor_set(slot)
            .or_else(|| self.textures.descriptor_set(self.fallback_texture))
    }

    pub fn fallback_texture(&self) -> usize {
        self.fallback_texture
    }

    /// Models in load order.
    pub fn models(&self) -> impl Iterator<Item = &GpuModel> {
        self.models.values()
    }

    pub fn model(&self, id: ModelId) -> Option<&GpuModel> {
        self.models.get(&id)
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// Drops the swapchain-dependent resources, keeping device, layouts,
    /// textures and meshes. The caller makes sure the device is idle.
    pub fn release_swapchain(&mut self) {
        self.targets = None;
        for model in self.models.values_mut() {
            model.buffers = None;
        }
    }

    /// Recreates the swapchain-dependent resources for a surface of `requested` size.
    ///
    /// Order: swapchain and views, render pass, pipeline, model buffers,
    /// framebuffers. Textures resolved during the model uploads need the
    /// pipeline layout, which already exists.
    pub fn rebuild(&mut self, requested: Extent2d) -> anyhow::Result<()> {
        self.device
            .device_wait_idle()
            .context("Failed to wait for the device before rebuilding")?;
        self.release_swapchain();

        let swapchain = Swapchain::new(&self.device, requested)?;
        let render_pass = swapchain.create_render_pass(&self.device)?;
        let pipeline = mk_basic_pipeline(
            &self.device,
            self.assets.as_ref(),
            &self.config,
            self.layouts.pipeline_layout.get(),
            render_pass.get(),
        )?;
        for model in self.models.values_mut() {
            upload_model(
                &self.device,
                &mut self.textures,
                self.fallback_texture,
                self.assets.as_ref(),
                self.decoder.as_ref(),
                model,
            )?;
        }
        let framebuffers = swapchain.create_framebuffers(&self.device, render_pass.get())?;

        self.targets = Some(SwapchainTargets {
            framebuffers,
            pipeline,
            render_pass,
            swapchain,
        });
        Ok(())
    }

    /// Registers an imported mesh. Its buffers are uploaded right away when a
    /// swapchain exists, otherwise by the next rebuild.
    pub fn add_model(&mut self, source: &str, mesh: Mesh) -> anyhow::Result<ModelId> {
        self.next_model += 1;
        let id = ModelId(self.next_model);
        let mut model = GpuModel::new(id, source, mesh);
        if self.targets.is_some() {
            upload_model(
                &self.device,
                &mut self.textures,
                self.fallback_texture,
                self.assets.as_ref(),
                self.decoder.as_ref(),
                &mut model,
            )?;
        }
        self.models.insert(id, model);
        Ok(id)
    }

    /// Drops a model and its buffers. Textures stay cached.
    ///
    /// Waits for the device first since in-flight frames may still read the buffers.
    pub fn remove_model(&mut self, id: ModelId) -> anyhow::Result<bool> {
        if !self.models.contains_key(&id) {
            return Ok(false);
        }
        self.device
            .device_wait_idle()
            .context("Failed to wait for the device before removing a model")?;
        Ok(self.models.remove(&id).is_some())
    }

    pub fn set_model_position(&mut self, id: ModelId, translation: [f32; 3]) -> bool {
        match self.models.get_mut(&id) {
            Some(model) => {
                model.mesh.translation = translation;
                true
            }
            None => false,
        }
    }
}

/// Resolves the model's material textures and uploads its vertex and index buffers.
fn upload_model(
    device: &Arc<dyn GpuDevice>,
    textures: &mut TextureCache,
    fallback: usize,
    assets: &dyn AssetSource,
    decoder: &dyn ImageDecoder,
    model: &mut GpuModel,
) -> anyhow::Result<()> {
    model.texture_slots = model
        .mesh
        .materials
        .iter()
        .map(|material| {
            textures
                .resolve(material, assets, decoder)
                .unwrap_or_else(|e| {
                    log::warn!("Model {}: material {}: {e:#}", model.source, material.name);
                    fallback
                })
        })
        .collect();

    model.buffers = None;
    if model.mesh.is_empty() {
        return Ok(());
    }

    let vertices = model.mesh.interleaved();
    let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
    let index_bytes: &[u8] = bytemuck::cast_slice(&model.mesh.indices);

    let vertex = Owned::create(device, |d| {
        d.create_buffer(&BufferDescriptor {
            label: "Model Vertex Buffer",
            size: vertex_bytes.len() as u64,
            usage: BufferUsage::Vertex,
        })
    })
    .with_context(|| format!("Failed to allocate the vertex buffer of {}", model.source))?;
    device.write_buffer(vertex.get(), 0, vertex_bytes)?;

    let index = Owned::create(device, |d| {
        d.create_buffer(&BufferDescriptor {
            label: "Model Index Buffer",
            size: index_bytes.len() as u64,
            usage: BufferUsage::Index,
        })
    })
    .with_context(|| format!("Failed to allocate the index buffer of {}", model.source))?;
    device.write_buffer(index.get(), 0, index_bytes)?;

    model.buffers = Some(ModelBuffers {
        vertex,
        index,
        index_count: model.mesh.indices.len() as u32,
    });
    Ok(())
}
