//! Content-addressed texture cache.
//!
//! Each distinct [`TextureKey`] is decoded and uploaded once and then shared
//! by every material that maps to it. Entries are addressed by a slot index
//! that stays valid until the cache is dropped.

use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, bail};

use crate::{
    data_structures::{
        model::Material,
        texture::{TextureKey, TextureResource, quantize, solid_color_pixels},
    },
    gpu::{
        BufferDescriptor, BufferUsage, Command, CommandPoolId, DescriptorPoolId,
        DescriptorSetId, DescriptorSetLayoutId, Extent2d, Format, GpuDevice, ImageDescriptor,
        ImageLayout, Owned, submit_one_shot,
    },
    resources::assets::{AssetSource, ImageDecoder},
};

/// Format of every uploaded texture.
pub const TEXTURE_FORMAT: Format = Format::Rgba8Srgb;

#[derive(Debug)]
pub struct TextureCache {
    device: Arc<dyn GpuDevice>,
    set_layout: DescriptorSetLayoutId,
    // Declared before the pools so the textures are released first.
    textures: Vec<TextureResource>,
    slots: HashMap<TextureKey, usize>,
    descriptor_pool: Owned<DescriptorPoolId>,
    command_pool: Owned<CommandPoolId>,
    capacity: u32,
}

impl TextureCache {
    pub fn new(
        device: &Arc<dyn GpuDevice>,
        set_layout: DescriptorSetLayoutId,
        capacity: u32,
    ) -> anyhow::Result<Self> {
        let capacity = capacity.max(1);
        let descriptor_pool = Owned::create(device, |d| d.create_descriptor_pool(capacity))
            .context("Failed to create the texture descriptor pool")?;
        let command_pool = Owned::create(device, |d| d.create_command_pool())
            .context("Failed to create the texture upload command pool")?;
        Ok(Self {
            device: device.clone(),
            set_layout,
            textures: Vec::new(),
            slots: HashMap::new(),
            descriptor_pool,
            command_pool,
            capacity,
        })
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&TextureResource> {
        self.textures.get(slot)
    }

    pub fn descriptor_set(&self, slot: usize) -> Option<DescriptorSetId> {
        self.textures.get(slot).map(|texture| texture.descriptor_set)
    }

    pub fn slot_of(&self, key: &TextureKey) -> Option<usize> {
        self.slots.get(key).copied()
    }

    /// Slot of the plain white texture used when a material cannot be resolved.
    pub fn fallback_white(&mut self) -> anyhow::Result<usize> {
        self.insert_solid(TextureKey::Color([255, 255, 255]), [255, 255, 255])
    }

    /// Returns the slot for `material`, decoding and uploading its texture on first use.
    ///
    /// A texture that fails to decode is replaced by a 1x1 image of the
    /// material's diffuse colour, cached under the same key.
    pub fn resolve(
        &mut self,
        material: &Material,
        assets: &dyn AssetSource,
        decoder: &dyn ImageDecoder,
    ) -> anyhow::Result<usize> {
        let key = TextureKey::for_material(material);
        if let Some(slot) = self.slot_of(&key) {
            return Ok(slot);
        }
        let color = quantize(material.diffuse);
        let TextureKey::File(path) = &key else {
            return self.insert_solid(key, color);
        };
        match decoder.decode(assets, path) {
            Ok(image) => {
                let extent = Extent2d::new(image.width, image.height);
                let slot = self.insert(key.clone(), extent, &image.pixels)?;
                log::debug!("Cached texture {key} ({}x{})", extent.width, extent.height);
                Ok(slot)
            }
            Err(e) => {
                log::warn!(
                    "Material {}: {e:#}, using its diffuse colour instead",
                    material.name
                );
                self.insert_solid(key, color)
            }
        }
    }

    fn insert_solid(&mut self, key: TextureKey, color: [u8; 3]) -> anyhow::Result<usize> {
        if let Some(slot) = self.slot_of(&key) {
            return Ok(slot);
        }
        self.insert(key, Extent2d::new(1, 1), &solid_color_pixels(color))
    }

    fn insert(&mut self, key: TextureKey, extent: Extent2d, pixels: &[u8]) -> anyhow::Result<usize> {
        if self.textures.len() >= self.capacity as usize {
            bail!("Texture cache is full ({} textures)", self.capacity);
        }
        let expected = extent.width as usize * extent.height as usize * 4;
        if pixels.len() != expected {
            bail!(
                "Texture {key} has {} bytes of pixels, {expected} expected",
                pixels.len()
            );
        }
        let texture = self
            .upload(&key, extent, pixels)
            .with_context(|| format!("Failed to upload texture {key}"))?;
        let slot = self.textures.len();
        self.textures.push(texture);
        self.slots.insert(key, slot);
        Ok(slot)
    }

    /// Staging buffer → image copy with the transitions around it, then view,
    /// sampler and descriptor set.
    fn upload(
        &self,
        key: &TextureKey,
        extent: Extent2d,
        pixels: &[u8],
    ) -> anyhow::Result<TextureResource> {
        let device = &self.device;
        let label = key.to_string();

        let staging = Owned::create(device, |d| {
            d.create_buffer(&BufferDescriptor {
                label: "Texture Staging Buffer",
                size: pixels.len() as u64,
                usage: BufferUsage::TransferSrc,
            })
        })?;
        device.write_buffer(staging.get(), 0, pixels)?;

        let image = Owned::create(device, |d| {
            d.create_image(&ImageDescriptor {
                label: &label,
                extent,
                format: TEXTURE_FORMAT,
            })
        })?;

        let pool = self.command_pool.get();
        submit_one_shot(
            device.as_ref(),
            pool,
            [Command::PipelineBarrier {
                image: image.get(),
                old_layout: ImageLayout::Undefined,
                new_layout: ImageLayout::TransferDst,
            }],
        )?;
        submit_one_shot(
            device.as_ref(),
            pool,
            [Command::CopyBufferToImage {
                buffer: staging.get(),
                image: image.get(),
                extent,
            }],
        )?;
        submit_one_shot(
            device.as_ref(),
            pool,
            [Command::PipelineBarrier {
                image: image.get(),
                old_layout: ImageLayout::TransferDst,
                new_layout: ImageLayout::ShaderReadOnly,
            }],
        )?;
        staging.destroy();

        let view = Owned::create(device, |d| d.create_image_view(image.get()))?;
        let sampler = Owned::create(device, |d| d.create_sampler())?;
        let descriptor_set =
            device.allocate_descriptor_set(self.descriptor_pool.get(), self.set_layout)?;
        device.write_descriptor_set(descriptor_set, view.get(), sampler.get())?;

        Ok(TextureResource {
            key: key.clone(),
            extent,
            image,
            view,
            sampler,
            descriptor_set,
        })
    }
}
