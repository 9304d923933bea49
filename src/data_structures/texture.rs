//! Texture cache keys and GPU texture resources.

use std::fmt;

use crate::{
    data_structures::model::Material,
    gpu::{DescriptorSetId, Extent2d, ImageId, ImageViewId, Owned, SamplerId},
};

/// Content address of a texture in the cache.
///
/// Materials with a diffuse map are keyed by the resolved asset path, all
/// others by their diffuse colour quantised to 8 bits per channel. Two
/// materials whose colours only differ below that precision share a texture.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureKey {
    File(String),
    Color([u8; 3]),
}

impl TextureKey {
    pub fn for_material(material: &Material) -> Self {
        match &material.diffuse_texture {
            Some(path) if !path.is_empty() => TextureKey::File(path.clone()),
            _ => TextureKey::Color(quantize(material.diffuse)),
        }
    }
}

impl fmt::Display for TextureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextureKey::File(path) => write!(f, "file:{path}"),
            TextureKey::Color([r, g, b]) => write!(f, "color:{r}_{g}_{b}"),
        }
    }
}

/// Clamps each channel to `[0, 1]` and scales it to a byte.
pub fn quantize(color: [f32; 3]) -> [u8; 3] {
    color.map(|c| {
        let c = if c.is_nan() { 0.0 } else { c.clamp(0.0, 1.0) };
        (c * 255.0).round() as u8
    })
}

/// RGBA8 pixels of a 1x1 image filled with `color`.
pub fn solid_color_pixels(color: [u8; 3]) -> [u8; 4] {
    [color[0], color[1], color[2], 255]
}

/// An uploaded texture: image, view, sampler and the descriptor set binding them.
///
/// The descriptor set belongs to the cache's descriptor pool and is freed with it.
#[derive(Debug)]
pub struct TextureResource {
    pub key: TextureKey,
    pub extent: Extent2d,
    pub image: Owned<ImageId>,
    pub view: Owned<ImageViewId>,
    pub sampler: Owned<SamplerId>,
    pub descriptor_set: DescriptorSetId,
}
