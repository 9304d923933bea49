//! Collaborators the core consumes to get at asset bytes and decoded images.
//!
//! Hosts implement [`AssetSource`] over whatever storage they have (an APK
//! asset manager, a bundle, the file system). The crate ships a file-system
//! and an in-memory source, plus an [`ImageDecoder`] on top of the `image` crate.

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{Context, bail};
use image::{ImageFormat, load_from_memory, load_from_memory_with_format};
use parking_lot::RwLock;

/// Reads a named asset into memory.
pub trait AssetSource: Send + Sync + fmt::Debug {
    fn read(&self, path: &str) -> anyhow::Result<Vec<u8>>;

    fn read_string(&self, path: &str) -> anyhow::Result<String> {
        let bytes = self.read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Serves assets from a directory, `./assets` by default.
#[derive(Clone, Debug)]
pub struct FsAssetSource {
    root: PathBuf,
}

impl Default for FsAssetSource {
    fn default() -> Self {
        Self::new(Path::new("./").join("assets"))
    }
}

impl FsAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl AssetSource for FsAssetSource {
    fn read(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        let full = self.root.join(path);
        std::fs::read(&full).with_context(|| format!("Failed to read asset {}", full.display()))
    }
}

/// Assets held in memory, keyed by their asset path.
#[derive(Debug, Default)]
pub struct MemoryAssetSource {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryAssetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(path, bytes);
        self
    }

    pub fn insert(&self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.files.write().insert(path.into(), bytes.into());
    }

    pub fn remove(&self, path: &str) -> Option<Vec<u8>> {
        self.files.write().remove(path)
    }
}

impl AssetSource for MemoryAssetSource {
    fn read(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        match self.files.read().get(path) {
            Some(bytes) => Ok(bytes.clone()),
            None => bail!("Asset {path} not found"),
        }
    }
}

/// Tightly packed RGBA8 pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Turns an image asset into RGBA8 pixels.
pub trait ImageDecoder: Send + Sync + fmt::Debug {
    fn decode(&self, assets: &dyn AssetSource, path: &str) -> anyhow::Result<DecodedImage>;
}

/// Decodes with the `image` crate.
///
/// The format implied by the file extension is tried first; if that is
/// unknown or fails, the format is guessed from the content.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageCrateDecoder;

impl ImageDecoder for ImageCrateDecoder {
    fn decode(&self, assets: &dyn AssetSource, path: &str) -> anyhow::Result<DecodedImage> {
        let bytes = assets.read(path)?;
        if bytes.is_empty() {
            bail!("Image asset {path} is empty");
        }
        let by_extension = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(ImageFormat::from_extension)
            .map(|format| load_from_memory_with_format(&bytes, format));
        let img = match by_extension {
            Some(Ok(img)) => img,
            Some(Err(e)) => {
                log::debug!("Decoding {path} by extension failed ({e}), guessing the format");
                load_from_memory(&bytes).with_context(|| format!("Failed to decode image {path}"))?
            }
            None => load_from_memory(&bytes).with_context(|| format!("Failed to decode image {path}"))?,
        };
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            bail!("Image {path} has no pixels");
        }
        Ok(DecodedImage {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }
}
