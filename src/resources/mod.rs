//! Model import.
//!
//! [`import_model`] dispatches on the file extension to the Wavefront OBJ
//! parser ([`obj`], with [`mtl`] material libraries) or the glTF 2.0 parser
//! ([`self::gltf`], `.gltf` and `.glb`). Both produce the same [`Mesh`].
//!
//! Import never fails loudly: problems with single elements are logged and
//! the element is skipped, problems with the whole file yield an empty mesh.
//! Use [`try_import_model`] to get the cause instead.

use std::fmt;

use anyhow::{Context, anyhow, bail};

use crate::data_structures::model::Mesh;

pub mod assets;
pub mod gltf;
pub mod mtl;
pub mod obj;

use assets::AssetSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelFormat {
    Obj,
    Gltf,
    Glb,
}

impl ModelFormat {
    /// Picks the format from the (case-insensitive) file extension.
    pub fn from_path(path: &str) -> Option<Self> {
        let (_, ext) = path.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "obj" => Some(ModelFormat::Obj),
            "gltf" => Some(ModelFormat::Gltf),
            "glb" => Some(ModelFormat::Glb),
            _ => None,
        }
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelFormat::Obj => "OBJ",
            ModelFormat::Gltf => "glTF",
            ModelFormat::Glb => "GLB",
        })
    }
}

/// Imports a model, returning an empty mesh (and logging why) on failure.
pub fn import_model(assets: &dyn AssetSource, path: &str) -> Mesh {
    match try_import_model(assets, path) {
        Ok(mesh) => mesh,
        Err(e) => {
            log::error!("Failed to import model '{path}': {e:#}");
            Mesh::default()
        }
    }
}

pub fn try_import_model(assets: &dyn AssetSource, path: &str) -> anyhow::Result<Mesh> {
    if path.trim().is_empty() {
        bail!("Model path is empty");
    }
    let format =
        ModelFormat::from_path(path).ok_or_else(|| anyhow!("Unsupported model format: {path}"))?;
    let bytes = assets
        .read(path)
        .with_context(|| format!("Failed to read {format} asset"))?;
    if bytes.is_empty() {
        bail!("{format} asset is empty");
    }
    let mesh = match format {
        ModelFormat::Obj => obj::parse_obj(assets, path, &bytes)?,
        ModelFormat::Gltf | ModelFormat::Glb => self::gltf::parse_gltf(assets, path, &bytes)?,
    };
    log::info!(
        "Loaded {format} model '{path}': {} vertices, {} triangles, {} materials",
        mesh.vertex_count(),
        mesh.triangle_count(),
        mesh.materials.len()
    );
    Ok(mesh)
}

/// Directory part of an asset path, empty for top-level assets.
pub fn directory_of(path: &str) -> &str {
    match path.rfind(['/', '\\']) {
        Some(pos) => &path[..pos],
        None => "",
    }
}

pub fn join_paths(dir: &str, file: &str) -> String {
    if dir.is_empty() {
        return file.to_string();
    }
    if file.is_empty() {
        return dir.to_string();
    }
    if file.starts_with(['/', '\\']) {
        return file.to_string();
    }
    format!("{dir}/{file}")
}

/// Forward slashes, no leading `./` or `/`.
fn normalize_relative(path: &str) -> String {
    let mut path = path.trim().replace('\\', "/");
    while let Some(rest) = path.strip_prefix("./") {
        path = rest.to_string();
    }
    if let Some(rest) = path.strip_prefix('/') {
        path = rest.to_string();
    }
    path
}

/// Normalises `path` and places it under `base_dir` unless it already is.
fn resolve_relative(base_dir: &str, path: &str) -> Option<String> {
    let path = normalize_relative(path);
    if path.is_empty() {
        return None;
    }
    if !base_dir.is_empty() && path.starts_with(&format!("{base_dir}/")) {
        return Some(path);
    }
    Some(join_paths(base_dir, &path).replace('\\', "/"))
}

/// Resolves a URI referenced by a document in `base_dir` to an asset path.
///
/// `data:` URIs carry their payload inline and resolve to `None`.
pub fn resolve_asset_uri(base_dir: &str, uri: &str) -> Option<String> {
    let uri = uri.trim();
    if uri.is_empty() || uri.starts_with("data:") {
        return None;
    }
    resolve_relative(base_dir, uri)
}

/// Parses up to `N` whitespace separated floats into `defaults`.
///
/// Components are read left to right; the first missing or malformed token
/// stops parsing and it and every later component keep their default.
pub fn parse_components<const N: usize>(text: &str, defaults: [f32; N]) -> [f32; N] {
    let mut values = defaults;
    for (slot, token) in values.iter_mut().zip(text.split_whitespace()) {
        match token.parse::<f32>() {
            Ok(v) => *slot = v,
            Err(_) => break,
        }
    }
    values
}

/// Splits a trimmed, non-comment line into its keyword and the trimmed rest.
pub(crate) fn split_directive(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(match line.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (line, ""),
    })
}
