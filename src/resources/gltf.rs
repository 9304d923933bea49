//! glTF 2.0 import (`.gltf` with external buffers, and binary `.glb`).
//!
//! The scene hierarchy is flattened: every triangle primitive reachable from
//! the scene roots is baked into model space with its node's world transform
//! and appended to one [`Mesh`].

use anyhow::{Context, anyhow, bail};
use cgmath::{InnerSpace, Matrix, Matrix3, Matrix4, SquareMatrix, Vector3, Vector4};

use crate::data_structures::model::{Material, Mesh};

use super::{assets::AssetSource, directory_of, resolve_asset_uri};

const MAX_NODE_DEPTH: usize = 64;

/// Geometry of one primitive, already in model space, with local indices.
#[derive(Debug, Default)]
pub(crate) struct MeshChunk {
    positions: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    tex_coords: Vec<[f32; 2]>,
    indices: Vec<u32>,
    material: usize,
}

fn load_buffers(
    gltf: &::gltf::Gltf,
    assets: &dyn AssetSource,
    base_dir: &str,
) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut buffer_data = Vec::new();
    for buffer in gltf.buffers() {
        let data = match buffer.source() {
            ::gltf::buffer::Source::Bin => gltf
                .blob
                .clone()
                .ok_or_else(|| anyhow!("Buffer {} refers to a missing GLB chunk", buffer.index()))?,
            ::gltf::buffer::Source::Uri(uri) => {
                let path = resolve_asset_uri(base_dir, uri).ok_or_else(|| {
                    anyhow!("Buffer {} uses an embedded data URI", buffer.index())
                })?;
                assets
                    .read(&path)
                    .with_context(|| format!("Failed to load buffer {path}"))?
            }
        };
        if data.len() < buffer.length() {
            bail!(
                "Buffer {} holds {} bytes, {} declared",
                buffer.index(),
                data.len(),
                buffer.length()
            );
        }
        buffer_data.push(data);
    }
    Ok(buffer_data)
}

fn texture_path(info: Option<::gltf::texture::Info>, base_dir: &str, material: &str) -> Option<String> {
    match info?.texture().source().source() {
        ::gltf::image::Source::Uri { uri, .. } => {
            let path = resolve_asset_uri(base_dir, uri);
            if path.is_none() {
                log::warn!("Material {material}: embedded texture data is not supported");
            }
            path
        }
        ::gltf::image::Source::View { .. } => {
            log::warn!("Material {material}: textures stored in buffer views are not supported");
            None
        }
    }
}

fn load_materials(gltf: &::gltf::Gltf, base_dir: &str) -> Vec<Material> {
    let mut materials = Vec::new();
    for (i, material) in gltf.materials().enumerate() {
        let name = match material.name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("Material_{i}"),
        };
        let pbr = material.pbr_metallic_roughness();
        let [r, g, b, _] = pbr.base_color_factor();
        let mut diffuse = [r, g, b];
        let mut diffuse_texture = texture_path(pbr.base_color_texture(), base_dir, &name);
        if diffuse_texture.is_none() {
            if let Some(spec_gloss) = material.pbr_specular_glossiness() {
                let [r, g, b, _] = spec_gloss.diffuse_factor();
                diffuse = [r, g, b];
                diffuse_texture = texture_path(spec_gloss.diffuse_texture(), base_dir, &name);
            }
        }
        materials.push(Material {
            name,
            diffuse,
            diffuse_texture,
        });
    }
    if materials.is_empty() {
        materials.push(Material::default());
    }
    materials
}

/// Inverse-transpose of the upper 3x3, identity when that is singular.
fn normal_matrix(world: &Matrix4<f32>) -> Matrix3<f32> {
    let upper = Matrix3::from_cols(world.x.truncate(), world.y.truncate(), world.z.truncate());
    if upper.determinant().abs() <= 1e-8 {
        return Matrix3::identity();
    }
    upper
        .invert()
        .map_or_else(Matrix3::identity, |inverse| inverse.transpose())
}

fn read_primitive(
    primitive: &::gltf::Primitive,
    buffers: &[Vec<u8>],
    world: &Matrix4<f32>,
    normal_matrix: &Matrix3<f32>,
    mesh_name: &str,
) -> Option<MeshChunk> {
    if primitive.mode() != ::gltf::mesh::Mode::Triangles {
        log::warn!(
            "Mesh {mesh_name}: skipping primitive {} with mode {:?}",
            primitive.index(),
            primitive.mode()
        );
        return None;
    }
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));

    let positions: Vec<[f32; 3]> = match reader.read_positions() {
        Some(positions) => positions
            .map(|p| {
                let p = *world * Vector4::new(p[0], p[1], p[2], 1.0);
                [p.x, p.y, p.z]
            })
            .collect(),
        None => Vec::new(),
    };
    if positions.is_empty() {
        log::warn!(
            "Mesh {mesh_name}: skipping primitive {} without positions",
            primitive.index()
        );
        return None;
    }
    let vertex_count = positions.len();

    let mut normals = vec![[0.0; 3]; vertex_count];
    if let Some(read) = reader.read_normals() {
        for (slot, n) in normals.iter_mut().zip(read) {
            let n = *normal_matrix * Vector3::from(n);
            let n = if n.magnitude2() > 0.0 { n.normalize() } else { n };
            *slot = n.into();
        }
    }
    let mut tex_coords = vec![[0.0; 2]; vertex_count];
    if let Some(read) = reader.read_tex_coords(0).map(|v| v.into_f32()) {
        for (slot, uv) in tex_coords.iter_mut().zip(read) {
            *slot = uv;
        }
    }

    let indices: Vec<u32> = match reader.read_indices() {
        Some(indices) => indices.into_u32().collect(),
        None => (0..vertex_count as u32).collect(),
    };
    if indices.is_empty() {
        return None;
    }
    if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertex_count) {
        log::warn!(
            "Mesh {mesh_name}: skipping primitive {} with index {bad} past {vertex_count} vertices",
            primitive.index()
        );
        return None;
    }

    Some(MeshChunk {
        positions,
        normals,
        tex_coords,
        indices,
        material: primitive.material().index().unwrap_or(0),
    })
}

fn mesh_chunks(
    mesh: &::gltf::Mesh,
    buffers: &[Vec<u8>],
    world: &Matrix4<f32>,
) -> Vec<MeshChunk> {
    let name = mesh.name().unwrap_or("unknown_mesh");
    let normals = normal_matrix(world);
    mesh.primitives()
        .filter_map(|primitive| read_primitive(&primitive, buffers, world, &normals, name))
        .collect()
}

/// Collects the geometry below `node`, transformed by `parent` and the node's own transform.
///
/// Each node is walked once; `visited` holds the indices already seen, so
/// cycles and nodes listed under several parents do not repeat geometry.
pub(crate) fn walk_node(
    node: &::gltf::Node,
    parent: &Matrix4<f32>,
    buffers: &[Vec<u8>],
    visited: &mut [bool],
    depth: usize,
) -> Vec<MeshChunk> {
    if depth > MAX_NODE_DEPTH {
        log::warn!("Node {} is nested too deeply, skipping it", node.index());
        return Vec::new();
    }
    match visited.get_mut(node.index()) {
        Some(seen) if !*seen => *seen = true,
        _ => {
            log::warn!("Node {} is reachable more than once, skipping the repeat", node.index());
            return Vec::new();
        }
    }
    let world = *parent * Matrix4::from(node.transform().matrix());
    let mut chunks = match node.mesh() {
        Some(mesh) => mesh_chunks(&mesh, buffers, &world),
        None => Vec::new(),
    };
    for child in node.children() {
        chunks.extend(walk_node(&child, &world, buffers, visited, depth + 1));
    }
    chunks
}

fn append_chunk(mesh: &mut Mesh, chunk: MeshChunk) {
    let material = if chunk.material < mesh.materials.len() {
        chunk.material
    } else {
        0
    };
    let base = mesh.positions.len() as u32;
    let first_index = mesh.indices.len() as u32;
    mesh.positions.extend(chunk.positions);
    mesh.normals.extend(chunk.normals);
    mesh.tex_coords.extend(chunk.tex_coords);
    mesh.indices.extend(chunk.indices.iter().map(|i| i + base));
    mesh.push_subset(first_index, chunk.indices.len() as u32, material);
}

/// Parses the glTF or GLB document `bytes` loaded from `path`.
///
/// External buffers and images are resolved relative to the directory of `path`.
pub fn parse_gltf(assets: &dyn AssetSource, path: &str, bytes: &[u8]) -> anyhow::Result<Mesh> {
    let gltf = ::gltf::Gltf::from_slice(bytes).context("Invalid glTF document")?;
    let base_dir = directory_of(path);
    let buffers = load_buffers(&gltf, assets, base_dir)?;

    let mut mesh = Mesh {
        materials: load_materials(&gltf, base_dir),
        ..Default::default()
    };

    let identity = Matrix4::identity();
    let mut visited = vec![false; gltf.nodes().len()];
    let scene = gltf.default_scene().or_else(|| gltf.scenes().next());
    let chunks: Vec<MeshChunk> = match scene {
        Some(scene) => scene
            .nodes()
            .flat_map(|node| walk_node(&node, &identity, &buffers, &mut visited, 0))
            .collect(),
        None => {
            let mut is_child = vec![false; gltf.nodes().len()];
            for node in gltf.nodes() {
                for child in node.children() {
                    is_child[child.index()] = true;
                }
            }
            let roots: Vec<_> = gltf.nodes().filter(|n| !is_child[n.index()]).collect();
            if roots.is_empty() {
                gltf.meshes()
                    .flat_map(|m| mesh_chunks(&m, &buffers, &identity))
                    .collect()
            } else {
                roots
                    .iter()
                    .flat_map(|node| walk_node(node, &identity, &buffers, &mut visited, 0))
                    .collect()
            }
        }
    };
    for chunk in chunks {
        append_chunk(&mut mesh, chunk);
    }
    if mesh.is_empty() {
        log::warn!("glTF {path} contains no triangle geometry");
    }
    Ok(mesh)
}
