//! CPU-side mesh data and its GPU-resident counterpart.
//!
//! A [`Mesh`] is what the importers produce: flat per-vertex attribute arrays,
//! a 32-bit index list and [`Subset`]s binding contiguous index ranges to
//! [`Material`]s. A [`GpuModel`] pairs a mesh with the buffers and texture
//! slots the renderer needs to draw it.

use crate::gpu::{BufferId, Owned, VertexAttribute, VertexFormat, VertexLayout};

/// Interleaved vertex as uploaded to the vertex buffer: `[px,py,pz, nx,ny,nz, u,v]`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coords: [f32; 2],
}

impl ModelVertex {
    pub const STRIDE: u32 = std::mem::size_of::<ModelVertex>() as u32;

    pub fn layout() -> VertexLayout {
        VertexLayout {
            stride: Self::STRIDE,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    offset: 0,
                    format: VertexFormat::Float32x3,
                },
                VertexAttribute {
                    location: 1,
                    offset: std::mem::size_of::<[f32; 3]>() as u32,
                    format: VertexFormat::Float32x3,
                },
                VertexAttribute {
                    location: 2,
                    offset: std::mem::size_of::<[f32; 6]>() as u32,
                    format: VertexFormat::Float32x2,
                },
            ],
        }
    }
}

/// Surface description shared by the subsets that reference it.
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub name: String,
    /// Diffuse RGB, each channel in `[0, 1]`.
    pub diffuse: [f32; 3],
    /// Resolved asset path of the diffuse texture.
    pub diffuse_texture: Option<String>,
}

impl Material {
    pub const DEFAULT_NAME: &'static str = "Default";

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: Self::DEFAULT_NAME.to_string(),
            diffuse: [1.0, 1.0, 1.0],
            diffuse_texture: None,
        }
    }
}

/// A contiguous index range drawn with one material.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subset {
    pub first_index: u32,
    pub index_count: u32,
    pub material: usize,
}

impl Subset {
    pub fn end(&self) -> u32 {
        self.first_index + self.index_count
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub tex_coords: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
    pub subsets: Vec<Subset>,
    pub materials: Vec<Material>,
    /// Model-space offset applied when drawing; the only field that changes after import.
    pub translation: [f32; 3],
}

impl Mesh {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() || self.indices.is_empty()
    }

    /// Appends one vertex; the three attribute arrays always stay the same length.
    pub fn push_vertex(&mut self, position: [f32; 3], normal: [f32; 3], tex_coords: [f32; 2]) -> u32 {
        let index = self.positions.len() as u32;
        self.positions.push(position);
        self.normals.push(normal);
        self.tex_coords.push(tex_coords);
        index
    }

    /// Records that `index_count` indices starting at `first_index` use `material`.
    ///
    /// Extends the last subset instead when it has the same material and ends
    /// exactly where the new range starts.
    pub fn push_subset(&mut self, first_index: u32, index_count: u32, material: usize) {
        if index_count == 0 {
            return;
        }
        if let Some(last) = self.subsets.last_mut() {
            if last.material == material && last.end() == first_index {
                last.index_count += index_count;
                return;
            }
        }
        self.subsets.push(Subset {
            first_index,
            index_count,
            material,
        });
    }

    /// Whether the subsets tile the index array in order, without gaps or overlap.
    pub fn subsets_are_contiguous(&self) -> bool {
        let mut next = 0;
        for subset in &self.subsets {
            if subset.first_index != next || subset.index_count == 0 {
                return false;
            }
            next = subset.end();
        }
        next as usize == self.indices.len()
            && self
                .subsets
                .windows(2)
                .all(|pair| pair[0].material != pair[1].material)
    }

    /// Vertex data in the interleaved upload layout.
    pub fn interleaved(&self) -> Vec<ModelVertex> {
        self.positions
            .iter()
            .enumerate()
            .map(|(i, position)| ModelVertex {
                position: *position,
                normal: self.normals.get(i).copied().unwrap_or_default(),
                tex_coords: self.tex_coords.get(i).copied().unwrap_or_default(),
            })
            .collect()
    }
}

/// Address of a loaded model inside an engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(pub u64);

/// Vertex and index buffers of one uploaded model.
#[derive(Debug)]
pub struct ModelBuffers {
    pub vertex: Owned<BufferId>,
    pub index: Owned<BufferId>,
    pub index_count: u32,
}

/// A mesh together with its GPU state.
///
/// The buffers are tied to the device generation and are dropped and
/// recreated on every swapchain rebuild; the mesh survives.
#[derive(Debug)]
pub struct GpuModel {
    pub id: ModelId,
    pub source: String,
    pub mesh: Mesh,
    pub buffers: Option<ModelBuffers>,
    /// Texture cache slot for every material index of `mesh`.
    pub texture_slots: Vec<usize>,
}

impl GpuModel {
    pub fn new(id: ModelId, source: impl Into<String>, mesh: Mesh) -> Self {
        Self {
            id,
            source: source.into(),
            mesh,
            buffers: None,
            texture_slots: Vec::new(),
        }
    }

    /// Texture slot for `material`, or `fallback` when it was never resolved.
    pub fn texture_slot(&self, material: usize, fallback: usize) -> usize {
        self.texture_slots.get(material).copied().unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_struct() {
        assert_eq!(ModelVertex::STRIDE, 32);
        let layout = ModelVertex::layout();
        assert_eq!(layout.attributes[1].offset, 12);
        assert_eq!(layout.attributes[2].offset, 24);
    }

    #[test]
    fn adjacent_subsets_with_same_material_merge() {
        let mut mesh = Mesh::default();
        mesh.indices = vec![0; 12];
        mesh.push_subset(0, 3, 0);
        mesh.push_subset(3, 3, 0);
        mesh.push_subset(6, 3, 1);
        mesh.push_subset(9, 3, 0);
        assert_eq!(mesh.subsets.len(), 3);
        assert_eq!(mesh.subsets[0].index_count, 6);
        assert!(mesh.subsets_are_contiguous());
    }

    #[test]
    fn gap_prevents_merge() {
        let mut mesh = Mesh::default();
        mesh.push_subset(0, 3, 0);
        mesh.push_subset(6, 3, 0);
        assert_eq!(mesh.subsets.len(), 2);
    }

    #[test]
    fn interleave_fills_missing_attributes() {
        let mut mesh = Mesh::default();
        mesh.positions.push([1.0, 2.0, 3.0]);
        let vertices = mesh.interleaved();
        assert_eq!(vertices[0].normal, [0.0; 3]);
        assert_eq!(vertices[0].tex_coords, [0.0; 2]);
        assert_eq!(bytemuck::cast_slice::<_, f32>(&vertices).len(), 8);
    }
}
