mod common;

use common::test_utils::init_logger;
use prism_ngin::{Subset, import_model, resources::assets::MemoryAssetSource, try_import_model};

const TRIANGLE: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];

/// Assembles one binary buffer and the accessors into it. `body` supplies the
/// nodes, meshes, scenes and materials of each document.
#[derive(Default)]
struct GltfBuilder {
    bin: Vec<u8>,
    views: Vec<String>,
    accessors: Vec<String>,
}

impl GltfBuilder {
    fn view(&mut self, bytes: &[u8], target: Option<u32>) -> usize {
        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }
        let target = target.map(|t| format!(r#", "target": {t}"#)).unwrap_or_default();
        self.views.push(format!(
            r#"{{"buffer": 0, "byteOffset": {}, "byteLength": {}{target}}}"#,
            self.bin.len(),
            bytes.len()
        ));
        self.bin.extend_from_slice(bytes);
        self.views.len() - 1
    }

    fn accessor(&mut self, json: String) -> usize {
        self.accessors.push(json);
        self.accessors.len() - 1
    }

    fn positions(&mut self, data: &[[f32; 3]]) -> usize {
        let bytes: Vec<u8> = data.iter().flatten().flat_map(|c| c.to_le_bytes()).collect();
        let view = self.view(&bytes, Some(34962));
        let (lo, hi) = data.iter().fold(([f32::MAX; 3], [f32::MIN; 3]), |(lo, hi), p| {
            (
                [0, 1, 2].map(|i| lo[i].min(p[i])),
                [0, 1, 2].map(|i| hi[i].max(p[i])),
            )
        });
        self.accessor(format!(
            r#"{{"bufferView": {view}, "componentType": 5126, "count": {}, "type": "VEC3", "min": {lo:?}, "max": {hi:?}}}"#,
            data.len()
        ))
    }

    fn normals(&mut self, data: &[[f32; 3]]) -> usize {
        let bytes: Vec<u8> = data.iter().flatten().flat_map(|c| c.to_le_bytes()).collect();
        let view = self.view(&bytes, Some(34962));
        self.accessor(format!(
            r#"{{"bufferView": {view}, "componentType": 5126, "count": {}, "type": "VEC3"}}"#,
            data.len()
        ))
    }

    fn indices(&mut self, data: &[u16]) -> usize {
        let bytes: Vec<u8> = data.iter().flat_map(|i| i.to_le_bytes()).collect();
        let view = self.view(&bytes, Some(34963));
        self.accessor(format!(
            r#"{{"bufferView": {view}, "componentType": 5123, "count": {}, "type": "SCALAR"}}"#,
            data.len()
        ))
    }

    /// `uri` is `None` for the GLB binary chunk.
    fn json(&self, body: &str, uri: Option<&str>) -> String {
        let uri = uri.map(|u| format!(r#""uri": "{u}", "#)).unwrap_or_default();
        format!(
            r#"{{
  "asset": {{"version": "2.0"}},
  {body},
  "buffers": [{{{uri}"byteLength": {}}}],
  "bufferViews": [{}],
  "accessors": [{}]
}}"#,
            self.bin.len(),
            self.views.join(", "),
            self.accessors.join(", ")
        )
    }

    /// `models/model.gltf` next to its `models/model.bin`.
    fn assets(&self, body: &str) -> MemoryAssetSource {
        MemoryAssetSource::new()
            .with("models/model.gltf", self.json(body, Some("model.bin")))
            .with("models/model.bin", self.bin.clone())
    }

    fn glb(&self, body: &str) -> Vec<u8> {
        let mut json = self.json(body, None).into_bytes();
        while json.len() % 4 != 0 {
            json.push(b' ');
        }
        let mut bin = self.bin.clone();
        while bin.len() % 4 != 0 {
            bin.push(0);
        }
        let total = 12 + 8 + json.len() + 8 + bin.len();
        let mut glb = Vec::with_capacity(total);
        glb.extend_from_slice(b"glTF");
        glb.extend(2u32.to_le_bytes());
        glb.extend((total as u32).to_le_bytes());
        glb.extend((json.len() as u32).to_le_bytes());
        glb.extend(0x4E4F_534Au32.to_le_bytes());
        glb.extend(json);
        glb.extend((bin.len() as u32).to_le_bytes());
        glb.extend(0x004E_4942u32.to_le_bytes());
        glb.extend(bin);
        glb
    }
}

fn subsets(list: &[(u32, u32, usize)]) -> Vec<Subset> {
    list.iter()
        .map(|&(first_index, index_count, material)| Subset {
            first_index,
            index_count,
            material,
        })
        .collect()
}

fn assert_close(a: [f32; 3], b: [f32; 3]) {
    for i in 0..3 {
        assert!((a[i] - b[i]).abs() < 1e-5, "{a:?} != {b:?}");
    }
}

#[test]
fn only_triangle_primitives_are_imported() {
    init_logger();
    let mut gltf = GltfBuilder::default();
    let positions = gltf.positions(&TRIANGLE);
    let body = format!(
        r#""scenes": [{{"nodes": [0]}}],
  "nodes": [{{"mesh": 0}}],
  "meshes": [{{"primitives": [
    {{"attributes": {{"POSITION": {positions}}}, "mode": 1}},
    {{"attributes": {{"POSITION": {positions}}}, "mode": 0}},
    {{"attributes": {{"POSITION": {positions}}}}}
  ]}}]"#
    );
    let mesh = try_import_model(&gltf.assets(&body), "models/model.gltf").unwrap();
    assert_eq!(mesh.vertex_count(), 3);
    assert_eq!(mesh.indices, vec![0, 1, 2]);
    assert_eq!(mesh.subsets, subsets(&[(0, 3, 0)]));
}

#[test]
fn primitives_and_meshes_are_appended_with_rebased_indices() {
    init_logger();
    let mut gltf = GltfBuilder::default();
    let positions = gltf.positions(&TRIANGLE);
    let reversed = gltf.indices(&[2, 1, 0]);
    let body = format!(
        r#""scenes": [{{"nodes": [0, 1]}}],
  "nodes": [{{"mesh": 0}}, {{"mesh": 1}}],
  "meshes": [
    {{"primitives": [
      {{"attributes": {{"POSITION": {positions}}}, "indices": {reversed}, "material": 0}},
      {{"attributes": {{"POSITION": {positions}}}, "indices": {reversed}, "material": 0}}
    ]}},
    {{"primitives": [{{"attributes": {{"POSITION": {positions}}}, "material": 1}}]}}
  ],
  "materials": [{{"name": "first"}}, {{"name": "second"}}]"#
    );
    let mesh = try_import_model(&gltf.assets(&body), "models/model.gltf").unwrap();

    assert_eq!(mesh.vertex_count(), 9);
    assert_eq!(mesh.indices, vec![2, 1, 0, 5, 4, 3, 6, 7, 8]);
    // both primitives of the first mesh share a material and merge into one subset
    assert_eq!(mesh.subsets, subsets(&[(0, 6, 0), (6, 3, 1)]));
    assert!(mesh.subsets_are_contiguous());
    // no normals or texture coordinates in the document
    assert!(mesh.normals.iter().all(|n| *n == [0.0; 3]));
    assert!(mesh.tex_coords.iter().all(|uv| *uv == [0.0; 2]));
}

#[test]
fn specular_glossiness_supplies_the_diffuse_colour() {
    init_logger();
    let mut gltf = GltfBuilder::default();
    let positions = gltf.positions(&TRIANGLE);
    let body = format!(
        r#""extensionsUsed": ["KHR_materials_pbrSpecularGlossiness"],
  "scenes": [{{"nodes": [0]}}],
  "nodes": [{{"mesh": 0}}],
  "meshes": [{{"primitives": [{{"attributes": {{"POSITION": {positions}}}, "material": 1}}]}}],
  "images": [{{"uri": "textures/base.png"}}, {{"uri": "textures/diffuse.png"}}],
  "textures": [{{"source": 0}}, {{"source": 1}}],
  "materials": [
    {{"name": "metal",
      "pbrMetallicRoughness": {{"baseColorTexture": {{"index": 0}}}},
      "extensions": {{"KHR_materials_pbrSpecularGlossiness": {{"diffuseTexture": {{"index": 1}}}}}}}},
    {{"name": "gloss",
      "pbrMetallicRoughness": {{"baseColorFactor": [1.0, 1.0, 1.0, 1.0]}},
      "extensions": {{"KHR_materials_pbrSpecularGlossiness": {{
        "diffuseFactor": [0.2, 0.4, 0.6, 1.0],
        "diffuseTexture": {{"index": 1}}
      }}}}}}
  ]"#
    );
    let mesh = try_import_model(&gltf.assets(&body), "models/model.gltf").unwrap();

    // a base colour texture wins over the extension
    assert_eq!(
        mesh.materials[0].diffuse_texture.as_deref(),
        Some("models/textures/base.png")
    );
    assert_eq!(mesh.materials[1].diffuse, [0.2, 0.4, 0.6]);
    assert_eq!(
        mesh.materials[1].diffuse_texture.as_deref(),
        Some("models/textures/diffuse.png")
    );
    assert_eq!(mesh.subsets, subsets(&[(0, 3, 1)]));
}

#[test]
fn binary_container_uses_its_own_chunk() {
    init_logger();
    let mut gltf = GltfBuilder::default();
    let positions = gltf.positions(&TRIANGLE);
    let indices = gltf.indices(&[0, 2, 1]);
    let body = format!(
        r#""scene": 0,
  "scenes": [{{"nodes": [0]}}],
  "nodes": [{{"mesh": 0, "translation": [0.0, 0.0, -2.0]}}],
  "meshes": [{{"primitives": [{{"attributes": {{"POSITION": {positions}}}, "indices": {indices}}}]}}]"#
    );
    // no companion .bin: everything comes from the container
    let assets = MemoryAssetSource::new().with("scenes/tri.glb", gltf.glb(&body));
    let mesh = try_import_model(&assets, "scenes/tri.glb").unwrap();

    assert_eq!(mesh.indices, vec![0, 2, 1]);
    assert_close(mesh.positions[1], [1.0, 0.0, -2.0]);
    assert_eq!(mesh.triangle_count(), 1);
}

#[test]
fn non_uniform_scale_uses_the_inverse_transpose_for_normals() {
    init_logger();
    let mut gltf = GltfBuilder::default();
    let positions = gltf.positions(&TRIANGLE);
    let diagonal = std::f32::consts::FRAC_1_SQRT_2;
    let normals = gltf.normals(&[[diagonal, diagonal, 0.0]; 3]);
    let body = format!(
        r#""scenes": [{{"nodes": [0]}}],
  "nodes": [{{"mesh": 0, "scale": [2.0, 1.0, 1.0]}}],
  "meshes": [{{"primitives": [{{"attributes": {{"POSITION": {positions}, "NORMAL": {normals}}}}}]}}]"#
    );
    let mesh = try_import_model(&gltf.assets(&body), "models/model.gltf").unwrap();

    assert_close(mesh.positions[1], [2.0, 0.0, 0.0]);
    // (0.5, 1, 0) normalised; scaling the normal by the matrix would tilt it the other way
    let expected = [1.0 / 5f32.sqrt(), 2.0 / 5f32.sqrt(), 0.0];
    for n in &mesh.normals {
        assert_close(*n, expected);
    }
}

#[test]
fn document_without_roots_falls_back_to_the_mesh_list() {
    init_logger();
    let mut gltf = GltfBuilder::default();
    let positions = gltf.positions(&TRIANGLE);
    // every node is somebody's child, so there is no root to start from
    let body = format!(
        r#""nodes": [
    {{"children": [1]}},
    {{"children": [0], "mesh": 0, "translation": [5.0, 0.0, 0.0]}}
  ],
  "meshes": [{{"primitives": [{{"attributes": {{"POSITION": {positions}}}}}]}}]"#
    );
    let mesh = try_import_model(&gltf.assets(&body), "models/model.gltf").unwrap();

    assert_eq!(mesh.vertex_count(), 3);
    // node transforms do not apply to meshes taken from the list
    assert_close(mesh.positions[1], [1.0, 0.0, 0.0]);
}

#[test]
fn node_cycles_are_walked_once() {
    init_logger();
    let mut gltf = GltfBuilder::default();
    let positions = gltf.positions(&TRIANGLE);
    let body = format!(
        r#""scenes": [{{"nodes": [0]}}],
  "nodes": [{{"children": [1]}}, {{"children": [0], "mesh": 0}}],
  "meshes": [{{"primitives": [{{"attributes": {{"POSITION": {positions}}}}}]}}]"#
    );
    let mesh = try_import_model(&gltf.assets(&body), "models/model.gltf").unwrap();
    assert_eq!(mesh.indices, vec![0, 1, 2]);
}

#[test]
fn shared_children_do_not_multiply_the_walk() {
    init_logger();
    let mut gltf = GltfBuilder::default();
    let positions = gltf.positions(&TRIANGLE);
    // forty levels of pairs, each node pointing at both nodes of the next level
    let levels = 40;
    let mut nodes = Vec::new();
    for level in 0..levels {
        for _ in 0..2 {
            if level + 1 == levels {
                nodes.push(r#"{"mesh": 0}"#.to_string());
            } else {
                let next = 2 * (level + 1);
                nodes.push(format!(r#"{{"children": [{next}, {}]}}"#, next + 1));
            }
        }
    }
    let body = format!(
        r#""scenes": [{{"nodes": [0]}}],
  "nodes": [{}],
  "meshes": [{{"primitives": [{{"attributes": {{"POSITION": {positions}}}}}]}}]"#,
        nodes.join(", ")
    );
    let mesh = try_import_model(&gltf.assets(&body), "models/model.gltf").unwrap();
    // one copy per leaf node
    assert_eq!(mesh.vertex_count(), 6);
}

#[test]
fn embedded_textures_fall_back_to_the_material_colour() {
    init_logger();
    let mut gltf = GltfBuilder::default();
    let positions = gltf.positions(&TRIANGLE);
    let png_view = gltf.view(&[0x89, b'P', b'N', b'G'], None);
    let body = format!(
        r#""scenes": [{{"nodes": [0]}}],
  "nodes": [{{"mesh": 0}}],
  "meshes": [{{"primitives": [{{"attributes": {{"POSITION": {positions}}}}}]}}],
  "images": [
    {{"uri": "data:image/png;base64,iVBORw0KGgo="}},
    {{"bufferView": {png_view}, "mimeType": "image/png"}}
  ],
  "textures": [{{"source": 0}}, {{"source": 1}}],
  "materials": [
    {{"name": "inline", "pbrMetallicRoughness": {{
      "baseColorFactor": [0.5, 0.25, 1.0, 1.0], "baseColorTexture": {{"index": 0}}}}}},
    {{"name": "packed", "pbrMetallicRoughness": {{"baseColorTexture": {{"index": 1}}}}}}
  ]"#
    );
    let assets = gltf.assets(&body);
    let mesh = try_import_model(&assets, "models/model.gltf").unwrap();

    assert_eq!(mesh.materials[0].diffuse_texture, None);
    assert_eq!(mesh.materials[0].diffuse, [0.5, 0.25, 1.0]);
    assert_eq!(mesh.materials[1].diffuse_texture, None);
    assert_eq!(mesh.materials[1].diffuse, [1.0, 1.0, 1.0]);
    assert_eq!(import_model(&assets, "models/model.gltf").triangle_count(), 1);
}
