mod common;

use std::path::PathBuf;

use common::test_utils::{fixture_assets, init_logger};
use prism_ngin::{
    Material, Subset, import_model, try_import_model,
    resources::assets::{FsAssetSource, MemoryAssetSource},
};

fn subsets(list: &[(u32, u32, usize)]) -> Vec<Subset> {
    list.iter()
        .map(|&(first_index, index_count, material)| Subset {
            first_index,
            index_count,
            material,
        })
        .collect()
}

#[test]
fn obj_cube_with_material_library() {
    init_logger();
    let mesh = try_import_model(&fixture_assets(), "models/cube.obj").unwrap();

    assert_eq!(mesh.vertex_count(), 24);
    assert_eq!(mesh.indices.len(), 36);
    assert_eq!(mesh.subsets, subsets(&[(0, 24, 1), (24, 12, 2)]));
    assert!(mesh.subsets_are_contiguous());

    let names: Vec<_> = mesh.materials.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["Default", "crate", "paint"]);
    assert_eq!(
        mesh.materials[1].diffuse_texture.as_deref(),
        Some("models/textures/crate.png")
    );
    assert_eq!(mesh.materials[2].diffuse, [0.8, 0.2, 0.1]);
    assert_eq!(mesh.materials[2].diffuse_texture, None);
}

#[test]
fn obj_texcoords_are_flipped_vertically() {
    init_logger();
    let mesh = try_import_model(&fixture_assets(), "models/quad.obj").unwrap();
    assert_eq!(mesh.tex_coords, vec![[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]]);
    assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
    assert_eq!(mesh.materials, vec![Material::default()]);
}

#[test]
fn obj_quad_without_normals() {
    init_logger();
    let assets = MemoryAssetSource::new().with(
        "flat.obj",
        "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3\nf 1 3 4\n",
    );
    let mesh = try_import_model(&assets, "flat.obj").unwrap();

    assert_eq!(mesh.vertex_count(), 4);
    assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
    assert_eq!(mesh.subsets, subsets(&[(0, 6, 0)]));
    assert_eq!(mesh.materials, vec![Material::default()]);
    assert_eq!(mesh.normals, vec![[0.0; 3]; 4]);
}

#[test]
fn missing_material_library_keeps_geometry() {
    init_logger();
    let assets = MemoryAssetSource::new().with(
        "broken.obj",
        "mtllib nowhere.mtl\nusemtl ghost\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n",
    );
    let mesh = try_import_model(&assets, "broken.obj").unwrap();
    assert_eq!(mesh.triangle_count(), 1);
    // usemtl of an unknown name registers a default-coloured material
    assert_eq!(mesh.materials.len(), 2);
    assert_eq!(mesh.materials[1].name, "ghost");
    assert_eq!(mesh.subsets, subsets(&[(0, 3, 1)]));
}

#[test]
fn unusable_inputs_produce_empty_meshes() {
    init_logger();
    let assets = MemoryAssetSource::new()
        .with("empty.obj", "")
        .with("no_positions.obj", "# nothing\nf 1 2 3\n")
        .with("model.fbx", "binary");
    for path in ["", "missing.obj", "empty.obj", "no_positions.obj", "model.fbx"] {
        assert!(try_import_model(&assets, path).is_err(), "{path} should fail");
        assert!(import_model(&assets, path).is_empty());
    }
}

#[test]
fn shipped_cube_asset_imports() {
    init_logger();
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets");
    let mesh = try_import_model(&FsAssetSource::new(root), "models/cube.obj").unwrap();
    assert_eq!(mesh.triangle_count(), 12);
    assert_eq!(
        mesh.materials[1].diffuse_texture.as_deref(),
        Some("models/checker.png")
    );
}

/// Axis-aligned unit cube as a glTF document with an external buffer.
struct GltfCube {
    json: String,
    bin: Vec<u8>,
}

impl GltfCube {
    fn new(nodes: &str, scene: &str, materials: &str) -> Self {
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ];
        let mut positions = Vec::new();
        let mut normals = Vec::new();
        let mut indices: Vec<u16> = Vec::new();
        for (n, u, v) in faces {
            let base = positions.len() as u16;
            for (su, sv) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
                positions.push([0, 1, 2].map(|i| n[i] * 0.5 + u[i] * su + v[i] * sv));
                normals.push(n);
            }
            indices.extend([0, 1, 2, 0, 2, 3].map(|i| base + i));
        }

        let mut bin: Vec<u8> = Vec::new();
        for p in positions.iter().chain(&normals) {
            for c in p {
                bin.extend(c.to_le_bytes());
            }
        }
        for i in &indices {
            bin.extend(i.to_le_bytes());
        }
        let json = format!(
            r#"{{
  "asset": {{"version": "2.0"}},
  {scene}
  "nodes": {nodes},
  "meshes": [{{"name": "cube", "primitives": [{{"attributes": {{"POSITION": 0, "NORMAL": 1}}, "indices": 2{material_ref}}}]}}],
  {materials}
  "buffers": [{{"uri": "cube.bin", "byteLength": {len}}}],
  "bufferViews": [
    {{"buffer": 0, "byteOffset": 0, "byteLength": 288, "target": 34962}},
    {{"buffer": 0, "byteOffset": 288, "byteLength": 288, "target": 34962}},
    {{"buffer": 0, "byteOffset": 576, "byteLength": 72, "target": 34963}}
  ],
  "accessors": [
    {{"bufferView": 0, "componentType": 5126, "count": 24, "type": "VEC3", "min": [-0.5, -0.5, -0.5], "max": [0.5, 0.5, 0.5]}},
    {{"bufferView": 1, "componentType": 5126, "count": 24, "type": "VEC3"}},
    {{"bufferView": 2, "componentType": 5123, "count": 36, "type": "SCALAR"}}
  ]
}}"#,
            material_ref = if materials.is_empty() { "" } else { r#", "material": 0"# },
            len = bin.len(),
        );
        Self { json, bin }
    }

    fn assets(&self) -> MemoryAssetSource {
        MemoryAssetSource::new()
            .with("models/cube.gltf", self.json.clone())
            .with("models/cube.bin", self.bin.clone())
    }
}

fn bounds(positions: &[[f32; 3]]) -> ([f32; 3], [f32; 3]) {
    positions.iter().fold(
        ([f32::MAX; 3], [f32::MIN; 3]),
        |(lo, hi), p| {
            (
                [0, 1, 2].map(|i| lo[i].min(p[i])),
                [0, 1, 2].map(|i| hi[i].max(p[i])),
            )
        },
    )
}

fn assert_close(a: [f32; 3], b: [f32; 3]) {
    for i in 0..3 {
        assert!((a[i] - b[i]).abs() < 1e-5, "{a:?} != {b:?}");
    }
}

#[test]
fn gltf_cube_with_external_buffer() {
    init_logger();
    let cube = GltfCube::new(
        r#"[{"mesh": 0}]"#,
        r#""scene": 0, "scenes": [{"nodes": [0]}],"#,
        r#""materials": [{"name": "red", "pbrMetallicRoughness": {"baseColorFactor": [1.0, 0.0, 0.0, 1.0]}}],"#,
    );
    let mesh = try_import_model(&cube.assets(), "models/cube.gltf").unwrap();

    assert_eq!(mesh.vertex_count(), 24);
    assert_eq!(mesh.indices.len(), 36);
    assert_eq!(mesh.subsets, subsets(&[(0, 36, 0)]));
    assert_eq!(mesh.materials.len(), 1);
    assert_eq!(mesh.materials[0].name, "red");
    assert_eq!(mesh.materials[0].diffuse, [1.0, 0.0, 0.0]);
    assert!(mesh.tex_coords.iter().all(|uv| *uv == [0.0, 0.0]));
}

#[test]
fn gltf_node_transforms_are_baked_in() {
    init_logger();
    let cube = GltfCube::new(
        r#"[{"children": [1], "translation": [0.0, 1.0, 0.0]}, {"mesh": 0, "scale": [2.0, 2.0, 2.0]}]"#,
        r#""scenes": [{"nodes": [0]}],"#,
        "",
    );
    let mesh = try_import_model(&cube.assets(), "models/cube.gltf").unwrap();

    let (lo, hi) = bounds(&mesh.positions);
    assert_close(lo, [-1.0, 0.0, -1.0]);
    assert_close(hi, [1.0, 2.0, 1.0]);
    // uniform scale leaves normals unit length
    for n in &mesh.normals {
        let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
        assert!((len - 1.0).abs() < 1e-5);
    }
    assert_eq!(mesh.materials, vec![Material::default()]);
}

#[test]
fn gltf_without_scenes_walks_root_nodes() {
    init_logger();
    let cube = GltfCube::new(r#"[{"mesh": 0, "translation": [3.0, 0.0, 0.0]}]"#, "", "");
    let mesh = try_import_model(&cube.assets(), "models/cube.gltf").unwrap();
    let (lo, hi) = bounds(&mesh.positions);
    assert_close(lo, [2.5, -0.5, -0.5]);
    assert_close(hi, [3.5, 0.5, 0.5]);
}

#[test]
fn gltf_truncated_buffer_is_rejected() {
    init_logger();
    let cube = GltfCube::new(r#"[{"mesh": 0}]"#, "", "");
    let assets = cube.assets();
    assets.insert("models/cube.bin", cube.bin[..100].to_vec());
    assert!(try_import_model(&assets, "models/cube.gltf").is_err());
    assert!(import_model(&assets, "models/cube.gltf").is_empty());
}
