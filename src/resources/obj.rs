//! Wavefront OBJ import.
//!
//! Supports `v`, `vn`, `vt`, `f`, `mtllib` and `usemtl`. Face corners are
//! deduplicated on their resolved `(position, texcoord, normal)` triple,
//! polygons are fan-triangulated and texture `v` is flipped to a top-left origin.

use std::collections::HashMap;

use anyhow::bail;

use crate::data_structures::model::{Material, Mesh};

use super::{
    assets::AssetSource,
    directory_of, join_paths,
    mtl::{ensure_material, parse_mtl},
    parse_components, split_directive,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct CornerKey {
    position: usize,
    tex_coord: Option<usize>,
    normal: Option<usize>,
}

/// Raw 1-based (or negative, relative) indices of one face corner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CornerRef {
    position: i64,
    tex_coord: Option<i64>,
    normal: Option<i64>,
}

/// Leading integer of `text` (`"12abc"` reads as 12), `None` if there is none.
fn parse_int_prefix(text: &str) -> Option<i64> {
    let text = text.trim();
    let digits_start = usize::from(text.starts_with(['+', '-']));
    let digits_end = text[digits_start..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(text.len(), |pos| pos + digits_start);
    if digits_end == digits_start {
        return None;
    }
    text[..digits_end].parse().ok()
}

/// Splits `v`, `v/vt`, `v//vn` or `v/vt/vn`.
fn parse_corner(token: &str) -> Option<CornerRef> {
    let mut fields = token.split('/');
    let position = parse_int_prefix(fields.next()?)?;
    let tex_coord = fields.next().and_then(parse_int_prefix);
    let normal = fields.next().and_then(parse_int_prefix);
    Some(CornerRef {
        position,
        tex_coord,
        normal,
    })
}

/// Resolves an OBJ index against the `count` elements seen so far.
///
/// `0` (or no index) means absent. Out-of-range indices come back as the
/// offending zero-based value.
fn resolve_index(raw: Option<i64>, count: usize) -> Result<Option<usize>, i64> {
    let resolved = match raw {
        None | Some(0) => return Ok(None),
        Some(n) if n > 0 => n - 1,
        Some(n) => count as i64 + n,
    };
    if resolved >= 0 && (resolved as usize) < count {
        Ok(Some(resolved as usize))
    } else {
        Err(resolved)
    }
}

struct ObjParser<'a> {
    assets: &'a dyn AssetSource,
    base_dir: &'a str,
    positions: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    tex_coords: Vec<[f32; 2]>,
    corners: HashMap<CornerKey, u32>,
    lookup: HashMap<String, usize>,
    material: usize,
    skipped_corners: usize,
    mesh: Mesh,
}

impl<'a> ObjParser<'a> {
    fn new(assets: &'a dyn AssetSource, base_dir: &'a str) -> Self {
        let mesh = Mesh {
            materials: vec![Material::default()],
            ..Default::default()
        };
        Self {
            assets,
            base_dir,
            positions: Vec::new(),
            normals: Vec::new(),
            tex_coords: Vec::new(),
            corners: HashMap::new(),
            lookup: HashMap::from([(Material::DEFAULT_NAME.to_string(), 0)]),
            material: 0,
            skipped_corners: 0,
            mesh,
        }
    }

    fn line(&mut self, keyword: &str, rest: &str) {
        match keyword {
            "v" => self.positions.push(parse_components(rest, [0.0; 3])),
            "vn" => self.normals.push(parse_components(rest, [0.0; 3])),
            "vt" => self.tex_coords.push(parse_components(rest, [0.0; 2])),
            "f" => self.face(rest),
            "mtllib" => self.material_libraries(rest),
            "usemtl" => {
                if !rest.is_empty() {
                    self.material = ensure_material(&mut self.mesh.materials, &mut self.lookup, rest);
                }
            }
            _ => {}
        }
    }

    fn material_libraries(&mut self, rest: &str) {
        for file in rest.split_whitespace() {
            let path = join_paths(self.base_dir, file);
            match self.assets.read_string(&path) {
                Ok(text) if !text.trim().is_empty() => {
                    parse_mtl(&text, self.base_dir, &mut self.mesh.materials, &mut self.lookup)
                }
                Ok(_) => log::warn!("Material library {path} is empty"),
                Err(e) => log::warn!("Skipping material library {path}: {e:#}"),
            }
        }
    }

    fn face(&mut self, rest: &str) {
        let mut face = Vec::new();
        for token in rest.split_whitespace() {
            let Some(corner) = parse_corner(token) else {
                log::warn!("Skipping malformed face corner '{token}'");
                self.skipped_corners += 1;
                continue;
            };
            match self.corner_index(corner) {
                Ok(index) => face.push(index),
                Err(reason) => {
                    log::warn!("Skipping face corner '{token}': {reason}");
                    self.skipped_corners += 1;
                }
            }
        }
        if face.len() < 3 {
            log::debug!("Skipping face with {} usable corners", face.len());
            return;
        }

        let material = if self.material < self.mesh.materials.len() {
            self.material
        } else {
            0
        };
        for i in 1..face.len() - 1 {
            let first = self.mesh.indices.len() as u32;
            self.mesh
                .indices
                .extend_from_slice(&[face[0], face[i], face[i + 1]]);
            self.mesh.push_subset(first, 3, material);
        }
    }

    fn corner_index(&mut self, corner: CornerRef) -> Result<u32, String> {
        let position = match resolve_index(Some(corner.position), self.positions.len()) {
            Ok(Some(index)) => index,
            Ok(None) => return Err("missing position index".to_string()),
            Err(index) => return Err(format!("position index {index} out of range")),
        };
        let tex_coord = resolve_index(corner.tex_coord, self.tex_coords.len())
            .map_err(|index| format!("texcoord index {index} out of range"))?;
        let normal = resolve_index(corner.normal, self.normals.len())
            .map_err(|index| format!("normal index {index} out of range"))?;

        let key = CornerKey {
            position,
            tex_coord,
            normal,
        };
        if let Some(&index) = self.corners.get(&key) {
            return Ok(index);
        }
        let [u, v] = tex_coord.map_or([0.0, 0.0], |i| self.tex_coords[i]);
        let index = self.mesh.push_vertex(
            self.positions[position],
            normal.map_or([0.0; 3], |i| self.normals[i]),
            [u, 1.0 - v],
        );
        self.corners.insert(key, index);
        Ok(index)
    }
}

/// Parses the OBJ document `bytes` loaded from `path`.
///
/// Material libraries and texture maps are resolved relative to the
/// directory of `path`.
pub fn parse_obj(assets: &dyn AssetSource, path: &str, bytes: &[u8]) -> anyhow::Result<Mesh> {
    let text = String::from_utf8_lossy(bytes);
    let base_dir = directory_of(path);
    let mut parser = ObjParser::new(assets, base_dir);
    for line in text.lines() {
        if let Some((keyword, rest)) = split_directive(line) {
            parser.line(keyword, rest);
        }
    }
    if parser.skipped_corners > 0 {
        log::warn!("{path}: skipped {} face corners", parser.skipped_corners);
    }
    if parser.positions.is_empty() {
        bail!("OBJ file {path} has no vertex positions");
    }
    Ok(parser.mesh)
}
