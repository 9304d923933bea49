//! Wavefront material library parsing.
//!
//! Only the diffuse colour (`Kd`) and the diffuse map (`map_Kd`, with `map_Ka`
//! accepted as a stand-in) matter to the renderer; every other statement is
//! ignored.

use std::collections::HashMap;

use crate::data_structures::model::Material;

use super::{parse_components, resolve_relative, split_directive};

/// Slot of the material named `name`, appending a default one on first use.
pub fn ensure_material(
    materials: &mut Vec<Material>,
    lookup: &mut HashMap<String, usize>,
    name: &str,
) -> usize {
    if let Some(&slot) = lookup.get(name) {
        return slot;
    }
    let slot = materials.len();
    materials.push(Material::named(name));
    lookup.insert(name.to_string(), slot);
    slot
}

/// Parses a material library, adding its definitions to `materials`.
///
/// A name that is already known (including one only referenced by `usemtl`
/// so far) keeps its slot and has its definition replaced.
pub fn parse_mtl(
    text: &str,
    base_dir: &str,
    materials: &mut Vec<Material>,
    lookup: &mut HashMap<String, usize>,
) {
    let mut current: Option<Material> = None;

    for line in text.lines() {
        let Some((keyword, rest)) = split_directive(line) else {
            continue;
        };
        match keyword {
            "newmtl" => {
                if let Some(done) = current.take() {
                    commit(materials, lookup, done);
                }
                if rest.is_empty() {
                    log::warn!("Ignoring unnamed material definition");
                } else {
                    current = Some(Material::named(rest));
                }
            }
            "Kd" => {
                if let Some(material) = current.as_mut() {
                    material.diffuse = parse_components(rest, [1.0; 3]);
                }
            }
            "map_Kd" | "map_Ka" => {
                if let Some(material) = current.as_mut() {
                    match resolve_map_path(base_dir, rest) {
                        Some(path) => material.diffuse_texture = Some(path),
                        None => log::warn!("Material {} has an empty {keyword}", material.name),
                    }
                }
            }
            _ => {}
        }
    }
    if let Some(done) = current.take() {
        commit(materials, lookup, done);
    }
}

fn commit(materials: &mut Vec<Material>, lookup: &mut HashMap<String, usize>, material: Material) {
    match lookup.get(&material.name) {
        Some(&slot) => materials[slot] = material,
        None => {
            lookup.insert(material.name.clone(), materials.len());
            materials.push(material);
        }
    }
}

/// Splits on whitespace, keeping `"` or `'` quoted runs together.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut token = String::new();
    let mut quote: Option<char> = None;
    for c in text.chars() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(open), c) if c == open => quote = None,
            (None, c) if c.is_whitespace() => {
                if !token.is_empty() {
                    tokens.push(std::mem::take(&mut token));
                }
            }
            (_, c) => token.push(c),
        }
    }
    if !token.is_empty() {
        tokens.push(token);
    }
    tokens
}

/// Picks the file name out of a map statement and resolves it against `base_dir`.
///
/// Map statements may carry options (`-bm 0.5`, `-s 1 1 1`) before the file
/// name. The file is the last non-option token that looks like a path; numbers
/// never do. Without such a token the last non-numeric, non-option token is used.
pub fn resolve_map_path(base_dir: &str, statement: &str) -> Option<String> {
    let tokens = tokenize(statement);
    let is_option = |t: &&String| t.starts_with('-');
    let is_number = |t: &&String| t.parse::<f32>().is_ok();
    let looks_like_path = |t: &&String| t.contains(['/', '\\', '.']);

    let file = tokens
        .iter()
        .rev()
        .find(|t| !is_option(t) && !is_number(t) && looks_like_path(t))
        .or_else(|| {
            tokens
                .iter()
                .rev()
                .find(|t| !is_option(t) && !is_number(t))
        })
        .or_else(|| tokens.last())?;
    resolve_relative(base_dir, file)
}
