use anyhow::*;
use fs_extra::copy_items;
use fs_extra::dir::CopyOptions;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Every GLSL source under `shaders/` and the stage it is compiled for.
const SHADERS: [(&str, naga::ShaderStage); 2] = [
    ("model.vert", naga::ShaderStage::Vertex),
    ("model.frag", naga::ShaderStage::Fragment),
];

fn main() -> Result<()> {
    // Models, materials, textures and the GLSL shaders all live in /assets/.
    println!("cargo:rerun-if-changed=assets");

    let out_dir = env::var("OUT_DIR")?;
    let mut copy_options = CopyOptions::new();
    copy_options.overwrite = true;
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?);
    let assets_src = manifest_dir.join("assets");
    if assets_src.exists() {
        copy_items(&[&assets_src], &out_dir, &copy_options)?;
    }

    let assets_out = Path::new(&out_dir).join("assets");
    let shader_dir = assets_out.join("shaders");
    fs::create_dir_all(&shader_dir)?;
    for (name, stage) in SHADERS {
        let source = fs::read_to_string(assets_src.join("shaders").join(name))
            .with_context(|| format!("Failed to read shader {name}"))?;
        let words = compile_glsl(&source, stage).with_context(|| format!("Failed to compile {name}"))?;
        let bytes: Vec<u8> = words.iter().flat_map(|word| word.to_le_bytes()).collect();
        fs::write(shader_dir.join(format!("{name}.spv")), bytes)?;
    }

    println!("cargo:rustc-env=PRISM_ASSET_DIR={}", assets_out.display());
    Ok(())
}

/// Vulkan GLSL to SPIR-V. Coordinates are written out as the source states them.
fn compile_glsl(source: &str, stage: naga::ShaderStage) -> Result<Vec<u32>> {
    let module = naga::front::glsl::Frontend::default()
        .parse(&naga::front::glsl::Options::from(stage), source)
        .map_err(|e| anyhow!("{e:?}"))?;
    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| anyhow!("{e:?}"))?;
    let mut options = naga::back::spv::Options::default();
    options
        .flags
        .remove(naga::back::spv::WriterFlags::ADJUST_COORDINATE_SPACE);
    naga::back::spv::write_vec(&module, &info, &options, None).map_err(|e| anyhow!("{e:?}"))
}
