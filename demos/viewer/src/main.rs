use std::path::PathBuf;

use prism_ngin::{
    BUILT_ASSETS, EngineConfig,
    flow::{HostOptions, run},
};

/// Usage: `viewer [model ...]`, paths relative to the library's `assets/` directory.
fn main() -> anyhow::Result<()> {
    let mut models: Vec<String> = std::env::args().skip(1).collect();
    if models.is_empty() {
        models.push("models/cube.obj".to_string());
    }
    run(HostOptions {
        title: "prism viewer".to_string(),
        asset_root: PathBuf::from(BUILT_ASSETS),
        models,
        config: EngineConfig::default().with_clear_color([0.05, 0.05, 0.08, 1.0]),
    })
}
