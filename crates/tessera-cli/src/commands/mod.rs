//! CLI command implementations

pub mod filter;
pub mod filters;
pub mod info;
pub mod max_proj;
pub mod synthetic;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tessera_stack::{EngineConfig, ImageStack};

/// Worker pool options shared by commands that run the engine
#[derive(Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// Number of worker threads (defaults to available parallelism)
    #[arg(short, long)]
    pub workers: Option<usize>,
    /// Engine configuration file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl EngineArgs {
    /// Resolve the engine configuration: file first, then flags
    pub fn load(&self, verbose: bool) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                EngineConfig::from_toml_str(&text)
                    .with_context(|| format!("Invalid config {}", path.display()))?
            }
            None => EngineConfig::default(),
        };
        if let Some(workers) = self.workers {
            config.n_workers = Some(workers);
        }
        config.verbose |= verbose;
        config.validate().context("Invalid engine configuration")?;
        Ok(config)
    }
}

/// Load a stack from a tile set directory
pub fn open_stack(input: &Path) -> Result<ImageStack> {
    ImageStack::from_path(input)
        .with_context(|| format!("Failed to load tile set {}", input.display()))
}

/// Write a stack as a tile set directory
pub fn write_stack(stack: &ImageStack, output: &Path) -> Result<()> {
    let mut writer = tessera_stack::DirectoryTileWriter::new(output);
    stack
        .export(&mut writer)
        .with_context(|| format!("Failed to write tile set {}", output.display()))
}
