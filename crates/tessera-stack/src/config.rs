//! Configuration for the apply/transform engine

use std::collections::BTreeSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::axes::{default_group_by, Axis};
use crate::error::{StackError, StackResult};

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of pool workers; `None` uses the available parallelism
    pub n_workers: Option<usize>,
    /// Report per-chunk progress
    pub verbose: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            n_workers: None,
            verbose: false,
        }
    }
}

impl EngineConfig {
    /// Config with an explicit worker count
    pub fn with_workers(n_workers: usize) -> Self {
        Self {
            n_workers: Some(n_workers),
            ..Self::default()
        }
    }

    /// Parse from TOML
    pub fn from_toml_str(s: &str) -> StackResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| StackError::config(format!("invalid engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pool cannot run with
    pub fn validate(&self) -> StackResult<()> {
        if self.n_workers == Some(0) {
            return Err(StackError::config("n_workers must be at least 1"));
        }
        Ok(())
    }

    /// Worker count the pool is built with
    pub fn effective_workers(&self) -> usize {
        self.n_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        })
    }
}

/// Policy keeping apply results inside [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipMethod {
    /// Negatives to 0, values above 1 to 1
    #[default]
    Clip,
    /// Negatives to 0, then divide each chunk by its max when it exceeds 1
    ScaleByChunk,
    /// Negatives to 0, then divide the whole stack by its max when it exceeds 1
    ScaleByImage,
}

impl ClipMethod {
    /// Name as accepted by `FromStr`
    pub const fn as_str(self) -> &'static str {
        match self {
            ClipMethod::Clip => "clip",
            ClipMethod::ScaleByChunk => "scale_by_chunk",
            ClipMethod::ScaleByImage => "scale_by_image",
        }
    }
}

impl fmt::Display for ClipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClipMethod {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clip" => Ok(ClipMethod::Clip),
            "scale_by_chunk" => Ok(ClipMethod::ScaleByChunk),
            "scale_by_image" => Ok(ClipMethod::ScaleByImage),
            other => Err(StackError::config(format!(
                "unknown clip method {other:?}, expected one of clip, scale_by_chunk, scale_by_image"
            ))),
        }
    }
}

/// Options for [`ImageStack::apply`](crate::ImageStack::apply)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyOptions {
    /// Axes whose label combinations define the chunks
    pub group_by: BTreeSet<Axis>,
    /// Post-processing of chunk results
    pub clip_method: ClipMethod,
    /// Worker pool settings
    pub engine: EngineConfig,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            group_by: default_group_by(),
            clip_method: ClipMethod::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl ApplyOptions {
    /// Replace the grouping axes
    pub fn group_by(mut self, axes: impl IntoIterator<Item = Axis>) -> Self {
        self.group_by = axes.into_iter().collect();
        self
    }

    /// Replace the clip method
    pub fn clip_method(mut self, clip_method: ClipMethod) -> Self {
        self.clip_method = clip_method;
        self
    }

    /// Replace the engine config
    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}
