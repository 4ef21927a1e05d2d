//! tessera-filter: image filters over tessera stacks
//!
//! Filters implement [`FilterAlgorithm`] and run through the stack's
//! apply/transform engine. A [`FilterRegistry`] maps names to factories
//! that build a filter from JSON parameters.
//!
//! Built-in filters:
//! - `MatchHistograms`: quantile-normalize chunks to a shared intensity profile
//! - `ClipPercentile`: clip chunks to a percentile window and stretch it onto [0, 1]

#![warn(missing_docs)]

pub mod clip;
pub mod match_histograms;
pub mod registry;
mod util;

pub use clip::ClipPercentile;
pub use match_histograms::MatchHistograms;
pub use registry::{FilterFactory, FilterRegistry};

use tessera_stack::{EngineConfig, ImageStack, PipelineComponent, StackResult};

/// A filter that can be run on an image stack
pub trait FilterAlgorithm: PipelineComponent + Send + Sync {
    /// Filter the stack in place and record the run in its log
    fn run_in_place(&self, stack: &mut ImageStack, config: &EngineConfig) -> StackResult<()>;

    /// Filter a copy of the stack, leaving the input untouched
    fn run(&self, stack: &ImageStack, config: &EngineConfig) -> StackResult<ImageStack> {
        let mut copy = stack.try_clone()?;
        self.run_in_place(&mut copy, config)?;
        Ok(copy)
    }
}
