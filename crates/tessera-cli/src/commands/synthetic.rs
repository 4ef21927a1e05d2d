//! synthetic command - write an all-ones stack

use std::path::Path;

use anyhow::{Context, Result};
use tessera_stack::ImageStack;

use super::write_stack;

/// Execute the synthetic command
///
/// `counts` holds the number of rounds, channels and z-planes.
pub fn execute(output: &Path, counts: [usize; 3], tile_shape: (usize, usize)) -> Result<()> {
    let [rounds, chs, zplanes] = counts;
    let (height, width) = tile_shape;
    let stack = ImageStack::synthetic_stack(rounds, chs, zplanes, height, width)
        .context("Failed to build synthetic stack")?;
    write_stack(&stack, output)?;
    println!("Wrote {} to {}", stack, output.display());
    Ok(())
}
