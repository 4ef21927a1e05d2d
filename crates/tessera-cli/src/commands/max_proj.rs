//! max-proj command - maximum projection over grouping axes

use std::path::Path;

use anyhow::{Context, Result};
use tessera_stack::Axis;

use super::{open_stack, write_stack};

/// Execute the max-proj command
pub fn execute(input: &Path, output: &Path, axes: &[String]) -> Result<()> {
    let axes = axes
        .iter()
        .map(|name| name.parse::<Axis>())
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid projection axis")?;

    let stack = open_stack(input)?;
    let projected = stack
        .max_proj(&axes)
        .context("Maximum projection failed")?;

    write_stack(&projected, output)?;
    println!("Projected {} to {}", stack, projected);
    Ok(())
}
