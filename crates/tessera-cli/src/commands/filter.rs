//! filter command - run a registered filter over a tile set

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tessera_filter::FilterRegistry;

use super::{open_stack, write_stack, EngineArgs};

/// Execute the filter command
///
/// # Arguments
/// * `name` - Registered filter name
/// * `params` - Filter parameters as a JSON object
///
/// # Errors
/// Returns an error if the filter is unknown, its parameters are invalid,
/// the input cannot be loaded or the filter fails on a chunk.
pub fn execute(
    name: &str,
    input: &Path,
    output: &Path,
    params: &str,
    engine: &EngineArgs,
    verbose: bool,
) -> Result<()> {
    let params: serde_json::Value =
        serde_json::from_str(params).context("Filter parameters must be valid JSON")?;
    let config = engine.load(verbose)?;

    let registry = FilterRegistry::builtin();
    let filter = registry
        .create(name, &params)
        .with_context(|| format!("Failed to create filter {name}"))?;

    let mut stack = open_stack(input)?;
    tracing::info!("Running {} on {}", name, stack);

    let start = Instant::now();
    filter
        .run_in_place(&mut stack, &config)
        .with_context(|| format!("Filter {name} failed"))?;
    let elapsed = start.elapsed();

    write_stack(&stack, output)?;
    println!(
        "{} finished in {:.2}ms, wrote {}",
        name,
        elapsed.as_secs_f64() * 1000.0,
        output.display()
    );
    Ok(())
}
