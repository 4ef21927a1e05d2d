//! info command - describe a tile set directory
//!
//! Prints the stack shape, the labels of each grouping axis, the physical
//! extent and the provenance log recorded with the tile set.

use std::path::Path;

use anyhow::Result;
use tessera_stack::Axis;

use super::open_stack;

/// Execute the info command
pub fn execute(input: &Path) -> Result<()> {
    let stack = open_stack(input)?;

    println!("Tile set: {}", input.display());
    println!("{}", "=".repeat(50));
    println!("  Shape:      {}", stack.shape());
    for axis in [Axis::Round, Axis::Ch, Axis::Zplane] {
        let labels = stack.axis_labels(axis).unwrap_or_default();
        println!("  {:<11} {:?}", format!("{axis} labels:"), labels);
    }

    let coordinates = stack.coordinates();
    let (x0, x1) = coordinates.x_range();
    let (y0, y1) = coordinates.y_range();
    println!("  X extent:   {:.4} .. {:.4}", x0, x1);
    println!("  Y extent:   {:.4} .. {:.4}", y0, y1);
    match coordinates.z() {
        Some(z) => println!("  Z values:   {:?}", z),
        None => println!("  Z values:   none"),
    }

    println!();
    if stack.log().is_empty() {
        println!("No processing recorded");
    } else {
        println!("Processing log");
        println!("{}", "-".repeat(50));
        for (i, entry) in stack.log().entries().iter().enumerate() {
            println!("  {}. {} {} (v{})", i + 1, entry.method, entry.arguments, entry.version);
        }
    }
    Ok(())
}
