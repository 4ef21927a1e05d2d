//! filters command - list registered filters

use anyhow::Result;
use tessera_filter::FilterRegistry;

/// Execute the filters command
pub fn execute() -> Result<()> {
    let registry = FilterRegistry::builtin();
    println!("Available filters");
    println!("{}", "=".repeat(30));
    for name in registry.names() {
        println!("  {}", name);
    }
    Ok(())
}
