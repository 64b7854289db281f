// CLI command handlers
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use bcopt_core::analysis::ClassInitCounter;
use bcopt_core::config::AnalysisConfig;

use crate::loader;

pub fn analyze_program(
    program_path: &Path,
    config_path: &Path,
    method_filter: Option<&str>,
    threads: Option<usize>,
    show_table: bool,
) -> Result<()> {
    println!("Reading program description: {}", program_path.display());
    let program_json = fs::read_to_string(program_path)
        .with_context(|| format!("Failed to read program file: {}", program_path.display()))?;
    let program = loader::load_program(&program_json)
        .with_context(|| format!("Failed to load program: {}", program_path.display()))?;

    let config_json = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
    let mut config: AnalysisConfig =
        serde_json::from_str(&config_json).context("Failed to parse analysis config")?;

    // Command-line switches override the config file.
    if let Some(name) = method_filter {
        config.method_filter = Some(name.to_string());
    }
    if threads.is_some() {
        config.num_threads = threads;
    }

    let resolved = config
        .resolve(&program)
        .context("Failed to resolve analysis config against the program")?;

    println!("Running class-init analysis...");
    let counter = ClassInitCounter::run(&program, &resolved);

    let stats = counter.stats();
    println!("Analysis complete");
    println!("  Tracked classes: {}", stats.tracked_classes);
    println!("  Methods scheduled: {}", stats.methods_scheduled);
    println!("  Methods with inits: {}", stats.methods_with_inits);
    println!("  Construction sites recorded: {}", stats.total_inits);
    println!("  Merged values promoted: {}", stats.merged_values);

    if show_table {
        println!("\n{}", counter.debug_show_table(&program));
    }

    Ok(())
}
