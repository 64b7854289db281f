// CLI application
use bcopt_cli::commands::analyze_program;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bcopt")]
#[command(about = "Stack-bytecode optimizer: class-init tracking analysis")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the class-init analysis over a program description
    Analyze {
        /// Path to the JSON program description
        #[arg(short, long)]
        program: PathBuf,

        /// Path to the JSON analysis configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Restrict the analysis to methods with this name
        #[arg(long)]
        method: Option<String>,

        /// Worker threads (default: available parallelism)
        #[arg(long)]
        threads: Option<usize>,

        /// Print the full index table
        #[arg(long)]
        table: bool,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            program,
            config,
            method,
            threads,
            table,
        } => {
            let pb = create_progress_bar("Analyzing program...");
            analyze_program(&program, &config, method.as_deref(), threads, table)?;
            pb.finish_with_message("Analysis complete");
        }
    }

    Ok(())
}

fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(message.to_string());
    pb
}
