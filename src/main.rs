// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use clap::Parser;

use action_inference::cli::args::{Cli, Commands};
use action_inference::cli::{classify, inspect};

fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Classify(args) => classify::run_classify(args),
        Commands::Inspect(args) => inspect::run_inspect(args),
    }
}
