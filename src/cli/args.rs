// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use clap::{Args, Parser, Subcommand};

/// Default checkpoint path used when `--model` is omitted.
pub const DEFAULT_MODEL: &str = "st_gcn.safetensors";

/// CLI arguments parser.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = r#"Classify Options:
    --model, -m <MODEL>         Path to ST-GCN checkpoint [default: st_gcn.safetensors]
    --keypoints, -k <FILE>      JSON file with per-person 17x3 keypoints
    --search <LABEL>            Flag persons performing this action
    --top <K>                   Show the K best labels per person [default: 1]
    --verbose <BOOL>            Show verbose output [default: true]

Examples:
    action-inference classify --keypoints frame.json
    action-inference classify -m st_gcn.safetensors -k frame.json --search kicking
    action-inference classify -k frame.json --top 3 --verbose false
    action-inference inspect --model st_gcn.safetensors"#)]
pub struct Cli {
    #[command(subcommand)]
    /// Subcommand to execute.
    pub command: Commands,
}

/// Commands for the CLI.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify per-person keypoints from a JSON file
    Classify(ClassifyArgs),
    /// Print the tensors stored in a checkpoint
    Inspect(InspectArgs),
}

/// Arguments for the classify command.
#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// Path to ST-GCN checkpoint file
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// JSON file holding one 17x3 keypoint array per person
    #[arg(short, long)]
    pub keypoints: String,

    /// Action label to search for; matching persons are flagged
    #[arg(long)]
    pub search: Option<String>,

    /// Number of top-scoring labels to show per person
    #[arg(long, default_value_t = 1)]
    pub top: usize,

    /// Show verbose output
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub verbose: bool,
}

/// Arguments for the inspect command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Path to ST-GCN checkpoint file
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    pub model: String,
}
