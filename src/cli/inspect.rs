// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::process;

use crate::checkpoint::Checkpoint;
use crate::cli::args::InspectArgs;
use crate::{error, info};

/// Run the inspect command: print every tensor stored in a checkpoint.
pub fn run_inspect(args: &InspectArgs) {
    let checkpoint = match Checkpoint::read(&args.model) {
        Ok(checkpoint) => checkpoint,
        Err(e) => {
            error!("failed to read checkpoint: {e}");
            process::exit(1);
        }
    };

    info!("checkpoint {} ({} tensors)", args.model, checkpoint.len());
    for (key, value) in checkpoint.metadata() {
        info!("  metadata {key} = {value}");
    }

    let name_width = checkpoint
        .entries()
        .keys()
        .map(String::len)
        .max()
        .unwrap_or(0);

    let mut total = 0usize;
    for (name, entry) in checkpoint.entries() {
        let elements = entry.data.len();
        total += elements;
        info!(
            "  {name:<name_width$}  {}  {:?}",
            entry.dtype,
            entry.data.shape()
        );
    }
    info!("{total} parameters total");
}
