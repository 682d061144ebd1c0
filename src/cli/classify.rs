// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::fs;
use std::process;
use std::time::Instant;

use ndarray::Array2;
use serde::Deserialize;

use crate::cli::args::ClassifyArgs;
use crate::model::{ActionModel, PersonPose};
use crate::{error, info, verbose, warn};

/// One person entry in a keypoint file.
#[derive(Debug, Deserialize)]
struct PersonRecord {
    /// 17 keypoints as `[x, y, confidence]` triples.
    keypoints: Vec<[f32; 3]>,
    /// Optional bounding box as `[x1, y1, x2, y2]`.
    #[serde(default)]
    bounds: Option<[f32; 4]>,
}

/// A keypoint file: either a bare list of persons or an object wrapping
/// one, as emitted by the upstream pose exporter.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum KeypointFile {
    Persons(Vec<PersonRecord>),
    Wrapped { persons: Vec<PersonRecord> },
}

impl KeypointFile {
    fn into_persons(self) -> Vec<PersonRecord> {
        match self {
            Self::Persons(persons) | Self::Wrapped { persons } => persons,
        }
    }
}

fn read_poses(path: &str) -> crate::error::Result<Vec<PersonPose>> {
    let text = fs::read_to_string(path)?;
    let file: KeypointFile = serde_json::from_str(&text)
        .map_err(|e| crate::error::ActionError::ConfigError(format!("invalid keypoint file: {e}")))?;

    let mut poses = Vec::new();
    for record in file.into_persons() {
        let nodes = record.keypoints.len();
        let mut keypoints = Array2::<f32>::zeros((nodes, 3));
        for (node, triple) in record.keypoints.iter().enumerate() {
            for (channel, value) in triple.iter().enumerate() {
                keypoints[[node, channel]] = *value;
            }
        }
        let mut pose = PersonPose::new(keypoints);
        if let Some(bounds) = record.bounds {
            pose = pose.with_bounds(bounds);
        }
        poses.push(pose);
    }
    Ok(poses)
}

/// Run the classify command: keypoint file in, labels out.
pub fn run_classify(args: &ClassifyArgs) {
    crate::cli::logging::set_verbose(args.verbose);

    let model = match ActionModel::load(&args.model) {
        Ok(model) => model,
        Err(e) => {
            error!("failed to load model: {e}");
            process::exit(1);
        }
    };
    verbose!(
        "loaded {} ({} actions, {} nodes)",
        args.model,
        model.num_classes(),
        model.node_count()
    );

    let search = args.search.as_deref().filter(|label| {
        let known = model.vocabulary().index_of(label).is_some();
        if !known {
            warn!("'{label}' is not in the action vocabulary, searching nothing");
        }
        known
    });

    let poses = match read_poses(&args.keypoints) {
        Ok(poses) => poses,
        Err(e) => {
            error!("failed to read keypoints: {e}");
            process::exit(1);
        }
    };
    if poses.is_empty() {
        info!("no persons in {}", args.keypoints);
        return;
    }

    let start = Instant::now();
    let actions = match model.classify_frame(&poses) {
        Ok(actions) => actions,
        Err(e) => {
            error!("classification failed: {e}");
            process::exit(1);
        }
    };
    let elapsed_ms = start.elapsed().as_secs_f64() * 1e3;

    let mut matches = 0usize;
    for action in &actions {
        let matched = search == Some(action.label.as_str());
        matches += usize::from(matched);
        let marker = if matched { "  << MATCH FOUND" } else { "" };
        info!(
            "person {}: {} ({:.1}%){marker}",
            action.person + 1,
            action.label,
            action.confidence * 100.0
        );
        if args.top > 1 {
            for index in action.scores.top_k(args.top) {
                if let Some(label) = model.vocabulary().label(index) {
                    verbose!("    {label}: {:.3}", action.scores.data[index]);
                }
            }
        }
    }

    verbose!(
        "{} person{} classified in {elapsed_ms:.1}ms",
        actions.len(),
        if actions.len() == 1 { "" } else { "s" }
    );
    if let Some(label) = search {
        info!("search '{label}': {matches} match{}", if matches == 1 { "" } else { "es" });
    }
}
