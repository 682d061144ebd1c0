// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Action model loading and classification.
//!
//! This module provides the main `ActionModel` struct for loading trained
//! checkpoints and classifying skeleton poses.

use std::path::{Path, PathBuf};

use ndarray::{Array2, Array5, Axis};
use rayon::prelude::*;

use crate::checkpoint::{Checkpoint, strip_parameter_prefix};
use crate::error::{ActionError, Result};
use crate::graph::SkeletonGraph;
use crate::network::{IN_CHANNELS, StGcnNetwork};
use crate::results::{ActionScores, PersonAction};
use crate::verbose;
use crate::vocabulary::Vocabulary;

/// Training-artifact prefix stripped from checkpoint parameter names.
const BACKBONE_PREFIX: &str = "backbone.";

/// One person's pose for a single frame.
#[derive(Debug, Clone)]
pub struct PersonPose {
    /// Keypoints as a `(nodes, 3)` array of x, y and confidence.
    pub keypoints: Array2<f32>,
    /// Person bounding box as `[x1, y1, x2, y2]`, if the detector provides
    /// one.
    pub bounds: Option<[f32; 4]>,
}

impl PersonPose {
    /// Create a pose without a bounding box.
    #[must_use]
    pub const fn new(keypoints: Array2<f32>) -> Self {
        Self {
            keypoints,
            bounds: None,
        }
    }

    /// Attach a bounding box.
    #[must_use]
    pub const fn with_bounds(mut self, bounds: [f32; 4]) -> Self {
        self.bounds = Some(bounds);
        self
    }
}

/// Action recognition model: the network plus its vocabulary.
///
/// # Example
///
/// ```no_run
/// use action_inference::{ActionModel, PersonPose};
/// use ndarray::Array2;
///
/// let model = ActionModel::load("st_gcn.safetensors").unwrap();
/// let pose = PersonPose::new(Array2::zeros((17, 3)));
/// let scores = model.classify_person(&pose).unwrap();
/// println!("best action: {}", scores.top1());
/// ```
pub struct ActionModel {
    network: StGcnNetwork,
    vocabulary: Vocabulary,
    path: PathBuf,
}

impl ActionModel {
    /// Load a checkpoint with the deployed 12-action vocabulary.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint is missing, malformed, or shaped
    /// for a different architecture.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with_vocabulary(path, Vocabulary::deployed())
    }

    /// Load a checkpoint against a custom vocabulary.
    ///
    /// The classification head must be exactly as wide as the vocabulary;
    /// a checkpoint trained for a different label count is rejected.
    /// Parameters the checkpoint does not cover keep their zero-initialized
    /// values, and checkpoint entries without a slot are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint is missing, malformed, or shaped
    /// for a different architecture.
    pub fn load_with_vocabulary<P: AsRef<Path>>(path: P, vocabulary: Vocabulary) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ActionError::CheckpointError(format!(
                "checkpoint not found: {}",
                path.display()
            )));
        }

        let checkpoint = Checkpoint::read(path)?;
        let params = strip_parameter_prefix(checkpoint.into_parameters(), BACKBONE_PREFIX);

        let graph = SkeletonGraph::coco17()?;
        let mut network = StGcnNetwork::new(graph, vocabulary.len())?;
        let report = network.load_state(params)?;
        verbose!(
            "loaded {} parameters from {}",
            report.loaded,
            path.display()
        );
        if !report.skipped.is_empty() {
            verbose!(
                "skipped {} checkpoint entries without a slot: {}",
                report.skipped.len(),
                report.skipped.join(", ")
            );
        }

        Ok(Self {
            network,
            vocabulary,
            path: path.to_path_buf(),
        })
    }

    /// Run one forward pass over an all-zero pose.
    ///
    /// Touches every scratch buffer once so the first live frame does not
    /// pay first-allocation costs, and doubles as a structural self-check.
    ///
    /// # Errors
    ///
    /// Returns an error if the network cannot process its own input shape.
    pub fn warmup(&self) -> Result<()> {
        let nodes = self.network.graph().node_count();
        let dummy = Array5::<f32>::zeros((1, IN_CHANNELS, 1, nodes, 1));
        self.network.forward(&dummy)?;
        Ok(())
    }

    /// Score a single pose against the vocabulary.
    ///
    /// # Errors
    ///
    /// Returns an error if the keypoint array does not match the skeleton.
    pub fn classify_person(&self, pose: &PersonPose) -> Result<ActionScores> {
        let input = self.pose_tensor(pose)?;
        let scores = self.network.forward(&input)?;
        Ok(ActionScores::new(scores.index_axis(Axis(0), 0).to_owned()))
    }

    /// Classify every person in a frame, preserving detection order.
    ///
    /// Persons are scored in parallel; each gets an independent forward
    /// pass so one person's pose never influences another's label.
    ///
    /// # Errors
    ///
    /// Returns an error if any pose does not match the skeleton.
    pub fn classify_frame(&self, poses: &[PersonPose]) -> Result<Vec<PersonAction>> {
        let scored = poses
            .par_iter()
            .map(|pose| self.classify_person(pose))
            .collect::<Result<Vec<_>>>()?;

        let mut actions = Vec::with_capacity(scored.len());
        for (person, (pose, scores)) in poses.iter().zip(scored).enumerate() {
            let class_index = scores.top1();
            let label = self
                .vocabulary
                .label(class_index)
                .ok_or_else(|| {
                    ActionError::ShapeError(format!(
                        "score index {class_index} outside vocabulary of {}",
                        self.vocabulary.len()
                    ))
                })?
                .to_string();
            actions.push(PersonAction::new(
                person,
                label,
                class_index,
                scores,
                pose.bounds,
            ));
        }
        Ok(actions)
    }

    /// Build the `(1, channels, 1, nodes, 1)` input tensor for one pose.
    fn pose_tensor(&self, pose: &PersonPose) -> Result<Array5<f32>> {
        let nodes = self.network.graph().node_count();
        if pose.keypoints.dim() != (nodes, IN_CHANNELS) {
            return Err(ActionError::ShapeError(format!(
                "pose keypoints have shape {:?}, expected ({nodes}, {IN_CHANNELS})",
                pose.keypoints.dim()
            )));
        }
        let mut input = Array5::<f32>::zeros((1, IN_CHANNELS, 1, nodes, 1));
        for node in 0..nodes {
            for channel in 0..IN_CHANNELS {
                input[[0, channel, 0, node, 0]] = pose.keypoints[[node, channel]];
            }
        }
        Ok(input)
    }

    /// The vocabulary this model scores against.
    #[must_use]
    pub const fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Number of output classes.
    #[must_use]
    pub const fn num_classes(&self) -> usize {
        self.network.num_classes()
    }

    /// Number of skeleton nodes the model expects per pose.
    #[must_use]
    pub const fn node_count(&self) -> usize {
        self.network.graph().node_count()
    }

    /// Path of the loaded checkpoint.
    #[must_use]
    pub fn checkpoint_path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for ActionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionModel")
            .field("num_classes", &self.num_classes())
            .field("nodes", &self.node_count())
            .field("checkpoint", &self.path)
            .finish()
    }
}
