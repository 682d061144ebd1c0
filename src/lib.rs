// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

#![allow(clippy::multiple_crate_versions)]

//! # Action Inference Library
//!
//! Real-time skeletal action recognition in Rust: a spatial-temporal graph
//! convolutional network (ST-GCN) over COCO-17 pose keypoints, plus a
//! streaming scheduler that classifies every person in a live video feed
//! under soft-real-time pacing.
//!
//! ## Features
//!
//! - **Pure Rust inference** - The full ST-GCN forward pass in `ndarray`,
//!   no runtime framework
//! - **3-partition skeleton graph** - Spatial-configuration partitioning
//!   with learned per-block edge importance
//! - **`SafeTensors` checkpoints** - F32/F16 weights with the `backbone.`
//!   training-prefix remap applied on load
//! - **Streaming scheduler** - One worker per stream with frame pacing,
//!   drop-if-too-soon backpressure and cooperative shutdown
//! - **Action search** - Flag persons performing a target action while the
//!   stream runs
//! - **Pluggable seams** - Bring your own pose estimator, frame source and
//!   frame sink through small traits
//!
//! ## Installation
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! action-inference = "0.1"
//! ```
//!
//! ## Quick Start (Library)
//!
//! ```no_run
//! use action_inference::{ActionModel, PersonPose};
//! use ndarray::Array2;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load checkpoint - weights and the 12-action vocabulary
//!     let model = ActionModel::load("st_gcn.safetensors")?;
//!
//!     // One person's 17 keypoints as (x, y, confidence) rows
//!     let pose = PersonPose::new(Array2::zeros((17, 3)));
//!     let scores = model.classify_person(&pose)?;
//!
//!     let best = scores.top1();
//!     println!(
//!         "{} ({:.1}%)",
//!         model.vocabulary().label(best).unwrap_or("?"),
//!         scores.confidence() * 100.0
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming
//!
//! [`StreamScheduler`] runs the capture -> pose -> classify -> annotate
//! loop on its own worker thread. The controlling thread publishes the
//! source and the search query; the worker samples both once per
//! iteration:
//!
//! ```no_run
//! # use action_inference::*;
//! # fn estimator() -> Box<dyn PoseEstimator> { unimplemented!() }
//! # fn sink() -> Box<dyn FrameSink> { unimplemented!() }
//! let model = ActionModel::load("st_gcn.safetensors").unwrap();
//! let mut scheduler =
//!     StreamScheduler::spawn(model, estimator(), sink(), EngineConfig::default()).unwrap();
//!
//! scheduler.start_stream("rtsp://camera.local/stream");
//! assert!(scheduler.start_search("waving"));
//! // matching persons now arrive at the sink with a red MATCH FOUND label
//! scheduler.stop_search();
//! scheduler.shutdown();
//! ```
//!
//! ## CLI Usage
//!
//! The `action-inference` CLI classifies exported keypoints and inspects
//! checkpoints:
//!
//! ```bash
//! # Install the CLI
//! cargo install action-inference
//!
//! # Classify a frame's keypoints
//! action-inference classify --model st_gcn.safetensors --keypoints frame.json
//!
//! # Flag persons performing an action
//! action-inference classify -k frame.json --search kicking
//!
//! # Show the 3 best labels per person
//! action-inference classify -k frame.json --top 3
//!
//! # List the tensors in a checkpoint
//! action-inference inspect --model st_gcn.safetensors
//!
//! # Show help
//! action-inference help
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`model`] | Core [`ActionModel`] for loading checkpoints and classifying poses |
//! | [`scheduler`] | [`StreamScheduler`] worker loop, pacing and search state |
//! | [`network`] | [`StGcnNetwork`] block stack, pooling and head |
//! | [`blocks`] | Graph-convolution + temporal-convolution + residual blocks |
//! | [`graph`] | [`SkeletonGraph`] 3-partition adjacency construction |
//! | [`checkpoint`] | `SafeTensors` reading/writing and name remapping |
//! | [`vocabulary`] | Ordered action-label list ([`Vocabulary`]) |
//! | [`results`] | Output types ([`FrameReport`], [`PersonAction`], [`ActionScores`]) |
//! | [`annotate`] | Drawing labels and match markers onto frames |
//! | [`source`] | Input source handling ([`Source`], [`FrameSource`]) |
//! | [`config`] | [`EngineConfig`] pacing and sizing knobs |
//! | [`error`] | Error types ([`ActionError`], [`Result`]) |
//!
//! ## License
//!
//! This project is licensed under [AGPL-3.0](https://www.gnu.org/licenses/agpl-3.0.html).

// Modules
pub mod annotate;
pub mod blocks;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod model;
pub mod network;
pub mod ops;
pub mod results;
pub mod scheduler;
pub mod source;
pub mod vocabulary;

// Re-export main types for convenience
pub use config::EngineConfig;
pub use error::{ActionError, Result};
pub use graph::SkeletonGraph;
pub use model::{ActionModel, PersonPose};
pub use network::StGcnNetwork;
pub use results::{ActionScores, FrameReport, PersonAction, Speed};
pub use scheduler::{
    AnnotatedFrame, Clock, FrameSink, MonotonicClock, PoseEstimator, SearchQuery, StreamScheduler,
};
pub use source::{FrameSource, Source, SourceOpener};
pub use vocabulary::Vocabulary;

// Re-export checkpoint utilities for advanced use
pub use checkpoint::{Checkpoint, CheckpointWriter};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
