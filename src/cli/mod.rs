// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Command-line interface for classifying poses and inspecting checkpoints.
//!
//! This module contains the command-line interface logic: argument parsing
//! plus the `classify` and `inspect` command implementations.

// Modules
/// CLI arguments.
pub mod args;

/// Pose classification command.
pub mod classify;

/// Checkpoint inspection command.
pub mod inspect;

/// Logging verbosity control.
pub mod logging;
