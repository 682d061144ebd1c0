// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Engine configuration for the streaming recognition loop.

use std::time::Duration;

use crate::error::{ActionError, Result};

/// Default spacing between processed frames.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(200);

/// Default sleep while waiting out the frame interval.
pub const DEFAULT_PACING_POLL: Duration = Duration::from_millis(10);

/// Default sleep while the engine is idle with no active stream.
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(100);

/// Default back-off after a failed frame read.
pub const DEFAULT_READ_RETRY: Duration = Duration::from_millis(100);

/// Default grace period when joining the worker on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Default working frame size (width, height) frames are resized to.
pub const DEFAULT_FRAME_SIZE: (u32, u32) = (640, 480);

/// Tunable parameters of the streaming engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Minimum wall-clock spacing between processed frames.
    pub frame_interval: Duration,
    /// Sleep between pacing checks while a stream is active.
    pub pacing_poll: Duration,
    /// Sleep between checks while no stream is active.
    pub idle_poll: Duration,
    /// Back-off after a frame read fails before trying again.
    pub read_retry: Duration,
    /// How long shutdown waits for the worker before detaching it.
    pub shutdown_grace: Duration,
    /// Working frame size (width, height); incoming frames are resized.
    pub frame_size: (u32, u32),
}

impl EngineConfig {
    /// Create a configuration with the deployed defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL,
            pacing_poll: DEFAULT_PACING_POLL,
            idle_poll: DEFAULT_IDLE_POLL,
            read_retry: DEFAULT_READ_RETRY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            frame_size: DEFAULT_FRAME_SIZE,
        }
    }

    /// Set the spacing between processed frames.
    #[must_use]
    pub const fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Set the pacing poll sleep.
    #[must_use]
    pub const fn with_pacing_poll(mut self, poll: Duration) -> Self {
        self.pacing_poll = poll;
        self
    }

    /// Set the idle poll sleep.
    #[must_use]
    pub const fn with_idle_poll(mut self, poll: Duration) -> Self {
        self.idle_poll = poll;
        self
    }

    /// Set the back-off after failed reads.
    #[must_use]
    pub const fn with_read_retry(mut self, retry: Duration) -> Self {
        self.read_retry = retry;
        self
    }

    /// Set the shutdown grace period.
    #[must_use]
    pub const fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the working frame size (width, height).
    #[must_use]
    pub const fn with_frame_size(mut self, width: u32, height: u32) -> Self {
        self.frame_size = (width, height);
        self
    }

    /// Check the configuration for unusable values.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame interval is zero or the frame size has
    /// an empty dimension.
    pub fn validate(&self) -> Result<()> {
        if self.frame_interval.is_zero() {
            return Err(ActionError::ConfigError(
                "frame interval must be positive".to_string(),
            ));
        }
        if self.frame_size.0 == 0 || self.frame_size.1 == 0 {
            return Err(ActionError::ConfigError(format!(
                "frame size {}x{} has an empty dimension",
                self.frame_size.0, self.frame_size.1
            )));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.frame_interval, Duration::from_millis(200));
        assert_eq!(config.idle_poll, Duration::from_millis(100));
        assert_eq!(config.frame_size, (640, 480));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = EngineConfig::new()
            .with_frame_interval(Duration::from_millis(50))
            .with_pacing_poll(Duration::from_millis(1))
            .with_frame_size(320, 240);
        assert_eq!(config.frame_interval, Duration::from_millis(50));
        assert_eq!(config.pacing_poll, Duration::from_millis(1));
        assert_eq!(config.frame_size, (320, 240));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_interval = EngineConfig::new().with_frame_interval(Duration::ZERO);
        assert!(zero_interval.validate().is_err());

        let empty_frame = EngineConfig::new().with_frame_size(0, 480);
        assert!(empty_frame.validate().is_err());
    }
}
