// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! The streaming inference scheduler.
//!
//! A [`StreamScheduler`] owns one worker thread running the capture ->
//! pose -> classify -> annotate loop over the currently published video
//! source. The controlling thread only publishes configuration (source
//! selector, search query, start/stop/shutdown signals); the worker reads
//! each of them once per iteration and owns the opened device outright.
//!
//! Frames are paced, not queued: an iteration arriving inside the minimum
//! frame interval is skipped without reading the device, so the loop always
//! works on the freshest frame and never builds a backlog.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use image::RgbImage;
use image::imageops::{self, FilterType};
use rayon::prelude::*;

use crate::annotate::Annotator;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::model::{ActionModel, PersonPose};
use crate::results::{FrameReport, PersonAction, Speed};
use crate::source::{DefaultSourceOpener, FrameSource, Source, SourceOpener};
use crate::vocabulary::Vocabulary;
use crate::{verbose, warn};

/// Produces per-person keypoints and bounding boxes for a frame.
///
/// This is the seam to the upstream pose model; the engine never sees raw
/// pixels beyond handing them over here.
pub trait PoseEstimator: Send {
    /// Detect every person in the frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the detector itself failed. The scheduler treats
    /// this as frame-local: the frame is presented without annotations.
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<PersonPose>>;
}

/// Receives annotated frames. Fire-and-forget; the scheduler never waits on
/// the sink.
pub trait FrameSink: Send {
    /// Present one processed frame.
    fn present(&mut self, frame: AnnotatedFrame);
}

/// Time source for frame pacing.
///
/// The deployed clock is monotonic wall time; tests inject a manual clock
/// to step the pacing window deterministically.
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// Monotonic clock anchored at its creation.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock anchored at now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// The active search query, published to the worker as one unit.
///
/// Activity and target are a single field: a query is active exactly when a
/// target is set, so the worker can never observe an active flag paired
/// with a missing or stale label.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchQuery {
    target: Option<String>,
}

impl SearchQuery {
    /// An inactive query.
    #[must_use]
    pub const fn inactive() -> Self {
        Self { target: None }
    }

    /// Whether a search is active.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.target.is_some()
    }

    /// The searched-for label, if any.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Whether a predicted label matches this query.
    #[must_use]
    pub fn matches(&self, label: &str) -> bool {
        self.target.as_deref() == Some(label)
    }
}

/// One fully processed frame: the annotated image plus its report.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    /// The frame with labels drawn in.
    pub image: RgbImage,
    /// Per-person classification results and timings.
    pub report: FrameReport,
}

/// Configuration fields shared between the controller and the worker.
///
/// Every field is swapped whole under its own lock or atomic; the worker
/// samples them once per iteration, never mid-frame.
#[derive(Debug)]
struct Shared {
    query: Mutex<SearchQuery>,
    selector: Mutex<Option<Source>>,
    /// Bumped on every selector publish so the worker reopens the device.
    generation: AtomicU64,
    active: AtomicBool,
    shutdown: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            query: Mutex::new(SearchQuery::inactive()),
            selector: Mutex::new(None),
            generation: AtomicU64::new(0),
            active: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        }
    }

    fn query(&self) -> SearchQuery {
        self.query.lock().map(|q| q.clone()).unwrap_or_default()
    }

    fn publish_query(&self, query: SearchQuery) {
        if let Ok(mut slot) = self.query.lock() {
            *slot = query;
        }
    }

    fn publish_selector(&self, source: Source) {
        if let Ok(mut slot) = self.selector.lock() {
            *slot = Some(source);
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn selector(&self) -> (Option<Source>, u64) {
        let generation = self.generation.load(Ordering::SeqCst);
        let selector = self
            .selector
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        (selector, generation)
    }
}

/// What one worker iteration did. Drives the loop and the pacing tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    /// Shutdown flag observed; the loop must exit.
    Shutdown,
    /// No active stream; slept the idle interval.
    Idle,
    /// The published source could not be opened.
    OpenFailed,
    /// Inside the minimum frame interval; nothing was read.
    Paced,
    /// The device produced no frame.
    NoFrame,
    /// A frame was classified and presented, with this many persons.
    Presented(usize),
}

/// The worker side of the scheduler: owns the model, the estimator, the
/// sink and the opened device.
struct Worker {
    model: ActionModel,
    estimator: Box<dyn PoseEstimator>,
    sink: Box<dyn FrameSink>,
    opener: Box<dyn SourceOpener>,
    annotator: Annotator,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    shared: Arc<Shared>,
    stream: Option<Box<dyn FrameSource>>,
    stream_generation: u64,
    last_frame: Option<Duration>,
    frame_index: u64,
}

impl Worker {
    fn run(mut self, exited: &Sender<()>) {
        loop {
            if self.tick() == Tick::Shutdown {
                break;
            }
        }
        self.release();
        // Receiver side times the shutdown; the send result is irrelevant.
        let _ = exited.send(());
    }

    /// One loop iteration. Sleeps internally where the protocol backs off.
    fn tick(&mut self) -> Tick {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Tick::Shutdown;
        }

        if !self.shared.active.load(Ordering::SeqCst) {
            self.release();
            thread::sleep(self.config.idle_poll);
            return Tick::Idle;
        }

        if !self.ensure_open() {
            thread::sleep(self.config.read_retry);
            return Tick::OpenFailed;
        }

        let now = self.clock.now();
        if let Some(last) = self.last_frame
            && now.saturating_sub(last) < self.config.frame_interval
        {
            thread::sleep(self.config.pacing_poll);
            return Tick::Paced;
        }
        self.last_frame = Some(now);

        let capture_start = Instant::now();
        let frame = match self.stream.as_mut().map(|stream| stream.read()) {
            Some(Ok(Some(frame))) => frame,
            Some(Ok(None)) => {
                thread::sleep(self.config.read_retry);
                return Tick::NoFrame;
            }
            Some(Err(e)) => {
                warn!("frame read failed: {e}");
                thread::sleep(self.config.read_retry);
                return Tick::NoFrame;
            }
            None => return Tick::NoFrame,
        };
        let frame = self.resize(frame);
        let capture_ms = capture_start.elapsed().as_secs_f64() * 1e3;

        let inference_start = Instant::now();
        let poses = match self.estimator.detect(&frame) {
            Ok(poses) => poses,
            Err(e) => {
                warn!("pose estimation failed: {e}");
                Vec::new()
            }
        };
        let query = self.shared.query();
        let actions = self.classify(&poses, &query);
        let inference_ms = inference_start.elapsed().as_secs_f64() * 1e3;

        let annotate_start = Instant::now();
        let mut frame = frame;
        self.annotator.annotate(&mut frame, &actions);
        let annotate_ms = annotate_start.elapsed().as_secs_f64() * 1e3;

        let count = actions.len();
        let report = FrameReport::new(
            self.frame_index,
            actions,
            Speed::new(capture_ms, inference_ms, annotate_ms),
            query.target().map(str::to_string),
        );
        self.frame_index += 1;
        self.sink.present(AnnotatedFrame {
            image: frame,
            report,
        });
        Tick::Presented(count)
    }

    /// Open or reopen the published source if needed.
    ///
    /// Every selector publish bumps the generation, so switching sources
    /// (even to the same selector) swaps the device here, at an iteration
    /// boundary.
    fn ensure_open(&mut self) -> bool {
        let (selector, generation) = self.shared.selector();
        if self.stream.is_some() && self.stream_generation == generation {
            return true;
        }
        self.release();

        let Some(selector) = selector else {
            return false;
        };
        match self.opener.open(&selector) {
            Ok(stream) => {
                verbose!("opened {}", stream.describe());
                self.stream = Some(stream);
                self.stream_generation = generation;
                self.last_frame = None;
                true
            }
            Err(e) => {
                warn!("failed to open {selector}: {e}");
                false
            }
        }
    }

    /// Drop the device handle, if one is open.
    fn release(&mut self) {
        if self.stream.take().is_some() {
            verbose!("video source released");
        }
    }

    fn resize(&self, frame: RgbImage) -> RgbImage {
        let (width, height) = self.config.frame_size;
        if frame.dimensions() == (width, height) {
            frame
        } else {
            imageops::resize(&frame, width, height, FilterType::Triangle)
        }
    }

    /// Classify every detected person, scoring in parallel.
    ///
    /// A pose the model rejects is logged and skipped; the remaining
    /// persons in the frame still get their labels.
    fn classify(&self, poses: &[PersonPose], query: &SearchQuery) -> Vec<PersonAction> {
        let model = &self.model;
        let scored: Vec<_> = poses
            .par_iter()
            .map(|pose| model.classify_person(pose))
            .collect();

        let mut actions = Vec::with_capacity(scored.len());
        for (person, (pose, result)) in poses.iter().zip(scored).enumerate() {
            let scores = match result {
                Ok(scores) => scores,
                Err(e) => {
                    warn!("skipping person {}: {e}", person + 1);
                    continue;
                }
            };
            let class_index = scores.top1();
            let Some(label) = self.model.vocabulary().label(class_index) else {
                warn!("skipping person {}: score index {class_index} has no label", person + 1);
                continue;
            };
            let mut action =
                PersonAction::new(person, label.to_string(), class_index, scores, pose.bounds);
            action.matched = query.matches(&action.label);
            actions.push(action);
        }
        actions
    }
}

/// Handle to a running streaming-inference worker.
///
/// Spawning starts the worker thread idle; [`StreamScheduler::start_stream`]
/// publishes a source and activates the loop. All methods are safe to call
/// from any thread.
///
/// # Example
///
/// ```no_run
/// use action_inference::{ActionModel, EngineConfig, StreamScheduler};
/// # use action_inference::{AnnotatedFrame, FrameSink, PoseEstimator, Result, PersonPose};
/// # struct MyEstimator;
/// # impl PoseEstimator for MyEstimator {
/// #     fn detect(&mut self, _: &image::RgbImage) -> Result<Vec<PersonPose>> { Ok(vec![]) }
/// # }
/// # struct MySink;
/// # impl FrameSink for MySink {
/// #     fn present(&mut self, _: AnnotatedFrame) {}
/// # }
///
/// let model = ActionModel::load("st_gcn.safetensors").unwrap();
/// let mut scheduler = StreamScheduler::spawn(
///     model,
///     Box::new(MyEstimator),
///     Box::new(MySink),
///     EngineConfig::default(),
/// ).unwrap();
///
/// scheduler.start_stream("frames/");
/// assert!(scheduler.start_search("waving"));
/// // ... frames flow to the sink ...
/// scheduler.shutdown();
/// ```
pub struct StreamScheduler {
    shared: Arc<Shared>,
    vocabulary: Vocabulary,
    shutdown_grace: Duration,
    worker: Option<JoinHandle<()>>,
    exited: Receiver<()>,
}

impl StreamScheduler {
    /// Spawn a worker with the built-in source opener and wall clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn spawn(
        model: ActionModel,
        estimator: Box<dyn PoseEstimator>,
        sink: Box<dyn FrameSink>,
        config: EngineConfig,
    ) -> Result<Self> {
        Self::spawn_with(
            model,
            estimator,
            sink,
            config,
            Box::new(DefaultSourceOpener),
            Arc::new(MonotonicClock::new()),
        )
    }

    /// Spawn a worker with a custom source opener and clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn spawn_with(
        model: ActionModel,
        estimator: Box<dyn PoseEstimator>,
        sink: Box<dyn FrameSink>,
        config: EngineConfig,
        opener: Box<dyn SourceOpener>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Shared::new());
        let vocabulary = model.vocabulary().clone();
        let shutdown_grace = config.shutdown_grace;

        let worker = Worker {
            model,
            estimator,
            sink,
            opener,
            annotator: Annotator::new(),
            clock,
            config,
            shared: Arc::clone(&shared),
            stream: None,
            stream_generation: 0,
            last_frame: None,
            frame_index: 0,
        };

        let (tx, exited) = std::sync::mpsc::channel();
        let handle = thread::Builder::new()
            .name("action-stream".to_string())
            .spawn(move || worker.run(&tx))?;

        Ok(Self {
            shared,
            vocabulary,
            shutdown_grace,
            worker: Some(handle),
            exited,
        })
    }

    /// Publish a video source and activate the stream.
    ///
    /// The worker opens the device on its next iteration; a failing open is
    /// logged and retried rather than surfaced here.
    pub fn start_stream(&self, source: impl Into<Source>) {
        let source = source.into();
        verbose!("video source set to {source}");
        self.shared.publish_selector(source);
        self.shared.active.store(true, Ordering::SeqCst);
    }

    /// Deactivate the stream. The worker releases the device on its next
    /// iteration and idles until the next [`StreamScheduler::start_stream`].
    pub fn stop_stream(&self) {
        self.shared.active.store(false, Ordering::SeqCst);
    }

    /// Whether a stream is currently active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Start searching for an action label.
    ///
    /// Returns false, leaving any existing query untouched, if the label is
    /// not in the model's vocabulary.
    #[must_use]
    pub fn start_search(&self, label: &str) -> bool {
        if self.vocabulary.index_of(label).is_none() {
            warn!("unknown action label: {label}");
            return false;
        }
        verbose!("searching for action: {label}");
        self.shared.publish_query(SearchQuery {
            target: Some(label.to_string()),
        });
        true
    }

    /// Clear the search query unconditionally.
    pub fn stop_search(&self) {
        self.shared.publish_query(SearchQuery::inactive());
    }

    /// The query the worker currently sees.
    #[must_use]
    pub fn query(&self) -> SearchQuery {
        self.shared.query()
    }

    /// Signal shutdown and wait for the worker, up to the configured grace
    /// period. A worker stuck past the grace period is detached, not
    /// killed; teardown proceeds regardless.
    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let Some(handle) = self.worker.take() else {
            return;
        };
        match self.exited.recv_timeout(self.shutdown_grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "worker did not stop within {:?}, detaching",
                    self.shutdown_grace
                );
            }
        }
    }
}

impl Drop for StreamScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
