//! Classifier session: owns the engine handle for both running modes
//!
//! Lifecycle is Uninitialized -> `configure` -> Ready -> `release` ->
//! Uninitialized. A classify call while uninitialized builds the engine
//! first. Every engine swap (release, rebuild, reconfigure) advances the
//! generation counter.
//!
//! The engine mutex is held across the whole of an engine call, including
//! result delivery, and every swap takes the same mutex. Two things follow:
//! a released engine is never used, and once `release` returns no result
//! computed by the old engine can still be sent to the sink. Results sent
//! before that may still be waiting in the channel; listeners can compare
//! `ClassificationResult::generation` against the session's generation.
//! Live-stream frames are tagged with the generation current at
//! submission and discarded by the worker if it has moved on.

use crate::config::{ClassifierOptions, RunningMode};
use crate::engine::{ClassificationEngine, EngineLoader};
use crate::error::VisionError;
use crate::frame::{adapt_frame, decode_photo, RawFrame};
use crate::results::{rank_categories, ClassificationResult};
use crate::sink::ResultSink;
use image::RgbImage;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Reported to the listener when an engine cannot be built
pub const INIT_FAILURE_MESSAGE: &str =
    "Image classifier failed to initialize. See error logs for details";

/// Reported to the listener when a single-shot call has no usable engine or fails
pub const CLASSIFY_FAILURE_MESSAGE: &str = "Image classifier failed to classify.";

struct EngineSlot {
    engine: Option<Box<dyn ClassificationEngine>>,
    /// Last build attempt failed; lazy builds stay off until an explicit
    /// configure, reconfigure or release.
    failed: bool,
}

impl EngineSlot {
    fn close(&mut self) -> bool {
        match self.engine.take() {
            Some(mut engine) => {
                engine.close();
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct Counters {
    frames_submitted: AtomicU64,
    frames_superseded: AtomicU64,
    frames_discarded: AtomicU64,
    results_delivered: AtomicU64,
    engine_setups: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of session activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Live-stream frames accepted by `classify_async`
    pub frames_submitted: u64,
    /// Frames replaced by a newer frame before the worker got to them
    pub frames_superseded: u64,
    /// Frames thrown away because their generation was released
    pub frames_discarded: u64,
    pub results_delivered: u64,
    /// Engine build attempts
    pub engine_setups: u64,
}

struct PendingFrame {
    image: RgbImage,
    timestamp_ms: i64,
    submitted_at: Instant,
    generation: u64,
}

/// Single-entry mailbox; a new frame replaces the one waiting
#[derive(Default)]
struct LatestFrame {
    slot: Mutex<Option<PendingFrame>>,
    notify: Notify,
}

impl LatestFrame {
    /// Returns true if an unprocessed frame was replaced
    fn put(&self, frame: PendingFrame) -> bool {
        let replaced = self.slot.lock().replace(frame).is_some();
        self.notify.notify_one();
        replaced
    }

    fn take(&self) -> Option<PendingFrame> {
        self.slot.lock().take()
    }
}

struct Shared {
    id: Uuid,
    loader: Arc<dyn EngineLoader>,
    engine: Mutex<EngineSlot>,
    /// Written only while `engine` is locked
    options: RwLock<ClassifierOptions>,
    /// Written only while `engine` is locked
    generation: AtomicU64,
    /// (generation, last accepted frame timestamp)
    last_timestamp: Mutex<(u64, Option<i64>)>,
    latest: LatestFrame,
    sink: ResultSink,
    counters: Counters,
}

impl Shared {
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn advance_generation(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if self.latest.take().is_some() {
            Counters::bump(&self.counters.frames_discarded);
        }
        generation
    }

    /// Close any live engine and build a new one from the current options
    fn setup_locked(&self, slot: &mut EngineSlot) -> Result<(), VisionError> {
        if slot.close() {
            let generation = self.advance_generation();
            debug!("Session {} closed engine, now at generation {}", self.id, generation);
        }

        let options = self.options.read().clone();
        if let Err(msg) = options.validate() {
            return Err(self.init_failed(slot, VisionError::Config(msg)));
        }

        Counters::bump(&self.counters.engine_setups);
        match self.loader.load(&options) {
            Ok(engine) => {
                slot.engine = Some(engine);
                slot.failed = false;
                info!(
                    "Image classifier ready: model {} on {:?}, {:?} mode, generation {}",
                    options.model,
                    options.delegate,
                    options.running_mode,
                    self.generation()
                );
                Ok(())
            }
            Err(e) => Err(self.init_failed(slot, e)),
        }
    }

    fn init_failed(&self, slot: &mut EngineSlot, err: VisionError) -> VisionError {
        slot.failed = true;
        error!("Image classifier failed to load model: {}", err);
        self.sink.error(INIT_FAILURE_MESSAGE);
        err
    }

    fn deliver(&self, result: ClassificationResult) {
        if self.sink.results(result) {
            Counters::bump(&self.counters.results_delivered);
        }
    }

    /// Runs on the blocking pool
    fn process_frame(&self, frame: PendingFrame) {
        let mut slot = self.engine.lock();

        if frame.generation != self.generation() {
            Counters::bump(&self.counters.frames_discarded);
            debug!(
                "Discarded frame {} from released generation {}",
                frame.timestamp_ms, frame.generation
            );
            return;
        }

        if slot.engine.is_none() {
            if slot.failed {
                Counters::bump(&self.counters.frames_discarded);
                debug!("No engine after failed setup, dropping frame {}", frame.timestamp_ms);
                return;
            }
            if self.setup_locked(&mut slot).is_err() {
                Counters::bump(&self.counters.frames_discarded);
                return;
            }
        }

        let options = self.options.read().clone();
        let Some(engine) = slot.engine.as_mut() else {
            return;
        };

        match engine.classify(&frame.image) {
            Ok(categories) => {
                let result = ClassificationResult {
                    categories: rank_categories(
                        categories,
                        options.score_threshold,
                        options.max_results,
                    ),
                    timestamp_ms: frame.timestamp_ms,
                    inference_time: frame.submitted_at.elapsed(),
                    generation: frame.generation,
                };
                self.deliver(result);
            }
            Err(e) => {
                warn!("Live stream classification failed: {}", e);
                self.sink.error(e.to_string());
            }
        }
    }
}

async fn run_worker(shared: Arc<Shared>) {
    loop {
        let Some(frame) = shared.latest.take() else {
            shared.latest.notify.notified().await;
            continue;
        };

        let job = shared.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || job.process_frame(frame)).await {
            error!("Live stream classification task failed: {}", e);
        }
    }
}

/// Owns one classification engine and feeds it images or camera frames
pub struct ClassifierSession {
    shared: Arc<Shared>,
    runtime: Option<Handle>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ClassifierSession {
    /// Create an uninitialized session. The engine is built on the first
    /// `configure` or classify call.
    ///
    /// Live-stream sessions need a tokio runtime, captured here if present
    /// or looked up on the first `classify_async`.
    pub fn new(
        options: ClassifierOptions,
        loader: Arc<dyn EngineLoader>,
        sink: ResultSink,
    ) -> Self {
        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            loader,
            engine: Mutex::new(EngineSlot {
                engine: None,
                failed: false,
            }),
            options: RwLock::new(options),
            generation: AtomicU64::new(0),
            last_timestamp: Mutex::new((0, None)),
            latest: LatestFrame::default(),
            sink,
            counters: Counters::default(),
        });

        Self {
            shared,
            runtime: Handle::try_current().ok(),
            worker: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn options(&self) -> ClassifierOptions {
        self.shared.options.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation()
    }

    /// True when no engine is live
    pub fn is_closed(&self) -> bool {
        self.shared.engine.lock().engine.is_none()
    }

    /// Build the engine, replacing a live one. Failure is reported to the
    /// listener as well as returned; the session stays usable.
    pub fn configure(&self) -> Result<(), VisionError> {
        let mut slot = self.shared.engine.lock();
        self.shared.setup_locked(&mut slot)
    }

    /// Swap in new options and rebuild. Invalid options leave the current
    /// engine untouched.
    pub fn reconfigure(&self, options: ClassifierOptions) -> Result<(), VisionError> {
        if let Err(msg) = options.validate() {
            warn!("Rejected classifier options: {}", msg);
            self.shared.sink.error(INIT_FAILURE_MESSAGE);
            return Err(VisionError::Config(msg));
        }

        let mut slot = self.shared.engine.lock();
        if slot.close() {
            self.shared.advance_generation();
        }
        *self.shared.options.write() = options;
        self.shared.setup_locked(&mut slot)
    }

    /// Close the engine. Pending live-stream frames are discarded and the
    /// next classify call builds a fresh engine.
    pub fn release(&self) {
        let mut slot = self.shared.engine.lock();
        let closed = slot.close();
        slot.failed = false;
        let generation = self.shared.advance_generation();
        if closed {
            info!("Image classifier released, generation now {}", generation);
        }
    }

    /// Classify one still image, blocking until the engine returns.
    ///
    /// Do not call this from a thread that must stay responsive.
    pub fn classify(&self, image: &RgbImage) -> Result<ClassificationResult, VisionError> {
        let shared = &self.shared;
        let timestamp_ms = chrono::Utc::now().timestamp_millis();

        let mut slot = shared.engine.lock();
        let options = shared.options.read().clone();
        if options.running_mode != RunningMode::Image {
            return Err(VisionError::Config(
                "classify requires image running mode, use classify_async for live streams"
                    .to_string(),
            ));
        }

        if slot.engine.is_none() && !slot.failed {
            shared.setup_locked(&mut slot)?;
        }

        let generation = shared.generation();
        let Some(engine) = slot.engine.as_mut() else {
            shared.sink.error(CLASSIFY_FAILURE_MESSAGE);
            return Err(VisionError::Classification(
                "No engine available; reconfigure the session".to_string(),
            ));
        };

        let started = Instant::now();
        let outcome = engine.classify(image);
        let inference_time = started.elapsed();

        match outcome {
            Ok(categories) => {
                let result = ClassificationResult {
                    categories: rank_categories(
                        categories,
                        options.score_threshold,
                        options.max_results,
                    ),
                    timestamp_ms,
                    inference_time,
                    generation,
                };
                debug!(
                    "Classified image in {:?}: {} label(s)",
                    inference_time,
                    result.categories.len()
                );
                shared.deliver(result.clone());
                Ok(result)
            }
            Err(e) => {
                error!("Image classification failed: {}", e);
                shared.sink.error(CLASSIFY_FAILURE_MESSAGE);
                Err(e)
            }
        }
    }

    /// Decode an encoded photo and classify it
    pub fn classify_photo(&self, bytes: &[u8]) -> Result<ClassificationResult, VisionError> {
        let image = decode_photo(bytes).map_err(|e| {
            self.shared.sink.error(e.to_string());
            e
        })?;
        self.classify(&image)
    }

    /// Queue a camera frame for live-stream classification and return
    /// immediately. Only the newest unprocessed frame is kept; results
    /// arrive through the sink tagged with the frame timestamp.
    ///
    /// Timestamps must strictly increase within a generation.
    pub fn classify_async(&self, frame: &RawFrame) -> Result<(), VisionError> {
        let shared = &self.shared;

        if shared.options.read().running_mode != RunningMode::LiveStream {
            return Err(VisionError::Config(
                "classify_async requires live stream running mode".to_string(),
            ));
        }

        let adapted = adapt_frame(frame).map_err(|e| {
            shared.sink.error(e.to_string());
            e
        })?;

        let generation = shared.generation();
        {
            let mut last = shared.last_timestamp.lock();
            if let (true, Some(previous)) = (last.0 == generation, last.1) {
                if adapted.timestamp_ms <= previous {
                    let err = VisionError::Frame(format!(
                        "Input timestamp must be monotonically increasing: {} after {}",
                        adapted.timestamp_ms, previous
                    ));
                    shared.sink.error(err.to_string());
                    return Err(err);
                }
            }
            *last = (generation, Some(adapted.timestamp_ms));
        }

        self.ensure_worker()?;

        Counters::bump(&shared.counters.frames_submitted);
        let replaced = shared.latest.put(PendingFrame {
            image: adapted.image,
            timestamp_ms: adapted.timestamp_ms,
            submitted_at: Instant::now(),
            generation,
        });
        if replaced {
            Counters::bump(&shared.counters.frames_superseded);
            debug!("Frame superseded before classification");
        }

        Ok(())
    }

    pub fn stats(&self) -> SessionStats {
        let c = &self.shared.counters;
        SessionStats {
            frames_submitted: c.frames_submitted.load(Ordering::Relaxed),
            frames_superseded: c.frames_superseded.load(Ordering::Relaxed),
            frames_discarded: c.frames_discarded.load(Ordering::Relaxed),
            results_delivered: c.results_delivered.load(Ordering::Relaxed),
            engine_setups: c.engine_setups.load(Ordering::Relaxed),
        }
    }

    /// Stop the live-stream worker and release the engine
    pub fn shutdown(&self) {
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
        self.release();
    }

    fn ensure_worker(&self) -> Result<(), VisionError> {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }

        let runtime = self
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
            .ok_or_else(|| {
                VisionError::Config(
                    "Live stream classification needs a tokio runtime".to_string(),
                )
            })?;

        *worker = Some(runtime.spawn(run_worker(self.shared.clone())));
        debug!("Session {} started live stream worker", self.shared.id);
        Ok(())
    }
}

impl Drop for ClassifierSession {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
        // Aborting the worker does not stop a frame already on the blocking
        // pool; advancing the generation makes it discard itself.
        self.release();
    }
}
