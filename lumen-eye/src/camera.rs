//! OpenCV camera source producing raw frames for live-stream sessions

use crate::config::CameraConfig;
use crate::error::VisionError;
use crate::frame::{relative_rotation, LensFacing, PixelFormat, RawFrame, Rotation};
use opencv::{
    core::{Mat, CV_8UC3},
    prelude::*,
    videoio::{VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH},
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Frames buffered between capture and the consumer
const FRAME_BUFFER_SIZE: usize = 4;

/// Consecutive read failures before the capture loop gives up
const MAX_READ_FAILURES: u32 = 10;

/// USB camera wrapper
pub struct CameraSource {
    config: CameraConfig,
    capture: Arc<Mutex<Option<VideoCapture>>>,
    running: Arc<AtomicBool>,
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            capture: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Rotation that brings captured frames upright
    pub fn rotation(&self) -> Result<Rotation, VisionError> {
        let facing = if self.config.front_facing {
            LensFacing::Front
        } else {
            LensFacing::Back
        };
        relative_rotation(
            self.config.sensor_orientation,
            self.config.display_rotation,
            facing,
        )
    }

    /// Open the device. A no-op if it is already open.
    pub fn open(&self) -> Result<(), VisionError> {
        self.config.validate().map_err(VisionError::Config)?;

        let mut slot = self.capture.lock();
        if slot.is_some() {
            return Ok(());
        }

        let id = self.config.camera_id;
        let mut capture = VideoCapture::new(id as i32, CAP_ANY)
            .map_err(|e| VisionError::Camera(format!("Failed to open camera {}: {}", id, e)))?;

        if !capture
            .is_opened()
            .map_err(|e| VisionError::Camera(format!("Camera {} not opened: {}", id, e)))?
        {
            return Err(VisionError::Camera(format!("Camera {} failed to open", id)));
        }

        let (width, height) = self.config.resolution;
        capture
            .set(CAP_PROP_FRAME_WIDTH, width as f64)
            .map_err(|e| VisionError::Camera(format!("Failed to set width: {}", e)))?;
        capture
            .set(CAP_PROP_FRAME_HEIGHT, height as f64)
            .map_err(|e| VisionError::Camera(format!("Failed to set height: {}", e)))?;
        capture
            .set(CAP_PROP_FPS, self.config.frame_rate as f64)
            .map_err(|e| VisionError::Camera(format!("Failed to set FPS: {}", e)))?;

        *slot = Some(capture);
        info!(
            "Camera {} opened at {}x{} @ {}fps",
            id, width, height, self.config.frame_rate
        );
        Ok(())
    }

    /// Start capturing on the blocking pool.
    ///
    /// Frames arrive as packed BGR with strictly increasing timestamps. When
    /// the consumer falls behind, new frames are dropped rather than queued.
    pub fn start_stream(&self) -> Result<mpsc::Receiver<RawFrame>, VisionError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(VisionError::Camera("Camera stream already running".to_string()));
        }

        let setup = self.open().and_then(|()| self.rotation());
        let rotation = match setup {
            Ok(rotation) => rotation,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(FRAME_BUFFER_SIZE);
        let capture = self.capture.clone();
        let running = self.running.clone();
        let interval = Duration::from_secs_f64(1.0 / self.config.frame_rate.max(1) as f64);

        tokio::task::spawn_blocking(move || {
            let mut failures = 0u32;
            let mut last_timestamp = i64::MIN;

            while running.load(Ordering::SeqCst) {
                let started = Instant::now();

                match read_frame(&capture) {
                    Ok(Some(mut frame)) => {
                        failures = 0;
                        let now = chrono::Utc::now().timestamp_millis();
                        last_timestamp = now.max(last_timestamp.saturating_add(1));
                        frame.timestamp_ms = last_timestamp;
                        frame.rotation = rotation;

                        match tx.try_send(frame) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {}
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                warn!("Frame receiver dropped, stopping camera stream");
                                break;
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        failures += 1;
                        error!("Camera read error ({} in a row): {}", failures, e);
                        if failures > MAX_READ_FAILURES {
                            error!("Too many camera read errors, stopping stream");
                            break;
                        }
                        let backoff_ms = (100u64 << failures.min(5)).min(5000);
                        std::thread::sleep(Duration::from_millis(backoff_ms));
                        continue;
                    }
                }

                let elapsed = started.elapsed();
                if elapsed < interval {
                    std::thread::sleep(interval - elapsed);
                }
            }

            running.store(false, Ordering::SeqCst);
            info!("Camera stream stopped");
        });

        info!("Camera stream started");
        Ok(rx)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        *self.capture.lock() = None;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// `Ok(None)` when the device produced an empty frame
fn read_frame(capture: &Mutex<Option<VideoCapture>>) -> Result<Option<RawFrame>, VisionError> {
    let mut guard = capture.lock();
    let cap = guard
        .as_mut()
        .ok_or_else(|| VisionError::Camera("Camera not open".to_string()))?;

    let mut mat = Mat::default();
    if !cap.read(&mut mat)? || mat.empty() {
        return Ok(None);
    }
    drop(guard);

    mat_to_frame(&mat).map(Some)
}

fn mat_to_frame(mat: &Mat) -> Result<RawFrame, VisionError> {
    if mat.typ() != CV_8UC3 {
        return Err(VisionError::Camera(format!(
            "Unsupported camera frame type {}",
            mat.typ()
        )));
    }

    let data = if mat.is_continuous() {
        mat.data_bytes()?.to_vec()
    } else {
        mat.try_clone()?.data_bytes()?.to_vec()
    };

    Ok(RawFrame::packed(
        mat.cols() as u32,
        mat.rows() as u32,
        PixelFormat::Bgr888,
        data,
        0,
    ))
}
