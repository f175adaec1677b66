//! lumen-eye: image classification sessions
//!
//! Feeds camera frames and still photos into a classification engine and
//! reports the top-scoring labels. The engine sits behind
//! [`ClassificationEngine`]; this crate handles the session lifecycle,
//! frame conversion, result ranking and event delivery.
//!
//! Features:
//! - `onnx`: ONNX Runtime engine ([`engine::onnx`])
//! - `camera`: OpenCV camera source ([`camera`])

pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod frame;
pub mod models;
pub mod results;
pub mod session;
pub mod sink;

#[cfg(feature = "camera")]
pub mod camera;

pub use config::{ClassifierOptions, Delegate, RunningMode, VisionConfig};
pub use display::format_categories;
pub use engine::{Category, ClassificationEngine, EngineLoader};
pub use error::VisionError;
pub use frame::{adapt_frame, decode_photo, PixelFormat, Plane, RawFrame, Rotation};
pub use results::ClassificationResult;
pub use session::{ClassifierSession, SessionStats};
pub use sink::{spawn_listener, ClassifierEvent, ClassifierListener, ResultSink};

#[cfg(feature = "camera")]
pub use camera::CameraSource;
