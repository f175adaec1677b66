//! Configuration for lumen-eye

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Quantized MobileNet v1 (224x224) classifier, exported to ONNX
pub const DEFAULT_MODEL: &str = "mobilenet_v1_1.0_224_quantized_1_metadata_1.onnx";

const MAX_RESULTS_LIMIT: usize = 1000;
const MAX_MODEL_NAME_LEN: usize = 255;

/// Compute backend the engine should run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delegate {
    Cpu,
    Gpu,
    /// NNAPI on Android, CoreML on Apple targets
    Accelerator,
}

impl std::str::FromStr for Delegate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Delegate::Cpu),
            "gpu" => Ok(Delegate::Gpu),
            "accelerator" | "npu" | "nnapi" => Ok(Delegate::Accelerator),
            other => Err(format!("Unknown delegate '{}' (expected cpu, gpu or accelerator)", other)),
        }
    }
}

/// How frames reach the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunningMode {
    /// One blocking classify call per still image
    Image,
    /// Continuous camera frames, results delivered asynchronously
    LiveStream,
}

/// Options an engine handle is built from.
///
/// A live engine never observes a change to these; the session tears the
/// engine down and builds a new one instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierOptions {
    /// Minimum score a label needs to be reported
    pub score_threshold: f32,
    /// Maximum number of labels reported per frame
    pub max_results: usize,
    pub delegate: Delegate,
    pub running_mode: RunningMode,
    /// Model file name, resolved against the model directory
    pub model: String,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            score_threshold: 0.1,
            max_results: 3,
            delegate: Delegate::Gpu,
            running_mode: RunningMode::Image,
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl ClassifierOptions {
    pub fn with_running_mode(mut self, running_mode: RunningMode) -> Self {
        self.running_mode = running_mode;
        self
    }

    /// Validate options
    pub fn validate(&self) -> Result<(), String> {
        if !self.score_threshold.is_finite()
            || self.score_threshold < 0.0
            || self.score_threshold > 1.0
        {
            return Err(format!(
                "Score threshold must be within [0, 1], got {}",
                self.score_threshold
            ));
        }

        if self.max_results == 0 {
            return Err("Max results must be positive".to_string());
        }

        if self.max_results > MAX_RESULTS_LIMIT {
            return Err(format!("Max results too large (max {})", MAX_RESULTS_LIMIT));
        }

        validate_model_name(&self.model)
    }
}

/// Reject model names that could escape the model directory
pub fn validate_model_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > MAX_MODEL_NAME_LEN {
        return Err("Invalid model name".to_string());
    }

    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err("Model name contains invalid characters".to_string());
    }

    Ok(())
}

/// Tensor layout and normalisation for the ONNX engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Model input size (width, height)
    pub input_size: (u32, u32),
    /// Per-channel mean subtracted after scaling to [0, 1]
    pub mean: [f32; 3],
    /// Per-channel standard deviation
    pub std: [f32; 3],
    /// Apply softmax to the raw outputs (set for models that emit logits)
    pub apply_softmax: bool,
    /// Label file; defaults to the model path with a `.txt` extension
    pub labels_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_size: (224, 224),
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            apply_softmax: true,
            labels_path: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        let (w, h) = self.input_size;
        if w == 0 || h == 0 {
            return Err("Engine input size must be non-zero".to_string());
        }
        if w > 4096 || h > 4096 {
            return Err("Engine input size too large (max 4096)".to_string());
        }
        if self.std.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return Err("Engine std values must be finite and non-zero".to_string());
        }
        if self.mean.iter().any(|m| !m.is_finite()) {
            return Err("Engine mean values must be finite".to_string());
        }
        Ok(())
    }
}

/// Camera source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// USB camera device index (0, 1, 2, etc.)
    pub camera_id: u32,
    /// Target frame rate (frames per second)
    pub frame_rate: u32,
    /// Camera resolution (width, height)
    pub resolution: (u32, u32),
    /// Sensor mounting orientation in degrees
    pub sensor_orientation: i32,
    /// Current display rotation in degrees
    pub display_rotation: i32,
    pub front_facing: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            camera_id: 0,
            frame_rate: 30,
            resolution: (640, 480),
            sensor_orientation: 0,
            display_rotation: 0,
            front_facing: false,
        }
    }
}

impl CameraConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.frame_rate == 0 || self.frame_rate > 120 {
            return Err("Frame rate must be between 1 and 120".to_string());
        }

        if self.resolution.0 == 0 || self.resolution.1 == 0 {
            return Err("Resolution must be non-zero".to_string());
        }

        if self.resolution.0 > 7680 || self.resolution.1 > 4320 {
            return Err("Resolution too large (max 8K)".to_string());
        }

        if self.camera_id > 100 {
            return Err("Camera ID too large (max 100)".to_string());
        }

        if self.sensor_orientation % 90 != 0 || self.display_rotation % 90 != 0 {
            return Err("Orientation values must be multiples of 90 degrees".to_string());
        }

        Ok(())
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub classifier: ClassifierOptions,
    pub engine: EngineConfig,
    pub camera: CameraConfig,
    /// Directory holding model and label files
    pub model_path: PathBuf,
}

impl Default for VisionConfig {
    fn default() -> Self {
        let model_path = dirs::home_dir()
            .map(|mut p| {
                p.push(".lumen");
                p.push("models");
                p
            })
            .unwrap_or_else(|| PathBuf::from("./models"));

        Self {
            classifier: ClassifierOptions::default(),
            engine: EngineConfig::default(),
            camera: CameraConfig::default(),
            model_path,
        }
    }
}

impl VisionConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.classifier.validate()?;
        self.engine.validate()?;
        self.camera.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default() {
        let options = ClassifierOptions::default();
        assert_eq!(options.score_threshold, 0.1);
        assert_eq!(options.max_results, 3);
        assert_eq!(options.delegate, Delegate::Gpu);
        assert_eq!(options.running_mode, RunningMode::Image);
        assert_eq!(options.model, DEFAULT_MODEL);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_threshold_bounds() {
        let mut options = ClassifierOptions::default();
        options.score_threshold = 0.0;
        assert!(options.validate().is_ok());
        options.score_threshold = 1.0;
        assert!(options.validate().is_ok());

        options.score_threshold = -0.01;
        assert!(options.validate().is_err());
        options.score_threshold = 1.01;
        assert!(options.validate().is_err());
        options.score_threshold = f32::NAN;
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_options_max_results() {
        let mut options = ClassifierOptions::default();
        options.max_results = 0;
        assert!(options.validate().is_err());
        options.max_results = 1001;
        assert!(options.validate().is_err());
        options.max_results = 1000;
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_model_name_traversal() {
        assert!(validate_model_name("").is_err());
        assert!(validate_model_name("../evil.onnx").is_err());
        assert!(validate_model_name("dir/model.onnx").is_err());
        assert!(validate_model_name("dir\\model.onnx").is_err());
        assert!(validate_model_name(&"m".repeat(256)).is_err());
        assert!(validate_model_name("mobilenet.onnx").is_ok());
    }

    #[test]
    fn test_delegate_from_str() {
        assert_eq!("CPU".parse::<Delegate>().unwrap(), Delegate::Cpu);
        assert_eq!("gpu".parse::<Delegate>().unwrap(), Delegate::Gpu);
        assert_eq!("nnapi".parse::<Delegate>().unwrap(), Delegate::Accelerator);
        assert!("tpu9000".parse::<Delegate>().is_err());
    }

    #[test]
    fn test_camera_config_validation() {
        let mut config = CameraConfig::default();
        assert!(config.validate().is_ok());

        config.frame_rate = 0;
        assert!(config.validate().is_err());
        config.frame_rate = 120;
        assert!(config.validate().is_ok());

        config.resolution = (7681, 4320);
        assert!(config.validate().is_err());
        config.resolution = (640, 480);

        config.sensor_orientation = 45;
        assert!(config.validate().is_err());
        config.sensor_orientation = 270;
        assert!(config.validate().is_ok());

        config.camera_id = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_config_validation() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());
        config.input_size = (0, 224);
        assert!(config.validate().is_err());
        config.input_size = (224, 224);
        config.std = [0.0, 1.0, 1.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_running_mode_serde_names() {
        let json = serde_json::to_string(&RunningMode::LiveStream).unwrap();
        assert_eq!(json, "\"live_stream\"");
        let mode: RunningMode = serde_json::from_str("\"image\"").unwrap();
        assert_eq!(mode, RunningMode::Image);
    }
}
