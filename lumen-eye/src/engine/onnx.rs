//! ONNX Runtime backed classifier

use super::{label_for, softmax, Category, ClassificationEngine, EngineLoader};
use crate::config::{ClassifierOptions, Delegate, EngineConfig};
use crate::error::VisionError;
use crate::models::{load_labels, ModelStore};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
    ExecutionProviderDispatch, NNAPIExecutionProvider,
};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use tracing::{debug, info, warn};

fn execution_providers(delegate: Delegate) -> Vec<ExecutionProviderDispatch> {
    // CPU is always registered last so unavailable accelerators fall back to it
    let mut providers = match delegate {
        Delegate::Cpu => Vec::new(),
        Delegate::Gpu => vec![CUDAExecutionProvider::default().build()],
        Delegate::Accelerator => vec![
            NNAPIExecutionProvider::default().build(),
            CoreMLExecutionProvider::default().build(),
        ],
    };
    providers.push(CPUExecutionProvider::default().build());
    providers
}

/// Image classifier over an ONNX model with a single NCHW float input
pub struct OnnxEngine {
    session: Option<Session>,
    input_name: String,
    labels: Vec<String>,
    config: EngineConfig,
}

impl OnnxEngine {
    /// Load a model file
    pub fn new(
        model_path: &Path,
        labels: Vec<String>,
        delegate: Delegate,
        config: EngineConfig,
    ) -> Result<Self, VisionError> {
        config.validate().map_err(VisionError::Config)?;

        let session = Session::builder()?
            .with_execution_providers(execution_providers(delegate))?
            .commit_from_file(model_path)
            .map_err(|e| VisionError::Ort(format!("Failed to load classifier model: {}", e)))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| VisionError::Model("Classifier model declares no inputs".to_string()))?;

        info!(
            "Classifier model loaded from {:?} ({} labels, {:?} delegate)",
            model_path,
            labels.len(),
            delegate
        );

        Ok(Self {
            session: Some(session),
            input_name,
            labels,
            config,
        })
    }

    fn preprocess(&self, image: &RgbImage) -> Result<Tensor<f32>, VisionError> {
        let (w, h) = self.config.input_size;
        let resized = imageops::resize(image, w, h, FilterType::Triangle);

        let plane = w as usize * h as usize;
        let mut data = vec![0.0f32; plane * 3];
        for (x, y, px) in resized.enumerate_pixels() {
            let offset = y as usize * w as usize + x as usize;
            for c in 0..3 {
                let value = px.0[c] as f32 / 255.0;
                data[c * plane + offset] = (value - self.config.mean[c]) / self.config.std[c];
            }
        }

        Tensor::from_array(([1usize, 3, h as usize, w as usize], data))
            .map_err(|e| VisionError::Ort(format!("Failed to create input tensor: {}", e)))
    }
}

impl ClassificationEngine for OnnxEngine {
    fn classify(&mut self, image: &RgbImage) -> Result<Vec<Category>, VisionError> {
        let input = self.preprocess(image)?;

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| VisionError::Classification("Engine already closed".to_string()))?;

        let scores = {
            let outputs = session
                .run(ort::inputs![self.input_name.as_str() => input])
                .map_err(|e| VisionError::Ort(format!("Classifier inference failed: {}", e)))?;

            if outputs.is_empty() {
                return Err(VisionError::Ort("No outputs from classifier model".to_string()));
            }

            let (_, raw) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| VisionError::Ort(format!("Failed to extract output tensor: {}", e)))?;
            raw.to_vec()
        };

        if !self.labels.is_empty() && scores.len() != self.labels.len() {
            warn!(
                "Model produced {} scores for {} labels",
                scores.len(),
                self.labels.len()
            );
        }

        let scores = if self.config.apply_softmax {
            softmax(&scores)
        } else {
            scores
        };

        Ok(scores
            .into_iter()
            .enumerate()
            .map(|(i, score)| Category::new(i, label_for(&self.labels, i), score))
            .collect())
    }

    fn close(&mut self) {
        if self.session.take().is_some() {
            debug!("ONNX classifier session closed");
        }
    }
}

/// Loads [`OnnxEngine`]s from a model store
pub struct OnnxLoader {
    store: ModelStore,
    config: EngineConfig,
}

impl OnnxLoader {
    pub fn new(store: ModelStore, config: EngineConfig) -> Self {
        Self { store, config }
    }
}

impl EngineLoader for OnnxLoader {
    fn load(
        &self,
        options: &ClassifierOptions,
    ) -> Result<Box<dyn ClassificationEngine>, VisionError> {
        let model_path = self.store.locate(&options.model)?;

        let labels_path = self
            .config
            .labels_path
            .clone()
            .unwrap_or_else(|| model_path.with_extension("txt"));
        let labels = if labels_path.exists() {
            load_labels(&labels_path)?
        } else {
            warn!("No label file at {:?}, using class indices", labels_path);
            Vec::new()
        };

        let engine = OnnxEngine::new(&model_path, labels, options.delegate, self.config.clone())?;
        Ok(Box::new(engine))
    }
}
