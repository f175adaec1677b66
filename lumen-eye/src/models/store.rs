//! Model directory with optional HTTPS download

use crate::config::validate_model_name;
use crate::error::VisionError;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const MAX_MODEL_SIZE: usize = 2_000_000_000; // 2GB max
const MIN_MODEL_SIZE: usize = 1024;
const DOWNLOAD_TIMEOUT_SECS: u64 = 3600;

/// Where to fetch a model from
#[derive(Debug, Clone)]
pub struct ModelSource {
    pub url: String,
    /// Hex-encoded SHA-256 of the file, verified when present
    pub sha256: Option<String>,
}

impl ModelSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sha256: None,
        }
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    fn validate(&self) -> Result<(), VisionError> {
        if self.url.is_empty() || self.url.len() > 2048 {
            return Err(VisionError::Model("Invalid URL".to_string()));
        }

        if !self.url.starts_with("https://") {
            return Err(VisionError::Model(
                "Only HTTPS URLs are allowed for model downloads".to_string(),
            ));
        }

        if let Some(sum) = &self.sha256 {
            if sum.len() != 64 || !sum.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(VisionError::Model("Checksum must be 64 hex characters".to_string()));
            }
        }

        Ok(())
    }
}

/// Directory of model files
#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure model directory exists
    pub fn ensure_dir(&self) -> Result<PathBuf, VisionError> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root)?;
            info!("Created model directory: {:?}", self.root);
        }
        Ok(self.root.clone())
    }

    /// Path of an existing model file
    pub fn locate(&self, model_name: &str) -> Result<PathBuf, VisionError> {
        validate_model_name(model_name).map_err(VisionError::Model)?;

        let path = self.root.join(model_name);
        if !path.is_file() {
            return Err(VisionError::Model(format!(
                "Model {} not found in {:?}",
                model_name, self.root
            )));
        }
        Ok(path)
    }

    /// Return the model path, downloading it first if it is not present
    pub async fn ensure_model(
        &self,
        model_name: &str,
        source: &ModelSource,
    ) -> Result<PathBuf, VisionError> {
        validate_model_name(model_name).map_err(VisionError::Model)?;
        source.validate()?;

        self.ensure_dir()?;
        let model_path = self.root.join(model_name);

        if model_path.exists() {
            info!("Model {} already exists at {:?}", model_name, model_path);
            return Ok(model_path);
        }

        info!("Downloading model {} from {}", model_name, source.url);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()?;

        let response = client.get(&source.url).send().await?;
        if !response.status().is_success() {
            return Err(VisionError::Model(format!(
                "Failed to download model: HTTP {}",
                response.status()
            )));
        }

        if let Some(content_length) = response.content_length() {
            if content_length > MAX_MODEL_SIZE as u64 {
                return Err(VisionError::Model(format!(
                    "Model too large: {} bytes (max {} bytes)",
                    content_length, MAX_MODEL_SIZE
                )));
            }
        }

        let bytes = response.bytes().await?;
        check_size(bytes.len())?;

        match &source.sha256 {
            Some(expected) => {
                verify_checksum(&bytes, expected)?;
                info!("Verified checksum for model {}", model_name);
            }
            None => warn!(
                "Downloaded {} bytes for model {} without checksum verification",
                bytes.len(),
                model_name
            ),
        }

        self.install(model_name, &bytes)
    }

    /// Write model bytes into the store through a temp file and rename
    pub fn install(&self, model_name: &str, bytes: &[u8]) -> Result<PathBuf, VisionError> {
        validate_model_name(model_name).map_err(VisionError::Model)?;
        self.ensure_dir()?;

        let model_path = self.root.join(model_name);
        let temp_path = self.root.join(format!(".{}.tmp", model_name));
        fs::write(&temp_path, bytes)?;

        if let Err(e) = fs::rename(&temp_path, &model_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        info!("Model {} saved to {:?}", model_name, model_path);
        Ok(model_path)
    }
}

fn check_size(len: usize) -> Result<(), VisionError> {
    if len > MAX_MODEL_SIZE {
        return Err(VisionError::Model(format!(
            "Downloaded model too large: {} bytes (max {} bytes)",
            len, MAX_MODEL_SIZE
        )));
    }
    if len < MIN_MODEL_SIZE {
        return Err(VisionError::Model(
            "Downloaded file too small, likely corrupted".to_string(),
        ));
    }
    Ok(())
}

/// Compare the SHA-256 of `bytes` against a hex digest
pub fn verify_checksum(bytes: &[u8], expected: &str) -> Result<(), VisionError> {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let computed = hex::encode(hasher.finalize());

    if !computed.eq_ignore_ascii_case(expected) {
        return Err(VisionError::Model(format!(
            "Checksum mismatch: expected {}, got {}",
            expected, computed
        )));
    }
    Ok(())
}
