use image::DynamicImage;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use thiserror::Error;

use crate::state::params::{FreeuArgs, LoraSettings};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no model loaded")]
    NotLoaded,

    #[error("model not available: {0}")]
    MissingModel(String),

    #[error("diffusion process failed: {0}")]
    Process(String),

    #[error("generation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("could not read generated image: {0}")]
    Image(#[from] image::ImageError),
}

/// Whether a LoRA is applied on top of the loaded weights
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LoraState {
    #[default]
    NoLora,
    Loaded { path: PathBuf, scale: f32 },
}

impl LoraState {
    /// LoRA state for the given settings; a missing file means no LoRA
    pub fn resolve(settings: Option<&LoraSettings>) -> Self {
        match settings {
            Some(lora) if lora.path.is_file() => LoraState::Loaded {
                path: lora.path.clone(),
                scale: lora.scale,
            },
            Some(lora) => {
                tracing::warn!("⚠️  LoRA not found, continuing without it: {}", lora.path.display());
                LoraState::NoLora
            }
            None => LoraState::NoLora,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, LoraState::Loaded { .. })
    }

    /// LoRA file name for metadata and logs
    pub fn file_name(&self) -> Option<String> {
        match self {
            LoraState::NoLora => None,
            LoraState::Loaded { path, .. } => path.file_name().map(|n| n.to_string_lossy().to_string()),
        }
    }
}

/// What has to be resident before sampling
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    /// Checkpoint file or repository id
    pub model: String,
    pub lora: LoraState,
}

impl ModelSpec {
    /// Checkpoint name without directories, as recorded in metadata
    pub fn model_name(&self) -> String {
        Path::new(&self.model)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.model.clone())
    }
}

/// One sampling run, with style and pony prefixes already applied
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub steps: u32,
    pub guidance_scale: f32,
    pub seed: u64,
    pub width: u32,
    pub height: u32,
    pub use_refiner: bool,
    pub freeu: Option<FreeuArgs>,
}

/// A text-to-image engine.
///
/// The diffusion itself happens behind this trait. `sample` reports
/// `(step, total)` through `progress` and should stop early with
/// `BackendError::Cancelled` once `cancel` is set.
pub trait DiffusionBackend: Send {
    fn name(&self) -> &str;

    fn load(&mut self, spec: &ModelSpec) -> Result<(), BackendError>;

    fn sample(
        &mut self,
        request: &SampleRequest,
        progress: &mut dyn FnMut(u32, u32),
        cancel: &AtomicBool,
    ) -> Result<DynamicImage, BackendError>;

    fn unload(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_lora_falls_back() {
        let settings = LoraSettings {
            path: PathBuf::from("/definitely/not/here.safetensors"),
            scale: 0.7,
        };
        assert_eq!(LoraState::resolve(Some(&settings)), LoraState::NoLora);
        assert_eq!(LoraState::resolve(None), LoraState::NoLora);
    }

    #[test]
    fn test_existing_lora_is_loaded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ink.safetensors");
        std::fs::write(&path, b"weights").unwrap();

        let state = LoraState::resolve(Some(&LoraSettings {
            path: path.clone(),
            scale: 0.7,
        }));
        assert!(state.is_loaded());
        assert_eq!(state.file_name().as_deref(), Some("ink.safetensors"));
    }

    #[test]
    fn test_model_name() {
        let spec = ModelSpec {
            model: "/models/checkpoints/juggernautXL.safetensors".to_string(),
            lora: LoraState::NoLora,
        };
        assert_eq!(spec.model_name(), "juggernautXL.safetensors");
    }
}
