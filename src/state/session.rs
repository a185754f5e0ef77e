/// Session configuration
///
/// The last-used generation settings, persisted wholesale to
/// `session_config.json` and restored at startup. Missing fields fall back
/// to their defaults one by one; a missing or corrupt file yields the
/// defaults for everything.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::params::{FreeuArgs, GenerationParams, LoraSettings, DEFAULT_NEGATIVE_PROMPT};
use super::store::{self, ConfigError};
use super::styles::NO_STYLE;

/// Model used when nothing else has been selected
pub const DEFAULT_MODEL: &str = "stabilityai/stable-diffusion-xl-base-1.0";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Last prompt entered (reused when Enter is pressed without input)
    pub prompt: String,
    pub neg_prompt: String,
    pub steps: u32,
    pub guidance: f32,
    pub seed: Option<u64>,
    pub width: u32,
    pub height: u32,
    pub model_path: String,
    pub use_refiner: bool,
    pub lora_path: Option<PathBuf>,
    pub lora_scale: f32,
    pub current_style: String,
    pub use_freeu: bool,
    pub freeu_args: FreeuArgs,
    pub pony_mode: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            neg_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
            steps: 30,
            guidance: 7.0,
            seed: None,
            width: 1024,
            height: 1024,
            model_path: DEFAULT_MODEL.to_string(),
            use_refiner: false,
            lora_path: None,
            lora_scale: 0.8,
            current_style: NO_STYLE.to_string(),
            use_freeu: false,
            freeu_args: FreeuArgs::default(),
            pony_mode: false,
        }
    }
}

impl SessionConfig {
    /// Restore the last session, falling back to defaults on any problem
    pub fn load(path: &Path) -> Self {
        match store::load_json::<SessionConfig>(path) {
            Ok(Some(config)) => {
                debug!("Session restored from {}", path.display());
                config
            }
            Ok(None) => Self::default(),
            Err(e) => {
                warn!("Could not load session config: {}", e);
                Self::default()
            }
        }
    }

    /// Persist the current configuration
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        store::save_json(path, self)
    }

    /// Active LoRA, if one is selected
    pub fn lora(&self) -> Option<LoraSettings> {
        self.lora_path.as_ref().map(|path| LoraSettings {
            path: path.clone(),
            scale: self.lora_scale,
        })
    }

    /// Build generation parameters for `prompt` from the session settings
    pub fn to_params(&self, prompt: &str) -> GenerationParams {
        GenerationParams {
            prompt: prompt.to_string(),
            negative_prompt: self.neg_prompt.clone(),
            steps: self.steps,
            guidance_scale: self.guidance,
            seed: self.seed,
            width: self.width,
            height: self.height,
            use_refiner: self.use_refiner,
            lora: self.lora(),
            freeu: self.use_freeu.then_some(self.freeu_args),
        }
    }
}
