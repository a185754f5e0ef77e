/// Generation parameters
///
/// This struct describes one text-to-image request independent of the
/// model it runs on. It is serialized to JSON for presets stored in the
/// database and for the HTTP API.
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default negative prompt for new sessions
pub const DEFAULT_NEGATIVE_PROMPT: &str = "ugly, blurry, low quality, distortion, grid";

/// FreeU backbone/skip scaling factors
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct FreeuArgs {
    /// Backbone factor of the first stage
    pub b1: f32,
    /// Backbone factor of the second stage
    pub b2: f32,
    /// Skip factor of the first stage
    pub s1: f32,
    /// Skip factor of the second stage
    pub s2: f32,
}

impl Default for FreeuArgs {
    fn default() -> Self {
        Self {
            b1: 1.3,
            b2: 1.4,
            s1: 0.9,
            s2: 0.2,
        }
    }
}

/// A LoRA to apply on top of the base weights
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoraSettings {
    pub path: PathBuf,
    /// Strength of the LoRA (0.0 = no effect, 1.0 = full effect)
    pub scale: f32,
}

/// All parameters of a text-to-image generation
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GenerationParams {
    pub prompt: String,
    pub negative_prompt: String,

    // ========== Sampling ==========
    /// Number of denoising steps
    pub steps: u32,
    /// Classifier-free guidance scale (CFG)
    pub guidance_scale: f32,
    /// Fixed seed, or None for a random one
    pub seed: Option<u64>,

    // ========== Output ==========
    pub width: u32,
    pub height: u32,

    // ========== Extras ==========
    /// Run the refiner pass after the base model
    pub use_refiner: bool,
    pub lora: Option<LoraSettings>,
    /// FreeU quality boost, None = disabled
    pub freeu: Option<FreeuArgs>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
            steps: 30,
            guidance_scale: 7.0,
            seed: None,
            width: 1024,
            height: 1024,
            use_refiner: false,
            lora: None,
            freeu: None,
        }
    }
}

impl GenerationParams {
    /// Convert to JSON string for database storage
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from JSON string (from database)
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

}

/// Catalog sentinel for generations without a fixed seed
pub const RANDOM_SEED: &str = "Random";

/// Parse a user-entered seed; blank or non-numeric input means random
pub fn parse_seed(input: &str) -> Option<u64> {
    input.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = GenerationParams::default();
        assert_eq!(params.steps, 30);
        assert_eq!(params.guidance_scale, 7.0);
        assert_eq!(params.negative_prompt, DEFAULT_NEGATIVE_PROMPT);
        assert_eq!(params.seed, None);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let params = GenerationParams::from_json(r#"{"prompt": "a lighthouse", "steps": 12}"#).unwrap();
        assert_eq!(params.prompt, "a lighthouse");
        assert_eq!(params.steps, 12);
        assert_eq!(params.width, 1024);
        assert!(params.freeu.is_none());
    }

    #[test]
    fn test_parse_seed() {
        assert_eq!(parse_seed(" 1234 "), Some(1234));
        assert_eq!(parse_seed(""), None);
        assert_eq!(parse_seed("Random"), None);
    }
}
