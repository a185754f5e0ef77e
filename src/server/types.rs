use serde::{Deserialize, Serialize};

use crate::state::data::ImageRecord;
use crate::state::params::DEFAULT_NEGATIVE_PROMPT;

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    /// Resident model, None before the first generation
    pub model: Option<String>,
    pub backend: String,
    pub is_generating: bool,
}

// ============================================================================
// Generation
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default = "default_negative")]
    pub negative_prompt: String,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_guidance")]
    pub guidance_scale: f32,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_size")]
    pub width: u32,
    #[serde(default = "default_size")]
    pub height: u32,
    #[serde(default)]
    pub use_refiner: bool,
    /// Checkpoint; the session's model when absent
    #[serde(default)]
    pub model: Option<String>,
    /// LoRA file; absent or "None" for no LoRA
    #[serde(default)]
    pub lora_path: Option<String>,
    #[serde(default = "default_lora_scale")]
    pub lora_scale: f32,
    #[serde(default)]
    pub use_freeu: bool,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub pony_mode: bool,
}

fn default_negative() -> String {
    DEFAULT_NEGATIVE_PROMPT.to_string()
}

fn default_steps() -> u32 {
    30
}

fn default_guidance() -> f32 {
    7.0
}

fn default_size() -> u32 {
    1024
}

fn default_lora_scale() -> f32 {
    0.8
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub status: String,
    pub image_path: String,
    /// Location under the `/images` mount
    pub url: Option<String>,
}

// ============================================================================
// Gallery
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct GalleryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub sort: String,
    #[serde(default)]
    pub model: String,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct GalleryItem {
    #[serde(flatten)]
    pub record: ImageRecord,
    pub url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RescanResponse {
    pub imported: usize,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        ApiError {
            error: ApiErrorDetail {
                message: message.into(),
                error_type: error_type.into(),
            },
        }
    }
}
