/// Generation metadata embedded in output PNGs
///
/// Every image carries two text chunks describing how it was made:
///
/// - `parameters`: the line-oriented format shared with other SD front-ends
///   ```text
///   <prompt>
///   Negative prompt: <negative>
///   Steps: 30, CFG scale: 7, Seed: 42, Mode: T2I, Model: sdxl.safetensors, ...
///   ```
/// - `kami`: a versioned JSON document with the same fields, which survives
///   multi-line prompts and commas in model names.
///
/// The reader prefers the JSON chunk and falls back to the legacy text, so
/// images from older versions (and other tools) still import.
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::state::data::NewImage;
use crate::state::params::RANDOM_SEED;

/// Keyword of the legacy text chunk
pub const PARAMETERS_KEY: &str = "parameters";
/// Keyword of the versioned JSON chunk
pub const SIDECAR_KEY: &str = "kami";
pub const SIDECAR_VERSION: u32 = 1;
pub const SOFTWARE: &str = "Kami - Local SDXL Station";
/// Scheduler label recorded for every generation
pub const SCHEDULER: &str = "DPM++ 2M Karras";

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("PNG decoding failed: {0}")]
    Decode(#[from] png::DecodingError),

    #[error("PNG encoding failed: {0}")]
    Encode(#[from] png::EncodingError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What an image's metadata says about its generation
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GenerationInfo {
    pub prompt: String,
    pub negative_prompt: String,
    pub steps: u32,
    pub cfg: f64,
    pub seed: String,
    /// Checkpoint base name
    pub model: String,
    pub scheduler: String,
    /// LoRA file name, None when no LoRA was applied
    pub lora: Option<String>,
    pub freeu: bool,
    pub mode: String,
}

impl Default for GenerationInfo {
    /// The values used for anything the metadata does not say
    fn default() -> Self {
        Self {
            prompt: UNKNOWN.to_string(),
            negative_prompt: String::new(),
            steps: 0,
            cfg: 0.0,
            seed: RANDOM_SEED.to_string(),
            model: UNKNOWN.to_string(),
            scheduler: String::new(),
            lora: None,
            freeu: false,
            mode: String::new(),
        }
    }
}

#[derive(Serialize)]
struct SidecarOut<'a> {
    version: u32,
    #[serde(flatten)]
    info: &'a GenerationInfo,
}

impl GenerationInfo {
    /// Render the legacy `parameters` text
    pub fn to_parameters(&self) -> String {
        format!(
            "{}\nNegative prompt: {}\nSteps: {}, CFG scale: {}, Seed: {}, Mode: {}, Model: {}, Scheduler: {}, FreeU: {}, LoRA: {}",
            self.prompt,
            self.negative_prompt,
            self.steps,
            self.cfg,
            self.seed,
            self.mode,
            self.model,
            self.scheduler,
            if self.freeu { "True" } else { "False" },
            self.lora.as_deref().unwrap_or("None"),
        )
    }

    /// Parse the legacy `parameters` text. Never fails: anything that cannot
    /// be read keeps its default.
    pub fn parse_parameters(text: &str) -> Self {
        let mut info = Self::default();

        if let Some(first) = text.lines().next() {
            if !first.trim().is_empty() {
                info.prompt = first.to_string();
            }
        }

        for line in text.lines() {
            if let Some(negative) = line.strip_prefix("Negative prompt:") {
                info.negative_prompt = negative.trim().to_string();
            }

            if !line.contains("Steps:") {
                continue;
            }

            for part in line.split(", ") {
                let Some((key, value)) = part.split_once(':') else {
                    continue;
                };
                let value = value.trim();
                match key.trim() {
                    "Steps" => {
                        if let Ok(steps) = value.parse() {
                            info.steps = steps;
                        }
                    }
                    "CFG scale" => {
                        if let Ok(cfg) = value.parse() {
                            info.cfg = cfg;
                        }
                    }
                    "Seed" if !value.is_empty() => info.seed = value.to_string(),
                    "Model" if !value.is_empty() => info.model = value.to_string(),
                    "Scheduler" => info.scheduler = value.to_string(),
                    "Mode" => info.mode = value.to_string(),
                    "FreeU" => info.freeu = value.eq_ignore_ascii_case("true"),
                    "LoRA" => {
                        info.lora = (!value.is_empty() && value != "None").then(|| value.to_string())
                    }
                    _ => {}
                }
            }
        }

        info
    }

    /// Render the versioned JSON chunk
    pub fn to_sidecar(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&SidecarOut {
            version: SIDECAR_VERSION,
            info: self,
        })
    }

    /// Parse the versioned JSON chunk; None for unknown versions or bad JSON
    pub fn from_sidecar(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        let version = value.get("version")?.as_u64()?;
        if version != u64::from(SIDECAR_VERSION) {
            debug!("Ignoring metadata sidecar version {}", version);
            return None;
        }
        serde_json::from_value(value).ok()
    }

    /// Turn the metadata into a catalog record for `path`
    pub fn into_new_image(self, path: String, timestamp: Option<i64>) -> NewImage {
        NewImage {
            path,
            prompt: self.prompt,
            negative_prompt: self.negative_prompt,
            model: self.model,
            steps: self.steps,
            cfg: self.cfg,
            seed: self.seed,
            timestamp,
        }
    }
}

/// Write `image` as an 8-bit PNG carrying `info`, creating parent directories
pub fn write_png(path: &Path, image: &DynamicImage, info: &GenerationInfo) -> Result<(), MetadataError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let (width, height) = (image.width(), image.height());
    let (color, data) = if image.color().has_alpha() {
        (png::ColorType::Rgba, image.to_rgba8().into_raw())
    } else {
        (png::ColorType::Rgb, image.to_rgb8().into_raw())
    };

    let writer = BufWriter::new(File::create(path)?);
    let mut encoder = png::Encoder::new(writer, width, height);
    encoder.set_color(color);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.add_text_chunk("Software".to_string(), SOFTWARE.to_string())?;
    encoder.add_itxt_chunk(PARAMETERS_KEY.to_string(), info.to_parameters())?;
    encoder.add_itxt_chunk(SIDECAR_KEY.to_string(), info.to_sidecar()?)?;

    let mut writer = encoder.write_header()?;
    writer.write_image_data(&data)?;
    writer.finish()?;
    Ok(())
}

/// Decode a PNG fully and collect its text chunks (tEXt, zTXt and iTXt) by keyword
pub fn read_text_chunks(path: &Path) -> Result<HashMap<String, String>, MetadataError> {
    let decoder = png::Decoder::new(BufReader::new(File::open(path)?));
    let mut reader = decoder.read_info()?;

    // Decoding the frame rejects truncated files. Text chunks written before
    // IDAT (ours and every common writer's) are already in `info`.
    let mut buf = vec![0; reader.output_buffer_size()];
    reader.next_frame(&mut buf)?;

    let info = reader.info();
    let mut chunks = HashMap::new();

    for chunk in &info.uncompressed_latin1_text {
        chunks.insert(chunk.keyword.clone(), chunk.text.clone());
    }
    for chunk in &info.compressed_latin1_text {
        if let Ok(text) = chunk.get_text() {
            chunks.insert(chunk.keyword.clone(), text);
        }
    }
    for chunk in &info.utf8_text {
        if let Ok(text) = chunk.get_text() {
            chunks.insert(chunk.keyword.clone(), text);
        }
    }

    Ok(chunks)
}

/// Read the generation metadata of a PNG.
///
/// Fails only when the file cannot be opened or decoded; an image without
/// metadata yields the defaults.
pub fn read_generation_info(path: &Path) -> Result<GenerationInfo, MetadataError> {
    let chunks = read_text_chunks(path)?;
    Ok(info_from_chunks(&chunks))
}

fn info_from_chunks(chunks: &HashMap<String, String>) -> GenerationInfo {
    if let Some(info) = chunks.get(SIDECAR_KEY).and_then(|s| GenerationInfo::from_sidecar(s)) {
        return info;
    }
    chunks
        .get(PARAMETERS_KEY)
        .map(|text| GenerationInfo::parse_parameters(text))
        .unwrap_or_default()
}
