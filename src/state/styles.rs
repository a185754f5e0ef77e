/// Style presets and prompt composition
///
/// A style is a pair of prefixes prepended to the positive and negative
/// prompt. Built-in styles can be overridden or extended by `styles.json`,
/// an object mapping style names to `{"pos": "...", "neg": "..."}`.
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use super::store;

/// Style name meaning "no prefixes"
pub const NO_STYLE: &str = "None";

/// Quality tags Pony-family checkpoints expect in front of the prompt
pub const PONY_PREFIX: &str = "score_9, score_8_up, score_7_up, score_6_up, source_anime, ";
/// Negative tags for Pony-family checkpoints
pub const PONY_NEGATIVE: &str = "score_4, score_5, score_6, source_pony, source_furry, ";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct StylePreset {
    #[serde(default)]
    pub pos: String,
    #[serde(default)]
    pub neg: String,
}

impl StylePreset {
    fn new(pos: &str, neg: &str) -> Self {
        Self {
            pos: pos.to_string(),
            neg: neg.to_string(),
        }
    }
}

/// All known styles, keyed by name
#[derive(Debug, Clone, PartialEq)]
pub struct StyleBook {
    styles: BTreeMap<String, StylePreset>,
}

impl Default for StyleBook {
    fn default() -> Self {
        Self::builtin()
    }
}

impl StyleBook {
    /// The styles shipped with the application
    pub fn builtin() -> Self {
        let mut styles = BTreeMap::new();
        styles.insert(NO_STYLE.to_string(), StylePreset::default());
        styles.insert(
            "Cinematic".to_string(),
            StylePreset::new(
                "cinematic film still, shallow depth of field, anamorphic lens, film grain, ",
                "cartoon, illustration, flat lighting, ",
            ),
        );
        styles.insert(
            "Photographic".to_string(),
            StylePreset::new(
                "professional photograph, 35mm, natural light, highly detailed, ",
                "drawing, painting, render, anime, ",
            ),
        );
        styles.insert(
            "Anime".to_string(),
            StylePreset::new(
                "anime artwork, key visual, vibrant colors, clean line art, ",
                "photo, realistic, 3d render, ",
            ),
        );
        styles.insert(
            "Digital Art".to_string(),
            StylePreset::new(
                "digital painting, concept art, matte painting, artstation, ",
                "photo, low detail, ",
            ),
        );
        styles.insert(
            "Fantasy".to_string(),
            StylePreset::new(
                "epic fantasy art, magical atmosphere, intricate details, ",
                "modern, mundane, ",
            ),
        );
        Self { styles }
    }

    /// Built-in styles merged with the overrides from `styles.json`
    pub fn load(path: &Path) -> Self {
        let mut book = Self::builtin();
        match store::load_json::<BTreeMap<String, StylePreset>>(path) {
            Ok(Some(overrides)) => {
                info!("🎨 Loaded {} style presets from {}", overrides.len(), path.display());
                book.merge(overrides);
            }
            Ok(None) => {}
            Err(e) => warn!("Could not load style presets: {}", e),
        }
        book
    }

    /// Add or replace styles by name
    pub fn merge(&mut self, overrides: BTreeMap<String, StylePreset>) {
        self.styles.extend(overrides);
    }

    pub fn get(&self, name: &str) -> Option<&StylePreset> {
        self.styles.get(name)
    }

    /// Style names for pickers, "None" first
    pub fn names(&self) -> Vec<String> {
        let mut names = vec![NO_STYLE.to_string()];
        names.extend(self.styles.keys().filter(|k| *k != NO_STYLE).cloned());
        names
    }

    /// Apply a style and optional pony tags to a prompt pair.
    ///
    /// Unknown style names and "None" leave the prompts unchanged. Pony tags
    /// are added to the negative prompt only if it does not already carry them.
    pub fn compose(&self, style: &str, pony_mode: bool, prompt: &str, negative: &str) -> (String, String) {
        let (mut prompt, mut negative) = match self.get(style) {
            Some(preset) if style != NO_STYLE => (
                format!("{}{}", preset.pos, prompt),
                format!("{}{}", preset.neg, negative),
            ),
            _ => (prompt.to_string(), negative.to_string()),
        };

        if pony_mode {
            prompt = format!("{}{}", PONY_PREFIX, prompt);
            if !negative.contains("score_4") {
                negative = format!("{}{}", PONY_NEGATIVE, negative);
            }
        }

        (prompt, negative)
    }
}

// ========== Image of the day ==========

const SUBJECTS: &[&str] = &[
    "a lighthouse on a basalt cliff",
    "an old fox reading by candlelight",
    "a floating market in a flooded city",
    "a clockwork hummingbird",
    "a greenhouse on the moon",
    "a samurai made of autumn leaves",
    "a tiny dragon sleeping in a teacup",
    "an abandoned observatory in the desert",
];

const SETTINGS: &[&str] = &[
    "at golden hour",
    "during a thunderstorm",
    "under the northern lights",
    "in thick morning fog",
    "at blue hour with neon reflections",
];

const FINISHES: &[&str] = &[
    "cinematic lighting, highly detailed",
    "watercolor texture, soft palette",
    "volumetric light, 8k, sharp focus",
    "studio ghibli inspired, whimsical",
    "dramatic composition, rich colors",
];

/// Assemble a random prompt for the "image of the day"
pub fn random_prompt() -> String {
    let mut rng = rand::thread_rng();
    let subject = SUBJECTS.choose(&mut rng).copied().unwrap_or(SUBJECTS[0]);
    let setting = SETTINGS.choose(&mut rng).copied().unwrap_or(SETTINGS[0]);
    let finish = FINISHES.choose(&mut rng).copied().unwrap_or(FINISHES[0]);
    format!("{} {}, {}", subject, setting, finish)
}
