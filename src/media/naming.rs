use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Longest slug kept in a file name
const MAX_SLUG_LEN: usize = 120;

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(score|source|rating)_\w+").expect("valid tag regex"));
static FILLER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(masterpiece|best quality)\b").expect("valid filler regex"));
static NON_ALNUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]+").expect("valid slug regex"));

/// Turn a prompt into a file-name slug.
///
/// Booru quality tags (`score_9`, `source_anime`, `rating_safe`) and the
/// words "masterpiece"/"best quality" are dropped before slugging.
pub fn sanitize_prompt(prompt: &str) -> String {
    let clean = TAG_RE.replace_all(prompt, "");
    let clean = FILLER_RE.replace_all(&clean, "");
    let slug = NON_ALNUM_RE
        .replace_all(&clean, "_")
        .trim_matches('_')
        .to_lowercase();

    if slug.is_empty() {
        return "image".to_string();
    }

    // Slug is ASCII at this point
    let cut = &slug[..slug.len().min(MAX_SLUG_LEN)];
    cut.trim_end_matches('_').to_string()
}

/// Where the next image for `prompt` goes:
/// `<output_root>/<YYYYMMDD>/<HHMMSS>_<slug>[_lora][_refiner].png`.
///
/// An existing file is never overwritten; a counter is appended instead.
pub fn output_path(
    output_root: &Path,
    prompt: &str,
    with_lora: bool,
    with_refiner: bool,
    now: DateTime<Local>,
) -> PathBuf {
    let dir = output_root.join(now.format("%Y%m%d").to_string());

    let mut stem = format!("{}_{}", now.format("%H%M%S"), sanitize_prompt(prompt));
    if with_lora {
        stem.push_str("_lora");
    }
    if with_refiner {
        stem.push_str("_refiner");
    }

    let mut path = dir.join(format!("{}.png", stem));
    let mut counter = 1;
    while path.exists() {
        path = dir.join(format!("{}_{}.png", stem, counter));
        counter += 1;
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_strips_tags() {
        assert_eq!(
            sanitize_prompt("score_9, score_8_up, source_anime, masterpiece, A Red Fox!"),
            "a_red_fox"
        );
        assert_eq!(sanitize_prompt("Best Quality, rating_safe, castle at dusk"), "castle_at_dusk");
    }

    #[test]
    fn test_sanitize_fallback_and_length() {
        assert_eq!(sanitize_prompt("!!! ???"), "image");
        assert_eq!(sanitize_prompt("masterpiece"), "image");

        let long = "word ".repeat(60);
        let slug = sanitize_prompt(&long);
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('_'));
    }

    #[test]
    fn test_output_path_layout_and_collisions() {
        let dir = TempDir::new().unwrap();
        let now = Local.with_ymd_and_hms(2024, 5, 1, 13, 45, 9).unwrap();

        let first = output_path(dir.path(), "a cat", true, true, now);
        assert_eq!(
            first,
            dir.path().join("20240501").join("134509_a_cat_lora_refiner.png")
        );

        std::fs::create_dir_all(first.parent().unwrap()).unwrap();
        std::fs::write(&first, b"taken").unwrap();
        let second = output_path(dir.path(), "a cat", true, true, now);
        assert_eq!(
            second,
            dir.path().join("20240501").join("134509_a_cat_lora_refiner_1.png")
        );
    }
}
