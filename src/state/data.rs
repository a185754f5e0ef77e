/// Shared data structures for the application state
///
/// These structs represent the data model that flows between
/// the database layer and the presentation layers.
use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::params::GenerationParams;

/// Model filter values that disable model filtering
pub const ALL_MODELS: [&str; 2] = ["All", "All Models"];

/// Represents a single generated image in the library
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRecord {
    /// Unique database ID
    pub id: i64,
    /// Absolute path to the PNG file
    pub path: String,
    pub prompt: String,
    pub negative_prompt: String,
    /// Checkpoint file name or repository id
    pub model: String,
    pub steps: u32,
    pub cfg: f64,
    /// Numeric seed or "Random"
    pub seed: String,
    /// Creation time in unix milliseconds
    pub timestamp: i64,
    pub favorite: bool,
}

impl ImageRecord {
    /// Creation time in the local timezone
    pub fn created_at(&self) -> Option<DateTime<Local>> {
        Local.timestamp_millis_opt(self.timestamp).single()
    }

    /// File name without directories, for captions
    pub fn file_name(&self) -> String {
        std::path::Path::new(&self.path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.clone())
    }
}

/// A record about to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewImage {
    pub path: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub model: String,
    pub steps: u32,
    pub cfg: f64,
    pub seed: String,
    /// Explicit creation time in unix milliseconds; None = now
    pub timestamp: Option<i64>,
}

/// Gallery ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Most recent first
    #[default]
    Newest,
    Oldest,
    /// Highest step count first; ties are unordered
    StepsDesc,
}

impl SortKey {
    pub const ALL: [SortKey; 3] = [SortKey::Newest, SortKey::Oldest, SortKey::StepsDesc];

    /// SQL ORDER BY clause for this key
    pub(crate) fn order_clause(self) -> &'static str {
        match self {
            SortKey::Newest => "ORDER BY timestamp DESC, id DESC",
            SortKey::Oldest => "ORDER BY timestamp ASC, id ASC",
            SortKey::StepsDesc => "ORDER BY steps DESC",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SortKey::Newest => "Newest",
            SortKey::Oldest => "Oldest",
            SortKey::StepsDesc => "Steps (High-Low)",
        };
        f.write_str(label)
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "newest" => Ok(SortKey::Newest),
            "oldest" => Ok(SortKey::Oldest),
            "steps" | "steps_desc" | "steps (high-low)" => Ok(SortKey::StepsDesc),
            other => Err(format!("unknown sort key: {}", other)),
        }
    }
}

/// Gallery filter
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImageQuery {
    /// Substring over prompt, seed and model; case-insensitive for ASCII only
    /// (SQLite `LIKE`). Empty = all
    pub search: String,
    pub sort: SortKey,
    /// Substring over model; empty, "All" or "All Models" = no filter
    pub model_filter: String,
}

impl ImageQuery {
    pub fn new(search: impl Into<String>, sort: SortKey, model_filter: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            sort,
            model_filter: model_filter.into(),
        }
    }

    /// The model filter, or None when it matches every model
    pub fn effective_model_filter(&self) -> Option<&str> {
        let filter = self.model_filter.trim();
        if filter.is_empty() || ALL_MODELS.contains(&filter) {
            None
        } else {
            Some(filter)
        }
    }
}

/// A named character: prompt snippet plus its preferred LoRA
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: i64,
    pub name: String,
    pub prompt: String,
    /// LoRA file, None when the character uses the base model only
    pub default_lora: Option<String>,
    pub lora_scale: f32,
}

/// A named set of generation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    pub id: i64,
    pub name: String,
    pub params: GenerationParams,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_key_parsing() {
        assert_eq!("".parse::<SortKey>().unwrap(), SortKey::Newest);
        assert_eq!("Oldest".parse::<SortKey>().unwrap(), SortKey::Oldest);
        assert_eq!("Steps (High-Low)".parse::<SortKey>().unwrap(), SortKey::StepsDesc);
        assert!("sideways".parse::<SortKey>().is_err());
    }

    #[test]
    fn test_model_filter_all() {
        assert_eq!(ImageQuery::new("", SortKey::Newest, "All").effective_model_filter(), None);
        assert_eq!(ImageQuery::new("", SortKey::Newest, "All Models").effective_model_filter(), None);
        assert_eq!(ImageQuery::default().effective_model_filter(), None);
        assert_eq!(
            ImageQuery::new("", SortKey::Newest, "juggernaut").effective_model_filter(),
            Some("juggernaut")
        );
    }
}
