/// Favorite prompts
///
/// Named prompt / negative-prompt pairs saved by the user, persisted as a
/// JSON array in `favorites.json`. Older files stored bare prompt strings;
/// those are migrated on load.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::store::{self, ConfigError};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FavoritePrompt {
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
}

impl FavoritePrompt {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>, negative: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            negative_prompt: negative.into(),
        }
    }

    /// Name generated for favorites saved without one
    pub fn name_from_prompt(prompt: &str) -> String {
        let head: String = prompt.chars().take(25).collect();
        format!("{}...", head.trim())
    }
}

/// The favorites list and the file it lives in
#[derive(Debug, Clone)]
pub struct FavoriteStore {
    path: PathBuf,
    items: Vec<FavoritePrompt>,
}

impl FavoriteStore {
    /// Load favorites; a missing or unreadable file yields an empty list
    pub fn load(path: &Path) -> Self {
        let items = match store::load_json::<Vec<Value>>(path) {
            Ok(Some(values)) => values.into_iter().filter_map(migrate_entry).collect(),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Could not load favorites: {}", e);
                Vec::new()
            }
        };

        Self {
            path: path.to_path_buf(),
            items,
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        store::save_json(&self.path, &self.items)
    }

    pub fn items(&self) -> &[FavoritePrompt] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FavoritePrompt> {
        self.items.get(index)
    }

    pub fn contains_prompt(&self, prompt: &str) -> bool {
        self.items.iter().any(|f| f.prompt == prompt)
    }

    pub fn add(&mut self, favorite: FavoritePrompt) {
        self.items.push(favorite);
    }

    /// Replace the prompt texts of an existing favorite; false if out of range
    pub fn update(&mut self, index: usize, prompt: &str, negative: &str) -> bool {
        match self.items.get_mut(index) {
            Some(fav) => {
                fav.prompt = prompt.to_string();
                fav.negative_prompt = negative.to_string();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<FavoritePrompt> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }
}

/// Convert one stored JSON entry into a favorite, dropping unusable ones
fn migrate_entry(value: Value) -> Option<FavoritePrompt> {
    match value {
        Value::String(prompt) => Some(FavoritePrompt {
            name: FavoritePrompt::name_from_prompt(&prompt),
            prompt,
            negative_prompt: String::new(),
        }),
        Value::Object(map) => {
            let prompt = map.get("prompt")?.as_str()?.to_string();
            let name = map
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("Untitled")
                .to_string();
            let negative_prompt = map
                .get("negative_prompt")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(FavoritePrompt {
                name,
                prompt,
                negative_prompt,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let favorites = FavoriteStore::load(&dir.path().join("favorites.json"));
        assert!(favorites.is_empty());
    }

    #[test]
    fn test_legacy_entries_are_migrated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("favorites.json");
        std::fs::write(
            &path,
            r#"[
                "a very long prompt about a castle in the clouds",
                {"prompt": "neon city"},
                {"name": "Fox", "prompt": "red fox", "negative_prompt": "blurry"},
                {"name": "broken"},
                42
            ]"#,
        )
        .unwrap();

        let favorites = FavoriteStore::load(&path);
        assert_eq!(favorites.len(), 3);
        assert_eq!(favorites.items()[0].name, "a very long prompt about...");
        assert_eq!(favorites.items()[1].name, "Untitled");
        assert_eq!(
            favorites.items()[2],
            FavoritePrompt::new("Fox", "red fox", "blurry")
        );
    }

    #[test]
    fn test_add_update_remove_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("favorites.json");

        let mut favorites = FavoriteStore::load(&path);
        favorites.add(FavoritePrompt::new("Owl", "snowy owl", ""));
        favorites.add(FavoritePrompt::new("Bay", "quiet bay", "people"));
        assert!(favorites.update(0, "snowy owl, moonlight", "noise"));
        assert!(!favorites.update(5, "x", "y"));
        favorites.save().unwrap();

        let mut reloaded = FavoriteStore::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(0).unwrap().negative_prompt, "noise");
        assert!(reloaded.contains_prompt("quiet bay"));

        assert_eq!(reloaded.remove(1).map(|f| f.name), Some("Bay".to_string()));
        assert!(reloaded.remove(1).is_none());
    }
}
