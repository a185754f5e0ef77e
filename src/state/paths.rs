/// On-disk layout of a Kami installation
///
/// Everything the application persists lives under one root directory:
/// - Linux: ~/.local/share/kami/
/// - macOS: ~/Library/Application Support/kami/
/// - Windows: %APPDATA%\kami\
///
/// The root can be overridden with `--root` or the `KAMI_HOME` variable.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Catalog database file name
pub const LIBRARY_DB: &str = "library.db";
/// Saved favorite prompts
pub const FAVORITES_FILE: &str = "favorites.json";
/// Last-used generation settings
pub const SESSION_FILE: &str = "session_config.json";
/// Optional user style presets, merged over the built-in ones
pub const STYLES_FILE: &str = "styles.json";
/// Root of the generated image tree (`output_images/<YYYYMMDD>/...`)
pub const OUTPUT_DIR: &str = "output_images";

/// File extensions accepted as checkpoints or LoRA weights
pub const WEIGHT_EXTENSIONS: &[&str] = &["safetensors", "ckpt", "gguf"];

/// Resolved paths for one installation root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the default installation root in the user's data directory
    pub fn default_root() -> PathBuf {
        let mut path = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        path.push("kami");
        path
    }

    /// Create the root and every directory the application writes into
    pub fn ensure_dirs(&self) -> io::Result<()> {
        for dir in [
            self.root.clone(),
            self.output_dir(),
            self.checkpoints_dir(),
            self.loras_dir(),
            self.thumbnail_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn library_db(&self) -> PathBuf {
        self.root.join(LIBRARY_DB)
    }

    pub fn favorites_file(&self) -> PathBuf {
        self.root.join(FAVORITES_FILE)
    }

    pub fn session_file(&self) -> PathBuf {
        self.root.join(SESSION_FILE)
    }

    pub fn styles_file(&self) -> PathBuf {
        self.root.join(STYLES_FILE)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(OUTPUT_DIR)
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("models").join("checkpoints")
    }

    pub fn loras_dir(&self) -> PathBuf {
        self.root.join("models").join("loras")
    }

    pub fn thumbnail_dir(&self) -> PathBuf {
        self.root.join("cache").join("thumbnails")
    }
}

/// List weight files (checkpoints or LoRAs) in a directory, sorted by name.
///
/// Hidden files are skipped. A missing directory yields an empty list.
pub fn list_weight_files(directory: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(directory) else {
        return Vec::new();
    };

    let mut files: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|name| !name.starts_with('.'))
        .filter(|name| {
            Path::new(name)
                .extension()
                .map(|ext| {
                    let ext = ext.to_string_lossy().to_lowercase();
                    WEIGHT_EXTENSIONS.contains(&ext.as_str())
                })
                .unwrap_or(false)
        })
        .collect();

    files.sort();
    files
}

/// Strip quotes and whitespace from a pasted path
pub fn clean_path_input(input: &str) -> String {
    input.trim().trim_matches('"').trim_matches('\'').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_under_root() {
        let paths = AppPaths::new("/srv/kami");
        assert_eq!(paths.library_db(), PathBuf::from("/srv/kami/library.db"));
        assert_eq!(paths.output_dir(), PathBuf::from("/srv/kami/output_images"));
        assert_eq!(
            paths.loras_dir(),
            PathBuf::from("/srv/kami/models/loras")
        );
    }

    #[test]
    fn test_list_weight_files_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in ["zeta.safetensors", "alpha.CKPT", "notes.txt", ".hidden.safetensors"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("folder.safetensors")).unwrap();

        let files = list_weight_files(dir.path());
        assert_eq!(files, vec!["alpha.CKPT", "zeta.safetensors"]);
    }

    #[test]
    fn test_list_weight_files_missing_dir() {
        assert!(list_weight_files(Path::new("/definitely/not/here")).is_empty());
    }

    #[test]
    fn test_clean_path_input() {
        assert_eq!(clean_path_input("  \"/tmp/a b.safetensors\" "), "/tmp/a b.safetensors");
        assert_eq!(clean_path_input("'x'"), "x");
    }
}
