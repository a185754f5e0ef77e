/// Characters and presets
///
/// Small named collections stored next to the image catalog, with the same
/// connection-per-operation policy.
use rusqlite::{params, OptionalExtension, Row};

use super::data::{Character, Preset};
use super::library::{Library, LibraryError};
use super::params::GenerationParams;

/// Stored in `characters.default_lora` when a character has no LoRA
const NO_LORA: &str = "None";

fn character_from_row(row: &Row<'_>) -> rusqlite::Result<Character> {
    let lora: Option<String> = row.get(3)?;
    Ok(Character {
        id: row.get(0)?,
        name: row.get(1)?,
        prompt: row.get(2)?,
        default_lora: lora.filter(|l| !l.is_empty() && l != NO_LORA),
        lora_scale: row.get::<_, Option<f64>>(4)?.unwrap_or(0.8) as f32,
    })
}

impl Library {
    // ========== Characters ==========

    /// Insert or replace a character by name. Returns its id.
    pub fn save_character(
        &self,
        name: &str,
        prompt: &str,
        default_lora: Option<&str>,
        lora_scale: f32,
    ) -> Result<i64, LibraryError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO characters (name, prompt, default_lora, lora_scale)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                prompt = excluded.prompt,
                default_lora = excluded.default_lora,
                lora_scale = excluded.lora_scale",
            params![name, prompt, default_lora.unwrap_or(NO_LORA), lora_scale as f64],
        )?;
        let id = conn.query_row("SELECT id FROM characters WHERE name = ?1", [name], |row| {
            row.get(0)
        })?;
        Ok(id)
    }

    pub fn list_characters(&self) -> Result<Vec<Character>, LibraryError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, prompt, default_lora, lora_scale FROM characters ORDER BY name",
        )?;
        let characters = stmt
            .query_map([], character_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(characters)
    }

    pub fn get_character(&self, name: &str) -> Result<Option<Character>, LibraryError> {
        let conn = self.connect()?;
        let character = conn
            .query_row(
                "SELECT id, name, prompt, default_lora, lora_scale FROM characters WHERE name = ?1",
                [name],
                character_from_row,
            )
            .optional()?;
        Ok(character)
    }

    pub fn delete_character(&self, name: &str) -> Result<bool, LibraryError> {
        let conn = self.connect()?;
        Ok(conn.execute("DELETE FROM characters WHERE name = ?1", [name])? > 0)
    }

    // ========== Presets ==========

    /// Insert or replace a preset by name. Returns its id.
    pub fn save_preset(&self, name: &str, params: &GenerationParams) -> Result<i64, LibraryError> {
        let json = params.to_json()?;
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO presets (name, params_json) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET params_json = excluded.params_json",
            [name, json.as_str()],
        )?;
        let id = conn.query_row("SELECT id FROM presets WHERE name = ?1", [name], |row| {
            row.get(0)
        })?;
        Ok(id)
    }

    /// All presets sorted by name. Rows with unreadable JSON are skipped.
    pub fn list_presets(&self) -> Result<Vec<Preset>, LibraryError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT id, name, params_json FROM presets ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let presets = rows
            .into_iter()
            .filter_map(|(id, name, json)| match GenerationParams::from_json(&json) {
                Ok(params) => Some(Preset { id, name, params }),
                Err(e) => {
                    tracing::warn!("⚠️  Skipping preset {}: {}", name, e);
                    None
                }
            })
            .collect();
        Ok(presets)
    }

    pub fn load_preset(&self, name: &str) -> Result<Option<GenerationParams>, LibraryError> {
        let conn = self.connect()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT params_json FROM presets WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(GenerationParams::from_json(&json)?)),
            None => Ok(None),
        }
    }

    pub fn delete_preset(&self, name: &str) -> Result<bool, LibraryError> {
        let conn = self.connect()?;
        Ok(conn.execute("DELETE FROM presets WHERE name = ?1", [name])? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn library(dir: &TempDir) -> Library {
        Library::open(dir.path().join("library.db")).unwrap()
    }

    #[test]
    fn test_character_upsert_and_list() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);

        let id = lib.save_character("Mira", "silver hair, green cloak", None, 0.8).unwrap();
        lib.save_character("Aldo", "old sailor", Some("ink.safetensors"), 0.6).unwrap();
        let same_id = lib
            .save_character("Mira", "silver hair, red cloak", Some("mira.safetensors"), 0.7)
            .unwrap();
        assert_eq!(id, same_id);

        let characters = lib.list_characters().unwrap();
        assert_eq!(characters.len(), 2);
        assert_eq!(characters[0].name, "Aldo");
        assert_eq!(characters[0].default_lora.as_deref(), Some("ink.safetensors"));

        let mira = lib.get_character("Mira").unwrap().unwrap();
        assert_eq!(mira.prompt, "silver hair, red cloak");
        assert!((mira.lora_scale - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_character_without_lora() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        lib.save_character("Plain", "a person", None, 0.8).unwrap();

        assert_eq!(lib.get_character("Plain").unwrap().unwrap().default_lora, None);
        assert!(lib.delete_character("Plain").unwrap());
        assert!(!lib.delete_character("Plain").unwrap());
        assert!(lib.get_character("Plain").unwrap().is_none());
    }

    #[test]
    fn test_preset_round_trip() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        let params = GenerationParams {
            prompt: "foggy harbor".to_string(),
            steps: 42,
            seed: Some(7),
            ..Default::default()
        };

        lib.save_preset("harbor", &params).unwrap();
        assert_eq!(lib.load_preset("harbor").unwrap(), Some(params.clone()));

        let updated = GenerationParams {
            steps: 20,
            ..params
        };
        lib.save_preset("harbor", &updated).unwrap();
        let presets = lib.list_presets().unwrap();
        assert_eq!(presets.len(), 1);
        assert_eq!(presets[0].params.steps, 20);

        assert!(lib.delete_preset("harbor").unwrap());
        assert_eq!(lib.load_preset("harbor").unwrap(), None);
    }
}
