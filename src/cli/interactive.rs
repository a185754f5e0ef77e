/// Interactive terminal session
///
/// A menu loop over the session settings. Each line typed at the prompt is
/// parsed into a `MenuCommand` and dispatched by `InteractiveSession::handle`.
/// Settings are written back to `session_config.json` after every
/// generation and on quit.
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use super::{preview, progress_bar};
use crate::context::AppContext;
use crate::engine::GenerationRequest;
use crate::state::data::ImageQuery;
use crate::state::favorites::{FavoritePrompt, FavoriteStore};
use crate::state::paths::{clean_path_input, list_weight_files};
use crate::state::session::SessionConfig;
use crate::state::styles::PONY_NEGATIVE;

/// Records listed by the gallery command
const GALLERY_ROWS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuCommand {
    /// Bare Enter
    Generate,
    SelectModel,
    SelectLora,
    ToggleRefiner,
    TogglePony,
    SelectStyle,
    ToggleFreeu,
    SetSteps,
    SetGuidance,
    SetNegativePrompt,
    Favorites,
    Gallery,
    Quit,
    Unknown(String),
}

impl MenuCommand {
    pub fn parse(input: &str) -> Self {
        match input.trim().to_lowercase().as_str() {
            "" => MenuCommand::Generate,
            "m" => MenuCommand::SelectModel,
            "l" => MenuCommand::SelectLora,
            "r" => MenuCommand::ToggleRefiner,
            "p" => MenuCommand::TogglePony,
            "s" => MenuCommand::SelectStyle,
            "u" => MenuCommand::ToggleFreeu,
            "1" => MenuCommand::SetSteps,
            "2" => MenuCommand::SetGuidance,
            "3" => MenuCommand::SetNegativePrompt,
            "f" => MenuCommand::Favorites,
            "g" => MenuCommand::Gallery,
            "q" => MenuCommand::Quit,
            other => MenuCommand::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Outcome of a file picker
#[derive(Debug, Clone, PartialEq)]
enum Pick {
    Keep,
    Clear,
    Path(String),
}

pub struct InteractiveSession<R, W> {
    ctx: AppContext,
    session: SessionConfig,
    favorites: FavoriteStore,
    input: R,
    out: W,
}

/// Run the menu on stdin/stdout until the user quits
pub fn run(ctx: AppContext) -> io::Result<()> {
    let stdin = io::stdin();
    let mut menu = InteractiveSession::new(ctx, stdin.lock(), io::stdout());
    menu.run()
}

impl<R: BufRead, W: Write> InteractiveSession<R, W> {
    pub fn new(ctx: AppContext, input: R, out: W) -> Self {
        let session = ctx.load_session();
        let favorites = ctx.load_favorites();
        Self {
            ctx,
            session,
            favorites,
            input,
            out,
        }
    }

    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    pub fn favorites(&self) -> &FavoriteStore {
        &self.favorites
    }

    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.print_header()?;
            let Some(line) = self.read_line("\nCommand, or [ENTER] to generate: ")? else {
                break;
            };
            if self.handle(MenuCommand::parse(&line))? == Flow::Quit {
                break;
            }
        }

        self.persist_session();
        writeln!(self.out, "👋 See you soon!")
    }

    pub fn handle(&mut self, command: MenuCommand) -> io::Result<Flow> {
        match command {
            MenuCommand::Quit => return Ok(Flow::Quit),
            MenuCommand::Generate => self.generate()?,
            MenuCommand::SelectModel => self.select_model()?,
            MenuCommand::SelectLora => self.select_lora()?,
            MenuCommand::ToggleRefiner => {
                self.session.use_refiner = !self.session.use_refiner;
            }
            MenuCommand::TogglePony => self.toggle_pony()?,
            MenuCommand::SelectStyle => self.select_style()?,
            MenuCommand::ToggleFreeu => {
                self.session.use_freeu = !self.session.use_freeu;
            }
            MenuCommand::SetSteps => {
                self.session.steps = self.ask_parsed("New steps", self.session.steps)?;
            }
            MenuCommand::SetGuidance => {
                self.session.guidance = self.ask_parsed("New guidance", self.session.guidance)?;
            }
            MenuCommand::SetNegativePrompt => {
                let current = self.session.neg_prompt.clone();
                self.session.neg_prompt = self.ask("New negative prompt", &current)?;
            }
            MenuCommand::Favorites => self.favorites_menu()?,
            MenuCommand::Gallery => self.gallery()?,
            MenuCommand::Unknown(input) => {
                writeln!(self.out, "Unknown command: {}", input)?;
            }
        }
        Ok(Flow::Continue)
    }

    // ===== Input helpers =====

    /// Print `label` and read one line; None at end of input
    fn read_line(&mut self, label: &str) -> io::Result<Option<String>> {
        write!(self.out, "{}", label)?;
        self.out.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// Read a value, falling back to `default` on empty input
    fn ask(&mut self, label: &str, default: &str) -> io::Result<String> {
        let line = if default.is_empty() {
            self.read_line(&format!("{}: ", label))?
        } else {
            self.read_line(&format!("{} ({}): ", label, default))?
        };
        match line {
            Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
            _ => Ok(default.to_string()),
        }
    }

    /// Read and parse a value; unparsable input keeps `default`
    fn ask_parsed<T: FromStr + ToString + Copy>(&mut self, label: &str, default: T) -> io::Result<T> {
        let value = self.ask(label, &default.to_string())?;
        match value.parse() {
            Ok(parsed) => Ok(parsed),
            Err(_) => {
                writeln!(self.out, "Invalid value, keeping {}", default.to_string())?;
                Ok(default)
            }
        }
    }

    fn confirm(&mut self, label: &str) -> io::Result<bool> {
        let answer = self.read_line(&format!("{} [y/N]: ", label))?.unwrap_or_default();
        Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
    }

    // ===== Display =====

    fn print_header(&mut self) -> io::Result<()> {
        let session = &self.session;
        let lora = session
            .lora_path
            .as_deref()
            .map(file_label)
            .unwrap_or_else(|| "None".to_string());
        let negative: String = session.neg_prompt.chars().take(60).collect();

        writeln!(self.out, "\n🚀 KAMI - Local SDXL Station")?;
        writeln!(self.out, "  Model       {:<44} [M]", shorten(&file_label(Path::new(&session.model_path)), 44))?;
        writeln!(self.out, "  LoRA        {:<44} [L]", format!("{} (scale {})", lora, session.lora_scale))?;
        writeln!(self.out, "  Refiner     {:<44} [R]", on_off(session.use_refiner))?;
        writeln!(self.out, "  Pony mode   {:<44} [P]", on_off(session.pony_mode))?;
        writeln!(self.out, "  Style       {:<44} [S]", session.current_style)?;
        writeln!(self.out, "  FreeU       {:<44} [U]", on_off(session.use_freeu))?;
        writeln!(self.out, "  Steps       {:<44} [1]", session.steps)?;
        writeln!(self.out, "  Guidance    {:<44} [2]", session.guidance)?;
        writeln!(self.out, "  Negative    {:<44} [3]", shorten(&negative, 44))?;

        if !session.prompt.is_empty() {
            let prompt: String = session.prompt.chars().take(90).collect();
            writeln!(self.out, "  Current prompt: {}", prompt)?;
        }
        writeln!(self.out, "[ENTER] Generate | [F] Favorites | [G] Gallery | [Q] Quit")
    }

    // ===== Commands =====

    fn generate(&mut self) -> io::Result<()> {
        let last = self.session.prompt.clone();
        let prompt = self.ask("✨ PROMPT", &last)?;
        if prompt.trim().is_empty() {
            return Ok(());
        }
        self.session.prompt = prompt.clone();

        let request = GenerationRequest::from_session(&self.session, &prompt);
        writeln!(self.out, "Generating: {}", shorten(&prompt, 80))?;

        let bar = progress_bar(request.params.steps);
        let result = self.ctx.engine.generate(&request, &mut |step, total| {
            bar.set_length(total as u64);
            bar.set_position(step as u64);
        });
        bar.finish_and_clear();
        self.persist_session();

        let path = match result {
            Ok(path) => path,
            Err(e) => {
                writeln!(self.out, "❌ Error: {}", e)?;
                return Ok(());
            }
        };

        writeln!(self.out, "✅ Saved: {}", path.display())?;
        if let Err(e) = preview::show(&path) {
            warn!("Preview failed: {}", e);
        }

        if self.confirm("Save as favorite?")? {
            if self.favorites.contains_prompt(&prompt) {
                writeln!(self.out, "Already a favorite.")?;
            } else {
                let negative = self.session.neg_prompt.clone();
                self.favorites.add(FavoritePrompt::new(
                    FavoritePrompt::name_from_prompt(&prompt),
                    prompt,
                    negative,
                ));
                self.persist_favorites()?;
                writeln!(self.out, "⭐ Saved!")?;
            }
        }
        Ok(())
    }

    /// Numbered picker over `directory`; 0 keeps the current value
    fn pick_file(&mut self, kind: &str, current: &str, directory: &Path, clearable: bool) -> io::Result<Pick> {
        let files = list_weight_files(directory);

        writeln!(self.out, "\n--- {} selection ---", kind)?;
        writeln!(self.out, "   0  Keep: {}", current)?;
        for (i, name) in files.iter().enumerate() {
            writeln!(self.out, "{:>4}  {}", i + 1, name)?;
        }
        if files.is_empty() {
            writeln!(self.out, "No local files in {}", directory.display())?;
        }
        writeln!(self.out, "[A] Enter a path manually")?;
        if clearable {
            writeln!(self.out, "[X] Disable {}", kind)?;
        }

        let choice = self.ask("Choice", "0")?;
        let lowered = choice.to_lowercase();

        if clearable && lowered == "x" {
            return Ok(Pick::Clear);
        }
        if lowered == "a" {
            let raw = self.ask("Path", "")?;
            let cleaned = clean_path_input(&raw);
            return Ok(if cleaned.is_empty() { Pick::Keep } else { Pick::Path(cleaned) });
        }

        match choice.parse::<usize>() {
            Ok(0) => Ok(Pick::Keep),
            Ok(n) if n <= files.len() => Ok(Pick::Path(directory.join(&files[n - 1]).display().to_string())),
            _ => {
                writeln!(self.out, "Invalid number.")?;
                Ok(Pick::Keep)
            }
        }
    }

    fn select_model(&mut self) -> io::Result<()> {
        let current = self.session.model_path.clone();
        let directory = self.ctx.paths.checkpoints_dir();

        if let Pick::Path(path) = self.pick_file("Model", &current, &directory, false)? {
            if path != current {
                self.ctx.engine.unload();
                self.session.model_path = path;
                writeln!(self.out, "Model set to {}", self.session.model_path)?;
            }
        }
        Ok(())
    }

    fn select_lora(&mut self) -> io::Result<()> {
        let current = self
            .session
            .lora_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "None".to_string());
        let directory = self.ctx.paths.loras_dir();

        match self.pick_file("LoRA", &current, &directory, true)? {
            Pick::Keep => {}
            Pick::Clear => self.session.lora_path = None,
            Pick::Path(path) => {
                self.session.lora_path = Some(PathBuf::from(path));
                let scale = self.ask_parsed("LoRA scale", self.session.lora_scale)?;
                self.session.lora_scale = scale.clamp(0.0, 1.0);
            }
        }
        Ok(())
    }

    fn toggle_pony(&mut self) -> io::Result<()> {
        self.session.pony_mode = !self.session.pony_mode;
        if self.session.pony_mode {
            if !self.session.neg_prompt.contains("score_4") {
                self.session.neg_prompt = format!("{}{}", PONY_NEGATIVE, self.session.neg_prompt);
            }
            writeln!(self.out, "🦄 Pony mode enabled!")
        } else {
            writeln!(self.out, "Pony mode disabled.")
        }
    }

    fn select_style(&mut self) -> io::Result<()> {
        let names = self.ctx.engine.styles().names();
        writeln!(self.out, "\n--- Styles ---")?;
        for (i, name) in names.iter().enumerate() {
            writeln!(self.out, "{:>4}  {}", i + 1, name)?;
        }

        let choice = self.ask("Style", "")?;
        match choice.parse::<usize>() {
            Ok(n) if (1..=names.len()).contains(&n) => {
                self.session.current_style = names[n - 1].clone();
            }
            _ if choice.is_empty() => {}
            _ => writeln!(self.out, "Invalid number.")?,
        }
        Ok(())
    }

    fn favorites_menu(&mut self) -> io::Result<()> {
        writeln!(self.out, "\n--- Favorites ---")?;
        if self.favorites.is_empty() {
            writeln!(self.out, "No favorites saved.")?;
            return Ok(());
        }

        for (i, fav) in self.favorites.items().iter().enumerate() {
            writeln!(self.out, "{:>3}  {:<24} {}", i + 1, shorten(&fav.name, 24), shorten(&fav.prompt, 60))?;
        }
        writeln!(self.out, "[number] Load | [D] Delete | [ENTER] Back")?;

        let choice = self.ask("Choice", "")?;
        if choice.is_empty() {
            return Ok(());
        }

        if choice.eq_ignore_ascii_case("d") {
            let number: usize = self.ask_parsed("Number to delete", 0)?;
            match number.checked_sub(1).and_then(|i| self.favorites.remove(i)) {
                Some(removed) => {
                    self.persist_favorites()?;
                    writeln!(self.out, "Deleted: {}", removed.name)?;
                }
                None => writeln!(self.out, "Invalid number.")?,
            }
            return Ok(());
        }

        let selected = choice
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| self.favorites.get(i))
            .cloned();
        match selected {
            Some(fav) => {
                self.session.prompt = fav.prompt;
                if !fav.negative_prompt.is_empty() {
                    self.session.neg_prompt = fav.negative_prompt;
                }
                writeln!(self.out, "✅ Favorite loaded: {}", fav.name)
            }
            None => writeln!(self.out, "Invalid number."),
        }
    }

    fn gallery(&mut self) -> io::Result<()> {
        let records = self.ctx.library.query_images(&ImageQuery::default());
        writeln!(self.out, "\n--- Latest images ({} total) ---", records.len())?;

        let latest: Vec<_> = records.into_iter().take(GALLERY_ROWS).collect();
        for (i, record) in latest.iter().enumerate() {
            let date = record
                .created_at()
                .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            writeln!(
                self.out,
                "{:>3}  {:<16}  {:<40}  {}",
                i + 1,
                date,
                shorten(&record.prompt, 40),
                record.file_name()
            )?;
        }
        if latest.is_empty() {
            return Ok(());
        }

        let choice = self.ask("Number to preview", "")?;
        let record = choice
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| latest.get(i));
        if let Some(record) = record {
            writeln!(self.out, "{}", record.path)?;
            writeln!(
                self.out,
                "Prompt: {}\nNegative: {}\nModel: {} | Steps: {} | CFG: {} | Seed: {}",
                record.prompt, record.negative_prompt, record.model, record.steps, record.cfg, record.seed
            )?;
            if let Err(e) = preview::show(Path::new(&record.path)) {
                warn!("Preview failed: {}", e);
            }
        }
        Ok(())
    }

    // ===== Persistence =====

    fn persist_session(&self) {
        match self.ctx.save_session(&self.session) {
            Ok(()) => info!("Session saved"),
            Err(e) => warn!("Could not save session: {}", e),
        }
    }

    fn persist_favorites(&mut self) -> io::Result<()> {
        if let Err(e) = self.favorites.save() {
            writeln!(self.out, "Could not save favorites: {}", e)?;
        }
        Ok(())
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "ON"
    } else {
        "OFF"
    }
}

/// File name for paths, the value itself for repository ids
fn file_label(path: &Path) -> String {
    let text = path.to_string_lossy();
    let is_file = path
        .extension()
        .map(|ext| matches!(ext.to_string_lossy().to_lowercase().as_str(), "safetensors" | "ckpt" | "gguf"))
        .unwrap_or(false);

    if is_file {
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| text.to_string())
    } else {
        text.to_string()
    }
}

/// Trim to `max` characters, keeping the tail visible for long names
fn shorten(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max || max < 8 {
        return text.to_string();
    }
    let tail = max / 2;
    let head = max - tail - 3;
    let start: String = text.chars().take(head).collect();
    let end: String = text.chars().skip(count - tail).collect();
    format!("{}...{}", start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::StubBackend;
    use crate::state::styles::NO_STYLE;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn menu(dir: &TempDir, input: &str) -> InteractiveSession<Cursor<Vec<u8>>, Vec<u8>> {
        let ctx = AppContext::for_tests(dir.path(), StubBackend::new());
        InteractiveSession::new(ctx, Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    fn output(menu: &InteractiveSession<Cursor<Vec<u8>>, Vec<u8>>) -> String {
        String::from_utf8_lossy(&menu.out).to_string()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(MenuCommand::parse(""), MenuCommand::Generate);
        assert_eq!(MenuCommand::parse("  "), MenuCommand::Generate);
        assert_eq!(MenuCommand::parse("M"), MenuCommand::SelectModel);
        assert_eq!(MenuCommand::parse("l"), MenuCommand::SelectLora);
        assert_eq!(MenuCommand::parse("u"), MenuCommand::ToggleFreeu);
        assert_eq!(MenuCommand::parse("2"), MenuCommand::SetGuidance);
        assert_eq!(MenuCommand::parse("G"), MenuCommand::Gallery);
        assert_eq!(MenuCommand::parse("q "), MenuCommand::Quit);
        assert_eq!(MenuCommand::parse("zz"), MenuCommand::Unknown("zz".to_string()));
    }

    #[test]
    fn test_toggles_and_numeric_settings() {
        let dir = TempDir::new().unwrap();
        let mut menu = menu(&dir, "42\nnot a number\n");

        menu.handle(MenuCommand::ToggleRefiner).unwrap();
        menu.handle(MenuCommand::ToggleFreeu).unwrap();
        menu.handle(MenuCommand::SetSteps).unwrap();
        menu.handle(MenuCommand::SetGuidance).unwrap();

        assert!(menu.session().use_refiner);
        assert!(menu.session().use_freeu);
        assert_eq!(menu.session().steps, 42);
        assert_eq!(menu.session().guidance, 7.0);
        assert!(output(&menu).contains("Invalid value"));
    }

    #[test]
    fn test_pony_mode_prepends_negative_once() {
        let dir = TempDir::new().unwrap();
        let mut menu = menu(&dir, "");

        menu.handle(MenuCommand::TogglePony).unwrap();
        menu.handle(MenuCommand::TogglePony).unwrap();
        menu.handle(MenuCommand::TogglePony).unwrap();

        assert!(menu.session().pony_mode);
        assert!(menu.session().neg_prompt.starts_with(PONY_NEGATIVE));
        assert_eq!(menu.session().neg_prompt.matches("score_4").count(), 1);
    }

    #[test]
    fn test_select_style_by_number() {
        let dir = TempDir::new().unwrap();
        let mut menu = menu(&dir, "2\n99\n");

        menu.handle(MenuCommand::SelectStyle).unwrap();
        let chosen = menu.session().current_style.clone();
        assert_ne!(chosen, NO_STYLE);

        menu.handle(MenuCommand::SelectStyle).unwrap();
        assert_eq!(menu.session().current_style, chosen);
    }

    #[test]
    fn test_select_lora_from_folder_and_disable() {
        let dir = TempDir::new().unwrap();
        let mut menu = menu(&dir, "1\n1.7\nx\n");
        std::fs::write(menu.ctx.paths.loras_dir().join("ink.safetensors"), b"x").unwrap();

        menu.handle(MenuCommand::SelectLora).unwrap();
        let lora = menu.session().lora_path.clone().unwrap();
        assert!(lora.ends_with("ink.safetensors"));
        assert_eq!(menu.session().lora_scale, 1.0);

        menu.handle(MenuCommand::SelectLora).unwrap();
        assert!(menu.session().lora_path.is_none());
    }

    #[test]
    fn test_generate_then_save_favorite() {
        let dir = TempDir::new().unwrap();
        let mut menu = menu(&dir, "a quiet harbor\ny\n");
        menu.session.steps = 2;
        menu.session.width = 8;
        menu.session.height = 8;

        menu.handle(MenuCommand::Generate).unwrap();

        assert!(output(&menu).contains("✅ Saved:"));
        assert_eq!(menu.session().prompt, "a quiet harbor");
        assert!(menu.favorites().contains_prompt("a quiet harbor"));
        assert_eq!(menu.ctx.library.image_count().unwrap(), 1);

        // Both stores were written through
        assert_eq!(menu.ctx.load_session().prompt, "a quiet harbor");
        assert_eq!(menu.ctx.load_favorites().len(), 1);
    }

    #[test]
    fn test_favorites_load_and_delete() {
        let dir = TempDir::new().unwrap();
        let mut menu = menu(&dir, "2\nd\n1\n");
        menu.favorites.add(FavoritePrompt::new("Owl", "snowy owl", ""));
        menu.favorites.add(FavoritePrompt::new("Bay", "quiet bay", "people"));

        menu.handle(MenuCommand::Favorites).unwrap();
        assert_eq!(menu.session().prompt, "quiet bay");
        assert_eq!(menu.session().neg_prompt, "people");

        menu.handle(MenuCommand::Favorites).unwrap();
        assert_eq!(menu.favorites().len(), 1);
        assert_eq!(menu.favorites().get(0).unwrap().name, "Bay");
    }

    #[test]
    fn test_run_stops_on_quit_and_end_of_input() {
        let dir = TempDir::new().unwrap();
        let mut quitting = menu(&dir, "r\nq\n");
        quitting.run().unwrap();
        assert!(quitting.session().use_refiner);
        assert!(quitting.ctx.load_session().use_refiner);

        let mut eof = menu(&dir, "");
        eof.run().unwrap();
        assert!(output(&eof).contains("See you soon"));
    }

    #[test]
    fn test_shorten() {
        assert_eq!(shorten("short", 10), "short");
        assert_eq!(shorten("abcdefghijklmnopqrstuvwxyz", 12), "abc...uvwxyz");
    }
}
