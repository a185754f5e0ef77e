/// Desktop front-end
///
/// One iced application with three tabs (Generate, Gallery, Favorites) over
/// the shared `AppContext`. Anything that touches SQLite in bulk or the
/// diffusion engine runs off the UI thread; small CRUD calls on presets and
/// characters run inline.
pub mod favorites;
pub mod gallery;
pub mod generate;

use iced::futures::channel::mpsc;
use iced::widget::{button, column, container, row, text};
use iced::{Element, Length, Task, Theme};
use rfd::{FileDialog, MessageButtons, MessageDialog, MessageDialogResult};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::context::AppContext;
use crate::engine::{Engine, GenerationRequest};
use crate::media::thumbnail::load_thumbnail;
use crate::state::data::{Character, ImageRecord, Preset, SortKey};
use crate::state::favorites::{FavoritePrompt, FavoriteStore};
use crate::state::params::parse_seed;
use crate::state::paths::WEIGHT_EXTENSIONS;
use crate::state::session::SessionConfig;
use crate::state::styles::random_prompt;

use gallery::GalleryState;
use generate::GenerateForm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Generate,
    Gallery,
    Favorites,
}

/// Events streamed back from the generation worker
#[derive(Debug, Clone)]
pub enum GenerationEvent {
    Progress(u32, u32),
    Finished(Result<PathBuf, String>),
}

#[derive(Debug, Clone)]
pub enum Message {
    TabSelected(Tab),

    // Generate form
    PromptChanged(String),
    NegativeChanged(String),
    StepsChanged(String),
    GuidanceChanged(String),
    SeedChanged(String),
    RefinerToggled(bool),
    PonyToggled(bool),
    FreeuToggled(bool),
    StyleSelected(String),
    PickModel,
    PickLora,
    ClearLora,
    LoraScaleChanged(f32),
    Generate,
    Cancel,
    ImageOfTheDay,
    Generation(GenerationEvent),

    // Presets
    PresetNameChanged(String),
    PresetSelected(String),
    SavePreset,
    DeletePreset(String),

    // Gallery
    SearchChanged(String),
    SortSelected(SortKey),
    ModelFilterSelected(String),
    RefreshGallery,
    GalleryLoaded(Vec<ImageRecord>, Vec<String>),
    ThumbnailLoaded(i64, Result<PathBuf, String>),
    NextPage,
    PrevPage,
    SelectImage(i64),
    CloseDetail,
    LoadParams(i64),
    ToggleFavorite(i64),
    DeleteImage(i64),
    ImageChanged(Result<bool, String>),
    Rescan,
    RescanComplete(usize),

    // Favorites and characters
    FavoriteNameChanged(String),
    SaveFavorite,
    UpdateFavorite(usize),
    DeleteFavorite(usize),
    LoadFavorite(usize),
    CharacterNameChanged(String),
    SaveCharacter,
    UseCharacter(String),
    DeleteCharacter(String),
}

pub struct KamiApp {
    ctx: AppContext,
    session: SessionConfig,
    tab: Tab,
    status: String,

    pub(crate) form: GenerateForm,
    pub(crate) style_names: Vec<String>,
    pub(crate) generating: bool,
    pub(crate) progress: Option<(u32, u32)>,
    pub(crate) last_image: Option<PathBuf>,
    pub(crate) presets: Vec<Preset>,
    pub(crate) preset_name: String,

    pub(crate) gallery: GalleryState,

    pub(crate) favorites: FavoriteStore,
    pub(crate) favorite_name: String,
    pub(crate) characters: Vec<Character>,
    pub(crate) character_name: String,
}

/// Launch the desktop window
pub fn run(ctx: AppContext) -> iced::Result {
    iced::application("Kami - Local SDXL Station", KamiApp::update, KamiApp::view)
        .theme(KamiApp::theme)
        .window_size(iced::Size::new(1280.0, 880.0))
        .centered()
        .run_with(move || KamiApp::new(ctx))
}

/// Run blocking work on tokio's blocking pool
async fn blocking<T, F>(work: F) -> Result<T, String>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| e.to_string())
}

/// Run a generation on its own thread, streaming progress and the result
fn start_generation(engine: Arc<Engine>, request: GenerationRequest) -> mpsc::UnboundedReceiver<GenerationEvent> {
    let (sender, receiver) = mpsc::unbounded();

    std::thread::spawn(move || {
        let progress = sender.clone();
        let result = engine.generate(&request, &mut |step, total| {
            let _ = progress.unbounded_send(GenerationEvent::Progress(step, total));
        });
        let _ = sender.unbounded_send(GenerationEvent::Finished(result.map_err(|e| e.to_string())));
    });

    receiver
}

fn confirm(title: &str, description: &str) -> bool {
    let answer = MessageDialog::new()
        .set_title(title)
        .set_description(description)
        .set_buttons(MessageButtons::YesNo)
        .show();
    matches!(answer, MessageDialogResult::Yes)
}

impl KamiApp {
    fn new(ctx: AppContext) -> (Self, Task<Message>) {
        let session = ctx.load_session();
        let favorites = ctx.load_favorites();

        let mut app = Self {
            form: GenerateForm::from_session(&session),
            style_names: ctx.engine.styles().names(),
            session,
            tab: Tab::Generate,
            status: "Ready.".to_string(),
            generating: false,
            progress: None,
            last_image: None,
            presets: Vec::new(),
            preset_name: String::new(),
            gallery: GalleryState::default(),
            favorites,
            favorite_name: String::new(),
            characters: Vec::new(),
            character_name: String::new(),
            ctx,
        };
        app.reload_presets();
        app.reload_characters();

        // Pick up images written while the app was closed
        let task = app.rescan();
        (app, task)
    }

    fn theme(&self) -> Theme {
        Theme::CatppuccinMocha
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::TabSelected(tab) => {
                self.tab = tab;
                if tab == Tab::Gallery {
                    return self.refresh_gallery();
                }
            }

            // ===== Generate form =====
            Message::PromptChanged(value) => self.form.prompt = value,
            Message::NegativeChanged(value) => self.form.negative = value,
            Message::StepsChanged(value) => self.form.steps = value,
            Message::GuidanceChanged(value) => self.form.guidance = value,
            Message::SeedChanged(value) => self.form.seed = value,
            Message::RefinerToggled(value) => self.form.use_refiner = value,
            Message::PonyToggled(value) => self.form.pony_mode = value,
            Message::FreeuToggled(value) => self.form.use_freeu = value,
            Message::StyleSelected(style) => self.form.style = style,
            Message::LoraScaleChanged(scale) => self.form.lora_scale = scale,
            Message::ClearLora => self.form.lora_path = None,
            Message::PickModel => {
                let picked = FileDialog::new()
                    .set_title("Select checkpoint")
                    .add_filter("Weights", WEIGHT_EXTENSIONS)
                    .set_directory(self.ctx.paths.checkpoints_dir())
                    .pick_file();
                if let Some(path) = picked {
                    self.form.model = path.display().to_string();
                }
            }
            Message::PickLora => {
                let picked = FileDialog::new()
                    .set_title("Select LoRA")
                    .add_filter("Weights", WEIGHT_EXTENSIONS)
                    .set_directory(self.ctx.paths.loras_dir())
                    .pick_file();
                if let Some(path) = picked {
                    self.form.lora_path = Some(path);
                }
            }
            Message::Generate => return self.start_generate(),
            Message::Cancel => {
                self.ctx.engine.cancel();
                self.status = "Cancelling...".to_string();
            }
            Message::ImageOfTheDay => {
                if self.generating {
                    return Task::none();
                }
                if confirm("Image of the day", "Generate an image from a random prompt?") {
                    self.form.prompt = random_prompt();
                    info!("🎲 Image of the day: {}", self.form.prompt);
                    return self.start_generate();
                }
            }
            Message::Generation(event) => return self.on_generation(event),

            // ===== Presets =====
            Message::PresetNameChanged(value) => self.preset_name = value,
            Message::PresetSelected(name) => match self.ctx.library.load_preset(&name) {
                Ok(Some(params)) => {
                    self.form.load_params(&params);
                    self.preset_name = name;
                    self.status = format!("Preset '{}' loaded.", self.preset_name);
                }
                Ok(None) => self.status = format!("Preset '{}' not found.", name),
                Err(e) => self.status = format!("❌ Could not load preset: {}", e),
            },
            Message::SavePreset => {
                let name = self.preset_name.trim().to_string();
                match self.ctx.library.save_preset(&name, &self.form.to_params()) {
                    Ok(_) => self.status = format!("💾 Preset '{}' saved.", name),
                    Err(e) => self.status = format!("❌ Could not save preset: {}", e),
                }
                self.reload_presets();
            }
            Message::DeletePreset(name) => {
                match self.ctx.library.delete_preset(&name) {
                    Ok(true) => self.status = format!("Preset '{}' deleted.", name),
                    Ok(false) => self.status = format!("Preset '{}' not found.", name),
                    Err(e) => self.status = format!("❌ Could not delete preset: {}", e),
                }
                self.reload_presets();
            }

            // ===== Gallery =====
            Message::SearchChanged(value) => self.gallery.search = value,
            Message::SortSelected(sort) => {
                self.gallery.sort = sort;
                return self.refresh_gallery();
            }
            Message::ModelFilterSelected(model) => {
                self.gallery.model_filter = model;
                self.gallery.page = 0;
                return self.refresh_gallery();
            }
            Message::RefreshGallery => {
                self.gallery.page = 0;
                return self.refresh_gallery();
            }
            Message::GalleryLoaded(records, models) => {
                debug!("Gallery loaded {} records", records.len());
                self.gallery.models = models;
                self.gallery.set_records(records);
                return self.load_thumbnails();
            }
            Message::ThumbnailLoaded(id, result) => match result {
                Ok(path) => {
                    self.gallery.thumbnails.insert(id, path);
                }
                Err(e) => debug!("No thumbnail for image {}: {}", id, e),
            },
            Message::NextPage => {
                self.gallery.next_page();
                return self.load_thumbnails();
            }
            Message::PrevPage => {
                self.gallery.prev_page();
                return self.load_thumbnails();
            }
            Message::SelectImage(id) => self.gallery.selected = Some(id),
            Message::CloseDetail => self.gallery.selected = None,
            Message::LoadParams(id) => {
                if let Some(record) = self.gallery.record(id) {
                    self.form.prompt = record.prompt.clone();
                    self.form.negative = record.negative_prompt.clone();
                    self.form.steps = record.steps.to_string();
                    self.form.guidance = record.cfg.to_string();
                    self.form.seed = parse_seed(&record.seed).map(|s| s.to_string()).unwrap_or_default();
                    self.status = format!("Parameters loaded from {}", record.file_name());
                    self.tab = Tab::Generate;
                }
            }
            Message::ToggleFavorite(id) => {
                if let Some(record) = self.gallery.record(id) {
                    let library = self.ctx.library.clone();
                    let path = record.path.clone();
                    let favorite = !record.favorite;
                    return Task::perform(
                        blocking(move || library.set_favorite(&path, favorite).map_err(|e| e.to_string())),
                        |result| Message::ImageChanged(result.and_then(|r| r)),
                    );
                }
            }
            Message::DeleteImage(id) => {
                let Some(record) = self.gallery.record(id) else {
                    return Task::none();
                };
                if !confirm("Delete image", &format!("Delete {} from disk and library?", record.file_name())) {
                    return Task::none();
                }

                let library = self.ctx.library.clone();
                let path = record.path.clone();
                self.gallery.selected = None;
                self.gallery.thumbnails.remove(&id);
                return Task::perform(
                    blocking(move || library.delete_image_with_file(&path).map_err(|e| e.to_string())),
                    |result| Message::ImageChanged(result.and_then(|r| r)),
                );
            }
            Message::ImageChanged(result) => {
                if let Err(e) = result {
                    error!("Library update failed: {}", e);
                    self.status = format!("❌ {}", e);
                }
                return self.refresh_gallery();
            }
            Message::Rescan => {
                self.status = "Scanning output folder...".to_string();
                return self.rescan();
            }
            Message::RescanComplete(imported) => {
                if imported > 0 {
                    self.status = format!("📂 Imported {} new images.", imported);
                }
                return self.refresh_gallery();
            }

            // ===== Favorites =====
            Message::FavoriteNameChanged(value) => self.favorite_name = value,
            Message::SaveFavorite => self.save_favorite(),
            Message::UpdateFavorite(index) => {
                if self.favorites.update(index, self.form.prompt.trim(), &self.form.negative) {
                    self.persist_favorites("updated");
                }
            }
            Message::DeleteFavorite(index) => {
                if self.favorites.remove(index).is_some() {
                    self.persist_favorites("deleted");
                }
            }
            Message::LoadFavorite(index) => {
                if let Some(fav) = self.favorites.get(index).cloned() {
                    self.form.prompt = fav.prompt;
                    self.form.negative = fav.negative_prompt;
                    self.status = format!("✅ Favorite '{}' loaded.", fav.name);
                    self.tab = Tab::Generate;
                }
            }

            // ===== Characters =====
            Message::CharacterNameChanged(value) => self.character_name = value,
            Message::SaveCharacter => {
                let name = self.character_name.trim().to_string();
                let lora = self.form.lora_path.as_ref().map(|p| p.display().to_string());
                match self
                    .ctx
                    .library
                    .save_character(&name, self.form.prompt.trim(), lora.as_deref(), self.form.lora_scale)
                {
                    Ok(_) => {
                        self.status = format!("Character '{}' saved.", name);
                        self.character_name.clear();
                    }
                    Err(e) => self.status = format!("❌ Could not save character: {}", e),
                }
                self.reload_characters();
            }
            Message::UseCharacter(name) => {
                if let Some(character) = self.characters.iter().find(|c| c.name == name).cloned() {
                    self.apply_character(&character);
                    self.tab = Tab::Generate;
                }
            }
            Message::DeleteCharacter(name) => {
                if let Err(e) = self.ctx.library.delete_character(&name) {
                    self.status = format!("❌ Could not delete character: {}", e);
                }
                self.reload_characters();
            }
        }

        Task::none()
    }

    fn view(&self) -> Element<'_, Message> {
        let tab_button = |label: &'static str, tab: Tab| {
            button(text(label)).on_press_maybe((self.tab != tab).then_some(Message::TabSelected(tab)))
        };

        let header = row![
            text("Kami").size(28),
            tab_button("Generate", Tab::Generate),
            tab_button("Gallery", Tab::Gallery),
            tab_button("Favorites", Tab::Favorites),
        ]
        .spacing(12)
        .align_y(iced::Alignment::Center);

        let body = match self.tab {
            Tab::Generate => generate::view(self),
            Tab::Gallery => gallery::view(self),
            Tab::Favorites => favorites::view(self),
        };

        column![
            header,
            container(body).width(Length::Fill).height(Length::Fill),
            text(&self.status).size(14),
        ]
        .spacing(16)
        .padding(20)
        .into()
    }

    // ===== Tasks =====

    fn start_generate(&mut self) -> Task<Message> {
        if self.generating {
            return Task::none();
        }

        let request = match self.form.to_request(&mut self.session) {
            Ok(request) => request,
            Err(message) => {
                self.status = message;
                return Task::none();
            }
        };
        if let Err(e) = self.ctx.save_session(&self.session) {
            warn!("Could not save session: {}", e);
        }

        self.generating = true;
        self.progress = Some((0, request.params.steps));
        self.status = format!("Generating: {}", request.params.prompt);

        let receiver = start_generation(Arc::clone(&self.ctx.engine), request);
        Task::run(receiver, Message::Generation)
    }

    fn on_generation(&mut self, event: GenerationEvent) -> Task<Message> {
        match event {
            GenerationEvent::Progress(step, total) => {
                self.progress = Some((step, total));
                Task::none()
            }
            GenerationEvent::Finished(result) => {
                self.generating = false;
                self.progress = None;
                match result {
                    Ok(path) => {
                        self.status = format!("✅ Saved: {}", path.display());
                        self.last_image = Some(path);
                    }
                    Err(e) => {
                        error!("Generation failed: {}", e);
                        self.status = format!("❌ Generation failed: {}", e);
                    }
                }
                self.rescan()
            }
        }
    }

    fn rescan(&self) -> Task<Message> {
        let ctx = self.ctx.clone();
        Task::perform(blocking(move || ctx.rescan_output()), |result| {
            Message::RescanComplete(result.unwrap_or(0))
        })
    }

    fn refresh_gallery(&self) -> Task<Message> {
        let library = self.ctx.library.clone();
        let query = self.gallery.query();
        Task::perform(
            blocking(move || (library.query_images(&query), library.list_distinct_models())),
            |result| {
                let (records, models) = result.unwrap_or_default();
                Message::GalleryLoaded(records, models)
            },
        )
    }

    fn load_thumbnails(&self) -> Task<Message> {
        let cache_dir = self.ctx.paths.thumbnail_dir();
        Task::batch(self.gallery.missing_thumbnails().into_iter().map(|(id, source)| {
            Task::perform(load_thumbnail(source, cache_dir.clone(), id), move |result| {
                Message::ThumbnailLoaded(id, result)
            })
        }))
    }

    // ===== Helpers =====

    fn save_favorite(&mut self) {
        let prompt = self.form.prompt.trim().to_string();
        if prompt.is_empty() {
            self.status = "Enter a prompt first".to_string();
            return;
        }
        if self.favorites.contains_prompt(&prompt) {
            self.status = "Already a favorite.".to_string();
            return;
        }

        let name = match self.favorite_name.trim() {
            "" => FavoritePrompt::name_from_prompt(&prompt),
            name => name.to_string(),
        };
        self.favorites
            .add(FavoritePrompt::new(name, prompt, self.form.negative.clone()));
        self.favorite_name.clear();
        self.persist_favorites("saved");
    }

    fn persist_favorites(&mut self, action: &str) {
        match self.favorites.save() {
            Ok(()) => self.status = format!("⭐ Favorite {}.", action),
            Err(e) => {
                warn!("Could not save favorites: {}", e);
                self.status = format!("❌ Could not save favorites: {}", e);
            }
        }
    }

    fn apply_character(&mut self, character: &Character) {
        let current = self.form.prompt.trim();
        self.form.prompt = if current.is_empty() {
            character.prompt.clone()
        } else {
            format!("{}, {}", character.prompt, current)
        };
        if let Some(lora) = &character.default_lora {
            self.form.lora_path = Some(PathBuf::from(lora));
            self.form.lora_scale = character.lora_scale;
        }
        self.status = format!("Character '{}' applied.", character.name);
    }

    fn reload_presets(&mut self) {
        match self.ctx.library.list_presets() {
            Ok(presets) => self.presets = presets,
            Err(e) => warn!("Could not list presets: {}", e),
        }
    }

    fn reload_characters(&mut self) {
        match self.ctx.library.list_characters() {
            Ok(characters) => self.characters = characters,
            Err(e) => warn!("Could not list characters: {}", e),
        }
    }
}
