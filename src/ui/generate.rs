/// Generate view: the prompt form, toggles, style/LoRA/preset pickers and
/// the progress of the running generation.
use iced::widget::{button, checkbox, column, container, image, pick_list, progress_bar, row, slider, text, text_input, Space};
use iced::{Element, Length};
use std::path::PathBuf;

use super::{KamiApp, Message};
use crate::engine::GenerationRequest;
use crate::state::params::{parse_seed, GenerationParams};
use crate::state::session::SessionConfig;

/// Editable copy of the session settings; numeric fields stay text until submit
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateForm {
    pub prompt: String,
    pub negative: String,
    pub steps: String,
    pub guidance: String,
    pub seed: String,
    pub use_refiner: bool,
    pub pony_mode: bool,
    pub use_freeu: bool,
    pub style: String,
    pub model: String,
    pub lora_path: Option<PathBuf>,
    pub lora_scale: f32,
}

impl GenerateForm {
    pub fn from_session(session: &SessionConfig) -> Self {
        Self {
            prompt: session.prompt.clone(),
            negative: session.neg_prompt.clone(),
            steps: session.steps.to_string(),
            guidance: session.guidance.to_string(),
            seed: session.seed.map(|s| s.to_string()).unwrap_or_default(),
            use_refiner: session.use_refiner,
            pony_mode: session.pony_mode,
            use_freeu: session.use_freeu,
            style: session.current_style.clone(),
            model: session.model_path.clone(),
            lora_path: session.lora_path.clone(),
            lora_scale: session.lora_scale,
        }
    }

    /// Validate the form and write it into `session`
    pub fn apply_to(&self, session: &mut SessionConfig) -> Result<(), String> {
        if self.prompt.trim().is_empty() {
            return Err("Enter a prompt first".to_string());
        }
        let steps: u32 = self
            .steps
            .trim()
            .parse()
            .ok()
            .filter(|s| *s > 0)
            .ok_or_else(|| format!("Invalid steps: {}", self.steps))?;
        let guidance: f32 = self
            .guidance
            .trim()
            .parse()
            .map_err(|_| format!("Invalid guidance: {}", self.guidance))?;

        session.prompt = self.prompt.trim().to_string();
        session.neg_prompt = self.negative.clone();
        session.steps = steps;
        session.guidance = guidance;
        session.seed = parse_seed(&self.seed);
        session.use_refiner = self.use_refiner;
        session.pony_mode = self.pony_mode;
        session.use_freeu = self.use_freeu;
        session.current_style = self.style.clone();
        session.model_path = self.model.clone();
        session.lora_path = self.lora_path.clone();
        session.lora_scale = self.lora_scale;
        Ok(())
    }

    /// Fill the form from stored parameters (gallery "load params", presets)
    pub fn load_params(&mut self, params: &GenerationParams) {
        self.prompt = params.prompt.clone();
        self.negative = params.negative_prompt.clone();
        self.steps = params.steps.to_string();
        self.guidance = params.guidance_scale.to_string();
        self.seed = params.seed.map(|s| s.to_string()).unwrap_or_default();
        self.use_refiner = params.use_refiner;
        self.use_freeu = params.freeu.is_some();
        if let Some(lora) = &params.lora {
            self.lora_path = Some(lora.path.clone());
            self.lora_scale = lora.scale;
        }
    }

    /// Parameters for a preset; invalid numbers fall back to defaults
    pub fn to_params(&self) -> GenerationParams {
        let mut session = SessionConfig::default();
        session.lora_path = self.lora_path.clone();
        session.lora_scale = self.lora_scale;
        session.use_freeu = self.use_freeu;

        let mut params = session.to_params(&self.prompt);
        params.negative_prompt = self.negative.clone();
        params.steps = self.steps.trim().parse().unwrap_or(params.steps);
        params.guidance_scale = self.guidance.trim().parse().unwrap_or(params.guidance_scale);
        params.seed = parse_seed(&self.seed);
        params.use_refiner = self.use_refiner;
        params
    }

    /// Validated request, updating `session` along the way
    pub fn to_request(&self, session: &mut SessionConfig) -> Result<GenerationRequest, String> {
        self.apply_to(session)?;
        Ok(GenerationRequest::from_session(session, &session.prompt))
    }
}

pub fn view(app: &KamiApp) -> Element<'_, Message> {
    let form = &app.form;

    let prompt = column![
        text("Prompt").size(14),
        text_input("Describe the image...", &form.prompt)
            .on_input(Message::PromptChanged)
            .on_submit(Message::Generate)
            .padding(8),
        text("Negative prompt").size(14),
        text_input("Things to avoid", &form.negative)
            .on_input(Message::NegativeChanged)
            .padding(8),
    ]
    .spacing(6);

    let numbers = row![
        column![text("Steps").size(14), text_input("30", &form.steps).on_input(Message::StepsChanged)]
            .spacing(4)
            .width(Length::FillPortion(1)),
        column![text("CFG").size(14), text_input("7.0", &form.guidance).on_input(Message::GuidanceChanged)]
            .spacing(4)
            .width(Length::FillPortion(1)),
        column![text("Seed").size(14), text_input("Random", &form.seed).on_input(Message::SeedChanged)]
            .spacing(4)
            .width(Length::FillPortion(2)),
    ]
    .spacing(12);

    let toggles = row![
        checkbox("Refiner", form.use_refiner).on_toggle(Message::RefinerToggled),
        checkbox("Pony mode", form.pony_mode).on_toggle(Message::PonyToggled),
        checkbox("FreeU", form.use_freeu).on_toggle(Message::FreeuToggled),
        Space::with_width(Length::Fill),
        text("Style").size(14),
        pick_list(app.style_names.clone(), Some(form.style.clone()), Message::StyleSelected),
    ]
    .spacing(16)
    .align_y(iced::Alignment::Center);

    let lora_label = form
        .lora_path
        .as_ref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "None".to_string());

    let weights = column![
        row![
            text(format!("Model: {}", form.model)).size(14).width(Length::Fill),
            button("Choose model").on_press(Message::PickModel),
        ]
        .spacing(8)
        .align_y(iced::Alignment::Center),
        row![
            text(format!("LoRA: {}", lora_label)).size(14).width(Length::Fill),
            text(format!("{:.2}", form.lora_scale)).size(14),
            slider(0.0..=1.0, form.lora_scale, Message::LoraScaleChanged)
                .step(0.05)
                .width(Length::Fixed(160.0)),
            button("Choose LoRA").on_press(Message::PickLora),
            button("Clear").on_press_maybe(form.lora_path.as_ref().map(|_| Message::ClearLora)),
        ]
        .spacing(8)
        .align_y(iced::Alignment::Center),
    ]
    .spacing(6);

    let preset_names: Vec<String> = app.presets.iter().map(|p| p.name.clone()).collect();
    let presets = row![
        text("Preset").size(14),
        pick_list(preset_names, None::<String>, Message::PresetSelected).placeholder("Load preset..."),
        text_input("Preset name", &app.preset_name)
            .on_input(Message::PresetNameChanged)
            .width(Length::Fixed(180.0)),
        button("Save preset").on_press_maybe((!app.preset_name.trim().is_empty()).then_some(Message::SavePreset)),
        button("Delete").on_press_maybe(
            (!app.preset_name.trim().is_empty()).then(|| Message::DeletePreset(app.preset_name.trim().to_string()))
        ),
    ]
    .spacing(8)
    .align_y(iced::Alignment::Center);

    let actions = if app.generating {
        row![button("Cancel").on_press(Message::Cancel)]
    } else {
        row![
            button("Generate").on_press(Message::Generate).padding(10),
            button("🎲 Image of the day").on_press(Message::ImageOfTheDay).padding(10),
            button("★ Save as favorite").on_press(Message::SaveFavorite).padding(10),
        ]
    }
    .spacing(12);

    let mut content = column![prompt, numbers, toggles, weights, presets, actions].spacing(16);

    if let Some((step, total)) = app.progress {
        content = content.push(
            column![
                progress_bar(0.0..=total.max(1) as f32, step as f32).height(Length::Fixed(12.0)),
                text(format!("Step {}/{}", step, total)).size(12),
            ]
            .spacing(4),
        );
    }

    if let Some(path) = &app.last_image {
        content = content.push(
            container(image(image::Handle::from_path(path)).width(Length::Fixed(512.0)))
                .center_x(Length::Fill),
        );
    }

    content.into()
}
