/// Gallery view: filtered, paginated thumbnail grid with a detail panel.
use iced::widget::{button, column, container, image, pick_list, row, scrollable, text, text_input, Space};
use iced::{Element, Length};
use iced_aw::Wrap;
use std::collections::HashMap;
use std::path::PathBuf;

use super::{KamiApp, Message};
use crate::state::data::{ImageQuery, ImageRecord, SortKey, ALL_MODELS};

pub const PAGE_SIZE: usize = 50;
const TILE: f32 = 160.0;

#[derive(Debug, Default)]
pub struct GalleryState {
    pub search: String,
    pub sort: SortKey,
    /// "All Models" or a model name
    pub model_filter: String,
    pub models: Vec<String>,
    pub records: Vec<ImageRecord>,
    pub page: usize,
    pub thumbnails: HashMap<i64, PathBuf>,
    pub selected: Option<i64>,
}

impl GalleryState {
    pub fn query(&self) -> ImageQuery {
        ImageQuery::new(self.search.clone(), self.sort, self.model_filter.clone())
    }

    pub fn page_count(&self) -> usize {
        self.records.len().div_ceil(PAGE_SIZE).max(1)
    }

    pub fn page_records(&self) -> &[ImageRecord] {
        let start = (self.page * PAGE_SIZE).min(self.records.len());
        let end = (start + PAGE_SIZE).min(self.records.len());
        &self.records[start..end]
    }

    /// Replace the result set, keeping the page and selection when still valid
    pub fn set_records(&mut self, records: Vec<ImageRecord>) {
        self.records = records;
        self.page = self.page.min(self.page_count() - 1);
        if let Some(id) = self.selected {
            if !self.records.iter().any(|r| r.id == id) {
                self.selected = None;
            }
        }
    }

    pub fn next_page(&mut self) {
        if self.page + 1 < self.page_count() {
            self.page += 1;
        }
    }

    pub fn prev_page(&mut self) {
        self.page = self.page.saturating_sub(1);
    }

    pub fn record(&self, id: i64) -> Option<&ImageRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Records on the current page without a cached thumbnail
    pub fn missing_thumbnails(&self) -> Vec<(i64, PathBuf)> {
        self.page_records()
            .iter()
            .filter(|r| !self.thumbnails.contains_key(&r.id))
            .map(|r| (r.id, PathBuf::from(&r.path)))
            .collect()
    }

    /// Model picker entries, "All Models" first
    pub fn model_options(&self) -> Vec<String> {
        let mut options = vec![ALL_MODELS[1].to_string()];
        options.extend(self.models.iter().cloned());
        options
    }
}

pub fn view(app: &KamiApp) -> Element<'_, Message> {
    let gallery = &app.gallery;

    let filters = row![
        text_input("Search prompt, seed or model...", &gallery.search)
            .on_input(Message::SearchChanged)
            .on_submit(Message::RefreshGallery)
            .width(Length::Fill),
        pick_list(&SortKey::ALL[..], Some(gallery.sort), Message::SortSelected),
        pick_list(
            gallery.model_options(),
            Some(if gallery.model_filter.is_empty() {
                ALL_MODELS[1].to_string()
            } else {
                gallery.model_filter.clone()
            }),
            Message::ModelFilterSelected,
        ),
        button("Search").on_press(Message::RefreshGallery),
        button("Rescan").on_press(Message::Rescan),
    ]
    .spacing(8)
    .align_y(iced::Alignment::Center);

    let tiles: Vec<Element<'_, Message>> = gallery
        .page_records()
        .iter()
        .map(|record| {
            let thumb: Element<'_, Message> = match gallery.thumbnails.get(&record.id) {
                Some(path) => image(image::Handle::from_path(path))
                    .width(Length::Fixed(TILE))
                    .height(Length::Fixed(TILE))
                    .into(),
                None => container(text("…"))
                    .width(Length::Fixed(TILE))
                    .height(Length::Fixed(TILE))
                    .center_x(Length::Fixed(TILE))
                    .center_y(Length::Fixed(TILE))
                    .into(),
            };
            let marker = if record.favorite { "★ " } else { "" };
            let caption: String = record.prompt.chars().take(22).collect();

            button(column![thumb, text(format!("{}{}", marker, caption)).size(11)].spacing(2))
                .on_press(Message::SelectImage(record.id))
                .padding(4)
                .into()
        })
        .collect();

    let grid: Element<'_, Message> = if tiles.is_empty() {
        text("No images yet. Generate something or rescan the output folder.").into()
    } else {
        Wrap::with_elements(tiles).spacing(8.0).line_spacing(8.0).into()
    };

    let pager = row![
        button("◀ Prev").on_press_maybe((gallery.page > 0).then_some(Message::PrevPage)),
        text(format!(
            "Page {} / {} ({} images)",
            gallery.page + 1,
            gallery.page_count(),
            gallery.records.len()
        )),
        button("Next ▶").on_press_maybe((gallery.page + 1 < gallery.page_count()).then_some(Message::NextPage)),
    ]
    .spacing(12)
    .align_y(iced::Alignment::Center);

    let mut body = row![scrollable(grid).width(Length::FillPortion(3)).height(Length::Fill)].spacing(16);
    if let Some(record) = gallery.selected.and_then(|id| gallery.record(id)) {
        body = body.push(detail(record));
    }

    column![filters, body, pager].spacing(12).into()
}

fn detail(record: &ImageRecord) -> Element<'_, Message> {
    let created = record
        .created_at()
        .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    let favorite_label = if record.favorite { "★ Unfavorite" } else { "☆ Favorite" };

    let panel = column![
        row![
            text(record.file_name()).size(14).width(Length::Fill),
            button("✕").on_press(Message::CloseDetail),
        ],
        image(image::Handle::from_path(&record.path)).width(Length::Fill),
        text("Prompt").size(12),
        text(&record.prompt).size(14),
        text("Negative").size(12),
        text(&record.negative_prompt).size(14),
        text(format!(
            "Model: {}\nSteps: {} | CFG: {} | Seed: {}\n{}",
            record.model, record.steps, record.cfg, record.seed, created
        ))
        .size(12),
        Space::with_height(Length::Fixed(8.0)),
        row![
            button("Load params").on_press(Message::LoadParams(record.id)),
            button(favorite_label).on_press(Message::ToggleFavorite(record.id)),
            button("Delete").on_press(Message::DeleteImage(record.id)),
        ]
        .spacing(8),
    ]
    .spacing(6);

    scrollable(panel).width(Length::FillPortion(2)).into()
}
