/// Favorites view: saved prompts and characters
use iced::widget::{button, column, row, scrollable, text, text_input, Space};
use iced::{Element, Length};

use super::{KamiApp, Message};

pub fn view(app: &KamiApp) -> Element<'_, Message> {
    let save = row![
        text_input("Favorite name (optional)", &app.favorite_name)
            .on_input(Message::FavoriteNameChanged)
            .on_submit(Message::SaveFavorite)
            .width(Length::Fill),
        button("★ Save current prompt").on_press(Message::SaveFavorite),
    ]
    .spacing(8);

    let mut list = column![].spacing(6);
    if app.favorites.is_empty() {
        list = list.push(text("No favorites saved."));
    }
    for (index, fav) in app.favorites.items().iter().enumerate() {
        let prompt: String = fav.prompt.chars().take(90).collect();
        list = list.push(
            row![
                column![text(&fav.name).size(15), text(prompt).size(12)]
                    .spacing(2)
                    .width(Length::Fill),
                button("Load").on_press(Message::LoadFavorite(index)),
                button("Update").on_press(Message::UpdateFavorite(index)),
                button("Delete").on_press(Message::DeleteFavorite(index)),
            ]
            .spacing(8)
            .align_y(iced::Alignment::Center),
        );
    }

    let character_form = row![
        text_input("Character name", &app.character_name)
            .on_input(Message::CharacterNameChanged)
            .width(Length::Fill),
        button("Save prompt + LoRA as character").on_press_maybe(
            (!app.character_name.trim().is_empty()).then_some(Message::SaveCharacter)
        ),
    ]
    .spacing(8);

    let mut characters = column![].spacing(6);
    for character in &app.characters {
        let lora = character
            .default_lora
            .as_deref()
            .map(|l| format!("{} @ {:.2}", l, character.lora_scale))
            .unwrap_or_else(|| "no LoRA".to_string());
        characters = characters.push(
            row![
                column![text(&character.name).size(15), text(lora).size(12)]
                    .spacing(2)
                    .width(Length::Fill),
                button("Use").on_press(Message::UseCharacter(character.name.clone())),
                button("Delete").on_press(Message::DeleteCharacter(character.name.clone())),
            ]
            .spacing(8)
            .align_y(iced::Alignment::Center),
        );
    }

    scrollable(
        column![
            text("Favorite prompts").size(20),
            save,
            list,
            Space::with_height(Length::Fixed(16.0)),
            text("Characters").size(20),
            character_form,
            characters,
        ]
        .spacing(12),
    )
    .height(Length::Fill)
    .into()
}
