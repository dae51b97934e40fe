//! Plain-text views of the store.

use std::fmt::Write;

use crate::state::WordStore;
use crate::store::schema::{Settings, View, Word};

pub fn view(store: &WordStore) -> String {
    match store.view() {
        View::Word => word_card(store),
        View::Book => book(&store.learned_words()),
        View::Settings => settings(&store.settings()),
    }
}

pub fn word_card(store: &WordStore) -> String {
    let Some(word) = store.random_word() else {
        return exhausted();
    };
    let mut out = String::new();
    if !word.furigana.is_empty() {
        let _ = writeln!(out, "{}", word.furigana);
    }
    if store.settings().romaji {
        if let Some(romaji) = &word.romaji {
            let _ = writeln!(out, "{romaji}");
        }
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "    {}", word.word);
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", word.meaning);
    let mark = if store.is_learned(&word.uuid) {
        "learned"
    } else {
        "not learned"
    };
    let _ = writeln!(out, "[{}] [{mark}]", word.level);
    out
}

pub fn exhausted() -> String {
    ":)\nYou met all the words\nChange the Level or Mode to see more words\n".to_string()
}

pub fn failure() -> String {
    ":(\nSomething wrong happened\nTry to refresh the page\n".to_string()
}

pub fn book(learned: &[Word]) -> String {
    if learned.is_empty() {
        return "No learned words yet\n".to_string();
    }
    let mut out = format!("Learned words ({})\n", learned.len());
    for word in learned {
        let _ = writeln!(out, "  {}  {}  {}", word.level, word.word, word.meaning);
    }
    out
}

pub fn settings(settings: &Settings) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "mode:   {}", settings.mode.as_str());
    let _ = writeln!(out, "romaji: {}", on_off(settings.romaji));
    let _ = writeln!(out, "theme:  {}", settings.theme.as_str());
    let levels: Vec<String> = settings
        .levels
        .iter()
        .map(|l| format!("{} {}", l.level, on_off(l.enabled)))
        .collect();
    let _ = writeln!(out, "levels: {}", levels.join(", "));
    out
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}
