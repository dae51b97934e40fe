use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SETTINGS_VERSION: &str = "0.0.1";

/// Storage keys, namespaced so they can share an area with other data.
pub mod keys {
    pub const WORDS: &str = "tab-of-words-words";
    pub const LEARNED: &str = "tab-of-words-learned";
    pub const MET: &str = "tab-of-words-met";
    pub const SETTINGS: &str = "tab-of-words-settings";
    pub const LAST_FETCH: &str = "tab-of-words-last-fetch";

    /// Keys mirrored between surfaces.
    pub const SYNCED: &[&str] = &[LEARNED, MET, SETTINGS];
}

pub type Id = String;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("JLPT level must be between 1 and 5, got {0}")]
pub struct InvalidLevel(pub u8);

/// JLPT tier. 1 is the hardest (N1), 5 the easiest (N5).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Level(u8);

impl Level {
    pub const ALL: [Level; 5] = [Level(1), Level(2), Level(3), Level(4), Level(5)];

    pub fn new(value: u8) -> Result<Self, InvalidLevel> {
        if (1..=5).contains(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidLevel(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Level {
    type Error = InvalidLevel;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Level::new(value)
    }
}

impl From<Level> for u8 {
    fn from(level: Level) -> Self {
        level.0
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Word {
    pub uuid: Id,
    pub word: String,
    #[serde(default)]
    pub furigana: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub romaji: Option<String>,
    #[serde(default)]
    pub meaning: String,
    pub level: Level,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSetting {
    pub level: Level,
    pub enabled: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Every word is shown once; shown words land in `met`.
    #[default]
    Ichigoichie,
    /// Words keep coming back until marked learned.
    Repetition,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Ichigoichie => "ichigoichie",
            Mode::Repetition => "repetition",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Mode::Ichigoichie => Mode::Repetition,
            Mode::Repetition => Mode::Ichigoichie,
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ichigoichie" => Ok(Mode::Ichigoichie),
            "repetition" => Ok(Mode::Repetition),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(format!("unknown theme '{other}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum View {
    #[default]
    Word,
    Book,
    Settings,
}

/// User settings, persisted as a single object.
///
/// Deserialization goes through [`RawSettings`] so that stale or partial
/// objects load with defaults filled in and a complete level list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawSettings")]
pub struct Settings {
    pub version: String,
    pub mode: Mode,
    pub romaji: bool,
    pub levels: Vec<LevelSetting>,
    pub theme: Theme,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION.to_string(),
            mode: Mode::default(),
            romaji: false,
            levels: default_levels(),
            theme: Theme::default(),
        }
    }
}

pub fn default_levels() -> Vec<LevelSetting> {
    Level::ALL
        .iter()
        .map(|&level| LevelSetting {
            level,
            enabled: true,
        })
        .collect()
}

impl Settings {
    pub fn enabled_levels(&self) -> Vec<Level> {
        self.levels
            .iter()
            .filter(|l| l.enabled)
            .map(|l| l.level)
            .collect()
    }

    pub fn is_enabled(&self, level: Level) -> bool {
        self.levels
            .iter()
            .any(|l| l.level == level && l.enabled)
    }

    pub fn set_level(&mut self, level: Level, enabled: bool) {
        if let Some(entry) = self.levels.iter_mut().find(|l| l.level == level) {
            entry.enabled = enabled;
        }
    }

    pub fn toggle_level(&mut self, level: Level) {
        if let Some(entry) = self.levels.iter_mut().find(|l| l.level == level) {
            entry.enabled = !entry.enabled;
        }
    }
}

#[derive(Deserialize)]
struct RawLevelSetting {
    level: u8,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Deserialize)]
struct RawSettings {
    version: Option<String>,
    mode: Option<Mode>,
    romaji: Option<bool>,
    levels: Option<Vec<RawLevelSetting>>,
    theme: Option<Theme>,
}

impl From<RawSettings> for Settings {
    fn from(raw: RawSettings) -> Self {
        let stored = raw.levels.unwrap_or_default();
        // Rebuild the full 1..=5 set; first occurrence of a level wins.
        let levels = Level::ALL
            .iter()
            .map(|&level| LevelSetting {
                level,
                enabled: stored
                    .iter()
                    .find(|l| l.level == level.get())
                    .map(|l| l.enabled)
                    .unwrap_or(true),
            })
            .collect();

        Self {
            version: raw.version.unwrap_or_else(|| SETTINGS_VERSION.to_string()),
            mode: raw.mode.unwrap_or_default(),
            romaji: raw.romaji.unwrap_or(false),
            levels,
            theme: raw.theme.unwrap_or_default(),
        }
    }
}

/// Ordered set of word ids, most recent first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Id>", into = "Vec<Id>")]
pub struct IdSet(Vec<Id>);

impl IdSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.iter().any(|x| x == id)
    }

    /// Prepend `id`. Returns false if it was already present.
    pub fn insert(&mut self, id: Id) -> bool {
        if self.contains(&id) {
            return false;
        }
        self.0.insert(0, id);
        true
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|x| x != id);
        self.0.len() != before
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Id> {
        self.0.iter()
    }
}

impl From<Vec<Id>> for IdSet {
    fn from(ids: Vec<Id>) -> Self {
        let mut set = Vec::with_capacity(ids.len());
        for id in ids {
            if !set.contains(&id) {
                set.push(id);
            }
        }
        Self(set)
    }
}

impl From<IdSet> for Vec<Id> {
    fn from(set: IdSet) -> Self {
        set.0
    }
}

impl<const N: usize> From<[&str; N]> for IdSet {
    fn from(ids: [&str; N]) -> Self {
        ids.iter().map(|s| s.to_string()).collect::<Vec<_>>().into()
    }
}
