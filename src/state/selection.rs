use std::collections::HashSet;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::store::schema::{IdSet, Level, Mode, Word};

/// Words that may be drawn next: level enabled, and not excluded by the
/// mode's progress set (`met` for ichigoichie, `learned` for repetition).
pub fn eligible_words(
    words: &[Word],
    enabled_levels: &[Level],
    mode: Mode,
    learned: &IdSet,
    met: &IdSet,
) -> Vec<Word> {
    let excluded: HashSet<&str> = match mode {
        Mode::Ichigoichie => met,
        Mode::Repetition => learned,
    }
    .iter()
    .map(String::as_str)
    .collect();
    words
        .iter()
        .filter(|w| enabled_levels.contains(&w.level))
        .filter(|w| !excluded.contains(w.uuid.as_str()))
        .cloned()
        .collect()
}

/// Uniform pick; `None` when the pool is empty.
pub fn choose<'a, R: Rng + ?Sized>(pool: &'a [Word], rng: &mut R) -> Option<&'a Word> {
    pool.choose(rng)
}
