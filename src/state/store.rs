use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rand::SeedableRng;
use rand::rngs::SmallRng;
use tracing::debug;

use crate::state::atom::StorageAtom;
use crate::state::reactive::{Computed, Signal, SubscriptionId};
use crate::state::selection;
use crate::state::sync::SyncListener;
use crate::store::StorageAdapter;
use crate::store::schema::{IdSet, Level, Mode, Settings, Theme, View, Word, keys};

/// All session state for one surface.
///
/// Built once at startup and shared by reference; it is never torn down
/// while the surface runs.
pub struct WordStore {
    words: Signal<Vec<Word>>,
    random_word: Signal<Option<Word>>,
    view: Signal<View>,
    learned: StorageAtom<IdSet>,
    met: StorageAtom<IdSet>,
    settings: StorageAtom<Settings>,
    enabled_levels: Computed<Vec<Level>>,
    eligible_words: Computed<Vec<Word>>,
    learned_words: Computed<Vec<Word>>,
    word_generation: AtomicU64,
    rng: Mutex<SmallRng>,
}

impl WordStore {
    pub fn new(storage: &StorageAdapter) -> Self {
        Self::with_rng(storage, SmallRng::from_entropy())
    }

    pub fn with_rng(storage: &StorageAdapter, rng: SmallRng) -> Self {
        let words: Signal<Vec<Word>> = Signal::new(Vec::new());
        let learned = StorageAtom::new(storage, keys::LEARNED, IdSet::new());
        let met = StorageAtom::new(storage, keys::MET, IdSet::new());
        let settings = StorageAtom::new(storage, keys::SETTINGS, Settings::default());

        let enabled_levels = {
            let s = settings.clone();
            Computed::new(&[&settings], move || s.read().enabled_levels())
        };

        let eligible_words = {
            let (w, l) = (words.clone(), enabled_levels.clone());
            let (s, lr, m) = (settings.clone(), learned.clone(), met.clone());
            Computed::new(
                &[&words, &enabled_levels, &settings, &learned, &met],
                move || {
                    let (mode, learned, met) = (s.read().mode, lr.read(), m.read());
                    l.with(|levels| {
                        w.with(|words| {
                            selection::eligible_words(words, levels, mode, &learned, &met)
                        })
                    })
                },
            )
        };

        let learned_words = {
            let (w, lr) = (words.clone(), learned.clone());
            Computed::new(&[&words, &learned], move || {
                let learned = lr.read();
                w.with(|words| {
                    learned
                        .iter()
                        .filter_map(|id| words.iter().find(|word| &word.uuid == id).cloned())
                        .collect::<Vec<_>>()
                })
            })
        };

        Self {
            words,
            random_word: Signal::new(None),
            view: Signal::new(View::default()),
            learned,
            met,
            settings,
            enabled_levels,
            eligible_words,
            learned_words,
            word_generation: AtomicU64::new(0),
            rng: Mutex::new(rng),
        }
    }

    /// Wait for all persisted cells to load.
    pub async fn load(&self) {
        tokio::join!(self.learned.load(), self.met.load(), self.settings.load());
    }

    /// Mirror changes made by other surfaces into this store.
    pub fn watch(&self, sync: &mut SyncListener, storage: &StorageAdapter) {
        sync.watch(storage, &self.learned);
        sync.watch(storage, &self.met);
        sync.watch(storage, &self.settings);
    }

    pub fn words(&self) -> Vec<Word> {
        self.words.get()
    }

    pub fn random_word(&self) -> Option<Word> {
        self.random_word.get()
    }

    pub fn view(&self) -> View {
        self.view.get()
    }

    pub fn learned(&self) -> IdSet {
        self.learned.read()
    }

    pub fn met(&self) -> IdSet {
        self.met.read()
    }

    pub fn settings(&self) -> Settings {
        self.settings.read()
    }

    pub fn enabled_levels(&self) -> Vec<Level> {
        self.enabled_levels.get()
    }

    pub fn eligible_words(&self) -> Vec<Word> {
        self.eligible_words.get()
    }

    pub fn learned_words(&self) -> Vec<Word> {
        self.learned_words.get()
    }

    pub fn word_generation(&self) -> u64 {
        self.word_generation.load(Ordering::SeqCst)
    }

    pub fn is_learned(&self, id: &str) -> bool {
        self.learned.read().contains(id)
    }

    pub fn random_word_cell(&self) -> &Signal<Option<Word>> {
        &self.random_word
    }

    /// Call `on_change` whenever anything a view renders from changes.
    pub fn subscribe_all(&self, on_change: impl Fn() + Send + Sync + 'static) -> Vec<SubscriptionId> {
        let f = Arc::new(on_change);
        let (a, b, c, d, e) = (f.clone(), f.clone(), f.clone(), f.clone(), f);
        vec![
            self.words.subscribe(move |_| a()),
            self.random_word.subscribe(move |_| b()),
            self.view.subscribe(move |_| c()),
            self.learned.subscribe(move |_| d()),
            self.settings.subscribe(move |_| e()),
        ]
    }

    pub fn set_words(&self, words: Vec<Word>) {
        debug!(count = words.len(), "installing word catalog");
        self.words.set(words);
    }

    pub fn set_view(&self, view: View) {
        self.view.set(view);
    }

    pub fn set_mode(&self, mode: Mode) {
        self.settings.update(|s| s.mode = mode);
    }

    pub fn set_romaji(&self, romaji: bool) {
        self.settings.update(|s| s.romaji = romaji);
    }

    pub fn set_theme(&self, theme: Theme) {
        self.settings.update(|s| s.theme = theme);
    }

    /// Flip one level. If that hides the word on screen, draw another.
    pub fn toggle_level(&self, level: Level) {
        self.settings.update(|s| s.toggle_level(level));

        let hidden = self
            .random_word
            .with(|w| w.as_ref().is_some_and(|w| !self.enabled_levels.with(|l| l.contains(&w.level))));
        if hidden {
            self.pick_random_word();
        }
    }

    pub fn mark_learned(&self, id: &str) {
        if self.learned.read().contains(id) {
            return;
        }
        self.learned.update(|set| {
            set.insert(id.to_string());
        });
    }

    pub fn unmark_learned(&self, id: &str) {
        if !self.learned.read().contains(id) {
            return;
        }
        self.learned.update(|set| {
            set.remove(id);
        });
    }

    /// Draw uniformly from the eligible pool. An empty pool clears the
    /// current word, which views render as "nothing left".
    pub fn pick_random_word(&self) -> Option<Word> {
        let picked = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            self.eligible_words
                .with(|pool| selection::choose(pool, &mut *rng).cloned())
        };
        self.show(picked.clone());
        picked
    }

    /// Install a word fetched from the random-word endpoint, unless a newer
    /// word was shown since `generation` was read.
    pub fn offer_word(&self, generation: u64, word: Word) -> bool {
        if self.word_generation() != generation {
            debug!(uuid = %word.uuid, "dropping superseded word");
            return false;
        }
        self.show(Some(word));
        true
    }

    /// Forget learned and met words, persisted copies included.
    pub fn reset_progress(&self) {
        self.learned.remove();
        self.met.remove();
    }

    fn show(&self, word: Option<Word>) {
        self.word_generation.fetch_add(1, Ordering::SeqCst);
        let met_id = word
            .as_ref()
            .filter(|_| self.settings.read().mode == Mode::Ichigoichie)
            .map(|w| w.uuid.clone());
        self.random_word.set(word);
        if let Some(id) = met_id {
            if !self.met.read().contains(&id) {
                self.met.update(|met| {
                    met.insert(id);
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn word(uuid: &str, level: u8) -> Word {
        Word {
            uuid: uuid.to_string(),
            word: uuid.to_string(),
            furigana: String::new(),
            romaji: None,
            meaning: format!("meaning of {uuid}"),
            level: Level::new(level).unwrap(),
        }
    }

    fn level(n: u8) -> Level {
        Level::new(n).unwrap()
    }

    async fn loaded_store(storage: &StorageAdapter) -> WordStore {
        let store = WordStore::with_rng(storage, SmallRng::seed_from_u64(1));
        store.load().await;
        store
    }

    fn count_changes<T: Clone + PartialEq + Send + Sync + 'static>(
        signal: &Signal<T>,
    ) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        signal.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[tokio::test]
    async fn test_scenario_single_enabled_word() {
        let storage = StorageAdapter::memory();
        let store = loaded_store(&storage).await;
        store.set_words(vec![word("a", 1), word("b", 2)]);
        store.toggle_level(level(2));
        store.toggle_level(level(3));
        store.toggle_level(level(4));
        store.toggle_level(level(5));

        let eligible: Vec<String> = store.eligible_words().into_iter().map(|w| w.uuid).collect();
        assert_eq!(eligible, vec!["a"]);

        let picked = store.pick_random_word().unwrap();
        assert_eq!(picked.uuid, "a");
        assert_eq!(store.met(), IdSet::from(["a"]));
        assert!(store.eligible_words().is_empty());
    }

    #[tokio::test]
    async fn test_pick_on_empty_pool_clears_word() {
        let storage = StorageAdapter::memory();
        let store = loaded_store(&storage).await;

        assert!(store.pick_random_word().is_none());
        assert!(store.random_word().is_none());

        store.set_words(vec![word("a", 1)]);
        store.pick_random_word();
        assert!(store.random_word().is_some());

        // The only word is now met: nothing left to draw.
        assert!(store.pick_random_word().is_none());
        assert!(store.random_word().is_none());
    }

    #[tokio::test]
    async fn test_repetition_mode_does_not_touch_met() {
        let storage = StorageAdapter::memory();
        let store = loaded_store(&storage).await;
        store.set_mode(Mode::Repetition);
        store.set_words(vec![word("a", 1)]);

        for _ in 0..3 {
            assert_eq!(store.pick_random_word().unwrap().uuid, "a");
        }
        assert!(store.met().is_empty());

        store.mark_learned("a");
        assert!(store.pick_random_word().is_none());
    }

    #[tokio::test]
    async fn test_mode_switch_changes_only_exclusion_set() {
        let storage = StorageAdapter::memory();
        let store = loaded_store(&storage).await;
        store.set_words(vec![word("a", 1), word("b", 1), word("c", 1)]);
        store.mark_learned("a");
        store.offer_word(store.word_generation(), word("b", 1));
        assert_eq!(store.met(), IdSet::from(["b"]));

        let uuids = |s: &WordStore| -> Vec<String> {
            s.eligible_words().into_iter().map(|w| w.uuid).collect()
        };
        assert_eq!(uuids(&store), vec!["a", "c"]);

        store.set_mode(Mode::Repetition);
        assert_eq!(uuids(&store), vec!["b", "c"]);
        assert_eq!(store.learned(), IdSet::from(["a"]));
        assert_eq!(store.met(), IdSet::from(["b"]));
    }

    #[tokio::test]
    async fn test_toggle_level_flips_exactly_one() {
        let storage = StorageAdapter::memory();
        let store = loaded_store(&storage).await;
        let before = store.settings();

        store.toggle_level(level(4));
        let after = store.settings();

        let flipped: Vec<u8> = before
            .levels
            .iter()
            .zip(after.levels.iter())
            .filter(|(b, a)| b.enabled != a.enabled)
            .map(|(b, _)| b.level.get())
            .collect();
        assert_eq!(flipped, vec![4]);
        assert_eq!(store.enabled_levels(), vec![level(1), level(2), level(3), level(5)]);
    }

    #[tokio::test]
    async fn test_toggle_level_hiding_current_word_repicks_once() {
        let storage = StorageAdapter::memory();
        let store = loaded_store(&storage).await;
        store.set_mode(Mode::Repetition);
        store.set_words(vec![word("a", 1), word("b", 2)]);
        store.offer_word(store.word_generation(), word("a", 1));

        let changes = count_changes(store.random_word_cell());
        let generation = store.word_generation();

        store.toggle_level(level(1));
        assert_eq!(store.word_generation(), generation + 1);
        assert_eq!(changes.load(Ordering::SeqCst), 1);
        assert_eq!(store.random_word().unwrap().uuid, "b");
    }

    #[tokio::test]
    async fn test_toggle_level_keeping_current_word_does_not_repick() {
        let storage = StorageAdapter::memory();
        let store = loaded_store(&storage).await;
        store.set_words(vec![word("a", 1), word("b", 2)]);
        store.offer_word(store.word_generation(), word("a", 1));
        let generation = store.word_generation();

        store.toggle_level(level(2));
        assert_eq!(store.word_generation(), generation);
        assert_eq!(store.random_word().unwrap().uuid, "a");
    }

    #[tokio::test]
    async fn test_mark_learned_is_idempotent() {
        let storage = StorageAdapter::memory();
        let store = loaded_store(&storage).await;

        store.mark_learned("a");
        store.mark_learned("b");
        store.mark_learned("a");
        assert_eq!(store.learned(), IdSet::from(["b", "a"]));

        store.unmark_learned("a");
        store.unmark_learned("zzz");
        assert_eq!(store.learned(), IdSet::from(["b"]));

        storage.flush().await;
        assert_eq!(storage.get(keys::LEARNED).await, Some(json!(["b"])));
    }

    #[tokio::test]
    async fn test_offer_word_drops_superseded_result() {
        let storage = StorageAdapter::memory();
        let store = loaded_store(&storage).await;
        store.set_words(vec![word("a", 1), word("b", 1)]);

        let stale = store.word_generation();
        store.pick_random_word();

        assert!(!store.offer_word(stale, word("zzz", 1)));
        assert_ne!(store.random_word().unwrap().uuid, "zzz");
        assert!(store.offer_word(store.word_generation(), word("zzz", 1)));
        assert_eq!(store.random_word().unwrap().uuid, "zzz");
    }

    #[tokio::test]
    async fn test_learned_words_follow_catalog() {
        let storage = StorageAdapter::memory();
        let store = loaded_store(&storage).await;
        store.mark_learned("b");
        store.mark_learned("ghost");
        assert!(store.learned_words().is_empty());

        store.set_words(vec![word("a", 1), word("b", 2)]);
        let learned: Vec<String> = store.learned_words().into_iter().map(|w| w.uuid).collect();
        assert_eq!(learned, vec!["b"]);
    }

    #[tokio::test]
    async fn test_reset_progress_removes_keys() {
        let storage = StorageAdapter::memory();
        let store = loaded_store(&storage).await;
        store.set_words(vec![word("a", 1)]);
        store.pick_random_word();
        store.mark_learned("a");
        storage.flush().await;
        assert!(storage.get(keys::MET).await.is_some());

        store.reset_progress();
        assert!(store.learned().is_empty());
        assert!(store.met().is_empty());

        storage.flush().await;
        assert_eq!(storage.get(keys::LEARNED).await, None);
        assert_eq!(storage.get(keys::MET).await, None);
    }

    #[tokio::test]
    async fn test_loads_persisted_progress() {
        let storage = StorageAdapter::memory();
        storage.set(keys::MET, json!(["a"])).await;
        storage
            .set(keys::SETTINGS, json!({ "mode": "ichigoichie", "romaji": true }))
            .await;

        let store = loaded_store(&storage).await;
        store.set_words(vec![word("a", 3), word("b", 3)]);

        assert!(store.settings().romaji);
        assert_eq!(store.settings().levels.len(), 5);
        let eligible: Vec<String> = store.eligible_words().into_iter().map(|w| w.uuid).collect();
        assert_eq!(eligible, vec!["b"]);
    }

    #[tokio::test]
    async fn test_subscribe_all_sees_view_and_settings() {
        let storage = StorageAdapter::memory();
        let store = loaded_store(&storage).await;
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = hits.clone();
            store.subscribe_all(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        store.set_view(View::Book);
        store.set_theme(Theme::Dark);
        store.set_romaji(true);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
