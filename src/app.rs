use std::io;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::catalog::messaging::{BackgroundHandle, spawn_background};
use crate::catalog::{CachedCatalog, WordSource};
use crate::config::Config;
use crate::event::{AppEvent, ChangeNotifier, EventHandler};
use crate::render;
use crate::state::WordStore;
use crate::state::sync::SyncListener;
use crate::store::StorageAdapter;
use crate::store::schema::{IdSet, Level, Mode, Settings, Theme, View, keys};
use crate::store::watcher::DiskWatcher;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Next,
    Random,
    Learn,
    Unlearn,
    ToggleLevel(Level),
    SwitchMode,
    ToggleRomaji,
    ToggleTheme,
    Show(View),
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        let cmd = match line.trim() {
            "n" | "" => Command::Next,
            "r" => Command::Random,
            "l" => Command::Learn,
            "u" => Command::Unlearn,
            "m" => Command::SwitchMode,
            "k" => Command::ToggleRomaji,
            "t" => Command::ToggleTheme,
            "w" => Command::Show(View::Word),
            "b" => Command::Show(View::Book),
            "s" => Command::Show(View::Settings),
            "q" => Command::Quit,
            other => {
                let level = other.parse::<u8>().ok()?;
                Command::ToggleLevel(Level::new(level).ok()?)
            }
        };
        Some(cmd)
    }
}

pub const HELP: &str = "n next  r random  l learned  u unlearn  1-5 level  m mode  k romaji  t theme  w/b/s view  q quit";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Screen {
    Loading,
    Ready,
    Failed,
}

/// The tab surface: store, sync wiring and the background catalog.
pub struct App<S> {
    pub config: Config,
    pub storage: StorageAdapter,
    pub store: Arc<WordStore>,
    pub screen: Screen,
    pub should_quit: bool,
    source: Arc<S>,
    background: BackgroundHandle,
    sync: SyncListener,
    watcher: Option<JoinHandle<()>>,
}

impl<S: WordSource + 'static> App<S> {
    pub fn new(config: Config, storage: StorageAdapter, source: S) -> Self {
        let source = Arc::new(source);
        let catalog = CachedCatalog::new(Arc::clone(&source), storage.for_surface())
            .with_freshness(config.cache_freshness());
        let background = spawn_background(catalog);
        Self::with_background(config, storage, source, background)
    }

    pub fn with_background(
        config: Config,
        storage: StorageAdapter,
        source: Arc<S>,
        background: BackgroundHandle,
    ) -> Self {
        Self {
            store: Arc::new(WordStore::new(&storage)),
            config,
            storage,
            screen: Screen::Loading,
            should_quit: false,
            source,
            background,
            sync: SyncListener::new(),
            watcher: None,
        }
    }

    /// Load persisted progress, start mirroring other surfaces, ask the
    /// background for the catalog and show the first word.
    pub async fn start(&mut self) {
        let mut watcher = DiskWatcher::new(self.storage.clone(), keys::SYNCED);
        watcher.prime().await;
        self.store.load().await;
        self.store.watch(&mut self.sync, &self.storage);
        self.watcher = watcher.spawn(self.config.sync_poll_interval());

        let response = self.background.load_words().await;
        match response.data {
            Some(words) if response.success => {
                self.store.set_words(words);
                self.store.pick_random_word();
                self.screen = Screen::Ready;
            }
            _ => {
                error!(
                    "catalog unavailable: {}",
                    response.error.as_deref().unwrap_or("no data")
                );
                self.screen = Screen::Failed;
            }
        }
    }

    pub fn subscribe(&self, notifier: ChangeNotifier) {
        self.store.subscribe_all(move || notifier.notify());
    }

    /// Drive the tab from `events` until the user quits or input closes.
    /// Returns as soon as quitting is decided, without waiting for the
    /// input source to close.
    pub async fn run(
        &mut self,
        events: &mut EventHandler,
        mut draw: impl FnMut(&str) -> io::Result<()>,
    ) -> io::Result<()> {
        while !self.should_quit {
            match events.next().await {
                AppEvent::Input(line) => match Command::parse(&line) {
                    Some(cmd) => self.handle_command(cmd),
                    None => draw(&format!("{HELP}\n"))?,
                },
                AppEvent::StateChanged => draw(&self.render())?,
                AppEvent::InputClosed => self.should_quit = true,
            }
        }
        Ok(())
    }

    pub fn handle_command(&mut self, cmd: Command) {
        debug!(?cmd, "command");
        if cmd == Command::Quit {
            self.should_quit = true;
            return;
        }
        if self.screen != Screen::Ready {
            return;
        }
        let store = &self.store;
        match cmd {
            Command::Next => {
                store.pick_random_word();
            }
            Command::Random => {
                self.fetch_random_word();
            }
            Command::Learn => {
                if let Some(word) = store.random_word() {
                    store.mark_learned(&word.uuid);
                }
            }
            Command::Unlearn => {
                if let Some(word) = store.random_word() {
                    store.unmark_learned(&word.uuid);
                }
            }
            Command::ToggleLevel(level) => store.toggle_level(level),
            Command::SwitchMode => store.set_mode(store.settings().mode.toggled()),
            Command::ToggleRomaji => store.set_romaji(!store.settings().romaji),
            Command::ToggleTheme => store.set_theme(store.settings().theme.toggled()),
            Command::Show(view) => store.set_view(view),
            Command::Quit => {}
        }
    }

    /// Ask the catalog for a random word. If the request fails the word is
    /// drawn locally instead; if a newer word was shown meanwhile the
    /// result is dropped.
    pub fn fetch_random_word(&self) -> JoinHandle<()> {
        let generation = self.store.word_generation();
        let store = Arc::clone(&self.store);
        let source = Arc::clone(&self.source);
        tokio::spawn(async move {
            match source.fetch_random().await {
                Ok(word) => {
                    store.offer_word(generation, word);
                }
                Err(e) => {
                    warn!("error fetching random word, picking locally: {e}");
                    if store.word_generation() == generation {
                        store.pick_random_word();
                    }
                }
            }
        })
    }

    pub fn render(&self) -> String {
        match self.screen {
            Screen::Loading => "Initializing...\n".to_string(),
            Screen::Failed => render::failure(),
            Screen::Ready => render::view(&self.store),
        }
    }

    /// Wait for pending writes and stop background tasks.
    pub async fn shutdown(&mut self) {
        self.storage.flush().await;
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

/// The popup surface: one-shot settings edits written straight to storage.
pub struct Popup {
    storage: StorageAdapter,
}

impl Popup {
    pub fn new(storage: StorageAdapter) -> Self {
        Self { storage }
    }

    pub async fn settings(&self) -> Settings {
        self.read(keys::SETTINGS).await
    }

    pub async fn show(&self) -> String {
        let learned: IdSet = self.read(keys::LEARNED).await;
        let met: IdSet = self.read(keys::MET).await;
        let mut out = render::settings(&self.settings().await);
        out.push_str(&format!("learned: {}\nmet:     {}\n", learned.len(), met.len()));
        out
    }

    pub async fn set_level(&self, level: Level, enabled: bool) {
        self.modify(|s| s.set_level(level, enabled)).await;
    }

    pub async fn set_romaji(&self, romaji: bool) {
        self.modify(|s| s.romaji = romaji).await;
    }

    pub async fn set_mode(&self, mode: Mode) {
        self.modify(|s| s.mode = mode).await;
    }

    pub async fn set_theme(&self, theme: Theme) {
        self.modify(|s| s.theme = theme).await;
    }

    pub async fn reset(&self) {
        self.storage.remove(keys::LEARNED).await;
        self.storage.remove(keys::MET).await;
    }

    async fn modify(&self, f: impl FnOnce(&mut Settings)) {
        let mut settings = self.settings().await;
        f(&mut settings);
        match serde_json::to_value(&settings) {
            Ok(value) => self.storage.set(keys::SETTINGS, value).await,
            Err(e) => warn!("cannot serialize settings: {e}"),
        }
    }

    async fn read<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let Some(value) = self.storage.get(key).await else {
            return T::default();
        };
        serde_json::from_value(value).unwrap_or_else(|e| {
            warn!(key, "malformed stored value, using default: {e}");
            T::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::cache::tests::StubSource;
    use serde_json::json;

    fn level(n: u8) -> Level {
        Level::new(n).unwrap()
    }

    async fn started(source: StubSource) -> App<StubSource> {
        let mut app = App::new(Config::default(), StorageAdapter::memory(), source);
        app.start().await;
        app
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("n"), Some(Command::Next));
        assert_eq!(Command::parse(""), Some(Command::Next));
        assert_eq!(Command::parse(" r "), Some(Command::Random));
        assert_eq!(Command::parse("3"), Some(Command::ToggleLevel(level(3))));
        assert_eq!(Command::parse("b"), Some(Command::Show(View::Book)));
        assert_eq!(Command::parse("6"), None);
        assert_eq!(Command::parse("0"), None);
        assert_eq!(Command::parse("hello"), None);
    }

    #[tokio::test]
    async fn test_start_loads_catalog_and_shows_word() {
        let app = started(StubSource::with_words(&["a", "b"])).await;
        assert_eq!(app.screen, Screen::Ready);
        assert_eq!(app.store.words().len(), 2);
        assert!(app.store.random_word().is_some());
        assert_eq!(app.store.met().len(), 1);
    }

    #[tokio::test]
    async fn test_catalog_failure_renders_failure_screen() {
        let mut app = started(StubSource {
            fail: true,
            ..StubSource::default()
        })
        .await;
        assert_eq!(app.screen, Screen::Failed);
        assert!(app.render().contains("Something wrong happened"));

        app.handle_command(Command::Next);
        assert!(app.store.random_word().is_none());
        app.handle_command(Command::Quit);
        assert!(app.should_quit);
    }

    #[tokio::test]
    async fn test_learn_and_unlearn_current_word() {
        let mut app = started(StubSource::with_words(&["a"])).await;
        app.handle_command(Command::Learn);
        assert!(app.store.is_learned("a"));
        assert!(app.render().contains("[learned]"));

        app.handle_command(Command::Unlearn);
        assert!(!app.store.is_learned("a"));
    }

    #[tokio::test]
    async fn test_random_word_from_catalog() {
        let mut app = started(StubSource::with_words(&["a", "b", "c"])).await;
        app.handle_command(Command::SwitchMode);
        assert_eq!(app.store.settings().mode, Mode::Repetition);

        app.fetch_random_word().await.unwrap();
        assert_eq!(app.store.random_word().map(|w| w.uuid), Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_random_word_failure_falls_back_to_local_pick() {
        let storage = StorageAdapter::memory();
        let background = spawn_background(CachedCatalog::new(
            StubSource::with_words(&["a"]),
            storage.for_surface(),
        ));
        let failing = Arc::new(StubSource {
            fail: true,
            ..StubSource::default()
        });
        let mut app = App::with_background(Config::default(), storage, failing, background);
        app.start().await;
        app.handle_command(Command::SwitchMode);

        let before = app.store.word_generation();
        app.fetch_random_word().await.unwrap();
        assert_eq!(app.store.word_generation(), before + 1);
        assert_eq!(app.store.random_word().map(|w| w.uuid), Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_view_commands_switch_rendering() {
        let mut app = started(StubSource::with_words(&["a"])).await;
        app.handle_command(Command::Show(View::Settings));
        assert!(app.render().contains("mode:"));
        app.handle_command(Command::ToggleTheme);
        assert!(app.render().contains("theme:  dark"));
        app.handle_command(Command::Show(View::Book));
        assert_eq!(app.render(), "No learned words yet\n");
    }

    #[tokio::test]
    async fn test_popup_edits_settings_in_place() {
        let storage = StorageAdapter::memory();
        storage
            .set(keys::SETTINGS, json!({ "mode": "repetition", "levels": [] }))
            .await;
        let popup = Popup::new(storage.clone());

        popup.set_level(level(2), false).await;
        popup.set_romaji(true).await;

        let settings = popup.settings().await;
        assert_eq!(settings.mode, Mode::Repetition);
        assert!(settings.romaji);
        assert!(!settings.is_enabled(level(2)));
        assert_eq!(settings.levels.len(), 5);
    }

    #[tokio::test]
    async fn test_popup_reset_removes_progress() {
        let storage = StorageAdapter::memory();
        storage.set(keys::LEARNED, json!(["a", "b"])).await;
        storage.set(keys::MET, json!(["c"])).await;
        let popup = Popup::new(storage.clone());
        assert!(popup.show().await.contains("learned: 2"));

        popup.reset().await;
        assert_eq!(storage.get(keys::LEARNED).await, None);
        assert_eq!(storage.get(keys::MET).await, None);
        assert!(popup.show().await.contains("met:     0"));
    }

    #[tokio::test]
    async fn test_popup_write_reaches_tab_store() {
        let storage = StorageAdapter::memory();
        let mut app = App::new(
            Config::default(),
            storage.clone(),
            StubSource::with_words(&["a"]),
        );
        app.start().await;
        let popup = Popup::new(storage.for_surface());

        popup.set_theme(Theme::Dark).await;
        for _ in 0..10 {
            if app.store.settings().theme == Theme::Dark {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(app.store.settings().theme, Theme::Dark);
    }

    /// Input that has delivered some lines and then stays open, like a
    /// terminal nobody is typing into.
    struct OpenInput {
        pending: Vec<u8>,
        more: std::sync::mpsc::Receiver<Vec<u8>>,
    }

    impl io::Read for OpenInput {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pending.is_empty() {
                match self.more.recv() {
                    Ok(bytes) => self.pending = bytes,
                    Err(_) => return Ok(0),
                }
            }
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }

    #[tokio::test]
    async fn test_quit_returns_while_input_is_open() {
        let (keep_open, more) = std::sync::mpsc::channel();
        let input = OpenInput {
            pending: b"l\nq\n".to_vec(),
            more,
        };
        let mut events = EventHandler::from_reader(io::BufReader::new(input));
        let mut app = started(StubSource::with_words(&["a"])).await;
        app.subscribe(events.notifier());

        let mut screens = Vec::new();
        let run = app.run(&mut events, |screen| {
            screens.push(screen.to_string());
            Ok(())
        });
        tokio::time::timeout(std::time::Duration::from_secs(5), run)
            .await
            .expect("quit should not wait for more input")
            .unwrap();

        assert!(app.should_quit);
        assert_eq!(app.store.learned().len(), 1);
        assert!(screens.iter().any(|s| s.contains("[learned]")));
        drop(keep_open);
    }
}
