use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tabwords::app::{App, Popup};
use tabwords::catalog::messaging::spawn_background;
use tabwords::catalog::{CachedCatalog, HttpWordSource};
use tabwords::config::Config;
use tabwords::event::EventHandler;
use tabwords::store::StorageAdapter;
use tabwords::store::schema::{Level, Mode, Theme};

#[derive(Parser)]
#[command(name = "tabwords", version, about = "JLPT vocabulary flashcards, one word at a time")]
struct Cli {
    #[arg(long, help = "Directory holding persisted progress and settings")]
    storage_dir: Option<PathBuf>,

    #[arg(long, help = "Base URL of the word catalog")]
    catalog_url: Option<String>,

    #[command(subcommand)]
    command: Option<Surface>,
}

#[derive(Subcommand)]
enum Surface {
    /// Interactive flashcards (default)
    Tab,
    /// Inspect or change settings the way the popup does
    Popup {
        #[command(subcommand)]
        action: PopupAction,
    },
    /// Refresh the cached catalog through the background surface
    Fetch,
}

#[derive(Subcommand)]
enum PopupAction {
    Show,
    Level { level: u8, state: Switch },
    Romaji { state: Switch },
    Mode { mode: Mode },
    Theme { theme: Theme },
    /// Forget learned and met words
    Reset,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Switch {
    On,
    Off,
}

impl Switch {
    fn enabled(self) -> bool {
        matches!(self, Switch::On)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load().unwrap_or_default();
    if let Some(dir) = &cli.storage_dir {
        config.storage_dir = dir.to_string_lossy().to_string();
        config.persistent_storage = true;
    }
    if let Some(url) = &cli.catalog_url {
        config.catalog_url = url.clone();
    }
    config.normalize();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let storage = match config.storage_path() {
        Some(dir) => StorageAdapter::open(Some(dir)),
        None => StorageAdapter::memory(),
    };

    match cli.command.unwrap_or(Surface::Tab) {
        Surface::Tab => run_tab(config, storage).await,
        Surface::Popup { action } => run_popup(Popup::new(storage), action).await,
        Surface::Fetch => run_fetch(config, storage).await,
    }
}

async fn run_tab(config: Config, storage: StorageAdapter) -> Result<()> {
    let source = HttpWordSource::new(&config.catalog_url)?;
    let mut app = App::new(config, storage, source);
    let mut events = EventHandler::new();

    draw(&app.render())?;
    app.start().await;
    app.subscribe(events.notifier());
    draw(&app.render())?;

    app.run(&mut events, draw).await?;

    app.shutdown().await;
    Ok(())
}

async fn run_popup(popup: Popup, action: PopupAction) -> Result<()> {
    match action {
        PopupAction::Show => {}
        PopupAction::Level { level, state } => {
            let level = Level::new(level)?;
            popup.set_level(level, state.enabled()).await;
        }
        PopupAction::Romaji { state } => popup.set_romaji(state.enabled()).await,
        PopupAction::Mode { mode } => popup.set_mode(mode).await,
        PopupAction::Theme { theme } => popup.set_theme(theme).await,
        PopupAction::Reset => {
            popup.reset().await;
            println!("Progress reset successfully");
        }
    }
    print!("{}", popup.show().await);
    Ok(())
}

async fn run_fetch(config: Config, storage: StorageAdapter) -> Result<()> {
    let source = HttpWordSource::new(&config.catalog_url)?;
    let catalog = CachedCatalog::new(source, storage).with_freshness(config.cache_freshness());
    let response = spawn_background(catalog).fetch_words().await;
    match (response.success, response.data) {
        (true, Some(words)) => {
            println!("fetched {} words", words.len());
            Ok(())
        }
        _ => bail!(
            "fetch failed: {}",
            response.error.unwrap_or_else(|| "no data".to_string())
        ),
    }
}

fn draw(screen: &str) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "----------------------------------------")?;
    write!(stdout, "{screen}")?;
    stdout.flush()
}
