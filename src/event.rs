use std::io::{self, BufRead};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tokio::sync::{Notify, mpsc};

pub enum AppEvent {
    Input(String),
    /// Something a view renders from changed since the last event.
    StateChanged,
    InputClosed,
}

/// Multiplexes typed commands with store change notifications.
///
/// Change notifications are coalesced: any number of changes between two
/// calls to [`EventHandler::next`] yield a single `StateChanged`.
pub struct EventHandler {
    rx: mpsc::Receiver<String>,
    dirty: Arc<Dirty>,
    input_open: bool,
}

#[derive(Default)]
struct Dirty {
    flag: AtomicBool,
    notify: Notify,
}

/// Cloneable trigger handed to store subscriptions.
#[derive(Clone)]
pub struct ChangeNotifier(Arc<Dirty>);

impl ChangeNotifier {
    pub fn notify(&self) {
        self.0.flag.store(true, Ordering::SeqCst);
        self.0.notify.notify_one();
    }
}

impl EventHandler {
    /// Read commands line by line from stdin.
    pub fn new() -> Self {
        Self::from_reader(io::BufReader::new(io::stdin()))
    }

    /// Read commands from `reader` on a dedicated thread. The thread is
    /// never joined, so a read blocked on open input does not keep the
    /// process alive once the event loop has returned.
    pub fn from_reader(reader: impl BufRead + Send + 'static) -> Self {
        let (tx, rx) = mpsc::channel(32);
        thread::spawn(move || {
            for line in reader.lines() {
                let Ok(line) = line else {
                    return;
                };
                if tx.blocking_send(line).is_err() {
                    return;
                }
            }
        });
        Self::with_input(rx)
    }

    pub fn with_input(rx: mpsc::Receiver<String>) -> Self {
        Self {
            rx,
            dirty: Arc::new(Dirty::default()),
            input_open: true,
        }
    }

    pub fn notifier(&self) -> ChangeNotifier {
        ChangeNotifier(Arc::clone(&self.dirty))
    }

    pub async fn next(&mut self) -> AppEvent {
        loop {
            if self.dirty.flag.swap(false, Ordering::SeqCst) {
                return AppEvent::StateChanged;
            }
            if !self.input_open {
                self.dirty.notify.notified().await;
                continue;
            }
            tokio::select! {
                line = self.rx.recv() => match line {
                    Some(line) => return AppEvent::Input(line),
                    None => {
                        self.input_open = false;
                        return AppEvent::InputClosed;
                    }
                },
                _ = self.dirty.notify.notified() => {}
            }
        }
    }
}
