//! Process log pipeline: reloadable level filter, in-memory ring buffer and
//! an optional console output.

mod layer;

pub use layer::LogLayer;

use std::{
    collections::VecDeque,
    sync::{Arc, PoisonError, RwLock},
    time::SystemTime,
};

use pmoconfig::LoggingConfig;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, reload, util::SubscriberInitExt, Registry,
};

const BROADCAST_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: SystemTime,
    pub level: String,
    pub component: String,
    pub message: String,
}

/// Most recent log entries, shared between the tracing layer and readers.
#[derive(Clone)]
pub struct LogState {
    buffer: Arc<RwLock<VecDeque<LogEntry>>>,
    capacity: usize,
    tx: broadcast::Sender<LogEntry>,
    reload_handle: Option<reload::Handle<LevelFilter, Registry>>,
}

impl LogState {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
            tx: broadcast::channel(BROADCAST_CAPACITY).0,
            reload_handle: None,
        }
    }

    fn with_reload_handle(mut self, handle: reload::Handle<LevelFilter, Registry>) -> Self {
        self.reload_handle = Some(handle);
        self
    }

    pub(crate) fn push(&self, entry: LogEntry) {
        {
            let mut buf = self.buffer.write().unwrap_or_else(PoisonError::into_inner);
            if buf.len() == self.capacity {
                buf.pop_front();
            }
            buf.push_back(entry.clone());
        }
        let _ = self.tx.send(entry);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }

    pub fn dump(&self) -> Vec<LogEntry> {
        self.buffer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Switches between DEBUG and INFO without restarting.
    pub fn set_debug(&self, debug: bool) {
        let Some(handle) = &self.reload_handle else {
            return;
        };
        if let Err(e) = handle.reload(level_filter(debug)) {
            eprintln!("❌ Failed to reload log level filter: {}", e);
        }
    }
}

fn level_filter(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
}

/// Installs the global subscriber and returns the shared log buffer.
pub fn init_logging(config: &LoggingConfig) -> LogState {
    let (filter, reload_handle) = reload::Layer::new(level_filter(config.debug));
    let log_state = LogState::new(config.buffer_capacity).with_reload_handle(reload_handle);

    // Le filtre doit précéder le LogLayer
    let subscriber = Registry::default()
        .with(filter)
        .with(LogLayer::new(log_state.clone()));

    let installed = if config.enable_console {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .try_init()
    } else {
        subscriber.try_init()
    };
    if let Err(e) = installed {
        eprintln!("❌ Logging already initialised: {}", e);
    }

    log_state
}
