//! # pmopresence
//!
//! Mirrors the playback of a multi-zone music system into a Discord rich
//! presence.
//!
//! - [`selector`] picks the single zone to display
//! - [`activity`] turns that zone into a presence payload
//! - [`engine`] owns the session: update gating, seek detection, pause and
//!   source-disconnect timers, cover art resolution
//! - [`artwork`] / [`http`] fetch cover art from the source and publish it
//! - [`feed`] reads zone notifications as newline-delimited JSON
//! - [`logs`] installs the tracing pipeline and keeps recent entries
//!
//! ```no_run
//! use std::sync::Arc;
//! use pmocache::{ArtifactCache, SystemClock};
//! use pmoconfig::ConfigStore;
//! use pmodiscord::{IpcConfig, IpcTransport, PresenceClient};
//! use pmopresence::{ArtworkResolver, FallbackUploader, NoArtwork, PresenceEngine};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let store = ConfigStore::load("")?;
//! let (transport, events) = IpcTransport::new(IpcConfig::new("1475071196708995145", 0));
//! let client = Arc::new(PresenceClient::new(transport));
//! let resolver = ArtworkResolver::new(
//!     Arc::new(ArtifactCache::in_memory()?),
//!     Arc::new(NoArtwork),
//!     Arc::new(FallbackUploader::default()),
//! );
//!
//! let engine = PresenceEngine::spawn(client, Arc::new(resolver), store.subscribe(), Arc::new(SystemClock));
//! engine.attach_transport(events);
//! pmopresence::feed::run_feed(tokio::io::BufReader::new(tokio::io::stdin()), &engine).await?;
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod artwork;
pub mod engine;
pub mod errors;
pub mod events;
pub mod feed;
pub mod http;
pub mod logs;
pub mod model;
pub mod selector;
pub mod sink;

pub use activity::{build_activity, fit_field, DisplayOptions};
pub use artwork::{ArtworkResolver, ArtworkSource, ArtworkUploader, FallbackUploader};
pub use engine::{PresenceEngine, TimerKind};
pub use errors::PresenceError;
pub use events::{EngineEvent, SourceStatus, StateSnapshot};
pub use feed::{run_feed, ZoneFeed};
pub use http::{CatboxUploader, HttpArtworkSource, NoArtwork};
pub use logs::{init_logging, LogEntry, LogState};
pub use model::{NowPlaying, PlayState, ZoneId, ZoneMap, ZoneSnapshot};
pub use selector::{select, Selection, SelectionState};
pub use sink::PresenceSink;
