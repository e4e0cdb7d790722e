use std::sync::Arc;

use pmocache::{ArtifactCache, SystemClock};
use pmoconfig::ConfigStore;
use pmodiscord::{IpcConfig, IpcTransport, PresenceClient};
use pmopresence::{
    ArtworkResolver, ArtworkSource, CatboxUploader, EngineEvent, FallbackUploader,
    HttpArtworkSource, NoArtwork, PresenceEngine, init_logging, run_feed,
};
use tokio::io::BufReader;
use tracing::{debug, info, warn};

const DEFAULT_CONFIG_DIR: &str = ".pmopresence";
const CACHE_FILE_NAME: &str = "cache.db";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ========== PHASE 1 : Configuration et logs ==========

    let config_arg = std::env::args().nth(1).unwrap_or_default();
    let (store, load_error) = match ConfigStore::load(&config_arg) {
        Ok(store) => (store, None),
        Err(e) => {
            let dir = if config_arg.is_empty() {
                DEFAULT_CONFIG_DIR
            } else {
                config_arg.as_str()
            };
            (ConfigStore::defaults(dir), Some(e))
        }
    };
    let config = store.get();

    let log_state = init_logging(&config.logging);
    if let Some(e) = load_error {
        warn!("⚠️ Invalid configuration, using defaults: {:#}", e);
    }
    info!("📝 Configuration: {}", store.path().display());

    // Le niveau de log suit la configuration
    let mut config_rx = store.subscribe();
    tokio::spawn(async move {
        while config_rx.changed().await.is_ok() {
            let debug = config_rx.borrow_and_update().logging.debug;
            log_state.set_debug(debug);
        }
    });

    // ========== PHASE 2 : Cache, Discord, pochettes ==========

    let cache_path = store.config_dir().join(CACHE_FILE_NAME);
    let cache = match ArtifactCache::open(&cache_path) {
        Ok(cache) => {
            info!("🗂️ Artwork cache: {} ({} entries)", cache_path.display(), cache.len());
            cache
        }
        Err(e) => {
            warn!("⚠️ Cannot open {}, cache kept in memory: {}", cache_path.display(), e);
            ArtifactCache::in_memory()?
        }
    };

    let (transport, transport_events) = IpcTransport::new(IpcConfig::new(
        config.discord.client_id.clone(),
        config.discord.pipe_number,
    ));
    let client = Arc::new(PresenceClient::new(transport));
    if !client.connect_or_schedule().await {
        warn!("⚠️ Discord not available, retrying in background");
    }

    let source: Arc<dyn ArtworkSource> = match config.source.host_port() {
        Some((host, port)) => Arc::new(HttpArtworkSource::new(&host, port)?),
        None => {
            info!("No core address configured, cover art disabled");
            Arc::new(NoArtwork)
        }
    };
    let mut uploader = FallbackUploader::default();
    match CatboxUploader::new() {
        Ok(catbox) => uploader.push(Arc::new(catbox)),
        Err(e) => warn!("⚠️ Catbox uploader unavailable: {}", e),
    }
    let resolver = ArtworkResolver::new(Arc::new(cache), source, Arc::new(uploader));

    // ========== PHASE 3 : Moteur ==========

    let engine = PresenceEngine::spawn(
        client,
        Arc::new(resolver),
        store.subscribe(),
        Arc::new(SystemClock),
    );
    engine.attach_transport(transport_events);

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::StateChanged(state) => debug!(
                    source = ?state.source,
                    discord = ?state.discord,
                    zone = state.active_zone.as_ref().map(|z| z.display_name.as_str()),
                    "State changed"
                ),
                EngineEvent::ActivityUpdated(Some(activity)) => {
                    debug!("Presence: {}", activity.details)
                }
                EngineEvent::ActivityUpdated(None) => debug!("Presence cleared"),
                EngineEvent::CacheChanged(entries) => {
                    debug!("{} cover URL(s) cached", entries.len())
                }
            }
        }
    });

    info!("✅ PMORichPresence is ready, reading zone notifications on stdin");
    info!("Press Ctrl+C to stop...");

    let stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = run_feed(stdin, &engine) => {
            if let Err(e) = result {
                warn!("⚠️ Zone feed failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => info!("Ctrl+C received"),
    }

    engine.shutdown().await;
    info!("👋 PMORichPresence stopped");
    Ok(())
}
