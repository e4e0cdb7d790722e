use std::sync::{Arc, Mutex, PoisonError};

use pmocache::CacheEntry;
use pmodiscord::{Activity, ConnectionStatus};
use serde::Serialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::model::{NowPlaying, PlayState, ZoneId, ZoneMap, ZoneSnapshot};

/// Source connection as shown to observers (debounced).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Disconnected,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveZoneView {
    pub zone_id: ZoneId,
    pub display_name: String,
    pub state: PlayState,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub image_key: Option<String>,
    pub seek_position: f64,
    pub length: f64,
}

impl ActiveZoneView {
    pub fn of(zone: &ZoneSnapshot) -> Self {
        let np = zone.now_playing.clone().unwrap_or_else(NowPlaying::default);
        Self {
            zone_id: zone.zone_id.clone(),
            display_name: zone.display_name.clone(),
            state: zone.state,
            title: np.title,
            artist: np.artist,
            album: np.album,
            image_key: np.image_key,
            seek_position: np.seek_position,
            length: np.length,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneSummary {
    pub zone_id: ZoneId,
    pub display_name: String,
    pub state: PlayState,
}

pub fn summarize(zones: &ZoneMap) -> Vec<ZoneSummary> {
    zones
        .values()
        .map(|z| ZoneSummary {
            zone_id: z.zone_id.clone(),
            display_name: z.display_name.clone(),
            state: z.state,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub source: SourceStatus,
    pub discord: ConnectionStatus,
    pub active_zone: Option<ActiveZoneView>,
    pub zones: Vec<ZoneSummary>,
    pub last_activity: Option<Activity>,
    pub updating: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged(StateSnapshot),
    /// `None` when the presence was cleared.
    ActivityUpdated(Option<Activity>),
    CacheChanged(Vec<CacheEntry>),
}

#[derive(Clone, Default)]
pub struct EngineEventBus {
    subscribers: Arc<Mutex<Vec<UnboundedSender<EngineEvent>>>>,
}

impl EngineEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<EngineEvent> {
        let (tx, rx) = unbounded_channel();
        {
            let mut subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            subscribers.push(tx);
        }
        rx
    }

    pub fn broadcast(&self, event: EngineEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
