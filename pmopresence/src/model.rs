use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub String);

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ZoneId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayState {
    Playing,
    Paused,
    Loading,
    #[default]
    #[serde(other)]
    Stopped,
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlayState::Playing => "playing",
            PlayState::Paused => "paused",
            PlayState::Loading => "loading",
            PlayState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Track metadata of a zone. Positions are in seconds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NowPlaying {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub image_key: Option<String>,
    pub seek_position: f64,
    pub length: f64,
}

/// One playback output as last reported by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    pub zone_id: ZoneId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub state: PlayState,
    #[serde(default)]
    pub now_playing: Option<NowPlaying>,
}

impl ZoneSnapshot {
    pub fn is_playing(&self) -> bool {
        self.state == PlayState::Playing && self.now_playing.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.state == PlayState::Paused && self.now_playing.is_some()
    }

    /// Change-detection key: artwork and title together, so two tracks of
    /// the same album are told apart.
    pub fn track_key(&self) -> Option<String> {
        self.now_playing.as_ref().map(|np| {
            format!("{}:{}", np.image_key.as_deref().unwrap_or(""), np.title)
        })
    }
}

/// Zone dictionary, in the order the source reported the zones.
pub type ZoneMap = IndexMap<ZoneId, ZoneSnapshot>;

pub fn zone_map<I: IntoIterator<Item = ZoneSnapshot>>(zones: I) -> ZoneMap {
    zones.into_iter().map(|z| (z.zone_id.clone(), z)).collect()
}

/// One-line `name:state` summary, for debug logs.
pub fn describe_zones(zones: &ZoneMap) -> String {
    zones
        .values()
        .map(|z| format!("{}:{}", z.display_name, z.state))
        .collect::<Vec<_>>()
        .join(", ")
}
