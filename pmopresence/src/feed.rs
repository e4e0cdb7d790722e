//! Newline-delimited JSON feed of zone notifications.
//!
//! Each line is one message from the playback source binding:
//!
//! ```text
//! {"zones": [...]}                 full replacement
//! {"zones_changed": [...]}         upsert
//! {"zones_added": [...]}           upsert
//! {"zones_removed": ["zone-id"]}
//! {"event": "connection_lost"}
//! ```
//!
//! Blank lines, `{}` and messages without any known field are no-ops.

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::engine::PresenceEngine;
use crate::errors::PresenceError;
use crate::model::{ZoneId, ZoneMap, ZoneSnapshot};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FeedMessage {
    zones: Option<Vec<ZoneSnapshot>>,
    zones_changed: Option<Vec<ZoneSnapshot>>,
    zones_added: Option<Vec<ZoneSnapshot>>,
    zones_removed: Option<Vec<ZoneId>>,
    event: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    Ignored,
    Zones(ZoneMap),
    ConnectionLost,
}

/// Zone dictionary rebuilt from the feed messages.
#[derive(Debug, Default)]
pub struct ZoneFeed {
    zones: ZoneMap,
}

impl ZoneFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn zones(&self) -> &ZoneMap {
        &self.zones
    }

    pub fn apply(&mut self, line: &str) -> Result<FeedUpdate, PresenceError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(FeedUpdate::Ignored);
        }
        let message: FeedMessage =
            serde_json::from_str(line).map_err(|e| PresenceError::Feed(e.to_string()))?;

        if let Some(event) = message.event.as_deref() {
            return match event {
                "connection_lost" => Ok(FeedUpdate::ConnectionLost),
                other => {
                    debug!("Ignoring feed event {}", other);
                    Ok(FeedUpdate::Ignored)
                }
            };
        }

        let mut touched = false;
        if let Some(zones) = message.zones {
            self.zones = zones.into_iter().map(|z| (z.zone_id.clone(), z)).collect();
            touched = true;
        }
        for zone in message
            .zones_added
            .into_iter()
            .chain(message.zones_changed)
            .flatten()
        {
            self.zones.insert(zone.zone_id.clone(), zone);
            touched = true;
        }
        for id in message.zones_removed.into_iter().flatten() {
            self.zones.shift_remove(&id);
            touched = true;
        }

        Ok(if touched {
            FeedUpdate::Zones(self.zones.clone())
        } else {
            FeedUpdate::Ignored
        })
    }
}

/// Reads the feed until end of input, forwarding updates to `engine`.
///
/// Malformed lines are logged and skipped.
pub async fn run_feed<R>(reader: R, engine: &PresenceEngine) -> Result<(), PresenceError>
where
    R: AsyncBufRead + Unpin,
{
    let mut feed = ZoneFeed::new();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        match feed.apply(&line) {
            Ok(FeedUpdate::Zones(zones)) => engine.zones_changed(zones),
            Ok(FeedUpdate::ConnectionLost) => engine.source_connection_lost(),
            Ok(FeedUpdate::Ignored) => {}
            Err(e) => warn!("{}", e),
        }
    }

    info!("Zone feed closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlayState;

    #[test]
    fn test_full_then_incremental() {
        let mut feed = ZoneFeed::new();
        let update = feed
            .apply(r#"{"zones":[{"zone_id":"a","display_name":"A","state":"stopped"},{"zone_id":"b","display_name":"B","state":"stopped"}]}"#)
            .unwrap();
        assert!(matches!(update, FeedUpdate::Zones(ref z) if z.len() == 2));

        let update = feed
            .apply(r#"{"zones_changed":[{"zone_id":"a","display_name":"A","state":"playing","now_playing":{"title":"Song One"}}]}"#)
            .unwrap();
        let FeedUpdate::Zones(zones) = update else {
            panic!("expected zones");
        };
        assert_eq!(zones[&ZoneId::from("a")].state, PlayState::Playing);
        // L'ordre d'origine est conservé
        assert_eq!(zones.get_index(0).unwrap().0, &ZoneId::from("a"));

        let update = feed.apply(r#"{"zones_removed":["a"]}"#).unwrap();
        assert!(matches!(update, FeedUpdate::Zones(ref z) if z.len() == 1));
    }

    #[test]
    fn test_empty_frames_are_ignored() {
        let mut feed = ZoneFeed::new();
        assert_eq!(feed.apply("").unwrap(), FeedUpdate::Ignored);
        assert_eq!(feed.apply("   ").unwrap(), FeedUpdate::Ignored);
        assert_eq!(feed.apply("{}").unwrap(), FeedUpdate::Ignored);
        assert_eq!(feed.apply(r#"{"seek_changed":[]}"#).unwrap(), FeedUpdate::Ignored);
    }

    #[test]
    fn test_connection_lost_and_garbage() {
        let mut feed = ZoneFeed::new();
        assert_eq!(
            feed.apply(r#"{"event":"connection_lost"}"#).unwrap(),
            FeedUpdate::ConnectionLost
        );
        assert!(matches!(feed.apply("not json"), Err(PresenceError::Feed(_))));
    }
}
