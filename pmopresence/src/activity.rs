//! Construction of the presence payload from a zone.

use pmoconfig::schema::MAX_BUTTONS;
use pmoconfig::{ButtonConfig, DisplayConfig};
use pmodiscord::{Activity, Assets, Button, Timestamps};

use crate::model::{PlayState, ZoneSnapshot};

pub const TITLE_LIMIT: usize = 120;
pub const BUTTON_LABEL_LIMIT: usize = 30;
pub const DEFAULT_TITLE: &str = "Unknown Track";
/// Shortest field the presence consumer accepts.
const MIN_FIELD_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayOptions {
    pub show_album: bool,
    pub show_artist: bool,
    pub show_cover_art: bool,
    pub show_progress: bool,
    pub buttons: Vec<ButtonConfig>,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self::from(&DisplayConfig::default())
    }
}

impl From<&DisplayConfig> for DisplayOptions {
    fn from(config: &DisplayConfig) -> Self {
        Self {
            show_album: config.show_album,
            show_artist: config.show_artist,
            show_cover_art: config.show_cover_art,
            show_progress: config.show_progress,
            buttons: config.buttons.iter().take(MAX_BUTTONS).cloned().collect(),
        }
    }
}

/// Cuts `text` to `limit` characters (ending with `...`) and pads it to the
/// minimum field length.
pub fn fit_field(text: &str, limit: usize) -> String {
    let fitted = if text.chars().count() > limit {
        let kept: String = text.chars().take(limit.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        text.to_string()
    };
    format!("{:<width$}", fitted, width = MIN_FIELD_LEN)
}

/// `text` as given, unless it is blank.
fn non_empty(text: &str) -> Option<&str> {
    (!text.trim().is_empty()).then_some(text)
}

/// Builds the activity for `zone`, or `None` when it has no track.
///
/// `track_start_ms` is the epoch time at which the track would have started,
/// captured when the zone event arrived; when absent it is derived from
/// `now_ms` and the reported seek position.
pub fn build_activity(
    zone: &ZoneSnapshot,
    cover_url: Option<&str>,
    options: &DisplayOptions,
    track_start_ms: Option<i64>,
    now_ms: i64,
) -> Option<Activity> {
    let np = zone.now_playing.as_ref()?;
    let playing = zone.state == PlayState::Playing;

    let title = non_empty(&np.title).unwrap_or(DEFAULT_TITLE);
    let mut activity = Activity::listening(fit_field(title, TITLE_LIMIT));

    if options.show_artist {
        activity.state = non_empty(&np.artist).map(|a| fit_field(a, TITLE_LIMIT));
    }

    let (small_image, small_text) = if playing {
        ("playing", "Playing")
    } else {
        ("paused", "Paused")
    };
    let mut assets = Assets {
        small_image: Some(small_image.to_string()),
        small_text: Some(small_text.to_string()),
        ..Assets::default()
    };
    if options.show_cover_art {
        assets.large_image = cover_url.map(str::to_string);
    }
    if options.show_album {
        assets.large_text = non_empty(&np.album).map(|a| fit_field(a, TITLE_LIMIT));
    }
    activity.assets = Some(assets);

    if options.show_progress && playing && np.length > 0.0 {
        let start = track_start_ms.unwrap_or_else(|| now_ms - (np.seek_position * 1000.0) as i64);
        activity.timestamps = Some(Timestamps {
            start: Some(start),
            end: Some(start + (np.length * 1000.0) as i64),
        });
    }

    activity.buttons = options
        .buttons
        .iter()
        .take(MAX_BUTTONS)
        .map(|b| Button {
            label: fit_field(&b.label, BUTTON_LABEL_LIMIT),
            url: b.url.clone(),
        })
        .collect();

    Some(activity)
}
