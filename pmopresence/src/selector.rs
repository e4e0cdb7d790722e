//! Choice of the single zone represented in the presence.
//!
//! Rules, in order:
//! 1. the playing zone that started playing most recently wins
//!    (ties and zones without a recorded start keep encounter order);
//! 2. nothing is selected before something has played at least once,
//!    so zones left paused before start-up are ignored;
//! 3. the previously active zone stays selected while it is paused;
//! 4. a previously active zone that is loading yields [`Selection::Hold`];
//! 5. otherwise nothing is selected.

use std::collections::HashMap;

use tokio::time::Instant;

use crate::model::{PlayState, ZoneId, ZoneMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Active(ZoneId),
    /// Track transition in progress: keep the current presence untouched.
    Hold,
    None,
}

#[derive(Debug, Default, Clone)]
pub struct SelectionState {
    pub active_zone_id: Option<ZoneId>,
    pub has_ever_played: bool,
    play_started_at: HashMap<ZoneId, Instant>,
}

impl SelectionState {
    /// Stamps zones entering `playing` with `now`, forgets zones that left it.
    pub fn record_play_transitions(&mut self, zones: &ZoneMap, now: Instant) {
        for zone in zones.values() {
            if zone.state == PlayState::Playing {
                self.play_started_at
                    .entry(zone.zone_id.clone())
                    .or_insert(now);
            } else {
                self.play_started_at.remove(&zone.zone_id);
            }
        }
        self.play_started_at.retain(|id, _| zones.contains_key(id));
    }

    pub fn play_started_at(&self, zone_id: &ZoneId) -> Option<Instant> {
        self.play_started_at.get(zone_id).copied()
    }

    /// Back to the cold-start state.
    pub fn reset(&mut self) {
        self.active_zone_id = None;
        self.has_ever_played = false;
        self.play_started_at.clear();
    }
}

pub fn select(zones: &ZoneMap, state: &mut SelectionState) -> Selection {
    let mut winner: Option<(&ZoneId, Option<Instant>)> = None;
    for zone in zones.values().filter(|z| z.is_playing()) {
        let started = state.play_started_at(&zone.zone_id);
        match winner {
            Some((_, best)) if started <= best => {}
            _ => winner = Some((&zone.zone_id, started)),
        }
    }

    if let Some((id, _)) = winner {
        state.has_ever_played = true;
        return Selection::Active(id.clone());
    }

    if !state.has_ever_played {
        return Selection::None;
    }

    if let Some(previous) = state.active_zone_id.as_ref().and_then(|id| zones.get(id)) {
        if previous.is_paused() {
            return Selection::Active(previous.zone_id.clone());
        }
        if previous.state == PlayState::Loading {
            return Selection::Hold;
        }
    }

    Selection::None
}
