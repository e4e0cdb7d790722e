//! Presence engine: a single actor task owning the session state.
//!
//! Every input (zone dictionaries, source connectivity, transport lifecycle,
//! timer firings, update completions) is a [`Command`] processed in order.
//! Cover art work runs in a spawned job; at most one job is in flight and a
//! newer event arriving meanwhile sets a one-slot retry flag, so the latest
//! zone dictionary is always re-read once the job completes.

mod timers;

pub use timers::TimerKind;

use std::sync::Arc;
use std::time::Duration;

use pmocache::{ArtifactCache, CacheEntry, Clock};
use pmoconfig::PresenceConfig;
use pmodiscord::{Activity, TransportEvent};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::activity::{build_activity, DisplayOptions};
use crate::artwork::ArtworkResolver;
use crate::events::{summarize, ActiveZoneView, EngineEvent, EngineEventBus, SourceStatus, StateSnapshot};
use crate::model::{describe_zones, PlayState, ZoneId, ZoneMap, ZoneSnapshot};
use crate::selector::{select, Selection, SelectionState};
use crate::sink::PresenceSink;
use timers::Timers;

/// Position drift tolerated before a report counts as a seek.
pub const SEEK_TOLERANCE_SECS: f64 = 5.0;
/// Minimum interval between two state refreshes for an unchanged track.
pub const STATE_REFRESH: Duration = Duration::from_secs(3);
pub const SOURCE_GRACE: Duration = Duration::from_secs(10);
pub const SOURCE_DEBOUNCE: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub(crate) enum Command {
    ZonesChanged(ZoneMap),
    SourceConnectionLost,
    Transport(TransportEvent),
    TimerFired { kind: TimerKind, generation: u64 },
    UpdateFinished(UpdateReport),
    Snapshot(oneshot::Sender<StateSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateKind {
    Play,
    Seek,
    Pause,
}

impl UpdateKind {
    fn expected_state(self) -> PlayState {
        match self {
            UpdateKind::Play | UpdateKind::Seek => PlayState::Playing,
            UpdateKind::Pause => PlayState::Paused,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CoverPlan {
    Skip,
    /// Same artwork as the previous update: cache lookup only.
    Cached(String),
    /// New artwork: cache lookup, then fetch and upload on a miss.
    Resolve(String),
}

#[derive(Debug)]
pub(crate) struct UpdateReport {
    epoch: u64,
    zone_id: ZoneId,
    track_key: Option<String>,
    kind: UpdateKind,
    track_start_ms: Option<i64>,
    uploaded: bool,
    outcome: Result<Option<String>, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Playing,
    Paused,
    Stopped,
    TimedOut,
}

/// Handle on a running engine. Cheap to clone.
#[derive(Clone)]
pub struct PresenceEngine {
    tx: UnboundedSender<Command>,
    bus: EngineEventBus,
    cache: Arc<ArtifactCache>,
}

impl std::fmt::Debug for PresenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceEngine")
            .field("running", &!self.tx.is_closed())
            .finish()
    }
}

impl PresenceEngine {
    /// Starts the engine task on the current runtime.
    pub fn spawn(
        sink: Arc<dyn PresenceSink>,
        resolver: Arc<ArtworkResolver>,
        config: watch::Receiver<PresenceConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = EngineEventBus::new();
        let cache = resolver.cache().clone();

        let actor = EngineActor::new(rx, tx.downgrade(), sink, resolver, config, clock, bus.clone());
        tokio::spawn(actor.run());

        Self { tx, bus, cache }
    }

    /// Forwards transport lifecycle events to the engine until either side goes away.
    pub fn attach_transport(&self, mut events: UnboundedReceiver<TransportEvent>) -> JoinHandle<()> {
        let tx = self.tx.downgrade();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(tx) = tx.upgrade() else { break };
                if tx.send(Command::Transport(event)).is_err() {
                    break;
                }
            }
        })
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            debug!("Presence engine stopped, command dropped");
        }
    }

    pub fn zones_changed(&self, zones: ZoneMap) {
        self.send(Command::ZonesChanged(zones));
    }

    pub fn source_connection_lost(&self) {
        self.send(Command::SourceConnectionLost);
    }

    pub fn subscribe(&self) -> UnboundedReceiver<EngineEvent> {
        self.bus.subscribe()
    }

    /// Current state, or `None` once the engine has stopped.
    pub async fn snapshot(&self) -> Option<StateSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply));
        rx.await.ok()
    }

    pub fn cache_entries(&self) -> Vec<CacheEntry> {
        self.cache.get_all()
    }

    pub fn remove_cache_entry(&self, key: &str) -> bool {
        let removed = self.cache.remove(key);
        if removed {
            self.bus
                .broadcast(EngineEvent::CacheChanged(self.cache.get_all()));
        }
        removed
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        self.bus.broadcast(EngineEvent::CacheChanged(Vec::new()));
    }

    /// Clears the presence, disconnects and stops the engine task.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown(reply));
        let _ = rx.await;
    }
}

struct EngineActor {
    rx: UnboundedReceiver<Command>,
    tx: WeakUnboundedSender<Command>,
    sink: Arc<dyn PresenceSink>,
    resolver: Arc<ArtworkResolver>,
    config: watch::Receiver<PresenceConfig>,
    clock: Arc<dyn Clock>,
    bus: EngineEventBus,
    timers: Timers,

    zones: ZoneMap,
    selection: SelectionState,
    phase: Phase,
    source_connected: bool,
    source_visible: SourceStatus,

    last_track_key: Option<String>,
    last_image_key: Option<String>,
    last_seek: Option<f64>,
    last_update_at: Option<Instant>,
    last_activity: Option<Activity>,
    last_emit_at: Option<Instant>,

    updating: bool,
    pending_retry: bool,
    /// Bumped on every clear; jobs started under an older epoch are discarded.
    epoch: u64,
}

impl EngineActor {
    fn new(
        rx: UnboundedReceiver<Command>,
        tx: WeakUnboundedSender<Command>,
        sink: Arc<dyn PresenceSink>,
        resolver: Arc<ArtworkResolver>,
        config: watch::Receiver<PresenceConfig>,
        clock: Arc<dyn Clock>,
        bus: EngineEventBus,
    ) -> Self {
        Self {
            rx,
            timers: Timers::new(tx.clone()),
            tx,
            sink,
            resolver,
            config,
            clock,
            bus,
            zones: ZoneMap::new(),
            selection: SelectionState::default(),
            phase: Phase::Idle,
            source_connected: false,
            source_visible: SourceStatus::Disconnected,
            last_track_key: None,
            last_image_key: None,
            last_seek: None,
            last_update_at: None,
            last_activity: None,
            last_emit_at: None,
            updating: false,
            pending_retry: false,
            epoch: 0,
        }
    }

    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::ZonesChanged(zones) => self.on_zones_changed(zones).await,
                Command::SourceConnectionLost => self.on_source_lost(),
                Command::Transport(event) => self.on_transport_event(event).await,
                Command::TimerFired { kind, generation } => {
                    if self.timers.claim(kind, generation) {
                        self.on_timer(kind).await;
                    }
                }
                Command::UpdateFinished(report) => self.on_update_finished(report).await,
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                Command::Shutdown(reply) => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    return;
                }
            }
        }
        self.timers.cancel_all();
    }

    // ---- inputs ----

    async fn on_zones_changed(&mut self, zones: ZoneMap) {
        self.zones = zones;

        if !self.source_connected {
            self.source_connected = true;
            self.source_visible = SourceStatus::Connected;
            let debounce = self.timers.cancel(TimerKind::Debounce);
            let grace = self.timers.cancel(TimerKind::Grace);
            if debounce || grace {
                debug!("Source reconnected within grace period");
            } else {
                info!("Source connected");
            }
            self.emit_state();
        }

        debug!("Zone states: {}", describe_zones(&self.zones));
        self.selection
            .record_play_transitions(&self.zones, Instant::now());
        self.evaluate().await;
    }

    fn on_source_lost(&mut self) {
        if self.source_connected {
            debug!("Source connection lost, waiting for grace period");
        } else {
            warn!("Lost connection to source");
        }
        self.source_connected = false;
        self.timers.start_if_idle(TimerKind::Debounce, SOURCE_DEBOUNCE);
        self.timers.start_if_idle(TimerKind::Grace, SOURCE_GRACE);
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match &event {
            TransportEvent::Connected { user } | TransportEvent::Reconnected { user } => {
                info!(
                    "Discord connected as {}",
                    user.as_deref().unwrap_or("unknown user")
                );
            }
            TransportEvent::Disconnected => warn!("Discord disconnected"),
        }
        self.sink.handle_event(&event).await;
        self.emit_state();
    }

    async fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Pause => {
                info!("Pause timeout reached, clearing activity");
                self.phase = Phase::TimedOut;
                self.forget_track();
                self.selection.reset();
                self.clear_presence().await;
                self.emit_state();
            }
            TimerKind::Debounce => {
                if !self.source_connected {
                    self.source_visible = SourceStatus::Disconnected;
                    self.emit_state();
                }
            }
            TimerKind::Grace => {
                if !self.source_connected {
                    warn!("Source still unavailable, clearing activity");
                    self.timers.cancel(TimerKind::Pause);
                    self.phase = Phase::Stopped;
                    self.forget_track();
                    self.selection.active_zone_id = None;
                    self.clear_presence().await;
                    self.emit_state();
                }
            }
        }
    }

    // ---- decision ----

    async fn evaluate(&mut self) {
        match select(&self.zones, &mut self.selection) {
            Selection::Hold => {
                if self.updating {
                    self.pending_retry = true;
                }
                debug!("Active zone loading, keeping presence");
            }
            Selection::None => self.on_no_active_zone().await,
            Selection::Active(id) => {
                let Some(zone) = self.zones.get(&id).cloned() else {
                    return;
                };
                match zone.state {
                    PlayState::Playing => self.on_playing(zone),
                    PlayState::Paused => self.on_paused(zone),
                    PlayState::Loading | PlayState::Stopped => {}
                }
            }
        }
    }

    async fn on_no_active_zone(&mut self) {
        if !matches!(self.phase, Phase::Playing | Phase::Paused) {
            return;
        }
        self.phase = Phase::Stopped;
        self.forget_track();
        self.selection.active_zone_id = None;
        self.timers.cancel(TimerKind::Pause);
        self.clear_presence().await;
        info!("No active zones, activity cleared");
        self.emit_state();
    }

    fn on_paused(&mut self, zone: ZoneSnapshot) {
        let track_key = zone.track_key();
        if self.phase == Phase::Paused && self.last_track_key == track_key {
            return;
        }
        if self.updating {
            self.pending_retry = true;
            return;
        }
        let Some(np) = zone.now_playing.as_ref() else {
            return;
        };

        self.phase = Phase::Paused;
        self.last_track_key = track_key;
        info!("⏸ {} - {} [{}]", np.title, np.artist, zone.display_name);

        let timeout = self.config.borrow().display.pause_timeout;
        if timeout > 0 {
            self.timers
                .replace(TimerKind::Pause, Duration::from_secs(timeout));
            debug!("Pause timer started ({}s)", timeout);
        }

        let cover = self.plan_cover(&zone);
        self.dispatch(zone, UpdateKind::Pause, None, cover);
    }

    fn on_playing(&mut self, zone: ZoneSnapshot) {
        if self.timers.cancel(TimerKind::Pause) {
            debug!("Pause timer cancelled");
        }
        let Some(np) = zone.now_playing.as_ref() else {
            return;
        };

        // Captured before any cover work so upload latency does not shift the bar
        let track_start_ms = self.clock.now_ms() - (np.seek_position * 1000.0) as i64;

        let track_key = zone.track_key();
        let zone_changed = self.selection.active_zone_id.as_ref() != Some(&zone.zone_id);
        let same_track = self.phase == Phase::Playing && self.last_track_key == track_key && !zone_changed;
        let seeked = match (self.last_seek, self.last_update_at) {
            (Some(seek), Some(at)) => {
                let expected = seek + at.elapsed().as_secs_f64();
                (np.seek_position - expected).abs() > SEEK_TOLERANCE_SECS
            }
            _ => false,
        };

        if same_track && !seeked {
            if self.last_emit_at.map_or(true, |at| at.elapsed() >= STATE_REFRESH) {
                self.emit_state();
            }
            return;
        }

        if self.updating {
            self.pending_retry = true;
            return;
        }

        self.phase = Phase::Playing;
        self.last_track_key = track_key;
        let kind = if same_track { UpdateKind::Seek } else { UpdateKind::Play };
        let cover = self.plan_cover(&zone);
        self.dispatch(zone, kind, Some(track_start_ms), cover);
    }

    fn plan_cover(&mut self, zone: &ZoneSnapshot) -> CoverPlan {
        if !self.config.borrow().display.show_cover_art {
            return CoverPlan::Skip;
        }
        let Some(key) = zone.now_playing.as_ref().and_then(|np| np.image_key.clone()) else {
            return CoverPlan::Skip;
        };
        if self.last_image_key.as_deref() == Some(key.as_str()) {
            CoverPlan::Cached(key)
        } else {
            self.last_image_key = Some(key.clone());
            CoverPlan::Resolve(key)
        }
    }

    // ---- update job ----

    fn dispatch(
        &mut self,
        zone: ZoneSnapshot,
        kind: UpdateKind,
        track_start_ms: Option<i64>,
        cover: CoverPlan,
    ) {
        self.selection.active_zone_id = Some(zone.zone_id.clone());
        self.updating = true;

        let epoch = self.epoch;
        let uploaded = matches!(cover, CoverPlan::Resolve(_));
        let ttl_ms = self.config.borrow().cache.artwork_ttl_ms();
        let sink = self.sink.clone();
        let resolver = self.resolver.clone();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let job = tokio::spawn(run_update(sink, resolver, cover, ttl_ms));
            let outcome = job.await.map_err(|e| e.to_string());
            let report = UpdateReport {
                epoch,
                zone_id: zone.zone_id.clone(),
                track_key: zone.track_key(),
                kind,
                track_start_ms,
                uploaded,
                outcome,
            };
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::UpdateFinished(report));
            }
        });
    }

    async fn on_update_finished(&mut self, report: UpdateReport) {
        self.updating = false;

        match &report.outcome {
            Err(e) => error!("Presence update failed: {}", e),
            Ok(cover) => {
                if report.uploaded && cover.is_some() {
                    self.bus
                        .broadcast(EngineEvent::CacheChanged(self.resolver.cache().get_all()));
                }
                if report.epoch != self.epoch
                    || self.selection.active_zone_id.as_ref() != Some(&report.zone_id)
                {
                    debug!("Discarding stale presence update for {}", report.zone_id);
                } else {
                    self.apply_update(&report, cover.as_deref()).await;
                }
            }
        }

        if std::mem::take(&mut self.pending_retry) {
            debug!("Re-evaluating zones after update");
            self.evaluate().await;
        }
    }

    async fn apply_update(&mut self, report: &UpdateReport, cover: Option<&str>) {
        let Some(zone) = self.zones.get(&report.zone_id).cloned() else {
            return;
        };
        if zone.state != report.kind.expected_state() || zone.track_key() != report.track_key {
            debug!("Zone {} changed during update, waiting for re-check", zone.display_name);
            // Nothing was sent for this track: the next report must dispatch again
            self.last_track_key = None;
            self.last_image_key = None;
            return;
        }

        let options = DisplayOptions::from(&self.config.borrow().display);
        let Some(activity) = build_activity(
            &zone,
            cover,
            &options,
            report.track_start_ms,
            self.clock.now_ms(),
        ) else {
            return;
        };

        self.sink.set_activity(activity.clone()).await;
        self.last_activity = Some(activity.clone());

        if let Some(np) = zone.now_playing.as_ref() {
            match report.kind {
                UpdateKind::Play => {
                    info!("▶ {} - {} [{}]", np.title, np.artist, zone.display_name);
                    self.last_seek = Some(np.seek_position);
                    self.last_update_at = Some(Instant::now());
                }
                UpdateKind::Seek => {
                    info!("⏩ Seek detected [{}]", zone.display_name);
                    self.last_seek = Some(np.seek_position);
                    self.last_update_at = Some(Instant::now());
                }
                UpdateKind::Pause => {}
            }
        }

        self.bus
            .broadcast(EngineEvent::ActivityUpdated(Some(activity)));
        self.emit_state();
    }

    // ---- helpers ----

    fn forget_track(&mut self) {
        self.last_track_key = None;
        self.last_image_key = None;
        self.last_seek = None;
        self.last_update_at = None;
    }

    async fn clear_presence(&mut self) {
        self.epoch += 1;
        self.last_activity = None;
        self.sink.clear_activity().await;
        self.bus.broadcast(EngineEvent::ActivityUpdated(None));
    }

    fn snapshot(&self) -> StateSnapshot {
        let active_zone = self
            .selection
            .active_zone_id
            .as_ref()
            .and_then(|id| self.zones.get(id))
            .map(ActiveZoneView::of);
        StateSnapshot {
            source: self.source_visible,
            discord: self.sink.status(),
            active_zone,
            zones: summarize(&self.zones),
            last_activity: self.last_activity.clone(),
            updating: self.updating,
        }
    }

    fn emit_state(&mut self) {
        self.last_emit_at = Some(Instant::now());
        self.bus.broadcast(EngineEvent::StateChanged(self.snapshot()));
    }

    async fn shutdown(&mut self) {
        info!("Shutting down presence engine");
        self.timers.cancel_all();
        if self.sink.is_connected() {
            self.sink.clear_activity().await;
        }
        self.sink.disconnect().await;
    }
}

/// Cover resolution and lazy connect, off the actor task.
async fn run_update(
    sink: Arc<dyn PresenceSink>,
    resolver: Arc<ArtworkResolver>,
    cover: CoverPlan,
    ttl_ms: i64,
) -> Option<String> {
    let url = match cover {
        CoverPlan::Skip => None,
        CoverPlan::Cached(key) => resolver.cached(&key),
        CoverPlan::Resolve(key) => resolver.resolve(&key, ttl_ms).await,
    };

    if !sink.is_connected() {
        if let Err(e) = sink.connect().await {
            warn!("Discord not available: {}", e);
        }
    }
    url
}
