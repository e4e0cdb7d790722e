//! Discord IPC connection lifecycle.
//!
//! [`IpcTransport`] owns at most one socket. It performs the handshake,
//! writes frames, and when the socket closes unexpectedly it schedules a
//! single reconnect attempt at a time, spaced by [`Backoff`]. Lifecycle
//! changes are reported on an unbounded channel of [`TransportEvent`]s; the
//! transport never interprets what is sent over it.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::backoff::{Backoff, DEFAULT_RECONNECT_BASE, DEFAULT_RECONNECT_CAP};
use crate::codec::{Frame, IpcCodec, Opcode};
use crate::endpoint::{self, IpcStream};
use crate::errors::IpcError;

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const PROTOCOL_VERSION: u32 = 1;

type IpcFramed = Framed<Box<dyn IpcStream>, IpcCodec>;
type FrameWriter = SplitSink<IpcFramed, Frame>;
type FrameReader = SplitStream<IpcFramed>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// An explicit `connect()` succeeded.
    Connected { user: Option<String> },
    /// The socket was lost or released.
    Disconnected,
    /// A scheduled reconnect attempt succeeded.
    Reconnected { user: Option<String> },
}

#[derive(Debug, Clone)]
pub struct IpcConfig {
    pub client_id: String,
    /// First pipe index tried (`0..=9`).
    pub pipe_number: u8,
    /// Unix base directories searched for sockets.
    pub base_dirs: Vec<PathBuf>,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
    pub handshake_timeout: Duration,
}

impl IpcConfig {
    pub fn new(client_id: impl Into<String>, pipe_number: u8) -> Self {
        Self {
            client_id: client_id.into(),
            pipe_number,
            base_dirs: endpoint::default_base_dirs(),
            reconnect_base: DEFAULT_RECONNECT_BASE,
            reconnect_cap: DEFAULT_RECONNECT_CAP,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

struct Connection {
    writer: Option<FrameWriter>,
    reader: Option<JoinHandle<()>>,
    /// Bumped every time a socket is released, so a late close from an old
    /// reader is ignored.
    generation: u64,
}

impl Connection {
    fn release(&mut self) {
        self.writer = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.generation += 1;
    }
}

#[derive(Default)]
struct ReconnectSlot {
    pending: bool,
    handle: Option<JoinHandle<()>>,
}

struct Shared {
    config: IpcConfig,
    connection: Mutex<Connection>,
    status: StdMutex<ConnectionStatus>,
    auto_reconnect: AtomicBool,
    backoff: StdMutex<Backoff>,
    reconnect: StdMutex<ReconnectSlot>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn status(&self) -> ConnectionStatus {
        *lock(&self.status)
    }

    fn set_status(&self, status: ConnectionStatus) {
        *lock(&self.status) = status;
    }

    fn emit(&self, event: TransportEvent) {
        // Pas de consommateur : l'événement est simplement perdu
        let _ = self.events.send(event);
    }

    fn is_armed(&self) -> bool {
        self.auto_reconnect.load(Ordering::SeqCst)
    }

    /// Tries every candidate endpoint and handshakes on the first one that accepts.
    async fn establish(self: &Arc<Self>) -> Result<Option<String>, IpcError> {
        let mut conn = self.connection.lock().await;
        conn.release();
        self.set_status(ConnectionStatus::Connecting);

        let endpoints = endpoint::candidates(self.config.pipe_number, &self.config.base_dirs);
        let tried = endpoints.len();

        for endpoint in endpoints {
            debug!("Trying pipe: {}", endpoint);
            let stream = match endpoint.open().await {
                Ok(stream) => stream,
                Err(_) => continue,
            };

            let mut framed = Framed::new(stream, IpcCodec);
            return match self.handshake(&mut framed).await {
                Ok(user) => {
                    let (writer, reader) = framed.split();
                    let generation = conn.generation;
                    conn.writer = Some(writer);
                    conn.reader = Some(tokio::spawn(read_loop(
                        Arc::downgrade(self),
                        reader,
                        generation,
                    )));
                    self.set_status(ConnectionStatus::Connected);
                    lock(&self.backoff).reset();
                    info!(
                        "Connected to Discord (user: {})",
                        user.as_deref().unwrap_or("unknown")
                    );
                    Ok(user)
                }
                Err(e) => {
                    self.set_status(ConnectionStatus::Disconnected);
                    warn!("Discord IPC handshake failed on {}: {}", endpoint, e);
                    Err(e)
                }
            };
        }

        self.set_status(ConnectionStatus::Disconnected);
        Err(IpcError::NoEndpointFound { tried })
    }

    async fn handshake(&self, framed: &mut IpcFramed) -> Result<Option<String>, IpcError> {
        let hello = Frame::new(
            Opcode::Handshake,
            json!({ "v": PROTOCOL_VERSION, "client_id": self.config.client_id }),
        );
        framed.send(hello).await?;

        let reply = tokio::time::timeout(self.config.handshake_timeout, framed.next())
            .await
            .map_err(|_| IpcError::handshake("timed out waiting for READY"))?;

        match reply {
            Some(Ok(frame)) if frame.str_field("evt") == Some("READY") => Ok(frame
                .payload
                .pointer("/data/user/username")
                .and_then(Value::as_str)
                .map(str::to_string)),
            Some(Ok(frame)) => Err(IpcError::handshake(
                frame.str_field("message").unwrap_or("unexpected reply"),
            )),
            Some(Err(e)) => Err(IpcError::handshake(e.to_string())),
            None => Err(IpcError::handshake("connection closed during handshake")),
        }
    }

    /// Called by the reader when its socket ends.
    async fn handle_closed(self: &Arc<Self>, generation: u64) {
        {
            let mut conn = self.connection.lock().await;
            if conn.generation != generation {
                return;
            }
            // Le lecteur courant est la tâche appelante : on le détache sans l'annuler
            conn.reader = None;
            conn.release();
        }
        self.set_status(ConnectionStatus::Disconnected);
        info!("Discord IPC connection closed");
        self.emit(TransportEvent::Disconnected);

        if self.is_armed() {
            self.schedule_reconnect();
        }
    }

    /// Arms the reconnect timer unless one is already pending.
    fn schedule_reconnect(self: &Arc<Self>) {
        let mut slot = lock(&self.reconnect);
        if slot.pending {
            return;
        }

        let delay = lock(&self.backoff).current();
        info!("Discord reconnect in {}s...", delay.as_secs_f32());
        slot.pending = true;

        let weak = Arc::downgrade(self);
        slot.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            lock(&shared.reconnect).pending = false;

            match shared.establish().await {
                Ok(user) => {
                    info!("Discord reconnected successfully");
                    shared.emit(TransportEvent::Reconnected { user });
                }
                Err(e) => {
                    debug!("Discord reconnect attempt failed: {}", e);
                    lock(&shared.backoff).fail();
                    if shared.is_armed() {
                        shared.schedule_reconnect();
                    }
                }
            }
        }));
    }

    fn stop_reconnect(&self) {
        let mut slot = lock(&self.reconnect);
        slot.pending = false;
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
    }
}

async fn read_loop(shared: Weak<Shared>, mut reader: FrameReader, generation: u64) {
    while let Some(item) = reader.next().await {
        match item {
            Ok(frame) => match frame.opcode {
                Opcode::Ping => {
                    let Some(shared) = shared.upgrade() else {
                        return;
                    };
                    let mut conn = shared.connection.lock().await;
                    if conn.generation == generation {
                        if let Some(writer) = conn.writer.as_mut() {
                            if let Err(e) = writer.send(Frame::new(Opcode::Pong, frame.payload)).await {
                                debug!("Failed to answer Discord ping: {}", e);
                            }
                        }
                    }
                }
                Opcode::Close => {
                    debug!("Discord closed the IPC connection: {}", frame.payload);
                    break;
                }
                _ => debug!("Discord IPC frame: {}", frame.payload),
            },
            Err(e) => {
                error!("Discord IPC error: {}", e);
                break;
            }
        }
    }

    if let Some(shared) = shared.upgrade() {
        shared.handle_closed(generation).await;
    }
}

/// Handle on the Discord IPC connection. Cheap to clone.
#[derive(Clone)]
pub struct IpcTransport {
    shared: Arc<Shared>,
}

impl fmt::Debug for IpcTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpcTransport")
            .field("client_id", &self.shared.config.client_id)
            .field("status", &self.shared.status())
            .finish()
    }
}

impl IpcTransport {
    pub fn new(config: IpcConfig) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let backoff = Backoff::new(config.reconnect_base, config.reconnect_cap);
        let shared = Shared {
            config,
            connection: Mutex::new(Connection {
                writer: None,
                reader: None,
                generation: 0,
            }),
            status: StdMutex::new(ConnectionStatus::Disconnected),
            auto_reconnect: AtomicBool::new(false),
            backoff: StdMutex::new(backoff),
            reconnect: StdMutex::new(ReconnectSlot::default()),
            events,
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            rx,
        )
    }

    pub fn config(&self) -> &IpcConfig {
        &self.shared.config
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Whether a reconnect attempt is waiting for its delay to elapse.
    pub fn reconnect_pending(&self) -> bool {
        lock(&self.shared.reconnect).pending
    }

    /// Connects and handshakes. On success auto-reconnect is armed and the
    /// backoff reset; the returned value is the Discord username, if sent.
    ///
    /// A failure while auto-reconnect is armed puts the retry timer back.
    pub async fn connect(&self) -> Result<Option<String>, IpcError> {
        self.shared.stop_reconnect();
        let user = match self.shared.establish().await {
            Ok(user) => user,
            Err(e) => {
                if self.shared.is_armed() {
                    self.shared.schedule_reconnect();
                }
                return Err(e);
            }
        };
        self.shared.auto_reconnect.store(true, Ordering::SeqCst);
        self.shared
            .emit(TransportEvent::Connected { user: user.clone() });
        Ok(user)
    }

    /// Like [`connect`](Self::connect), but a failure arms auto-reconnect and
    /// schedules a retry instead of giving up.
    pub async fn connect_or_schedule(&self) -> bool {
        match self.connect().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Could not connect to Discord: {}", e);
                self.shared.auto_reconnect.store(true, Ordering::SeqCst);
                self.shared.schedule_reconnect();
                false
            }
        }
    }

    /// Writes one frame. Fails with [`IpcError::NotConnected`] when no socket
    /// is up; a write error releases the socket and lets reconnect take over.
    pub async fn send(&self, frame: Frame) -> Result<(), IpcError> {
        let mut conn = self.shared.connection.lock().await;
        if self.shared.status() != ConnectionStatus::Connected {
            return Err(IpcError::NotConnected);
        }
        let Some(writer) = conn.writer.as_mut() else {
            return Err(IpcError::NotConnected);
        };

        match writer.send(frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Failed to write to Discord IPC: {}", e);
                conn.release();
                drop(conn);

                self.shared.set_status(ConnectionStatus::Disconnected);
                self.shared.emit(TransportEvent::Disconnected);
                if self.shared.is_armed() {
                    self.shared.schedule_reconnect();
                }

                Err(IpcError::SendFailed(match e {
                    IpcError::Io(io) => io,
                    other => io::Error::other(other.to_string()),
                }))
            }
        }
    }

    /// Disarms auto-reconnect, sends a best-effort CLOSE and releases the socket.
    pub async fn disconnect(&self) {
        self.shared.auto_reconnect.store(false, Ordering::SeqCst);
        self.shared.stop_reconnect();

        let mut conn = self.shared.connection.lock().await;
        let was_connected = conn.writer.is_some();
        if let Some(mut writer) = conn.writer.take() {
            if let Err(e) = writer.send(Frame::new(Opcode::Close, json!({}))).await {
                debug!("Failed to send CLOSE frame: {}", e);
            }
            let _ = writer.close().await;
        }
        conn.release();
        drop(conn);

        self.shared.set_status(ConnectionStatus::Disconnected);
        if was_connected {
            self.shared.emit(TransportEvent::Disconnected);
        }
        info!("Disconnected from Discord");
    }
}
