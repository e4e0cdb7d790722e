//! Presence command vocabulary on top of [`IpcTransport`].

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::json;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::activity::Activity;
use crate::codec::{Frame, Opcode};
use crate::errors::IpcError;
use crate::transport::{ConnectionStatus, IpcTransport, TransportEvent};

/// Sends `SET_ACTIVITY` commands and remembers the last payload so it can be
/// replayed after a reconnect.
#[derive(Debug)]
pub struct PresenceClient {
    transport: IpcTransport,
    last_activity: Mutex<Option<Activity>>,
    pid: u32,
}

impl PresenceClient {
    pub fn new(transport: IpcTransport) -> Self {
        Self {
            transport,
            last_activity: Mutex::new(None),
            pid: std::process::id(),
        }
    }

    fn last(&self) -> MutexGuard<'_, Option<Activity>> {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn transport(&self) -> &IpcTransport {
        &self.transport
    }

    pub fn status(&self) -> ConnectionStatus {
        self.transport.status()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn last_activity(&self) -> Option<Activity> {
        self.last().clone()
    }

    pub async fn connect(&self) -> Result<Option<String>, IpcError> {
        self.transport.connect().await
    }

    pub async fn connect_or_schedule(&self) -> bool {
        self.transport.connect_or_schedule().await
    }

    pub async fn disconnect(&self) {
        self.transport.disconnect().await
    }

    /// Records `activity` as the current presence and sends it.
    ///
    /// Returns `false` when not connected or when the write failed; the
    /// payload is still kept for the next reconnect.
    pub async fn set_activity(&self, activity: Activity) -> bool {
        *self.last() = Some(activity.clone());

        if !self.is_connected() {
            warn!("Not connected to Discord, skipping activity update");
            return false;
        }
        match self.send_command(Some(&activity)).await {
            Ok(()) => {
                debug!("Activity updated");
                true
            }
            Err(e) => {
                error!("Failed to set activity: {}", e);
                false
            }
        }
    }

    pub async fn clear_activity(&self) -> bool {
        *self.last() = None;

        if !self.is_connected() {
            return false;
        }
        match self.send_command(None).await {
            Ok(()) => {
                debug!("Activity cleared");
                true
            }
            Err(e) => {
                error!("Failed to clear activity: {}", e);
                false
            }
        }
    }

    /// Sends the remembered activity again, if any.
    pub async fn resend_last(&self) -> bool {
        let Some(activity) = self.last_activity() else {
            return false;
        };
        debug!("Resending last activity after reconnect");
        self.set_activity(activity).await
    }

    /// Reacts to a transport lifecycle event. Returns `true` when a frame was sent.
    pub async fn handle_event(&self, event: &TransportEvent) -> bool {
        match event {
            TransportEvent::Reconnected { .. } => self.resend_last().await,
            TransportEvent::Connected { .. } | TransportEvent::Disconnected => false,
        }
    }

    async fn send_command(&self, activity: Option<&Activity>) -> Result<(), IpcError> {
        let payload = json!({
            "cmd": "SET_ACTIVITY",
            "args": {
                "pid": self.pid,
                "activity": activity,
            },
            "nonce": Uuid::new_v4().to_string(),
        });
        self.transport.send(Frame::new(Opcode::Frame, payload)).await
    }
}
