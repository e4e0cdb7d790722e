//! Outbound presence seam.

use async_trait::async_trait;
use pmodiscord::{Activity, ConnectionStatus, PresenceClient, TransportEvent};

use crate::errors::PresenceError;

/// Whatever displays the presence. [`PresenceClient`] in production.
#[async_trait]
pub trait PresenceSink: Send + Sync {
    fn status(&self) -> ConnectionStatus;

    fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    async fn connect(&self) -> Result<(), PresenceError>;

    /// Returns `false` when the activity could not be delivered.
    async fn set_activity(&self, activity: Activity) -> bool;

    async fn clear_activity(&self) -> bool;

    /// Lifecycle notification from the transport; returns `true` if a frame was sent.
    async fn handle_event(&self, event: &TransportEvent) -> bool;

    async fn disconnect(&self);
}

#[async_trait]
impl PresenceSink for PresenceClient {
    fn status(&self) -> ConnectionStatus {
        PresenceClient::status(self)
    }

    async fn connect(&self) -> Result<(), PresenceError> {
        PresenceClient::connect(self).await?;
        Ok(())
    }

    async fn set_activity(&self, activity: Activity) -> bool {
        PresenceClient::set_activity(self, activity).await
    }

    async fn clear_activity(&self) -> bool {
        PresenceClient::clear_activity(self).await
    }

    async fn handle_event(&self, event: &TransportEvent) -> bool {
        PresenceClient::handle_event(self, event).await
    }

    async fn disconnect(&self) {
        PresenceClient::disconnect(self).await
    }
}
