//! # pmodiscord
//!
//! Client side of the Discord local IPC protocol, limited to what a rich
//! presence publisher needs:
//!
//! - [`codec`]: length-prefixed JSON framing as a `tokio_util` codec
//! - [`endpoint`]: enumeration of `discord-ipc-N` sockets / named pipes
//! - [`transport`]: handshake, frame sending, reconnect with [`Backoff`]
//! - [`client`]: `SET_ACTIVITY` commands and replay of the last activity
//!
//! ```no_run
//! use pmodiscord::{Activity, IpcConfig, IpcTransport, PresenceClient};
//!
//! # async fn run() {
//! let (transport, mut events) = IpcTransport::new(IpcConfig::new("1475071196708995145", 0));
//! let client = PresenceClient::new(transport);
//! client.connect_or_schedule().await;
//! client.set_activity(Activity::listening("Song One")).await;
//!
//! while let Some(event) = events.recv().await {
//!     client.handle_event(&event).await;
//! }
//! # }
//! ```

pub mod activity;
pub mod backoff;
pub mod client;
pub mod codec;
pub mod endpoint;
pub mod errors;
pub mod transport;

pub use activity::{Activity, Assets, Button, Timestamps, ACTIVITY_TYPE_LISTENING};
pub use backoff::Backoff;
pub use client::PresenceClient;
pub use codec::{Frame, IpcCodec, Opcode};
pub use endpoint::Endpoint;
pub use errors::IpcError;
pub use transport::{ConnectionStatus, IpcConfig, IpcTransport, TransportEvent};
