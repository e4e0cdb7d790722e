#![cfg(unix)]

use std::path::Path;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use pmodiscord::{
    Activity, ConnectionStatus, Frame, IpcCodec, IpcConfig, IpcError, IpcTransport, Opcode,
    PresenceClient, TransportEvent,
};
use serde_json::json;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tokio_util::codec::Framed;

type ServerConn = Framed<UnixStream, IpcCodec>;

const WAIT: Duration = Duration::from_secs(2);

fn test_config(dir: &Path) -> IpcConfig {
    let mut config = IpcConfig::new("1475071196708995145", 0);
    config.base_dirs = vec![dir.to_path_buf()];
    config.reconnect_base = Duration::from_millis(50);
    config.reconnect_cap = Duration::from_millis(200);
    config.handshake_timeout = Duration::from_millis(500);
    config
}

fn fake_discord(dir: &Path, n: u8) -> UnixListener {
    UnixListener::bind(dir.join(format!("discord-ipc-{}", n))).unwrap()
}

/// Accepte une connexion et répond READY au handshake.
async fn accept_ready(listener: &UnixListener) -> ServerConn {
    let (stream, _) = listener.accept().await.unwrap();
    let mut conn = Framed::new(stream, IpcCodec);
    let hello = conn.next().await.unwrap().unwrap();
    assert_eq!(hello.opcode, Opcode::Handshake);
    assert_eq!(hello.payload["v"], 1);
    assert_eq!(hello.payload["client_id"], "1475071196708995145");

    conn.send(Frame::new(
        Opcode::Frame,
        json!({"cmd": "DISPATCH", "evt": "READY", "data": {"user": {"username": "tester"}}}),
    ))
    .await
    .unwrap();
    conn
}

async fn next_event(events: &mut UnboundedReceiver<TransportEvent>) -> TransportEvent {
    timeout(WAIT, events.recv()).await.unwrap().unwrap()
}

async fn next_frame(conn: &mut ServerConn) -> Frame {
    timeout(WAIT, conn.next()).await.unwrap().unwrap().unwrap()
}

#[tokio::test]
async fn test_connect_reports_user() {
    let dir = tempfile::tempdir().unwrap();
    let listener = fake_discord(dir.path(), 0);
    let (transport, mut events) = IpcTransport::new(test_config(dir.path()));

    let server = tokio::spawn(async move {
        let _conn = accept_ready(&listener).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let user = transport.connect().await.unwrap();
    assert_eq!(user.as_deref(), Some("tester"));
    assert_eq!(transport.status(), ConnectionStatus::Connected);
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Connected {
            user: Some("tester".into())
        }
    );
    server.await.unwrap();
}

#[tokio::test]
async fn test_later_pipe_index_is_found() {
    let dir = tempfile::tempdir().unwrap();
    let listener = fake_discord(dir.path(), 3);
    let (transport, _events) = IpcTransport::new(test_config(dir.path()));

    let server = tokio::spawn(async move {
        let _conn = accept_ready(&listener).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    assert!(transport.connect().await.is_ok());
    server.await.unwrap();
}

#[tokio::test]
async fn test_no_endpoint_found() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, _events) = IpcTransport::new(test_config(dir.path()));

    match transport.connect().await {
        Err(IpcError::NoEndpointFound { tried }) => assert_eq!(tried, 10 * 4),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(transport.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_handshake_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let listener = fake_discord(dir.path(), 0);
    let (transport, _events) = IpcTransport::new(test_config(dir.path()));

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut conn = Framed::new(stream, IpcCodec);
        let _hello = conn.next().await;
        conn.send(Frame::new(
            Opcode::Close,
            json!({"code": 4000, "message": "Invalid Client ID"}),
        ))
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    match transport.connect().await {
        Err(IpcError::HandshakeRejected(msg)) => assert_eq!(msg, "Invalid Client ID"),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_silent_endpoint_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let listener = fake_discord(dir.path(), 0);
    let (transport, _events) = IpcTransport::new(test_config(dir.path()));

    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    assert!(matches!(
        transport.connect().await,
        Err(IpcError::HandshakeRejected(_))
    ));
}

#[tokio::test]
async fn test_set_activity_frame() {
    let dir = tempfile::tempdir().unwrap();
    let listener = fake_discord(dir.path(), 0);
    let (transport, _events) = IpcTransport::new(test_config(dir.path()));
    let client = PresenceClient::new(transport);

    let server = tokio::spawn(async move {
        let mut conn = accept_ready(&listener).await;
        let set = next_frame(&mut conn).await;
        let clear = next_frame(&mut conn).await;
        (set, clear)
    });

    client.connect().await.unwrap();
    assert!(client.set_activity(Activity::listening("Song One")).await);
    assert!(client.clear_activity().await);

    let (set, clear) = server.await.unwrap();
    assert_eq!(set.opcode, Opcode::Frame);
    assert_eq!(set.payload["cmd"], "SET_ACTIVITY");
    assert_eq!(set.payload["args"]["pid"], std::process::id());
    assert_eq!(set.payload["args"]["activity"]["details"], "Song One");
    assert_eq!(set.payload["args"]["activity"]["type"], 2);
    assert!(set.payload["nonce"].is_string());
    assert!(clear.payload["args"]["activity"].is_null());
    assert_eq!(client.last_activity(), None);
}

#[tokio::test]
async fn test_send_while_disconnected_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, _events) = IpcTransport::new(test_config(dir.path()));
    let client = PresenceClient::new(transport.clone());

    assert!(!client.set_activity(Activity::listening("Song One")).await);
    // L'activité est conservée pour la prochaine reconnexion
    assert!(client.last_activity().is_some());
    assert!(matches!(
        transport.send(Frame::new(Opcode::Frame, json!({}))).await,
        Err(IpcError::NotConnected)
    ));
}

#[tokio::test]
async fn test_reconnect_resends_last_activity_once() {
    let dir = tempfile::tempdir().unwrap();
    let listener = fake_discord(dir.path(), 0);
    let (transport, mut events) = IpcTransport::new(test_config(dir.path()));
    let client = PresenceClient::new(transport.clone());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let server = tokio::spawn(async move {
        // Première session : on lit l'activité puis on ferme brutalement
        let mut conn = accept_ready(&listener).await;
        let first = next_frame(&mut conn).await;
        tx.send(first).unwrap();
        drop(conn);

        // Seconde session, ouverte par la reconnexion automatique
        let mut conn = accept_ready(&listener).await;
        while let Ok(Some(Ok(frame))) = timeout(Duration::from_millis(500), conn.next()).await {
            tx.send(frame).unwrap();
        }
    });

    client.connect().await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::Connected { .. }
    ));
    assert!(client.set_activity(Activity::listening("Song One")).await);

    assert_eq!(next_event(&mut events).await, TransportEvent::Disconnected);

    let reconnected = next_event(&mut events).await;
    assert!(matches!(reconnected, TransportEvent::Reconnected { .. }));
    assert!(client.handle_event(&reconnected).await);

    server.await.unwrap();
    let frames: Vec<Frame> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].payload["args"]["activity"]["details"], "Song One");
}

#[tokio::test]
async fn test_reconnect_retries_until_endpoint_returns() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut events) = IpcTransport::new(test_config(dir.path()));

    // Aucun Discord au démarrage : une tentative est planifiée
    assert!(!transport.connect_or_schedule().await);
    assert!(transport.reconnect_pending());

    tokio::time::sleep(Duration::from_millis(120)).await;
    let listener = fake_discord(dir.path(), 0);
    let server = tokio::spawn(async move {
        let _conn = accept_ready(&listener).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::Reconnected {
            user: Some(_)
        }
    ));
    assert!(transport.is_connected());
    server.await.unwrap();
}

#[tokio::test]
async fn test_failed_connect_keeps_pending_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut events) = IpcTransport::new(test_config(dir.path()));

    assert!(!transport.connect_or_schedule().await);
    assert!(transport.reconnect_pending());

    // Tentative explicite pendant que Discord est toujours absent
    assert!(transport.connect().await.is_err());
    assert!(transport.reconnect_pending());

    let listener = fake_discord(dir.path(), 0);
    let server = tokio::spawn(async move {
        let _conn = accept_ready(&listener).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::Reconnected { .. }
    ));
    assert!(transport.is_connected());
    server.await.unwrap();
}

#[tokio::test]
async fn test_disconnect_sends_close_and_disarms() {
    let dir = tempfile::tempdir().unwrap();
    let listener = fake_discord(dir.path(), 0);
    let (transport, mut events) = IpcTransport::new(test_config(dir.path()));

    let server = tokio::spawn(async move {
        let mut conn = accept_ready(&listener).await;
        let close = next_frame(&mut conn).await;
        let reconnect = timeout(Duration::from_millis(400), listener.accept()).await;
        (close, reconnect.is_ok())
    });

    transport.connect().await.unwrap();
    let _connected = next_event(&mut events).await;
    transport.disconnect().await;

    let (close, reconnected) = server.await.unwrap();
    assert_eq!(close.opcode, Opcode::Close);
    assert_eq!(close.payload, json!({}));
    assert!(!reconnected);
    assert_eq!(next_event(&mut events).await, TransportEvent::Disconnected);
    assert!(!transport.reconnect_pending());
}
