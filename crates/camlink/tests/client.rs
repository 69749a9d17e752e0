//! Integration tests for the client lifecycle: connect, login,
//! dispatch, keepalive, manual disconnect, and auto-reconnect, driven
//! through an in-process fake transport that plays the server's side of
//! the protocol.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use camlink::{ClientBuilder, ClientError, ClientState, ServerConfig, StaticServers};
use camlink::events::LifecycleEvent;
use camlink_protocol::{
    BinaryFraming, FrameBuffer, FramingKind, Packet, PacketType, UserId,
    VideoState, MAGIC,
};
use camlink_transport::{Connection, Transport, TransportError};

type Client = camlink::Client<FakeTransport>;

/// Long enough that no keepalive tick fires during a test that does
/// not exercise keepalive.
const QUIET_KEEPALIVE: Duration = Duration::from_secs(600);

// -------------------------------------------------------------------------
// Fake transport
// -------------------------------------------------------------------------

/// The server's half of one scripted connection.
struct ServerSide {
    to_client: StdMutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    from_client: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl ServerSide {
    /// Sends one binary frame the way a real server frames it.
    fn send_packet(
        &self,
        packet_type: PacketType,
        from: i32,
        to: i32,
        arg1: i32,
        arg2: i32,
        payload: Option<&str>,
    ) {
        let payload_bytes = payload.unwrap_or("").as_bytes();
        let mut frame = Vec::new();
        for v in [
            MAGIC,
            packet_type.code(),
            from,
            to,
            arg1,
            arg2,
            payload_bytes.len() as i32,
        ] {
            frame.extend_from_slice(&v.to_be_bytes());
        }
        frame.extend_from_slice(payload_bytes);
        if let Some(tx) = &*self.to_client.lock().unwrap() {
            let _ = tx.send(frame);
        }
    }

    /// Receives and decodes the next frame the client sent.
    async fn recv_packet(&self) -> Packet {
        let bytes = timeout(Duration::from_secs(2), async {
            self.from_client.lock().await.recv().await
        })
        .await
        .expect("timed out waiting for a client frame")
        .expect("client side closed");
        let mut buf = FrameBuffer::new();
        buf.extend(&bytes);
        BinaryFraming::decode_one(&mut buf)
            .expect("client sent an invalid frame")
            .expect("client sent a partial frame")
    }

    /// Simulates the server dropping the connection.
    fn hang_up(&self) {
        self.to_client.lock().unwrap().take();
    }
}

struct Endpoints {
    client_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    client_tx: mpsc::UnboundedSender<Vec<u8>>,
}

/// A [`Transport`] producing pre-provisioned in-process connections.
/// Each `connect` consumes the next scripted endpoint; running out
/// behaves like a refused connection.
struct FakeTransport {
    keepalive: Duration,
    pending: Arc<StdMutex<VecDeque<Endpoints>>>,
}

impl FakeTransport {
    fn with_connections(
        n: usize,
        keepalive: Duration,
    ) -> (Self, Vec<Arc<ServerSide>>, Arc<StdMutex<VecDeque<Endpoints>>>) {
        let mut endpoints = VecDeque::new();
        let mut servers = Vec::new();
        for _ in 0..n {
            let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
            let (from_client_tx, from_client_rx) = mpsc::unbounded_channel();
            endpoints.push_back(Endpoints {
                client_rx: to_client_rx,
                client_tx: from_client_tx,
            });
            servers.push(Arc::new(ServerSide {
                to_client: StdMutex::new(Some(to_client_tx)),
                from_client: Mutex::new(from_client_rx),
            }));
        }
        let pending = Arc::new(StdMutex::new(endpoints));
        (
            Self {
                keepalive,
                pending: Arc::clone(&pending),
            },
            servers,
            pending,
        )
    }
}

impl Transport for FakeTransport {
    type Conn = FakeConnection;

    async fn connect(&self, _addr: &str) -> Result<FakeConnection, TransportError> {
        let endpoints = self.pending.lock().unwrap().pop_front().ok_or_else(|| {
            TransportError::ConnectFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "no scripted connection left",
            ))
        })?;
        Ok(FakeConnection {
            rx: Mutex::new(endpoints.client_rx),
            tx: endpoints.client_tx,
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        })
    }

    fn framing(&self) -> FramingKind {
        FramingKind::Binary
    }

    fn keepalive_interval(&self) -> Duration {
        self.keepalive
    }
}

struct FakeConnection {
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    closed: AtomicBool,
    close_signal: Notify,
}

impl Connection for FakeConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed("locally closed".into()));
        }
        self.tx
            .send(data.to_vec())
            .map_err(|_| TransportError::ConnectionClosed("server gone".into()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = self.close_signal.notified() => Ok(None),
            msg = rx.recv() => Ok(msg),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        self.close_signal.notify_one();
        Ok(())
    }
}

// -------------------------------------------------------------------------
// Helpers
// -------------------------------------------------------------------------

fn test_client(transport: FakeTransport) -> Client {
    // Honor RUST_LOG when debugging a failing test.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    ClientBuilder::new()
        .backoff(Duration::from_millis(20), Duration::from_millis(160))
        .config_fetcher(StaticServers(ServerConfig {
            chat_servers: vec!["fake:8100".into()],
            websocket_servers: vec!["fake:443".into()],
        }))
        .build(transport)
}

/// Plays the server's side of a successful login handshake.
fn spawn_login_responder(
    server: Arc<ServerSide>,
    assigned_name: &str,
    session_id: i32,
) -> JoinHandle<()> {
    let assigned_name = assigned_name.to_string();
    tokio::spawn(async move {
        loop {
            let packet = server.recv_packet().await;
            if packet.packet_type == PacketType::Login {
                server.send_packet(
                    PacketType::Login,
                    0,
                    session_id,
                    0,
                    0,
                    Some(&assigned_name),
                );
                break;
            }
        }
    })
}

async fn expect_lifecycle(
    rx: &mut tokio::sync::broadcast::Receiver<LifecycleEvent>,
    want: fn(&LifecycleEvent) -> bool,
) -> LifecycleEvent {
    timeout(Duration::from_secs(2), async {
        loop {
            let event = rx.recv().await.expect("lifecycle channel closed");
            if want(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for lifecycle event")
}

// =========================================================================
// Connect / login
// =========================================================================

#[tokio::test]
async fn test_connect_without_login_reaches_connected() {
    let (transport, _servers, _pending) =
        FakeTransport::with_connections(1, QUIET_KEEPALIVE);
    let client = test_client(transport);
    let mut lifecycle = client.bus().subscribe_lifecycle();

    client.connect(false).await.expect("connect should succeed");

    assert_eq!(client.state(), ClientState::Connected);
    let event =
        expect_lifecycle(&mut lifecycle, |e| matches!(e, LifecycleEvent::Connected)).await;
    assert_eq!(event, LifecycleEvent::Connected);

    client.disconnect().await;
    assert_eq!(client.state(), ClientState::Disconnected);
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let (transport, _servers, _pending) =
        FakeTransport::with_connections(2, QUIET_KEEPALIVE);
    let client = test_client(transport);
    client.connect(false).await.unwrap();

    let err = client.connect(false).await.unwrap_err();

    assert!(matches!(err, ClientError::AlreadyConnected));
    client.disconnect().await;
}

#[tokio::test]
async fn test_login_success_reaches_ready_and_stores_identity() {
    let (transport, servers, _pending) =
        FakeTransport::with_connections(1, QUIET_KEEPALIVE);
    let client = test_client(transport);
    let responder = spawn_login_responder(Arc::clone(&servers[0]), "Guest480112", 777);

    client.connect(true).await.expect("login should succeed");

    assert_eq!(client.state(), ClientState::Ready);
    assert!(client.logged_in());
    assert_eq!(client.session_id(), 777);
    // The guest placeholder was replaced by the assigned identity.
    assert_eq!(client.username(), "Guest480112");
    responder.await.unwrap();

    // Disconnecting a guest resets the stored username so the next
    // login requests a fresh identity.
    client.disconnect().await;
    assert_eq!(client.username(), "guest");
}

#[tokio::test]
async fn test_login_sends_credentials_and_version() {
    let (transport, servers, _pending) =
        FakeTransport::with_connections(1, QUIET_KEEPALIVE);
    let client = ClientBuilder::new()
        .username("my_account")
        .password("hunter2")
        .backoff(Duration::from_millis(20), Duration::from_millis(160))
        .config_fetcher(StaticServers(ServerConfig {
            chat_servers: vec!["fake:8100".into()],
            websocket_servers: vec![],
        }))
        .build(transport);
    let server = Arc::clone(&servers[0]);

    let checker = tokio::spawn(async move {
        let packet = server.recv_packet().await;
        assert_eq!(packet.packet_type, PacketType::Login);
        assert_eq!(packet.arg1, camlink_protocol::LOGIN_VERSION);
        assert_eq!(
            packet.payload.as_text(),
            Some("my_account:hunter2"),
            "credentials travel as one user:pass string"
        );
        server.send_packet(PacketType::Login, 0, 42, 0, 0, Some("my_account"));
    });

    client.connect(true).await.unwrap();
    checker.await.unwrap();

    // A non-guest username is preserved across disconnect.
    client.disconnect().await;
    assert_eq!(client.username(), "my_account");
}

#[tokio::test]
async fn test_login_failure_surfaces_to_connect_caller() {
    let (transport, servers, _pending) =
        FakeTransport::with_connections(1, QUIET_KEEPALIVE);
    let client = test_client(transport);
    let server = Arc::clone(&servers[0]);

    let responder = tokio::spawn(async move {
        loop {
            let packet = server.recv_packet().await;
            if packet.packet_type == PacketType::Login {
                // Nonzero arg1: rejected.
                server.send_packet(PacketType::Login, 0, 0, 2, 0, None);
                break;
            }
        }
    });

    let err = client.connect(true).await.unwrap_err();

    assert!(matches!(err, ClientError::LoginFailed(2)), "got {err}");
    responder.await.unwrap();
    // Stop the background reconnect loop.
    client.disconnect().await;
}

// =========================================================================
// Dispatch into the entity model
// =========================================================================

#[tokio::test]
async fn test_dispatched_session_state_lands_in_registry() {
    let (transport, servers, _pending) =
        FakeTransport::with_connections(1, QUIET_KEEPALIVE);
    let client = test_client(transport);
    client.connect(false).await.unwrap();

    let bus = client.bus();
    let mut changes = bus.subscribe_entity(UserId(123));
    servers[0].send_packet(
        PacketType::SessionState,
        0,
        0,
        0,
        123,
        Some(r#"{"sid":1,"vs":90,"m":{"flags":8}}"#),
    );

    // Wait until the merge published, then inspect the registry.
    let change = timeout(Duration::from_secs(2), changes.recv())
        .await
        .expect("timed out waiting for a property change")
        .unwrap();
    assert_eq!(change.user_id, UserId(123));

    let registry = client.registry();
    let registry = registry.lock().await;
    let entity = registry.get(UserId(123)).expect("entity created implicitly");
    assert_eq!(entity.best_session_id().0, 1);
    assert_eq!(entity.best_session().video_state(), VideoState::Online);
    assert!(entity.best_session().true_private());
    drop(registry);

    client.disconnect().await;
}

#[tokio::test]
async fn test_every_packet_reaches_the_catch_all_channel() {
    let (transport, servers, _pending) =
        FakeTransport::with_connections(1, QUIET_KEEPALIVE);
    let client = test_client(transport);
    client.connect(false).await.unwrap();

    let bus = client.bus();
    let mut packets = bus.subscribe_packets();
    // An unknown type passes through untouched.
    servers[0].send_packet(PacketType::Other(81), 1, 2, 3, 4, None);

    let packet = timeout(Duration::from_secs(2), packets.recv())
        .await
        .expect("timed out waiting for the packet")
        .unwrap();
    assert_eq!(packet.packet_type, PacketType::Other(81));
    assert_eq!((packet.from, packet.to, packet.arg1, packet.arg2), (1, 2, 3, 4));

    client.disconnect().await;
}

// =========================================================================
// Command surface
// =========================================================================

#[tokio::test]
async fn test_send_chat_frames_room_message() {
    let (transport, servers, _pending) =
        FakeTransport::with_connections(1, QUIET_KEEPALIVE);
    let client = test_client(transport);
    client.connect(false).await.unwrap();

    client.send_chat(UserId(123), "hello there").await.unwrap();

    let packet = servers[0].recv_packet().await;
    assert_eq!(packet.packet_type, PacketType::RoomChat);
    assert_eq!(packet.to, 100_000_123, "room id, not user id");
    assert_eq!(packet.payload.as_text(), Some("hello there"));

    client.disconnect().await;
}

#[tokio::test]
async fn test_join_room_normalizes_either_id_space() {
    let (transport, servers, _pending) =
        FakeTransport::with_connections(1, QUIET_KEEPALIVE);
    let client = test_client(transport);
    client.connect(false).await.unwrap();

    client.join_room(UserId(123)).await.unwrap();

    let packet = servers[0].recv_packet().await;
    assert_eq!(packet.packet_type, PacketType::JoinRoom);
    assert_eq!(packet.to, 100_000_123);

    client.disconnect().await;
}

#[tokio::test]
async fn test_send_command_without_connection_errors() {
    let (transport, _servers, _pending) =
        FakeTransport::with_connections(0, QUIET_KEEPALIVE);
    let client = test_client(transport);

    let err = client.send_chat(UserId(1), "hi").await.unwrap_err();

    assert!(matches!(err, ClientError::NotConnected));
}

#[tokio::test]
async fn test_lookup_user_found_and_missing() {
    let (transport, servers, _pending) =
        FakeTransport::with_connections(1, QUIET_KEEPALIVE);
    let client = test_client(transport);
    client.connect(false).await.unwrap();
    let server = Arc::clone(&servers[0]);

    let responder = tokio::spawn(async move {
        // First query: found.
        let packet = server.recv_packet().await;
        assert_eq!(packet.packet_type, PacketType::UserLookup);
        assert_eq!(packet.payload.as_text(), Some("AspenRae"));
        server.send_packet(
            PacketType::UserLookup,
            0,
            0,
            0,
            0,
            Some(r#"{"nm":"AspenRae","uid":123,"vs":90,"lv":4}"#),
        );
        // Second query: the server echoes the name back as plain text.
        let packet = server.recv_packet().await;
        assert_eq!(packet.packet_type, PacketType::UserLookup);
        server.send_packet(PacketType::UserLookup, 0, 0, 0, 0, Some("ghost_user"));
    });

    let found = client.lookup_user("AspenRae").await.unwrap();
    let payload = found.expect("user should be found");
    assert_eq!(payload["uid"], Value::from(123));

    let missing = client.lookup_user("Ghost_User").await.unwrap();
    assert!(missing.is_none());

    responder.await.unwrap();
    client.disconnect().await;
}

// =========================================================================
// Keepalive
// =========================================================================

#[tokio::test]
async fn test_keepalive_sends_noop_while_traffic_flows() {
    let (transport, servers, _pending) =
        FakeTransport::with_connections(1, Duration::from_millis(50));
    let client = test_client(transport);
    client.connect(false).await.unwrap();
    let server = Arc::clone(&servers[0]);

    // Feed steady traffic so every tick takes the healthy branch.
    let feeder = {
        let server = Arc::clone(&servers[0]);
        tokio::spawn(async move {
            loop {
                server.send_packet(PacketType::Null, 0, 0, 0, 0, None);
                tokio::time::sleep(Duration::from_millis(15)).await;
            }
        })
    };

    let packet = server.recv_packet().await;
    assert_eq!(packet.packet_type, PacketType::Null, "keepalive no-op");

    feeder.abort();
    client.disconnect().await;
}

#[tokio::test]
async fn test_keepalive_silence_is_treated_as_dead_connection() {
    let (transport, _servers, _pending) =
        FakeTransport::with_connections(1, Duration::from_millis(40));
    let client = test_client(transport);
    let mut lifecycle = client.bus().subscribe_lifecycle();
    client.connect(false).await.unwrap();

    // Send nothing: the first full keepalive period must kill the
    // connection and run the disconnect path.
    let event = expect_lifecycle(&mut lifecycle, |e| {
        matches!(e, LifecycleEvent::Disconnected { .. })
    })
    .await;
    if let LifecycleEvent::Disconnected { reason } = event {
        assert!(reason.contains("keepalive"), "reason: {reason}");
    }

    client.disconnect().await;
}

// =========================================================================
// Disconnect and reconnect
// =========================================================================

#[tokio::test]
async fn test_manual_disconnect_does_not_reconnect() {
    let (transport, _servers, pending) =
        FakeTransport::with_connections(2, QUIET_KEEPALIVE);
    let client = test_client(transport);
    client.connect(false).await.unwrap();

    client.disconnect().await;
    assert_eq!(client.state(), ClientState::Disconnected);

    // Give a would-be reconnect plenty of time to fire.
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(client.state(), ClientState::Disconnected);
    assert_eq!(
        pending.lock().unwrap().len(),
        1,
        "the second scripted connection must remain unused"
    );
}

#[tokio::test]
async fn test_server_close_triggers_backoff_reconnect() {
    let (transport, servers, _pending) =
        FakeTransport::with_connections(2, QUIET_KEEPALIVE);
    let client = test_client(transport);
    let mut lifecycle = client.bus().subscribe_lifecycle();
    client.connect(false).await.unwrap();

    servers[0].hang_up();

    let _ = expect_lifecycle(&mut lifecycle, |e| {
        matches!(e, LifecycleEvent::Disconnected { .. })
    })
    .await;
    // The second Connected proves the automatic reconnect used the
    // next scripted endpoint.
    let _ = expect_lifecycle(&mut lifecycle, |e| matches!(e, LifecycleEvent::Connected)).await;
    assert_eq!(client.state(), ClientState::Connected);

    client.disconnect().await;
}

// =========================================================================
// Initial roster
// =========================================================================

#[tokio::test]
async fn test_connect_and_wait_for_models_resolves_on_metrics() {
    let (transport, servers, _pending) =
        FakeTransport::with_connections(1, QUIET_KEEPALIVE);
    let client = test_client(transport);
    let server = Arc::clone(&servers[0]);

    let responder = tokio::spawn(async move {
        loop {
            let packet = server.recv_packet().await;
            if packet.packet_type == PacketType::Login {
                server.send_packet(PacketType::Login, 0, 9, 0, 0, Some("Guest1"));
                // Roster progress: 2 of 2 loaded.
                server.send_packet(PacketType::Metrics, 0, 0, 2, 2, None);
                break;
            }
        }
    });

    timeout(Duration::from_secs(2), client.connect_and_wait_for_models())
        .await
        .expect("timed out waiting for the roster")
        .expect("connect should succeed");

    responder.await.unwrap();
    client.disconnect().await;
}

#[tokio::test]
async fn test_roster_loads_through_list_batches() {
    let (transport, servers, _pending) =
        FakeTransport::with_connections(1, QUIET_KEEPALIVE);
    let client = test_client(transport);
    let server = Arc::clone(&servers[0]);

    let responder = tokio::spawn(async move {
        loop {
            let packet = server.recv_packet().await;
            if packet.packet_type == PacketType::Login {
                server.send_packet(PacketType::Login, 0, 9, 0, 0, Some("Guest1"));
                // Announce the total, then deliver it in two batches.
                server.send_packet(PacketType::Metrics, 0, 0, 0, 2, None);
                server.send_packet(
                    PacketType::ListBatch,
                    0,
                    0,
                    0,
                    0,
                    Some(r#"[{"uid":11,"sid":1,"vs":90}]"#),
                );
                server.send_packet(
                    PacketType::ListBatch,
                    0,
                    0,
                    0,
                    0,
                    Some(r#"[{"uid":12,"sid":2,"vs":90}]"#),
                );
                break;
            }
        }
    });

    timeout(Duration::from_secs(2), client.connect_and_wait_for_models())
        .await
        .expect("timed out waiting for the roster")
        .expect("connect should succeed");

    let registry = client.registry();
    let registry = registry.lock().await;
    assert_eq!(registry.online().len(), 2);
    drop(registry);

    responder.await.unwrap();
    client.disconnect().await;
}

// =========================================================================
// Registry reset on last disconnect
// =========================================================================

#[tokio::test]
async fn test_last_disconnect_drives_entities_offline() {
    let (transport, servers, _pending) =
        FakeTransport::with_connections(1, QUIET_KEEPALIVE);
    let client = test_client(transport);
    client.connect(false).await.unwrap();

    let bus = client.bus();
    let mut changes = bus.subscribe_entity(UserId(55));
    servers[0].send_packet(
        PacketType::SessionState,
        0,
        0,
        0,
        55,
        Some(r#"{"sid":4,"vs":90}"#),
    );
    // Wait for the merge to land.
    let _ = timeout(Duration::from_secs(2), changes.recv()).await.unwrap().unwrap();

    client.disconnect().await;

    let registry = client.registry();
    let registry = registry.lock().await;
    assert!(
        registry.get(UserId(55)).unwrap().video_state().is_offline(),
        "losing the last connection must reset everyone to offline"
    );
}
