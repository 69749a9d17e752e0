//! The client: connection lifecycle, dispatch loop, keepalive, and
//! auto-reconnect.
//!
//! One `Client` owns at most one live connection at a time and runs a
//! single dispatch task for it. The task is the client's one logical
//! thread of control: it reads chunks, decodes as many frames as each
//! chunk holds, and handles every packet before the next read. The
//! keepalive tick lives in the same task, so there is never concurrent
//! dispatch for one connection.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect()──→ Connecting ──open──→ Connected
//!      ↑                                              │ login sent
//!      │                                          LoggingIn
//!      │                                              │ reply arg1 == 0
//!      └──────── close / error / keepalive ──────── Ready
//!                (backoff reconnect unless manual)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use rand::seq::IndexedRandom;
use serde_json::Value;
use tokio::sync::{oneshot, watch, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use camlink_events::{EventBus, LifecycleEvent};
use camlink_model::EntityRegistry;
use camlink_protocol::{
    BinaryFraming, FrameBuffer, FramingKind, PacketType, TextFraming,
    LOGIN_VERSION,
};
use camlink_transport::{Connection, Transport};

use crate::config::{ConfigFetcher, HttpConfigFetcher, ServerConfig};
use crate::emote::{EmoteCodec, PassthroughCodec};
use crate::error::ClientError;

/// The username placeholder that requests a fresh guest identity.
pub const GUEST_USERNAME: &str = "guest";

/// Prefix of server-assigned guest display names.
const ASSIGNED_GUEST_PREFIX: &str = "Guest";

/// Default URL of the server-pool config blob.
const DEFAULT_CONFIG_URL: &str = "https://www.example.net/chat_config.js";

// ---------------------------------------------------------------------------
// State machine and supporting types
// ---------------------------------------------------------------------------

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No connection; the initial and terminal state.
    Disconnected,
    /// Resolving a server and opening the transport.
    Connecting,
    /// Transport open, no login requested or not yet sent.
    Connected,
    /// Login command sent, awaiting the server's reply.
    LoggingIn,
    /// Login acknowledged; the full command surface is available.
    Ready,
}

/// Mutable client settings. The username is rewritten when the server
/// assigns a guest identity, and reset to the placeholder on
/// disconnect so a reconnect requests a fresh one.
#[derive(Debug, Clone)]
struct Settings {
    username: String,
    password: String,
    config_url: String,
}

/// Exponential reconnect backoff: doubles per attempt, capped, reset on
/// successful login.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// The delay to use for the next reconnect, doubling the one after.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Back to the initial delay (successful login).
    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }

    pub(crate) fn current(&self) -> Duration {
        self.current
    }
}

/// Progress of the initial roster listing.
#[derive(Debug, Default, Clone)]
pub(crate) struct RosterProgress {
    pub(crate) seen: u32,
    pub(crate) total: Option<u32>,
    pub(crate) fired: bool,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub(crate) struct ClientInner<T: Transport> {
    pub(crate) transport: T,
    settings: StdMutex<Settings>,
    pub(crate) registry: Arc<tokio::sync::Mutex<EntityRegistry>>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) state: watch::Sender<ClientState>,
    pub(crate) conn: StdMutex<Option<Arc<T::Conn>>>,
    fetcher: Box<dyn ConfigFetcher>,
    server_pool: OnceCell<ServerConfig>,
    emote: OnceCell<Arc<dyn EmoteCodec>>,
    preset_emote: StdMutex<Option<Arc<dyn EmoteCodec>>>,
    pub(crate) traffic: AtomicU64,
    do_login: AtomicBool,
    pub(crate) login_received: AtomicBool,
    manual_disconnect: AtomicBool,
    pub(crate) assigned_session: AtomicU32,
    pub(crate) backoff: StdMutex<Backoff>,
    reconnect_task: StdMutex<Option<JoinHandle<()>>>,
    dispatch_task: StdMutex<Option<JoinHandle<()>>>,
    pub(crate) lookups: StdMutex<HashMap<String, Vec<oneshot::Sender<Option<Value>>>>>,
    pub(crate) roster: StdMutex<RosterProgress>,
}

/// A chat client over one transport.
///
/// Cheap to clone: clones share the connection, registry, and bus.
pub struct Client<T: Transport> {
    pub(crate) inner: Arc<ClientInner<T>>,
}

impl<T: Transport> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> Client<T> {
    /// Starts building a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    // -- Accessors ---------------------------------------------------------

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        *self.inner.state.borrow()
    }

    /// The shared entity registry.
    pub fn registry(&self) -> Arc<tokio::sync::Mutex<EntityRegistry>> {
        Arc::clone(&self.inner.registry)
    }

    /// The shared event bus.
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.inner.bus)
    }

    /// The username currently in effect (a server-assigned guest name
    /// after a guest login).
    pub fn username(&self) -> String {
        self.inner.settings.lock().expect("settings lock").username.clone()
    }

    /// The session id the server assigned at login, 0 before login.
    pub fn session_id(&self) -> u32 {
        self.inner.assigned_session.load(Ordering::Relaxed)
    }

    /// The delay the next automatic reconnect would use.
    pub fn current_reconnect_delay(&self) -> Duration {
        self.inner.backoff.lock().expect("backoff lock").current()
    }

    /// Stores a server-assigned display name when we logged in with the
    /// guest placeholder.
    pub(crate) fn adopt_assigned_name(&self, name: &str) {
        let mut settings = self.inner.settings.lock().expect("settings lock");
        if settings.username == GUEST_USERNAME {
            settings.username = name.to_string();
        }
    }

    // -- Connect -----------------------------------------------------------

    /// Connects to a randomly-chosen server from the configured pool.
    ///
    /// Resolves once the transport is open, or, when `do_login` is set,
    /// once the login handshake completes. A rejected login resolves to
    /// [`ClientError::LoginFailed`]; the automatic reconnect loop will
    /// still retry a fresh connect afterwards.
    pub async fn connect(&self, do_login: bool) -> Result<(), ClientError> {
        if self.state() != ClientState::Disconnected {
            return Err(ClientError::AlreadyConnected);
        }
        // A user-initiated connect supersedes any pending reconnect.
        self.cancel_reconnect();
        self.inner.manual_disconnect.store(false, Ordering::SeqCst);
        self.inner.do_login.store(do_login, Ordering::SeqCst);
        self.inner.state.send_replace(ClientState::Connecting);

        let addr = match self.resolve_server().await {
            Ok(addr) => addr,
            Err(e) => {
                self.inner.state.send_replace(ClientState::Disconnected);
                return Err(e);
            }
        };
        let conn = match self.inner.transport.connect(&addr).await {
            Ok(conn) => Arc::new(conn),
            Err(e) => {
                self.inner.state.send_replace(ClientState::Disconnected);
                return Err(e.into());
            }
        };
        info!(%addr, "connected");

        // Transport is open: reset per-connection state and start the
        // dispatch task (read loop + keepalive in one select).
        self.inner.traffic.store(0, Ordering::SeqCst);
        self.inner.login_received.store(false, Ordering::SeqCst);
        self.inner.assigned_session.store(0, Ordering::SeqCst);
        *self.inner.roster.lock().expect("roster lock") = RosterProgress::default();
        *self.inner.conn.lock().expect("conn lock") = Some(Arc::clone(&conn));
        self.inner.registry.lock().await.client_connected();
        self.inner.state.send_replace(ClientState::Connected);
        self.inner.bus.publish_lifecycle(LifecycleEvent::Connected);

        let dispatcher = self.clone();
        let handle = tokio::spawn(async move { dispatcher.run_dispatch(conn).await });
        {
            let mut slot = self.inner.dispatch_task.lock().expect("dispatch lock");
            if let Some(old) = slot.replace(handle) {
                old.abort();
            }
        }

        if do_login {
            self.inner.state.send_replace(ClientState::LoggingIn);
            // Subscribe before sending so a fast reply cannot slip past.
            let lifecycle = self.inner.bus.subscribe_lifecycle();
            self.send_login().await?;
            self.wait_for_login(lifecycle).await?;
        }
        Ok(())
    }

    /// Connects with login and resolves only once the initial roster is
    /// fully loaded, not merely when the socket opens.
    pub async fn connect_and_wait_for_models(&self) -> Result<(), ClientError> {
        let mut lifecycle = self.inner.bus.subscribe_lifecycle();
        self.connect(true).await?;
        if self.inner.roster.lock().expect("roster lock").fired {
            return Ok(());
        }
        loop {
            match lifecycle.recv().await {
                Ok(LifecycleEvent::RosterLoaded) => return Ok(()),
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                    if self.inner.roster.lock().expect("roster lock").fired {
                        return Ok(());
                    }
                }
                Err(_) => {
                    return Err(ClientError::Disconnected(
                        "event bus closed while waiting for roster".into(),
                    ));
                }
            }
        }
    }

    /// Logs in on the established connection with explicit credentials,
    /// replacing the stored ones for future reconnects.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ClientError> {
        {
            let mut settings = self.inner.settings.lock().expect("settings lock");
            settings.username = username.to_string();
            settings.password = password.to_string();
        }
        self.inner.do_login.store(true, Ordering::SeqCst);
        self.inner.state.send_replace(ClientState::LoggingIn);
        let lifecycle = self.inner.bus.subscribe_lifecycle();
        self.send_login().await?;
        self.wait_for_login(lifecycle).await
    }

    /// Sends the login command with the configured credentials.
    pub(crate) async fn send_login(&self) -> Result<(), ClientError> {
        let credentials = {
            let settings = self.inner.settings.lock().expect("settings lock");
            format!("{}:{}", settings.username, settings.password)
        };
        self.send_command(PacketType::Login, 0, LOGIN_VERSION, 0, Some(&credentials))
            .await
    }

    async fn wait_for_login(
        &self,
        mut lifecycle: tokio::sync::broadcast::Receiver<LifecycleEvent>,
    ) -> Result<(), ClientError> {
        let mut state_rx = self.inner.state.subscribe();
        loop {
            tokio::select! {
                changed = state_rx.wait_for(|s| {
                    matches!(s, ClientState::Ready | ClientState::Disconnected)
                }) => {
                    if let Ok(guard) = &changed {
                        if **guard == ClientState::Ready {
                            return Ok(());
                        }
                    }
                    // Prefer the specific failure when a rejection was
                    // published just before the teardown.
                    while let Ok(event) = lifecycle.try_recv() {
                        if let LifecycleEvent::LoginFailed { code } = event {
                            return Err(ClientError::LoginFailed(code));
                        }
                    }
                    return Err(ClientError::Disconnected(
                        "connection lost during login".into(),
                    ));
                }
                event = lifecycle.recv() => {
                    if let Ok(LifecycleEvent::LoginFailed { code }) = event {
                        return Err(ClientError::LoginFailed(code));
                    }
                }
            }
        }
    }

    /// Picks a server address for this transport's variant, fetching
    /// and caching the pool on first use.
    async fn resolve_server(&self) -> Result<String, ClientError> {
        let url = self.inner.settings.lock().expect("settings lock").config_url.clone();
        let pool = self
            .inner
            .server_pool
            .get_or_try_init(|| self.inner.fetcher.fetch(&url))
            .await?;
        let list = match self.inner.transport.framing() {
            FramingKind::Binary => &pool.chat_servers,
            FramingKind::Text => &pool.websocket_servers,
        };
        list.choose(&mut rand::rng())
            .cloned()
            .ok_or_else(|| ClientError::Config("no servers for this transport".into()))
    }

    // -- Dispatch ----------------------------------------------------------

    /// The per-connection dispatch task: read loop plus keepalive tick.
    async fn run_dispatch(self, conn: Arc<T::Conn>) {
        let framing = self.inner.transport.framing();
        let period = self.inner.transport.keepalive_interval();
        let mut keepalive = tokio::time::interval_at(
            tokio::time::Instant::now() + period,
            period,
        );
        let mut buf = FrameBuffer::new();

        let reason = loop {
            tokio::select! {
                chunk = conn.recv() => match chunk {
                    Ok(Some(bytes)) => {
                        self.inner.traffic.fetch_add(1, Ordering::Relaxed);
                        buf.extend(&bytes);
                        let decoded = match framing {
                            FramingKind::Binary => BinaryFraming::decode_all(&mut buf),
                            FramingKind::Text => TextFraming::decode_all(&mut buf),
                        };
                        match decoded {
                            Ok(packets) => {
                                for packet in packets {
                                    self.handle_packet(&packet).await;
                                }
                            }
                            Err(e) => {
                                // The stream cannot be re-synchronized;
                                // same failure path as a rejected login.
                                error!(error = %e, "fatal framing error");
                                let _ = conn.close().await;
                                break format!("framing error: {e}");
                            }
                        }
                    }
                    Ok(None) => break "closed by server".to_string(),
                    Err(e) => break format!("receive error: {e}"),
                },
                _ = keepalive.tick() => {
                    // The counter resets every tick, whichever branch runs.
                    let had_traffic = self.inner.traffic.swap(0, Ordering::SeqCst) > 0;
                    let login_settled = self.inner.login_received.load(Ordering::SeqCst)
                        || !self.inner.do_login.load(Ordering::SeqCst);
                    if had_traffic && login_settled {
                        debug!("keepalive: sending no-op");
                        if let Err(e) = self
                            .send_command(PacketType::Null, 0, 0, 0, None)
                            .await
                        {
                            debug!(error = %e, "keepalive send failed");
                        }
                    } else if !had_traffic {
                        // A full period of silence: the connection is dead.
                        warn!(?period, "keepalive: no traffic for a full period");
                        let _ = conn.close().await;
                        break "keepalive timeout".to_string();
                    }
                }
            }
        };

        self.on_disconnect(reason).await;
    }

    /// The disconnect path, shared by every way a connection can end.
    async fn on_disconnect(&self, reason: String) {
        info!(%reason, "disconnected");
        *self.inner.conn.lock().expect("conn lock") = None;
        self.inner.dispatch_task.lock().expect("dispatch lock").take();
        self.inner.login_received.store(false, Ordering::SeqCst);
        self.inner.state.send_replace(ClientState::Disconnected);

        // Fail anyone waiting on a user lookup.
        for (_, waiters) in self.inner.lookups.lock().expect("lookups lock").drain() {
            for waiter in waiters {
                let _ = waiter.send(None);
            }
        }

        // The registry resets itself when the last client is gone.
        {
            let mut registry = self.inner.registry.lock().await;
            registry.client_disconnected(&self.inner.bus);
        }

        // A server-assigned guest identity is single-use: go back to
        // the placeholder so the next login requests a fresh one.
        {
            let mut settings = self.inner.settings.lock().expect("settings lock");
            if settings.username.starts_with(ASSIGNED_GUEST_PREFIX) {
                settings.username = GUEST_USERNAME.to_string();
            }
        }

        let manual = self.inner.manual_disconnect.swap(false, Ordering::SeqCst);
        self.inner
            .bus
            .publish_lifecycle(LifecycleEvent::Disconnected { reason });

        if !manual {
            self.schedule_reconnect();
        }
    }

    // -- Reconnect ---------------------------------------------------------

    /// Arms the single reconnect timer, replacing any previous one.
    fn schedule_reconnect(&self) {
        let delay = self
            .inner
            .backoff
            .lock()
            .expect("backoff lock")
            .next_delay();
        warn!(?delay, "scheduling reconnect");

        let client = self.clone();
        let handle = tokio::spawn(async move {
            let mut delay = delay;
            loop {
                tokio::time::sleep(delay).await;
                // Drop our own handle from the slot so connect()'s
                // reconnect cancellation does not abort this task.
                let _ = client
                    .inner
                    .reconnect_task
                    .lock()
                    .expect("reconnect lock")
                    .take();
                let do_login = client.inner.do_login.load(Ordering::SeqCst);
                match client.connect(do_login).await {
                    Ok(()) => break,
                    // A rejected login or a concurrent connect owns any
                    // further retries.
                    Err(ClientError::LoginFailed(_))
                    | Err(ClientError::AlreadyConnected) => break,
                    Err(e) => {
                        debug!(error = %e, "reconnect attempt failed");
                        delay = client
                            .inner
                            .backoff
                            .lock()
                            .expect("backoff lock")
                            .next_delay();
                    }
                }
            }
        });

        let mut slot = self.inner.reconnect_task.lock().expect("reconnect lock");
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    fn cancel_reconnect(&self) {
        if let Some(task) = self.inner.reconnect_task.lock().expect("reconnect lock").take() {
            task.abort();
        }
    }

    // -- Manual disconnect -------------------------------------------------

    /// Disconnects on purpose: cancels the keepalive and any pending
    /// reconnect, closes the transport, and resolves once the
    /// disconnect event has fired (immediately when already down).
    pub async fn disconnect(&self) {
        self.cancel_reconnect();

        let conn = self.inner.conn.lock().expect("conn lock").clone();
        let Some(conn) = conn else {
            self.inner.manual_disconnect.store(false, Ordering::SeqCst);
            self.inner.state.send_replace(ClientState::Disconnected);
            return;
        };

        self.inner.manual_disconnect.store(true, Ordering::SeqCst);
        let mut lifecycle = self.inner.bus.subscribe_lifecycle();
        let _ = conn.close().await;
        // The dispatch task observes the close and runs the disconnect
        // path; wait for its event.
        loop {
            match lifecycle.recv().await {
                Ok(LifecycleEvent::Disconnected { .. }) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    }

    // -- Emote codec -------------------------------------------------------

    /// The emote codec, initialized lazily on first use.
    pub(crate) async fn emote_codec(&self) -> Arc<dyn EmoteCodec> {
        self.inner
            .emote
            .get_or_init(|| async {
                let preset = self
                    .inner
                    .preset_emote
                    .lock()
                    .expect("emote lock")
                    .take();
                match preset {
                    Some(codec) => {
                        info!("emote codec initialized");
                        codec
                    }
                    None => {
                        debug!("no emote codec supplied, using pass-through");
                        Arc::new(PassthroughCodec)
                    }
                }
            })
            .await
            .clone()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring a [`Client`].
///
/// # Example
///
/// ```rust,no_run
/// use camlink::ClientBuilder;
/// use camlink_transport::TcpTransport;
///
/// # async fn run() -> Result<(), camlink::ClientError> {
/// let client = ClientBuilder::new()
///     .username("my_account")
///     .password("hunter2")
///     .build(TcpTransport);
/// client.connect(true).await?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    username: String,
    password: String,
    config_url: String,
    initial_backoff: Duration,
    max_backoff: Duration,
    registry: Option<Arc<tokio::sync::Mutex<EntityRegistry>>>,
    bus: Option<Arc<EventBus>>,
    fetcher: Option<Box<dyn ConfigFetcher>>,
    emote: Option<Arc<dyn EmoteCodec>>,
}

impl ClientBuilder {
    /// Creates a builder with guest credentials and default timings.
    pub fn new() -> Self {
        Self {
            username: GUEST_USERNAME.to_string(),
            password: GUEST_USERNAME.to_string(),
            config_url: DEFAULT_CONFIG_URL.to_string(),
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(320),
            registry: None,
            bus: None,
            fetcher: None,
            emote: None,
        }
    }

    /// Sets the account username.
    pub fn username(mut self, username: &str) -> Self {
        self.username = username.to_string();
        self
    }

    /// Sets the account password.
    pub fn password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    /// Overrides the server-pool config URL.
    pub fn config_url(mut self, url: &str) -> Self {
        self.config_url = url.to_string();
        self
    }

    /// Overrides the reconnect backoff bounds.
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Shares an existing registry (several clients, one entity space).
    pub fn registry(mut self, registry: Arc<tokio::sync::Mutex<EntityRegistry>>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Shares an existing event bus.
    pub fn bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Replaces the HTTP config fetch (tests, pinned server pools).
    pub fn config_fetcher(mut self, fetcher: impl ConfigFetcher + 'static) -> Self {
        self.fetcher = Some(Box::new(fetcher));
        self
    }

    /// Supplies a real emote codec. Without one, text passes through
    /// untranslated.
    pub fn emote_codec(mut self, codec: impl EmoteCodec + 'static) -> Self {
        self.emote = Some(Arc::new(codec));
        self
    }

    /// Builds the client over the given transport.
    pub fn build<T: Transport>(self, transport: T) -> Client<T> {
        let (state, _) = watch::channel(ClientState::Disconnected);
        Client {
            inner: Arc::new(ClientInner {
                transport,
                settings: StdMutex::new(Settings {
                    username: self.username,
                    password: self.password,
                    config_url: self.config_url,
                }),
                registry: self
                    .registry
                    .unwrap_or_else(|| Arc::new(tokio::sync::Mutex::new(EntityRegistry::new()))),
                bus: self.bus.unwrap_or_else(|| Arc::new(EventBus::new())),
                state,
                conn: StdMutex::new(None),
                fetcher: self.fetcher.unwrap_or_else(|| Box::new(HttpConfigFetcher)),
                server_pool: OnceCell::new(),
                emote: OnceCell::new(),
                preset_emote: StdMutex::new(self.emote),
                traffic: AtomicU64::new(0),
                do_login: AtomicBool::new(false),
                login_received: AtomicBool::new(false),
                manual_disconnect: AtomicBool::new(false),
                assigned_session: AtomicU32::new(0),
                backoff: StdMutex::new(Backoff::new(self.initial_backoff, self.max_backoff)),
                reconnect_task: StdMutex::new(None),
                dispatch_task: StdMutex::new(None),
                lookups: StdMutex::new(HashMap::new()),
                roster: StdMutex::new(RosterProgress::default()),
            }),
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =========================================================================
// Tests
// =========================================================================
