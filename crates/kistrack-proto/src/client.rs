//! Server connection with capability negotiation and auto-reconnect.
//!
//! A [`ClientHandle`] owns one logical link to a capture server. The
//! background task connects, answers the `*PROTOCOLS` announcement with a
//! `CAPABILITY` request per protocol, and once every capability list is in
//! marks the link *configured*. Consumers then register per-protocol
//! handlers; matching sentences are dispatched to them as positional fields.
//!
//! # Example
//!
//! ```rust,ignore
//! use kistrack_proto::{ClientConfig, ClientEvent, ClientHandle};
//! use tokio_util::sync::CancellationToken;
//!
//! let handle = ClientHandle::new(ClientConfig::new("localhost:2501"));
//! let mut events = handle.subscribe();
//! handle.start(CancellationToken::new());
//!
//! while let Ok(event) = events.recv().await {
//!     if let ClientEvent::Configured { .. } = event {
//!         handle.register_proto_handler("TIME", &["timesec"], std::sync::Arc::new(|f| {
//!             println!("server time {}", f[0]);
//!         }))?;
//!     }
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::line::{ServerLine, format_command};

// ── Constants ────────────────────────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 64;
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Protocols the transport answers itself; they are never routed to
/// registered handlers.
const BUILTIN_PROTOCOLS: &[&str] = &["KISMET", "PROTOCOLS", "CAPABILITY", "ACK", "ERROR", "TIME"];

/// Callback invoked with the positional fields of one server sentence.
pub type ProtoHandler = Arc<dyn Fn(&[String]) + Send + Sync>;

// ── Configuration ────────────────────────────────────────────────────

/// Exponential backoff configuration for reconnection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Server address as `host:port`.
    pub addr: String,
    /// Connect timeout for a single attempt.
    pub connect_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl ClientConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
        }
    }
}

// ── Events ───────────────────────────────────────────────────────────

/// Link lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// TCP connection established; protocols not yet negotiated.
    Connected,
    /// Every announced capability has been received. `reconnect` is
    /// `true` for every configuration after the first on this handle.
    Configured { reconnect: bool },
    /// Connection lost or killed. Registered handlers are dropped.
    Disconnected,
}

/// Banner details from the `*KISMET:` sentence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub version: String,
    pub server_name: Option<String>,
}

// ── Shared link state ────────────────────────────────────────────────

struct Registration {
    fields: Vec<String>,
    handler: ProtoHandler,
}

#[derive(Default)]
struct LinkState {
    outbound: Option<mpsc::UnboundedSender<String>>,
    kill: Option<CancellationToken>,
    server: Option<ServerInfo>,
    capabilities: HashMap<String, Vec<String>>,
    pending_capabilities: HashSet<String>,
    configured: bool,
    configure_count: u32,
    handlers: HashMap<String, Registration>,
}

impl LinkState {
    /// Forget everything tied to a single TCP session.
    fn reset_session(&mut self) {
        self.outbound = None;
        self.kill = None;
        self.server = None;
        self.capabilities.clear();
        self.pending_capabilities.clear();
        self.configured = false;
        self.handlers.clear();
    }
}

struct Shared {
    config: ClientConfig,
    state: Mutex<LinkState>,
    events: broadcast::Sender<ClientEvent>,
    next_command_id: AtomicU32,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Queue a command on the current connection.
    fn send_command(&self, state: &LinkState, verb: &str, args: &str) -> Result<(), Error> {
        let outbound = state.outbound.as_ref().ok_or(Error::NotConnected)?;
        let id = self.next_command_id.fetch_add(1, Ordering::Relaxed);
        let line = format_command(id, verb, args);
        tracing::trace!(%line, "queue command");
        outbound.send(line).map_err(|_| Error::NotConnected)
    }
}

// ── ClientHandle ─────────────────────────────────────────────────────

/// Handle to a server link. Cheaply cloneable.
#[derive(Clone)]
pub struct ClientHandle {
    shared: Arc<Shared>,
}

impl ClientHandle {
    /// Create an idle handle. Call [`start`](Self::start) to connect.
    ///
    /// Subscribe before starting so no lifecycle event is missed.
    pub fn new(config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(LinkState::default()),
                events,
                next_command_id: AtomicU32::new(1),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Subscribe to link lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Spawn the connect/reconnect loop. Runs until `cancel` fires or the
    /// retry limit is reached.
    ///
    /// The task yields `Ok(())` when cancelled and the error that ended
    /// the last attempt when it gives up.
    pub fn start(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<Result<(), Error>> {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { link_loop(shared, cancel).await })
    }

    /// Whether a TCP connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.shared.lock().outbound.is_some()
    }

    /// Whether capability negotiation has completed on the live connection.
    pub fn is_configured(&self) -> bool {
        self.shared.lock().configured
    }

    /// Banner of the connected server, if any.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.shared.lock().server.clone()
    }

    /// Fields the server offers for `protocol`.
    pub fn capability(&self, protocol: &str) -> Option<Vec<String>> {
        self.shared.lock().capabilities.get(protocol).cloned()
    }

    /// Register `handler` for `protocol`, asking the server to stream the
    /// given `fields` in that order.
    ///
    /// Fails if the server never announced the protocol or lacks one of
    /// the fields -- the caller should treat that as an incompatible
    /// server. A second registration for the same protocol replaces the
    /// first.
    pub fn register_proto_handler(
        &self,
        protocol: &str,
        fields: &[&str],
        handler: ProtoHandler,
    ) -> Result<(), Error> {
        let mut state = self.shared.lock();

        let offered = state
            .capabilities
            .get(protocol)
            .ok_or_else(|| Error::UnsupportedProtocol {
                protocol: protocol.to_owned(),
            })?;

        if let Some(missing) = fields.iter().find(|f| !offered.iter().any(|o| o == *f)) {
            return Err(Error::UnsupportedField {
                protocol: protocol.to_owned(),
                field: (*missing).to_owned(),
            });
        }

        let field_list = fields.join(",");
        self.shared
            .send_command(&state, "ENABLE", &format!("{protocol} {field_list}"))?;

        state.handlers.insert(
            protocol.to_owned(),
            Registration {
                fields: fields.iter().map(|f| (*f).to_owned()).collect(),
                handler,
            },
        );
        tracing::debug!(protocol, fields = %field_list, "protocol handler registered");
        Ok(())
    }

    /// Drop the handler for `protocol` and tell the server to stop
    /// streaming it. Returns whether a handler was registered.
    pub fn remove_proto_handler(&self, protocol: &str) -> bool {
        let mut state = self.shared.lock();
        let removed = state.handlers.remove(protocol).is_some();
        if removed {
            // Best effort: the connection may already be gone.
            let _ = self.shared.send_command(&state, "REMOVE", protocol);
        }
        removed
    }

    /// Fields a registered handler asked for, if registered.
    pub fn registered_fields(&self, protocol: &str) -> Option<Vec<String>> {
        self.shared
            .lock()
            .handlers
            .get(protocol)
            .map(|r| r.fields.clone())
    }

    /// Terminate the current connection. The reconnect loop backs off
    /// before trying again.
    pub fn kill_connection(&self) {
        if let Some(kill) = self.shared.lock().kill.as_ref() {
            tracing::info!("killing server connection");
            kill.cancel();
        }
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → backoff → reconnect.
///
/// `attempt` counts consecutive sessions that ended before the link was
/// configured. A session that got configured resets it, so `max_retries`
/// caps failed reconnects in a row, not drops over the handle's lifetime.
async fn link_loop(shared: Arc<Shared>, cancel: CancellationToken) -> Result<(), Error> {
    let reconnect = shared.config.reconnect.clone();
    let mut attempt: u32 = 0;

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&shared, &cancel) => result,
        };

        let (was_connected, was_configured) = {
            let mut state = shared.lock();
            let seen = (state.outbound.is_some(), state.configured);
            state.reset_session();
            seen
        };
        if was_connected {
            shared.emit(ClientEvent::Disconnected);
        }
        if was_configured {
            attempt = 0;
        }

        let err = match result {
            Ok(()) => break,
            Err(_) if cancel.is_cancelled() => break,
            Err(Error::Closed) => {
                tracing::info!(attempt, configured = was_configured, "server closed connection");
                Error::Closed
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "server link error");
                e
            }
        };

        if let Some(max) = reconnect.max_retries {
            if attempt >= max {
                tracing::error!(max_retries = max, error = %err, "reconnection limit reached, giving up");
                return Err(err);
            }
        }

        let delay = calculate_backoff(attempt, &reconnect);
        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        attempt = attempt.saturating_add(1);
    }

    tracing::debug!("server link loop exiting");
    Ok(())
}

// ── Single connection lifecycle ──────────────────────────────────────

async fn connect_and_read(shared: &Arc<Shared>, cancel: &CancellationToken) -> Result<(), Error> {
    let addr = shared.config.addr.as_str();
    tracing::info!(addr, "connecting to server");

    let timeout = shared.config.connect_timeout;
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Timeout {
            timeout_secs: timeout.as_secs(),
        })?
        .map_err(|source| Error::Connect {
            addr: addr.to_owned(),
            source,
        })?;

    let (read_half, mut write_half) = stream.into_split();
    let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let kill = cancel.child_token();

    {
        let mut state = shared.lock();
        state.reset_session();
        state.outbound = Some(outbound_tx);
        state.kill = Some(kill.clone());
    }
    tracing::info!(addr, "connected to server");
    shared.emit(ClientEvent::Connected);

    loop {
        tokio::select! {
            biased;
            () = kill.cancelled() => {
                return if cancel.is_cancelled() { Ok(()) } else { Err(Error::Killed) };
            }
            Some(command) = outbound_rx.recv() => {
                write_half.write_all(command.as_bytes()).await?;
                write_half.write_all(b"\n").await?;
            }
            line = lines.next() => match line {
                Some(Ok(line)) => handle_line(shared, &line),
                Some(Err(e)) => return Err(e.into()),
                None => return Err(Error::Closed),
            },
        }
    }
}

// ── Sentence dispatch ────────────────────────────────────────────────

fn handle_line(shared: &Shared, raw: &str) {
    if raw.trim().is_empty() {
        return;
    }

    let line = match ServerLine::parse(raw) {
        Ok(line) => line,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring unparseable server line");
            return;
        }
    };

    if BUILTIN_PROTOCOLS.contains(&line.protocol.as_str()) {
        handle_builtin(shared, &line);
        return;
    }

    let handler = shared
        .lock()
        .handlers
        .get(&line.protocol)
        .map(|r| Arc::clone(&r.handler));

    match handler {
        // Invoked without the link lock held.
        Some(handler) => handler(&line.fields),
        None => tracing::trace!(protocol = %line.protocol, "no handler registered"),
    }
}

fn handle_builtin(shared: &Shared, line: &ServerLine) {
    match line.protocol.as_str() {
        "KISMET" => {
            let info = ServerInfo {
                version: line.fields.first().cloned().unwrap_or_default(),
                server_name: line.fields.get(2).cloned(),
            };
            tracing::info!(version = %info.version, "server banner");
            shared.lock().server = Some(info);
        }
        "PROTOCOLS" => {
            let announced: HashSet<String> = line
                .fields
                .iter()
                .flat_map(|f| f.split(','))
                .filter(|p| !p.is_empty())
                .map(str::to_owned)
                .collect();
            tracing::debug!(count = announced.len(), "server announced protocols");

            let mut state = shared.lock();
            for protocol in &announced {
                if let Err(e) = shared.send_command(&state, "CAPABILITY", protocol) {
                    tracing::warn!(error = %e, protocol, "could not request capability");
                }
            }
            state.pending_capabilities = announced;
            if state.pending_capabilities.is_empty() {
                mark_configured(shared, &mut state);
            }
        }
        "CAPABILITY" => {
            let Some(protocol) = line.fields.first() else {
                tracing::debug!("CAPABILITY sentence without protocol name");
                return;
            };
            let fields: Vec<String> = line
                .fields
                .get(1)
                .map(|list| list.split(',').filter(|f| !f.is_empty()).map(str::to_owned).collect())
                .unwrap_or_default();

            let mut state = shared.lock();
            state.capabilities.insert(protocol.clone(), fields);
            state.pending_capabilities.remove(protocol);
            if state.pending_capabilities.is_empty() && !state.configured {
                mark_configured(shared, &mut state);
            }
        }
        "ACK" => tracing::trace!(fields = ?line.fields, "server ack"),
        "ERROR" => tracing::warn!(fields = ?line.fields, "server reported command error"),
        _ => tracing::trace!(protocol = %line.protocol, "builtin sentence"),
    }
}

fn mark_configured(shared: &Shared, state: &mut LinkState) {
    state.configured = true;
    let reconnect = state.configure_count > 0;
    state.configure_count = state.configure_count.saturating_add(1);
    tracing::info!(reconnect, "server link configured");
    shared.emit(ClientEvent::Configured { reconnect });
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 +- 0.25)`
#[allow(clippy::cast_possible_wrap, clippy::as_conversions, clippy::cast_possible_truncation)]
pub(crate) fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = attempt.min(16) as i32;
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic jitter seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    Duration::from_secs_f64((capped * jitter_factor).max(0.0))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn configured_handle(protocol: &str, fields: &[&str]) -> (ClientHandle, mpsc::UnboundedReceiver<String>) {
        let handle = ClientHandle::new(ClientConfig::new("127.0.0.1:0"));
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = handle.shared.lock();
            state.outbound = Some(tx);
            state.capabilities.insert(
                protocol.to_owned(),
                fields.iter().map(|f| (*f).to_owned()).collect(),
            );
            state.configured = true;
        }
        (handle, rx)
    }

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = ReconnectConfig::default();
        let first = calculate_backoff(0, &config);
        let later = calculate_backoff(4, &config);
        let huge = calculate_backoff(40, &config);

        assert!(first <= Duration::from_millis(1250));
        assert!(later > first);
        assert!(huge <= Duration::from_secs_f64(30.0 * 1.25));
    }

    #[test]
    fn register_sends_enable_in_requested_order() {
        let (handle, mut rx) = configured_handle("PHYMAP", &["phyid", "phyname", "packets"]);
        handle
            .register_proto_handler("PHYMAP", &["phyname", "phyid"], Arc::new(|_| {}))
            .unwrap();

        let sent = rx.try_recv().unwrap();
        assert!(sent.ends_with(" ENABLE PHYMAP phyname,phyid"), "{sent}");
        assert_eq!(
            handle.registered_fields("PHYMAP").unwrap(),
            vec!["phyname".to_owned(), "phyid".to_owned()]
        );
    }

    #[test]
    fn register_rejects_unknown_protocol() {
        let (handle, _rx) = configured_handle("PHYMAP", &["phyid"]);
        let err = handle
            .register_proto_handler("DEVICE", &["mac"], Arc::new(|_| {}))
            .unwrap_err();
        assert!(err.is_incompatible());
        assert!(matches!(err, Error::UnsupportedProtocol { .. }));
    }

    #[test]
    fn register_rejects_missing_field() {
        let (handle, _rx) = configured_handle("PHYMAP", &["phyid", "phyname"]);
        let err = handle
            .register_proto_handler("PHYMAP", &["phyid", "packetrate"], Arc::new(|_| {}))
            .unwrap_err();
        match err {
            Error::UnsupportedField { protocol, field } => {
                assert_eq!(protocol, "PHYMAP");
                assert_eq!(field, "packetrate");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(handle.registered_fields("PHYMAP").is_none());
    }

    #[test]
    fn dispatches_fields_to_handler() {
        let (handle, _rx) = configured_handle("PHYMAP", &["phyid", "phyname"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        handle
            .register_proto_handler(
                "PHYMAP",
                &["phyid", "phyname"],
                Arc::new(move |fields| sink.lock().unwrap().push(fields.to_vec())),
            )
            .unwrap();

        handle_line(&handle.shared, "*PHYMAP: 1 \x01IEEE 802.11\x01");
        handle_line(&handle.shared, "*OTHER: ignored");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], vec!["1".to_owned(), "IEEE 802.11".to_owned()]);
    }

    #[test]
    fn remove_handler_sends_remove() {
        let (handle, mut rx) = configured_handle("PHYMAP", &["phyid"]);
        handle
            .register_proto_handler("PHYMAP", &["phyid"], Arc::new(|_| {}))
            .unwrap();
        let _enable = rx.try_recv().unwrap();

        assert!(handle.remove_proto_handler("PHYMAP"));
        assert!(rx.try_recv().unwrap().ends_with(" REMOVE PHYMAP"));
        assert!(!handle.remove_proto_handler("PHYMAP"));
    }

    #[test]
    fn capability_negotiation_configures_once_all_arrive() {
        let handle = ClientHandle::new(ClientConfig::new("127.0.0.1:0"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle.shared.lock().outbound = Some(tx);
        let mut events = handle.subscribe();

        handle_line(&handle.shared, "*PROTOCOLS: PHYMAP,DEVICE");
        assert_eq!(rx.try_recv().unwrap().split(' ').nth(1), Some("CAPABILITY"));
        assert_eq!(rx.try_recv().unwrap().split(' ').nth(1), Some("CAPABILITY"));

        handle_line(&handle.shared, "*CAPABILITY: PHYMAP phyid,phyname");
        assert!(!handle.is_configured());

        handle_line(&handle.shared, "*CAPABILITY: DEVICE phyid,macaddr");
        assert!(handle.is_configured());
        assert_eq!(events.try_recv().unwrap(), ClientEvent::Configured { reconnect: false });
        assert_eq!(
            handle.capability("DEVICE").unwrap(),
            vec!["phyid".to_owned(), "macaddr".to_owned()]
        );
    }
}
