// ── Tracking session ──
//
// Wires a `DeviceTracker` to a live server link: owns the transport
// handle, the lifecycle handler, and the background tasks that forward
// link events between them.

use std::sync::{Arc, PoisonError};

use kistrack_proto::{ClientEvent, ClientHandle, ServerInfo};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::CoreError;
use crate::tracker::{DeviceTracker, LifecycleHandler, ServerLink};

// ── SessionState ─────────────────────────────────────────────────

/// Link state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    /// TCP link up, capabilities still being negotiated.
    Connected,
    /// Tracker handlers registered; data is flowing.
    Configured,
    /// Gave up: retry limit reached or the server is incompatible.
    Failed,
}

// ── Session ──────────────────────────────────────────────────────

/// A tracker bound to one server.
///
/// Cheaply cloneable via `Arc<SessionInner>`. Queries go straight to
/// [`tracker()`](Self::tracker); the session only manages the link.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    client: ClientHandle,
    lifecycle: LifecycleHandler,
    state: watch::Sender<SessionState>,
    failure: std::sync::Mutex<Option<CoreError>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Create a session with a fresh tracker. Does NOT connect --
    /// call [`start()`](Self::start).
    pub fn new(config: SessionConfig) -> Self {
        Self::with_tracker(config, Arc::new(DeviceTracker::new()))
    }

    /// Create a session feeding an existing tracker, e.g. one that PHY
    /// plugins have already registered with.
    pub fn with_tracker(config: SessionConfig, tracker: Arc<DeviceTracker>) -> Self {
        let client = ClientHandle::new(config.to_client_config());
        let link: Arc<dyn ServerLink> = Arc::new(client.clone());
        let (state, _) = watch::channel(SessionState::Disconnected);

        Self {
            inner: Arc::new(SessionInner {
                config,
                client,
                lifecycle: LifecycleHandler::new(tracker, link),
                state,
                failure: std::sync::Mutex::new(None),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn tracker(&self) -> &Arc<DeviceTracker> {
        self.inner.lifecycle.tracker()
    }

    /// Banner of the connected server, if any.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.inner.client.server_info()
    }

    /// Subscribe to session state changes.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn current_state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Why the session entered [`SessionState::Failed`], if it has.
    pub fn failure(&self) -> Option<CoreError> {
        self.inner
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record the first failure cause and enter the failed state.
    fn fail(&self, cause: CoreError) {
        self.inner
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(cause);
        self.set_state(SessionState::Failed);
    }

    fn set_state(&self, state: SessionState) {
        self.inner.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn the link and event-forwarding tasks.
    pub async fn start(&self) -> Result<(), CoreError> {
        let mut handles = self.inner.task_handles.lock().await;
        if !handles.is_empty() || self.inner.cancel.is_cancelled() {
            return Err(CoreError::Internal("session already started".into()));
        }

        self.set_state(SessionState::Connecting);
        info!(server = %self.inner.config.server, "starting tracking session");

        // Subscribe before the link task can emit anything.
        let events = self.inner.client.subscribe();
        let link_task = self.inner.client.start(self.inner.cancel.child_token());

        handles.push(tokio::spawn(event_task(self.clone(), events)));
        handles.push(tokio::spawn(supervise_task(self.clone(), link_task)));
        Ok(())
    }

    /// Stop all background tasks. Tracker state is left intact.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        self.inner.lifecycle.on_client_removed();
        if self.current_state() != SessionState::Failed {
            self.set_state(SessionState::Disconnected);
        }
        debug!("session shut down");
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Forward link events to the lifecycle handler.
async fn event_task(session: Session, mut events: broadcast::Receiver<ClientEvent>) {
    let cancel = session.inner.cancel.clone();
    let lifecycle = &session.inner.lifecycle;

    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        let outcome = match event {
            Ok(ClientEvent::Connected) => {
                lifecycle.on_client_added();
                session.set_state(SessionState::Connected);
                Ok(())
            }
            Ok(ClientEvent::Configured { reconnect }) => lifecycle
                .on_configure(reconnect)
                .map(|()| session.set_state(SessionState::Configured)),
            Ok(ClientEvent::Disconnected) => {
                lifecycle.on_client_removed();
                session.set_state(SessionState::Connecting);
                Ok(())
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "session fell behind link events");
                resync(&session)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match outcome {
            Ok(()) => {}
            Err(e @ CoreError::IncompatibleServer { .. }) => {
                error!(error = %e, "stopping session");
                session.fail(e);
                cancel.cancel();
                break;
            }
            Err(e) => warn!(error = %e, "server configuration failed"),
        }
    }
}

/// Re-derive handler registration and session state from the link itself.
fn resync(session: &Session) -> Result<(), CoreError> {
    let client = &session.inner.client;
    let connected = client.is_connected();
    let configured = client.is_configured();
    session.inner.lifecycle.resync(connected, configured)?;

    session.set_state(match (connected, configured) {
        (false, _) => SessionState::Connecting,
        (true, false) => SessionState::Connected,
        (true, true) => SessionState::Configured,
    });
    Ok(())
}

/// Mark the session failed if the link loop ends on its own.
async fn supervise_task(
    session: Session,
    link_task: JoinHandle<Result<(), kistrack_proto::Error>>,
) {
    let cause = match link_task.await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(CoreError::from(e)),
        Err(e) => {
            error!(error = %e, "server link task panicked");
            Some(CoreError::Internal(format!("server link task panicked: {e}")))
        }
    };
    if !session.inner.cancel.is_cancelled() {
        let cause =
            cause.unwrap_or_else(|| CoreError::Internal("server link stopped unexpectedly".into()));
        error!(server = %session.inner.config.server, error = %cause, "server link gave up");
        session.fail(cause);
    }
}
