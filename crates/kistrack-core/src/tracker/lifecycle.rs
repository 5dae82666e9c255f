// ── Connection lifecycle ──
//
// Subscribes the tracker to a server link. Handlers exist only while a
// connection is configured; they are (re)registered on every configure
// event, including after a reconnect. Tracker state is kept across
// disconnects.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use kistrack_proto::{ClientHandle, ProtoHandler};
use tracing::{debug, error, info, trace, warn};

use super::DeviceTracker;
use super::ingest::{DEVICE_PROTOCOL, PHYMAP_FIELDS, PHYMAP_PROTOCOL};
use crate::error::CoreError;

/// What the tracker needs from the transport.
pub trait ServerLink: Send + Sync {
    /// Fields the server offers for `protocol`, if it offers it at all.
    fn capability(&self, protocol: &str) -> Option<Vec<String>>;

    /// Route `protocol` sentences, laid out as `fields`, to `handler`.
    fn register_proto_handler(
        &self,
        protocol: &str,
        fields: &[&str],
        handler: ProtoHandler,
    ) -> Result<(), kistrack_proto::Error>;

    fn remove_proto_handler(&self, protocol: &str) -> bool;

    /// Drop the current connection.
    fn kill_connection(&self);
}

impl ServerLink for ClientHandle {
    fn capability(&self, protocol: &str) -> Option<Vec<String>> {
        ClientHandle::capability(self, protocol)
    }

    fn register_proto_handler(
        &self,
        protocol: &str,
        fields: &[&str],
        handler: ProtoHandler,
    ) -> Result<(), kistrack_proto::Error> {
        ClientHandle::register_proto_handler(self, protocol, fields, handler)
    }

    fn remove_proto_handler(&self, protocol: &str) -> bool {
        ClientHandle::remove_proto_handler(self, protocol)
    }

    fn kill_connection(&self) {
        ClientHandle::kill_connection(self);
    }
}

/// Reacts to link events on behalf of one [`DeviceTracker`].
pub struct LifecycleHandler {
    tracker: Arc<DeviceTracker>,
    link: Arc<dyn ServerLink>,
    armed: AtomicBool,
}

impl LifecycleHandler {
    pub fn new(tracker: Arc<DeviceTracker>, link: Arc<dyn ServerLink>) -> Self {
        Self {
            tracker,
            link,
            armed: AtomicBool::new(false),
        }
    }

    pub fn tracker(&self) -> &Arc<DeviceTracker> {
        &self.tracker
    }

    /// A connection was established; the next configure event subscribes.
    pub fn on_client_added(&self) {
        self.armed.store(true, Ordering::SeqCst);
        debug!("server link added, waiting for configuration");
    }

    /// The connection went away. Handlers are withdrawn; tracked state stays.
    pub fn on_client_removed(&self) {
        self.armed.store(false, Ordering::SeqCst);
        for protocol in [PHYMAP_PROTOCOL, DEVICE_PROTOCOL] {
            if self.link.remove_proto_handler(protocol) {
                debug!(protocol, "protocol handler removed");
            }
        }
    }

    /// Capability negotiation finished. Subscribes to `PHYMAP` (required)
    /// and `DEVICE` (if offered).
    ///
    /// A server that cannot stream `PHYMAP` as [`PHYMAP_FIELDS`] is
    /// incompatible: the connection is killed and the error returned.
    pub fn on_configure(&self, reconnect: bool) -> Result<(), CoreError> {
        if !self.armed.load(Ordering::SeqCst) {
            debug!(reconnect, "configure event for an unannounced link, ignoring");
            return Ok(());
        }
        info!(reconnect, "subscribing tracker to server");

        let tracker = Arc::clone(&self.tracker);
        let phymap: ProtoHandler = Arc::new(move |fields: &[String]| {
            let outcome = tracker.handle_phymap(fields);
            trace!(?outcome, "PHYMAP ingested");
        });

        if let Err(e) = self.link.register_proto_handler(PHYMAP_PROTOCOL, PHYMAP_FIELDS, phymap) {
            error!(
                error = %e,
                "could not subscribe to PHYMAP; the server is likely too old. Terminating connection"
            );
            self.link.kill_connection();
            return Err(e.into());
        }

        self.subscribe_devices();
        Ok(())
    }

    /// Rebuild the handler state from the link's actual status, for when
    /// link events were missed.
    ///
    /// Disconnected disarms and withdraws handlers. Connected arms, so a
    /// pending configure event still subscribes. Configured subscribes
    /// immediately, replacing any handlers already registered.
    pub fn resync(&self, connected: bool, configured: bool) -> Result<(), CoreError> {
        debug!(connected, configured, "resyncing with server link");
        if !connected {
            self.on_client_removed();
            return Ok(());
        }
        self.on_client_added();
        if configured {
            self.on_configure(true)
        } else {
            Ok(())
        }
    }

    fn subscribe_devices(&self) {
        let Some(offered) = self.link.capability(DEVICE_PROTOCOL) else {
            debug!("server does not offer DEVICE");
            return;
        };

        let fields: Vec<&str> = offered.iter().map(String::as_str).collect();
        let tracker = Arc::clone(&self.tracker);
        let handler: ProtoHandler = Arc::new(move |fields: &[String]| {
            tracker.handle_device(fields);
        });

        if let Err(e) = self.link.register_proto_handler(DEVICE_PROTOCOL, &fields, handler) {
            warn!(error = %e, "could not subscribe to DEVICE");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
