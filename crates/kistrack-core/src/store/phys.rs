// ── PHY handler registry ──
//
// Two queues feed one resolution point: PHYs the server has announced,
// and handler factories plugins have registered. Whichever side arrives
// second performs the binding, so the outcome does not depend on order.
//
// Per PHY:     Unknown -> Unbound -> Bound (terminal)
// Per factory: Pending -> Consumed
//
// First match wins. Leftover same-named PHYs or factories are reported
// through `tracing` and the `duplicate_names` counter.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::model::{PhyId, PhyInfo};

// ── Plugin traits ───────────────────────────────────────────────────

/// PHY-specific logic bound to one announced PHY id.
pub trait PhyHandler: Send + Sync + fmt::Debug {
    /// Name of the PHY this handler decodes (matches the factory's name).
    fn phy_name(&self) -> &str;

    /// PHY id the handler was bound to.
    fn phy_id(&self) -> PhyId;
}

/// Plugin capability that produces a [`PhyHandler`] once the server
/// announces a PHY with a matching name.
///
/// `create` runs while the tracker's write lock is held; it must not call
/// back into the tracker.
pub trait PhyHandlerFactory: Send + Sync {
    fn phy_name(&self) -> &str;

    fn create(&self, phy_id: PhyId) -> Arc<dyn PhyHandler>;
}

// ── Records ─────────────────────────────────────────────────────────

#[derive(Clone)]
enum PhyBinding {
    Unbound,
    Bound(Arc<dyn PhyHandler>),
}

struct ObservedPhy {
    phy_name: String,
    binding: PhyBinding,
}

impl ObservedPhy {
    fn is_unbound(&self) -> bool {
        matches!(self.binding, PhyBinding::Unbound)
    }
}

/// What happened to a factory handed to [`PhyRegistry::register_factory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryOutcome {
    /// Matched an announced PHY and was consumed.
    Bound(PhyId),
    /// No announced PHY matched yet; queued.
    Pending,
}

/// What happened to an announcement handed to [`PhyRegistry::observe_phy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyObservation {
    /// First announcement. `bound` tells whether a pending factory matched.
    New { bound: bool },
    /// Already recorded; nothing changed.
    Known,
}

/// Diagnostics for the first-match-wins tie-break.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BindingStats {
    pub bound_phys: usize,
    pub unbound_phys: usize,
    pub pending_factories: usize,
    /// Times a binding left another same-named PHY or factory behind.
    pub duplicate_names: u64,
}

// ── Registry ────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct PhyRegistry {
    /// Ordered by PHY id; this is the scan order for factory matching.
    phys: BTreeMap<PhyId, ObservedPhy>,
    pending: Vec<Box<dyn PhyHandlerFactory>>,
    duplicate_names: u64,
}

impl PhyRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contains(&self, phy: PhyId) -> bool {
        self.phys.contains_key(&phy)
    }

    pub(crate) fn register_factory(&mut self, factory: Box<dyn PhyHandlerFactory>) -> FactoryOutcome {
        let name = factory.phy_name().to_owned();
        let mut matches = self
            .phys
            .iter_mut()
            .filter(|(_, p)| p.is_unbound() && p.phy_name == name);

        let Some((&phy_id, record)) = matches.next() else {
            tracing::debug!(phy_name = %name, "no announced PHY for handler factory yet, queued");
            self.pending.push(factory);
            return FactoryOutcome::Pending;
        };

        record.binding = PhyBinding::Bound(factory.create(phy_id));
        let leftover = matches.count();
        tracing::info!(phy_id = phy_id.get(), phy_name = %name, "bound PHY handler");

        if leftover > 0 {
            self.duplicate_names += 1;
            tracing::warn!(
                phy_name = %name,
                unbound = leftover,
                "several announced PHYs share this name; only the first was bound"
            );
        }

        FactoryOutcome::Bound(phy_id)
    }

    pub(crate) fn observe_phy(&mut self, phy_id: PhyId, phy_name: &str) -> PhyObservation {
        if self.phys.contains_key(&phy_id) {
            return PhyObservation::Known;
        }

        if self.phys.values().any(|p| p.phy_name == phy_name) {
            self.duplicate_names += 1;
            tracing::warn!(
                phy_id = phy_id.get(),
                phy_name,
                "server announced a second PHY with an existing name"
            );
        }

        let mut record = ObservedPhy {
            phy_name: phy_name.to_owned(),
            binding: PhyBinding::Unbound,
        };

        if let Some(pos) = self.pending.iter().position(|f| f.phy_name() == phy_name) {
            let factory = self.pending.remove(pos);
            record.binding = PhyBinding::Bound(factory.create(phy_id));
            tracing::info!(phy_id = phy_id.get(), phy_name, "bound pending PHY handler");

            let leftover = self.pending.iter().filter(|f| f.phy_name() == phy_name).count();
            if leftover > 0 {
                self.duplicate_names += 1;
                tracing::warn!(
                    phy_name,
                    pending = leftover,
                    "several handler factories share this PHY name; later ones stay pending"
                );
            }
        }

        let bound = !record.is_unbound();
        self.phys.insert(phy_id, record);
        PhyObservation::New { bound }
    }

    pub(crate) fn handler_for(&self, phy: PhyId) -> Option<Arc<dyn PhyHandler>> {
        match &self.phys.get(&phy)?.binding {
            PhyBinding::Bound(handler) => Some(Arc::clone(handler)),
            PhyBinding::Unbound => None,
        }
    }

    pub(crate) fn phy_name(&self, phy: PhyId) -> Option<&str> {
        self.phys.get(&phy).map(|p| p.phy_name.as_str())
    }

    pub(crate) fn infos(&self) -> Vec<PhyInfo> {
        self.phys
            .iter()
            .map(|(id, p)| PhyInfo {
                phy_id: *id,
                phy_name: p.phy_name.clone(),
                handler_bound: !p.is_unbound(),
            })
            .collect()
    }

    pub(crate) fn pending_factory_names(&self) -> Vec<String> {
        self.pending.iter().map(|f| f.phy_name().to_owned()).collect()
    }

    pub(crate) fn stats(&self) -> BindingStats {
        let unbound = self.phys.values().filter(|p| p.is_unbound()).count();
        BindingStats {
            bound_phys: self.phys.len() - unbound,
            unbound_phys: unbound,
            pending_factories: self.pending.len(),
            duplicate_names: self.duplicate_names,
        }
    }
}
