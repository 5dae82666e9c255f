// ── Component name registry ──
//
// Bidirectional name <-> id map. Names are case-insensitive; ids are
// handed out monotonically from 1 and never reused.

use std::collections::{BTreeMap, HashMap};

use crate::model::ComponentId;

pub(crate) struct ComponentRegistry {
    by_name: HashMap<String, ComponentId>,
    by_id: BTreeMap<ComponentId, String>,
    next_id: u32,
}

impl ComponentRegistry {
    pub(crate) fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            by_id: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Return the id for `name`, allocating one on first sight.
    pub(crate) fn register(&mut self, name: &str) -> ComponentId {
        let normalized = name.to_lowercase();
        if let Some(id) = self.by_name.get(&normalized) {
            return *id;
        }

        let id = ComponentId::new(self.next_id);
        self.next_id += 1;
        self.by_id.insert(id, normalized.clone());
        self.by_name.insert(normalized, id);
        tracing::debug!(component = name, id = id.get(), "registered device component");
        id
    }

    pub(crate) fn resolve(&self, id: ComponentId) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<ComponentId> {
        self.by_name.get(&name.to_lowercase()).copied()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }
}
