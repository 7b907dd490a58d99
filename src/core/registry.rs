//! # Bundle registry: id → bundle, plus a symbolic-name index.
//!
//! Enumeration is snapshot-based so the shutdown sweep can iterate a copy in
//! reverse id order while bundles mutate underneath. The framework bundle
//! (id 0) is always present.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::bundle::lifecycle::Bundle;
use crate::bundle::state::STATE_ACTIVE_SET;
use crate::bundle::ActivatorFactory;
use crate::core::context::CoreContext;
use crate::error::FrameworkError;

pub(crate) struct BundleRegistry {
    by_id: DashMap<u64, Bundle>,
    by_name: DashMap<String, u64>,
    next_id: AtomicU64,
}

impl BundleRegistry {
    pub(crate) fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            by_name: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn insert_framework(&self, bundle: Bundle) {
        self.by_name.insert(bundle.symbolic_name().to_string(), 0);
        self.by_id.insert(0, bundle);
    }

    /// Creates and records a bundle; symbolic names are unique.
    pub(crate) fn install(
        &self,
        symbolic_name: &str,
        factory: ActivatorFactory,
        core: Weak<CoreContext>,
    ) -> Result<Bundle, FrameworkError> {
        match self.by_name.entry(symbolic_name.to_string()) {
            Entry::Occupied(_) => Err(FrameworkError::Duplicate {
                name: symbolic_name.to_string(),
            }),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let bundle = Bundle::new(id, symbolic_name, factory, core);
                slot.insert(id);
                self.by_id.insert(id, bundle.clone());
                Ok(bundle)
            }
        }
    }

    pub(crate) fn get(&self, id: u64) -> Option<Bundle> {
        self.by_id.get(&id).map(|entry| entry.value().clone())
    }

    pub(crate) fn remove(&self, id: u64) {
        if let Some((_, bundle)) = self.by_id.remove(&id) {
            self.by_name.remove(bundle.symbolic_name());
        }
    }

    /// All bundles, ascending id order.
    pub(crate) fn snapshot(&self) -> Vec<Bundle> {
        let mut bundles: Vec<Bundle> = self
            .by_id
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        bundles.sort_by_key(Bundle::id);
        bundles
    }

    /// Bundles currently `STARTING | ACTIVE`, ascending id order.
    pub(crate) fn active(&self) -> Vec<Bundle> {
        let mut bundles: Vec<Bundle> = self
            .by_id
            .iter()
            .filter(|entry| entry.value().state().is_in(STATE_ACTIVE_SET))
            .map(|entry| entry.value().clone())
            .collect();
        bundles.sort_by_key(Bundle::id);
        bundles
    }
}
