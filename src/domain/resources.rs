use std::collections::BTreeMap;

use crate::domain::ids::{FlavorName, ResourceName};
use crate::domain::quantity::Quantity;

/// Per-resource amounts, e.g. the request map of one pod.
pub type ResourceList = BTreeMap<ResourceName, Quantity>;

/// Amounts keyed by `(flavor, resource)`.
///
/// This is the container the cache and the snapshot use for admitted usage: one
/// entry per flavor, each holding the per-resource totals charged against that
/// flavor. `BTreeMap` keeps iteration order deterministic, which the assigner
/// and the preemption engine rely on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlavorResourceUsage {
    inner: BTreeMap<FlavorName, ResourceList>,
}

impl FlavorResourceUsage {
    pub fn new() -> Self {
        FlavorResourceUsage { inner: BTreeMap::new() }
    }

    /// Returns the tracked amount, `Quantity::ZERO` for untracked pairs.
    pub fn get(&self, flavor: &FlavorName, resource: &ResourceName) -> Quantity {
        self.inner.get(flavor).and_then(|resources| resources.get(resource)).copied().unwrap_or(Quantity::ZERO)
    }

    pub fn add(&mut self, flavor: &FlavorName, resource: &ResourceName, amount: Quantity) {
        if amount.is_zero() {
            return;
        }
        let entry = self.inner.entry(flavor.clone()).or_default().entry(resource.clone()).or_insert(Quantity::ZERO);
        *entry += amount;
    }

    /// Removes a tracked amount. Entries that reach zero are dropped so that two
    /// usage maps built through different operation orders still compare equal.
    pub fn sub(&mut self, flavor: &FlavorName, resource: &ResourceName, amount: Quantity) {
        if amount.is_zero() {
            return;
        }

        let mut drop_flavor = false;
        if let Some(resources) = self.inner.get_mut(flavor) {
            if let Some(entry) = resources.get_mut(resource) {
                *entry -= amount;
                if entry.is_zero() {
                    resources.remove(resource);
                }
            }
            drop_flavor = resources.is_empty();
        }
        if drop_flavor {
            self.inner.remove(flavor);
        }
    }

    pub fn add_all(&mut self, other: &FlavorResourceUsage) {
        for (flavor, resources) in other.iter() {
            for (resource, amount) in resources {
                self.add(flavor, resource, *amount);
            }
        }
    }

    pub fn sub_all(&mut self, other: &FlavorResourceUsage) {
        for (flavor, resources) in other.iter() {
            for (resource, amount) in resources {
                self.sub(flavor, resource, *amount);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlavorName, &ResourceList)> {
        self.inner.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
