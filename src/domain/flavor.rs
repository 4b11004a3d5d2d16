use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::ids::FlavorName;

/// Effect a taint has on pods that do not tolerate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

/// Node taint carried by a flavor. Pod-sets must tolerate every `NoSchedule` and
/// `NoExecute` taint before the flavor can be assigned to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    pub value: String,
    pub effect: TaintEffect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TolerationOperator {
    Equal,
    Exists,
}

/// Pod-set toleration matched against flavor taints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub operator: TolerationOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    /// Checks whether this toleration covers the given taint.
    ///
    /// An empty key together with `Exists` tolerates everything. Otherwise the keys
    /// must match, `Equal` additionally compares the value, and a present effect
    /// restricts the toleration to taints with that exact effect.
    pub fn tolerates(&self, taint: &Taint) -> bool {
        if let Some(effect) = self.effect {
            if effect != taint.effect {
                return false;
            }
        }

        match (&self.key, self.operator) {
            (None, TolerationOperator::Exists) => true,
            (None, TolerationOperator::Equal) => false,
            (Some(key), TolerationOperator::Exists) => key == &taint.key,
            (Some(key), TolerationOperator::Equal) => key == &taint.key && self.value.as_deref() == Some(taint.value.as_str()),
        }
    }
}

/// A named class of capacity (e.g. `on-demand`, `spot`).
///
/// Carries the node-selector labels and taints that pin admitted pod-sets to the
/// matching nodes. The flavor itself is immutable once referenced by a cluster
/// queue; identity matters for quota matching, not the label content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFlavor {
    pub name: FlavorName,
    pub node_labels: BTreeMap<String, String>,
    pub taints: Vec<Taint>,
}

impl ResourceFlavor {
    pub fn new(name: impl Into<String>) -> Self {
        ResourceFlavor { name: FlavorName::new(name), node_labels: BTreeMap::new(), taints: Vec::new() }
    }

    /// Decides whether a pod-set with the given node selector and tolerations can
    /// run on this flavor.
    ///
    /// # Returns
    /// * `true` - if every selector key shared with the flavor labels agrees on the
    ///   value and every `NoSchedule`/`NoExecute` taint is tolerated.
    /// * `false` - otherwise. The assigner then skips this flavor for the pod-set.
    pub fn matches(&self, node_selector: &BTreeMap<String, String>, tolerations: &[Toleration]) -> bool {
        for (key, wanted) in node_selector {
            if let Some(present) = self.node_labels.get(key) {
                if present != wanted {
                    log::debug!("Flavor {} rejected: selector {}={} conflicts with flavor label {}={}", self.name, key, wanted, key, present);
                    return false;
                }
            }
        }

        for taint in &self.taints {
            if taint.effect == TaintEffect::PreferNoSchedule {
                continue;
            }
            if !tolerations.iter().any(|toleration| toleration.tolerates(taint)) {
                log::debug!("Flavor {} rejected: taint {}={} is not tolerated", self.name, taint.key, taint.value);
                return false;
            }
        }

        return true;
    }
}
