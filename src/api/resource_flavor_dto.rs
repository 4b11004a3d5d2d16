use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::flavor::{ResourceFlavor, Taint};
use crate::domain::ids::FlavorName;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFlavorDto {
    pub name: String,

    #[serde(default)]
    pub node_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub node_taints: Vec<Taint>,
}

impl ResourceFlavorDto {
    pub fn into_domain(self) -> ResourceFlavor {
        ResourceFlavor { name: FlavorName::new(self.name), node_labels: self.node_labels, taints: self.node_taints }
    }
}
