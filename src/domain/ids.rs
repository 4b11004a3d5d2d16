use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Serialize)]
pub struct Id<T> {
    pub id: String,
    _marker: PhantomData<T>,
}

impl<T> Id<T> {
    pub fn new(id: impl Into<String>) -> Self {
        Id { id: id.into(), _marker: PhantomData }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl<T> From<Id<T>> for String {
    fn from(id_wrapper: Id<T>) -> Self {
        id_wrapper.id
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full_name = std::any::type_name::<T>();
        let clean_name = full_name.split("::").last().unwrap_or(full_name);
        let display_name = clean_name.replace("Tag", "");

        write!(f, "{}: {:?}", display_name, self.id)
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct ResourceTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct FlavorTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct ClusterQueueTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct CohortTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct LocalQueueTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct WorkloadTag;

/// Name of a resource carried by pod requests, e.g. `cpu`, `memory`, `nvidia.com/gpu`.
pub type ResourceName = Id<ResourceTag>;
/// Name of a [`crate::domain::flavor::ResourceFlavor`].
pub type FlavorName = Id<FlavorTag>;
/// Cluster-scope name of a cluster queue.
pub type ClusterQueueName = Id<ClusterQueueTag>;
/// Name of a cohort shared by borrowing cluster queues.
pub type CohortName = Id<CohortTag>;
/// Namespaced key (`namespace/name`) of a local queue.
pub type LocalQueueKey = Id<LocalQueueTag>;
/// Namespaced key (`namespace/name`) of a workload.
pub type WorkloadKey = Id<WorkloadTag>;

impl LocalQueueKey {
    /// Builds the key from the namespace and the queue name.
    pub fn namespaced(namespace: &str, name: &str) -> Self {
        LocalQueueKey::new(format!("{}/{}", namespace, name))
    }
}

impl WorkloadKey {
    /// Builds the key from the namespace and the workload name.
    pub fn namespaced(namespace: &str, name: &str) -> Self {
        WorkloadKey::new(format!("{}/{}", namespace, name))
    }
}
