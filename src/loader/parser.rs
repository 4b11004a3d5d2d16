use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::api::cluster_state_dto::ClusterStateDto;
use crate::error::Result;

/// Reads and deserializes a cluster-state file (flavors, cluster queues,
/// local queues, workloads).
///
/// An unreadable file surfaces as `Error::IoError`, malformed JSON as
/// `Error::DeserializationError`; both convert through the crate error type.
pub fn load_cluster_state(path: impl AsRef<Path>) -> Result<ClusterStateDto> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let state: ClusterStateDto = serde_json::from_reader(reader)?;

    log::info!(
        "Cluster state loaded from '{}': {} flavors, {} cluster queues, {} local queues, {} workloads.",
        path.display(),
        state.resource_flavors.len(),
        state.cluster_queues.len(),
        state.local_queues.len(),
        state.workloads.len(),
    );

    Ok(state)
}
