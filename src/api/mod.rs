pub mod cluster_queue_dto;
pub mod cluster_state_dto;
pub mod local_queue_dto;
pub mod resource_flavor_dto;
pub mod workload_dto;

/// API group and version the wire schema stays field-compatible with.
pub const API_GROUP: &str = "kueue.x-k8s.io";
pub const API_VERSION: &str = "v1beta1";

/// Label naming the local queue a job was submitted to (preferred form).
pub const QUEUE_NAME_LABEL: &str = "kueue.x-k8s.io/queue-name";
/// Annotation form of [`QUEUE_NAME_LABEL`]. Deprecated, same semantics.
pub const QUEUE_NAME_ANNOTATION: &str = "kueue.x-k8s.io/queue-name";
/// Child jobs carrying this annotation share the parent's admission and are not
/// queued on their own.
pub const PARENT_WORKLOAD_ANNOTATION: &str = "kueue.x-k8s.io/parent-workload";
/// Enables partial admission for the job's main pod-set with the given lower
/// bound on parallelism.
pub const JOB_MIN_PARALLELISM_ANNOTATION: &str = "kueue.x-k8s.io/job-min-parallelism";
