pub mod cluster_queue;
pub mod flavor;
pub mod ids;
pub mod local_queue;
pub mod quantity;
pub mod resources;
pub mod workload;
