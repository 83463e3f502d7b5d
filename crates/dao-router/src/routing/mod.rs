//! Key-to-table and read-to-replica routing.

pub mod balancer;
pub mod shard;
