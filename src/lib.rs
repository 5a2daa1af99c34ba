//! Public interface to the Consort core library, linked by both the
//! simulation driver executable and external test harnesses.

mod cluster;
mod replica;
mod utils;

pub use cluster::{BusHandle, Cluster};
pub use replica::{
    Command, LogEntry, PeerMsg, RaftReplica, ReplicaConfig, ReplicaId, Role,
    Term,
};
pub use utils::{logger_init, ConsortError};
