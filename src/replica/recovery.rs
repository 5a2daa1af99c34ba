//! Raft replica -- crash and rejoin handling.

use std::collections::{HashMap, HashSet};

use super::{RaftReplica, Role};

use crate::utils::pf_warn;

// RaftReplica crash handling
impl RaftReplica {
    /// Models a process crash and immediate restart. Leadership state is
    /// volatile and dropped; the term, vote, and log survive as if read
    /// back from stable storage, which keeps election safety intact across
    /// the restart.
    pub fn handle_crash(&mut self) {
        self.role = Role::Follower;
        self.leader = None;
        self.votes_granted = HashSet::new();
        self.sent_len = HashMap::new();
        self.acked_len = HashMap::new();
        pf_warn!(self.id; "crashed; rejoining as follower in term {}",
                          self.curr_term);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cluster::Cluster;
    use crate::replica::{Command, LogEntry, ReplicaId};
    use crate::utils::ConsortError;

    #[test]
    fn crash_from_leader() -> Result<(), ConsortError> {
        let mut cluster = Cluster::new();
        let id = cluster.spawn_node(None)?;
        let peer = ReplicaId::generate();

        let node = cluster.node_mut(0);
        node.role = Role::Leader;
        node.curr_term = 4;
        node.voted_for = Some(id);
        node.leader = Some(id);
        node.log.push(LogEntry {
            term: 4,
            command: Command::from_static(b"kept"),
        });
        node.votes_granted = HashSet::from([id, peer]);
        node.sent_len = HashMap::from([(peer, 1)]);
        node.acked_len = HashMap::from([(peer, 1)]);

        node.handle_crash();
        assert_eq!(node.role, Role::Follower);
        assert_eq!(node.leader, None);
        assert!(node.votes_granted.is_empty());
        assert!(node.sent_len.is_empty());
        assert!(node.acked_len.is_empty());

        // durable fields survive the crash
        assert_eq!(node.curr_term, 4);
        assert_eq!(node.voted_for, Some(id));
        assert_eq!(node.log.len(), 1);
        Ok(())
    }
}
