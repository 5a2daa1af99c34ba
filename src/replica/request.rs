//! Raft replica -- client command entrance.

use super::{Command, LogEntry, RaftReplica, Role};

use crate::utils::{logged_err, pf_debug, ConsortError};

// RaftReplica client command entrance
impl RaftReplica {
    /// Accepts one client command for replication. Only the current leader
    /// takes commands; everyone else refuses and names the leader it
    /// believes in so the caller can redirect.
    pub fn submit_command(
        &mut self,
        command: Command,
    ) -> Result<usize, ConsortError> {
        if self.role != Role::Leader {
            return logged_err!(self.id; "submitted command but not leader; \
                                         redirect hint: {:?}",
                                        self.leader.map(|l| l.to_string()));
        }

        self.log.push(LogEntry {
            term: self.curr_term,
            command,
        });
        let index = self.log.len() - 1;
        pf_debug!(self.id; "appended command at index {} term {}",
                           index, self.curr_term);

        // push to all peers right away
        for peer in self.bus.peers(self.id)? {
            self.replicate_log(peer)?;
        }

        // a cohort of one is its own majority
        self.commit_log_entries()?;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cluster::Cluster;
    use crate::replica::PeerMsg;

    #[test]
    fn follower_refuses_commands() -> Result<(), ConsortError> {
        let mut cluster = Cluster::new();
        cluster.spawn_node(None)?;
        assert!(cluster
            .node_mut(0)
            .submit_command(Command::from_static(b"nope"))
            .is_err());
        assert!(cluster.queued_msgs()?.is_empty());
        Ok(())
    }

    #[test]
    fn leader_appends_and_replicates() -> Result<(), ConsortError> {
        let mut cluster = Cluster::new();
        cluster.spawn_node(None)?;
        let b = cluster.spawn_node(None)?;

        let node = cluster.node_mut(0);
        node.role = Role::Leader;
        node.curr_term = 1;
        node.sent_len.insert(b, 0);
        node.acked_len.insert(b, 0);

        let index =
            node.submit_command(Command::from_static(b"put x 1"))?;
        assert_eq!(index, 0);
        assert_eq!(node.log.len(), 1);
        assert_eq!(node.commit_len, 0);

        let queued = cluster.queued_msgs()?;
        assert!(matches!(
            queued[0],
            PeerMsg::AppendEntries {
                prev_log_index: 0,
                to_peer,
                ref entries,
                ..
            } if to_peer == b && entries.len() == 1
        ));
        Ok(())
    }
}
