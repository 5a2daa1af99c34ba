//! Raft replica -- log replication and commitment.

use std::cmp;

use super::{Command, LogEntry, PeerMsg, RaftReplica, ReplicaId};

use crate::utils::{pf_debug, pf_info, pf_trace, ConsortError};

// RaftReplica log replication logic
impl RaftReplica {
    /// On the leader, pushes every log entry beyond the peer's sent prefix
    /// to that peer, together with the checkpoint entry just before the
    /// prefix end and my committed length.
    pub(super) fn replicate_log(
        &mut self,
        peer: ReplicaId,
    ) -> Result<(), ConsortError> {
        let Some(&prev_log_index) = self.sent_len.get(&peer) else {
            return Ok(());
        };

        let entries = self.log[prev_log_index..].to_vec();
        let prev_log_term = if prev_log_index > 0 {
            self.log[prev_log_index - 1].term
        } else {
            0
        };

        pf_trace!(self.id; "replicate -> {} prev {} term {} cnt {}",
                           peer, prev_log_index, prev_log_term,
                           entries.len());
        self.bus.bcast_msg(PeerMsg::AppendEntries {
            leader: self.id,
            term: self.curr_term,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: self.commit_len,
            to_peer: peer,
        })?;
        Ok(())
    }

    /// On a follower whose log matched the request checkpoint, reconciles
    /// the incoming entries into the local log and advances the committed
    /// prefix to the leader's.
    pub(super) fn append_entries(
        &mut self,
        prefix_len: usize,
        leader_commit: usize,
        entries: &[LogEntry],
    ) -> Result<(), ConsortError> {
        // a term mismatch anywhere in the overlap means my suffix diverged
        // from the leader's; drop everything past the matching prefix
        if !entries.is_empty() && self.log.len() > prefix_len {
            let index = cmp::min(
                self.log.len(),
                prefix_len + entries.len(),
            ) - 1;
            if self.log[index].term != entries[index - prefix_len].term {
                self.log.truncate(prefix_len);
                pf_debug!(self.id; "truncated log to length {}", prefix_len);
            }
        }

        // append entries not already present
        if prefix_len + entries.len() > self.log.len() {
            let from = self.log.len() - prefix_len;
            self.log.extend_from_slice(&entries[from..]);
        }

        // the leader has committed further than me: deliver the freshly
        // committed range and catch my committed length up
        if leader_commit > self.commit_len {
            let up_to = cmp::min(leader_commit, self.log.len());
            let commands: Vec<Command> = self.log[self.commit_len..up_to]
                .iter()
                .map(|e| e.command.clone())
                .collect();
            self.bus.post_committed(self.commit_len, &commands)?;
            pf_debug!(self.id; "committed up to length {}", up_to);
            self.commit_len = up_to;
        }
        Ok(())
    }

    /// On the leader, commits the longest log prefix acknowledged by a
    /// cohort majority, provided the prefix ends in an entry of my own
    /// term, and delivers the newly committed commands.
    pub(super) fn commit_log_entries(&mut self) -> Result<(), ConsortError> {
        let peers = self.bus.peers(self.id)?;
        let quorum = self.quorum_cnt()?;

        // longest prefix with enough acknowledgements, counting my own log
        // as fully acknowledged
        let mut ready = self.log.len();
        while ready > self.commit_len {
            let acks = 1 + peers
                .iter()
                .filter(|p| {
                    self.acked_len.get(*p).copied().unwrap_or(0) >= ready
                })
                .count();
            if acks >= quorum {
                break;
            }
            ready -= 1;
        }

        // entries of an older term only commit transitively, once an entry
        // of my term has gathered its own quorum on top of them
        if ready > self.commit_len
            && self.log[ready - 1].term == self.curr_term
        {
            let commands: Vec<Command> = self.log[self.commit_len..ready]
                .iter()
                .map(|e| e.command.clone())
                .collect();
            self.bus.post_committed(self.commit_len, &commands)?;
            pf_info!(self.id; "committed up to length {} term {}",
                              ready, self.curr_term);
            self.commit_len = ready;
        }
        Ok(())
    }
}
