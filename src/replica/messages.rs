//! Raft replica -- peer-to-peer messaging.

use super::{LogEntry, RaftReplica, ReplicaId, Role, Term};

use crate::utils::{pf_debug, pf_trace, ConsortError};

use serde::{Deserialize, Serialize};

/// Peer-to-peer message types. Every variant carries the sender's view of
/// its current term. The bus broadcasts each message to the whole cohort;
/// recipients filter by the identifier fields.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum PeerMsg {
    /// Candidate soliciting votes for a new term.
    RequestVote {
        candidate: ReplicaId,
        term: Term,
        last_log_index: usize,
        last_log_term: Term,
    },

    /// Reply to a RequestVote, scoped to the candidate.
    RequestVoteReply {
        voter: ReplicaId,
        candidate: ReplicaId,
        term: Term,
        granted: bool,
    },

    /// Leader pushing log entries to one follower. Empty `entries` is a
    /// heartbeat.
    AppendEntries {
        leader: ReplicaId,
        term: Term,
        prev_log_index: usize,
        prev_log_term: Term,
        entries: Vec<LogEntry>,
        leader_commit: usize,
        to_peer: ReplicaId,
    },

    /// Follower's acknowledgement of an AppendEntries.
    AppendEntriesReply {
        follower: ReplicaId,
        term: Term,
        ack: usize,
        success: bool,
    },
}

// RaftReplica peer message handlers
impl RaftReplica {
    /// Synthesized handler of a message popped off the cohort bus. The bus
    /// does no routing; messages not meant for me are dropped here.
    pub fn handle_msg(&mut self, msg: &PeerMsg) -> Result<(), ConsortError> {
        match msg {
            PeerMsg::RequestVote {
                candidate,
                term,
                last_log_index,
                last_log_term,
            } => {
                if *candidate != self.id {
                    self.handle_request_vote(
                        *candidate,
                        *term,
                        *last_log_index,
                        *last_log_term,
                    )?;
                }
            }
            PeerMsg::RequestVoteReply {
                voter,
                candidate,
                term,
                granted,
            } => {
                if *candidate == self.id {
                    self.handle_request_vote_reply(*voter, *term, *granted)?;
                }
            }
            PeerMsg::AppendEntries {
                leader,
                term,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
                to_peer,
            } => {
                if *to_peer == self.id {
                    self.handle_append_entries(
                        *leader,
                        *term,
                        *prev_log_index,
                        *prev_log_term,
                        entries,
                        *leader_commit,
                    )?;
                }
            }
            PeerMsg::AppendEntriesReply {
                follower,
                term,
                ack,
                success,
            } => {
                if *follower != self.id {
                    self.handle_append_entries_reply(
                        *follower, *term, *ack, *success,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Handler of RequestVote from a campaigning peer. Grants at most one
    /// vote per term, and only to candidates whose log is at least as
    /// up-to-date as mine. Always replies, carrying my current term.
    fn handle_request_vote(
        &mut self,
        candidate: ReplicaId,
        term: Term,
        last_log_index: usize,
        last_log_term: Term,
    ) -> Result<(), ConsortError> {
        self.check_term(term)?;

        let my_last_term = self.last_log_term();
        // whether the candidate's log is at least as up-to-date as mine
        let log_ok = last_log_term > my_last_term
            || (last_log_term == my_last_term
                && last_log_index >= self.log.len());
        let granted = term == self.curr_term
            && log_ok
            && (self.voted_for.is_none()
                || self.voted_for == Some(candidate));

        if granted {
            self.voted_for = Some(candidate);
            pf_debug!(self.id; "granting vote to {} in term {}",
                               candidate, self.curr_term);
        } else {
            pf_trace!(self.id; "denying vote to {} in term {}",
                               candidate, self.curr_term);
        }

        self.bus.bcast_msg(PeerMsg::RequestVoteReply {
            voter: self.id,
            candidate,
            term: self.curr_term,
            granted,
        })?;
        Ok(())
    }

    /// Handler of a RequestVoteReply targeted at me. Tallies granted votes
    /// while I am still the candidate of that term; steps up once the
    /// tally reaches a cohort majority.
    fn handle_request_vote_reply(
        &mut self,
        voter: ReplicaId,
        term: Term,
        granted: bool,
    ) -> Result<(), ConsortError> {
        self.check_term(term)?;

        if self.role == Role::Candidate
            && term == self.curr_term
            && granted
        {
            self.votes_granted.insert(voter);
            pf_trace!(self.id; "vote granted <- {} ({} total)",
                               voter, self.votes_granted.len());
            if self.votes_granted.len() >= self.quorum_cnt()? {
                self.become_the_leader()?;
            }
        }
        Ok(())
    }

    /// Handler of AppendEntries scoped to me. Accepts the sender as the
    /// current term's leader, then appends or rejects depending on whether
    /// my log matches the request's previous-entry checkpoint.
    fn handle_append_entries(
        &mut self,
        leader: ReplicaId,
        term: Term,
        prev_log_index: usize,
        prev_log_term: Term,
        entries: &[LogEntry],
        leader_commit: usize,
    ) -> Result<(), ConsortError> {
        self.check_term(term)?;

        if term == self.curr_term {
            self.heard_leader(leader)?;
        }

        // whether my log contains the request's previous-entry checkpoint
        let log_ok = self.log.len() >= prev_log_index
            && (prev_log_index == 0
                || self.log[prev_log_index - 1].term == prev_log_term);

        if term == self.curr_term && log_ok {
            self.append_entries(prev_log_index, leader_commit, entries)?;
            let ack = prev_log_index + entries.len();
            self.bus.bcast_msg(PeerMsg::AppendEntriesReply {
                follower: self.id,
                term: self.curr_term,
                ack,
                success: true,
            })?;
        } else {
            self.bus.bcast_msg(PeerMsg::AppendEntriesReply {
                follower: self.id,
                term: self.curr_term,
                ack: 0,
                success: false,
            })?;
        }
        Ok(())
    }

    /// Handler of an AppendEntriesReply, meaningful only while I lead the
    /// replying follower's term. Successful acknowledgements advance the
    /// follower's replication bookkeeping and may commit entries; failed
    /// ones walk the sent prefix back by one and retry.
    fn handle_append_entries_reply(
        &mut self,
        follower: ReplicaId,
        term: Term,
        ack: usize,
        success: bool,
    ) -> Result<(), ConsortError> {
        self.check_term(term)?;

        if self.role != Role::Leader || term != self.curr_term {
            return Ok(());
        }
        // replies from replicas outside my bookkeeping are stale; ignore
        let Some(&acked) = self.acked_len.get(&follower) else {
            return Ok(());
        };

        if success && ack >= acked {
            self.sent_len.insert(follower, ack);
            self.acked_len.insert(follower, ack);
            self.commit_log_entries()?;
        } else if !success {
            let sent = self.sent_len.get(&follower).copied().unwrap_or(0);
            if sent > 0 {
                // back off by one and retry until a matching prefix is hit
                self.sent_len.insert(follower, sent - 1);
                self.replicate_log(follower)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::Command;
    use super::*;

    use crate::cluster::Cluster;

    #[test]
    fn vote_granted_once_per_term() -> Result<(), ConsortError> {
        let mut cluster = Cluster::new();
        cluster.spawn_node(None)?;
        cluster.spawn_node(None)?;

        let rival = ReplicaId::generate();
        let candidate = ReplicaId::generate();
        let node = cluster.node_mut(0);

        node.handle_request_vote(candidate, 1, 0, 0)?;
        assert_eq!(node.voted_for, Some(candidate));

        // same candidate may re-request; a rival may not flip the vote
        node.handle_request_vote(candidate, 1, 0, 0)?;
        assert_eq!(node.voted_for, Some(candidate));
        node.handle_request_vote(rival, 1, 0, 0)?;
        assert_eq!(node.voted_for, Some(candidate));

        let queued = cluster.queued_msgs()?;
        assert_eq!(queued.len(), 3);
        for (i, granted) in [true, true, false].into_iter().enumerate() {
            let PeerMsg::RequestVoteReply {
                granted: g, term, ..
            } = &queued[i]
            else {
                panic!("unexpected message type on bus");
            };
            assert_eq!(*g, granted);
            assert_eq!(*term, 1);
        }
        Ok(())
    }

    #[test]
    fn vote_denied_for_stale_log() -> Result<(), ConsortError> {
        let mut cluster = Cluster::new();
        cluster.spawn_node(None)?;
        cluster.spawn_node(None)?;

        let candidate = ReplicaId::generate();
        let node = cluster.node_mut(0);
        node.curr_term = 2;
        node.log.push(LogEntry {
            term: 2,
            command: Command::from_static(b"x"),
        });

        // candidate's log ends in an older term
        node.handle_request_vote(candidate, 3, 1, 1)?;
        assert_eq!(node.voted_for, None);

        // candidate's log has same last term but shorter length
        node.handle_request_vote(candidate, 3, 0, 2)?;
        assert_eq!(node.voted_for, None);

        // up-to-date candidate gets the vote
        node.handle_request_vote(candidate, 3, 1, 2)?;
        assert_eq!(node.voted_for, Some(candidate));
        Ok(())
    }

    #[test]
    fn stale_term_vote_denied_with_my_term() -> Result<(), ConsortError> {
        let mut cluster = Cluster::new();
        cluster.spawn_node(None)?;

        let candidate = ReplicaId::generate();
        let node = cluster.node_mut(0);
        node.curr_term = 7;
        node.handle_request_vote(candidate, 3, 0, 0)?;
        assert_eq!(node.voted_for, None);

        let queued = cluster.queued_msgs()?;
        assert_eq!(
            queued[0],
            PeerMsg::RequestVoteReply {
                voter: cluster.nodes()[0].id(),
                candidate,
                term: 7,
                granted: false,
            }
        );
        Ok(())
    }
}
