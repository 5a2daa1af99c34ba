//! Raft replica -- leader election and heartbeats.

use std::collections::HashSet;

use super::{PeerMsg, RaftReplica, ReplicaId, Role, Term};

use crate::utils::{pf_debug, pf_info, ConsortError};

use rand::Rng;

// RaftReplica leader election timeout logic
impl RaftReplica {
    /// Check if the given term is larger than mine. If so, adopt it,
    /// forget my vote and any election in flight, and convert my role
    /// back to follower.
    pub(super) fn check_term(
        &mut self,
        term: Term,
    ) -> Result<(), ConsortError> {
        if term > self.curr_term {
            self.curr_term = term;
            self.voted_for = None;
            self.votes_granted.clear();
            self.leader = None;

            if self.role != Role::Follower {
                self.role = Role::Follower;
                pf_info!(self.id; "converted back to follower");
            }

            // refresh both countdowns for the new term
            self.reset_election_timer()?;
            self.reset_heartbeat_timer()?;
        }
        Ok(())
    }

    /// Resamples the heartbeat countdown to a random multiple of its base
    /// unit. A leader's countdown is halved so its outbound cadence stays
    /// ahead of followers' election cadence.
    pub(super) fn reset_heartbeat_timer(
        &mut self,
    ) -> Result<(), ConsortError> {
        let mut ticks = self.config.hb_base_ticks * self.sample_multiplier()?;
        if self.role == Role::Leader {
            ticks = (ticks / 2).max(1);
        }
        self.hb_timeout.set(ticks);
        Ok(())
    }

    /// Resamples the candidate election countdown.
    pub(super) fn reset_election_timer(
        &mut self,
    ) -> Result<(), ConsortError> {
        let ticks =
            self.config.election_base_ticks * self.sample_multiplier()?;
        self.election_timeout.set(ticks);
        Ok(())
    }

    /// Seeds both countdowns once cohort membership is known. Called by
    /// the harness when the replica is added.
    pub(crate) fn kickoff_timers(&mut self) -> Result<(), ConsortError> {
        self.reset_election_timer()?;
        self.reset_heartbeat_timer()
    }

    /// Uniform random multiplier in `[1, cohort_size * spread]`, spreading
    /// replicas' expiries apart enough that ties are unlikely.
    fn sample_multiplier(&self) -> Result<u64, ConsortError> {
        let spread = (self.bus.population()? as u64
            * self.config.timeout_spread)
            .max(1);
        Ok(rand::thread_rng().gen_range(1..=spread))
    }

    /// My heartbeat countdown ran out without hearing from a leader (or my
    /// election ran out without a quorum): become a candidate and start the
    /// election procedure for the next term.
    pub(super) fn become_a_candidate(&mut self) -> Result<(), ConsortError> {
        if self.config.disallow_step_up {
            return Ok(());
        }

        self.role = Role::Candidate;

        // increment current term and vote for myself
        self.curr_term += 1;
        self.voted_for = Some(self.id);
        self.votes_granted = HashSet::from([self.id]);
        self.leader = None;
        pf_info!(self.id; "starting election with term {}...", self.curr_term);

        // send RequestVote messages to all other peers
        let last_log_index = self.log.len();
        let last_log_term = self.last_log_term();
        self.bus.bcast_msg(PeerMsg::RequestVote {
            candidate: self.id,
            term: self.curr_term,
            last_log_index,
            last_log_term,
        })?;

        // reset both countdowns for this election round
        self.reset_election_timer()?;
        self.reset_heartbeat_timer()?;
        Ok(())
    }

    /// Becomes the leader after enough votes granted for me. Initializes
    /// per-peer replication bookkeeping and immediately pushes my view of
    /// the log to every peer.
    pub(super) fn become_the_leader(&mut self) -> Result<(), ConsortError> {
        pf_info!(self.id; "elected to be leader with term {}", self.curr_term);
        self.role = Role::Leader;
        self.leader = Some(self.id);
        self.votes_granted.clear();

        // cancel any pending election retry
        self.reset_election_timer()?;

        // re-initialize sent_len and acked_len information, then replicate
        for peer in self.bus.peers(self.id)? {
            self.sent_len.insert(peer, self.log.len());
            self.acked_len.insert(peer, 0);
            self.replicate_log(peer)?;
        }
        Ok(())
    }

    /// Broadcasts empty AppendEntries messages as heartbeats to all peers,
    /// piggybacking my committed prefix length.
    pub(super) fn bcast_heartbeats(&mut self) -> Result<(), ConsortError> {
        let prev_log_index = self.log.len();
        let prev_log_term = self.last_log_term();
        for peer in self.bus.peers(self.id)? {
            self.bus.bcast_msg(PeerMsg::AppendEntries {
                leader: self.id,
                term: self.curr_term,
                prev_log_index,
                prev_log_term,
                entries: Vec::new(),
                leader_commit: self.commit_len,
                to_peer: peer,
            })?;
        }
        pf_debug!(self.id; "broadcast heartbeats term {}", self.curr_term);

        self.reset_heartbeat_timer()?;
        Ok(())
    }

    /// Heard from the leader of my current term: accept it and push my
    /// election trigger out.
    pub(super) fn heard_leader(
        &mut self,
        peer: ReplicaId,
    ) -> Result<(), ConsortError> {
        if self.role != Role::Follower {
            self.role = Role::Follower;
            self.votes_granted.clear();
        }
        self.leader = Some(peer);

        // reset hearing timers
        self.reset_election_timer()?;
        self.reset_heartbeat_timer()?;
        Ok(())
    }
}
