//! Per-replica consensus state machine for the leader-based replicated log.
//!
//! A replica is driven by exactly three stimuli: a logical clock tick from
//! the harness, an inbound peer message, and a client command submission.
//! Handlers run to completion and never block; every side effect is either a
//! state mutation or a message enqueued onto the cohort bus.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::cluster::BusHandle;
use crate::utils::{parsed_config, ConsortError, Countdown};

use bytes::Bytes;

use serde::{Deserialize, Serialize};

mod leadership;
mod messages;
mod recovery;
mod replication;
mod request;

pub use messages::PeerMsg;

/// Election term number type.
pub type Term = u64;

/// Opaque application command payload carried by log entries.
pub type Command = Bytes;

/// Stable unique replica identifier, randomly drawn at construction.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub struct ReplicaId(u128);

impl ReplicaId {
    /// Draws a fresh random 128-bit identifier.
    pub fn generate() -> Self {
        ReplicaId(rand::random())
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // short hex tag is enough to tell replicas apart in log lines
        write!(f, "{:08x}", (self.0 >> 96) as u32)
    }
}

/// Replica role in the current term.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// A log entry is the term it was accepted in plus the opaque command.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: Term,
    pub command: Command,
}

/// Configuration parameters of a replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaConfig {
    /// Base unit, in ticks, of the heartbeat countdown.
    pub hb_base_ticks: u64,

    /// Base unit, in ticks, of the candidate election countdown. Should be
    /// well below `hb_base_ticks` so a leader's outbound cadence dominates
    /// followers' election cadence.
    pub election_base_ticks: u64,

    /// Countdowns resample to `base * uniform[1, cohort_size * spread]`.
    /// Spread of 10 or more keeps simultaneous expiries unlikely.
    pub timeout_spread: u64,

    /// If true, this replica never steps up as a candidate.
    pub disallow_step_up: bool,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        ReplicaConfig {
            hb_base_ticks: 400,
            election_base_ticks: 100,
            timeout_spread: 10,
            disallow_step_up: false,
        }
    }
}

/// Replica state machine for the Raft-style replicated log protocol.
pub struct RaftReplica {
    /// My replica ID.
    pub(crate) id: ReplicaId,

    /// Configuration parameters struct.
    pub(crate) config: ReplicaConfig,

    /// Non-owning handle to the cohort bus and committed-command sink.
    pub(crate) bus: BusHandle,

    /// Role that I think I am in the current term.
    pub(crate) role: Role,

    /// Latest term seen.
    pub(crate) curr_term: Term,

    /// Candidate I voted for in the current term, if any.
    pub(crate) voted_for: Option<ReplicaId>,

    /// Who I think the current term's leader is, if any.
    pub(crate) leader: Option<ReplicaId>,

    /// In-memory log of entries; 1-indexed in protocol arithmetic.
    pub(crate) log: Vec<LogEntry>,

    /// Length of the log prefix known committed.
    pub(crate) commit_len: usize,

    /// Replicas that voted for me in my current election.
    pub(crate) votes_granted: HashSet<ReplicaId>,

    /// Leader bookkeeping: log prefix length last sent to each peer.
    pub(crate) sent_len: HashMap<ReplicaId, usize>,

    /// Leader bookkeeping: log prefix length acknowledged by each peer.
    pub(crate) acked_len: HashMap<ReplicaId, usize>,

    /// Ticks elapsed since construction.
    pub(crate) clock: u64,

    /// Countdown until I either heartbeat (leader) or suspect the leader
    /// gone and start an election (follower).
    pub(crate) hb_timeout: Countdown,

    /// Countdown until a candidate retries its election.
    pub(crate) election_timeout: Countdown,
}

impl RaftReplica {
    /// Creates a new replica with a fresh random ID, registered to nothing
    /// yet. `config_str` overrides default config fields if given.
    pub fn new(
        bus: BusHandle,
        config_str: Option<&str>,
    ) -> Result<Self, ConsortError> {
        let config: ReplicaConfig = parsed_config(config_str)?;
        let hb_timeout = Countdown::new(config.hb_base_ticks);
        let election_timeout = Countdown::new(config.election_base_ticks);

        Ok(RaftReplica {
            id: ReplicaId::generate(),
            config,
            bus,
            role: Role::Follower,
            curr_term: 0,
            voted_for: None,
            leader: None,
            log: Vec::new(),
            commit_len: 0,
            votes_granted: HashSet::new(),
            sent_len: HashMap::new(),
            acked_len: HashMap::new(),
            clock: 0,
            hb_timeout,
            election_timeout,
        })
    }

    /// Advances the replica by one logical clock tick. The heartbeat
    /// countdown always runs; the election countdown runs only while
    /// campaigning. An expired countdown either heartbeats (leader) or
    /// opens a new election (everyone else).
    pub fn tick(&mut self) -> Result<(), ConsortError> {
        self.clock += 1;
        self.hb_timeout.tick();
        if self.role == Role::Candidate {
            self.election_timeout.tick();
        }

        if self.role == Role::Leader && self.hb_timeout.elapsed() {
            self.bcast_heartbeats()?;
        } else if self.hb_timeout.elapsed()
            || (self.role == Role::Candidate
                && self.election_timeout.elapsed())
        {
            self.become_a_candidate()?;
        }

        Ok(())
    }

    /// Gets my replica ID.
    #[inline]
    pub fn id(&self) -> ReplicaId {
        self.id
    }

    /// Gets my current role.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// True if I believe I am the current leader.
    #[inline]
    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    /// Gets the latest term I have seen.
    #[inline]
    pub fn curr_term(&self) -> Term {
        self.curr_term
    }

    /// Gets who I believe the current term's leader is.
    #[inline]
    pub fn leader(&self) -> Option<ReplicaId> {
        self.leader
    }

    /// Read access to my log.
    #[inline]
    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    /// Gets the length of my committed log prefix.
    #[inline]
    pub fn commit_len(&self) -> usize {
        self.commit_len
    }

    /// Gets the number of ticks I have seen.
    #[inline]
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Term of my last log entry, or 0 for an empty log.
    #[inline]
    pub(crate) fn last_log_term(&self) -> Term {
        self.log.last().map_or(0, |e| e.term)
    }

    /// Number of replicas that makes a majority of the cohort.
    #[inline]
    pub(crate) fn quorum_cnt(&self) -> Result<usize, ConsortError> {
        Ok(self.bus.population()? / 2 + 1)
    }
}
