//! Cohort harness: owns the replicas, the shared FIFO message bus, and the
//! committed-command sink, and advances simulated time.
//!
//! Everything here is strictly single-threaded. One `iterate()` call is one
//! simulated step: deliver at most one queued message to every replica,
//! then tick every replica exactly once. A message enqueued during a step
//! is never observed within the same step.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::replica::{Command, PeerMsg, RaftReplica, ReplicaId};
use crate::utils::{pf_error, ConsortError};

/// Shared state behind every bus handle: the cohort roster, the in-flight
/// message queue, and the committed-command sink.
struct BusState {
    roster: Vec<ReplicaId>,
    queue: VecDeque<PeerMsg>,
    committed: Vec<Command>,
}

/// Non-owning, cloneable handle to the cohort bus. Replicas receive one at
/// construction and use it to enqueue outbound messages, look up cohort
/// membership, and deliver committed commands; the owning `Cluster`
/// strictly outlives all of these uses.
#[derive(Clone)]
pub struct BusHandle {
    state: Rc<RefCell<BusState>>,
}

impl BusHandle {
    fn new() -> Self {
        BusHandle {
            state: Rc::new(RefCell::new(BusState {
                roster: Vec::new(),
                queue: VecDeque::new(),
                committed: Vec::new(),
            })),
        }
    }

    /// Appends a message to the tail of the bus queue.
    pub fn bcast_msg(&self, msg: PeerMsg) -> Result<(), ConsortError> {
        self.state.try_borrow_mut()?.queue.push_back(msg);
        Ok(())
    }

    /// Number of replicas registered in the cohort.
    pub fn population(&self) -> Result<usize, ConsortError> {
        Ok(self.state.try_borrow()?.roster.len())
    }

    /// IDs of every registered replica other than `me`.
    pub fn peers(
        &self,
        me: ReplicaId,
    ) -> Result<Vec<ReplicaId>, ConsortError> {
        Ok(self
            .state
            .try_borrow()?
            .roster
            .iter()
            .copied()
            .filter(|&id| id != me)
            .collect())
    }

    /// Delivers a contiguous range of committed commands starting at the
    /// given log index. The sink holds each index exactly once: the first
    /// delivery of an index appends it, replays of already-held indexes
    /// are checked for agreement and dropped.
    pub fn post_committed(
        &self,
        start_index: usize,
        commands: &[Command],
    ) -> Result<(), ConsortError> {
        let mut state = self.state.try_borrow_mut()?;
        for (offset, command) in commands.iter().enumerate() {
            let index = start_index + offset;
            match index.cmp(&state.committed.len()) {
                Ordering::Less => {
                    if state.committed[index] != *command {
                        pf_error!("sink"; "conflicting command delivered \
                                           at index {}", index);
                    }
                }
                Ordering::Equal => state.committed.push(command.clone()),
                Ordering::Greater => {
                    pf_error!("sink"; "gap in committed delivery at \
                                       index {}", index);
                }
            }
        }
        Ok(())
    }

    /// Snapshot of the committed-command sink.
    pub fn committed(&self) -> Result<Vec<Command>, ConsortError> {
        Ok(self.state.try_borrow()?.committed.clone())
    }

    fn register(&self, id: ReplicaId) -> Result<(), ConsortError> {
        self.state.try_borrow_mut()?.roster.push(id);
        Ok(())
    }

    fn pop_msg(&self) -> Result<Option<PeerMsg>, ConsortError> {
        Ok(self.state.try_borrow_mut()?.queue.pop_front())
    }

    fn queued_msgs(&self) -> Result<Vec<PeerMsg>, ConsortError> {
        Ok(self.state.try_borrow()?.queue.iter().cloned().collect())
    }
}

/// The cohort of replicas under simulation plus their shared bus.
pub struct Cluster {
    nodes: Vec<RaftReplica>,
    bus: BusHandle,
}

impl Cluster {
    /// Creates an empty cohort with a fresh bus.
    pub fn new() -> Self {
        Cluster {
            nodes: Vec::new(),
            bus: BusHandle::new(),
        }
    }

    /// Gets a cloneable handle to this cohort's bus, for constructing
    /// replicas against it.
    pub fn handle(&self) -> BusHandle {
        self.bus.clone()
    }

    /// Adds a constructed replica to the cohort and seeds its randomized
    /// countdowns from the now-known cohort size.
    pub fn add_node(
        &mut self,
        mut node: RaftReplica,
    ) -> Result<ReplicaId, ConsortError> {
        let id = node.id();
        self.bus.register(id)?;
        node.kickoff_timers()?;
        self.nodes.push(node);
        Ok(id)
    }

    /// Constructs a replica against this cohort's bus and adds it.
    pub fn spawn_node(
        &mut self,
        config_str: Option<&str>,
    ) -> Result<ReplicaId, ConsortError> {
        let node = RaftReplica::new(self.handle(), config_str)?;
        self.add_node(node)
    }

    /// Appends a message to the tail of the bus queue, as a replica would.
    pub fn broadcast(&self, msg: PeerMsg) -> Result<(), ConsortError> {
        self.bus.bcast_msg(msg)
    }

    /// One simulated step: pop the head of the message queue (if any) and
    /// deliver it to every replica, then tick every replica once.
    pub fn iterate(&mut self) -> Result<(), ConsortError> {
        if let Some(msg) = self.bus.pop_msg()? {
            for node in &mut self.nodes {
                node.handle_msg(&msg)?;
            }
        }
        for node in &mut self.nodes {
            node.tick()?;
        }
        Ok(())
    }

    /// Read access to the cohort's replicas, in insertion order.
    pub fn nodes(&self) -> &[RaftReplica] {
        &self.nodes
    }

    /// Mutable access to one replica, for submitting commands and for
    /// injecting crashes.
    pub fn node_mut(&mut self, index: usize) -> &mut RaftReplica {
        &mut self.nodes[index]
    }

    /// Snapshot of the committed-command sink.
    pub fn committed(&self) -> Result<Vec<Command>, ConsortError> {
        self.bus.committed()
    }

    /// Snapshot of the messages currently queued on the bus, head first.
    pub fn queued_msgs(&self) -> Result<Vec<PeerMsg>, ConsortError> {
        self.bus.queued_msgs()
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::replica::{Role, Term};

    fn request_vote_stub(term: Term) -> PeerMsg {
        PeerMsg::RequestVote {
            candidate: ReplicaId::generate(),
            term,
            last_log_index: 0,
            last_log_term: 0,
        }
    }

    #[test]
    fn bus_is_fifo() -> Result<(), ConsortError> {
        let cluster = Cluster::new();
        cluster.broadcast(request_vote_stub(1))?;
        cluster.broadcast(request_vote_stub(2))?;
        let queued = cluster.queued_msgs()?;
        assert!(matches!(queued[0], PeerMsg::RequestVote { term: 1, .. }));
        assert!(matches!(queued[1], PeerMsg::RequestVote { term: 2, .. }));
        Ok(())
    }

    #[test]
    fn one_delivery_per_iteration() -> Result<(), ConsortError> {
        let mut cluster = Cluster::new();
        cluster.spawn_node(None)?;
        cluster.broadcast(request_vote_stub(1))?;
        cluster.broadcast(request_vote_stub(2))?;

        cluster.iterate()?;
        // the stub vote request triggered a reply from the node, which
        // must have landed behind the still-queued second stub
        let queued = cluster.queued_msgs()?;
        assert!(matches!(queued[0], PeerMsg::RequestVote { term: 2, .. }));
        assert!(matches!(
            queued[1],
            PeerMsg::RequestVoteReply { term: 1, granted: true, .. }
        ));
        Ok(())
    }

    #[test]
    fn sink_dedups_by_index() -> Result<(), ConsortError> {
        let cluster = Cluster::new();
        let bus = cluster.handle();
        let (a, b) = (
            Command::from_static(b"a"),
            Command::from_static(b"b"),
        );
        bus.post_committed(0, &[a.clone(), b.clone()])?;
        bus.post_committed(0, &[a.clone()])?;
        bus.post_committed(1, &[b.clone(), b.clone()])?;
        assert_eq!(cluster.committed()?, vec![a, b.clone(), b]);
        Ok(())
    }

    #[test]
    fn two_node_election() -> Result<(), ConsortError> {
        let mut cluster = Cluster::new();
        let a = cluster.spawn_node(None)?;
        let b = cluster.spawn_node(None)?;
        cluster.node_mut(0).hb_timeout.set(1);

        // step 1: candidate A solicits votes
        cluster.iterate()?;
        let queued = cluster.queued_msgs()?;
        assert_eq!(queued.len(), 1);
        assert_eq!(
            queued[0],
            PeerMsg::RequestVote {
                candidate: a,
                term: 1,
                last_log_index: 0,
                last_log_term: 0,
            }
        );

        // step 2: B grants its vote
        cluster.iterate()?;
        let queued = cluster.queued_msgs()?;
        assert_eq!(queued.len(), 1);
        assert_eq!(
            queued[0],
            PeerMsg::RequestVoteReply {
                voter: b,
                candidate: a,
                term: 1,
                granted: true,
            }
        );

        // step 3: A steps up and opens replication to B
        cluster.iterate()?;
        assert_eq!(cluster.nodes()[0].role(), Role::Leader);
        assert_eq!(cluster.nodes()[0].leader(), Some(a));
        let queued = cluster.queued_msgs()?;
        assert_eq!(queued.len(), 1);
        assert_eq!(
            queued[0],
            PeerMsg::AppendEntries {
                leader: a,
                term: 1,
                prev_log_index: 0,
                prev_log_term: 0,
                entries: Vec::new(),
                leader_commit: 0,
                to_peer: b,
            }
        );

        // step 4: B accepts A as leader and acknowledges
        cluster.iterate()?;
        assert_eq!(cluster.nodes()[1].role(), Role::Follower);
        assert_eq!(cluster.nodes()[1].leader(), Some(a));
        let queued = cluster.queued_msgs()?;
        assert_eq!(queued.len(), 1);
        assert_eq!(
            queued[0],
            PeerMsg::AppendEntriesReply {
                follower: b,
                term: 1,
                ack: 0,
                success: true,
            }
        );
        Ok(())
    }

    #[test]
    fn vote_denied_when_already_voted() -> Result<(), ConsortError> {
        let mut cluster = Cluster::new();
        let a = cluster.spawn_node(None)?;
        let b = cluster.spawn_node(None)?;
        cluster.node_mut(0).hb_timeout.set(1);

        let unrelated = ReplicaId::generate();
        cluster.node_mut(1).curr_term = 1;
        cluster.node_mut(1).voted_for = Some(unrelated);

        cluster.iterate()?;
        cluster.iterate()?;
        let queued = cluster.queued_msgs()?;
        assert_eq!(queued.len(), 1);
        assert_eq!(
            queued[0],
            PeerMsg::RequestVoteReply {
                voter: b,
                candidate: a,
                term: 1,
                granted: false,
            }
        );
        Ok(())
    }
}
