//! The module that contains the structs representing the proposers, acceptors and learners of the
//! Paxos algorithm, and their composition into a single [`Node`] which runs all three roles. It
//! also contains the main logic of the algorithm.
//!
//! Every role method is synchronous and non-blocking; outbound traffic happens through the
//! [`Messenger`] handle passed into each call. The algorithm tolerates arbitrary message loss,
//! duplication and reordering, so role methods silently drop anything old, duplicated or
//! out-of-window.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;

use log::Level;

use crate::messenger::Messenger;
use crate::proposal::{NodeUid, ProposalId};

/// The struct representing the proposer in the Paxos algorithm. It drives phases 1 and 2 of the
/// algorithm and becomes leader once a full quorum of acceptors has promised to it.
pub struct Proposer<T> {
    proposer_uid: NodeUid,

    quorum_size: usize,

    // The value this proposer wants chosen. Once set it is never silently overwritten; the only
    // exception is the adoption of a previously accepted value during phase 1.
    proposed_value: Option<T>,

    // The id of the current proposal attempt, assigned by prepare().
    proposal_id: Option<ProposalId>,

    // The highest previously-accepted id seen in any promise, paired with whatever value came
    // with it.
    last_accepted_id: Option<ProposalId>,

    // Strictly increasing. observe_proposal() pushes this past any id seen on the wire so the
    // next attempt is not a guaranteed NACK.
    next_proposal_number: u64,

    // The distinct acceptors that have promised for the current proposal_id.
    promises_rcvd: HashSet<NodeUid>,

    leader: bool,

    // When false, every outbound send is suppressed. State transitions still apply.
    active: bool,
}

impl<T> Proposer<T>
where
    T: Clone + Debug + PartialEq,
{
    pub fn new(proposer_uid: NodeUid, quorum_size: usize) -> Self {
        Proposer {
            proposer_uid,
            quorum_size,
            proposed_value: None,
            proposal_id: None,
            last_accepted_id: None,
            next_proposal_number: 1,
            promises_rcvd: HashSet::new(),
            leader: false,
            active: true,
        }
    }

    pub fn uid(&self) -> NodeUid {
        self.proposer_uid
    }

    pub fn quorum_size(&self) -> usize {
        self.quorum_size
    }

    pub fn set_quorum_size(&mut self, quorum_size: usize) {
        self.quorum_size = quorum_size;
    }

    pub fn proposal_id(&self) -> Option<ProposalId> {
        self.proposal_id
    }

    pub fn proposed_value(&self) -> Option<&T> {
        self.proposed_value.as_ref()
    }

    pub fn last_accepted_id(&self) -> Option<ProposalId> {
        self.last_accepted_id
    }

    pub fn next_proposal_number(&self) -> u64 {
        self.next_proposal_number
    }

    pub fn is_leader(&self) -> bool {
        self.leader
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub(crate) fn set_leader(&mut self, leader: bool) {
        self.leader = leader;
    }

    pub(crate) fn clear_promises(&mut self) {
        self.promises_rcvd.clear();
    }

    pub(crate) fn assign_initial_leadership(&mut self) {
        self.leader = true;
        self.proposal_id = Some(ProposalId::new(self.next_proposal_number, self.proposer_uid));
        self.next_proposal_number += 1;
    }

    /// Sets the proposal value for this node iff a value has not already been set. If this node
    /// is the current leader, the value goes straight to phase 2.
    pub fn set_proposal<M>(&mut self, messenger: &mut M, value: T)
    where
        M: Messenger<T>,
    {
        if self.proposed_value.is_none() {
            self.proposed_value = Some(value.clone());

            if self.leader && self.active {
                if let Some(proposal_id) = self.proposal_id {
                    messenger.send_accept(proposal_id, value);
                }
            }
        }
    }

    /// Sends a prepare request to all acceptors as the first step in attempting to acquire
    /// leadership of the Paxos instance. If `increment` is true, the proposal id is set higher
    /// than that of any previously observed proposal id. Otherwise the previously used proposal
    /// id is simply retransmitted.
    pub fn prepare<M>(&mut self, messenger: &mut M, increment: bool)
    where
        M: Messenger<T>,
    {
        if increment {
            self.leader = false;
            self.promises_rcvd.clear();
            self.proposal_id = Some(ProposalId::new(self.next_proposal_number, self.proposer_uid));

            self.next_proposal_number += 1;
        }

        if let Some(proposal_id) = self.proposal_id {
            if log_enabled!(Level::Debug) {
                debug!("[{}] preparing {:?}", self.proposer_uid, proposal_id);
            }

            if self.active {
                messenger.send_prepare(proposal_id);
            }
        }
    }

    /// Updates the proposal counter as proposal ids are seen on the wire. When co-located with
    /// acceptors and/or learners this avoids a message delay when attempting to assume
    /// leadership (the next attempt would be a guaranteed NACK if the number were too low).
    ///
    /// Returns true iff the counter moved.
    pub fn observe_proposal(&mut self, from_uid: NodeUid, proposal_id: ProposalId) -> bool {
        if from_uid != self.proposer_uid
            && proposal_id >= ProposalId::new(self.next_proposal_number, self.proposer_uid)
        {
            self.next_proposal_number = proposal_id.number + 1;
            return true;
        }
        false
    }

    /// Called when an explicit NACK is sent in response to a prepare message.
    pub fn recv_prepare_nack(
        &mut self,
        from_uid: NodeUid,
        _proposal_id: ProposalId,
        promised_id: ProposalId,
    ) -> bool {
        self.observe_proposal(from_uid, promised_id)
    }

    /// Called when an explicit NACK is sent in response to an accept message. The liveness layer
    /// builds leadership loss on top of this; the base behavior is pure observation.
    pub fn recv_accept_nack(
        &mut self,
        from_uid: NodeUid,
        _proposal_id: ProposalId,
        promised_id: ProposalId,
    ) -> bool {
        self.observe_proposal(from_uid, promised_id)
    }

    /// Retransmits the Accept! message iff this node is the leader and has a proposal value.
    pub fn resend_accept<M>(&mut self, messenger: &mut M)
    where
        M: Messenger<T>,
    {
        if self.leader && self.active {
            if let (Some(proposal_id), Some(value)) = (self.proposal_id, self.proposed_value.clone()) {
                messenger.send_accept(proposal_id, value);
            }
        }
    }

    /// Called when a Promise message is received from an acceptor.
    ///
    /// Returns true iff durable proposer state changed.
    pub fn recv_promise<M>(
        &mut self,
        messenger: &mut M,
        from_uid: NodeUid,
        proposal_id: ProposalId,
        prev_accepted_id: Option<ProposalId>,
        prev_accepted_value: Option<T>,
    ) -> bool
    where
        M: Messenger<T>,
    {
        let mut mutated = self.observe_proposal(from_uid, proposal_id);

        // Ignore the message if it is for an old proposal or if we have already received a
        // promise from this acceptor.
        if self.leader
            || Some(proposal_id) != self.proposal_id
            || self.promises_rcvd.contains(&from_uid)
        {
            return mutated;
        }

        self.promises_rcvd.insert(from_uid);

        if prev_accepted_id > self.last_accepted_id {
            self.last_accepted_id = prev_accepted_id;
            mutated = true;

            // The acceptor has already accepted a value, so this proposal MUST carry that value
            // forward. A null carried value retains the current one.
            if let Some(value) = prev_accepted_value {
                if log_enabled!(Level::Debug) {
                    debug!(
                        "[{}] adopting previously accepted value {:?} from {:?}",
                        self.proposer_uid, value, prev_accepted_id
                    );
                }
                self.proposed_value = Some(value);
            }
        }

        if self.promises_rcvd.len() == self.quorum_size {
            self.leader = true;
            mutated = true;

            if log_enabled!(Level::Info) {
                info!(
                    "[{}] leadership acquired with {:?}",
                    self.proposer_uid, proposal_id
                );
            }

            messenger.on_leadership_acquired();

            if self.active {
                if let Some(value) = self.proposed_value.clone() {
                    messenger.send_accept(proposal_id, value);
                }
            }
        }

        mutated
    }
}

/// The struct representing the acceptor in the Paxos algorithm.
///
/// Acceptors act as the fault-tolerant memory for Paxos. To ensure correctness in the presence of
/// failure, an acceptor must remember the promises it has made even across power outages, so any
/// change to `promised_id`, `accepted_id` or `accepted_value` must reach stable media before the
/// matching promise/accepted message is released to the network.
///
/// Because Paxos permits any combination of dropped messages, not every promise/accepted message
/// needs to be sent. This implementation responds only to the last prepare/accept-request
/// received before the state hits stable media; anything that overlaps an in-flight commit is
/// dropped. After the application has committed the state, [`Acceptor::persisted`] releases the
/// buffered messages.
pub struct Acceptor<T> {
    // The highest proposal id this acceptor has promised.
    promised_id: Option<ProposalId>,

    // The last accepted proposal, if any.
    accepted_id: Option<ProposalId>,
    accepted_value: Option<T>,

    // The uid to send a deferred promise message to once the current state is durable.
    pending_promise: Option<NodeUid>,

    // The uid whose accept request is awaiting durability before the accepted broadcast.
    pending_accepted: Option<NodeUid>,

    active: bool,
}

impl<T> Acceptor<T>
where
    T: Clone + Debug + PartialEq,
{
    pub fn new() -> Self {
        Acceptor {
            promised_id: None,
            accepted_id: None,
            accepted_value: None,
            pending_promise: None,
            pending_accepted: None,
            active: true,
        }
    }

    pub fn promised_id(&self) -> Option<ProposalId> {
        self.promised_id
    }

    pub fn accepted_id(&self) -> Option<ProposalId> {
        self.accepted_id
    }

    pub fn accepted_value(&self) -> Option<&T> {
        self.accepted_value.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// True while a promise and/or accepted message is buffered awaiting a stable-storage
    /// commit of `(promised_id, accepted_id, accepted_value)`.
    pub fn persistence_required(&self) -> bool {
        self.pending_promise.is_some() || self.pending_accepted.is_some()
    }

    /// Reinstates the acceptor's stable memory after a restart.
    pub fn recover(
        &mut self,
        promised_id: Option<ProposalId>,
        accepted_id: Option<ProposalId>,
        accepted_value: Option<T>,
    ) {
        self.promised_id = promised_id;
        self.accepted_id = accepted_id;
        self.accepted_value = accepted_value;
    }

    /// Called when a Prepare message is received from the network.
    ///
    /// Returns true iff stable state changed (and therefore requires persistence before the
    /// buffered reply may be released).
    pub fn recv_prepare<M>(&mut self, messenger: &mut M, from_uid: NodeUid, proposal_id: ProposalId) -> bool
    where
        M: Messenger<T>,
    {
        if Some(proposal_id) == self.promised_id {
            // Duplicate prepare. No change in state is necessary so the response may be sent
            // immediately.
            if self.active {
                messenger.send_promise(
                    from_uid,
                    proposal_id,
                    self.accepted_id,
                    self.accepted_value.clone(),
                );
            }
            false
        } else if Some(proposal_id) > self.promised_id {
            if self.pending_promise.is_none() {
                self.promised_id = Some(proposal_id);
                if self.active {
                    self.pending_promise = Some(from_uid);
                }
                true
            } else {
                // A persistence commit is in flight; dropping the message is always permitted.
                false
            }
        } else {
            if self.active {
                if let Some(promised_id) = self.promised_id {
                    if log_enabled!(Level::Debug) {
                        debug!(
                            "NACKing prepare {:?} from {}, promised {:?}",
                            proposal_id, from_uid, promised_id
                        );
                    }
                    messenger.send_prepare_nack(from_uid, proposal_id, promised_id);
                }
            }
            false
        }
    }

    /// Called when an Accept! message is received from the network.
    ///
    /// Returns true iff stable state changed.
    pub fn recv_accept_request<M>(
        &mut self,
        messenger: &mut M,
        from_uid: NodeUid,
        proposal_id: ProposalId,
        value: T,
    ) -> bool
    where
        M: Messenger<T>,
    {
        if Some(proposal_id) == self.accepted_id && Some(&value) == self.accepted_value.as_ref() {
            // Duplicate of the accepted proposal. No change in state is necessary so the
            // response may be sent immediately.
            if self.active {
                messenger.send_accepted(proposal_id, value);
            }
            false
        } else if Some(proposal_id) >= self.promised_id {
            if self.pending_accepted.is_none() {
                self.promised_id = Some(proposal_id);
                self.accepted_id = Some(proposal_id);
                self.accepted_value = Some(value);
                if self.active {
                    self.pending_accepted = Some(from_uid);
                }
                true
            } else {
                false
            }
        } else {
            if self.active {
                if let Some(promised_id) = self.promised_id {
                    messenger.send_accept_nack(from_uid, proposal_id, promised_id);
                }
            }
            false
        }
    }

    /// The application must call this after committing `(promised_id, accepted_id,
    /// accepted_value)` to stable media. Releases any buffered promise/accepted messages.
    pub fn persisted<M>(&mut self, messenger: &mut M)
    where
        M: Messenger<T>,
    {
        if self.active {
            if let (Some(to_uid), Some(promised_id)) = (self.pending_promise, self.promised_id) {
                messenger.send_promise(
                    to_uid,
                    promised_id,
                    self.accepted_id,
                    self.accepted_value.clone(),
                );
            }

            if self.pending_accepted.is_some() {
                if let (Some(accepted_id), Some(value)) = (self.accepted_id, self.accepted_value.clone())
                {
                    messenger.send_accepted(accepted_id, value);
                }
            }
        }

        self.pending_promise = None;
        self.pending_accepted = None;
    }
}

// The per-proposal bookkeeping of a learner. The accept-set drives resolution; the retain-set
// keeps the entry alive for late-arriving duplicates after an acceptor migrates its vote.
struct ProposalStatus<T> {
    accepts: HashSet<NodeUid>,
    retain: HashSet<NodeUid>,
    value: T,
}

/// The struct representing the learner in the Paxos algorithm. It aggregates Accepted messages
/// across acceptors and declares resolution once `quorum_size` distinct acceptors have accepted
/// the same proposal.
pub struct Learner<T> {
    quorum_size: usize,

    // Both maps are created lazily on the first Accepted message and dropped on resolution.
    proposals: Option<HashMap<ProposalId, ProposalStatus<T>>>,
    acceptors: Option<HashMap<NodeUid, ProposalId>>,

    final_value: Option<T>,
    final_proposal_id: Option<ProposalId>,
    final_acceptors: Option<HashSet<NodeUid>>,
}

impl<T> Learner<T>
where
    T: Clone + Debug + PartialEq,
{
    pub fn new(quorum_size: usize) -> Self {
        Learner {
            quorum_size,
            proposals: None,
            acceptors: None,
            final_value: None,
            final_proposal_id: None,
            final_acceptors: None,
        }
    }

    pub fn quorum_size(&self) -> usize {
        self.quorum_size
    }

    pub fn set_quorum_size(&mut self, quorum_size: usize) {
        self.quorum_size = quorum_size;
    }

    /// True once a value has been chosen.
    pub fn complete(&self) -> bool {
        self.final_proposal_id.is_some()
    }

    pub fn final_value(&self) -> Option<&T> {
        self.final_value.as_ref()
    }

    pub fn final_proposal_id(&self) -> Option<ProposalId> {
        self.final_proposal_id
    }

    /// The acceptors known to have accepted the final value. Grows as late Accepted messages
    /// arrive after resolution.
    pub fn final_acceptors(&self) -> Option<&HashSet<NodeUid>> {
        self.final_acceptors.as_ref()
    }

    pub(crate) fn restore_resolution(
        &mut self,
        final_proposal_id: Option<ProposalId>,
        final_value: Option<T>,
    ) {
        if final_proposal_id.is_some() {
            self.final_acceptors = Some(HashSet::new());
        }
        self.final_proposal_id = final_proposal_id;
        self.final_value = final_value;
    }

    /// Called when an Accepted message is received from an acceptor.
    pub fn recv_accepted<M>(
        &mut self,
        messenger: &mut M,
        from_uid: NodeUid,
        proposal_id: ProposalId,
        value: T,
    ) where
        M: Messenger<T>,
    {
        if let Some(final_value) = self.final_value.as_ref() {
            // Already resolved. A matching acceptance only grows the set of acceptors known to
            // hold the final value; a mismatched one is dropped.
            if *final_value == value {
                if let Some(final_acceptors) = self.final_acceptors.as_mut() {
                    final_acceptors.insert(from_uid);
                }
            }
            return;
        }

        let proposals = self.proposals.get_or_insert_with(HashMap::new);
        let acceptors = self.acceptors.get_or_insert_with(HashMap::new);

        let last_accepted = acceptors.get(&from_uid).copied();

        if !(Some(proposal_id) > last_accepted) {
            return; // Old or duplicate message.
        }

        if let Some(status) = proposals.get(&proposal_id) {
            if status.value != value {
                // Two acceptors reporting different values for a single proposal id means a
                // protocol violation upstream.
                debug_assert!(false, "value mismatch for proposal {:?}", proposal_id);
                warn!(
                    "dropping accepted {:?} from {}: value {:?} mismatches recorded {:?}",
                    proposal_id, from_uid, value, status.value
                );
                return;
            }
        }

        acceptors.insert(from_uid, proposal_id);

        // The acceptor migrated its vote: release its hold on the previous proposal entry and
        // evict the entry once nothing retains it.
        if let Some(last_pid) = last_accepted {
            let evict = match proposals.get_mut(&last_pid) {
                Some(old) => {
                    old.retain.remove(&from_uid);
                    old.retain.is_empty()
                }
                None => false,
            };
            if evict {
                proposals.remove(&last_pid);
            }
        }

        let resolved = {
            let status = proposals.entry(proposal_id).or_insert_with(|| ProposalStatus {
                accepts: HashSet::new(),
                retain: HashSet::new(),
                value: value.clone(),
            });

            status.accepts.insert(from_uid);
            status.retain.insert(from_uid);

            status.accepts.len() == self.quorum_size
        };

        if resolved {
            if log_enabled!(Level::Info) {
                info!("resolution reached on {:?} with value {:?}", proposal_id, value);
            }

            let accepts = self
                .proposals
                .take()
                .and_then(|mut proposals| proposals.remove(&proposal_id))
                .map(|status| status.accepts);

            self.acceptors = None;
            self.final_value = Some(value.clone());
            self.final_proposal_id = Some(proposal_id);
            self.final_acceptors = accepts;

            messenger.on_resolution(proposal_id, value);
        }
    }
}

/// The serializable record of the invariant-bearing state of a [`Node`]. The messenger handle is
/// deliberately absent; it is re-bound on every call after a restore. Working sets (received
/// promises, the learner's tallies, deferred-send targets) are likewise absent: promises are
/// re-acquired with a fresh prepare and dropped replies are always permitted.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NodeState<T> {
    pub node_uid: NodeUid,
    pub quorum_size: usize,

    pub proposed_value: Option<T>,
    pub proposal_id: Option<ProposalId>,
    pub last_accepted_id: Option<ProposalId>,
    pub next_proposal_number: u64,
    pub leader: bool,

    pub promised_id: Option<ProposalId>,
    pub accepted_id: Option<ProposalId>,
    pub accepted_value: Option<T>,

    pub final_proposal_id: Option<ProposalId>,
    pub final_value: Option<T>,
}

/// This struct supports the common model where each node on a network performs all three Paxos
/// roles. The roles share the node's uid and quorum size; the only cross-role coupling is that
/// inbound Prepare messages are observed by the proposer before the acceptor handles them.
pub struct Node<T> {
    node_uid: NodeUid,

    pub(crate) proposer: Proposer<T>,
    pub(crate) acceptor: Acceptor<T>,
    pub(crate) learner: Learner<T>,
}

impl<T> Node<T>
where
    T: Clone + Debug + PartialEq,
{
    /// Creates a node. When `leader_uid` names this node itself, the proposer starts out as the
    /// leader of the instance with a freshly assigned proposal id.
    pub fn new(node_uid: NodeUid, quorum_size: usize, leader_uid: Option<NodeUid>) -> Self {
        let mut proposer = Proposer::new(node_uid, quorum_size);

        if leader_uid == Some(node_uid) {
            proposer.assign_initial_leadership();
        }

        Node {
            node_uid,
            proposer,
            acceptor: Acceptor::new(),
            learner: Learner::new(quorum_size),
        }
    }

    pub fn uid(&self) -> NodeUid {
        self.node_uid
    }

    pub fn quorum_size(&self) -> usize {
        self.proposer.quorum_size()
    }

    pub fn proposer(&self) -> &Proposer<T> {
        &self.proposer
    }

    pub fn acceptor(&self) -> &Acceptor<T> {
        &self.acceptor
    }

    pub fn learner(&self) -> &Learner<T> {
        &self.learner
    }

    pub fn is_leader(&self) -> bool {
        self.proposer.is_leader()
    }

    pub fn complete(&self) -> bool {
        self.learner.complete()
    }

    /// Suppresses (or re-enables) every outbound send of the proposer and acceptor roles.
    pub fn set_active(&mut self, active: bool) {
        self.proposer.set_active(active);
        self.acceptor.set_active(active);
    }

    /// Updates the quorum requirement of all three roles.
    pub fn change_quorum_size(&mut self, quorum_size: usize) {
        self.proposer.set_quorum_size(quorum_size);
        self.learner.set_quorum_size(quorum_size);
    }

    pub fn set_proposal<M>(&mut self, messenger: &mut M, value: T)
    where
        M: Messenger<T>,
    {
        self.proposer.set_proposal(messenger, value);
    }

    pub fn prepare<M>(&mut self, messenger: &mut M, increment: bool)
    where
        M: Messenger<T>,
    {
        self.proposer.prepare(messenger, increment);
    }

    pub fn resend_accept<M>(&mut self, messenger: &mut M)
    where
        M: Messenger<T>,
    {
        self.proposer.resend_accept(messenger);
    }

    /// Inbound Prepare: the proposer observes the id before the acceptor decides on it.
    pub fn recv_prepare<M>(&mut self, messenger: &mut M, from_uid: NodeUid, proposal_id: ProposalId) -> bool
    where
        M: Messenger<T>,
    {
        let observed = self.proposer.observe_proposal(from_uid, proposal_id);
        let promised = self.acceptor.recv_prepare(messenger, from_uid, proposal_id);
        observed || promised
    }

    pub fn recv_promise<M>(
        &mut self,
        messenger: &mut M,
        from_uid: NodeUid,
        proposal_id: ProposalId,
        prev_accepted_id: Option<ProposalId>,
        prev_accepted_value: Option<T>,
    ) -> bool
    where
        M: Messenger<T>,
    {
        self.proposer.recv_promise(
            messenger,
            from_uid,
            proposal_id,
            prev_accepted_id,
            prev_accepted_value,
        )
    }

    pub fn recv_prepare_nack(
        &mut self,
        from_uid: NodeUid,
        proposal_id: ProposalId,
        promised_id: ProposalId,
    ) -> bool {
        self.proposer.recv_prepare_nack(from_uid, proposal_id, promised_id)
    }

    pub fn recv_accept_nack(
        &mut self,
        from_uid: NodeUid,
        proposal_id: ProposalId,
        promised_id: ProposalId,
    ) -> bool {
        self.proposer.recv_accept_nack(from_uid, proposal_id, promised_id)
    }

    pub fn recv_accept_request<M>(
        &mut self,
        messenger: &mut M,
        from_uid: NodeUid,
        proposal_id: ProposalId,
        value: T,
    ) -> bool
    where
        M: Messenger<T>,
    {
        self.acceptor.recv_accept_request(messenger, from_uid, proposal_id, value)
    }

    pub fn recv_accepted<M>(
        &mut self,
        messenger: &mut M,
        from_uid: NodeUid,
        proposal_id: ProposalId,
        value: T,
    ) where
        M: Messenger<T>,
    {
        self.learner.recv_accepted(messenger, from_uid, proposal_id, value);
    }

    pub fn persistence_required(&self) -> bool {
        self.acceptor.persistence_required()
    }

    pub fn persisted<M>(&mut self, messenger: &mut M)
    where
        M: Messenger<T>,
    {
        self.acceptor.persisted(messenger);
    }

    /// Captures the invariant-bearing state for persistence.
    pub fn save_state(&self) -> NodeState<T> {
        NodeState {
            node_uid: self.node_uid,
            quorum_size: self.proposer.quorum_size(),
            proposed_value: self.proposer.proposed_value.clone(),
            proposal_id: self.proposer.proposal_id,
            last_accepted_id: self.proposer.last_accepted_id,
            next_proposal_number: self.proposer.next_proposal_number,
            leader: self.proposer.leader,
            promised_id: self.acceptor.promised_id,
            accepted_id: self.acceptor.accepted_id,
            accepted_value: self.acceptor.accepted_value.clone(),
            final_proposal_id: self.learner.final_proposal_id,
            final_value: self.learner.final_value.clone(),
        }
    }

    /// Rebuilds a node from a previously captured state record.
    pub fn from_state(state: NodeState<T>) -> Self {
        let mut node = Node::new(state.node_uid, state.quorum_size, None);

        node.proposer.proposed_value = state.proposed_value;
        node.proposer.proposal_id = state.proposal_id;
        node.proposer.last_accepted_id = state.last_accepted_id;
        node.proposer.next_proposal_number = state.next_proposal_number;
        node.proposer.leader = state.leader;

        node.acceptor
            .recover(state.promised_id, state.accepted_id, state.accepted_value);

        node.learner
            .restore_resolution(state.final_proposal_id, state.final_value);

        node
    }
}
