//! The module that adds liveness to a [`Node`] through a simple heartbeating mechanism used to
//! detect leader failure and initiate leadership acquisition.
//!
//! If no heartbeat is received within the `liveness_window`, leadership acquisition is attempted
//! by sending out phase-1a Prepare messages. If a quorum of promises is received, the node has
//! gained leadership and begins sending heartbeats of its own. Otherwise it keeps preparing every
//! `liveness_window` until either a quorum is established or a heartbeat with a higher proposal
//! id arrives. Leadership loss is detected by receiving a heartbeat carrying a higher proposal id
//! (which can only be obtained through a successful phase 1), or by receiving a quorum of NACKs
//! to Accept! messages.
//!
//! None of this modifies the basic Paxos algorithm; it only drives recovery from failed leaders,
//! so the safety argument of the underlying roles is untouched.

use std::collections::HashSet;
use std::fmt::Debug;

use log::Level;

use crate::messenger::{Clock, HeartbeatMessenger, SystemClock};
use crate::paxos::Node;
use crate::proposal::{NodeUid, ProposalId};

/// Default heartbeat cadence while leadership is held, in seconds.
pub const HB_PERIOD: f64 = 1.0;

/// Default follower patience before attempting a takeover, in seconds.
pub const LIVENESS_WINDOW: f64 = 5.0;

/// A Paxos node with heartbeat-driven leader election layered on top.
pub struct HeartbeatNode<T> {
    node: Node<T>,

    leader_uid: Option<NodeUid>,
    leader_proposal_id: Option<ProposalId>,

    hb_period: f64,
    liveness_window: f64,

    t_last_heartbeat: f64,
    t_last_prepare: f64,

    // True from the first takeover prepare until leadership is either won or conceded.
    acquiring: bool,

    // Distinct acceptors that NACKed the current proposal id.
    nacks: HashSet<NodeUid>,

    clock: Box<dyn Clock>,
}

impl<T> HeartbeatNode<T>
where
    T: Clone + Debug + PartialEq,
{
    /// Creates a node using the system wall clock and the default timing parameters. When
    /// `leader_uid` names this node itself, it assumes leadership immediately.
    pub fn new(node_uid: NodeUid, quorum_size: usize, leader_uid: Option<NodeUid>) -> Self {
        Self::with_clock(node_uid, quorum_size, leader_uid, Box::new(SystemClock))
    }

    pub fn with_clock(
        node_uid: NodeUid,
        quorum_size: usize,
        leader_uid: Option<NodeUid>,
        clock: Box<dyn Clock>,
    ) -> Self {
        let now = clock.now();

        HeartbeatNode {
            node: Node::new(node_uid, quorum_size, leader_uid),
            leader_uid,
            leader_proposal_id: leader_uid.map(|uid| ProposalId::new(1, uid)),
            hb_period: HB_PERIOD,
            liveness_window: LIVENESS_WINDOW,
            t_last_heartbeat: now,
            t_last_prepare: now,
            acquiring: false,
            nacks: HashSet::new(),
            clock,
        }
    }

    /// Overrides the heartbeat cadence and the follower patience, both in seconds. Fractional
    /// values give sub-second precision.
    pub fn set_timing(&mut self, hb_period: f64, liveness_window: f64) {
        self.hb_period = hb_period;
        self.liveness_window = liveness_window;
    }

    pub fn uid(&self) -> NodeUid {
        self.node.uid()
    }

    pub fn node(&self) -> &Node<T> {
        &self.node
    }

    pub fn leader_uid(&self) -> Option<NodeUid> {
        self.leader_uid
    }

    pub fn leader_proposal_id(&self) -> Option<ProposalId> {
        self.leader_proposal_id
    }

    pub fn is_leader(&self) -> bool {
        self.node.is_leader()
    }

    pub fn is_acquiring(&self) -> bool {
        self.acquiring
    }

    pub fn hb_period(&self) -> f64 {
        self.hb_period
    }

    pub fn liveness_window(&self) -> f64 {
        self.liveness_window
    }

    pub fn leader_is_alive(&self) -> bool {
        self.clock.now() - self.t_last_heartbeat <= self.liveness_window
    }

    /// True while a competing takeover attempt has been seen recently. Used to suppress dueling
    /// acquisitions.
    pub fn observed_recent_prepare(&self) -> bool {
        self.clock.now() - self.t_last_prepare <= self.liveness_window * 1.5
    }

    /// Should be called every `liveness_window`. Checks whether the current leader is still
    /// alive and, if not, drives the leadership acquisition process.
    pub fn poll_liveness<M>(&mut self, messenger: &mut M)
    where
        M: HeartbeatMessenger<T>,
    {
        if !self.leader_is_alive() && !self.observed_recent_prepare() {
            if self.acquiring {
                self.prepare(messenger, true);
            } else {
                self.acquire_leadership(messenger);
            }
        }
    }

    /// Initiates the leadership acquisition process if the current leader appears to have
    /// failed.
    pub fn acquire_leadership<M>(&mut self, messenger: &mut M)
    where
        M: HeartbeatMessenger<T>,
    {
        if self.leader_is_alive() {
            self.acquiring = false;
        } else {
            if log_enabled!(Level::Info) {
                info!("[{}] attempting to acquire leadership", self.node.uid());
            }
            self.acquiring = true;
            self.prepare(messenger, true);
        }
    }

    /// Starts a new proposal attempt. The NACK tally belongs to the previous attempt, so it is
    /// reset first.
    pub fn prepare<M>(&mut self, messenger: &mut M, increment: bool)
    where
        M: HeartbeatMessenger<T>,
    {
        self.nacks.clear();
        self.node.prepare(messenger, increment);
    }

    /// Called when a heartbeat message is received from the network (including our own, via
    /// [`HeartbeatNode::pulse`]).
    pub fn recv_heartbeat<M>(&mut self, messenger: &mut M, from_uid: NodeUid, proposal_id: ProposalId)
    where
        M: HeartbeatMessenger<T>,
    {
        if Some(proposal_id) > self.leader_proposal_id {
            // Change of leadership.
            self.acquiring = false;

            let old_leader_uid = self.leader_uid;

            self.leader_uid = Some(from_uid);
            self.leader_proposal_id = Some(proposal_id);

            if self.node.is_leader() && from_uid != self.node.uid() {
                if log_enabled!(Level::Info) {
                    info!(
                        "[{}] deposed by heartbeat {:?} from {}",
                        self.node.uid(),
                        proposal_id,
                        from_uid
                    );
                }
                self.node.proposer.set_leader(false);
                messenger.on_leadership_lost();
                self.node.proposer.observe_proposal(from_uid, proposal_id);
            }

            messenger.on_leadership_change(old_leader_uid, Some(from_uid));
        }

        if self.leader_proposal_id == Some(proposal_id) {
            self.t_last_heartbeat = self.clock.now();
        }
    }

    /// Must be called every `hb_period` while this node is the leader. A pulse that fires after
    /// leadership has been lost is a no-op, so the scheduler never needs to cancel anything.
    pub fn pulse<M>(&mut self, messenger: &mut M)
    where
        M: HeartbeatMessenger<T>,
    {
        if self.node.is_leader() {
            if let Some(proposal_id) = self.node.proposer.proposal_id() {
                self.recv_heartbeat(messenger, self.node.uid(), proposal_id);
                messenger.send_heartbeat(proposal_id);
                messenger.schedule(self.hb_period);
            }
        }
    }

    pub fn recv_prepare<M>(&mut self, messenger: &mut M, from_uid: NodeUid, proposal_id: ProposalId) -> bool
    where
        M: HeartbeatMessenger<T>,
    {
        let mutated = self.node.recv_prepare(messenger, from_uid, proposal_id);
        if from_uid != self.node.uid() {
            self.t_last_prepare = self.clock.now();
        }
        mutated
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
        M: HeartbeatMessenger<T>,
    {
        let pre_leader = self.node.is_leader();

        let mutated = self.node.recv_promise(
            messenger,
            from_uid,
            proposal_id,
            prev_accepted_id,
            prev_accepted_value,
        );

        if !pre_leader && self.node.is_leader() {
            let old_leader_uid = self.leader_uid;

            self.leader_uid = Some(self.node.uid());
            self.leader_proposal_id = self.node.proposer.proposal_id();
            self.acquiring = false;
            self.pulse(messenger);
            messenger.on_leadership_change(old_leader_uid, Some(self.node.uid()));
        }

        mutated
    }

    pub fn recv_prepare_nack<M>(
        &mut self,
        messenger: &mut M,
        from_uid: NodeUid,
        proposal_id: ProposalId,
        promised_id: ProposalId,
    ) -> bool
    where
        M: HeartbeatMessenger<T>,
    {
        let mutated = self.node.recv_prepare_nack(from_uid, proposal_id, promised_id);
        if self.acquiring {
            // Retry with the higher proposal number the NACK just taught us.
            self.prepare(messenger, true);
        }
        mutated
    }

    /// A quorum of Accept! NACKs for the current proposal means the cluster has moved on;
    /// leadership is relinquished.
    pub fn recv_accept_nack<M>(
        &mut self,
        messenger: &mut M,
        from_uid: NodeUid,
        proposal_id: ProposalId,
        promised_id: ProposalId,
    ) -> bool
    where
        M: HeartbeatMessenger<T>,
    {
        if Some(proposal_id) == self.node.proposer.proposal_id() {
            self.nacks.insert(from_uid);
        }

        if self.node.is_leader() && self.nacks.len() >= self.node.quorum_size() {
            if log_enabled!(Level::Info) {
                info!("[{}] relinquishing leadership after NACK quorum", self.node.uid());
            }

            self.node.proposer.set_leader(false);
            self.node.proposer.clear_promises();
            self.leader_uid = None;
            self.leader_proposal_id = None;
            messenger.on_leadership_lost();
            messenger.on_leadership_change(Some(self.node.uid()), None);
            self.node.proposer.observe_proposal(from_uid, promised_id);
            return true;
        }

        false
    }

    // The remaining operations need no liveness handling and delegate to the wrapped node.

    pub fn set_proposal<M>(&mut self, messenger: &mut M, value: T)
    where
        M: HeartbeatMessenger<T>,
    {
        self.node.set_proposal(messenger, value);
    }

    pub fn resend_accept<M>(&mut self, messenger: &mut M)
    where
        M: HeartbeatMessenger<T>,
    {
        self.node.resend_accept(messenger);
    }

    pub fn recv_accept_request<M>(
        &mut self,
        messenger: &mut M,
        from_uid: NodeUid,
        proposal_id: ProposalId,
        value: T,
    ) -> bool
    where
        M: HeartbeatMessenger<T>,
    {
        self.node.recv_accept_request(messenger, from_uid, proposal_id, value)
    }

    pub fn recv_accepted<M>(
        &mut self,
        messenger: &mut M,
        from_uid: NodeUid,
        proposal_id: ProposalId,
        value: T,
    ) where
        M: HeartbeatMessenger<T>,
    {
        self.node.recv_accepted(messenger, from_uid, proposal_id, value);
    }

    pub fn persistence_required(&self) -> bool {
        self.node.persistence_required()
    }

    pub fn persisted<M>(&mut self, messenger: &mut M)
    where
        M: HeartbeatMessenger<T>,
    {
        self.node.persisted(messenger);
    }

    pub fn change_quorum_size(&mut self, quorum_size: usize) {
        self.node.change_quorum_size(quorum_size);
    }

    pub fn set_active(&mut self, active: bool) {
        self.node.set_active(active);
    }
}
