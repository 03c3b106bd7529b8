//! A module which contains the traits through which the algorithm reaches the outside world.
//!
//! This crate ships no transport. Every outbound message and every state-transition hook is a
//! method on one of these traits, and the host application decides how (and whether) to put the
//! corresponding bytes on the wire. Paxos tolerates arbitrary message loss, duplication and
//! reordering, so an implementation is free to drop or repeat any of the `send_*` calls.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::proposal::{NodeUid, ProposalId};

/// The outbound interface used by the three basic roles and by [`Node`](crate::paxos::Node).
pub trait Messenger<T> {
    /// Broadcasts a phase-1a Prepare message to all acceptors.
    fn send_prepare(&mut self, proposal_id: ProposalId);

    /// Sends a phase-1b Promise message to the specified proposer. `prev_accepted_id` and
    /// `prev_accepted_value` carry the acceptor's previously accepted proposal, if any.
    fn send_promise(
        &mut self,
        to_uid: NodeUid,
        proposal_id: ProposalId,
        prev_accepted_id: Option<ProposalId>,
        prev_accepted_value: Option<T>,
    );

    /// Sends an explicit rejection of a Prepare message. `promised_id` is the id the acceptor has
    /// already promised, which the proposer may use to skip ahead past stale rounds.
    fn send_prepare_nack(&mut self, to_uid: NodeUid, proposal_id: ProposalId, promised_id: ProposalId);

    /// Broadcasts a phase-2a Accept! message to all acceptors.
    fn send_accept(&mut self, proposal_id: ProposalId, value: T);

    /// Sends an explicit rejection of an Accept! message.
    fn send_accept_nack(&mut self, to_uid: NodeUid, proposal_id: ProposalId, promised_id: ProposalId);

    /// Broadcasts a phase-2b Accepted message to all learners.
    fn send_accepted(&mut self, proposal_id: ProposalId, value: T);

    /// Called when this node's proposer has received promises from a full quorum.
    ///
    /// This is not a guaranteed position: another node may assume leadership at any time, and may
    /// even have already done so by the time this callback runs.
    fn on_leadership_acquired(&mut self) {}

    /// Called once, when this node's learner first observes that a value has been chosen.
    fn on_resolution(&mut self, proposal_id: ProposalId, value: T);
}

/// The extended interface required by [`HeartbeatNode`](crate::heartbeat::HeartbeatNode).
pub trait HeartbeatMessenger<T>: Messenger<T> {
    /// Broadcasts a heartbeat message carrying the current leader's proposal id.
    fn send_heartbeat(&mut self, leader_proposal_id: ProposalId);

    /// Registers a one-shot timer. After roughly `seconds` have elapsed, the host must call
    /// [`HeartbeatNode::pulse`](crate::heartbeat::HeartbeatNode::pulse) on the node that asked
    /// for the timer. The scheduler need not support cancellation: a pulse that arrives after
    /// leadership has been lost is a no-op.
    fn schedule(&mut self, seconds: f64);

    /// Called when loss of leadership is detected.
    fn on_leadership_lost(&mut self) {}

    /// Called when a change in leadership is detected. Either uid may be `None`.
    fn on_leadership_change(&mut self, prev_leader_uid: Option<NodeUid>, new_leader_uid: Option<NodeUid>) {
        let _ = (prev_leader_uid, new_leader_uid);
    }
}

/// The interface required by [`MultiPaxos`](crate::multi::MultiPaxos), which additionally reports
/// each chained instance as it resolves.
pub trait MultiMessenger<T>: Messenger<T> {
    /// Called when the instance numbered `instance_num` has chosen `value`. By the time this
    /// callback runs, the next instance is already active.
    fn on_proposal_resolution(&mut self, instance_num: u64, value: T);
}

/// The time source consumed by the liveness layer.
///
/// Kept behind a trait so that tests (and simulations) can drive the clock by hand. Units are
/// seconds; fractional values give sub-second precision.
pub trait Clock {
    fn now(&self) -> f64;
}

/// A [`Clock`] backed by the system wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}
