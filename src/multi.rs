//! The module that ties a series of individual Paxos instances into a single, logical chain of
//! values. Each instance of the basic algorithm is assigned a sequence number; every inbound
//! call carries the instance number it belongs to and is silently dropped unless it matches the
//! active instance. On resolution the instance number advances and a fresh [`Node`] takes over,
//! with the resolver's uid carried forward as the new instance's leader hint.
//!
//! When a [`DurableStore`] is attached, the chain state is persisted on every state-mutating
//! inbound call, and the acceptor's deferred promise/accepted messages are released immediately
//! after the store commits.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::durable::{DurabilityError, DurableStore};
use crate::messenger::MultiMessenger;
use crate::paxos::{Node, NodeState};
use crate::proposal::{NodeUid, ProposalId};

#[derive(Debug, Error)]
pub enum MultiPaxosError {
    /// The instance number passed to `set_proposal` does not match the active instance.
    #[error("instance number does not match the active instance")]
    InvalidInstanceNumber,

    #[error(transparent)]
    Durability(#[from] DurabilityError),
}

/// The serializable record of a Paxos chain, stored through [`DurableStore`].
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MultiState<T> {
    pub uid: NodeUid,
    pub quorum_size: usize,
    pub instance_num: u64,
    pub node: NodeState<T>,
}

/// Builds the node for a new instance: `(node_uid, quorum_size, leader_uid)`. The default is
/// [`Node::new`]; hosts may substitute a function that pre-configures each node.
pub type NodeFactory<T> = fn(NodeUid, usize, Option<NodeUid>) -> Node<T>;

/// A chain of single-decree Paxos instances sharing one node identity.
pub struct MultiPaxos<T> {
    uid: NodeUid,
    quorum_size: usize,
    instance_num: u64,
    node: Node<T>,
    node_factory: NodeFactory<T>,
    durable: Option<DurableStore<MultiState<T>>>,
}

impl<T> MultiPaxos<T>
where
    T: Clone + Debug + PartialEq + Serialize + DeserializeOwned,
{
    /// Creates a chain with no durability, starting at instance 0.
    pub fn new(uid: NodeUid, quorum_size: usize) -> Self {
        MultiPaxos {
            uid,
            quorum_size,
            instance_num: 0,
            node: Node::new(uid, quorum_size, None),
            node_factory: Node::new,
            durable: None,
        }
    }

    /// Creates a chain backed by `store`. A previous incarnation found in the store is
    /// recovered (its uid, quorum and instance take precedence over the arguments); a fresh
    /// store is initialized and saved immediately, so that a crash before the first message
    /// still restarts from a known state.
    pub fn durable(
        mut store: DurableStore<MultiState<T>>,
        uid: NodeUid,
        quorum_size: usize,
    ) -> Result<Self, MultiPaxosError> {
        let mut chain = match store.take_recovered() {
            Some(state) => {
                if log_enabled!(log::Level::Info) {
                    info!(
                        "[{}] recovered paxos chain at instance {}",
                        state.uid, state.instance_num
                    );
                }
                MultiPaxos {
                    uid: state.uid,
                    quorum_size: state.quorum_size,
                    instance_num: state.instance_num,
                    node: Node::from_state(state.node),
                    node_factory: Node::new,
                    durable: None,
                }
            }
            None => MultiPaxos::new(uid, quorum_size),
        };

        chain.durable = Some(store);
        chain.save()?;

        Ok(chain)
    }

    pub fn set_node_factory(&mut self, node_factory: NodeFactory<T>) {
        self.node_factory = node_factory;
    }

    pub fn uid(&self) -> NodeUid {
        self.uid
    }

    pub fn quorum_size(&self) -> usize {
        self.quorum_size
    }

    pub fn instance_num(&self) -> u64 {
        self.instance_num
    }

    pub fn node(&self) -> &Node<T> {
        &self.node
    }

    pub fn have_proposed_value(&self) -> bool {
        self.node.proposer().proposed_value().is_some()
    }

    pub fn have_leadership(&self) -> bool {
        self.node.is_leader()
    }

    /// Abandons the current instance and jumps the chain to `instance_num` with a fresh node.
    pub fn set_instance_number(&mut self, instance_num: u64) {
        self.instance_num = instance_num;
        self.node = (self.node_factory)(self.uid, self.quorum_size, None);
    }

    pub fn change_quorum_size(&mut self, quorum_size: usize) -> Result<(), MultiPaxosError> {
        self.quorum_size = quorum_size;
        self.node.change_quorum_size(quorum_size);
        self.save()
    }

    /// Proposes `value` for instance `instance_num`. Unlike the `recv_*` family, a mismatched
    /// instance number here is a caller error, not a stale network message.
    pub fn set_proposal<M>(
        &mut self,
        messenger: &mut M,
        instance_num: u64,
        value: T,
    ) -> Result<(), MultiPaxosError>
    where
        M: MultiMessenger<T>,
    {
        if self.instance_num != instance_num {
            return Err(MultiPaxosError::InvalidInstanceNumber);
        }

        self.node.set_proposal(messenger, value);
        Ok(())
    }

    pub fn prepare<M>(&mut self, messenger: &mut M) -> Result<(), MultiPaxosError>
    where
        M: MultiMessenger<T>,
    {
        self.node.prepare(messenger, true);
        self.save()
    }

    pub fn recv_prepare<M>(
        &mut self,
        messenger: &mut M,
        instance_num: u64,
        from_uid: NodeUid,
        proposal_id: ProposalId,
    ) -> Result<(), MultiPaxosError>
    where
        M: MultiMessenger<T>,
    {
        if instance_num != self.instance_num {
            return Ok(());
        }

        let mutated = self.node.recv_prepare(messenger, from_uid, proposal_id);
        self.commit(messenger, mutated)
    }

    pub fn recv_promise<M>(
        &mut self,
        messenger: &mut M,
        instance_num: u64,
        from_uid: NodeUid,
        proposal_id: ProposalId,
        prev_accepted_id: Option<ProposalId>,
        prev_accepted_value: Option<T>,
    ) -> Result<(), MultiPaxosError>
    where
        M: MultiMessenger<T>,
    {
        if instance_num != self.instance_num {
            return Ok(());
        }

        let mutated = self.node.recv_promise(
            messenger,
            from_uid,
            proposal_id,
            prev_accepted_id,
            prev_accepted_value,
        );
        if mutated {
            self.save()?;
        }
        Ok(())
    }

    pub fn recv_accept_request<M>(
        &mut self,
        messenger: &mut M,
        instance_num: u64,
        from_uid: NodeUid,
        proposal_id: ProposalId,
        value: T,
    ) -> Result<(), MultiPaxosError>
    where
        M: MultiMessenger<T>,
    {
        if instance_num != self.instance_num {
            return Ok(());
        }

        let mutated = self.node.recv_accept_request(messenger, from_uid, proposal_id, value);
        self.commit(messenger, mutated)
    }

    pub fn recv_prepare_nack(
        &mut self,
        instance_num: u64,
        from_uid: NodeUid,
        proposal_id: ProposalId,
        promised_id: ProposalId,
    ) -> Result<(), MultiPaxosError> {
        if instance_num != self.instance_num {
            return Ok(());
        }

        if self.node.recv_prepare_nack(from_uid, proposal_id, promised_id) {
            self.save()?;
        }
        Ok(())
    }

    pub fn recv_accept_nack(
        &mut self,
        instance_num: u64,
        from_uid: NodeUid,
        proposal_id: ProposalId,
        promised_id: ProposalId,
    ) -> Result<(), MultiPaxosError> {
        if instance_num != self.instance_num {
            return Ok(());
        }

        if self.node.recv_accept_nack(from_uid, proposal_id, promised_id) {
            self.save()?;
        }
        Ok(())
    }

    pub fn recv_accepted<M>(
        &mut self,
        messenger: &mut M,
        instance_num: u64,
        from_uid: NodeUid,
        proposal_id: ProposalId,
        value: T,
    ) -> Result<(), MultiPaxosError>
    where
        M: MultiMessenger<T>,
    {
        if instance_num != self.instance_num {
            return Ok(());
        }

        self.node.recv_accepted(messenger, from_uid, proposal_id, value);

        if self.node.complete() {
            self.next_instance(messenger)?;
        }
        Ok(())
    }

    // The decree is chosen: advance the chain, seed the next instance's leadership with the
    // resolver's uid, persist, and only then surface the resolution.
    fn next_instance<M>(&mut self, messenger: &mut M) -> Result<(), MultiPaxosError>
    where
        M: MultiMessenger<T>,
    {
        let final_proposal_id = self.node.learner().final_proposal_id();
        let final_value = self.node.learner().final_value().cloned();

        if let (Some(proposal_id), Some(value)) = (final_proposal_id, final_value) {
            let resolved_instance = self.instance_num;

            self.instance_num += 1;
            self.node = (self.node_factory)(self.uid, self.quorum_size, Some(proposal_id.uid));
            self.save()?;

            if log_enabled!(log::Level::Info) {
                info!(
                    "[{}] instance {} resolved, now at instance {}",
                    self.uid, resolved_instance, self.instance_num
                );
            }

            messenger.on_proposal_resolution(resolved_instance, value);
        }
        Ok(())
    }

    // Saving through the attached store IS the acceptor's stable-storage commit, so a
    // successful save releases the deferred promise/accepted messages. Without a store the
    // host drives persisted() itself.
    fn commit<M>(&mut self, messenger: &mut M, mutated: bool) -> Result<(), MultiPaxosError>
    where
        M: MultiMessenger<T>,
    {
        if mutated && self.durable.is_some() {
            self.save()?;
            self.node.persisted(messenger);
        }
        Ok(())
    }

    pub fn persistence_required(&self) -> bool {
        self.node.persistence_required()
    }

    pub fn persisted<M>(&mut self, messenger: &mut M)
    where
        M: MultiMessenger<T>,
    {
        self.node.persisted(messenger);
    }

    /// The serial number the attached store will stamp on its next save, if one is attached.
    pub fn durable_serial(&self) -> Option<u64> {
        self.durable.as_ref().map(|store| store.serial())
    }

    fn save(&mut self) -> Result<(), MultiPaxosError> {
        if let Some(store) = self.durable.as_mut() {
            let state = MultiState {
                uid: self.uid,
                quorum_size: self.quorum_size,
                instance_num: self.instance_num,
                node: self.node.save_state(),
            };
            store.save(&state)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger::Messenger;
    use crate::paxos::tests::uid;
    use crate::proposal::ProposalId;

    fn pid(number: u64, node: u128) -> ProposalId {
        ProposalId::new(number, uid(node))
    }

    /// Records outbound traffic for a String-valued chain.
    #[derive(Default)]
    struct ChainRecorder {
        prepares: Vec<ProposalId>,
        promises: Vec<(NodeUid, ProposalId)>,
        accepts: Vec<(ProposalId, String)>,
        accepteds: Vec<(ProposalId, String)>,
        resolutions: Vec<(ProposalId, String)>,
        chain_resolutions: Vec<(u64, String)>,
    }

    impl Messenger<String> for ChainRecorder {
        fn send_prepare(&mut self, proposal_id: ProposalId) {
            self.prepares.push(proposal_id);
        }

        fn send_promise(
            &mut self,
            to_uid: NodeUid,
            proposal_id: ProposalId,
            _prev_accepted_id: Option<ProposalId>,
            _prev_accepted_value: Option<String>,
        ) {
            self.promises.push((to_uid, proposal_id));
        }

        fn send_prepare_nack(&mut self, _to_uid: NodeUid, _proposal_id: ProposalId, _promised_id: ProposalId) {}

        fn send_accept(&mut self, proposal_id: ProposalId, value: String) {
            self.accepts.push((proposal_id, value));
        }

        fn send_accept_nack(&mut self, _to_uid: NodeUid, _proposal_id: ProposalId, _promised_id: ProposalId) {}

        fn send_accepted(&mut self, proposal_id: ProposalId, value: String) {
            self.accepteds.push((proposal_id, value));
        }

        fn on_resolution(&mut self, proposal_id: ProposalId, value: String) {
            self.resolutions.push((proposal_id, value));
        }
    }

    impl MultiMessenger<String> for ChainRecorder {
        fn on_proposal_resolution(&mut self, instance_num: u64, value: String) {
            self.chain_resolutions.push((instance_num, value));
        }
    }

    fn resolve_current_instance(chain: &mut MultiPaxos<String>, m: &mut ChainRecorder, value: &str) {
        let inum = chain.instance_num();
        chain
            .recv_accepted(m, inum, uid(2), pid(1, 2), value.to_string())
            .unwrap();
        chain
            .recv_accepted(m, inum, uid(3), pid(1, 2), value.to_string())
            .unwrap();
    }

    #[test]
    fn set_proposal_rejects_a_mismatched_instance_number() {
        let mut m = ChainRecorder::default();
        let mut chain: MultiPaxos<String> = MultiPaxos::new(uid(1), 2);

        match chain.set_proposal(&mut m, 3, "foo".to_string()) {
            Err(MultiPaxosError::InvalidInstanceNumber) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }

        chain.set_proposal(&mut m, 0, "foo".to_string()).unwrap();
        assert!(chain.have_proposed_value());
    }

    #[test]
    fn messages_for_other_instances_are_silently_dropped() {
        let mut m = ChainRecorder::default();
        let mut chain: MultiPaxos<String> = MultiPaxos::new(uid(1), 2);
        chain.set_instance_number(2);

        chain.recv_prepare(&mut m, 1, uid(2), pid(1, 2)).unwrap();
        chain
            .recv_accept_request(&mut m, 1, uid(2), pid(1, 2), "foo".to_string())
            .unwrap();
        chain
            .recv_accepted(&mut m, 1, uid(2), pid(1, 2), "foo".to_string())
            .unwrap();

        assert_eq!(chain.instance_num(), 2);
        assert_eq!(chain.node().acceptor().promised_id(), None);
        assert!(!chain.node().complete());

        chain.recv_prepare(&mut m, 2, uid(2), pid(1, 2)).unwrap();
        assert_eq!(chain.node().acceptor().promised_id(), Some(pid(1, 2)));
    }

    #[test]
    fn resolution_advances_to_a_fresh_instance() {
        let mut m = ChainRecorder::default();
        let mut chain: MultiPaxos<String> = MultiPaxos::new(uid(1), 2);

        resolve_current_instance(&mut chain, &mut m, "first");

        assert_eq!(chain.instance_num(), 1);
        assert_eq!(m.chain_resolutions, vec![(0, "first".to_string())]);
        assert_eq!(m.resolutions.len(), 1);

        // The new node is fresh: the learner has no final value and the acceptor no promises.
        assert!(!chain.node().complete());
        assert_eq!(chain.node().acceptor().promised_id(), None);

        resolve_current_instance(&mut chain, &mut m, "second");
        assert_eq!(chain.instance_num(), 2);
        assert_eq!(m.chain_resolutions.len(), 2);
    }

    #[test]
    fn the_resolver_leads_the_next_instance() {
        let mut m = ChainRecorder::default();
        let mut chain: MultiPaxos<String> = MultiPaxos::new(uid(1), 2);

        // Instance 0 resolves on a proposal owned by this very node.
        chain
            .recv_accepted(&mut m, 0, uid(2), pid(1, 1), "v".to_string())
            .unwrap();
        chain
            .recv_accepted(&mut m, 0, uid(3), pid(1, 1), "v".to_string())
            .unwrap();

        assert_eq!(chain.instance_num(), 1);
        assert!(chain.have_leadership());

        // A proposal in the new instance goes straight to phase 2.
        chain.set_proposal(&mut m, 1, "next".to_string()).unwrap();
        assert_eq!(m.accepts.len(), 1);
    }

    #[test]
    fn a_resolution_by_a_peer_does_not_grant_leadership() {
        let mut m = ChainRecorder::default();
        let mut chain: MultiPaxos<String> = MultiPaxos::new(uid(1), 2);

        resolve_current_instance(&mut chain, &mut m, "v");

        assert_eq!(chain.instance_num(), 1);
        assert!(!chain.have_leadership());
    }

    #[test]
    fn durable_chain_recovers_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = ChainRecorder::default();

        {
            let store = DurableStore::open(dir.path(), "chain").unwrap();
            let mut chain = MultiPaxos::durable(store, uid(1), 2).unwrap();

            chain.recv_prepare(&mut m, 0, uid(2), pid(4, 2)).unwrap();
            resolve_current_instance(&mut chain, &mut m, "first");
            assert_eq!(chain.instance_num(), 1);
        }

        let store = DurableStore::open(dir.path(), "chain").unwrap();
        // The recovered incarnation ignores the constructor arguments in favor of the stored
        // identity.
        let chain: MultiPaxos<String> = MultiPaxos::durable(store, uid(9), 7).unwrap();

        assert_eq!(chain.uid(), uid(1));
        assert_eq!(chain.quorum_size(), 2);
        assert_eq!(chain.instance_num(), 1);
        assert!(!chain.node().complete());
    }

    #[test]
    fn durable_chain_releases_deferred_replies_after_the_save() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = ChainRecorder::default();

        let store = DurableStore::open(dir.path(), "chain").unwrap();
        let mut chain = MultiPaxos::durable(store, uid(1), 2).unwrap();

        chain.recv_prepare(&mut m, 0, uid(2), pid(1, 2)).unwrap();

        // The promise went out without an explicit persisted() call.
        assert_eq!(m.promises, vec![(uid(2), pid(1, 2))]);
        assert!(!chain.persistence_required());

        chain
            .recv_accept_request(&mut m, 0, uid(2), pid(1, 2), "v".to_string())
            .unwrap();
        assert_eq!(m.accepteds, vec![(pid(1, 2), "v".to_string())]);
    }

    #[test]
    fn unchanged_state_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = ChainRecorder::default();

        let store = DurableStore::open(dir.path(), "chain").unwrap();
        let mut chain = MultiPaxos::durable(store, uid(1), 2).unwrap();

        chain.recv_prepare(&mut m, 0, uid(2), pid(1, 2)).unwrap();
        let serial = chain.durable_serial().unwrap();

        // A duplicate prepare re-sends the promise but does not touch stable state.
        chain.recv_prepare(&mut m, 0, uid(2), pid(1, 2)).unwrap();
        assert_eq!(chain.durable_serial().unwrap(), serial);

        // A message for a stale instance does not either.
        chain.recv_prepare(&mut m, 7, uid(2), pid(9, 2)).unwrap();
        assert_eq!(chain.durable_serial().unwrap(), serial);
    }

    #[test]
    fn without_a_store_the_host_drives_persistence() {
        let mut m = ChainRecorder::default();
        let mut chain: MultiPaxos<String> = MultiPaxos::new(uid(1), 2);

        chain.recv_prepare(&mut m, 0, uid(2), pid(1, 2)).unwrap();

        assert!(chain.persistence_required());
        assert!(m.promises.is_empty());

        chain.persisted(&mut m);
        assert_eq!(m.promises, vec![(uid(2), pid(1, 2))]);
    }
}
