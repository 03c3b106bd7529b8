//! A module which contains the proposal identifier used to sequence proposals in the Paxos
//! algorithm.

use uuid::Uuid;

/// Every process participating in the algorithm has an associated universal unique identifier
/// number.
/// https://en.wikipedia.org/wiki/Universally_unique_identifier
pub type NodeUid = Uuid;

/// The identifier of a single proposal attempt.
///
/// For the Paxos algorithm to function, all proposal ids must be unique. A simple way to ensure
/// this is to embed the proposer's UID in the proposal id, which prevents two proposers from ever
/// producing the same id for different values. Ordering is lexicographic on
/// `(number, uid)`, so ids from different proposers with the same round number are still totally
/// ordered.
///
/// A "null" proposal id is represented as `Option<ProposalId>::None` throughout this crate.
/// `Option`'s derived ordering makes `None` strictly less than any concrete id, which is exactly
/// the comparison convention the algorithm requires.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProposalId {
    /// The round number chosen by the proposer. Strictly increasing per proposer.
    pub number: u64,

    /// The unique identifier of the proposer which created this id.
    pub uid: NodeUid,
}

impl ProposalId {
    pub fn new(number: u64, uid: NodeUid) -> Self {
        ProposalId { number, uid }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: u128) -> NodeUid {
        Uuid::from_bytes(n.to_be_bytes())
    }

    #[test]
    fn orders_by_number_first() {
        assert!(ProposalId::new(1, uid(9)) < ProposalId::new(2, uid(1)));
        assert!(ProposalId::new(3, uid(1)) > ProposalId::new(2, uid(9)));
    }

    #[test]
    fn breaks_ties_by_uid() {
        assert!(ProposalId::new(1, uid(1)) < ProposalId::new(1, uid(2)));
        assert_eq!(ProposalId::new(1, uid(1)), ProposalId::new(1, uid(1)));
    }

    #[test]
    fn null_is_less_than_any_concrete_id() {
        let null: Option<ProposalId> = None;
        assert!(null < Some(ProposalId::new(0, uid(0))));
        assert!(Some(ProposalId::new(0, uid(0))) > null);
    }
}
