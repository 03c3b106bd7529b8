extern crate bincode;
#[macro_use]
extern crate log;
extern crate md5;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate thiserror;
extern crate uuid;

pub mod durable;
pub mod heartbeat;
pub mod messenger;
pub mod multi;
pub mod paxos;
pub mod proposal;

pub use crate::durable::{DurabilityError, DurableStore};
pub use crate::heartbeat::HeartbeatNode;
pub use crate::messenger::{Clock, HeartbeatMessenger, Messenger, MultiMessenger, SystemClock};
pub use crate::multi::{MultiPaxos, MultiPaxosError, MultiState};
pub use crate::paxos::{Acceptor, Learner, Node, NodeState, Proposer};
pub use crate::proposal::{NodeUid, ProposalId};
