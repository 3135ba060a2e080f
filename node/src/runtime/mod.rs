//! Production timing: coordinated clock, turn scheduling and peer terms.

pub mod clock;
pub mod peers;
pub mod scheduler;

pub use clock::ChainClock;
pub use peers::{PeerManager, PeerSet};
pub use scheduler::TurnScheduler;
