//! Paper trading collaborators: a broker that fills orders against injected
//! option prices and a feed that replays recorded bars.
//!
//! Neither talks to a real venue. Both implement the core traits so the
//! engine runs unchanged against them.

pub mod broker;
pub mod feed;

pub use broker::{PaperBroker, PaperOperation};
pub use feed::{ChainSnapshot, ReplayFeed};
