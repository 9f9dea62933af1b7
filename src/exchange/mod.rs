//! Key-exchange session management.
//!
//! ```text
//! init ──► SessionStore::create ──► AwaitingPeer
//!                                      │
//!        complete(peer key) ───────────┼──► Completed ──► ChannelRegistry
//!                                      ├──► Failed      (invalid peer key)
//!                                      └──► Expired     (timeout / sweep)
//! ```
//!
//! Every terminal transition evicts the session and wipes its key pair.

mod id;
mod peer;
mod service;
mod session;
mod state;
mod store;

pub use peer::PeerExchange;
pub use service::{CompleteRequest, InitResponse, KeyExchange, SweepReport};
pub use session::{ExchangeSession, SessionId, SessionInfo};
pub use state::ExchangeState;
pub use store::{SessionStore, StoreConfig, SweepOutcome};
