//! Client for minting a non-fungible token through an external wallet
//! provider.
//!
//! The crate is organised around three controllers that drive the
//! connection-and-mint state machine:
//!
//! * [`SessionGuard`] detects an already-authorized wallet session and
//!   validates the live network against the configured chain.
//! * [`ConnectionController`] requests account access and arms the standing
//!   chain-changed and mint-completed subscriptions exactly once.
//! * [`MintOrchestrator`] submits the mint transaction and sequences the
//!   submitted / mining / mined status feed.
//!
//! The wallet provider, the contract, the status feed and the notice surface
//! are injected capabilities ([`WalletProvider`], [`MintContract`],
//! [`StatusSink`], [`Notifier`]), so every flow can be exercised against
//! deterministic doubles. Production implementations speaking JSON-RPC over
//! HTTP live in [`rpc`].

pub mod config;
pub mod connection;
pub mod contract;
pub mod feed;
pub mod messages;
pub mod mint;
pub mod provider;
pub mod rpc;
pub mod session;

pub use config::MintConfig;
pub use connection::{ConnectionController, SessionReset};
pub use contract::{ContractError, MintContract, MintedEvent, PendingMint, StubContract, TxHash};
pub use feed::{MemoryNotifier, MemorySink, Notifier, StatusSink, StdoutSink};
pub use mint::{MintOrchestrator, MintOutcome, MintPhase, MintTransaction};
pub use provider::{Address, ChainId, ProviderError, StubProvider, WalletProvider};
pub use session::{Session, SessionGuard};
