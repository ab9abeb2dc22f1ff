use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Error as AnyError;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::provider::Address;

/// Hash of a submitted transaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TxHash(String);

impl TxHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mint-completed event emitted by the contract.
///
/// Arrives independently of any locally tracked transaction; another session
/// or tab may have minted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MintedEvent {
    pub from: Address,
    pub token_id: u64,
}

/// Handle for a submitted mint transaction awaiting confirmation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingMint {
    pub hash: TxHash,
}

/// Failures surfaced by the mint contract.
#[derive(Debug, Error)]
pub enum ContractError {
    /// The user declined the wallet's signing prompt.
    #[error("transaction rejected by the user")]
    Rejected,
    /// The contract refused the call.
    #[error("contract reverted: {reason}")]
    Reverted { reason: String },
    /// Networking or serialization failures talking to the chain.
    #[error("transport error: {0}")]
    Transport(#[from] AnyError),
}

impl ContractError {
    pub fn transport(error: impl Into<AnyError>) -> Self {
        Self::Transport(error.into())
    }

    pub fn reverted(reason: impl Into<String>) -> Self {
        Self::Reverted {
            reason: reason.into(),
        }
    }
}

/// Capability surface of the mint contract, bound to one fixed contract
/// address at construction.
#[async_trait]
pub trait MintContract: Send + Sync {
    /// Submit the mint transaction signed by `from`. May prompt the user.
    async fn mint(&self, from: &Address) -> Result<PendingMint, ContractError>;

    /// Suspend until the given transaction is confirmed. No timeout; the
    /// await runs until confirmation or process end.
    async fn wait_mined(&self, hash: &TxHash) -> Result<(), ContractError>;

    /// Standing stream of mint-completed events. Each call registers a new
    /// listener; deduplication is the caller's concern.
    fn subscribe_minted(&self)
        -> Result<mpsc::UnboundedReceiver<MintedEvent>, ContractError>;
}

/// Scriptable in-memory contract used in tests and local harnesses.
pub struct StubContract {
    hash: TxHash,
    mint_failure: Option<StubFailure>,
    wait_failure: Option<StubFailure>,
    mint_calls: AtomicUsize,
    wait_calls: AtomicUsize,
    minted_listeners: Mutex<Vec<mpsc::UnboundedSender<MintedEvent>>>,
}

#[derive(Clone, Copy, Debug)]
enum StubFailure {
    Rejected,
    Reverted,
    Transport,
}

impl StubFailure {
    fn into_error(self) -> ContractError {
        match self {
            StubFailure::Rejected => ContractError::Rejected,
            StubFailure::Reverted => ContractError::reverted("scripted revert"),
            StubFailure::Transport => {
                ContractError::transport(anyhow::anyhow!("scripted transport failure"))
            }
        }
    }
}

impl Default for StubContract {
    fn default() -> Self {
        Self {
            hash: TxHash::new("0xf00dbabe"),
            mint_failure: None,
            wait_failure: None,
            mint_calls: AtomicUsize::new(0),
            wait_calls: AtomicUsize::new(0),
            minted_listeners: Mutex::new(Vec::new()),
        }
    }
}

impl StubContract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = TxHash::new(hash);
        self
    }

    pub fn rejecting_mint(mut self) -> Self {
        self.mint_failure = Some(StubFailure::Rejected);
        self
    }

    pub fn reverting_mint(mut self) -> Self {
        self.mint_failure = Some(StubFailure::Reverted);
        self
    }

    pub fn failing_wait(mut self) -> Self {
        self.wait_failure = Some(StubFailure::Transport);
        self
    }

    /// Deliver a mint-completed event to every registered listener.
    pub fn push_minted(&self, event: MintedEvent) {
        let listeners = self
            .minted_listeners
            .lock()
            .expect("stub listener mutex poisoned");
        for listener in listeners.iter() {
            let _ = listener.send(event.clone());
        }
    }

    pub fn mint_calls(&self) -> usize {
        self.mint_calls.load(Ordering::SeqCst)
    }

    pub fn wait_calls(&self) -> usize {
        self.wait_calls.load(Ordering::SeqCst)
    }

    pub fn minted_subscription_count(&self) -> usize {
        self.minted_listeners
            .lock()
            .expect("stub listener mutex poisoned")
            .len()
    }
}

#[async_trait]
impl MintContract for StubContract {
    async fn mint(&self, _from: &Address) -> Result<PendingMint, ContractError> {
        self.mint_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.mint_failure {
            return Err(failure.into_error());
        }
        Ok(PendingMint {
            hash: self.hash.clone(),
        })
    }

    async fn wait_mined(&self, _hash: &TxHash) -> Result<(), ContractError> {
        self.wait_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.wait_failure {
            return Err(failure.into_error());
        }
        Ok(())
    }

    fn subscribe_minted(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<MintedEvent>, ContractError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.minted_listeners
            .lock()
            .expect("stub listener mutex poisoned")
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_mints_with_scripted_hash() {
        let contract = StubContract::new().with_hash("0x1234");
        let pending = contract
            .mint(&Address::new("0xabc"))
            .await
            .expect("mint succeeds");
        assert_eq!(pending.hash.as_str(), "0x1234");
        contract.wait_mined(&pending.hash).await.expect("mined");
        assert_eq!(contract.mint_calls(), 1);
        assert_eq!(contract.wait_calls(), 1);
    }

    #[tokio::test]
    async fn scripted_rejection_surfaces_as_rejected() {
        let contract = StubContract::new().rejecting_mint();
        let err = contract
            .mint(&Address::new("0xabc"))
            .await
            .expect_err("rejection scripted");
        assert!(matches!(err, ContractError::Rejected));
    }

    #[tokio::test]
    async fn minted_events_fan_out_to_listeners() {
        let contract = StubContract::new();
        let mut rx = contract.subscribe_minted().expect("subscribe");
        contract.push_minted(MintedEvent {
            from: Address::new("0xabc"),
            token_id: 7,
        });
        let event = rx.recv().await.expect("event");
        assert_eq!(event.token_id, 7);
        assert_eq!(contract.minted_subscription_count(), 1);
    }
}
