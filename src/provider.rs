use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Error as AnyError;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Chain identifier as reported by the provider, e.g. `0x4`.
///
/// Comparisons are exact byte equality; `0x04` and `0x4` are different
/// networks as far as this client is concerned.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChainId(String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChainId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Account address held by the wallet.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Failures surfaced by a wallet provider.
///
/// Absence of a provider is not an error; call sites that tolerate it hold an
/// `Option<Arc<dyn WalletProvider>>` instead.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The user declined the consent prompt.
    #[error("request rejected by the user")]
    Rejected,
    /// The provider answered with a payload the client cannot use.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
    /// Networking or serialization failures talking to the provider.
    #[error("transport error: {0}")]
    Transport(#[from] AnyError),
}

impl ProviderError {
    pub fn transport(error: impl Into<AnyError>) -> Self {
        Self::Transport(error.into())
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedResponse(detail.into())
    }
}

/// Capability surface of an external wallet provider.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Accounts the wallet has already authorized for this client. Never
    /// prompts the user.
    async fn authorized_accounts(&self) -> Result<Vec<Address>, ProviderError>;

    /// Request account access. May prompt the user and may be rejected.
    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError>;

    /// Live chain identifier. Callers must not cache the result.
    async fn chain_id(&self) -> Result<ChainId, ProviderError>;

    /// Standing stream of chain-change notifications. Each call registers a
    /// new listener; deduplication is the caller's concern.
    fn subscribe_chain_changed(&self)
        -> Result<mpsc::UnboundedReceiver<ChainId>, ProviderError>;
}

/// Scriptable in-memory provider used in tests and local harnesses.
pub struct StubProvider {
    authorized: Vec<Address>,
    granted: Vec<Address>,
    chain: Mutex<ChainId>,
    reject_requests: bool,
    malformed_requests: bool,
    fail_authorized: bool,
    chain_queries: AtomicUsize,
    request_calls: AtomicUsize,
    chain_listeners: Mutex<Vec<mpsc::UnboundedSender<ChainId>>>,
}

impl Default for StubProvider {
    fn default() -> Self {
        Self {
            authorized: Vec::new(),
            granted: vec![Address::new("0xf00d")],
            chain: Mutex::new(ChainId::new("0x4")),
            reject_requests: false,
            malformed_requests: false,
            fail_authorized: false,
            chain_queries: AtomicUsize::new(0),
            request_calls: AtomicUsize::new(0),
            chain_listeners: Mutex::new(Vec::new()),
        }
    }
}

impl StubProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts returned from the no-prompt authorized query.
    pub fn with_authorized_accounts(mut self, accounts: Vec<Address>) -> Self {
        self.authorized = accounts;
        self
    }

    /// Accounts granted when the user accepts the consent prompt.
    pub fn with_granted_accounts(mut self, accounts: Vec<Address>) -> Self {
        self.granted = accounts;
        self
    }

    pub fn with_chain_id(self, chain: impl Into<String>) -> Self {
        *self.chain.lock().expect("stub chain mutex poisoned") = ChainId::new(chain);
        self
    }

    /// Script the consent prompt to be declined.
    pub fn rejecting_requests(mut self) -> Self {
        self.reject_requests = true;
        self
    }

    /// Script the consent prompt to answer with an unusable payload.
    pub fn with_malformed_account_response(mut self) -> Self {
        self.malformed_requests = true;
        self
    }

    /// Script the authorized-account query itself to fail.
    pub fn failing_authorized_accounts(mut self) -> Self {
        self.fail_authorized = true;
        self
    }

    /// Change the live chain without notifying listeners, as if the user
    /// switched networks in the wallet.
    pub fn set_chain_id(&self, chain: impl Into<String>) {
        *self.chain.lock().expect("stub chain mutex poisoned") = ChainId::new(chain);
    }

    /// Deliver a chain-changed notification to every registered listener.
    pub fn push_chain_changed(&self, chain: impl Into<String>) {
        let chain = ChainId::new(chain);
        self.set_chain_id(chain.as_str().to_string());
        let listeners = self
            .chain_listeners
            .lock()
            .expect("stub listener mutex poisoned");
        for listener in listeners.iter() {
            let _ = listener.send(chain.clone());
        }
    }

    pub fn chain_id_queries(&self) -> usize {
        self.chain_queries.load(Ordering::SeqCst)
    }

    pub fn request_account_calls(&self) -> usize {
        self.request_calls.load(Ordering::SeqCst)
    }

    pub fn chain_subscription_count(&self) -> usize {
        self.chain_listeners
            .lock()
            .expect("stub listener mutex poisoned")
            .len()
    }
}

#[async_trait]
impl WalletProvider for StubProvider {
    async fn authorized_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        if self.fail_authorized {
            return Err(ProviderError::transport(anyhow::anyhow!(
                "authorized account query unavailable"
            )));
        }
        Ok(self.authorized.clone())
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        self.request_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_requests {
            return Err(ProviderError::Rejected);
        }
        if self.malformed_requests {
            return Err(ProviderError::malformed("account payload is not a list"));
        }
        Ok(self.granted.clone())
    }

    async fn chain_id(&self) -> Result<ChainId, ProviderError> {
        self.chain_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.chain.lock().expect("stub chain mutex poisoned").clone())
    }

    fn subscribe_chain_changed(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<ChainId>, ProviderError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.chain_listeners
            .lock()
            .expect("stub listener mutex poisoned")
            .push(tx);
        Ok(rx)
    }
}
