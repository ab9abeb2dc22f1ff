use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::MintConfig;
use crate::provider::{Address, ProviderError, WalletProvider};

/// Current wallet linkage. Connected if and only if an account is tracked;
/// at most one account (the first of the authorized set) is ever held.
///
/// A `Session` is a single-owner value: it is created and returned by
/// [`SessionGuard`] and [`crate::ConnectionController`], never mutated
/// ambiently.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    account: Option<Address>,
}

impl Session {
    pub fn disconnected() -> Self {
        Self { account: None }
    }

    pub fn connected_with(account: Address) -> Self {
        Self {
            account: Some(account),
        }
    }

    pub fn account(&self) -> Option<&Address> {
        self.account.as_ref()
    }

    pub fn connected(&self) -> bool {
        self.account.is_some()
    }
}

/// Determines whether a wallet is present, whether an account is already
/// authorized, and whether the live network matches the required one.
#[derive(Clone)]
pub struct SessionGuard {
    provider: Option<Arc<dyn WalletProvider>>,
    config: Arc<MintConfig>,
}

impl SessionGuard {
    pub fn new(provider: Option<Arc<dyn WalletProvider>>, config: Arc<MintConfig>) -> Self {
        Self { provider, config }
    }

    /// Detect an already-authorized session without prompting the user.
    ///
    /// Providerless environments and failing account queries are normal,
    /// non-fatal states that resolve to a disconnected session. When the
    /// returned session is connected the caller is expected to arm the event
    /// subscriptions, same as after an explicit connect.
    pub async fn check_existing_session(&self) -> Session {
        let Some(provider) = &self.provider else {
            debug!("no wallet provider detected");
            return Session::disconnected();
        };

        match provider.authorized_accounts().await {
            Ok(accounts) => match accounts.into_iter().next() {
                Some(account) => {
                    info!(%account, "found authorized account");
                    Session::connected_with(account)
                }
                None => {
                    debug!("no authorized account found");
                    Session::disconnected()
                }
            },
            Err(err) => {
                warn!(%err, "authorized account query failed");
                Session::disconnected()
            }
        }
    }

    /// Compare the live chain identifier against the configured one.
    ///
    /// Stateless by design: the network can change after connection without
    /// disconnecting, so this must be re-evaluated immediately before every
    /// mint attempt. Providerless environments answer `false`, not an error.
    pub async fn is_required_network(&self) -> Result<bool, ProviderError> {
        let Some(provider) = &self.provider else {
            return Ok(false);
        };
        let live = provider.chain_id().await?;
        Ok(live.as_str() == self.config.required_chain_id)
    }
}
