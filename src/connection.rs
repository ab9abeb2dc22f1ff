use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::MintConfig;
use crate::contract::MintContract;
use crate::feed::{Notifier, StatusSink};
use crate::messages;
use crate::provider::{ProviderError, WalletProvider};
use crate::session::Session;

/// Capability invoked when the provider switches back to the required
/// network: a deterministic full reset of in-memory state, the stand-in for
/// reloading the page rather than re-validating in place.
pub trait SessionReset: Send + Sync {
    fn reset(&self);
}

/// Requests account access and arms the standing event subscriptions.
///
/// The controller is the single writer of [`Session`] values on the explicit
/// consent path, and the owner of the at-most-once arming flag.
pub struct ConnectionController {
    provider: Option<Arc<dyn WalletProvider>>,
    contract: Arc<dyn MintContract>,
    config: Arc<MintConfig>,
    sink: Arc<dyn StatusSink>,
    notifier: Arc<dyn Notifier>,
    reset: Arc<dyn SessionReset>,
    armed: AtomicBool,
}

impl ConnectionController {
    pub fn new(
        provider: Option<Arc<dyn WalletProvider>>,
        contract: Arc<dyn MintContract>,
        config: Arc<MintConfig>,
        sink: Arc<dyn StatusSink>,
        notifier: Arc<dyn Notifier>,
        reset: Arc<dyn SessionReset>,
    ) -> Self {
        Self {
            provider,
            contract,
            config,
            sink,
            notifier,
            reset,
            armed: AtomicBool::new(false),
        }
    }

    /// Explicit consent path: prompt the user for account access.
    ///
    /// Every failure here is recoverable. The user sees a notice, the session
    /// stays disconnected and a retry is allowed.
    pub async fn connect(&self) -> Session {
        let Some(provider) = &self.provider else {
            self.notifier.notify(messages::install_wallet_notice());
            return Session::disconnected();
        };

        let accounts = match provider.request_accounts().await {
            Ok(accounts) => accounts,
            Err(ProviderError::Rejected) => {
                warn!("user rejected the account request");
                self.notifier.notify(messages::connect_failed_notice());
                return Session::disconnected();
            }
            Err(ProviderError::MalformedResponse(detail)) => {
                warn!(%detail, "provider returned a malformed account payload");
                self.notifier.notify(messages::malformed_accounts_notice());
                return Session::disconnected();
            }
            Err(err) => {
                warn!(%err, "account request failed");
                self.notifier.notify(messages::connect_failed_notice());
                return Session::disconnected();
            }
        };

        // An empty grant leaves no account to adopt; treat it like a
        // malformed payload.
        let Some(account) = accounts.into_iter().next() else {
            warn!("provider granted an empty account list");
            self.notifier.notify(messages::malformed_accounts_notice());
            return Session::disconnected();
        };

        info!(%account, "wallet connected");
        let session = Session::connected_with(account);
        self.arm_subscriptions();
        session
    }

    /// Arm the chain-changed and mint-completed subscriptions.
    ///
    /// Idempotent: no matter how many times the authorized-session path or a
    /// user gesture lands here, at most one listener per event type is
    /// registered for the lifetime of this controller. A failed arm leaves
    /// the flag clear so a later call may retry; a partial arm does not count
    /// as armed.
    pub fn arm_subscriptions(&self) {
        if self.armed.swap(true, Ordering::SeqCst) {
            debug!("event subscriptions already armed");
            return;
        }

        let Some(provider) = &self.provider else {
            self.armed.store(false, Ordering::SeqCst);
            return;
        };

        let chain_rx = match provider.subscribe_chain_changed() {
            Ok(rx) => rx,
            Err(err) => {
                warn!(%err, "failed to subscribe to chain changes");
                self.armed.store(false, Ordering::SeqCst);
                return;
            }
        };
        let minted_rx = match self.contract.subscribe_minted() {
            Ok(rx) => rx,
            Err(err) => {
                warn!(%err, "failed to subscribe to mint events");
                self.armed.store(false, Ordering::SeqCst);
                return;
            }
        };

        let required = self.config.required_chain_id.clone();
        let reset = Arc::clone(&self.reset);
        tokio::spawn(async move {
            let mut chain_rx = chain_rx;
            while let Some(chain) = chain_rx.recv().await {
                debug!(%chain, "chain changed");
                if chain.as_str() == required {
                    info!(%chain, "required network restored; resetting session state");
                    reset.reset();
                }
            }
        });

        let config = Arc::clone(&self.config);
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            let mut minted_rx = minted_rx;
            while let Some(event) = minted_rx.recv().await {
                info!(from = %event.from, token_id = event.token_id, "mint event observed");
                sink.append(&messages::minted_event(&config, event.token_id));
            }
        });

        info!("event subscriptions armed");
    }

    pub fn subscriptions_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::StubContract;
    use crate::feed::{MemoryNotifier, MemorySink};
    use crate::provider::{Address, StubProvider};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingReset {
        count: AtomicUsize,
    }

    impl CountingReset {
        fn count(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }
    }

    impl SessionReset for CountingReset {
        fn reset(&self) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        provider: Arc<StubProvider>,
        contract: Arc<StubContract>,
        sink: Arc<MemorySink>,
        notifier: Arc<MemoryNotifier>,
        reset: Arc<CountingReset>,
        controller: ConnectionController,
    }

    fn harness(provider: StubProvider) -> Harness {
        let provider = Arc::new(provider);
        let contract = Arc::new(StubContract::new());
        let sink = Arc::new(MemorySink::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let reset = Arc::new(CountingReset::default());
        let controller = ConnectionController::new(
            Some(provider.clone() as Arc<dyn WalletProvider>),
            contract.clone() as Arc<dyn MintContract>,
            Arc::new(MintConfig::default()),
            sink.clone() as Arc<dyn StatusSink>,
            notifier.clone() as Arc<dyn Notifier>,
            reset.clone() as Arc<dyn SessionReset>,
        );
        Harness {
            provider,
            contract,
            sink,
            notifier,
            reset,
            controller,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn connect_adopts_first_granted_account() {
        let harness = harness(
            StubProvider::new()
                .with_granted_accounts(vec![Address::new("0xone"), Address::new("0xtwo")]),
        );
        let session = harness.controller.connect().await;
        assert_eq!(session.account(), Some(&Address::new("0xone")));
        assert!(harness.controller.subscriptions_armed());
        assert!(harness.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn rejection_is_recoverable_with_notice() {
        let harness = harness(StubProvider::new().rejecting_requests());
        let session = harness.controller.connect().await;
        assert!(!session.connected());
        assert_eq!(
            harness.notifier.notices(),
            vec![messages::connect_failed_notice().to_string()]
        );
        assert!(!harness.controller.subscriptions_armed());
    }

    #[tokio::test]
    async fn malformed_account_payload_aborts_without_session_mutation() {
        let harness = harness(StubProvider::new().with_malformed_account_response());
        let session = harness.controller.connect().await;
        assert!(!session.connected());
        assert_eq!(
            harness.notifier.notices(),
            vec![messages::malformed_accounts_notice().to_string()]
        );
    }

    #[tokio::test]
    async fn empty_grant_is_treated_as_malformed() {
        let harness = harness(StubProvider::new().with_granted_accounts(Vec::new()));
        let session = harness.controller.connect().await;
        assert!(!session.connected());
        assert_eq!(
            harness.notifier.notices(),
            vec![messages::malformed_accounts_notice().to_string()]
        );
    }

    #[tokio::test]
    async fn arming_twice_registers_each_listener_once() {
        let harness = harness(StubProvider::new());
        harness.controller.arm_subscriptions();
        harness.controller.arm_subscriptions();
        assert_eq!(harness.provider.chain_subscription_count(), 1);
        assert_eq!(harness.contract.minted_subscription_count(), 1);
    }

    #[tokio::test]
    async fn chain_restored_to_required_network_resets_once() {
        let harness = harness(StubProvider::new());
        harness.controller.arm_subscriptions();
        harness.provider.push_chain_changed("0x4");
        settle().await;
        assert_eq!(harness.reset.count(), 1);
        // The chain-changed handler never touches the status feed.
        assert!(harness.sink.entries().is_empty());
    }

    #[tokio::test]
    async fn chain_change_to_other_network_does_nothing() {
        let harness = harness(StubProvider::new());
        harness.controller.arm_subscriptions();
        harness.provider.push_chain_changed("0x1");
        settle().await;
        assert_eq!(harness.reset.count(), 0);
    }

    #[tokio::test]
    async fn missing_provider_shows_install_notice() {
        let contract = Arc::new(StubContract::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let controller = ConnectionController::new(
            None,
            contract as Arc<dyn MintContract>,
            Arc::new(MintConfig::default()),
            Arc::new(MemorySink::new()) as Arc<dyn StatusSink>,
            notifier.clone() as Arc<dyn Notifier>,
            Arc::new(CountingReset::default()) as Arc<dyn SessionReset>,
        );
        let session = controller.connect().await;
        assert!(!session.connected());
        assert_eq!(
            notifier.notices(),
            vec![messages::install_wallet_notice().to_string()]
        );
    }
}
