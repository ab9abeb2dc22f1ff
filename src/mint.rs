use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::MintConfig;
use crate::contract::{MintContract, TxHash};
use crate::feed::{Notifier, StatusSink};
use crate::messages;
use crate::session::{Session, SessionGuard};

/// Phase of a single mint attempt. Strictly ordered; a tracked transaction
/// never regresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MintPhase {
    Idle,
    Submitted,
    Mining,
    Mined,
}

impl fmt::Display for MintPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MintPhase::Idle => write!(f, "idle"),
            MintPhase::Submitted => write!(f, "submitted"),
            MintPhase::Mining => write!(f, "mining"),
            MintPhase::Mined => write!(f, "mined"),
        }
    }
}

/// One in-flight mint attempt. Exactly one is tracked at a time; the handle
/// is discarded once the attempt resolves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MintTransaction {
    hash: TxHash,
    phase: MintPhase,
}

impl MintTransaction {
    pub fn submitted(hash: TxHash) -> Self {
        Self {
            hash,
            phase: MintPhase::Submitted,
        }
    }

    pub fn hash(&self) -> &TxHash {
        &self.hash
    }

    pub fn phase(&self) -> MintPhase {
        self.phase
    }

    /// Advance to a later phase. Regressions are refused and reported.
    pub fn advance(&mut self, phase: MintPhase) -> bool {
        if phase < self.phase {
            warn!(current = %self.phase, requested = %phase, "refusing mint phase regression");
            return false;
        }
        self.phase = phase;
        true
    }
}

/// How a mint attempt resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MintOutcome {
    /// No connected session; nothing was checked or submitted.
    NotConnected,
    /// Live network differs from the required one; aborted before any side
    /// effect, with a user-visible notice.
    WrongNetwork,
    /// Submission or confirmation failed; logged, feed retained as-is, no
    /// automatic retry.
    Aborted,
    Mined { hash: TxHash },
}

/// Validates the network, submits the mint transaction and sequences the
/// submitted / mining / mined status feed.
///
/// The calling surface must not offer the mint action while a previous
/// attempt is outstanding; the feed is shared and a second in-flight attempt
/// would interleave its entries.
pub struct MintOrchestrator {
    guard: SessionGuard,
    contract: Arc<dyn MintContract>,
    config: Arc<MintConfig>,
    sink: Arc<dyn StatusSink>,
    notifier: Arc<dyn Notifier>,
}

impl MintOrchestrator {
    pub fn new(
        guard: SessionGuard,
        contract: Arc<dyn MintContract>,
        config: Arc<MintConfig>,
        sink: Arc<dyn StatusSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            guard,
            contract,
            config,
            sink,
            notifier,
        }
    }

    /// Run one mint attempt to completion.
    ///
    /// Every failure is caught at this boundary: the session stays valid, the
    /// feed keeps whatever was appended before the failure, and nothing
    /// propagates to the caller beyond the outcome.
    pub async fn mint(&self, session: &Session) -> MintOutcome {
        let Some(account) = session.account() else {
            return MintOutcome::NotConnected;
        };

        match self.guard.is_required_network().await {
            Ok(true) => {}
            Ok(false) => {
                self.notifier
                    .notify(&messages::wrong_network_notice(&self.config));
                return MintOutcome::WrongNetwork;
            }
            Err(err) => {
                warn!(%err, "network check failed");
                return MintOutcome::Aborted;
            }
        }

        let pending = match self.contract.mint(account).await {
            Ok(pending) => pending,
            Err(err) => {
                warn!(%err, "mint submission failed");
                return MintOutcome::Aborted;
            }
        };

        let mut txn = MintTransaction::submitted(pending.hash);
        info!(hash = %txn.hash(), "mint transaction submitted");

        // A new attempt owns the feed: discard any prior attempt's entries.
        self.sink.clear();
        self.sink.append(messages::MINING);
        txn.advance(MintPhase::Mining);

        if let Err(err) = self.contract.wait_mined(txn.hash()).await {
            warn!(%err, hash = %txn.hash(), "mint confirmation failed");
            return MintOutcome::Aborted;
        }

        txn.advance(MintPhase::Mined);
        self.sink.append(messages::MINED);
        self.sink
            .append(&messages::transaction_link(&self.config, txn.hash()));
        info!(hash = %txn.hash(), "mint transaction mined");

        MintOutcome::Mined {
            hash: txn.hash().clone(),
        }
    }
}
