//! Construction of every user-visible string.
//!
//! Orchestration code never formats feed entries or notices inline; keeping
//! the text in one place keeps the controllers testable against exact
//! sequences.

use crate::config::MintConfig;
use crate::contract::TxHash;

/// Feed entry appended right after a mint transaction is submitted.
pub const MINING: &str = "⛏ Mining...";

/// Feed entry appended once the transaction is confirmed.
pub const MINED: &str = "Mined.";

/// Feed entry linking the confirmed transaction on the block explorer.
pub fn transaction_link(config: &MintConfig, hash: &TxHash) -> String {
    format!("View transaction: {}", config.explorer_tx_url(hash.as_str()))
}

/// Feed entry for a mint-completed contract event, local or remote.
pub fn minted_event(config: &MintConfig, token_id: u64) -> String {
    format!(
        "New NFT minted: {}",
        config.marketplace_asset_url(token_id)
    )
}

/// Link to the marketplace page for the whole collection.
pub fn collection_link(config: &MintConfig) -> String {
    format!("View collection: {}", config.marketplace_collection_url)
}

pub fn install_wallet_notice() -> &'static str {
    "No wallet provider found. Install one to continue."
}

pub fn wrong_network_notice(config: &MintConfig) -> String {
    format!(
        "Wrong network: switch to chain {} before minting.",
        config.required_chain_id
    )
}

pub fn connect_failed_notice() -> &'static str {
    "Wallet connection failed."
}

pub fn malformed_accounts_notice() -> &'static str {
    "Wallet returned an invalid account list."
}
