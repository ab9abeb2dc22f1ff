use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Address of the mint contract the client is bound to.
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0x476D0131e701B8A273232aD2Ced77Da407B9190c";
/// Chain identifier the provider must report before a mint is submitted.
pub const DEFAULT_REQUIRED_CHAIN_ID: &str = "0x4";
/// Marketplace page listing the whole collection.
pub const DEFAULT_COLLECTION_URL: &str =
    "https://testnets.opensea.io/collection/squarenft-p54gsrgrc2";
/// Base of the per-token marketplace asset URL.
pub const DEFAULT_ASSET_URL_BASE: &str = "https://testnets.opensea.io/assets";
/// Base of the block-explorer transaction URL.
pub const DEFAULT_EXPLORER_TX_URL_BASE: &str = "https://rinkeby.etherscan.io/tx";

/// Build-time constants of the mint client, overridable from a TOML file.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MintConfig {
    pub contract_address: String,
    pub required_chain_id: String,
    pub marketplace_collection_url: String,
    pub marketplace_asset_url_base: String,
    pub explorer_tx_url_base: String,
}

impl Default for MintConfig {
    fn default() -> Self {
        Self {
            contract_address: DEFAULT_CONTRACT_ADDRESS.to_string(),
            required_chain_id: DEFAULT_REQUIRED_CHAIN_ID.to_string(),
            marketplace_collection_url: DEFAULT_COLLECTION_URL.to_string(),
            marketplace_asset_url_base: DEFAULT_ASSET_URL_BASE.to_string(),
            explorer_tx_url_base: DEFAULT_EXPLORER_TX_URL_BASE.to_string(),
        }
    }
}

impl MintConfig {
    /// Load and validate a configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("unable to read mint config {}", path.display()))?;
        let config: Self = parse_strict_config(&content, path)?;
        config
            .validate()
            .map_err(|err| anyhow!("invalid mint config {}: {err}", path.display()))?;
        Ok(config)
    }

    /// Reject configurations that could only fail later, at mint time.
    pub fn validate(&self) -> Result<()> {
        validate_hex_address(&self.contract_address)?;
        if !self.required_chain_id.starts_with("0x") || self.required_chain_id.len() < 3 {
            return Err(anyhow!(
                "required_chain_id must be a 0x-prefixed identifier, got `{}`",
                self.required_chain_id
            ));
        }
        for (key, value) in [
            ("marketplace_collection_url", &self.marketplace_collection_url),
            ("marketplace_asset_url_base", &self.marketplace_asset_url_base),
            ("explorer_tx_url_base", &self.explorer_tx_url_base),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("{key} must not be empty"));
            }
        }
        Ok(())
    }

    /// Marketplace URL of one minted token.
    pub fn marketplace_asset_url(&self, token_id: u64) -> String {
        format!(
            "{}/{}/{token_id}",
            self.marketplace_asset_url_base.trim_end_matches('/'),
            self.contract_address
        )
    }

    /// Block-explorer URL of one transaction hash.
    pub fn explorer_tx_url(&self, hash: &str) -> String {
        format!("{}/{hash}", self.explorer_tx_url_base.trim_end_matches('/'))
    }
}

fn validate_hex_address(address: &str) -> Result<()> {
    let digits = address
        .strip_prefix("0x")
        .ok_or_else(|| anyhow!("contract_address must be 0x-prefixed, got `{address}`"))?;
    if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow!(
            "contract_address must be a 20-byte hex address, got `{address}`"
        ));
    }
    Ok(())
}

pub(crate) fn parse_strict_config<T: DeserializeOwned>(content: &str, path: &Path) -> Result<T> {
    let mut unknown_keys = Vec::new();
    let deserializer = toml::de::Deserializer::new(content);

    let value = serde_ignored::deserialize(deserializer, |path| {
        unknown_keys.push(path.to_string());
    })
    .with_context(|| format!("unable to parse mint config {}", path.display()))?;

    if !unknown_keys.is_empty() {
        return Err(anyhow!(
            "invalid mint config {}: unknown configuration key(s): {}",
            path.display(),
            unknown_keys.join(", ")
        ));
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_parse_from_empty_toml() {
        let config =
            parse_strict_config::<MintConfig>("", Path::new("defaults")).expect("defaults parse");
        assert_eq!(config, MintConfig::default());
        config.validate().expect("defaults validate");
    }

    #[test]
    fn unknown_keys_are_rejected_with_their_path() {
        let toml = "required_chain_id = \"0x1\"\nunknown_toggle = true\n";
        let err = parse_strict_config::<MintConfig>(toml, Path::new("unknown"))
            .expect_err("unknown keys should fail");
        let message = err.to_string();
        assert!(message.contains("unknown configuration key"), "{message}");
        assert!(message.contains("unknown_toggle"), "{message}");
    }

    #[test]
    fn load_accepts_partial_override() {
        let mut temp = NamedTempFile::new().expect("temp file");
        temp.write_all(b"required_chain_id = \"0x1\"\n")
            .expect("write temp");
        let config = MintConfig::load(temp.path()).expect("load");
        assert_eq!(config.required_chain_id, "0x1");
        assert_eq!(config.contract_address, DEFAULT_CONTRACT_ADDRESS);
    }

    #[test]
    fn rejects_malformed_contract_address() {
        let config = MintConfig {
            contract_address: "476D0131".into(),
            ..MintConfig::default()
        };
        let err = config.validate().expect_err("short address must fail");
        assert!(err.to_string().contains("contract_address"), "{err}");
    }

    #[test]
    fn asset_url_contains_contract_and_token() {
        let config = MintConfig::default();
        let url = config.marketplace_asset_url(7);
        assert!(url.contains(DEFAULT_CONTRACT_ADDRESS));
        assert!(url.ends_with("/7"));
    }

    #[test]
    fn explorer_url_appends_hash() {
        let config = MintConfig::default();
        assert_eq!(
            config.explorer_tx_url("0xabc"),
            format!("{DEFAULT_EXPLORER_TX_URL_BASE}/0xabc")
        );
    }
}
