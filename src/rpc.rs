//! JSON-RPC implementations of the wallet-provider and mint-contract
//! capabilities.
//!
//! These speak the conventional Ethereum HTTP RPC surface: accounts and
//! chain id through `eth_accounts` / `eth_requestAccounts` / `eth_chainId`,
//! submission through `eth_sendTransaction`, confirmation through a receipt
//! poll loop, and the mint-completed subscription through an `eth_getLogs`
//! poll filtered on the contract address and event topic.
//!
//! Calls that may block on a wallet prompt (consent, signing) carry no
//! request timeout; non-interactive queries are bounded by the client's
//! query timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Error as AnyError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha3::{Digest, Keccak256};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::MintConfig;
use crate::contract::{ContractError, MintContract, MintedEvent, PendingMint, TxHash};
use crate::provider::{Address, ChainId, ProviderError, WalletProvider};

pub const JSONRPC_VERSION: &str = "2.0";

/// EIP-1193: the user rejected the request.
const USER_REJECTED_CODE: i64 = 4001;
/// Revert data returned from an execution error.
const EXECUTION_REVERTED_CODE: i64 = 3;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Bound on non-interactive queries only; a prompting call waits as long as
/// the user does.
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Signature of the mint function the client submits.
const MINT_FUNCTION_SIGNATURE: &str = "mint()";
/// Signature of the mint-completed event the client subscribes to.
const MINTED_EVENT_SIGNATURE: &str = "Minted(address,uint256)";

#[derive(Clone, Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    params: Value,
}

#[derive(Clone, Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum RpcClientError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("http status {0}")]
    HttpStatus(StatusCode),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("unexpected payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Minimal typed JSON-RPC client over HTTP.
#[derive(Clone)]
pub struct RpcClient {
    inner: Client,
    url: Url,
    query_timeout: Duration,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    pub fn from_endpoint(endpoint: &str) -> Result<Self, RpcClientError> {
        let url = Url::parse(endpoint)
            .map_err(|err| RpcClientError::InvalidEndpoint(format!("{endpoint}: {err}")))?;
        Self::from_url(url, DEFAULT_QUERY_TIMEOUT)
    }

    pub fn from_url(url: Url, query_timeout: Duration) -> Result<Self, RpcClientError> {
        let inner = Client::builder().build()?;
        Ok(Self {
            inner,
            url,
            query_timeout,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    async fn send(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, RpcClientError> {
        let payload = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            method: method.to_owned(),
            params,
        };

        let mut request = self.inner.post(self.url.clone()).json(&payload);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RpcClientError::HttpStatus(response.status()));
        }

        let response: JsonRpcResponse = response.json().await?;
        if let Some(error) = response.error {
            return Err(RpcClientError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        // `"result": null` is a valid answer, e.g. a pending receipt.
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Issue a call that may block on a wallet prompt. No request timeout:
    /// only the user's answer resolves it.
    pub async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<R, RpcClientError> {
        let value = self.send(method, params, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Issue a non-interactive query bounded by the query timeout.
    pub async fn query<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<R, RpcClientError> {
        let value = self.send(method, params, Some(self.query_timeout)).await?;
        Ok(serde_json::from_value(value)?)
    }
}

fn provider_error(err: RpcClientError) -> ProviderError {
    match err {
        RpcClientError::Rpc {
            code: USER_REJECTED_CODE,
            ..
        } => ProviderError::Rejected,
        RpcClientError::Payload(err) => ProviderError::malformed(err.to_string()),
        other => ProviderError::Transport(AnyError::new(other)),
    }
}

fn contract_error(err: RpcClientError) -> ContractError {
    match err {
        RpcClientError::Rpc {
            code: USER_REJECTED_CODE,
            ..
        } => ContractError::Rejected,
        RpcClientError::Rpc { code, message }
            if code == EXECUTION_REVERTED_CODE
                || message.to_ascii_lowercase().contains("revert") =>
        {
            ContractError::reverted(message)
        }
        other => ContractError::Transport(AnyError::new(other)),
    }
}

/// First four bytes of the Keccak-256 digest of a function signature.
pub fn function_selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&digest[..4]);
    selector
}

/// 0x-prefixed Keccak-256 digest of an event signature (topic zero).
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(Keccak256::digest(signature.as_bytes())))
}

fn into_addresses(accounts: Vec<String>) -> Vec<Address> {
    accounts.into_iter().map(Address::new).collect()
}

/// Wallet provider backed by an HTTP JSON-RPC endpoint.
///
/// Chain-change notifications are synthesised by polling `eth_chainId` and
/// emitting on transitions, since plain HTTP transports have no push channel.
pub struct RpcWalletProvider {
    client: RpcClient,
    poll_interval: Duration,
}

impl RpcWalletProvider {
    pub fn new(client: RpcClient) -> Self {
        Self {
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait]
impl WalletProvider for RpcWalletProvider {
    async fn authorized_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        let accounts: Vec<String> = self
            .client
            .query("eth_accounts", json!([]))
            .await
            .map_err(provider_error)?;
        Ok(into_addresses(accounts))
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        let accounts: Vec<String> = self
            .client
            .call("eth_requestAccounts", json!([]))
            .await
            .map_err(provider_error)?;
        Ok(into_addresses(accounts))
    }

    async fn chain_id(&self) -> Result<ChainId, ProviderError> {
        let id: String = self
            .client
            .query("eth_chainId", json!([]))
            .await
            .map_err(provider_error)?;
        Ok(ChainId::new(id))
    }

    fn subscribe_chain_changed(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<ChainId>, ProviderError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let poll_interval = self.poll_interval;
        tokio::spawn(async move {
            let mut last: Option<String> = None;
            loop {
                if tx.is_closed() {
                    break;
                }
                match client.query::<String>("eth_chainId", json!([])).await {
                    Ok(id) => {
                        let changed = last.as_deref() != Some(id.as_str());
                        if changed && last.is_some() && tx.send(ChainId::new(id.clone())).is_err()
                        {
                            break;
                        }
                        last = Some(id);
                    }
                    Err(err) => debug!(%err, "chain id poll failed"),
                }
                sleep(poll_interval).await;
            }
        });
        Ok(rx)
    }
}

/// Mint contract bound to one fixed address over an HTTP JSON-RPC endpoint.
pub struct RpcMintContract {
    client: RpcClient,
    contract_address: String,
    calldata: String,
    minted_topic: String,
    poll_interval: Duration,
}

impl RpcMintContract {
    pub fn new(client: RpcClient, config: &MintConfig) -> Self {
        Self {
            client,
            contract_address: config.contract_address.clone(),
            calldata: format!(
                "0x{}",
                hex::encode(function_selector(MINT_FUNCTION_SIGNATURE))
            ),
            minted_topic: event_topic(MINTED_EVENT_SIGNATURE),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait]
impl MintContract for RpcMintContract {
    async fn mint(&self, from: &Address) -> Result<PendingMint, ContractError> {
        let params = json!([{
            "from": from.as_str(),
            "to": self.contract_address,
            "data": self.calldata,
        }]);
        let hash: String = self
            .client
            .call("eth_sendTransaction", params)
            .await
            .map_err(contract_error)?;
        Ok(PendingMint {
            hash: TxHash::new(hash),
        })
    }

    async fn wait_mined(&self, hash: &TxHash) -> Result<(), ContractError> {
        // Confirmation waits indefinitely: transient poll failures are
        // logged and retried, and only an on-chain revert resolves the wait
        // with an error.
        loop {
            match self
                .client
                .query::<Option<Value>>("eth_getTransactionReceipt", json!([hash.as_str()]))
                .await
            {
                Ok(Some(receipt)) => {
                    if receipt.get("status").and_then(Value::as_str) == Some("0x0") {
                        return Err(ContractError::reverted("transaction reverted on-chain"));
                    }
                    return Ok(());
                }
                Ok(None) => {}
                Err(err) => debug!(%err, %hash, "receipt poll failed"),
            }
            sleep(self.poll_interval).await;
        }
    }

    fn subscribe_minted(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<MintedEvent>, ContractError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let address = self.contract_address.clone();
        let topic = self.minted_topic.clone();
        let poll_interval = self.poll_interval;
        tokio::spawn(async move {
            let mut cursor: Option<u64> = None;
            loop {
                if tx.is_closed() {
                    break;
                }
                if cursor.is_none() {
                    match client.query::<String>("eth_blockNumber", json!([])).await {
                        Ok(number) => cursor = parse_hex_u64(&number),
                        Err(err) => debug!(%err, "block number poll failed"),
                    }
                }
                if let Some(from_block) = cursor {
                    let params = json!([{
                        "fromBlock": format!("0x{from_block:x}"),
                        "toBlock": "latest",
                        "address": address,
                        "topics": [topic],
                    }]);
                    match client.query::<Vec<Value>>("eth_getLogs", params).await {
                        Ok(logs) => {
                            for log in &logs {
                                let block = log
                                    .get("blockNumber")
                                    .and_then(Value::as_str)
                                    .and_then(parse_hex_u64);
                                if let Some(event) = decode_minted_log(log) {
                                    if tx.send(event).is_err() {
                                        return;
                                    }
                                } else {
                                    warn!("undecodable mint event log");
                                }
                                if let Some(block) = block {
                                    cursor = Some(block + 1);
                                }
                            }
                        }
                        Err(err) => debug!(%err, "mint event poll failed"),
                    }
                }
                sleep(poll_interval).await;
            }
        });
        Ok(rx)
    }
}

fn parse_hex_u64(value: &str) -> Option<u64> {
    let digits = value.strip_prefix("0x")?;
    u64::from_str_radix(digits, 16).ok()
}

/// Decode a minted-event log: indexed `from` in topic 1, indexed token id in
/// topic 2.
fn decode_minted_log(log: &Value) -> Option<MintedEvent> {
    let topics = log.get("topics")?.as_array()?;
    if topics.len() < 3 {
        return None;
    }
    let from_topic = topics[1].as_str()?.strip_prefix("0x")?;
    let token_topic = topics[2].as_str()?.strip_prefix("0x")?;
    if from_topic.len() != 64 || token_topic.len() != 64 {
        return None;
    }
    // A token id wider than 64 bits is refused rather than truncated.
    if !token_topic[..48].bytes().all(|b| b == b'0') {
        return None;
    }
    let from = Address::new(format!("0x{}", &from_topic[24..]));
    let token_id = u64::from_str_radix(&token_topic[48..], 16).ok()?;
    Some(MintedEvent { from, token_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn ok_json(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn server_error() -> String {
        "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
            .to_string()
    }

    /// One-shot HTTP fixture: answers each connection with the next canned
    /// response, optionally after a delay.
    async fn serve(responses: Vec<(Duration, String)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            for (delay, response) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                sleep(delay).await;
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{addr}")
    }

    #[test]
    fn selector_matches_known_vectors() {
        assert_eq!(hex::encode(function_selector("mint()")), "1249c58b");
        assert_eq!(
            hex::encode(function_selector("transfer(address,uint256)")),
            "a9059cbb"
        );
    }

    #[test]
    fn topic_matches_known_vector() {
        assert_eq!(
            event_topic("Transfer(address,address,uint256)"),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn calldata_is_the_bare_selector() {
        let client = RpcClient::from_endpoint("http://127.0.0.1:8545").expect("client");
        let contract = RpcMintContract::new(client, &MintConfig::default());
        assert_eq!(contract.calldata.len(), 10);
        assert!(contract.calldata.starts_with("0x"));
    }

    #[test]
    fn decodes_minted_log_topics() {
        let log = json!({
            "blockNumber": "0x10",
            "topics": [
                "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef",
                "0x000000000000000000000000a1b2c3d4e5f60718293a4b5c6d7e8f9012345678",
                "0x0000000000000000000000000000000000000000000000000000000000000007",
            ],
        });
        let event = decode_minted_log(&log).expect("decodable log");
        assert_eq!(
            event.from,
            Address::new("0xa1b2c3d4e5f60718293a4b5c6d7e8f9012345678")
        );
        assert_eq!(event.token_id, 7);
    }

    #[test]
    fn rejects_short_topic_lists() {
        let log = json!({ "topics": ["0xddf2"] });
        assert!(decode_minted_log(&log).is_none());
    }

    #[test]
    fn rejects_token_ids_wider_than_64_bits() {
        let log = json!({
            "blockNumber": "0x10",
            "topics": [
                "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef",
                "0x000000000000000000000000a1b2c3d4e5f60718293a4b5c6d7e8f9012345678",
                "0x0000000000000000000000000000000000000000000000010000000000000007",
            ],
        });
        assert!(decode_minted_log(&log).is_none());
    }

    #[test]
    fn user_rejection_code_maps_to_rejected() {
        let err = provider_error(RpcClientError::Rpc {
            code: USER_REJECTED_CODE,
            message: "user denied".into(),
        });
        assert!(matches!(err, ProviderError::Rejected));

        let err = contract_error(RpcClientError::Rpc {
            code: USER_REJECTED_CODE,
            message: "user denied".into(),
        });
        assert!(matches!(err, ContractError::Rejected));
    }

    #[test]
    fn revert_messages_map_to_reverted() {
        let err = contract_error(RpcClientError::Rpc {
            code: -32000,
            message: "execution reverted: sold out".into(),
        });
        assert!(matches!(err, ContractError::Reverted { .. }));
    }

    #[test]
    fn other_rpc_failures_are_transport() {
        let err = provider_error(RpcClientError::HttpStatus(StatusCode::BAD_GATEWAY));
        assert!(matches!(err, ProviderError::Transport(_)));
    }

    #[test]
    fn parses_hex_quantities() {
        assert_eq!(parse_hex_u64("0x10"), Some(16));
        assert_eq!(parse_hex_u64("10"), None);
    }

    #[tokio::test]
    async fn confirmation_survives_transient_poll_failures() {
        let endpoint = serve(vec![
            (Duration::ZERO, server_error()),
            (
                Duration::ZERO,
                ok_json(r#"{"jsonrpc":"2.0","id":1,"result":null}"#),
            ),
            (
                Duration::ZERO,
                ok_json(r#"{"jsonrpc":"2.0","id":2,"result":{"status":"0x1"}}"#),
            ),
        ])
        .await;
        let client = RpcClient::from_endpoint(&endpoint).expect("client");
        let contract = RpcMintContract::new(client, &MintConfig::default())
            .with_poll_interval(Duration::from_millis(10));
        contract
            .wait_mined(&TxHash::new("0xabc"))
            .await
            .expect("confirmation outlives transient poll failures");
    }

    #[tokio::test]
    async fn reverted_receipt_resolves_the_wait() {
        let endpoint = serve(vec![(
            Duration::ZERO,
            ok_json(r#"{"jsonrpc":"2.0","id":1,"result":{"status":"0x0"}}"#),
        )])
        .await;
        let client = RpcClient::from_endpoint(&endpoint).expect("client");
        let contract = RpcMintContract::new(client, &MintConfig::default())
            .with_poll_interval(Duration::from_millis(10));
        let err = contract
            .wait_mined(&TxHash::new("0xabc"))
            .await
            .expect_err("revert resolves the wait");
        assert!(matches!(err, ContractError::Reverted { .. }));
    }

    #[tokio::test]
    async fn prompting_calls_outlast_the_query_timeout() {
        let endpoint = serve(vec![(
            Duration::from_millis(200),
            ok_json(r#"{"jsonrpc":"2.0","id":1,"result":["0xabc"]}"#),
        )])
        .await;
        let url = Url::parse(&endpoint).expect("url");
        let client = RpcClient::from_url(url, Duration::from_millis(50)).expect("client");
        let provider = RpcWalletProvider::new(client);
        let accounts = provider
            .request_accounts()
            .await
            .expect("slow consent still resolves");
        assert_eq!(accounts, vec![Address::new("0xabc")]);
    }

    #[tokio::test]
    async fn queries_are_bounded_by_the_query_timeout() {
        let endpoint = serve(vec![(
            Duration::from_millis(500),
            ok_json(r#"{"jsonrpc":"2.0","id":1,"result":[]}"#),
        )])
        .await;
        let url = Url::parse(&endpoint).expect("url");
        let client = RpcClient::from_url(url, Duration::from_millis(50)).expect("client");
        let provider = RpcWalletProvider::new(client);
        let err = provider
            .authorized_accounts()
            .await
            .expect_err("slow query must time out");
        assert!(matches!(err, ProviderError::Transport(_)));
    }
}
