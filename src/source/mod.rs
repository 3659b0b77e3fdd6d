use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::config::SourceConfig;
use crate::units::Wei;

/// A node address, normalized to a lowercase 0x-prefixed hex string.
///
/// `Ord` so addresses can key ordered maps, which is what makes ranking
/// output reproducible across runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(String);

impl Address {
    /// Normalizes a hex address: lowercase, 0x prefix added if missing.
    pub fn new(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        if lower.starts_with("0x") {
            Self(lower)
        } else {
            Self(format!("0x{lower}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Minipool lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinipoolStatus {
    Initialized,
    Prelaunch,
    Staking,
    Withdrawable,
    Dissolved,
}

impl MinipoolStatus {
    /// Status name as used in metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Prelaunch => "prelaunch",
            Self::Staking => "staking",
            Self::Withdrawable => "withdrawable",
            Self::Dissolved => "dissolved",
        }
    }
}

/// One minipool as reported by the data source.
///
/// Read-only for the duration of a collection cycle; balances and deposits
/// are raw wei.
#[derive(Debug, Clone)]
pub struct MinipoolDetails {
    pub node_address: Address,
    pub validator_pubkey: String,
    pub status: MinipoolStatus,
    pub status_time: DateTime<Utc>,
    pub validator_exists: bool,
    pub validator_active: bool,
    pub validator_balance: Wei,
    pub node_deposit: Wei,
    pub user_deposit: Wei,
}

/// Network-wide aggregate quantities, fetched independently.
///
/// Values are human-scaled: fees are rates, balances are ETH, block and
/// queue length are plain counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    BalancesBlock,
    TotalEth,
    StakingEth,
    TotalRethSupply,
    DepositPoolBalance,
    WithdrawalBalance,
    DepositQueueLength,
    NodeFee,
    MinNodeFee,
    TargetNodeFee,
    MaxNodeFee,
}

impl AggregateKind {
    /// API path segment for this aggregate.
    pub fn as_path(&self) -> &'static str {
        match self {
            Self::BalancesBlock => "balances-block",
            Self::TotalEth => "total-eth",
            Self::StakingEth => "staking-eth",
            Self::TotalRethSupply => "reth-supply",
            Self::DepositPoolBalance => "deposit-pool-balance",
            Self::WithdrawalBalance => "withdrawal-balance",
            Self::DepositQueueLength => "deposit-queue-length",
            Self::NodeFee => "node-fee",
            Self::MinNodeFee => "node-fee-min",
            Self::TargetNodeFee => "node-fee-target",
            Self::MaxNodeFee => "node-fee-max",
        }
    }
}

/// Boolean protocol settings exposed by the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureFlag {
    DepositsEnabled,
    AssignmentsEnabled,
}

impl FeatureFlag {
    /// API path segment for this flag.
    pub fn as_path(&self) -> &'static str {
        match self {
            Self::DepositsEnabled => "deposits-enabled",
            Self::AssignmentsEnabled => "assignments-enabled",
        }
    }
}

/// Callback type for recording source request metrics.
pub type MetricsCallback = Box<dyn Fn(&str, &str, Duration) + Send + Sync>;

/// Staking network data source.
///
/// All calls are synchronous request/response: an error means no partial
/// result, and callers treat the next scheduler tick as the retry.
pub trait StakingSource: Send + Sync {
    /// Fetch details for every minipool in the network.
    fn minipool_details(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<MinipoolDetails>>> + Send;

    /// Fetch all registered node addresses.
    fn node_addresses(&self) -> impl std::future::Future<Output = Result<Vec<Address>>> + Send;

    /// Fetch the total registered node count.
    fn node_count(&self) -> impl std::future::Future<Output = Result<u64>> + Send;

    /// Fetch one network-wide aggregate value.
    fn network_aggregate(
        &self,
        kind: AggregateKind,
    ) -> impl std::future::Future<Output = Result<f64>> + Send;

    /// Fetch one boolean protocol setting.
    fn feature_flag(
        &self,
        flag: FeatureFlag,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;
}

/// HTTP-based staking source client.
pub struct Client {
    http: reqwest::Client,
    endpoint: String,
    metrics: Option<MetricsCallback>,
}

impl Client {
    /// Create a new source client.
    pub fn new(cfg: &SourceConfig) -> Result<Self> {
        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(10)
        } else {
            cfg.timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            metrics: None,
        })
    }

    /// Set a metrics callback for recording request stats.
    /// The callback receives (endpoint_name, status, duration).
    pub fn with_metrics(mut self, cb: MetricsCallback) -> Self {
        self.metrics = Some(cb);
        self
    }

    fn record_request(&self, endpoint: &str, status: &str, duration: Duration) {
        if let Some(ref cb) = self.metrics {
            cb(endpoint, status, duration);
        }
    }

    /// Perform a GET request and deserialize the JSON response.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let start = Instant::now();
        let endpoint = endpoint_from_path(path);
        let url = format!("{}{}", self.endpoint, path);

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("requesting {path}"))?;

        let status_code = response.status();

        if !status_code.is_success() {
            let body = response.text().await.unwrap_or_default();
            self.record_request(endpoint, "error", start.elapsed());
            bail!("unexpected status {} from {}: {}", status_code, path, body);
        }

        let result: T = response
            .json()
            .await
            .with_context(|| format!("decoding response from {path}"))?;

        self.record_request(endpoint, "success", start.elapsed());

        Ok(result)
    }
}

/// Extract a short endpoint name from an API path for metric labels.
fn endpoint_from_path(path: &str) -> &'static str {
    if path.starts_with("/v1/minipools") {
        "minipools"
    } else if path.starts_with("/v1/nodes/count") {
        "node_count"
    } else if path.starts_with("/v1/nodes") {
        "nodes"
    } else if path.starts_with("/v1/network/") {
        "network"
    } else if path.starts_with("/v1/settings/") {
        "settings"
    } else {
        "other"
    }
}

// --- JSON response structures ---

#[derive(Deserialize)]
struct MinipoolsApiResponse {
    data: Vec<MinipoolApiEntry>,
}

#[derive(Deserialize)]
struct MinipoolApiEntry {
    node_address: String,
    validator_pubkey: String,
    status: MinipoolStatus,
    status_time: String,
    validator_exists: bool,
    validator_active: bool,
    validator_balance: String,
    node_deposit_balance: String,
    user_deposit_balance: String,
}

#[derive(Deserialize)]
struct NodesApiResponse {
    data: NodesData,
}

#[derive(Deserialize)]
struct NodesData {
    addresses: Vec<String>,
}

#[derive(Deserialize)]
struct NodeCountApiResponse {
    data: NodeCountData,
}

#[derive(Deserialize)]
struct NodeCountData {
    count: u64,
}

#[derive(Deserialize)]
struct AggregateApiResponse {
    data: AggregateData,
}

#[derive(Deserialize)]
struct AggregateData {
    value: f64,
}

#[derive(Deserialize)]
struct FlagApiResponse {
    data: FlagData,
}

#[derive(Deserialize)]
struct FlagData {
    enabled: bool,
}

/// Parse a string-encoded wei amount.
fn parse_wei(s: &str, field: &str) -> Result<Wei> {
    s.parse::<Wei>()
        .with_context(|| format!("parsing {field} value {s:?}"))
}

/// Parse a string-encoded unix timestamp in seconds.
fn parse_unix_time(s: &str) -> Result<DateTime<Utc>> {
    let secs: i64 = s
        .parse()
        .with_context(|| format!("parsing status_time {s:?}"))?;

    DateTime::<Utc>::from_timestamp(secs, 0)
        .with_context(|| format!("status_time {secs} out of range"))
}

impl MinipoolApiEntry {
    fn into_details(self) -> Result<MinipoolDetails> {
        Ok(MinipoolDetails {
            node_address: Address::new(&self.node_address),
            validator_pubkey: self.validator_pubkey,
            status: self.status,
            status_time: parse_unix_time(&self.status_time)?,
            validator_exists: self.validator_exists,
            validator_active: self.validator_active,
            validator_balance: parse_wei(&self.validator_balance, "validator_balance")?,
            node_deposit: parse_wei(&self.node_deposit_balance, "node_deposit_balance")?,
            user_deposit: parse_wei(&self.user_deposit_balance, "user_deposit_balance")?,
        })
    }
}

impl StakingSource for Client {
    async fn minipool_details(&self) -> Result<Vec<MinipoolDetails>> {
        debug!("fetching minipool details");

        let resp: MinipoolsApiResponse = self
            .get_json("/v1/minipools")
            .await
            .context("fetching minipools")?;

        resp.data
            .into_iter()
            .map(MinipoolApiEntry::into_details)
            .collect()
    }

    async fn node_addresses(&self) -> Result<Vec<Address>> {
        debug!("fetching node addresses");

        let resp: NodesApiResponse = self
            .get_json("/v1/nodes")
            .await
            .context("fetching node addresses")?;

        Ok(resp
            .data
            .addresses
            .iter()
            .map(|a| Address::new(a))
            .collect())
    }

    async fn node_count(&self) -> Result<u64> {
        debug!("fetching node count");

        let resp: NodeCountApiResponse = self
            .get_json("/v1/nodes/count")
            .await
            .context("fetching node count")?;

        Ok(resp.data.count)
    }

    async fn network_aggregate(&self, kind: AggregateKind) -> Result<f64> {
        debug!(kind = kind.as_path(), "fetching network aggregate");

        let path = format!("/v1/network/{}", kind.as_path());
        let resp: AggregateApiResponse = self
            .get_json(&path)
            .await
            .with_context(|| format!("fetching network aggregate {}", kind.as_path()))?;

        Ok(resp.data.value)
    }

    async fn feature_flag(&self, flag: FeatureFlag) -> Result<bool> {
        debug!(flag = flag.as_path(), "fetching feature flag");

        let path = format!("/v1/settings/{}", flag.as_path());
        let resp: FlagApiResponse = self
            .get_json(&path)
            .await
            .with_context(|| format!("fetching feature flag {}", flag.as_path()))?;

        Ok(resp.data.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_normalization() {
        assert_eq!(Address::new("0xABCD").as_str(), "0xabcd");
        assert_eq!(Address::new("abcd").as_str(), "0xabcd");
        assert_eq!(Address::new("0xabcd"), Address::new("ABCD"));
    }

    #[test]
    fn test_address_ordering() {
        let a = Address::new("0x01");
        let b = Address::new("0x02");
        assert!(a < b);
    }

    #[test]
    fn test_endpoint_from_path() {
        assert_eq!(endpoint_from_path("/v1/minipools"), "minipools");
        assert_eq!(endpoint_from_path("/v1/nodes"), "nodes");
        assert_eq!(endpoint_from_path("/v1/nodes/count"), "node_count");
        assert_eq!(endpoint_from_path("/v1/network/total-eth"), "network");
        assert_eq!(
            endpoint_from_path("/v1/settings/deposits-enabled"),
            "settings"
        );
        assert_eq!(endpoint_from_path("/some/other/path"), "other");
    }

    #[test]
    fn test_parse_wei_valid() {
        let wei = parse_wei("32000000000000000000", "balance").expect("should parse");
        assert_eq!(wei, 32_000_000_000_000_000_000);
    }

    #[test]
    fn test_parse_wei_invalid() {
        let result = parse_wei("not_a_number", "balance");
        assert!(result.is_err());
        assert!(result
            .expect_err("should fail")
            .to_string()
            .contains("balance"));
    }

    #[test]
    fn test_parse_unix_time() {
        let t = parse_unix_time("1700000000").expect("should parse");
        assert_eq!(t.timestamp(), 1_700_000_000);

        assert!(parse_unix_time("nope").is_err());
    }

    #[test]
    fn test_minipools_response_deserialization() {
        let body = r#"{
            "data": [{
                "node_address": "0xAB12",
                "validator_pubkey": "0xbeef",
                "status": "staking",
                "status_time": "1700000000",
                "validator_exists": true,
                "validator_active": true,
                "validator_balance": "33100000000000000000",
                "node_deposit_balance": "16000000000000000000",
                "user_deposit_balance": "16000000000000000000"
            }]
        }"#;

        let resp: MinipoolsApiResponse = serde_json::from_str(body).expect("should deserialize");
        assert_eq!(resp.data.len(), 1);

        let entry = resp.data.into_iter().next().expect("one entry");
        let details = entry.into_details().expect("should convert");
        assert_eq!(details.node_address.as_str(), "0xab12");
        assert_eq!(details.status, MinipoolStatus::Staking);
        assert_eq!(details.status_time.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_minipool_entry_conversion() {
        let entry = MinipoolApiEntry {
            node_address: "0xAA01".to_string(),
            validator_pubkey: "0xbeef".to_string(),
            status: MinipoolStatus::Staking,
            status_time: "1700000000".to_string(),
            validator_exists: true,
            validator_active: true,
            validator_balance: "33100000000000000000".to_string(),
            node_deposit_balance: "16000000000000000000".to_string(),
            user_deposit_balance: "16000000000000000000".to_string(),
        };

        let details = entry.into_details().expect("should convert");
        assert_eq!(details.node_address.as_str(), "0xaa01");
        assert_eq!(details.validator_balance, 33_100_000_000_000_000_000);
        assert_eq!(details.status, MinipoolStatus::Staking);
    }
}
