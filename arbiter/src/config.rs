//! Configuration loading for the arbiter.

use serde::Deserialize;
use serde::Deserializer;
use url::Url;

use crate::error::Error;
use crate::keys::PrivateKey;
use crate::keys::PublicKey;
use crate::multisig::Committee;
use crate::transaction::Amount;
use crate::transaction::ExchangeRate;

/// Top-level settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Main-chain node connection.
    pub main_node: MainNodeConfig,
    /// One entry per registered side chain.
    pub side_nodes: Vec<SideNodeConfig>,
    /// The committee for the current epoch.
    pub committee: CommitteeConfig,
    /// Local process settings.
    pub arbiter: ArbiterConfig,
}

/// Main-chain node connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MainNodeConfig {
    /// JSON-RPC endpoint of the main-chain node.
    pub rpc_endpoint: Url,
    /// Per-request timeout in seconds.
    #[serde(default = "MainNodeConfig::default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    /// Confirmation depth required before a deposit is staged.
    #[serde(default = "MainNodeConfig::default_confirmations")]
    pub confirmations: u32,
}

impl MainNodeConfig {
    fn default_rpc_timeout_secs() -> u64 {
        30
    }

    fn default_confirmations() -> u32 {
        6
    }
}

/// Settings for one side chain.
#[derive(Debug, Clone, Deserialize)]
pub struct SideNodeConfig {
    /// The side chain's identity key.
    pub genesis_address: String,
    /// JSON-RPC endpoint of the side-chain node.
    pub rpc_endpoint: Url,
    /// Main-to-side unit conversion rate, as a decimal string.
    #[serde(deserialize_with = "rate_from_str")]
    pub exchange_rate: ExchangeRate,
    /// Fee retained from each recharge, as a decimal string.
    #[serde(deserialize_with = "amount_from_str")]
    pub cross_chain_fee: Amount,
    /// Whether the side chain is merged-mined against the main chain.
    #[serde(default)]
    pub pow_chain: bool,
    /// Mining payout address, required when `pow_chain` is set.
    #[serde(default)]
    pub mining_address: Option<String>,
}

/// The ordered committee key list.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitteeConfig {
    /// Compressed public keys in signer-index order.
    pub public_keys: Vec<String>,
}

/// Local process settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ArbiterConfig {
    /// The local arbiter's private key, hex encoded.
    pub private_key: String,
    /// Milliseconds between janitor reconciliation passes.
    #[serde(default = "ArbiterConfig::default_clear_interval_ms")]
    pub clear_interval_ms: u64,
    /// Milliseconds between side-chain withdraw polls.
    #[serde(default = "ArbiterConfig::default_withdraw_poll_interval_ms")]
    pub withdraw_poll_interval_ms: u64,
    /// Milliseconds between duty re-evaluations.
    #[serde(default = "ArbiterConfig::default_duty_poll_interval_ms")]
    pub duty_poll_interval_ms: u64,
    /// Maximum withdraw records considered per duty tick.
    #[serde(default = "ArbiterConfig::default_max_txs_per_withdraw")]
    pub max_txs_per_withdraw: usize,
}

impl ArbiterConfig {
    fn default_clear_interval_ms() -> u64 {
        60_000
    }

    fn default_withdraw_poll_interval_ms() -> u64 {
        10_000
    }

    fn default_duty_poll_interval_ms() -> u64 {
        5_000
    }

    fn default_max_txs_per_withdraw() -> usize {
        1_000
    }
}

impl Settings {
    /// Load settings from an optional TOML file plus `ARBITER_`-prefixed
    /// environment variables, `__` separating nesting levels.
    pub fn new(config_path: Option<&str>) -> Result<Self, Error> {
        let mut builder = config::Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let settings: Settings = builder
            .add_source(config::Environment::with_prefix("ARBITER").separator("__"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check cross-field constraints the deserializer cannot express.
    pub fn validate(&self) -> Result<(), Error> {
        if self.side_nodes.is_empty() {
            return Err(Error::InvalidConfig("no side chains configured".into()));
        }
        for (i, node) in self.side_nodes.iter().enumerate() {
            if node.exchange_rate.0 <= 0 {
                return Err(Error::InvalidExchangeRate(node.genesis_address.clone()));
            }
            if node.pow_chain && node.mining_address.is_none() {
                return Err(Error::InvalidConfig(format!(
                    "pow side chain {} has no mining address",
                    node.genesis_address
                )));
            }
            if self.side_nodes[..i]
                .iter()
                .any(|other| other.genesis_address == node.genesis_address)
            {
                return Err(Error::InvalidConfig(format!(
                    "duplicate genesis address {}",
                    node.genesis_address
                )));
            }
        }
        self.committee()?;
        self.private_key()?;
        Ok(())
    }

    /// The committee parsed from its configured key list.
    pub fn committee(&self) -> Result<Committee, Error> {
        let keys = self
            .committee
            .public_keys
            .iter()
            .map(|s| s.parse::<PublicKey>())
            .collect::<Result<Vec<_>, _>>()?;
        Committee::new(keys)
    }

    /// The local signing key.
    pub fn private_key(&self) -> Result<PrivateKey, Error> {
        self.arbiter.private_key.parse()
    }

    /// The config entry for a side chain, by genesis address.
    pub fn side_node(&self, genesis_address: &str) -> Option<&SideNodeConfig> {
        self.side_nodes
            .iter()
            .find(|node| node.genesis_address == genesis_address)
    }
}

fn rate_from_str<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ExchangeRate, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

fn amount_from_str<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}
