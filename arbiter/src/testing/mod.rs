//! Module with testing utility functions.

#![allow(clippy::unwrap_in_result, clippy::unwrap_used, clippy::expect_used)]

pub mod dummy;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use url::Url;

use crate::config::ArbiterConfig;
use crate::config::CommitteeConfig;
use crate::config::MainNodeConfig;
use crate::config::Settings;
use crate::config::SideNodeConfig;
use crate::context::ArbiterContext;
use crate::deposit_observer::SpvView;
use crate::error::Error;
use crate::keys::PrivateKey;
use crate::keys::PublicKey;
use crate::multisig::Committee;
use crate::rpc::BlockInfo;
use crate::rpc::MainChainRpc;
use crate::rpc::SideChainRpc;
use crate::storage::memory::SharedStore;
use crate::storage::memory::Store;
use crate::transaction::Amount;
use crate::transaction::ExchangeRate;
use crate::transaction::Hash256;
use crate::transaction::Utxo;
use crate::transaction::WithdrawRecord;

/// Build settings for a synthetic committee of `n` members, keyed from
/// the given seed. Returns the settings and the member secrets in
/// signer-index order. The single registered side chain uses genesis
/// address `gY`.
pub fn settings_with_committee(n: usize, seed: u64) -> (Settings, Vec<PrivateKey>) {
    let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(seed);
    let secrets: Vec<PrivateKey> = (0..n).map(|_| PrivateKey::new(&mut rng)).collect();

    let settings = Settings {
        main_node: MainNodeConfig {
            rpc_endpoint: Url::parse("http://localhost:20336").unwrap(),
            rpc_timeout_secs: 5,
            confirmations: 6,
        },
        side_nodes: vec![SideNodeConfig {
            genesis_address: "gY".into(),
            rpc_endpoint: Url::parse("http://localhost:20606").unwrap(),
            exchange_rate: ExchangeRate::ONE,
            cross_chain_fee: Amount(10_000),
            pow_chain: false,
            mining_address: None,
        }],
        committee: CommitteeConfig {
            public_keys: secrets
                .iter()
                .map(|secret| secret.public_key().to_string())
                .collect(),
        },
        arbiter: ArbiterConfig {
            private_key: hex::encode(secrets[0].secret_bytes()),
            clear_interval_ms: 50,
            withdraw_poll_interval_ms: 50,
            duty_poll_interval_ms: 50,
            max_txs_per_withdraw: 1_000,
        },
    };
    (settings, secrets)
}

/// A synthetic committee with per-member contexts over in-memory
/// stores.
pub struct TestHarness {
    /// The shared settings template.
    pub settings: Settings,
    /// Member secrets in signer-index order.
    pub secrets: Vec<PrivateKey>,
    /// The committee derived from the settings.
    pub committee: Committee,
}

impl TestHarness {
    /// Create a harness for an `n`-member committee.
    pub fn new(n: usize, seed: u64) -> Self {
        let (settings, secrets) = settings_with_committee(n, seed);
        let committee = settings.committee().unwrap();
        Self { settings, secrets, committee }
    }

    /// A fresh context for committee member `index`, with its own
    /// in-memory store.
    pub fn context(&self, index: usize) -> ArbiterContext<SharedStore> {
        let mut settings = self.settings.clone();
        settings.arbiter.private_key = hex::encode(self.secrets[index].secret_bytes());
        ArbiterContext::init(settings, Store::new_shared())
    }

    /// The signing key of member `index`.
    pub fn private_key(&self, index: usize) -> PrivateKey {
        self.secrets[index]
    }

    /// The public key of member `index`.
    pub fn public_key(&self, index: usize) -> PublicKey {
        self.secrets[index].public_key()
    }
}

/// A controllable SPV header cache.
#[derive(Debug, Clone, Default)]
pub struct TestSpv(Arc<Mutex<TestSpvState>>);

#[derive(Debug, Default)]
struct TestSpvState {
    best_height: u32,
    roots: HashMap<u32, Hash256>,
}

impl TestSpv {
    /// Set the best cached height.
    pub fn set_best_height(&self, height: u32) {
        self.0.lock().unwrap().best_height = height;
    }

    /// Cache a merkle root for a height.
    pub fn add_root(&self, height: u32, root: Hash256) {
        self.0.lock().unwrap().roots.insert(height, root);
    }
}

impl SpvView for TestSpv {
    fn best_height(&self) -> u32 {
        self.0.lock().unwrap().best_height
    }

    fn merkle_root_at(&self, height: u32) -> Option<Hash256> {
        self.0.lock().unwrap().roots.get(&height).copied()
    }
}

fn mock_failure() -> Error {
    Error::Rpc { code: -32000, message: "mock rpc failure".into() }
}

/// A scriptable main-chain node.
#[derive(Debug, Clone, Default)]
pub struct MockMainChain(Arc<Mutex<MainState>>);

#[derive(Debug, Default)]
struct MainState {
    height: u32,
    utxos: Vec<Utxo>,
    existing_withdrawals: Vec<Hash256>,
    submitted: Vec<Vec<u8>>,
    submit_error: Option<i64>,
    fail_all: bool,
}

impl MockMainChain {
    /// Set the reported chain height.
    pub fn set_height(&self, height: u32) {
        self.0.lock().unwrap().height = height;
    }

    /// Set the bank UTXO set.
    pub fn set_utxos(&self, utxos: Vec<Utxo>) {
        self.0.lock().unwrap().utxos = utxos;
    }

    /// Mark withdraw hashes as already settled on-chain.
    pub fn set_existing_withdrawals(&self, hashes: Vec<Hash256>) {
        self.0.lock().unwrap().existing_withdrawals = hashes;
    }

    /// Make `sendrawtransaction` answer with the given error code.
    pub fn set_submit_error(&self, code: Option<i64>) {
        self.0.lock().unwrap().submit_error = code;
    }

    /// Make every call fail at the transport level.
    pub fn fail_next_calls(&self) {
        self.0.lock().unwrap().fail_all = true;
    }

    /// The raw transactions submitted so far.
    pub fn submitted(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().submitted.clone()
    }
}

impl MainChainRpc for MockMainChain {
    async fn get_current_height(&self) -> Result<u32, Error> {
        let state = self.0.lock().unwrap();
        if state.fail_all {
            return Err(mock_failure());
        }
        Ok(state.height)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<Hash256, Error> {
        let mut state = self.0.lock().unwrap();
        if state.fail_all {
            return Err(mock_failure());
        }
        if let Some(code) = state.submit_error {
            return Err(Error::Rpc { code, message: "scripted error".into() });
        }
        state.submitted.push(raw.to_vec());
        Ok(Hash256::digest(raw))
    }

    async fn get_unspent_outputs(&self, _address: &str) -> Result<Vec<Utxo>, Error> {
        let state = self.0.lock().unwrap();
        if state.fail_all {
            return Err(mock_failure());
        }
        Ok(state.utxos.clone())
    }

    async fn get_exist_withdraw_transactions(
        &self,
        hashes: &[Hash256],
    ) -> Result<Vec<Hash256>, Error> {
        let state = self.0.lock().unwrap();
        if state.fail_all {
            return Err(mock_failure());
        }
        Ok(hashes
            .iter()
            .filter(|hash| state.existing_withdrawals.contains(hash))
            .copied()
            .collect())
    }
}

/// A scriptable side-chain node.
#[derive(Debug, Clone, Default)]
pub struct MockSideChain(Arc<Mutex<SideState>>);

#[derive(Debug, Default)]
struct SideState {
    height: u32,
    blocks: HashMap<u32, Vec<WithdrawRecord>>,
    existing_deposits: Vec<Hash256>,
    recharges: Vec<Hash256>,
    recharge_error: Option<i64>,
    submitted_evidence: Vec<Vec<u8>>,
    fail_all: bool,
}

impl MockSideChain {
    /// Set the reported chain height.
    pub fn set_height(&self, height: u32) {
        self.0.lock().unwrap().height = height;
    }

    /// Place withdraw records in the block at `height`.
    pub fn push_block_withdrawals(&self, height: u32, records: Vec<WithdrawRecord>) {
        self.0.lock().unwrap().blocks.insert(height, records);
    }

    /// Mark deposit hashes as already processed by the side chain.
    pub fn set_existing_deposits(&self, hashes: Vec<Hash256>) {
        self.0.lock().unwrap().existing_deposits = hashes;
    }

    /// Make `sendrechargetransaction` answer with the given error code.
    pub fn set_recharge_error(&self, code: Option<i64>) {
        self.0.lock().unwrap().recharge_error = code;
    }

    /// Make every call fail at the transport level.
    pub fn fail_next_calls(&self) {
        self.0.lock().unwrap().fail_all = true;
    }

    /// The recharge requests received so far.
    pub fn recharges(&self) -> Vec<Hash256> {
        self.0.lock().unwrap().recharges.clone()
    }

    /// The illegal-evidence blobs received so far.
    pub fn submitted_evidence(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().submitted_evidence.clone()
    }
}

impl SideChainRpc for MockSideChain {
    async fn get_current_height(&self) -> Result<u32, Error> {
        let state = self.0.lock().unwrap();
        if state.fail_all {
            return Err(mock_failure());
        }
        Ok(state.height)
    }

    async fn get_block_by_height(&self, height: u32) -> Result<BlockInfo, Error> {
        let state = self.0.lock().unwrap();
        if state.fail_all {
            return Err(mock_failure());
        }
        Ok(BlockInfo {
            hash: Hash256::digest(&height.to_be_bytes()),
            height,
            withdraw_txs: state.blocks.get(&height).cloned().unwrap_or_default(),
        })
    }

    async fn send_recharge_transaction(&self, main_tx_hash: &Hash256) -> Result<(), Error> {
        let mut state = self.0.lock().unwrap();
        if state.fail_all {
            return Err(mock_failure());
        }
        if let Some(code) = state.recharge_error {
            return Err(Error::Rpc { code, message: "scripted error".into() });
        }
        state.recharges.push(*main_tx_hash);
        Ok(())
    }

    async fn get_exist_deposit_transactions(
        &self,
        hashes: &[Hash256],
    ) -> Result<Vec<Hash256>, Error> {
        let state = self.0.lock().unwrap();
        if state.fail_all {
            return Err(mock_failure());
        }
        Ok(hashes
            .iter()
            .filter(|hash| state.existing_deposits.contains(hash))
            .copied()
            .collect())
    }

    async fn get_withdraw_transaction(
        &self,
        side_tx_hash: &Hash256,
    ) -> Result<Option<WithdrawRecord>, Error> {
        let state = self.0.lock().unwrap();
        if state.fail_all {
            return Err(mock_failure());
        }
        Ok(state
            .blocks
            .values()
            .flatten()
            .find(|record| &record.txid == side_tx_hash)
            .cloned())
    }

    async fn submit_illegal_data(&self, raw: &[u8]) -> Result<(), Error> {
        let mut state = self.0.lock().unwrap();
        if state.fail_all {
            return Err(mock_failure());
        }
        state.submitted_evidence.push(raw.to_vec());
        Ok(())
    }
}
