//! Chain RPC interfaces.
//!
//! The arbiter consumes a narrow slice of each chain's JSON-RPC surface.
//! Both traits carry the application-level error codes through
//! [`Error::Rpc`]; transport failures surface as [`Error::RpcTransport`]
//! and are always treated as transient.

pub mod client;

use std::future::Future;

use serde::Deserialize;

use crate::error::Error;
use crate::transaction::Hash256;
use crate::transaction::Utxo;
use crate::transaction::WithdrawRecord;

/// The side chain already processed this main-chain transaction.
/// Treated as success.
pub const ERR_MAINCHAIN_TX_DUPLICATE: i64 = 45013;

/// The side chain rejected this main-chain transaction. Terminal.
pub const ERR_INVALID_MAINCHAIN_TX: i64 = 45022;

/// Whether the error is the duplicate-submission code, which callers
/// treat as success.
pub fn is_duplicate_tx_error(error: &Error) -> bool {
    matches!(error, Error::Rpc { code, .. } if *code == ERR_MAINCHAIN_TX_DUPLICATE)
}

/// Whether the error is the terminal invalid-transaction code.
pub fn is_invalid_tx_error(error: &Error) -> bool {
    matches!(error, Error::Rpc { code, .. } if *code == ERR_INVALID_MAINCHAIN_TX)
}

/// A side-chain block, trimmed to the withdraw transactions the arbiter
/// cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockInfo {
    /// The block hash.
    pub hash: Hash256,
    /// The block height.
    pub height: u32,
    /// The user withdraw transactions in the block.
    #[serde(default, rename = "withdrawtxs")]
    pub withdraw_txs: Vec<WithdrawRecord>,
}

/// The main-chain RPC surface consumed by the arbiter.
pub trait MainChainRpc: Sync + Send {
    /// The node's current best height.
    fn get_current_height(&self) -> impl Future<Output = Result<u32, Error>> + Send;

    /// Submit a fully-signed settlement transaction.
    fn send_raw_transaction(
        &self,
        raw: &[u8],
    ) -> impl Future<Output = Result<Hash256, Error>> + Send;

    /// The unspent outputs held by an address.
    fn get_unspent_outputs(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<Vec<Utxo>, Error>> + Send;

    /// Which of the given side-chain withdraw hashes have already been
    /// settled on the main chain.
    fn get_exist_withdraw_transactions(
        &self,
        hashes: &[Hash256],
    ) -> impl Future<Output = Result<Vec<Hash256>, Error>> + Send;
}

/// The side-chain RPC surface consumed by the arbiter.
pub trait SideChainRpc: Sync + Send {
    /// The node's current best height.
    fn get_current_height(&self) -> impl Future<Output = Result<u32, Error>> + Send;

    /// The block at the given height.
    fn get_block_by_height(
        &self,
        height: u32,
    ) -> impl Future<Output = Result<BlockInfo, Error>> + Send;

    /// Ask the side chain to credit a confirmed main-chain deposit.
    fn send_recharge_transaction(
        &self,
        main_tx_hash: &Hash256,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Which of the given main-chain deposit hashes the side chain has
    /// already processed.
    fn get_exist_deposit_transactions(
        &self,
        hashes: &[Hash256],
    ) -> impl Future<Output = Result<Vec<Hash256>, Error>> + Send;

    /// Look up a user withdraw transaction by hash.
    fn get_withdraw_transaction(
        &self,
        side_tx_hash: &Hash256,
    ) -> impl Future<Output = Result<Option<WithdrawRecord>, Error>> + Send;

    /// Submit co-signed illegal evidence.
    fn submit_illegal_data(&self, raw: &[u8]) -> impl Future<Output = Result<(), Error>> + Send;
}
