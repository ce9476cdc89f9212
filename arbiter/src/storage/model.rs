//! Row types for the staging tables.

use crate::transaction::Amount;
use crate::transaction::Hash256;
use crate::transaction::MerkleProof;

/// A confirmed main-chain deposit waiting to be recharged on its side
/// chain.
///
/// Unique on `(main_tx_hash, genesis_address)`. Inserted by the deposit
/// observer; removed when the side chain accepts or finally rejects the
/// recharge, or by the janitor once the deposit is observed on-chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeposit {
    /// The main-chain deposit transaction hash.
    pub main_tx_hash: Hash256,
    /// The side chain the deposit targets.
    pub genesis_address: String,
    /// The serialized main-chain transaction.
    pub raw_tx: Vec<u8>,
    /// The SPV inclusion proof delivered with the transaction.
    pub proof: MerkleProof,
    /// The deposited amount.
    pub amount: Amount,
    /// The side-chain address to credit.
    pub side_address: String,
}

/// A user withdraw transaction observed on a side chain, waiting to be
/// settled on the main chain.
///
/// Unique on `side_tx_hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWithdrawal {
    /// The side-chain withdraw transaction hash.
    pub side_tx_hash: Hash256,
    /// The side chain it was observed on.
    pub genesis_address: String,
    /// The serialized withdraw record.
    pub raw_record: Vec<u8>,
    /// The side-chain height the record was observed at.
    pub block_height: u32,
}

/// Terminal outcome of a staged transaction. Append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishedKind {
    /// The side chain accepted the recharge (or already had it).
    DepositSucceeded,
    /// The side chain finally rejected the recharge.
    DepositFailed,
    /// The withdrawal batch containing this record confirmed on the
    /// main chain.
    WithdrawSucceeded,
}

impl std::fmt::Display for FinishedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FinishedKind::DepositSucceeded => "deposit-succeeded",
            FinishedKind::DepositFailed => "deposit-failed",
            FinishedKind::WithdrawSucceeded => "withdraw-succeeded",
        };
        f.write_str(label)
    }
}
