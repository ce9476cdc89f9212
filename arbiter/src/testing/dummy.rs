//! Utilities for generating dummy values in tests.

use crate::codec::Encode as _;
use crate::multisig::Committee;
use crate::storage::model::PendingDeposit;
use crate::storage::model::PendingWithdrawal;
use crate::transaction::Amount;
use crate::transaction::Hash256;
use crate::transaction::MerkleProof;
use crate::transaction::Payload;
use crate::transaction::Program;
use crate::transaction::Transaction;
use crate::transaction::TxInput;
use crate::transaction::TxOutput;
use crate::transaction::WithdrawAsset;
use crate::transaction::WithdrawRecord;
use crate::transaction::TX_VERSION;

use super::TestSpv;

/// A main-chain deposit transaction paying one unit to `genesis`.
pub fn deposit_tx(seed: &[u8], genesis: &str) -> Transaction {
    Transaction {
        version: TX_VERSION,
        payload: Payload::TransferCrossChainAsset {
            side_address: format!("side-{}", hex::encode(&seed[..seed.len().min(2)])),
            depositor_address: "main-depositor".into(),
            amount: Amount(100_000_000),
        },
        inputs: vec![TxInput {
            prev_hash: Hash256::digest(seed),
            prev_index: 0,
            sequence: 0,
        }],
        outputs: vec![TxOutput {
            address: genesis.into(),
            value: Amount(100_000_000),
        }],
        lock_time: 0,
        programs: Vec::new(),
    }
}

/// A staged pending-deposit row for the given deposit seed.
pub fn pending_deposit(seed: &[u8], genesis: &str) -> PendingDeposit {
    let tx = deposit_tx(seed, genesis);
    let Payload::TransferCrossChainAsset { side_address, amount, .. } = &tx.payload else {
        unreachable!()
    };
    PendingDeposit {
        main_tx_hash: tx.hash(),
        genesis_address: genesis.into(),
        raw_tx: tx.encode_to_vec(),
        proof: MerkleProof {
            block_height: 100,
            merkle_index: 0,
            branch: Vec::new(),
        },
        amount: *amount,
        side_address: side_address.clone(),
    }
}

/// A deposit transaction together with a proof that verifies against
/// the given SPV cache at `height`.
pub fn confirmed_deposit(
    seed: &[u8],
    genesis: &str,
    spv: &TestSpv,
    height: u32,
) -> (Transaction, MerkleProof) {
    let tx = deposit_tx(seed, genesis);
    let proof = MerkleProof {
        block_height: height,
        merkle_index: 0,
        branch: vec![Hash256::digest(b"sibling")],
    };
    spv.add_root(height, proof.compute_root(tx.hash()));
    (tx, proof)
}

/// A side-chain withdraw record paying one unit to a main address.
pub fn withdraw_record(seed: &[u8]) -> WithdrawRecord {
    WithdrawRecord {
        txid: Hash256::digest(seed),
        assets: vec![WithdrawAsset {
            target_address: format!("main-{}", hex::encode(&seed[..seed.len().min(2)])),
            amount: Amount(100_000_000),
            cross_chain_fee: Amount(10_000),
        }],
    }
}

/// A staged pending-withdrawal row for the given record seed.
pub fn pending_withdrawal(seed: &[u8], genesis: &str, block_height: u32) -> PendingWithdrawal {
    let record = withdraw_record(seed);
    PendingWithdrawal {
        side_tx_hash: record.txid,
        genesis_address: genesis.into(),
        raw_record: record.encode_to_vec(),
        block_height,
    }
}

/// An unsigned withdrawal settlement carrying the committee's redeem
/// script.
pub fn withdrawal_tx(committee: &Committee) -> Transaction {
    Transaction {
        version: TX_VERSION,
        payload: Payload::WithdrawFromSideChain {
            block_height: 50,
            genesis_address: "gY".into(),
            side_tx_hashes: vec![Hash256::digest(b"w")],
        },
        inputs: vec![TxInput {
            prev_hash: Hash256::digest(b"bank"),
            prev_index: 0,
            sequence: 0,
        }],
        outputs: vec![TxOutput {
            address: "main-target".into(),
            value: Amount(99_990_000),
        }],
        lock_time: 0,
        programs: vec![Program {
            code: committee.redeem_script(),
            parameter: Vec::new(),
        }],
    }
}
