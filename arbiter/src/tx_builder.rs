//! Builders for the three settlement transaction shapes.
//!
//! Each builder is a pure function of its inputs, the committee script,
//! and the side chain's fee parameters, so the leader and any auditor
//! derive the same bytes from the same staging rows. All amount math is
//! checked; overflow aborts the proposal being built.

use crate::codec::Decode as _;
use crate::error::Error;
use crate::multisig::Committee;
use crate::multisig::SIGNATURE_SCRIPT_LENGTH;
use crate::storage::model::PendingDeposit;
use crate::storage::model::PendingWithdrawal;
use crate::transaction::Amount;
use crate::transaction::ExchangeRate;
use crate::transaction::Hash256;
use crate::transaction::Payload;
use crate::transaction::Program;
use crate::transaction::Transaction;
use crate::transaction::TxInput;
use crate::transaction::TxOutput;
use crate::transaction::Utxo;
use crate::transaction::WithdrawRecord;
use crate::transaction::TX_VERSION;

/// The batching step for oversized withdrawal batches: prefixes grow
/// and shrink in multiples of this many records.
pub const WITHDRAW_BATCH_STEP: usize = 100;

/// A staged withdrawal with its record decoded.
#[derive(Debug, Clone)]
pub struct ParsedWithdrawal {
    /// The side-chain withdraw transaction hash.
    pub side_tx_hash: Hash256,
    /// The side-chain height the record was observed at.
    pub block_height: u32,
    /// The decoded payout list.
    pub record: WithdrawRecord,
}

/// Decode one staged withdrawal row. A malformed row is terminal for
/// that row: the caller moves it to finished-failed and never retries.
pub fn parse_withdrawal(row: &PendingWithdrawal) -> Result<ParsedWithdrawal, Error> {
    let record = WithdrawRecord::decode_all(&row.raw_record)?;
    if record.txid != row.side_tx_hash {
        return Err(Error::Malformed("withdraw record hash mismatch"));
    }
    if record.assets.is_empty() {
        return Err(Error::Malformed("withdraw record has no assets"));
    }
    Ok(ParsedWithdrawal {
        side_tx_hash: row.side_tx_hash,
        block_height: row.block_height,
        record,
    })
}

/// Build the side-chain recharge transaction crediting a confirmed
/// main-chain deposit.
///
/// The single output pays the target side address
/// `exchange_rate * amount - cross_chain_fee`, truncating toward zero.
pub fn build_deposit_recharge(
    deposit: &PendingDeposit,
    exchange_rate: ExchangeRate,
    cross_chain_fee: Amount,
) -> Result<Transaction, Error> {
    let converted = exchange_rate.apply(deposit.amount)?;
    let value = converted.checked_sub(cross_chain_fee)?;
    if !value.is_positive() {
        return Err(Error::OutputBelowFee { amount: converted, fee: cross_chain_fee });
    }

    Ok(Transaction {
        version: TX_VERSION,
        payload: Payload::RechargeToSideChain {
            main_tx_hash: deposit.main_tx_hash,
            amount: deposit.amount,
        },
        inputs: Vec::new(),
        outputs: vec![TxOutput { address: deposit.side_address.clone(), value }],
        lock_time: 0,
        programs: Vec::new(),
    })
}

/// Build one main-chain withdrawal transaction settling the given
/// records.
///
/// Each asset becomes one output paying
/// `amount - cross_chain_fee`; the retained fees are left to the miner
/// as the input/output difference. Bank UTXOs are selected greedily in
/// `(txid, vout)` lexicographic order until the gross total is covered,
/// with any excess returned to the bank as change.
pub fn build_withdrawal(
    withdrawals: &[ParsedWithdrawal],
    genesis_address: &str,
    committee: &Committee,
    utxos: &[Utxo],
) -> Result<Transaction, Error> {
    let mut outputs = Vec::new();
    let mut gross_total = Amount::ZERO;
    let mut side_tx_hashes = Vec::with_capacity(withdrawals.len());
    let mut block_height = 0u32;

    for withdrawal in withdrawals {
        side_tx_hashes.push(withdrawal.side_tx_hash);
        block_height = block_height.max(withdrawal.block_height);
        for asset in &withdrawal.record.assets {
            let value = asset.amount.checked_sub(asset.cross_chain_fee)?;
            if !value.is_positive() {
                return Err(Error::OutputBelowFee {
                    amount: asset.amount,
                    fee: asset.cross_chain_fee,
                });
            }
            gross_total = gross_total.checked_add(asset.amount)?;
            outputs.push(TxOutput { address: asset.target_address.clone(), value });
        }
    }

    let (inputs, change) = select_utxos(utxos, gross_total)?;
    if change.is_positive() {
        outputs.push(TxOutput {
            address: committee.bank_address(),
            value: change,
        });
    }

    Ok(Transaction {
        version: TX_VERSION,
        payload: Payload::WithdrawFromSideChain {
            block_height,
            genesis_address: genesis_address.to_string(),
            side_tx_hashes,
        },
        inputs,
        outputs,
        lock_time: 0,
        programs: vec![Program {
            code: committee.redeem_script(),
            parameter: Vec::new(),
        }],
    })
}

/// Build the largest withdrawal batch that fits under `max_size` once
/// fully signed, growing the record prefix in steps of
/// [`WITHDRAW_BATCH_STEP`]. Returns the transaction and the number of
/// records it settles; the caller keeps the rest pending.
pub fn build_batched_withdrawal(
    withdrawals: &[ParsedWithdrawal],
    genesis_address: &str,
    committee: &Committee,
    utxos: &[Utxo],
    max_size: usize,
) -> Result<(Transaction, usize), Error> {
    let mut best = None;
    let mut count = 0;
    while count < withdrawals.len() {
        count = (count + WITHDRAW_BATCH_STEP).min(withdrawals.len());
        let tx = build_withdrawal(&withdrawals[..count], genesis_address, committee, utxos)?;
        if signed_size_estimate(&tx, committee) < max_size {
            best = Some((tx, count));
        } else {
            break;
        }
    }
    best.ok_or(Error::BatchTooLarge)
}

/// Build the main-chain transaction returning deposits the side chain
/// finally rejected. Outputs refund the depositor addresses, net of the
/// side chain's cross-chain fee; the payload lists the failed deposit
/// hashes.
pub fn build_failed_deposit_return(
    failures: &[PendingDeposit],
    genesis_address: &str,
    committee: &Committee,
    utxos: &[Utxo],
    cross_chain_fee: Amount,
    side_height: u32,
) -> Result<Transaction, Error> {
    let mut outputs = Vec::with_capacity(failures.len());
    let mut gross_total = Amount::ZERO;
    let mut deposit_tx_hashes = Vec::with_capacity(failures.len());

    for failure in failures {
        let deposit_tx = Transaction::decode_all(&failure.raw_tx)?;
        let Payload::TransferCrossChainAsset { depositor_address, amount, .. } =
            &deposit_tx.payload
        else {
            return Err(Error::Malformed("staged row is not a deposit"));
        };

        let value = amount.checked_sub(cross_chain_fee)?;
        if !value.is_positive() {
            return Err(Error::OutputBelowFee { amount: *amount, fee: cross_chain_fee });
        }
        gross_total = gross_total.checked_add(*amount)?;
        deposit_tx_hashes.push(failure.main_tx_hash);
        outputs.push(TxOutput { address: depositor_address.clone(), value });
    }

    let (inputs, change) = select_utxos(utxos, gross_total)?;
    if change.is_positive() {
        outputs.push(TxOutput {
            address: committee.bank_address(),
            value: change,
        });
    }

    Ok(Transaction {
        version: TX_VERSION,
        payload: Payload::ReturnSideChainDeposit {
            side_height,
            genesis_address: genesis_address.to_string(),
            deposit_tx_hashes,
        },
        inputs,
        outputs,
        lock_time: 0,
        programs: vec![Program {
            code: committee.redeem_script(),
            parameter: Vec::new(),
        }],
    })
}

/// The serialized size once the witness holds a threshold of
/// signatures.
pub fn signed_size_estimate(tx: &Transaction, committee: &Committee) -> usize {
    tx.size() + committee.threshold() * SIGNATURE_SCRIPT_LENGTH
}

/// Select bank UTXOs covering `needed`, greedily in `(txid, vout)`
/// lexicographic order. Returns the inputs and the change.
fn select_utxos(utxos: &[Utxo], needed: Amount) -> Result<(Vec<TxInput>, Amount), Error> {
    let mut sorted: Vec<Utxo> = utxos.to_vec();
    sorted.sort();

    let mut inputs = Vec::new();
    let mut selected = Amount::ZERO;
    for utxo in sorted {
        if selected >= needed {
            break;
        }
        selected = selected.checked_add(utxo.value)?;
        inputs.push(utxo.to_input());
    }

    if selected < needed {
        return Err(Error::InsufficientFunds { needed, available: selected });
    }
    Ok((inputs, selected.checked_sub(needed)?))
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng as _;

    use crate::testing::dummy;
    use crate::transaction::WithdrawAsset;

    use super::*;

    fn committee_of(n: usize) -> Committee {
        let mut rng = rand::rngs::StdRng::seed_from_u64(46);
        let secrets: Vec<_> = (0..n).map(|_| crate::keys::PrivateKey::new(&mut rng)).collect();
        Committee::new(secrets.iter().map(|s| s.public_key()).collect()).unwrap()
    }

    fn parsed_withdrawal(seed: &[u8], amount: i64, fee: i64) -> ParsedWithdrawal {
        let record = WithdrawRecord {
            txid: Hash256::digest(seed),
            assets: vec![WithdrawAsset {
                target_address: format!("main-{}", hex::encode(&seed[..1])),
                amount: Amount(amount),
                cross_chain_fee: Amount(fee),
            }],
        };
        ParsedWithdrawal {
            side_tx_hash: record.txid,
            block_height: 50,
            record,
        }
    }

    #[test]
    fn recharge_applies_rate_and_fee() {
        let mut deposit = dummy::pending_deposit(b"aa", "gY");
        deposit.amount = Amount(100_000_000);
        let rate: ExchangeRate = "2.0".parse().unwrap();

        let tx = build_deposit_recharge(&deposit, rate, Amount(10_000)).unwrap();
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].value, Amount(199_990_000));
        assert_eq!(tx.outputs[0].address, deposit.side_address);
        match tx.payload {
            Payload::RechargeToSideChain { main_tx_hash, amount } => {
                assert_eq!(main_tx_hash, deposit.main_tx_hash);
                assert_eq!(amount, Amount(100_000_000));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn recharge_rejects_amount_below_fee() {
        let mut deposit = dummy::pending_deposit(b"aa", "gY");
        deposit.amount = Amount(5_000);
        let result =
            build_deposit_recharge(&deposit, ExchangeRate::ONE, Amount(10_000));
        assert!(matches!(result, Err(Error::OutputBelowFee { .. })));
    }

    #[test]
    fn withdrawal_pays_one_output_per_asset_plus_change() {
        let committee = committee_of(5);
        let withdrawals = vec![
            parsed_withdrawal(b"w1", 100_000_000, 10_000),
            parsed_withdrawal(b"w2", 50_000_000, 10_000),
            parsed_withdrawal(b"w3", 25_000_000, 10_000),
        ];
        let utxos = vec![Utxo {
            txid: Hash256::digest(b"bank"),
            vout: 0,
            value: Amount(200_000_000),
        }];

        let tx = build_withdrawal(&withdrawals, "gY", &committee, &utxos).unwrap();
        // Three payouts plus the change output.
        assert_eq!(tx.outputs.len(), 4);
        assert_eq!(tx.outputs[0].value, Amount(99_990_000));
        assert_eq!(tx.outputs[3].address, committee.bank_address());
        assert_eq!(tx.outputs[3].value, Amount(25_000_000));
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.programs[0].code, committee.redeem_script());
        assert!(tx.programs[0].parameter.is_empty());

        match &tx.payload {
            Payload::WithdrawFromSideChain { genesis_address, side_tx_hashes, .. } => {
                assert_eq!(genesis_address, "gY");
                assert_eq!(side_tx_hashes.len(), 3);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn utxo_selection_is_lexicographic_and_minimal() {
        let committee = committee_of(5);
        let withdrawals = vec![parsed_withdrawal(b"w1", 150_000_000, 10_000)];
        let mut utxos = vec![
            Utxo { txid: Hash256([2u8; 32]), vout: 0, value: Amount(100_000_000) },
            Utxo { txid: Hash256([1u8; 32]), vout: 1, value: Amount(100_000_000) },
            Utxo { txid: Hash256([1u8; 32]), vout: 0, value: Amount(100_000_000) },
        ];

        let tx = build_withdrawal(&withdrawals, "gY", &committee, &utxos).unwrap();
        assert_eq!(tx.inputs.len(), 2);
        assert_eq!(tx.inputs[0].prev_hash, Hash256([1u8; 32]));
        assert_eq!(tx.inputs[0].prev_index, 0);
        assert_eq!(tx.inputs[1].prev_index, 1);

        // Shuffling the input list does not change the selection.
        utxos.swap(0, 2);
        let again = build_withdrawal(&withdrawals, "gY", &committee, &utxos).unwrap();
        assert_eq!(again.inputs, tx.inputs);
    }

    #[test]
    fn insufficient_bank_funds_is_an_error() {
        let committee = committee_of(5);
        let withdrawals = vec![parsed_withdrawal(b"w1", 150_000_000, 10_000)];
        let utxos = vec![Utxo {
            txid: Hash256::digest(b"bank"),
            vout: 0,
            value: Amount(100_000_000),
        }];

        let result = build_withdrawal(&withdrawals, "gY", &committee, &utxos);
        assert!(matches!(result, Err(Error::InsufficientFunds { .. })));
    }

    #[test]
    fn oversized_batch_is_split_at_a_step_boundary() {
        let committee = committee_of(5);
        let withdrawals: Vec<ParsedWithdrawal> = (0..1000u32)
            .map(|i| parsed_withdrawal(&i.to_be_bytes(), 10_000_000, 1_000))
            .collect();
        let utxos = vec![Utxo {
            txid: Hash256::digest(b"bank"),
            vout: 0,
            value: Amount(1_000_000 * 10_000_000),
        }];

        // Size a limit that fits roughly half the records.
        let full = build_withdrawal(&withdrawals, "gY", &committee, &utxos).unwrap();
        let max_size = signed_size_estimate(&full, &committee) / 2;

        let (tx, used) =
            build_batched_withdrawal(&withdrawals, "gY", &committee, &utxos, max_size).unwrap();
        assert!(used < 1000);
        assert_eq!(used % WITHDRAW_BATCH_STEP, 0);
        assert!(signed_size_estimate(&tx, &committee) < max_size);

        match &tx.payload {
            Payload::WithdrawFromSideChain { side_tx_hashes, .. } => {
                assert_eq!(side_tx_hashes.len(), used);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn batch_that_cannot_fit_at_all_errors() {
        let committee = committee_of(5);
        let withdrawals = vec![parsed_withdrawal(b"w1", 10_000_000, 1_000)];
        let utxos = vec![Utxo {
            txid: Hash256::digest(b"bank"),
            vout: 0,
            value: Amount(100_000_000),
        }];

        let result = build_batched_withdrawal(&withdrawals, "gY", &committee, &utxos, 10);
        assert!(matches!(result, Err(Error::BatchTooLarge)));
    }

    #[test]
    fn failed_deposit_return_refunds_depositors() {
        let committee = committee_of(5);
        let deposit = dummy::pending_deposit(b"aa", "gY");
        let utxos = vec![Utxo {
            txid: Hash256::digest(b"bank"),
            vout: 0,
            value: Amount(10_000_000_000),
        }];

        let tx = build_failed_deposit_return(
            &[deposit.clone()],
            "gY",
            &committee,
            &utxos,
            Amount(10_000),
            77,
        )
        .unwrap();

        let expected = deposit.amount.checked_sub(Amount(10_000)).unwrap();
        assert_eq!(tx.outputs[0].value, expected);
        match &tx.payload {
            Payload::ReturnSideChainDeposit { side_height, deposit_tx_hashes, .. } => {
                assert_eq!(*side_height, 77);
                assert_eq!(deposit_tx_hashes, &vec![deposit.main_tx_hash]);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn malformed_withdraw_record_is_surfaced() {
        let mut row = dummy::pending_withdrawal(b"w1", "gY", 10);
        row.raw_record = vec![0xFF; 4];
        assert!(parse_withdrawal(&row).is_err());
    }
}
