//! # Arbiter storage
//!
//! This module contains the `DbRead` and `DbWrite` traits representing
//! the interface between the arbiter and its staging store.
//!
//! The store holds four tables: pending deposits, pending withdrawals,
//! finished deposits, and finished withdrawals, keyed by composite
//! `(genesis address, transaction hash)` binary keys. Writes are
//! single-key atomic and batch removes are idempotent; a write lost
//! after a successful on-chain submission is recovered by the janitor's
//! reconciliation pass. The canonical in-process implementation is
//! [`memory::SharedStore`]; a durable embedded key-value engine binds
//! behind the same traits.

pub mod memory;
pub mod model;

use std::future::Future;

use crate::error::Error;
use crate::transaction::Hash256;

/// Represents the ability to read data from the staging store.
pub trait DbRead {
    /// Whether this deposit is already staged or finished for the given
    /// side chain.
    fn has_deposit(
        &self,
        main_tx_hash: &Hash256,
        genesis_address: &str,
    ) -> impl Future<Output = Result<bool, Error>> + Send;

    /// All pending deposits for one side chain.
    fn pending_deposits(
        &self,
        genesis_address: &str,
    ) -> impl Future<Output = Result<Vec<model::PendingDeposit>, Error>> + Send;

    /// All pending deposits across every side chain.
    fn all_pending_deposits(
        &self,
    ) -> impl Future<Output = Result<Vec<model::PendingDeposit>, Error>> + Send;

    /// Whether this withdrawal is already staged or finished.
    fn has_withdrawal(
        &self,
        side_tx_hash: &Hash256,
    ) -> impl Future<Output = Result<bool, Error>> + Send;

    /// The hashes and observation heights of all pending withdrawals for
    /// one side chain, in hash order.
    fn withdrawal_hashes_and_heights(
        &self,
        genesis_address: &str,
    ) -> impl Future<Output = Result<(Vec<Hash256>, Vec<u32>), Error>> + Send;

    /// The pending withdrawal rows for the given hashes; unknown hashes
    /// are skipped.
    fn withdrawals_from_hashes(
        &self,
        hashes: &[Hash256],
    ) -> impl Future<Output = Result<Vec<model::PendingWithdrawal>, Error>> + Send;

    /// The terminal outcome recorded for a deposit, if any.
    fn finished_deposit_kind(
        &self,
        main_tx_hash: &Hash256,
        genesis_address: &str,
    ) -> impl Future<Output = Result<Option<model::FinishedKind>, Error>> + Send;

    /// The terminal outcome recorded for a withdrawal, if any.
    fn finished_withdrawal_kind(
        &self,
        side_tx_hash: &Hash256,
    ) -> impl Future<Output = Result<Option<model::FinishedKind>, Error>> + Send;
}

/// Represents the ability to write data to the staging store.
pub trait DbWrite {
    /// Stage a deposit. A row already pending or finished for the same
    /// `(hash, genesis)` pair makes this a no-op; returns whether the row
    /// was inserted.
    fn add_pending_deposit(
        &self,
        deposit: &model::PendingDeposit,
    ) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Stage a batch of withdrawals. Rows already pending or finished
    /// are skipped; returns the number inserted.
    fn add_pending_withdrawals(
        &self,
        withdrawals: &[model::PendingWithdrawal],
    ) -> impl Future<Output = Result<usize, Error>> + Send;

    /// Drop pending deposits without recording an outcome. Used on
    /// rollback.
    fn remove_pending_deposits(
        &self,
        keys: &[(Hash256, String)],
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Drop pending deposits whose proof height is at or above the given
    /// height. Used on SPV rollback.
    fn remove_pending_deposits_from_height(
        &self,
        height: u32,
    ) -> impl Future<Output = Result<usize, Error>> + Send;

    /// Drop pending withdrawals without recording an outcome. Used for
    /// rows whose stored record cannot be decoded and must never be
    /// retried.
    fn remove_pending_withdrawals(
        &self,
        side_tx_hashes: &[Hash256],
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Move pending deposits to the finished table with the given
    /// outcome, atomically per row.
    fn finish_deposits(
        &self,
        keys: &[(Hash256, String)],
        kind: model::FinishedKind,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Move pending withdrawals to the finished table, atomically per
    /// row.
    fn finish_withdrawals(
        &self,
        side_tx_hashes: &[Hash256],
    ) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Split `hashes` into the entries absent from `included` together with
/// their observation heights, preserving order. The second result lists
/// the hashes that were found in `included`.
pub fn subtract_included(
    hashes: &[Hash256],
    heights: &[u32],
    included: &[Hash256],
) -> (Vec<(Hash256, u32)>, Vec<Hash256>) {
    let mut remaining = Vec::with_capacity(hashes.len());
    let mut found = Vec::new();
    for (hash, height) in hashes.iter().zip(heights) {
        if included.contains(hash) {
            found.push(*hash);
        } else {
            remaining.push((*hash, *height));
        }
    }
    (remaining, found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtract_included_partitions_hashes() {
        let hashes = [
            Hash256::digest(b"a"),
            Hash256::digest(b"b"),
            Hash256::digest(b"c"),
        ];
        let heights = [10, 11, 12];
        let included = [Hash256::digest(b"b")];

        let (remaining, found) = subtract_included(&hashes, &heights, &included);
        assert_eq!(remaining, vec![(hashes[0], 10), (hashes[2], 12)]);
        assert_eq!(found, vec![hashes[1]]);
    }
}
