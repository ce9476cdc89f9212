//! In-memory implementation of the staging store.
//!
//! Tables are ordered maps over the same composite binary keys a durable
//! engine would use, so iteration order matches what an embedded
//! key-value store yields.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::Error;
use crate::transaction::Hash256;

use super::model::FinishedKind;
use super::model::PendingDeposit;
use super::model::PendingWithdrawal;
use super::DbRead;
use super::DbWrite;

/// The staging tables.
#[derive(Debug, Default)]
pub struct Store {
    pending_deposits: BTreeMap<(String, Hash256), PendingDeposit>,
    finished_deposits: BTreeMap<(String, Hash256), FinishedKind>,
    pending_withdrawals: BTreeMap<Hash256, PendingWithdrawal>,
    finished_withdrawals: BTreeMap<Hash256, FinishedKind>,
}

/// A thread-safe shared reference to an in-memory store.
pub type SharedStore = Arc<RwLock<Store>>;

impl Store {
    /// Create a new empty store wrapped in a shared reference.
    pub fn new_shared() -> SharedStore {
        Arc::new(RwLock::new(Store::default()))
    }
}

impl DbRead for SharedStore {
    async fn has_deposit(&self, main_tx_hash: &Hash256, genesis_address: &str) -> Result<bool, Error> {
        let store = self.read().await;
        let key = (genesis_address.to_string(), *main_tx_hash);
        Ok(store.pending_deposits.contains_key(&key) || store.finished_deposits.contains_key(&key))
    }

    async fn pending_deposits(&self, genesis_address: &str) -> Result<Vec<PendingDeposit>, Error> {
        let store = self.read().await;
        Ok(store
            .pending_deposits
            .range((genesis_address.to_string(), Hash256([0; 32]))..)
            .take_while(|((genesis, _), _)| genesis == genesis_address)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn all_pending_deposits(&self) -> Result<Vec<PendingDeposit>, Error> {
        let store = self.read().await;
        Ok(store.pending_deposits.values().cloned().collect())
    }

    async fn has_withdrawal(&self, side_tx_hash: &Hash256) -> Result<bool, Error> {
        let store = self.read().await;
        Ok(store.pending_withdrawals.contains_key(side_tx_hash)
            || store.finished_withdrawals.contains_key(side_tx_hash))
    }

    async fn withdrawal_hashes_and_heights(
        &self,
        genesis_address: &str,
    ) -> Result<(Vec<Hash256>, Vec<u32>), Error> {
        let store = self.read().await;
        let mut hashes = Vec::new();
        let mut heights = Vec::new();
        for (hash, row) in &store.pending_withdrawals {
            if row.genesis_address == genesis_address {
                hashes.push(*hash);
                heights.push(row.block_height);
            }
        }
        Ok((hashes, heights))
    }

    async fn withdrawals_from_hashes(
        &self,
        hashes: &[Hash256],
    ) -> Result<Vec<PendingWithdrawal>, Error> {
        let store = self.read().await;
        Ok(hashes
            .iter()
            .filter_map(|hash| store.pending_withdrawals.get(hash).cloned())
            .collect())
    }

    async fn finished_deposit_kind(
        &self,
        main_tx_hash: &Hash256,
        genesis_address: &str,
    ) -> Result<Option<FinishedKind>, Error> {
        let store = self.read().await;
        let key = (genesis_address.to_string(), *main_tx_hash);
        Ok(store.finished_deposits.get(&key).copied())
    }

    async fn finished_withdrawal_kind(
        &self,
        side_tx_hash: &Hash256,
    ) -> Result<Option<FinishedKind>, Error> {
        let store = self.read().await;
        Ok(store.finished_withdrawals.get(side_tx_hash).copied())
    }
}

impl DbWrite for SharedStore {
    async fn add_pending_deposit(&self, deposit: &PendingDeposit) -> Result<bool, Error> {
        let mut store = self.write().await;
        let key = (deposit.genesis_address.clone(), deposit.main_tx_hash);
        if store.pending_deposits.contains_key(&key) || store.finished_deposits.contains_key(&key) {
            return Ok(false);
        }
        store.pending_deposits.insert(key, deposit.clone());
        Ok(true)
    }

    async fn add_pending_withdrawals(
        &self,
        withdrawals: &[PendingWithdrawal],
    ) -> Result<usize, Error> {
        let mut store = self.write().await;
        let mut inserted = 0;
        for row in withdrawals {
            if store.pending_withdrawals.contains_key(&row.side_tx_hash)
                || store.finished_withdrawals.contains_key(&row.side_tx_hash)
            {
                continue;
            }
            store.pending_withdrawals.insert(row.side_tx_hash, row.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn remove_pending_deposits(&self, keys: &[(Hash256, String)]) -> Result<(), Error> {
        let mut store = self.write().await;
        for (hash, genesis) in keys {
            store.pending_deposits.remove(&(genesis.clone(), *hash));
        }
        Ok(())
    }

    async fn remove_pending_deposits_from_height(&self, height: u32) -> Result<usize, Error> {
        let mut store = self.write().await;
        let before = store.pending_deposits.len();
        store
            .pending_deposits
            .retain(|_, row| row.proof.block_height < height);
        Ok(before - store.pending_deposits.len())
    }

    async fn remove_pending_withdrawals(&self, side_tx_hashes: &[Hash256]) -> Result<(), Error> {
        let mut store = self.write().await;
        for hash in side_tx_hashes {
            store.pending_withdrawals.remove(hash);
        }
        Ok(())
    }

    async fn finish_deposits(
        &self,
        keys: &[(Hash256, String)],
        kind: FinishedKind,
    ) -> Result<(), Error> {
        let mut store = self.write().await;
        for (hash, genesis) in keys {
            let key = (genesis.clone(), *hash);
            store.pending_deposits.remove(&key);
            store.finished_deposits.entry(key).or_insert(kind);
        }
        Ok(())
    }

    async fn finish_withdrawals(&self, side_tx_hashes: &[Hash256]) -> Result<(), Error> {
        let mut store = self.write().await;
        for hash in side_tx_hashes {
            store.pending_withdrawals.remove(hash);
            store
                .finished_withdrawals
                .entry(*hash)
                .or_insert(FinishedKind::WithdrawSucceeded);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::dummy;

    use super::*;

    #[tokio::test]
    async fn deposit_staging_is_idempotent() {
        let store = Store::new_shared();
        let deposit = dummy::pending_deposit(b"aa", "gY");

        assert!(store.add_pending_deposit(&deposit).await.unwrap());
        assert!(!store.add_pending_deposit(&deposit).await.unwrap());
        assert_eq!(store.pending_deposits("gY").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn finished_deposit_blocks_restaging() {
        let store = Store::new_shared();
        let deposit = dummy::pending_deposit(b"aa", "gY");
        let key = (deposit.main_tx_hash, deposit.genesis_address.clone());

        store.add_pending_deposit(&deposit).await.unwrap();
        store
            .finish_deposits(&[key.clone()], FinishedKind::DepositSucceeded)
            .await
            .unwrap();

        // The row must never be in both tables, and must not re-stage.
        assert!(store.pending_deposits("gY").await.unwrap().is_empty());
        assert!(!store.add_pending_deposit(&deposit).await.unwrap());
        assert_eq!(
            store
                .finished_deposit_kind(&key.0, &key.1)
                .await
                .unwrap(),
            Some(FinishedKind::DepositSucceeded)
        );
    }

    #[tokio::test]
    async fn deposits_are_scoped_by_genesis_address() {
        let store = Store::new_shared();
        store
            .add_pending_deposit(&dummy::pending_deposit(b"aa", "gX"))
            .await
            .unwrap();
        store
            .add_pending_deposit(&dummy::pending_deposit(b"aa", "gY"))
            .await
            .unwrap();
        store
            .add_pending_deposit(&dummy::pending_deposit(b"bb", "gY"))
            .await
            .unwrap();

        assert_eq!(store.pending_deposits("gX").await.unwrap().len(), 1);
        assert_eq!(store.pending_deposits("gY").await.unwrap().len(), 2);
        assert!(store.pending_deposits("gZ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rollback_drops_deposits_from_height() {
        let store = Store::new_shared();
        let mut low = dummy::pending_deposit(b"aa", "gY");
        low.proof.block_height = 90;
        let mut high = dummy::pending_deposit(b"bb", "gY");
        high.proof.block_height = 100;

        store.add_pending_deposit(&low).await.unwrap();
        store.add_pending_deposit(&high).await.unwrap();

        let removed = store.remove_pending_deposits_from_height(100).await.unwrap();
        assert_eq!(removed, 1);
        let rows = store.pending_deposits("gY").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].main_tx_hash, low.main_tx_hash);
    }

    #[tokio::test]
    async fn withdrawal_round_trip() {
        let store = Store::new_shared();
        let rows = vec![
            dummy::pending_withdrawal(b"w1", "gY", 10),
            dummy::pending_withdrawal(b"w2", "gY", 11),
        ];
        assert_eq!(store.add_pending_withdrawals(&rows).await.unwrap(), 2);
        assert_eq!(store.add_pending_withdrawals(&rows).await.unwrap(), 0);

        let (hashes, heights) = store.withdrawal_hashes_and_heights("gY").await.unwrap();
        assert_eq!(hashes.len(), 2);
        assert_eq!(heights.len(), 2);

        store.finish_withdrawals(&hashes[..1]).await.unwrap();
        let (remaining, _) = store.withdrawal_hashes_and_heights("gY").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(
            store.finished_withdrawal_kind(&hashes[0]).await.unwrap(),
            Some(FinishedKind::WithdrawSucceeded)
        );
    }
}
