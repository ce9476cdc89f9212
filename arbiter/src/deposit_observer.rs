//! # Deposit observer
//!
//! The SPV engine delivers each confirmed main-chain transaction paying
//! a registered genesis address, together with its merkle proof. The
//! observer validates the proof against the cached header chain, stages
//! an idempotent pending-deposit row, and pokes the orchestrator when
//! duty is currently held.
//!
//! A second, much smaller listener watches the pow-chain mining
//! addresses and surfaces auxiliary-PoW notifications.

use crate::context::ArbiterEvent;
use crate::context::Context;
use crate::error::Error;
use crate::storage::model::PendingDeposit;
use crate::storage::DbWrite as _;
use crate::transaction::Hash256;
use crate::transaction::MerkleProof;
use crate::transaction::Payload;
use crate::transaction::Transaction;

/// A read-only view over the SPV engine's cached header chain.
///
/// The engine itself is an external collaborator; the arbiter only ever
/// asks for the best height and the merkle root it has cached for a
/// given height.
pub trait SpvView: Clone + Sync + Send + 'static {
    /// The height of the best cached header.
    fn best_height(&self) -> u32;

    /// The merkle root of the cached header at `height`.
    fn merkle_root_at(&self, height: u32) -> Option<Hash256>;
}

/// Stages confirmed deposits delivered by SPV.
#[derive(Debug, Clone)]
pub struct DepositObserver<C, S> {
    context: C,
    spv: S,
    /// Genesis addresses of the registered side chains.
    watched_addresses: Vec<String>,
}

impl<C, S> DepositObserver<C, S>
where
    C: Context,
    S: SpvView,
{
    /// Create an observer for the configured side chains.
    pub fn new(context: C, spv: S) -> Self {
        let watched_addresses = context
            .config()
            .side_nodes
            .iter()
            .map(|node| node.genesis_address.clone())
            .collect();
        Self { context, spv, watched_addresses }
    }

    /// SPV callback: a confirmed transaction paying a watched address.
    ///
    /// Staging is idempotent: redelivery of the same `(tx, genesis)`
    /// pair leaves exactly one pending row, and a row that has already
    /// finished is never restaged.
    #[tracing::instrument(skip_all, fields(tx_hash = %tx.hash(), height))]
    pub async fn on_received(
        &self,
        tx: &Transaction,
        proof: &MerkleProof,
        height: u32,
    ) -> Result<(), Error> {
        self.check_proof(tx, proof, height)?;

        let Payload::TransferCrossChainAsset {
            side_address,
            depositor_address: _,
            amount,
        } = &tx.payload
        else {
            return Err(Error::Malformed("not a cross chain deposit"));
        };

        let db = self.context.get_storage_mut();
        let mut staged_any = false;
        for genesis_address in &self.watched_addresses {
            if !tx.outputs.iter().any(|out| &out.address == genesis_address) {
                continue;
            }

            let deposit = PendingDeposit {
                main_tx_hash: tx.hash(),
                genesis_address: genesis_address.clone(),
                raw_tx: crate::codec::Encode::encode_to_vec(tx),
                proof: proof.clone(),
                amount: *amount,
                side_address: side_address.clone(),
            };
            if db.add_pending_deposit(&deposit).await? {
                tracing::info!(genesis = %genesis_address, amount = %amount, "staged deposit");
                metrics::counter!(crate::metrics::DEPOSITS_STAGED_TOTAL).increment(1);
                staged_any = true;

                self.context.signal(
                    ArbiterEvent::DepositsStaged {
                        genesis_address: genesis_address.clone(),
                    }
                    .into(),
                )?;
            } else {
                tracing::debug!(genesis = %genesis_address, "deposit already staged, dropping");
            }
        }

        if !staged_any {
            tracing::debug!("transaction pays no watched genesis address");
        }
        Ok(())
    }

    /// SPV callback: the header chain rolled back to `height`. Pending
    /// deposits proven at or above it are dropped; SPV redelivers them
    /// if they reconfirm.
    #[tracing::instrument(skip_all, fields(height))]
    pub async fn on_rollback(&self, height: u32) -> Result<(), Error> {
        let removed = self
            .context
            .get_storage_mut()
            .remove_pending_deposits_from_height(height)
            .await?;
        if removed > 0 {
            tracing::warn!(removed, "dropped pending deposits after rollback");
        }
        Ok(())
    }

    /// Validate the proof against the cached header chain and the
    /// configured confirmation depth.
    fn check_proof(&self, tx: &Transaction, proof: &MerkleProof, height: u32) -> Result<(), Error> {
        if proof.block_height != height {
            return Err(Error::Malformed("proof height mismatch"));
        }

        let best = self.spv.best_height();
        let confirmations = best.saturating_sub(height).saturating_add(1);
        let required = self.context.config().main_node.confirmations;
        if best < height || confirmations < required {
            return Err(Error::InsufficientConfirmations { height, confirmations, required });
        }

        let root = self
            .spv
            .merkle_root_at(height)
            .ok_or(Error::MissingHeader(height))?;
        let tx_hash = tx.hash();
        if proof.compute_root(tx_hash) != root {
            return Err(Error::InvalidMerkleProof(tx_hash));
        }
        Ok(())
    }
}

/// Watches mining notifications for an auxiliary-PoW side chain.
///
/// The heavy lifting lives in the external mining helper; this listener
/// only records that fresh pow work was committed for the chain.
#[derive(Debug, Clone)]
pub struct AuxpowListener<M> {
    miner: M,
    /// The mining payout address being watched.
    pub listen_address: String,
    /// The pow side chain the address belongs to.
    pub genesis_address: String,
}

impl<M: crate::auxpow::SideChainMiner> AuxpowListener<M> {
    /// Create a listener for one pow side chain.
    pub fn new(miner: M, listen_address: String, genesis_address: String) -> Self {
        Self { miner, listen_address, genesis_address }
    }

    /// SPV callback: a confirmed transaction paying the mining address.
    pub fn on_received(&self, tx: &Transaction, height: u32) {
        if !tx.outputs.iter().any(|out| out.address == self.listen_address) {
            return;
        }
        tracing::info!(
            genesis = %self.genesis_address,
            height,
            "observed side mining notification"
        );
        self.miner.update_notify_height(&self.genesis_address, height);
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::DbRead as _;
    use crate::testing;
    use crate::testing::dummy;
    use crate::testing::TestSpv;

    use super::*;

    fn observer_setup() -> (testing::TestHarness, TestSpv) {
        (testing::TestHarness::new(5, 46), TestSpv::default())
    }

    #[tokio::test]
    async fn redelivery_stages_exactly_one_row() {
        let (harness, spv) = observer_setup();
        let context = harness.context(0);
        let (tx, proof) = dummy::confirmed_deposit(b"dep", "gY", &spv, 100);
        spv.set_best_height(120);

        let observer = DepositObserver::new(context.clone(), spv);
        observer.on_received(&tx, &proof, 100).await.unwrap();
        observer.on_received(&tx, &proof, 100).await.unwrap();

        let db = context.get_storage();
        assert_eq!(db.pending_deposits("gY").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unconfirmed_deposit_is_rejected() {
        let (harness, spv) = observer_setup();
        let (tx, proof) = dummy::confirmed_deposit(b"dep", "gY", &spv, 100);
        spv.set_best_height(101);

        let observer = DepositObserver::new(harness.context(0), spv);
        let result = observer.on_received(&tx, &proof, 100).await;
        assert!(matches!(
            result,
            Err(Error::InsufficientConfirmations { .. })
        ));
    }

    #[tokio::test]
    async fn bad_proof_is_rejected() {
        let (harness, spv) = observer_setup();
        let context = harness.context(0);
        let (tx, mut proof) = dummy::confirmed_deposit(b"dep", "gY", &spv, 100);
        spv.set_best_height(120);
        proof.branch[0] = Hash256::digest(b"tampered");

        let observer = DepositObserver::new(context.clone(), spv);
        let result = observer.on_received(&tx, &proof, 100).await;
        assert!(matches!(result, Err(Error::InvalidMerkleProof(_))));
        assert!(context
            .get_storage()
            .pending_deposits("gY")
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn auxpow_listener_records_notify_heights() {
        #[derive(Clone, Default)]
        struct RecordingMiner(std::sync::Arc<std::sync::Mutex<Vec<(String, u32)>>>);

        impl crate::auxpow::SideChainMiner for RecordingMiner {
            async fn start_mining(&self, _: &str, _: &str) -> Result<(), Error> {
                Ok(())
            }

            async fn submit_aux_pow(
                &self,
                _: &str,
                _: &Hash256,
                _: &crate::auxpow::SideAuxPow,
            ) -> Result<(), Error> {
                Ok(())
            }

            fn update_notify_height(&self, genesis_address: &str, height: u32) {
                self.0
                    .lock()
                    .unwrap()
                    .push((genesis_address.to_string(), height));
            }
        }

        let miner = RecordingMiner::default();
        let listener = AuxpowListener::new(miner.clone(), "miningAddr".into(), "gP".into());

        let mut tx = dummy::deposit_tx(b"pow", "gP");
        tx.outputs[0].address = "miningAddr".into();
        listener.on_received(&tx, 300);

        // A transaction paying someone else is ignored.
        let other = dummy::deposit_tx(b"other", "gP");
        listener.on_received(&other, 301);

        assert_eq!(*miner.0.lock().unwrap(), vec![("gP".to_string(), 300)]);
    }

    #[tokio::test]
    async fn rollback_unstages_rolled_back_deposits() {
        let (harness, spv) = observer_setup();
        let context = harness.context(0);
        let (tx, proof) = dummy::confirmed_deposit(b"dep", "gY", &spv, 100);
        spv.set_best_height(120);

        let observer = DepositObserver::new(context.clone(), spv);
        observer.on_received(&tx, &proof, 100).await.unwrap();
        observer.on_rollback(100).await.unwrap();

        let db = context.get_storage();
        assert!(db.pending_deposits("gY").await.unwrap().is_empty());
    }
}
