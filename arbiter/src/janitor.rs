//! # Janitor
//!
//! Periodic reconciliation between the staging tables and the chains.
//! Anything the chains already report as included is moved from pending
//! to finished, which recovers from every lost remove-after-submit
//! write. One pass runs at startup, then one per `clear_interval`; RPC
//! errors are swallowed and retried next tick.

use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::error::Error;
use crate::rpc::MainChainRpc;
use crate::rpc::SideChainRpc;
use crate::side_chain::SideChainManager;
use crate::storage::model::FinishedKind;
use crate::storage::DbRead as _;
use crate::storage::DbWrite as _;

/// The reconciliation loop.
pub struct Janitor<C, M, R> {
    /// The arbiter context.
    pub context: C,
    /// The main-chain RPC handle.
    pub main_rpc: M,
    /// The registered side chains.
    pub side_chains: Arc<SideChainManager<R>>,
}

impl<C, M, R> Janitor<C, M, R>
where
    C: Context,
    M: MainChainRpc,
    R: SideChainRpc,
{
    /// Run reconciliation passes until shutdown.
    #[tracing::instrument(skip_all, name = "janitor")]
    pub async fn run(self) -> Result<(), Error> {
        let interval = Duration::from_millis(self.context.config().arbiter.clear_interval_ms);
        let mut term = self.context.get_termination_handle();

        let sweep = async {
            loop {
                self.pass().await;
                tokio::time::sleep(interval).await;
            }
        };

        tokio::select! {
            _ = term.wait_for_shutdown() => {
                tracing::info!("janitor received shutdown signal");
            }
            _ = sweep => {}
        }
        Ok(())
    }

    /// One reconciliation pass over both staging directions.
    pub async fn pass(&self) {
        if let Err(error) = self.reconcile_deposits().await {
            tracing::warn!(%error, "could not reconcile deposits; will retry next tick");
        }
        if let Err(error) = self.reconcile_withdrawals().await {
            tracing::warn!(%error, "could not reconcile withdrawals; will retry next tick");
        }
        tracing::debug!("staging reconciliation pass finished");
    }

    /// Move pending deposits the side chains already processed to
    /// finished-succeeded.
    async fn reconcile_deposits(&self) -> Result<(), Error> {
        let db = self.context.get_storage_mut();
        for chain in self.side_chains.all_chains() {
            let genesis = chain.genesis_address();
            let rows = db.pending_deposits(genesis).await?;
            if rows.is_empty() {
                continue;
            }

            let hashes: Vec<_> = rows.iter().map(|row| row.main_tx_hash).collect();
            let included = chain.rpc().get_exist_deposit_transactions(&hashes).await?;
            if included.is_empty() {
                continue;
            }

            let keys: Vec<_> = included
                .iter()
                .map(|hash| (*hash, genesis.to_string()))
                .collect();
            db.finish_deposits(&keys, FinishedKind::DepositSucceeded).await?;
            tracing::info!(
                genesis,
                count = keys.len(),
                "moved chain-included deposits to finished"
            );
        }
        Ok(())
    }

    /// Move pending withdrawals the main chain already settled to
    /// finished.
    async fn reconcile_withdrawals(&self) -> Result<(), Error> {
        let db = self.context.get_storage_mut();
        for chain in self.side_chains.all_chains() {
            let genesis = chain.genesis_address();
            let (hashes, _) = db.withdrawal_hashes_and_heights(genesis).await?;
            if hashes.is_empty() {
                continue;
            }

            let included = self.main_rpc.get_exist_withdraw_transactions(&hashes).await?;
            if included.is_empty() {
                continue;
            }

            db.finish_withdrawals(&included).await?;
            tracing::info!(
                genesis,
                count = included.len(),
                "moved chain-settled withdrawals to finished"
            );
        }
        Ok(())
    }
}
