//! # Orchestrator
//!
//! Reacts to duty edges by draining the staging pipelines: pending
//! deposits are recharged on their side chains, pending withdrawals are
//! batched into a settlement proposal for the coordinator, and pow side
//! chains get their mining restarted. Losing duty requires nothing here
//! beyond the cancellation the coordinator and signer already perform.

use std::sync::Arc;

use futures::StreamExt as _;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::auxpow::SideChainMiner;
use crate::context::ArbiterCommand;
use crate::context::ArbiterEvent;
use crate::context::ArbiterSignal;
use crate::context::Context;
use crate::duty::DutyOracle;
use crate::error::Error;
use crate::rpc;
use crate::rpc::MainChainRpc;
use crate::rpc::SideChainRpc;
use crate::side_chain::SideChain;
use crate::side_chain::SideChainManager;
use crate::storage::model::FinishedKind;
use crate::storage::model::PendingDeposit;
use crate::storage::subtract_included;
use crate::storage::DbRead as _;
use crate::storage::DbWrite as _;
use crate::transaction::Hash256;
use crate::transaction::MAX_BLOCK_SIZE;
use crate::tx_builder;

/// The pipeline-draining event loop.
pub struct Orchestrator<C, M, R, Mi> {
    /// The arbiter context.
    pub context: C,
    /// The main-chain RPC handle.
    pub main_rpc: M,
    /// The registered side chains.
    pub side_chains: Arc<SideChainManager<R>>,
    /// The committee for the current epoch.
    pub committee: crate::multisig::Committee,
    /// The duty oracle.
    pub duty: Arc<DutyOracle<C>>,
    /// The pow mining helper.
    pub miner: Mi,
}

impl<C, M, R, Mi> Orchestrator<C, M, R, Mi>
where
    C: Context,
    M: MainChainRpc,
    R: SideChainRpc,
    Mi: SideChainMiner,
{
    /// Run the orchestrator event loop.
    #[tracing::instrument(skip_all, name = "orchestrator")]
    pub async fn run(mut self) -> Result<(), Error> {
        let mut signal_stream = BroadcastStream::new(self.context.get_signal_receiver());
        let mut term = self.context.get_termination_handle();

        let drain = async {
            while let Some(item) = signal_stream.next().await {
                match item {
                    Ok(ArbiterSignal::Event(ArbiterEvent::DutyChanged(true))) => {
                        self.drain_all().await;
                    }
                    Ok(ArbiterSignal::Event(ArbiterEvent::DepositsStaged { genesis_address })) => {
                        if self.duty.is_on_duty() {
                            self.process_deposits(&genesis_address).await;
                        }
                    }
                    Ok(ArbiterSignal::Event(ArbiterEvent::WithdrawalsStaged {
                        genesis_address,
                    })) => {
                        if self.duty.is_on_duty() {
                            self.process_withdrawals(&genesis_address).await;
                        }
                    }
                    Ok(_) => {}
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "orchestrator lagged the signal stream");
                    }
                }
            }
        };

        tokio::select! {
            _ = term.wait_for_shutdown() => {}
            _ = drain => {}
        }

        tracing::info!("orchestrator event loop has been stopped");
        Ok(())
    }

    /// Became on-duty: drain every pipeline.
    async fn drain_all(&mut self) {
        let genesis_addresses: Vec<String> = self
            .side_chains
            .all_chains()
            .iter()
            .map(|chain| chain.genesis_address().to_string())
            .collect();

        for genesis_address in &genesis_addresses {
            self.process_deposits(genesis_address).await;
            self.process_withdrawals(genesis_address).await;
        }
        self.start_side_mining().await;
    }

    /// Drain the pending deposits of one side chain: validate the
    /// recharge build, submit the recharge, and move each row to its
    /// terminal table.
    #[tracing::instrument(skip(self))]
    pub async fn process_deposits(&mut self, genesis_address: &str) {
        if let Err(error) = self.try_process_deposits(genesis_address).await {
            tracing::warn!(%error, genesis = genesis_address, "deposit drain failed");
        }
        let _ = self.context.signal(ArbiterEvent::DepositsProcessed.into());
    }

    async fn try_process_deposits(&mut self, genesis_address: &str) -> Result<(), Error> {
        let chain = self.side_chains.get_chain(genesis_address)?;
        let db = self.context.get_storage_mut();
        let rows = db.pending_deposits(genesis_address).await?;
        if rows.is_empty() {
            return Ok(());
        }

        let settings = self.context.config();
        let exchange_rate = chain.exchange_rate(settings)?;
        let cross_chain_fee = chain.cross_chain_fee(settings)?;

        let mut succeeded: Vec<(Hash256, String)> = Vec::new();
        let mut failed_rows: Vec<PendingDeposit> = Vec::new();
        for row in rows {
            // The recharge build is the local validation gate: rate or
            // fee problems are terminal for the row.
            if let Err(error) =
                tx_builder::build_deposit_recharge(&row, exchange_rate, cross_chain_fee)
            {
                tracing::warn!(
                    %error,
                    tx_hash = %row.main_tx_hash,
                    "recharge cannot be built; marking deposit failed"
                );
                failed_rows.push(row);
                continue;
            }

            match chain.rpc().send_recharge_transaction(&row.main_tx_hash).await {
                Ok(()) => {
                    tracing::info!(tx_hash = %row.main_tx_hash, "recharge accepted");
                    succeeded.push((row.main_tx_hash, row.genesis_address.clone()));
                }
                Err(ref error) if rpc::is_duplicate_tx_error(error) => {
                    tracing::info!(tx_hash = %row.main_tx_hash, "recharge already processed");
                    succeeded.push((row.main_tx_hash, row.genesis_address.clone()));
                }
                Err(ref error) if rpc::is_invalid_tx_error(error) => {
                    tracing::warn!(tx_hash = %row.main_tx_hash, "side chain rejected recharge");
                    failed_rows.push(row);
                }
                Err(error) => {
                    // Transient; the row stays pending for the next tick.
                    tracing::warn!(%error, tx_hash = %row.main_tx_hash, "recharge submit failed");
                }
            }
        }

        if !succeeded.is_empty() {
            db.finish_deposits(&succeeded, FinishedKind::DepositSucceeded).await?;
        }
        if !failed_rows.is_empty() {
            self.return_failed_deposits(chain, &failed_rows, cross_chain_fee).await;
            let keys: Vec<_> = failed_rows
                .iter()
                .map(|row| (row.main_tx_hash, row.genesis_address.clone()))
                .collect();
            db.finish_deposits(&keys, FinishedKind::DepositFailed).await?;
        }
        Ok(())
    }

    /// Propose a settlement returning finally-rejected deposits to
    /// their depositors.
    async fn return_failed_deposits(
        &self,
        chain: &SideChain<R>,
        failures: &[PendingDeposit],
        cross_chain_fee: crate::transaction::Amount,
    ) {
        let side_height = match chain.rpc().get_current_height().await {
            Ok(height) => height,
            Err(error) => {
                tracing::warn!(%error, "could not fetch side height; skipping deposit return");
                return;
            }
        };
        let utxos = match self.main_rpc.get_unspent_outputs(&self.committee.bank_address()).await {
            Ok(utxos) => utxos,
            Err(error) => {
                tracing::warn!(%error, "could not fetch bank utxos; skipping deposit return");
                return;
            }
        };

        match tx_builder::build_failed_deposit_return(
            failures,
            chain.genesis_address(),
            &self.committee,
            &utxos,
            cross_chain_fee,
            side_height,
        ) {
            Ok(tx) => {
                let _ = self
                    .context
                    .signal(ArbiterCommand::ProposeTransaction(tx).into());
            }
            Err(error) => {
                tracing::warn!(%error, "could not build failed-deposit return");
            }
        }
    }

    /// Drain the pending withdrawals of one side chain into a batched
    /// settlement proposal.
    #[tracing::instrument(skip(self))]
    pub async fn process_withdrawals(&mut self, genesis_address: &str) {
        if let Err(error) = self.try_process_withdrawals(genesis_address).await {
            tracing::warn!(%error, genesis = genesis_address, "withdrawal drain failed");
        }
    }

    async fn try_process_withdrawals(&mut self, genesis_address: &str) -> Result<(), Error> {
        let db = self.context.get_storage_mut();
        let (mut hashes, mut heights) = db.withdrawal_hashes_and_heights(genesis_address).await?;
        if hashes.is_empty() {
            return Ok(());
        }

        let cap = self.context.config().arbiter.max_txs_per_withdraw;
        if hashes.len() > cap {
            hashes.truncate(cap);
            heights.truncate(cap);
        }

        // Anything the main chain already settled just needs its
        // staging rows retired.
        let included = self.main_rpc.get_exist_withdraw_transactions(&hashes).await?;
        let (remaining, found) = subtract_included(&hashes, &heights, &included);
        if !found.is_empty() {
            db.finish_withdrawals(&found).await?;
        }
        if remaining.is_empty() {
            return Ok(());
        }

        let remaining_hashes: Vec<_> = remaining.iter().map(|(hash, _)| *hash).collect();
        let rows = db.withdrawals_from_hashes(&remaining_hashes).await?;

        let mut parsed = Vec::with_capacity(rows.len());
        let mut malformed = Vec::new();
        for row in &rows {
            match tx_builder::parse_withdrawal(row) {
                Ok(withdrawal) => parsed.push(withdrawal),
                Err(error) => {
                    tracing::error!(
                        %error,
                        tx_hash = %row.side_tx_hash,
                        "dropping undecodable withdrawal row"
                    );
                    malformed.push(row.side_tx_hash);
                }
            }
        }
        if !malformed.is_empty() {
            db.remove_pending_withdrawals(&malformed).await?;
        }
        if parsed.is_empty() {
            return Ok(());
        }

        let utxos = self
            .main_rpc
            .get_unspent_outputs(&self.committee.bank_address())
            .await?;
        let (tx, used) = tx_builder::build_batched_withdrawal(
            &parsed,
            genesis_address,
            &self.committee,
            &utxos,
            MAX_BLOCK_SIZE,
        )?;
        tracing::info!(
            genesis = genesis_address,
            settled = used,
            pending = parsed.len() - used,
            "proposing withdrawal settlement"
        );
        self.context
            .signal(ArbiterCommand::ProposeTransaction(tx).into())?;
        Ok(())
    }

    /// Restart merged mining for every pow side chain.
    async fn start_side_mining(&self) {
        let settings = self.context.config();
        for chain in self.side_chains.all_chains() {
            if !chain.is_pow_chain(settings) {
                continue;
            }
            let Ok(config) = chain.current_config(settings) else { continue };
            let Some(mining_address) = config.mining_address else { continue };
            if let Err(error) = self
                .miner
                .start_mining(chain.genesis_address(), &mining_address)
                .await
            {
                tracing::warn!(%error, genesis = chain.genesis_address(), "could not start mining");
            }
        }
    }
}
