//! # Withdraw observer
//!
//! A per-side-chain poll loop. Every tick it fetches the chain tip,
//! walks the blocks it has not seen yet, extracts user withdraw
//! transactions, and stages them in the store. Staging is idempotent,
//! so re-walking a block after a crash is harmless.

use std::time::Duration;

use crate::context::ArbiterEvent;
use crate::context::Context;
use crate::error::Error;
use crate::rpc::SideChainRpc;
use crate::storage::model::PendingWithdrawal;
use crate::storage::DbWrite as _;
use crate::transaction::WithdrawRecord;

/// Polls one side chain for user withdraw transactions.
pub struct WithdrawObserver<C, R> {
    /// The arbiter context.
    pub context: C,
    /// The side chain's RPC handle.
    pub rpc: R,
    /// The chain being observed.
    pub genesis_address: String,
    /// The next height to walk.
    pub next_height: u32,
}

impl<C, R> WithdrawObserver<C, R>
where
    C: Context,
    R: SideChainRpc,
{
    /// Run the poll loop until shutdown.
    #[tracing::instrument(skip_all, fields(genesis = %self.genesis_address), name = "withdraw-observer")]
    pub async fn run(mut self) -> Result<(), Error> {
        let interval =
            Duration::from_millis(self.context.config().arbiter.withdraw_poll_interval_ms);
        let mut term = self.context.get_termination_handle();

        let poll = async {
            loop {
                if let Err(error) = self.poll_once().await {
                    // RPC problems are transient; try again next tick.
                    tracing::warn!(%error, "withdraw poll failed; will retry");
                }
                tokio::time::sleep(interval).await;
            }
        };

        tokio::select! {
            _ = term.wait_for_shutdown() => {
                tracing::info!("withdraw observer received shutdown signal");
            }
            _ = poll => {}
        }
        Ok(())
    }

    /// Walk every block between our cursor and the chain tip.
    pub async fn poll_once(&mut self) -> Result<(), Error> {
        let tip = self.rpc.get_current_height().await?;
        while self.next_height <= tip {
            let height = self.next_height;
            let block = self.rpc.get_block_by_height(height).await?;
            self.stage_withdrawals(&block.withdraw_txs, height).await?;
            self.next_height += 1;
        }
        Ok(())
    }

    /// Stage the withdraw transactions of one block.
    async fn stage_withdrawals(
        &self,
        records: &[WithdrawRecord],
        block_height: u32,
    ) -> Result<(), Error> {
        if records.is_empty() {
            return Ok(());
        }

        let rows: Vec<PendingWithdrawal> = records
            .iter()
            .map(|record| PendingWithdrawal {
                side_tx_hash: record.txid,
                genesis_address: self.genesis_address.clone(),
                raw_record: crate::codec::Encode::encode_to_vec(record),
                block_height,
            })
            .collect();

        let inserted = self
            .context
            .get_storage_mut()
            .add_pending_withdrawals(&rows)
            .await?;
        if inserted > 0 {
            tracing::info!(inserted, block_height, "staged withdraw transactions");
            metrics::counter!(crate::metrics::WITHDRAWALS_STAGED_TOTAL).increment(inserted as u64);
            self.context.signal(
                ArbiterEvent::WithdrawalsStaged {
                    genesis_address: self.genesis_address.clone(),
                }
                .into(),
            )?;
        }
        Ok(())
    }
}
