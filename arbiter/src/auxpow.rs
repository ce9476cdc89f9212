//! Auxiliary-PoW plumbing for merged-mined side chains.
//!
//! The mining helper itself is an external collaborator; the arbiter
//! carries the [`SideAuxPow`] codec so pow work can cross the wire, and
//! drives the helper through the [`SideChainMiner`] capability when duty
//! is gained.

use std::future::Future;
use std::io;

use crate::codec::{self, Decode, Encode};
use crate::error::Error;
use crate::transaction::Hash256;
use crate::transaction::Transaction;

/// Proof that a side-chain block was committed to by main-chain work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideAuxPow {
    /// The main-chain transaction embedding the side block commitment.
    pub side_aux_block_tx: Transaction,
    /// Merkle branch linking the commitment into the main block.
    pub side_aux_merkle_branch: Vec<Hash256>,
    /// Leaf position of the commitment.
    pub side_aux_merkle_index: u32,
    /// The serialized main-chain block header carrying the work.
    pub main_block_header: Vec<u8>,
}

impl Encode for SideAuxPow {
    fn encode<W: io::Write>(&self, w: &mut W) -> Result<(), Error> {
        self.side_aux_block_tx.encode(w)?;
        codec::write_u32(w, self.side_aux_merkle_branch.len() as u32)?;
        for hash in &self.side_aux_merkle_branch {
            hash.encode(w)?;
        }
        codec::write_u32(w, self.side_aux_merkle_index)?;
        codec::write_var_bytes(w, &self.main_block_header)
    }
}

impl Decode for SideAuxPow {
    fn decode<R: io::Read>(r: &mut R) -> Result<Self, Error> {
        let side_aux_block_tx = Transaction::decode(r)?;
        let count = codec::read_count(r)?;
        let mut side_aux_merkle_branch = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            side_aux_merkle_branch.push(Hash256::decode(r)?);
        }
        Ok(Self {
            side_aux_block_tx,
            side_aux_merkle_branch,
            side_aux_merkle_index: codec::read_u32(r)?,
            main_block_header: codec::read_var_bytes(r)?,
        })
    }
}

/// The mining-helper capability for pow side chains.
pub trait SideChainMiner: Clone + Sync + Send + 'static {
    /// Begin producing side blocks for the chain; called on duty gain.
    fn start_mining(
        &self,
        genesis_address: &str,
        mining_address: &str,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Submit solved pow work for a side block.
    fn submit_aux_pow(
        &self,
        genesis_address: &str,
        block_hash: &Hash256,
        aux_pow: &SideAuxPow,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Record that main-chain work referencing the side chain was
    /// observed at `height`.
    fn update_notify_height(&self, genesis_address: &str, height: u32);
}

/// A miner that does nothing. Used for non-pow deployments and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMiner;

impl SideChainMiner for NoopMiner {
    async fn start_mining(&self, genesis_address: &str, _: &str) -> Result<(), Error> {
        tracing::debug!(genesis = %genesis_address, "noop miner asked to start");
        Ok(())
    }

    async fn submit_aux_pow(
        &self,
        _: &str,
        _: &Hash256,
        _: &SideAuxPow,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn update_notify_height(&self, _: &str, _: u32) {}
}
