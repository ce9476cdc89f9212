//! # Transaction coordinator
//!
//! The leader half of the distributed signing protocol, running on every
//! node but only originating proposals while the node holds duty.
//!
//! A proposal moves through `Origin -> Broadcasting -> Collecting ->
//! Submitting -> Final`, keyed by the hash of its unsigned serialization
//! in the `unsolved` map. All map transitions happen under the map's
//! mutex; signature verification runs on a local clone outside it. The
//! threshold transition is monotonic: the entry is removed atomically
//! with the decision to submit, so exactly one submit fires per
//! proposal.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::codec::Decode as _;
use crate::codec::Encode as _;
use crate::context::ArbiterCommand;
use crate::context::ArbiterEvent;
use crate::context::ArbiterSignal;
use crate::context::Context;
use crate::duty::DutyOracle;
use crate::error::Error;
use crate::keys::SignData;
use crate::message::DistributedProposal;
use crate::message::ProposalPayload;
use crate::message::ILLEGAL_EVIDENCE_COMMAND;
use crate::message::WITHDRAW_PROPOSAL_COMMAND;
use crate::multisig;
use crate::multisig::Committee;
use crate::network::MessageTransfer;
use crate::network::Msg;
use crate::rpc;
use crate::rpc::MainChainRpc;
use crate::rpc::SideChainRpc;
use crate::side_chain::SideChainManager;
use crate::storage::DbWrite as _;
use crate::transaction::Hash256;
use crate::transaction::Payload;

/// The leader event loop.
pub struct TxCoordinatorEventLoop<C, N, M, R, K> {
    /// The arbiter context.
    pub context: C,
    /// Interface to the arbiter network.
    pub network: N,
    /// The main-chain RPC handle used for final submission.
    pub main_rpc: M,
    /// The registered side chains, used for evidence submission.
    pub side_chains: Arc<SideChainManager<R>>,
    /// The local signing capability.
    pub signer: K,
    /// The committee for the current epoch.
    pub committee: Committee,
    /// The duty oracle gating proposal origination.
    pub duty: Arc<DutyOracle<C>>,
    /// Proposals collecting signatures, keyed by unsigned-form hash.
    pub unsolved: Mutex<HashMap<Hash256, ProposalPayload>>,
    /// Terminal proposal outcomes: `true` for submitted, `false` for
    /// terminally rejected.
    pub finished: Mutex<HashMap<Hash256, bool>>,
}

impl<C, N, M, R, K> TxCoordinatorEventLoop<C, N, M, R, K>
where
    C: Context,
    N: MessageTransfer + Clone,
    M: MainChainRpc,
    R: SideChainRpc,
    K: SignData,
{
    /// Run the coordinator event loop.
    #[tracing::instrument(
        skip_all,
        fields(public_key = %self.signer.public_key()),
        name = "tx-coordinator"
    )]
    pub async fn run(mut self) -> Result<(), Error> {
        let mut signal_rx = self.context.get_signal_receiver();
        let mut term = self.context.get_termination_handle();
        // A dedicated receive handle keeps the network future's borrow
        // away from the handlers below.
        let mut network_rx = self.network.clone();

        loop {
            tokio::select! {
                _ = term.wait_for_shutdown() => break,
                signal = signal_rx.recv() => match signal {
                    Ok(ArbiterSignal::Command(ArbiterCommand::ProposeTransaction(tx))) => {
                        let payload = ProposalPayload::WithdrawTx(tx);
                        if let Err(error) = self.broadcast_proposal(payload).await {
                            tracing::warn!(%error, "could not originate proposal");
                        }
                    }
                    Ok(ArbiterSignal::Command(ArbiterCommand::ProposeEvidence(data))) => {
                        let payload = ProposalPayload::IllegalEvidence(data);
                        if let Err(error) = self.broadcast_proposal(payload).await {
                            tracing::warn!(%error, "could not originate evidence proposal");
                        }
                    }
                    Ok(ArbiterSignal::Event(ArbiterEvent::DutyChanged(false))) => {
                        self.cancel_unsolved();
                    }
                    Ok(_) => {}
                    // A lagged broadcast stream; continue and hope for
                    // the best next time.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "coordinator lagged the signal stream");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                msg = network_rx.receive() => match msg {
                    Ok(msg) => {
                        if let Err(error) = self.handle_network_message(msg).await {
                            tracing::debug!(%error, "dropped network message");
                        }
                    }
                    Err(error) => {
                        tracing::error!(%error, "network receive failed");
                    }
                },
            }
        }

        tracing::info!("transaction coordinator event loop has been stopped");
        Ok(())
    }

    /// Originate a proposal: self-sign, register it as unsolved, and
    /// fan it out to the committee.
    pub async fn broadcast_proposal(&mut self, payload: ProposalPayload) -> Result<(), Error> {
        if !self.duty.is_on_duty() {
            return Err(Error::ProposerNotOnDuty);
        }

        let hash = payload.hash();
        {
            let unsolved = self.unsolved.lock().unwrap_or_else(|e| e.into_inner());
            if unsolved.contains_key(&hash) {
                return Err(Error::DuplicateProposal(hash));
            }
        }

        // Self-sign outside the map mutex.
        let local_index = self.duty.local_index();
        let signature = self.signer.sign(&payload.unsigned_bytes());
        let signed = match payload {
            ProposalPayload::WithdrawTx(mut tx) => {
                multisig::merge_signature(&mut tx, local_index, signature, &self.committee)?;
                ProposalPayload::WithdrawTx(tx)
            }
            ProposalPayload::IllegalEvidence(mut data) => {
                data.signs = vec![signature];
                ProposalPayload::IllegalEvidence(data)
            }
        };

        let envelope = DistributedProposal {
            payload: signed.clone(),
            signer_key: self.signer.public_key(),
            signer_hash: self.signer.public_key().program_hash(),
            feedback_signature: None,
        };
        let msg = Msg::new(signed.command(), envelope.encode_to_vec());

        self.unsolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(hash, signed);

        tracing::info!(%hash, "broadcasting proposal");
        self.network.broadcast(msg).await?;
        Ok(())
    }

    /// Route an incoming message on one of the proposal command
    /// channels. Only feedback concerns the leader role; origination
    /// envelopes are the follower's business.
    async fn handle_network_message(&mut self, msg: Msg) -> Result<(), Error> {
        if msg.command != WITHDRAW_PROPOSAL_COMMAND && msg.command != ILLEGAL_EVIDENCE_COMMAND {
            return Ok(());
        }
        let envelope = DistributedProposal::decode_all(&msg.payload)?;
        if !envelope.is_feedback() {
            return Ok(());
        }
        self.receive_proposal_feedback(envelope).await
    }

    /// Merge one follower signature and submit once the threshold is
    /// reached.
    pub async fn receive_proposal_feedback(
        &mut self,
        envelope: DistributedProposal,
    ) -> Result<(), Error> {
        let hash = envelope.payload.hash();
        let Some(signature) = envelope.feedback_signature else {
            return Err(Error::Malformed("feedback without signature"));
        };

        // Resolve the follower to its signer index by program hash.
        if envelope.signer_key.program_hash() != envelope.signer_hash {
            return Err(Error::BadSigner(envelope.signer_hash));
        }
        let signer_index = self
            .committee
            .signer_index(&envelope.signer_hash)
            .ok_or(Error::BadSigner(envelope.signer_hash))?;

        // Clone the in-flight payload out of the map; verification and
        // merging must not run under the mutex.
        let current = {
            let unsolved = self.unsolved.lock().unwrap_or_else(|e| e.into_inner());
            unsolved.get(&hash).cloned()
        };
        // Feedback for a proposal we did not originate (or that has
        // already been solved) is not ours to process.
        let Some(current) = current else {
            return Err(Error::UnknownProposal(hash));
        };

        let (merged, count) = match current {
            ProposalPayload::WithdrawTx(mut tx) => {
                match multisig::merge_signature(&mut tx, signer_index, signature, &self.committee)
                {
                    Ok(count) => (ProposalPayload::WithdrawTx(tx), count),
                    // Duplicate feedback is normal and benign.
                    Err(Error::AlreadySigned(index)) => {
                        tracing::debug!(%hash, signer = index, "duplicate feedback dropped");
                        return Ok(());
                    }
                    Err(error) => return Err(error),
                }
            }
            ProposalPayload::IllegalEvidence(mut data) => {
                let unsigned = data.unsigned_bytes();
                let Some(key) = self.committee.key(signer_index) else {
                    return Err(Error::BadSigner(envelope.signer_hash));
                };
                if !key.verify(&unsigned, &signature) {
                    return Err(Error::InvalidSignature(signer_index));
                }
                if data.signs.contains(&signature) {
                    tracing::debug!(%hash, signer = signer_index, "duplicate feedback dropped");
                    return Ok(());
                }
                data.signs.push(signature);
                let count = data.signs.len();
                (ProposalPayload::IllegalEvidence(data), count)
            }
        };

        metrics::counter!(crate::metrics::SIGNATURES_MERGED_TOTAL).increment(1);
        tracing::debug!(%hash, signer = signer_index, count, "merged feedback signature");

        // Re-acquire the map and either store the merged state or, at
        // threshold, take the entry out. Removing it here is what makes
        // the submit transition fire exactly once.
        let ready = {
            let mut unsolved = self.unsolved.lock().unwrap_or_else(|e| e.into_inner());
            if !unsolved.contains_key(&hash) {
                // Cancelled while we were verifying.
                return Ok(());
            }
            if count >= self.committee.threshold() {
                unsolved.remove(&hash);
                true
            } else {
                unsolved.insert(hash, merged.clone());
                false
            }
        };

        if ready {
            self.submit(hash, merged).await;
        }
        Ok(())
    }

    /// Submit a fully-signed proposal to its destination chain.
    async fn submit(&mut self, hash: Hash256, payload: ProposalPayload) {
        let result = match &payload {
            ProposalPayload::WithdrawTx(tx) => {
                self.main_rpc.send_raw_transaction(&tx.encode_to_vec()).await.map(|_| ())
            }
            ProposalPayload::IllegalEvidence(data) => {
                match self.side_chains.get_chain(&data.genesis_address) {
                    Ok(chain) => chain.rpc().submit_illegal_data(&data.encode_to_vec()).await,
                    Err(error) => Err(error),
                }
            }
        };

        match result {
            Ok(()) => self.finalize_submitted(hash, &payload).await,
            Err(ref error) if rpc::is_duplicate_tx_error(error) => {
                tracing::info!(%hash, "settlement was already known; treating as submitted");
                self.finalize_submitted(hash, &payload).await;
            }
            Err(ref error) if rpc::is_invalid_tx_error(error) => {
                tracing::error!(%hash, %error, "settlement rejected as invalid");
                self.finished
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(hash, false);
            }
            Err(error) => {
                // Transient: put the proposal back so the next feedback
                // or duty tick retries; the janitor reconciles if the
                // transaction actually landed.
                tracing::warn!(%hash, %error, "submit failed; retaining proposal for retry");
                self.unsolved
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(hash, payload);
            }
        }
    }

    /// Record a successful submission and move the settled staging rows
    /// to the finished table.
    async fn finalize_submitted(&mut self, hash: Hash256, payload: &ProposalPayload) {
        self.finished
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(hash, true);
        metrics::counter!(crate::metrics::PROPOSALS_SUBMITTED_TOTAL).increment(1);

        if let ProposalPayload::WithdrawTx(tx) = payload {
            if let Payload::WithdrawFromSideChain { side_tx_hashes, .. } = &tx.payload {
                let db = self.context.get_storage_mut();
                if let Err(error) = db.finish_withdrawals(side_tx_hashes).await {
                    // The janitor re-syncs the staging tables at the
                    // next pass, so a lost write here is recoverable.
                    tracing::warn!(%error, "could not move withdrawals to finished");
                }
            }
        }

        tracing::info!(%hash, "proposal submitted");
        let _ = self
            .context
            .signal(ArbiterEvent::ProposalSubmitted { hash }.into());
    }

    /// Duty was lost: abandon every proposal we originated. The staged
    /// rows stay pending and will be re-proposed by the new leader.
    pub fn cancel_unsolved(&mut self) {
        let mut unsolved = self.unsolved.lock().unwrap_or_else(|e| e.into_inner());
        if !unsolved.is_empty() {
            tracing::info!(count = unsolved.len(), "cancelling unsolved proposals on duty loss");
            unsolved.clear();
        }
    }
}
