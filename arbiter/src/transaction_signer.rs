//! # Transaction signer
//!
//! The follower half of the distributed signing protocol. Every node
//! runs it for every received proposal: validate that the proposer is
//! the on-duty arbiter and the payload is well-formed, sign the unsigned
//! serialization with the local key, and broadcast the feedback
//! envelope.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::codec::Decode as _;
use crate::codec::Encode as _;
use crate::context::ArbiterEvent;
use crate::context::ArbiterSignal;
use crate::context::Context;
use crate::deposit_observer::SpvView;
use crate::error::Error;
use crate::keys::SignData;
use crate::message::DistributedProposal;
use crate::message::ProposalPayload;
use crate::message::ILLEGAL_EVIDENCE_COMMAND;
use crate::message::WITHDRAW_PROPOSAL_COMMAND;
use crate::multisig::Committee;
use crate::network::MessageTransfer;
use crate::network::Msg;
use crate::transaction::Hash256;

/// The follower event loop.
pub struct TxSignerEventLoop<C, N, S, K> {
    /// The arbiter context.
    pub context: C,
    /// Interface to the arbiter network.
    pub network: N,
    /// The SPV view used to determine who holds duty.
    pub spv: S,
    /// The local signing capability.
    pub signer: K,
    /// The committee for the current epoch.
    pub committee: Committee,
    /// Proposals we have already signed, keyed by unsigned-form hash.
    pub unsolved_proposals: Mutex<HashMap<Hash256, DistributedProposal>>,
}

impl<C, N, S, K> TxSignerEventLoop<C, N, S, K>
where
    C: Context,
    N: MessageTransfer + Clone,
    S: SpvView,
    K: SignData,
{
    /// Run the follower event loop.
    #[tracing::instrument(
        skip_all,
        fields(public_key = %self.signer.public_key()),
        name = "tx-signer"
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
                    Ok(ArbiterSignal::Event(ArbiterEvent::DutyChanged(_))) => {
                        self.drop_stale_proposals();
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "signer lagged the signal stream");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                msg = network_rx.receive() => match msg {
                    Ok(msg) => {
                        if let Err(error) = self.handle_network_message(msg).await {
                            tracing::debug!(%error, "dropped proposal message");
                        }
                    }
                    Err(error) => {
                        tracing::error!(%error, "network receive failed");
                    }
                },
            }
        }

        tracing::info!("transaction signer event loop has been stopped");
        Ok(())
    }

    async fn handle_network_message(&mut self, msg: Msg) -> Result<(), Error> {
        if msg.command != WITHDRAW_PROPOSAL_COMMAND && msg.command != ILLEGAL_EVIDENCE_COMMAND {
            return Ok(());
        }
        let envelope = DistributedProposal::decode_all(&msg.payload)?;
        // Feedback envelopes are the coordinator's business.
        if envelope.is_feedback() {
            return Ok(());
        }
        self.on_received_proposal(envelope).await
    }

    /// Validate, sign, and feed back one received proposal.
    pub async fn on_received_proposal(
        &mut self,
        envelope: DistributedProposal,
    ) -> Result<(), Error> {
        let hash = envelope.payload.hash();
        let own_key = self.signer.public_key();
        if envelope.signer_key == own_key {
            return Ok(());
        }

        {
            let unsolved = self
                .unsolved_proposals
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if unsolved.contains_key(&hash) {
                return Err(Error::DuplicateProposalReceived(hash));
            }
        }

        // Only the on-duty arbiter may originate proposals; anything
        // else is dropped silently.
        let height = self.spv.best_height();
        if self.committee.on_duty_key(height) != &envelope.signer_key
            || envelope.signer_key.program_hash() != envelope.signer_hash
        {
            tracing::debug!(%hash, "proposal from off-duty arbiter dropped");
            return Err(Error::ProposerNotOnDuty);
        }

        self.check_well_formed(&envelope.payload)?;

        // Sign the unsigned serialization and echo the payload back
        // wrapped with our identity.
        let signature = self.signer.sign(&envelope.payload.unsigned_bytes());
        let feedback = DistributedProposal {
            payload: envelope.payload.clone(),
            signer_key: own_key,
            signer_hash: own_key.program_hash(),
            feedback_signature: Some(signature),
        };
        let msg = Msg::new(feedback.payload.command(), feedback.encode_to_vec());

        self.unsolved_proposals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(hash, envelope);

        self.network.broadcast(msg).await?;
        tracing::info!(%hash, "signed proposal and sent feedback");
        self.context
            .signal(ArbiterEvent::ProposalSigned { hash }.into())?;
        Ok(())
    }

    /// Structural checks on the proposed item.
    fn check_well_formed(&self, payload: &ProposalPayload) -> Result<(), Error> {
        match payload {
            ProposalPayload::WithdrawTx(tx) => {
                let program = tx
                    .programs
                    .first()
                    .ok_or(Error::Malformed("proposal has no witness program"))?;
                if program.code != self.committee.redeem_script() {
                    return Err(Error::Malformed("proposal redeem script mismatch"));
                }
                if tx.outputs.is_empty() {
                    return Err(Error::Malformed("proposal pays nothing"));
                }
                Ok(())
            }
            ProposalPayload::IllegalEvidence(data) => {
                if data.evidence.is_empty() || data.evidence == data.compare_evidence {
                    return Err(Error::Malformed("evidence is not conflicting"));
                }
                Ok(())
            }
        }
    }

    /// Drop proposals that no longer belong to the current duty holder.
    fn drop_stale_proposals(&mut self) {
        let height = self.spv.best_height();
        let current = *self.committee.on_duty_key(height);
        let mut unsolved = self
            .unsolved_proposals
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let before = unsolved.len();
        unsolved.retain(|_, envelope| envelope.signer_key == current);
        let dropped = before - unsolved.len();
        if dropped > 0 {
            tracing::info!(dropped, "dropped proposals from the former leader");
        }
    }
}
