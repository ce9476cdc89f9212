//! The signed-proposal envelope exchanged between arbiters.
//!
//! One envelope type serves both directions of the signing protocol: the
//! leader broadcasts it without a feedback signature, and followers send
//! it back with their signature attached. The presence of the signature
//! is what distinguishes a proposal from feedback on the shared command
//! channel.

use std::io;

use crate::codec::{self, Decode, Encode};
use crate::error::Error;
use crate::keys::ProgramHash;
use crate::keys::PublicKey;
use crate::keys::Signature;
use crate::keys::PUBLIC_KEY_LENGTH;
use crate::keys::SIGNATURE_LENGTH;
use crate::multisig::SIGNATURE_SCRIPT_LENGTH;
use crate::transaction::Hash256;
use crate::transaction::Transaction;

/// The P2P command carrying withdraw-transaction proposals.
pub const WITHDRAW_PROPOSAL_COMMAND: &str = "withdraw_proposal";

/// The P2P command carrying illegal-evidence proposals.
pub const ILLEGAL_EVIDENCE_COMMAND: &str = "illegal_evidence";

/// Evidence that a side chain signed conflicting data, submitted to the
/// main chain once enough arbiters have co-signed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalData {
    /// The class of misbehavior.
    pub illegal_type: u8,
    /// The side-chain height the evidence was produced at.
    pub height: u32,
    /// The compressed key of the offending signer.
    pub illegal_signer: Vec<u8>,
    /// The side chain the evidence concerns.
    pub genesis_address: String,
    /// The offending data.
    pub evidence: Vec<u8>,
    /// The conflicting data it is compared against.
    pub compare_evidence: Vec<u8>,
    /// Accumulated arbiter signatures over the unsigned form.
    pub signs: Vec<Signature>,
}

impl IllegalData {
    /// Encode everything except the signature list; the preimage for
    /// [`IllegalData::hash`] and for arbiter signatures.
    pub fn encode_unsigned<W: io::Write>(&self, w: &mut W) -> Result<(), Error> {
        codec::write_u8(w, self.illegal_type)?;
        codec::write_u32(w, self.height)?;
        codec::write_var_bytes(w, &self.illegal_signer)?;
        codec::write_var_string(w, &self.genesis_address)?;
        codec::write_var_bytes(w, &self.evidence)?;
        codec::write_var_bytes(w, &self.compare_evidence)
    }

    /// The unsigned serialization as a vector.
    pub fn unsigned_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        #[allow(clippy::expect_used)]
        self.encode_unsigned(&mut buf)
            .expect("encoding into a Vec failed");
        buf
    }

    /// Double-SHA256 of the unsigned form.
    pub fn hash(&self) -> Hash256 {
        Hash256::digest(&self.unsigned_bytes())
    }
}

impl Encode for IllegalData {
    fn encode<W: io::Write>(&self, w: &mut W) -> Result<(), Error> {
        self.encode_unsigned(w)?;
        codec::write_u32(w, self.signs.len() as u32)?;
        for sign in &self.signs {
            codec::write_bytes(w, &sign.0)?;
        }
        Ok(())
    }
}

impl Decode for IllegalData {
    fn decode<R: io::Read>(r: &mut R) -> Result<Self, Error> {
        let illegal_type = codec::read_u8(r)?;
        let height = codec::read_u32(r)?;
        let illegal_signer = codec::read_var_bytes(r)?;
        let genesis_address = codec::read_var_string(r)?;
        let evidence = codec::read_var_bytes(r)?;
        let compare_evidence = codec::read_var_bytes(r)?;
        let count = codec::read_count(r)?;
        let mut signs = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            signs.push(Signature(codec::read_array::<SIGNATURE_LENGTH, _>(r)?));
        }
        Ok(Self {
            illegal_type,
            height,
            illegal_signer,
            genesis_address,
            evidence,
            compare_evidence,
            signs,
        })
    }
}

/// The item being put to the committee for signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalPayload {
    /// A main-chain settlement transaction spending the multisig bank.
    WithdrawTx(Transaction),
    /// Side-chain illegal evidence.
    IllegalEvidence(IllegalData),
}

impl ProposalPayload {
    /// The payload kind byte on the wire.
    pub fn kind(&self) -> u8 {
        match self {
            ProposalPayload::WithdrawTx(_) => 1,
            ProposalPayload::IllegalEvidence(_) => 2,
        }
    }

    /// The P2P command string the payload travels under.
    pub fn command(&self) -> &'static str {
        match self {
            ProposalPayload::WithdrawTx(_) => WITHDRAW_PROPOSAL_COMMAND,
            ProposalPayload::IllegalEvidence(_) => ILLEGAL_EVIDENCE_COMMAND,
        }
    }

    /// The content address: the hash of the unsigned serialization.
    pub fn hash(&self) -> Hash256 {
        match self {
            ProposalPayload::WithdrawTx(tx) => tx.hash(),
            ProposalPayload::IllegalEvidence(data) => data.hash(),
        }
    }

    /// The unsigned bytes a follower signs.
    pub fn unsigned_bytes(&self) -> Vec<u8> {
        match self {
            ProposalPayload::WithdrawTx(tx) => tx.unsigned_bytes(),
            ProposalPayload::IllegalEvidence(data) => data.unsigned_bytes(),
        }
    }
}

/// The proposal envelope.
///
/// On origination `feedback_signature` is `None` and the signer fields
/// identify the leader. On feedback they identify the responding
/// follower and `feedback_signature` carries its signature over the
/// payload's unsigned bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedProposal {
    /// The item being signed.
    pub payload: ProposalPayload,
    /// The sending arbiter's key.
    pub signer_key: PublicKey,
    /// The sending arbiter's program hash, matched against committee
    /// order to resolve the signer index.
    pub signer_hash: ProgramHash,
    /// Present on feedback only.
    pub feedback_signature: Option<Signature>,
}

impl DistributedProposal {
    /// Whether this envelope is follower feedback.
    pub fn is_feedback(&self) -> bool {
        self.feedback_signature.is_some()
    }
}

impl Encode for DistributedProposal {
    fn encode<W: io::Write>(&self, w: &mut W) -> Result<(), Error> {
        codec::write_u8(w, self.payload.kind())?;
        let body = match &self.payload {
            ProposalPayload::WithdrawTx(tx) => tx.encode_to_vec(),
            ProposalPayload::IllegalEvidence(data) => data.encode_to_vec(),
        };
        codec::write_var_bytes(w, &body)?;
        codec::write_bytes(w, &self.signer_key.serialize())?;
        codec::write_bytes(w, &self.signer_hash.0)?;
        if let Some(signature) = &self.feedback_signature {
            codec::write_u8(w, SIGNATURE_LENGTH as u8)?;
            codec::write_bytes(w, &signature.0)?;
        }
        Ok(())
    }
}

impl Decode for DistributedProposal {
    fn decode<R: io::Read>(r: &mut R) -> Result<Self, Error> {
        let kind = codec::read_u8(r)?;
        let body = codec::read_var_bytes(r)?;
        let payload = match kind {
            1 => ProposalPayload::WithdrawTx(Transaction::decode_all(&body)?),
            2 => ProposalPayload::IllegalEvidence(IllegalData::decode_all(&body)?),
            _ => return Err(Error::Malformed("unknown proposal payload kind")),
        };
        let key_bytes = codec::read_array::<PUBLIC_KEY_LENGTH, _>(r)?;
        let signer_key = PublicKey::from_slice(&key_bytes)?;
        let signer_hash = ProgramHash(codec::read_array(r)?);

        let mut rest = Vec::new();
        r.read_to_end(&mut rest).map_err(Error::CodecIo)?;
        let feedback_signature = match rest.len() {
            0 => None,
            SIGNATURE_SCRIPT_LENGTH => {
                if rest[0] as usize != SIGNATURE_LENGTH {
                    return Err(Error::Malformed("feedback signature length byte"));
                }
                Some(Signature::from_slice(&rest[1..])?)
            }
            _ => return Err(Error::Malformed("feedback signature length")),
        };

        Ok(Self {
            payload,
            signer_key,
            signer_hash,
            feedback_signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng as _;

    use crate::keys::PrivateKey;
    use crate::keys::SignData as _;
    use crate::multisig::Committee;
    use crate::testing::dummy;

    use super::*;

    fn sample_committee() -> (Vec<PrivateKey>, Committee) {
        let mut rng = rand::rngs::StdRng::seed_from_u64(46);
        let secrets: Vec<PrivateKey> = (0..5).map(|_| PrivateKey::new(&mut rng)).collect();
        let committee = Committee::new(secrets.iter().map(|s| s.public_key()).collect()).unwrap();
        (secrets, committee)
    }

    #[test]
    fn proposal_envelope_round_trip() {
        let (secrets, committee) = sample_committee();
        let key = secrets[0].public_key();
        let envelope = DistributedProposal {
            payload: ProposalPayload::WithdrawTx(dummy::withdrawal_tx(&committee)),
            signer_key: key,
            signer_hash: key.program_hash(),
            feedback_signature: None,
        };

        let decoded = DistributedProposal::decode_all(&envelope.encode_to_vec()).unwrap();
        assert_eq!(decoded, envelope);
        assert!(!decoded.is_feedback());
    }

    #[test]
    fn feedback_envelope_round_trip() {
        let (secrets, committee) = sample_committee();
        let tx = dummy::withdrawal_tx(&committee);
        let signature = secrets[1].sign(&tx.unsigned_bytes());
        let key = secrets[1].public_key();
        let envelope = DistributedProposal {
            payload: ProposalPayload::WithdrawTx(tx),
            signer_key: key,
            signer_hash: key.program_hash(),
            feedback_signature: Some(signature),
        };

        let decoded = DistributedProposal::decode_all(&envelope.encode_to_vec()).unwrap();
        assert_eq!(decoded, envelope);
        assert!(decoded.is_feedback());
    }

    #[test]
    fn truncated_signature_is_malformed() {
        let (secrets, committee) = sample_committee();
        let key = secrets[0].public_key();
        let envelope = DistributedProposal {
            payload: ProposalPayload::WithdrawTx(dummy::withdrawal_tx(&committee)),
            signer_key: key,
            signer_hash: key.program_hash(),
            feedback_signature: None,
        };

        let mut bytes = envelope.encode_to_vec();
        bytes.push(0x40);
        assert!(DistributedProposal::decode_all(&bytes).is_err());
    }

    #[test]
    fn illegal_evidence_hash_excludes_signs() {
        let mut data = IllegalData {
            illegal_type: 1,
            height: 77,
            illegal_signer: vec![2u8; 33],
            genesis_address: "gY".into(),
            evidence: b"block a".to_vec(),
            compare_evidence: b"block b".to_vec(),
            signs: Vec::new(),
        };
        let before = data.hash();
        data.signs.push(Signature([5u8; SIGNATURE_LENGTH]));
        assert_eq!(data.hash(), before);

        let decoded = IllegalData::decode_all(&data.encode_to_vec()).unwrap();
        assert_eq!(decoded, data);
    }
}
