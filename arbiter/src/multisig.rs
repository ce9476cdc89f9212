//! The committee multisig: redeem-script construction and witness
//! signature merging.
//!
//! The redeem script is a pure function of the ordered committee key list
//! and the agreement threshold; every node must derive byte-identical
//! scripts or the bank address diverges, which is fatal. Signatures are
//! stored in the witness parameter as fixed-stride records, one per
//! signer, ordered by signer index.

use crate::error::Error;
use crate::keys::ProgramHash;
use crate::keys::PublicKey;
use crate::keys::Signature;
use crate::keys::PUBLIC_KEY_LENGTH;
use crate::transaction::Transaction;

/// Script opcode pushing the number 1; N pushes as `OP_1 + N - 1`.
const OP_1: u8 = 0x51;

/// Script opcode for single-signature checks.
pub const OP_CHECKSIG: u8 = 0xAC;

/// Script opcode terminating an M-of-N redeem script.
pub const OP_CHECKMULTISIG: u8 = 0xAE;

/// The stride of one stored signature record in a witness parameter: a
/// length byte followed by the 64-byte compact signature.
pub const SIGNATURE_SCRIPT_LENGTH: usize = 65;

/// The ordered, immutable committee for the current epoch.
///
/// Position in the list is the signer index. The list is capped at 16
/// members by the push-number opcode range of the redeem script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committee {
    keys: Vec<PublicKey>,
    program_hashes: Vec<ProgramHash>,
}

impl Committee {
    /// Build a committee from its ordered key list.
    pub fn new(keys: Vec<PublicKey>) -> Result<Self, Error> {
        if keys.is_empty() || keys.len() > 16 {
            return Err(Error::InvalidConfig(format!(
                "committee must have 1 to 16 members, got {}",
                keys.len()
            )));
        }
        for (i, key) in keys.iter().enumerate() {
            if keys[..i].contains(key) {
                return Err(Error::InvalidConfig(format!("duplicate committee key {key}")));
            }
        }
        let program_hashes = keys.iter().map(PublicKey::program_hash).collect();
        Ok(Self { keys, program_hashes })
    }

    /// The number of committee members.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the committee is empty. It never is; this exists to
    /// satisfy the `len` convention.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The ordered key list.
    pub fn keys(&self) -> &[PublicKey] {
        &self.keys
    }

    /// The key at the given signer index.
    pub fn key(&self, index: usize) -> Option<&PublicKey> {
        self.keys.get(index)
    }

    /// The agreement threshold `T = ceil(2N / 3)`.
    pub fn threshold(&self) -> usize {
        (2 * self.keys.len() + 2) / 3
    }

    /// The signer index of the member with this program hash.
    pub fn signer_index(&self, hash: &ProgramHash) -> Option<usize> {
        self.program_hashes.iter().position(|h| h == hash)
    }

    /// The signer index of the member with this key.
    pub fn index_of(&self, key: &PublicKey) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }

    /// The member on duty at the given main-chain height.
    pub fn on_duty_index(&self, height: u32) -> usize {
        height as usize % self.keys.len()
    }

    /// The key of the member on duty at the given main-chain height.
    pub fn on_duty_key(&self, height: u32) -> &PublicKey {
        &self.keys[self.on_duty_index(height)]
    }

    /// Build the T-of-N redeem script: the threshold as a push-number
    /// opcode, each key as a length-prefixed push in committee order, the
    /// member count, and `OP_CHECKMULTISIG`.
    pub fn redeem_script(&self) -> Vec<u8> {
        let threshold = self.threshold();
        let mut script = Vec::with_capacity(2 + self.keys.len() * (PUBLIC_KEY_LENGTH + 1) + 1);
        script.push(OP_1 + threshold as u8 - 1);
        for key in &self.keys {
            script.push(PUBLIC_KEY_LENGTH as u8);
            script.extend_from_slice(&key.serialize());
        }
        script.push(OP_1 + self.keys.len() as u8 - 1);
        script.push(OP_CHECKMULTISIG);
        script
    }

    /// The address of the multisig bank controlled by this committee.
    pub fn bank_address(&self) -> String {
        ProgramHash::of_script(&self.redeem_script()).to_string()
    }
}

/// Identify which committee member produced `signature` over the
/// unsigned transaction bytes.
fn identify_signer(
    unsigned: &[u8],
    signature: &Signature,
    committee: &Committee,
) -> Option<usize> {
    committee
        .keys()
        .iter()
        .position(|key| key.verify(unsigned, signature))
}

/// Merge a feedback signature into the transaction's witness parameter.
///
/// The signature must verify against the committee key at
/// `signer_index`. Duplicate signatures from the same signer yield
/// [`Error::AlreadySigned`] and leave the witness unchanged. Records are
/// kept in strictly increasing signer-index order regardless of arrival
/// order. Returns the new signature count.
///
/// Verification is CPU-heavy; callers hold no locks while calling this.
pub fn merge_signature(
    tx: &mut Transaction,
    signer_index: usize,
    signature: Signature,
    committee: &Committee,
) -> Result<usize, Error> {
    let key = committee
        .key(signer_index)
        .ok_or(Error::Malformed("signer index out of range"))?;

    let unsigned = tx.unsigned_bytes();
    if !key.verify(&unsigned, &signature) {
        return Err(Error::InvalidSignature(signer_index));
    }

    let program = tx
        .programs
        .first_mut()
        .ok_or(Error::Malformed("transaction has no witness program"))?;
    if program.parameter.len() % SIGNATURE_SCRIPT_LENGTH != 0 {
        return Err(Error::Malformed("witness parameter stride"));
    }

    // Resolve each stored record back to its signer so the new record
    // lands in index order and duplicates are caught.
    let mut existing = Vec::with_capacity(program.parameter.len() / SIGNATURE_SCRIPT_LENGTH);
    for record in program.parameter.chunks_exact(SIGNATURE_SCRIPT_LENGTH) {
        let stored = Signature::from_slice(&record[1..])?;
        let index = identify_signer(&unsigned, &stored, committee)
            .ok_or(Error::Malformed("witness contains a non-committee signature"))?;
        if index == signer_index {
            return Err(Error::AlreadySigned(signer_index));
        }
        existing.push(index);
    }

    let position = existing.iter().filter(|&&i| i < signer_index).count();
    let mut record = [0u8; SIGNATURE_SCRIPT_LENGTH];
    record[0] = crate::keys::SIGNATURE_LENGTH as u8;
    record[1..].copy_from_slice(&signature.0);

    let offset = position * SIGNATURE_SCRIPT_LENGTH;
    let tail = program.parameter.split_off(offset);
    program.parameter.extend_from_slice(&record);
    program.parameter.extend_from_slice(&tail);

    Ok(program.parameter.len() / SIGNATURE_SCRIPT_LENGTH)
}

/// The number of signature records currently in the witness.
pub fn signature_count(tx: &Transaction) -> usize {
    tx.programs
        .first()
        .map(|p| p.parameter.len() / SIGNATURE_SCRIPT_LENGTH)
        .unwrap_or(0)
}

/// Check that the witness carries at least the committee threshold of
/// valid signatures from distinct members in increasing index order.
pub fn verify_witness(tx: &Transaction, committee: &Committee) -> Result<(), Error> {
    let unsigned = tx.unsigned_bytes();
    let program = tx
        .programs
        .first()
        .ok_or(Error::Malformed("transaction has no witness program"))?;
    if program.parameter.len() % SIGNATURE_SCRIPT_LENGTH != 0 {
        return Err(Error::Malformed("witness parameter stride"));
    }

    let mut last_index = None;
    let mut count = 0usize;
    for record in program.parameter.chunks_exact(SIGNATURE_SCRIPT_LENGTH) {
        let signature = Signature::from_slice(&record[1..])?;
        let index = identify_signer(&unsigned, &signature, committee)
            .ok_or(Error::Malformed("witness contains a non-committee signature"))?;
        if last_index.is_some_and(|last| index <= last) {
            return Err(Error::Malformed("witness signatures out of order"));
        }
        last_index = Some(index);
        count += 1;
    }

    if count < committee.threshold() {
        return Err(Error::Malformed("witness below threshold"));
    }
    Ok(())
}
