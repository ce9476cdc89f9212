//! The canonical cross-chain transaction model.
//!
//! Both chains in the bridge share one transaction shape: a version byte,
//! a kind-specific payload, inputs, outputs, a lock time, and a list of
//! witness programs. The *unsigned* serialization stops before the
//! programs; it is the preimage for the transaction hash and for every
//! committee signature. The *signed* serialization appends the programs
//! and is what gets submitted over RPC.

use std::io;
use std::str::FromStr;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use sha2::Digest as _;
use sha2::Sha256;

use crate::codec::{self, Decode, Encode};
use crate::error::Error;

/// The transaction format version understood by this crate.
pub const TX_VERSION: u8 = 0x09;

/// The maximum serialized size of a settlement transaction. Batches that
/// would exceed this are split by the builder.
pub const MAX_BLOCK_SIZE: usize = 8_000_000;

/// A 32-byte double-SHA256 hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// Double-SHA256 of the given bytes.
    pub fn digest(bytes: &[u8]) -> Self {
        let first = Sha256::digest(bytes);
        Self(Sha256::digest(first).into())
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        let bytes = hex::decode(s.trim()).map_err(|_| Error::Malformed("hash hex"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Malformed("hash length"))?;
        Ok(Self(array))
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Hash256 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl Encode for Hash256 {
    fn encode<W: io::Write>(&self, w: &mut W) -> Result<(), Error> {
        codec::write_bytes(w, &self.0)
    }
}

impl Decode for Hash256 {
    fn decode<R: io::Read>(r: &mut R) -> Result<Self, Error> {
        Ok(Self(codec::read_array(r)?))
    }
}

/// A fixed-point amount with 8 decimal places.
///
/// All arithmetic is checked; overflow is terminal for the transaction
/// being built. Rate conversion truncates toward zero.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(pub i64);

/// The fixed-point scale: one whole unit in base units.
pub const AMOUNT_SCALE: i64 = 100_000_000;

impl Amount {
    /// Zero.
    pub const ZERO: Amount = Amount(0);

    /// Checked addition.
    pub fn checked_add(self, rhs: Amount) -> Result<Amount, Error> {
        self.0
            .checked_add(rhs.0)
            .map(Amount)
            .ok_or(Error::AmountOverflow)
    }

    /// Checked subtraction.
    pub fn checked_sub(self, rhs: Amount) -> Result<Amount, Error> {
        self.0
            .checked_sub(rhs.0)
            .map(Amount)
            .ok_or(Error::AmountOverflow)
    }

    /// Whether the amount is strictly positive.
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        let whole = magnitude / AMOUNT_SCALE as u64;
        let frac = magnitude % AMOUNT_SCALE as u64;
        write!(f, "{sign}{whole}.{frac:08}")
    }
}

impl FromStr for Amount {
    type Err = Error;

    /// Parse a decimal string with at most 8 fractional digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (sign, digits) = match s.strip_prefix('-') {
            Some(rest) => (-1i64, rest),
            None => (1i64, s),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(Error::Malformed("empty amount"));
        }
        if frac.len() > 8 || !whole.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::Malformed("amount format"));
        }
        if !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::Malformed("amount format"));
        }
        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| Error::AmountOverflow)?
        };
        let mut frac_value: i64 = if frac.is_empty() {
            0
        } else {
            frac.parse().map_err(|_| Error::Malformed("amount format"))?
        };
        for _ in frac.len()..8 {
            frac_value *= 10;
        }
        whole
            .checked_mul(AMOUNT_SCALE)
            .and_then(|w| w.checked_add(frac_value))
            .and_then(|v| v.checked_mul(sign))
            .map(Amount)
            .ok_or(Error::AmountOverflow)
    }
}

impl Encode for Amount {
    fn encode<W: io::Write>(&self, w: &mut W) -> Result<(), Error> {
        codec::write_i64(w, self.0)
    }
}

impl Decode for Amount {
    fn decode<R: io::Read>(r: &mut R) -> Result<Self, Error> {
        Ok(Self(codec::read_i64(r)?))
    }
}

/// An exchange rate between main-chain and side-chain units, held as a
/// fixed-point numerator over [`AMOUNT_SCALE`] so every node converts
/// identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeRate(pub i64);

impl ExchangeRate {
    /// The identity rate.
    pub const ONE: ExchangeRate = ExchangeRate(AMOUNT_SCALE);

    /// Convert a main-chain amount into side-chain units, truncating
    /// toward zero.
    pub fn apply(self, amount: Amount) -> Result<Amount, Error> {
        let wide = (amount.0 as i128) * (self.0 as i128) / (AMOUNT_SCALE as i128);
        i64::try_from(wide)
            .map(Amount)
            .map_err(|_| Error::AmountOverflow)
    }
}

impl FromStr for ExchangeRate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::from_str(s).map(|a| ExchangeRate(a.0))
    }
}

/// A reference to a previous transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TxInput {
    /// The transaction the spent output belongs to.
    pub prev_hash: Hash256,
    /// The output index within that transaction.
    pub prev_index: u16,
    /// Input sequence number.
    pub sequence: u32,
}

impl Encode for TxInput {
    fn encode<W: io::Write>(&self, w: &mut W) -> Result<(), Error> {
        self.prev_hash.encode(w)?;
        codec::write_u16(w, self.prev_index)?;
        codec::write_u32(w, self.sequence)
    }
}

impl Decode for TxInput {
    fn decode<R: io::Read>(r: &mut R) -> Result<Self, Error> {
        Ok(Self {
            prev_hash: Hash256::decode(r)?,
            prev_index: codec::read_u16(r)?,
            sequence: codec::read_u32(r)?,
        })
    }
}

/// A transaction output paying `value` to `address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    /// The receiving address.
    pub address: String,
    /// The paid amount.
    pub value: Amount,
}

impl Encode for TxOutput {
    fn encode<W: io::Write>(&self, w: &mut W) -> Result<(), Error> {
        codec::write_var_string(w, &self.address)?;
        self.value.encode(w)
    }
}

impl Decode for TxOutput {
    fn decode<R: io::Read>(r: &mut R) -> Result<Self, Error> {
        Ok(Self {
            address: codec::read_var_string(r)?,
            value: Amount::decode(r)?,
        })
    }
}

/// A witness program: the locking script and the accumulated signature
/// parameter. The parameter is excluded from the unsigned serialization.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
    /// The redeem script.
    pub code: Vec<u8>,
    /// Concatenated length-prefixed signature records.
    pub parameter: Vec<u8>,
}

impl Encode for Program {
    fn encode<W: io::Write>(&self, w: &mut W) -> Result<(), Error> {
        codec::write_var_bytes(w, &self.code)?;
        codec::write_var_bytes(w, &self.parameter)
    }
}

impl Decode for Program {
    fn decode<R: io::Read>(r: &mut R) -> Result<Self, Error> {
        Ok(Self {
            code: codec::read_var_bytes(r)?,
            parameter: codec::read_var_bytes(r)?,
        })
    }
}

/// Kind-specific transaction payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A main-chain deposit locking value to a side chain's genesis
    /// address. Observed via SPV; never built by this crate.
    TransferCrossChainAsset {
        /// The side-chain address to credit.
        side_address: String,
        /// The main-chain address to refund on rejection.
        depositor_address: String,
        /// The deposited amount.
        amount: Amount,
    },
    /// A side-chain transaction crediting a depositor, referencing the
    /// main-chain deposit that funds it.
    RechargeToSideChain {
        /// The confirmed main-chain deposit transaction.
        main_tx_hash: Hash256,
        /// The main-chain amount being recharged.
        amount: Amount,
    },
    /// A main-chain transaction spending the committee bank to pay out
    /// side-chain withdrawals.
    WithdrawFromSideChain {
        /// The side-chain height the batch was drawn at.
        block_height: u32,
        /// The side chain the withdrawals came from.
        genesis_address: String,
        /// The side-chain withdraw transactions settled by this batch.
        side_tx_hashes: Vec<Hash256>,
    },
    /// A main-chain transaction returning deposits the side chain
    /// rejected.
    ReturnSideChainDeposit {
        /// The side-chain height at which the rejection was observed.
        side_height: u32,
        /// The side chain that rejected the deposits.
        genesis_address: String,
        /// The failed main-chain deposit transactions.
        deposit_tx_hashes: Vec<Hash256>,
    },
}

impl Payload {
    /// The kind discriminant written before the payload fields.
    pub fn kind(&self) -> u8 {
        match self {
            Payload::TransferCrossChainAsset { .. } => 1,
            Payload::RechargeToSideChain { .. } => 2,
            Payload::WithdrawFromSideChain { .. } => 3,
            Payload::ReturnSideChainDeposit { .. } => 4,
        }
    }
}

impl Encode for Payload {
    fn encode<W: io::Write>(&self, w: &mut W) -> Result<(), Error> {
        codec::write_u8(w, self.kind())?;
        match self {
            Payload::TransferCrossChainAsset {
                side_address,
                depositor_address,
                amount,
            } => {
                codec::write_var_string(w, side_address)?;
                codec::write_var_string(w, depositor_address)?;
                amount.encode(w)
            }
            Payload::RechargeToSideChain { main_tx_hash, amount } => {
                main_tx_hash.encode(w)?;
                amount.encode(w)
            }
            Payload::WithdrawFromSideChain {
                block_height,
                genesis_address,
                side_tx_hashes,
            } => {
                codec::write_u32(w, *block_height)?;
                codec::write_var_string(w, genesis_address)?;
                encode_hashes(w, side_tx_hashes)
            }
            Payload::ReturnSideChainDeposit {
                side_height,
                genesis_address,
                deposit_tx_hashes,
            } => {
                codec::write_u32(w, *side_height)?;
                codec::write_var_string(w, genesis_address)?;
                encode_hashes(w, deposit_tx_hashes)
            }
        }
    }
}

impl Decode for Payload {
    fn decode<R: io::Read>(r: &mut R) -> Result<Self, Error> {
        match codec::read_u8(r)? {
            1 => Ok(Payload::TransferCrossChainAsset {
                side_address: codec::read_var_string(r)?,
                depositor_address: codec::read_var_string(r)?,
                amount: Amount::decode(r)?,
            }),
            2 => Ok(Payload::RechargeToSideChain {
                main_tx_hash: Hash256::decode(r)?,
                amount: Amount::decode(r)?,
            }),
            3 => Ok(Payload::WithdrawFromSideChain {
                block_height: codec::read_u32(r)?,
                genesis_address: codec::read_var_string(r)?,
                side_tx_hashes: decode_hashes(r)?,
            }),
            4 => Ok(Payload::ReturnSideChainDeposit {
                side_height: codec::read_u32(r)?,
                genesis_address: codec::read_var_string(r)?,
                deposit_tx_hashes: decode_hashes(r)?,
            }),
            _ => Err(Error::Malformed("unknown payload kind")),
        }
    }
}

fn encode_hashes<W: io::Write>(w: &mut W, hashes: &[Hash256]) -> Result<(), Error> {
    codec::write_u32(w, hashes.len() as u32)?;
    for hash in hashes {
        hash.encode(w)?;
    }
    Ok(())
}

fn decode_hashes<R: io::Read>(r: &mut R) -> Result<Vec<Hash256>, Error> {
    let count = codec::read_count(r)?;
    let mut hashes = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        hashes.push(Hash256::decode(r)?);
    }
    Ok(hashes)
}

/// A settlement transaction on either chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Format version, currently [`TX_VERSION`].
    pub version: u8,
    /// The kind-specific payload.
    pub payload: Payload,
    /// The spent outputs.
    pub inputs: Vec<TxInput>,
    /// The created outputs.
    pub outputs: Vec<TxOutput>,
    /// Earliest height the transaction may confirm.
    pub lock_time: u32,
    /// Witness programs, excluded from the unsigned form.
    pub programs: Vec<Program>,
}

impl Transaction {
    /// Encode the unsigned form: everything up to but excluding the
    /// witness programs. This is the preimage for [`Transaction::hash`]
    /// and for committee signatures.
    pub fn encode_unsigned<W: io::Write>(&self, w: &mut W) -> Result<(), Error> {
        codec::write_u8(w, self.version)?;
        self.payload.encode(w)?;
        codec::write_u32(w, self.inputs.len() as u32)?;
        for input in &self.inputs {
            input.encode(w)?;
        }
        codec::write_u32(w, self.outputs.len() as u32)?;
        for output in &self.outputs {
            output.encode(w)?;
        }
        codec::write_u32(w, self.lock_time)
    }

    /// The unsigned serialization as a vector.
    pub fn unsigned_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        #[allow(clippy::expect_used)]
        self.encode_unsigned(&mut buf)
            .expect("encoding into a Vec failed");
        buf
    }

    /// The transaction hash: double-SHA256 of the unsigned form.
    pub fn hash(&self) -> Hash256 {
        Hash256::digest(&self.unsigned_bytes())
    }

    /// The serialized size of the signed form in bytes.
    pub fn size(&self) -> usize {
        self.encode_to_vec().len()
    }
}

impl Encode for Transaction {
    fn encode<W: io::Write>(&self, w: &mut W) -> Result<(), Error> {
        self.encode_unsigned(w)?;
        codec::write_u32(w, self.programs.len() as u32)?;
        for program in &self.programs {
            program.encode(w)?;
        }
        Ok(())
    }
}

impl Decode for Transaction {
    fn decode<R: io::Read>(r: &mut R) -> Result<Self, Error> {
        let version = codec::read_u8(r)?;
        if version != TX_VERSION {
            return Err(Error::Malformed("unsupported transaction version"));
        }
        let payload = Payload::decode(r)?;
        let input_count = codec::read_count(r)?;
        let mut inputs = Vec::with_capacity(input_count.min(1024));
        for _ in 0..input_count {
            inputs.push(TxInput::decode(r)?);
        }
        let output_count = codec::read_count(r)?;
        let mut outputs = Vec::with_capacity(output_count.min(1024));
        for _ in 0..output_count {
            outputs.push(TxOutput::decode(r)?);
        }
        let lock_time = codec::read_u32(r)?;
        let program_count = codec::read_count(r)?;
        let mut programs = Vec::with_capacity(program_count.min(16));
        for _ in 0..program_count {
            programs.push(Program::decode(r)?);
        }
        Ok(Self {
            version,
            payload,
            inputs,
            outputs,
            lock_time,
            programs,
        })
    }
}

/// A merkle inclusion proof for a transaction in a main-chain block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    /// Height of the block containing the transaction.
    pub block_height: u32,
    /// The leaf position of the transaction in the block.
    pub merkle_index: u32,
    /// Sibling hashes from leaf to root.
    pub branch: Vec<Hash256>,
}

impl MerkleProof {
    /// Fold the branch over the leaf hash, yielding the merkle root this
    /// proof commits to.
    pub fn compute_root(&self, leaf: Hash256) -> Hash256 {
        let mut current = leaf;
        let mut index = self.merkle_index;
        for sibling in &self.branch {
            let mut buf = [0u8; 64];
            if index & 1 == 1 {
                buf[..32].copy_from_slice(&sibling.0);
                buf[32..].copy_from_slice(&current.0);
            } else {
                buf[..32].copy_from_slice(&current.0);
                buf[32..].copy_from_slice(&sibling.0);
            }
            current = Hash256::digest(&buf);
            index >>= 1;
        }
        current
    }
}

impl Encode for MerkleProof {
    fn encode<W: io::Write>(&self, w: &mut W) -> Result<(), Error> {
        codec::write_u32(w, self.block_height)?;
        codec::write_u32(w, self.merkle_index)?;
        encode_hashes(w, &self.branch)
    }
}

impl Decode for MerkleProof {
    fn decode<R: io::Read>(r: &mut R) -> Result<Self, Error> {
        Ok(Self {
            block_height: codec::read_u32(r)?,
            merkle_index: codec::read_u32(r)?,
            branch: decode_hashes(r)?,
        })
    }
}

/// One payout requested by a side-chain withdraw transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawAsset {
    /// The main-chain address to pay.
    pub target_address: String,
    /// The gross withdrawn amount in main-chain units.
    pub amount: Amount,
    /// The portion retained to cover the settlement fee.
    pub cross_chain_fee: Amount,
}

impl Encode for WithdrawAsset {
    fn encode<W: io::Write>(&self, w: &mut W) -> Result<(), Error> {
        codec::write_var_string(w, &self.target_address)?;
        self.amount.encode(w)?;
        self.cross_chain_fee.encode(w)
    }
}

impl Decode for WithdrawAsset {
    fn decode<R: io::Read>(r: &mut R) -> Result<Self, Error> {
        Ok(Self {
            target_address: codec::read_var_string(r)?,
            amount: Amount::decode(r)?,
            cross_chain_fee: Amount::decode(r)?,
        })
    }
}

/// A user-initiated withdraw transaction observed on a side chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRecord {
    /// The side-chain transaction hash.
    pub txid: Hash256,
    /// The requested payouts.
    pub assets: Vec<WithdrawAsset>,
}

impl Encode for WithdrawRecord {
    fn encode<W: io::Write>(&self, w: &mut W) -> Result<(), Error> {
        self.txid.encode(w)?;
        codec::write_u32(w, self.assets.len() as u32)?;
        for asset in &self.assets {
            asset.encode(w)?;
        }
        Ok(())
    }
}

impl Decode for WithdrawRecord {
    fn decode<R: io::Read>(r: &mut R) -> Result<Self, Error> {
        let txid = Hash256::decode(r)?;
        let count = codec::read_count(r)?;
        let mut assets = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            assets.push(WithdrawAsset::decode(r)?);
        }
        Ok(Self { txid, assets })
    }
}

/// An unspent output of the committee's multisig bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Utxo {
    /// The funding transaction.
    pub txid: Hash256,
    /// The output index.
    pub vout: u16,
    /// The output value.
    pub value: Amount,
}

impl Utxo {
    /// The input spending this output.
    pub fn to_input(self) -> TxInput {
        TxInput {
            prev_hash: self.txid,
            prev_index: self.vout,
            sequence: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn sample_withdrawal() -> Transaction {
        Transaction {
            version: TX_VERSION,
            payload: Payload::WithdrawFromSideChain {
                block_height: 1042,
                genesis_address: "gY".into(),
                side_tx_hashes: vec![Hash256::digest(b"w1"), Hash256::digest(b"w2")],
            },
            inputs: vec![TxInput {
                prev_hash: Hash256::digest(b"bank"),
                prev_index: 0,
                sequence: 0,
            }],
            outputs: vec![TxOutput {
                address: "mainAddr".into(),
                value: Amount(99_000_000),
            }],
            lock_time: 0,
            programs: vec![Program {
                code: vec![0x52, 0xae],
                parameter: vec![],
            }],
        }
    }

    #[test]
    fn unsigned_round_trip_is_byte_identical() {
        let tx = sample_withdrawal();
        let encoded = tx.encode_to_vec();
        let decoded = Transaction::decode_all(&encoded).unwrap();

        assert_eq!(decoded, tx);
        assert_eq!(decoded.encode_to_vec(), encoded);
        assert_eq!(decoded.unsigned_bytes(), tx.unsigned_bytes());
    }

    #[test]
    fn hash_ignores_witness_parameter() {
        let mut tx = sample_withdrawal();
        let before = tx.hash();
        tx.programs[0].parameter = vec![0xFF; 65];
        assert_eq!(tx.hash(), before);
    }

    #[test]
    fn signed_form_round_trips_with_signatures() {
        let mut tx = sample_withdrawal();
        tx.programs[0].parameter = vec![0xAB; 130];

        let decoded = Transaction::decode_all(&tx.encode_to_vec()).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn unknown_version_is_malformed() {
        let mut bytes = sample_withdrawal().encode_to_vec();
        bytes[0] = 0x01;
        assert!(matches!(
            Transaction::decode_all(&bytes),
            Err(Error::Malformed(_))
        ));
    }

    #[test_case("1.00000000", 100_000_000 ; "one whole unit")]
    #[test_case("0.5", 50_000_000 ; "short fraction")]
    #[test_case("-2.25", -225_000_000 ; "negative")]
    #[test_case("3", 300_000_000 ; "no fraction")]
    fn amount_parsing(input: &str, expected: i64) {
        assert_eq!(input.parse::<Amount>().unwrap(), Amount(expected));
    }

    #[test]
    fn amount_parsing_rejects_garbage() {
        assert!("1.000000001".parse::<Amount>().is_err());
        assert!("abc".parse::<Amount>().is_err());
        assert!("".parse::<Amount>().is_err());
    }

    #[test]
    fn exchange_rate_truncates_toward_zero() {
        let rate: ExchangeRate = "0.33333333".parse().unwrap();
        let converted = rate.apply(Amount(100)).unwrap();
        assert_eq!(converted, Amount(33));
    }

    #[test]
    fn exchange_rate_overflow_is_reported() {
        let rate = ExchangeRate(i64::MAX);
        assert!(matches!(
            rate.apply(Amount(i64::MAX)),
            Err(Error::AmountOverflow)
        ));
    }

    #[test]
    fn merkle_proof_recomputes_root() {
        let a = Hash256::digest(b"a");
        let b = Hash256::digest(b"b");
        let c = Hash256::digest(b"c");
        let d = Hash256::digest(b"d");

        let pair = |l: &Hash256, r: &Hash256| {
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(&l.0);
            buf[32..].copy_from_slice(&r.0);
            Hash256::digest(&buf)
        };
        let ab = pair(&a, &b);
        let cd = pair(&c, &d);
        let root = pair(&ab, &cd);

        // Prove inclusion of `c`, the leaf at index 2.
        let proof = MerkleProof {
            block_height: 7,
            merkle_index: 2,
            branch: vec![d, ab],
        };
        assert_eq!(proof.compute_root(c), root);
        assert_ne!(proof.compute_root(a), root);
    }

    #[test]
    fn withdraw_record_round_trip() {
        let record = WithdrawRecord {
            txid: Hash256::digest(b"side"),
            assets: vec![WithdrawAsset {
                target_address: "mainAddr".into(),
                amount: Amount(100_000_000),
                cross_chain_fee: Amount(10_000),
            }],
        };
        let decoded = WithdrawRecord::decode_all(&record.encode_to_vec()).unwrap();
        assert_eq!(decoded, record);
    }
}
