//! Top-level error type for the arbiter

use crate::keys::ProgramHash;
use crate::transaction::Hash256;

/// Top-level arbiter error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A byte stream could not be decoded as the expected type. Raised by
    /// every `Decode` implementation in the crate.
    #[error("malformed encoding: {0}")]
    Malformed(&'static str),

    /// An IO error while reading or writing a canonical encoding.
    #[error("io error during encoding or decoding: {0}")]
    CodecIo(#[source] std::io::Error),

    /// Arithmetic on a fixed-point amount overflowed. Fatal for the
    /// proposal being built.
    #[error("fixed-point amount overflow")]
    AmountOverflow,

    /// A recharge output would not cover the configured cross-chain fee.
    #[error("deposit amount {amount} does not cover the cross chain fee {fee}")]
    OutputBelowFee {
        /// The converted deposit amount.
        amount: crate::transaction::Amount,
        /// The configured cross-chain fee.
        fee: crate::transaction::Amount,
    },

    /// The multisig bank does not hold enough value to cover a withdrawal
    /// batch.
    #[error("insufficient multisig funds: need {needed}, have {available}")]
    InsufficientFunds {
        /// Total value the batch requires, fee included.
        needed: crate::transaction::Amount,
        /// Total value of the spendable bank UTXOs.
        available: crate::transaction::Amount,
    },

    /// No withdrawal batch prefix fits under the block size limit.
    #[error("withdrawal batch cannot fit in a block")]
    BatchTooLarge,

    /// The feedback signature at this signer index is already present in
    /// the witness. Duplicate feedback is benign and the message is
    /// dropped.
    #[error("signer {0} already signed this transaction")]
    AlreadySigned(usize),

    /// A feedback message arrived from a key that is not in the committee.
    #[error("feedback from unknown signer with program hash {0}")]
    BadSigner(ProgramHash),

    /// A proposal for this transaction hash is already in flight.
    #[error("proposal {0} is already in process")]
    DuplicateProposal(Hash256),

    /// A follower received the same proposal twice.
    #[error("proposal {0} already received")]
    DuplicateProposalReceived(Hash256),

    /// A proposal arrived from an arbiter that is not on duty.
    #[error("proposal from off-duty arbiter")]
    ProposerNotOnDuty,

    /// No in-flight proposal matches the feedback message.
    #[error("no unsolved proposal with hash {0}")]
    UnknownProposal(Hash256),

    /// A merkle proof did not verify against the cached header chain.
    #[error("merkle proof verification failed for transaction {0}")]
    InvalidMerkleProof(Hash256),

    /// The SPV header cache has no entry for the proof height.
    #[error("no cached header at height {0}")]
    MissingHeader(u32),

    /// An SPV transaction has not reached the confirmation depth.
    #[error("transaction at height {height} has {confirmations} confirmations, need {required}")]
    InsufficientConfirmations {
        /// Height the transaction was confirmed at.
        height: u32,
        /// Confirmations observed so far.
        confirmations: u32,
        /// The configured confirmation depth.
        required: u32,
    },

    /// No registered side chain has this genesis address.
    #[error("unknown side chain genesis address {0}")]
    UnknownSideChain(String),

    /// A side chain is registered without a matching config entry.
    #[error("side chain {0} has no configuration")]
    MissingSideChainConfig(String),

    /// The configured exchange rate is zero or negative.
    #[error("invalid exchange rate for side chain {0}")]
    InvalidExchangeRate(String),

    /// A chain RPC returned an application-level error code.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// The numeric error code from the node.
        code: i64,
        /// The node's error message.
        message: String,
    },

    /// The JSON-RPC transport failed. Transient: the caller retains state
    /// and retries on the next tick.
    #[error("rpc transport error: {0}")]
    RpcTransport(#[source] reqwest::Error),

    /// A JSON-RPC response body could not be interpreted.
    #[error("unexpected rpc response: {0}")]
    RpcResponse(&'static str),

    /// An error from the secp256k1 library.
    #[error("secp256k1 error: {0}")]
    Secp256k1(#[from] secp256k1::Error),

    /// A signature did not verify against the expected key and message.
    #[error("invalid signature from signer {0}")]
    InvalidSignature(usize),

    /// The local key does not belong to the configured committee.
    #[error("local key is not a committee member")]
    NotACommitteeMember,

    /// Reading the settings failed.
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    /// A settings value failed validation.
    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    /// The signalling channel has no receivers, which means the
    /// application is shutting down.
    #[error("the application is shutting down")]
    Shutdown,
}
