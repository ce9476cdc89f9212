//! The P2P seam of the arbiter.
//!
//! Proposal traffic is command-tagged byte payloads over whatever
//! framing the host process provides. The [`MessageTransfer`] trait is
//! the only surface the signing protocol sees; the in-memory
//! implementation backs tests and single-process deployments.

pub mod in_memory;

use std::future::Future;

use sha2::Digest as _;
use sha2::Sha256;

use crate::error::Error;

/// A unique identifier of a network message, used for deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MsgId([u8; 32]);

/// A command-tagged message on the arbiter network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    /// The command channel the message belongs to.
    pub command: String,
    /// The serialized proposal envelope.
    pub payload: Vec<u8>,
}

impl Msg {
    /// Create a message on the given command channel.
    pub fn new(command: impl Into<String>, payload: Vec<u8>) -> Self {
        Self { command: command.into(), payload }
    }

    /// The message id: a digest over the command and payload.
    pub fn id(&self) -> MsgId {
        let mut hasher = Sha256::new();
        hasher.update(self.command.as_bytes());
        hasher.update([0u8]);
        hasher.update(&self.payload);
        MsgId(hasher.finalize().into())
    }
}

/// The ability to exchange messages with the other arbiters.
pub trait MessageTransfer {
    /// Publish a message to every peer.
    fn broadcast(&mut self, msg: Msg) -> impl Future<Output = Result<(), Error>> + Send;

    /// Receive the next message from the network.
    fn receive(&mut self) -> impl Future<Output = Result<Msg, Error>> + Send;
}
