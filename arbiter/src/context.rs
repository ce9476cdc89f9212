//! Context module for the arbiter binary.

use std::sync::Arc;

use tokio::sync::broadcast::Sender;

use crate::config::Settings;
use crate::error::Error;
use crate::message::IllegalData;
use crate::storage::{DbRead, DbWrite};
use crate::transaction::Hash256;
use crate::transaction::Transaction;

/// Context trait that is implemented by the [`ArbiterContext`].
pub trait Context: Clone + Sync + Send {
    /// Get the current configuration for the arbiter.
    fn config(&self) -> &Settings;
    /// Subscribe to the application signalling channel, returning a
    /// receiver which can be used to listen for events.
    fn get_signal_receiver(&self) -> tokio::sync::broadcast::Receiver<ArbiterSignal>;
    /// Get an owned application signalling channel sender.
    fn get_signal_sender(&self) -> tokio::sync::broadcast::Sender<ArbiterSignal>;
    /// Send a signal to the application signalling channel.
    fn signal(&self, signal: ArbiterSignal) -> Result<(), Error>;
    /// Returns a handle to the application's termination signal.
    fn get_termination_handle(&self) -> TerminationHandle;
    /// Get a read-only handle to the staging store.
    fn get_storage(&self) -> impl DbRead + Clone + Sync + Send + 'static;
    /// Get a read-write handle to the staging store.
    fn get_storage_mut(&self) -> impl DbRead + DbWrite + Clone + Sync + Send + 'static;
}

/// Arbiter context which is passed to different components within the
/// arbiter binary.
pub struct ArbiterContext<S> {
    inner: Arc<InnerArbiterContext<S>>,
}

/// We implement [`Clone`] manually to avoid the derive macro adding
/// additional bounds on the generic types.
impl<S> Clone for ArbiterContext<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

/// Inner context which holds the configuration and signalling channels.
pub struct InnerArbiterContext<S> {
    config: Settings,
    // Handle to the app signalling channel. This keeps the channel alive
    // for the duration of the program and is used both to send messages
    // and to hand out new receivers.
    signal_tx: Sender<ArbiterSignal>,
    /// Handle to the app termination channel. This keeps the channel
    /// alive for the duration of the program and is used to provide new
    /// senders and receivers for a [`TerminationHandle`].
    term_tx: tokio::sync::watch::Sender<bool>,
    /// Handle to the staging store.
    storage: S,
}

/// Signals that can be sent within the arbiter binary.
#[derive(Debug, Clone)]
pub enum ArbiterSignal {
    /// Send a command to the application.
    Command(ArbiterCommand),
    /// Signal an event to the application.
    Event(ArbiterEvent),
}

/// Commands that can be sent on the signalling channel.
#[derive(Debug, Clone)]
pub enum ArbiterCommand {
    /// Hand a built settlement transaction to the coordinator for a
    /// signing round.
    ProposeTransaction(Transaction),
    /// Hand illegal evidence to the coordinator for a signing round.
    ProposeEvidence(IllegalData),
}

/// Events that can be received on the signalling channel.
#[derive(Debug, Clone)]
pub enum ArbiterEvent {
    /// The computed duty flag flipped at a main-chain height.
    DutyChanged(bool),
    /// The deposit observer staged new rows for a side chain.
    DepositsStaged {
        /// The side chain the deposits target.
        genesis_address: String,
    },
    /// The withdraw observer staged new rows for a side chain.
    WithdrawalsStaged {
        /// The side chain the withdrawals came from.
        genesis_address: String,
    },
    /// The coordinator reached threshold and submitted a settlement.
    ProposalSubmitted {
        /// The unsigned-form hash of the submitted item.
        hash: Hash256,
    },
    /// The follower signed and fed back a proposal.
    ProposalSigned {
        /// The unsigned-form hash of the signed item.
        hash: Hash256,
    },
    /// The orchestrator finished draining the deposit pipeline.
    DepositsProcessed,
}

impl From<ArbiterEvent> for ArbiterSignal {
    fn from(event: ArbiterEvent) -> Self {
        ArbiterSignal::Event(event)
    }
}

impl From<ArbiterCommand> for ArbiterSignal {
    fn from(command: ArbiterCommand) -> Self {
        ArbiterSignal::Command(command)
    }
}

/// Handle to the termination signal. This can be used to signal the
/// application to shutdown or to wait for a shutdown signal.
pub struct TerminationHandle(
    tokio::sync::watch::Sender<bool>,
    tokio::sync::watch::Receiver<bool>,
);

impl TerminationHandle {
    /// Signal the application to shutdown.
    pub fn signal_shutdown(&self) {
        // We ignore the result here, as if all receivers have been
        // dropped, we're on our way down anyway.
        self.0.send_if_modified(|x| {
            if !(*x) {
                *x = true;
                true
            } else {
                false
            }
        });
    }

    /// Blocks until a shutdown signal is received.
    pub async fn wait_for_shutdown(&mut self) {
        loop {
            // Wait for the termination channel to be updated. If it's
            // updated and the value is true, we break out of the loop.
            // We ignore the result here because it's impossible for the
            // sender to be dropped while this instance is alive (it
            // holds its own sender).
            let _ = self.1.changed().await;
            if *self.1.borrow_and_update() {
                break;
            }
        }
    }
}

impl<S> ArbiterContext<S>
where
    S: DbRead + DbWrite + Clone + Sync + Send + 'static,
{
    /// Create a new arbiter context.
    pub fn init(config: Settings, storage: S) -> Self {
        let (signal_tx, _) = tokio::sync::broadcast::channel(1024);
        let (term_tx, _) = tokio::sync::watch::channel(false);

        Self {
            inner: Arc::new(InnerArbiterContext {
                config,
                signal_tx,
                term_tx,
                storage,
            }),
        }
    }
}

impl<S> Context for ArbiterContext<S>
where
    S: DbRead + DbWrite + Clone + Sync + Send + 'static,
{
    fn config(&self) -> &Settings {
        &self.inner.config
    }

    fn get_signal_receiver(&self) -> tokio::sync::broadcast::Receiver<ArbiterSignal> {
        self.inner.signal_tx.subscribe()
    }

    fn get_signal_sender(&self) -> tokio::sync::broadcast::Sender<ArbiterSignal> {
        self.inner.signal_tx.clone()
    }

    fn signal(&self, signal: ArbiterSignal) -> Result<(), Error> {
        self.inner
            .signal_tx
            .send(signal)
            .map_err(|_| {
                // This realistically shouldn't ever happen
                tracing::warn!("failed to send signal to the application, no receivers present");
                // Send a shutdown signal, just in-case.
                self.get_termination_handle().signal_shutdown();
                Error::Shutdown
            })
            .map(|_| ())
    }

    fn get_termination_handle(&self) -> TerminationHandle {
        TerminationHandle(self.inner.term_tx.clone(), self.inner.term_tx.subscribe())
    }

    fn get_storage(&self) -> impl DbRead + Clone + Sync + Send + 'static {
        self.inner.storage.clone()
    }

    fn get_storage_mut(&self) -> impl DbRead + DbWrite + Clone + Sync + Send + 'static {
        self.inner.storage.clone()
    }
}
