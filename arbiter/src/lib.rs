#![deny(missing_docs)]
//! # Federated cross-chain bridge arbiter
//!
//! A fixed committee of arbiters observes a main chain and one or more
//! side chains via SPV and produces multi-signed settlement
//! transactions in both directions: deposits become side-chain
//! *recharge* transactions, and side-chain withdrawals become
//! main-chain transactions spending the committee's multisig bank.
//!
//! One elected committee member holds *duty* at any main-chain height
//! and originates settlement proposals; the rest co-sign them over the
//! P2P command channel until the `ceil(2N/3)` agreement threshold is
//! reached and the settlement is submitted.
//!
//! The crate is organized around a handful of event loops wired
//! together through the [`context::Context`] signalling channel:
//!
//! - [`deposit_observer`] stages SPV-confirmed deposits;
//! - [`withdraw_observer`] polls side chains for user withdrawals;
//! - [`duty::DutyOracle`] tracks the duty rotation and emits edges;
//! - [`orchestrator`] drains the staging pipelines on duty gain;
//! - [`transaction_coordinator`] and [`transaction_signer`] are the
//!   leader and follower halves of the signing protocol;
//! - [`janitor`] reconciles the staging tables against the chains.
//!
//! External collaborators (the SPV engine, P2P framing, chain nodes,
//! key storage, durable storage engine, and pow mining helper) are
//! reached only through the narrow traits in [`deposit_observer`],
//! [`network`], [`rpc`], [`keys`], [`storage`], and [`auxpow`].

pub mod auxpow;
pub mod codec;
pub mod config;
pub mod context;
pub mod deposit_observer;
pub mod duty;
pub mod error;
pub mod janitor;
pub mod keys;
pub mod message;
pub mod metrics;
pub mod multisig;
pub mod network;
pub mod orchestrator;
pub mod rpc;
pub mod side_chain;
pub mod storage;
pub mod transaction;
pub mod transaction_coordinator;
pub mod transaction_signer;
pub mod tx_builder;
pub mod withdraw_observer;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Set up logging with the `RUST_LOG` env-filter. `pretty` switches
/// from JSON lines to human-readable output.
pub fn setup_logging(pretty: bool) {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let registry = tracing_subscriber::registry().with(filter);
    if pretty {
        let _ = registry.with(tracing_subscriber::fmt::layer()).try_init();
    } else {
        let _ = registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init();
    }
}
