//! Per-side-chain state.
//!
//! Each registered side chain owns its RPC handle and a lazily-bound
//! copy of its configuration entry, resolved on first touch under the
//! chain's own mutex.

use std::sync::Mutex;

use crate::config::Settings;
use crate::config::SideNodeConfig;
use crate::context::ArbiterCommand;
use crate::context::Context;
use crate::error::Error;
use crate::message::IllegalData;
use crate::rpc::SideChainRpc;
use crate::transaction::Amount;
use crate::transaction::ExchangeRate;

/// One registered side chain.
pub struct SideChain<R> {
    genesis_address: String,
    rpc: R,
    current_config: Mutex<Option<SideNodeConfig>>,
}

impl<R: SideChainRpc> SideChain<R> {
    /// Create the chain state for a genesis address.
    pub fn new(genesis_address: impl Into<String>, rpc: R) -> Self {
        Self {
            genesis_address: genesis_address.into(),
            rpc,
            current_config: Mutex::new(None),
        }
    }

    /// The chain's identity key.
    pub fn genesis_address(&self) -> &str {
        &self.genesis_address
    }

    /// The chain's RPC handle.
    pub fn rpc(&self) -> &R {
        &self.rpc
    }

    /// The configuration entry for this chain, bound on first touch.
    pub fn current_config(&self, settings: &Settings) -> Result<SideNodeConfig, Error> {
        let mut cached = self.current_config.lock().unwrap_or_else(|e| e.into_inner());
        if cached.is_none() {
            *cached = settings.side_node(&self.genesis_address).cloned();
        }
        cached
            .clone()
            .ok_or_else(|| Error::MissingSideChainConfig(self.genesis_address.clone()))
    }

    /// The configured exchange rate, validated positive.
    pub fn exchange_rate(&self, settings: &Settings) -> Result<ExchangeRate, Error> {
        let config = self.current_config(settings)?;
        if config.exchange_rate.0 <= 0 {
            return Err(Error::InvalidExchangeRate(self.genesis_address.clone()));
        }
        Ok(config.exchange_rate)
    }

    /// The configured cross-chain fee.
    pub fn cross_chain_fee(&self, settings: &Settings) -> Result<Amount, Error> {
        Ok(self.current_config(settings)?.cross_chain_fee)
    }

    /// Whether the chain is merged-mined.
    pub fn is_pow_chain(&self, settings: &Settings) -> bool {
        self.current_config(settings)
            .map(|config| config.pow_chain)
            .unwrap_or(false)
    }

    /// Monitor callback: conflicting side-chain data was observed. The
    /// evidence is handed to the coordinator for a committee signing
    /// round.
    pub fn on_illegal_evidence_found<C: Context>(
        &self,
        context: &C,
        evidence: IllegalData,
    ) -> Result<(), Error> {
        tracing::warn!(
            genesis = %self.genesis_address,
            height = evidence.height,
            "illegal evidence found"
        );
        context.signal(ArbiterCommand::ProposeEvidence(evidence).into())
    }
}

/// The set of registered side chains, keyed by genesis address.
pub struct SideChainManager<R> {
    chains: Vec<SideChain<R>>,
}

impl<R: SideChainRpc> SideChainManager<R> {
    /// Build the manager from settings, creating one RPC handle per
    /// chain through `connect`.
    pub fn from_settings<F>(settings: &Settings, mut connect: F) -> Result<Self, Error>
    where
        F: FnMut(&SideNodeConfig) -> Result<R, Error>,
    {
        let chains = settings
            .side_nodes
            .iter()
            .map(|node| Ok(SideChain::new(node.genesis_address.clone(), connect(node)?)))
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(Self { chains })
    }

    /// Build the manager from already-connected chains.
    pub fn new(chains: Vec<SideChain<R>>) -> Self {
        Self { chains }
    }

    /// The chain with the given genesis address.
    pub fn get_chain(&self, genesis_address: &str) -> Result<&SideChain<R>, Error> {
        self.chains
            .iter()
            .find(|chain| chain.genesis_address() == genesis_address)
            .ok_or_else(|| Error::UnknownSideChain(genesis_address.to_string()))
    }

    /// All registered chains.
    pub fn all_chains(&self) -> &[SideChain<R>] {
        &self.chains
    }
}

#[cfg(test)]
mod tests {
    use crate::testing;
    use crate::testing::MockSideChain;

    use super::*;

    #[test]
    fn config_binds_on_first_touch() {
        let (settings, _) = testing::settings_with_committee(5, 46);
        let genesis = settings.side_nodes[0].genesis_address.clone();
        let chain = SideChain::new(genesis, MockSideChain::default());

        let config = chain.current_config(&settings).unwrap();
        assert_eq!(config.genesis_address, chain.genesis_address());
        assert!(chain.exchange_rate(&settings).is_ok());
    }

    #[test]
    fn unknown_chain_is_an_error() {
        let (settings, _) = testing::settings_with_committee(5, 46);
        let manager =
            SideChainManager::new(vec![SideChain::new("gZ", MockSideChain::default())]);

        assert!(manager.get_chain("gY").is_err());
        let chain = manager.get_chain("gZ").unwrap();
        assert!(matches!(
            chain.current_config(&settings),
            Err(Error::MissingSideChainConfig(_))
        ));
    }
}
