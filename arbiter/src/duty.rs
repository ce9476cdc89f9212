//! The duty oracle.
//!
//! Exactly one committee member may originate proposals at any
//! main-chain height; the rotation is `height mod N` over the committee
//! order. The oracle re-evaluates the flag as the chain advances and
//! emits one [`ArbiterEvent::DutyChanged`] edge per flip, never a
//! spurious re-fire.

use std::sync::Mutex;
use std::time::Duration;

use crate::context::ArbiterEvent;
use crate::context::Context;
use crate::deposit_observer::SpvView;
use crate::error::Error;
use crate::keys::PublicKey;
use crate::multisig::Committee;

/// Computes and tracks the local arbiter's duty status.
pub struct DutyOracle<C> {
    context: C,
    committee: Committee,
    local_index: usize,
    // Both the reads and the edge-detecting writes of the flag hold
    // this mutex, so callers never observe a half-applied flip.
    on_duty: Mutex<bool>,
}

impl<C: Context> DutyOracle<C> {
    /// Create an oracle for the local key. The key must be a committee
    /// member.
    pub fn new(context: C, committee: Committee, local_key: PublicKey) -> Result<Self, Error> {
        let local_index = committee
            .index_of(&local_key)
            .ok_or(Error::NotACommitteeMember)?;
        Ok(Self {
            context,
            committee,
            local_index,
            on_duty: Mutex::new(false),
        })
    }

    /// Whether the local arbiter currently holds duty.
    pub fn is_on_duty(&self) -> bool {
        *self.on_duty.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The signer index of the local arbiter.
    pub fn local_index(&self) -> usize {
        self.local_index
    }

    /// Re-evaluate duty at the given main-chain height. Returns the new
    /// flag when it flipped, `None` otherwise. A flip signals
    /// [`ArbiterEvent::DutyChanged`] exactly once.
    pub fn process_height(&self, height: u32) -> Result<Option<bool>, Error> {
        let on_duty = self.committee.on_duty_index(height) == self.local_index;

        let mut flag = self.on_duty.lock().unwrap_or_else(|e| e.into_inner());
        if *flag == on_duty {
            return Ok(None);
        }
        *flag = on_duty;
        drop(flag);

        if on_duty {
            tracing::info!(height, "taking duty for the main chain");
        } else {
            tracing::info!(height, "duty lost");
        }
        self.context.signal(ArbiterEvent::DutyChanged(on_duty).into())?;
        Ok(Some(on_duty))
    }

    /// Poll the SPV height until shutdown, feeding every tick through
    /// [`DutyOracle::process_height`].
    #[tracing::instrument(skip_all, name = "duty-oracle")]
    pub async fn run<S: SpvView>(self: std::sync::Arc<Self>, spv: S) -> Result<(), Error> {
        let interval = Duration::from_millis(self.context.config().arbiter.duty_poll_interval_ms);
        let mut term = self.context.get_termination_handle();

        let poll = async {
            loop {
                if let Err(error) = self.process_height(spv.best_height()) {
                    tracing::error!(%error, "duty oracle could not signal an edge");
                    return Err(error);
                }
                tokio::time::sleep(interval).await;
            }
        };

        tokio::select! {
            _ = term.wait_for_shutdown() => {
                tracing::info!("duty oracle received shutdown signal");
                Ok(())
            }
            result = poll => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::context::ArbiterSignal;
    use crate::testing;

    use super::*;

    #[tokio::test]
    async fn one_edge_event_per_flip() {
        let harness = testing::TestHarness::new(5, 46);
        let context = harness.context(0);
        let mut signals = context.get_signal_receiver();

        let committee = harness.committee.clone();
        let oracle =
            DutyOracle::new(context, committee, harness.public_key(0)).unwrap();

        // Member 0 is on duty at heights that are multiples of 5.
        assert_eq!(oracle.process_height(10).unwrap(), Some(true));
        assert!(oracle.is_on_duty());
        assert_eq!(oracle.process_height(10).unwrap(), None);
        assert_eq!(oracle.process_height(11).unwrap(), Some(false));
        assert!(!oracle.is_on_duty());
        assert_eq!(oracle.process_height(12).unwrap(), None);

        let mut edges = Vec::new();
        while let Ok(signal) = signals.try_recv() {
            if let ArbiterSignal::Event(ArbiterEvent::DutyChanged(flag)) = signal {
                edges.push(flag);
            }
        }
        assert_eq!(edges, vec![true, false]);
    }

    #[test]
    fn duty_is_exclusive_per_height() {
        let harness = testing::TestHarness::new(5, 46);
        for height in 0..20u32 {
            let on_duty: Vec<usize> = (0..5)
                .filter(|&i| harness.committee.on_duty_index(height) == i)
                .collect();
            assert_eq!(on_duty.len(), 1);
        }
    }

    #[test]
    fn non_member_key_is_rejected() {
        let harness = testing::TestHarness::new(5, 46);
        let stranger = crate::keys::PrivateKey::new(&mut rand::rngs::OsRng).public_key();
        let result = DutyOracle::new(harness.context(0), harness.committee.clone(), stranger);
        assert!(matches!(result, Err(Error::NotACommitteeMember)));
    }
}
