//! In-memory implementation of the arbiter network.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast::Sender;

use crate::error::Error;

use super::{MessageTransfer, Msg, MsgId};

/// In-memory representation of a WAN network between different arbiters.
pub struct WanNetwork {
    tx: Sender<Msg>,
}

impl WanNetwork {
    /// Create a new in-memory WAN network.
    pub fn new() -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(10_000);
        Self { tx }
    }

    /// Connect to the in-memory WAN network, returning a new
    /// arbiter-scoped network instance.
    pub fn connect(&self) -> PeerNetwork {
        let network = PeerNetwork::new(self.tx.clone());
        network.start();
        network
    }
}

impl Default for WanNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory representation of the network for a single arbiter. The
/// leader and follower loops each take their own [`MessageTransfer`]
/// instance, but in reality are all connected to the same in-memory
/// network and should behave as such.
pub struct PeerNetwork(Arc<InnerPeerNetwork>);

impl Clone for PeerNetwork {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl PeerNetwork {
    /// Spawns a new instance of the in-memory arbiter network.
    pub fn spawn(&self) -> PeerNetworkInstance {
        PeerNetworkInstance {
            peer_network: self.clone(),
            instance_rx: self.0.local_tx.subscribe(),
        }
    }

    /// Create a new in-memory arbiter network.
    fn new(wan_tx: Sender<Msg>) -> Self {
        Self(Arc::new(InnerPeerNetwork::new(wan_tx)))
    }

    /// Start forwarding WAN traffic to this arbiter, skipping messages
    /// this arbiter sent itself.
    fn start(&self) {
        let mut rx = self.0.wan_tx.subscribe();
        let tx = self.0.local_tx.clone();
        let inner = Arc::clone(&self.0);

        tokio::spawn(async move {
            loop {
                let msg = match rx.recv().await {
                    Ok(msg) => msg,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                if inner.sent.read().map(|s| s.contains(&msg.id())).unwrap_or(false) {
                    continue;
                }
                if tx.send(msg).is_err() {
                    break;
                }
            }
        });
    }
}

/// Inner state of the in-memory arbiter network.
struct InnerPeerNetwork {
    wan_tx: Sender<Msg>,
    local_tx: Sender<Msg>,
    sent: RwLock<VecDeque<MsgId>>,
}

impl InnerPeerNetwork {
    fn new(wan_tx: Sender<Msg>) -> Self {
        let (local_tx, _) = tokio::sync::broadcast::channel(1_000);
        Self {
            wan_tx,
            local_tx,
            sent: RwLock::new(VecDeque::new()),
        }
    }

    /// Sends a message to the WAN network.
    fn send(&self, msg: &Msg) -> Result<(), Error> {
        self.dedup_buffer(msg);
        let _ = self.wan_tx.send(msg.clone());
        Ok(())
    }

    /// Buffer a message id to prevent it from being received by the same
    /// arbiter that sent it.
    fn dedup_buffer(&self, msg: &Msg) {
        if let Ok(mut sent_buffer) = self.sent.write() {
            sent_buffer.push_back(msg.id());
            if sent_buffer.len() > 500 {
                sent_buffer.pop_front();
            }
        }
    }
}

/// Represents a single handle onto the in-memory arbiter network.
pub struct PeerNetworkInstance {
    peer_network: PeerNetwork,
    instance_rx: tokio::sync::broadcast::Receiver<Msg>,
}

impl Clone for PeerNetworkInstance {
    fn clone(&self) -> Self {
        Self {
            peer_network: self.peer_network.clone(),
            instance_rx: self.peer_network.0.local_tx.subscribe(),
        }
    }
}

impl MessageTransfer for PeerNetworkInstance {
    async fn broadcast(&mut self, msg: Msg) -> Result<(), Error> {
        self.peer_network.0.send(&msg)
    }

    async fn receive(&mut self) -> Result<Msg, Error> {
        loop {
            if let Ok(msg) = self.instance_rx.recv().await {
                return Ok(msg);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_reach_peers_but_not_the_sender() {
        let wan = WanNetwork::new();
        let alice = wan.connect();
        let bob = wan.connect();

        let mut alice_instance = alice.spawn();
        let mut alice_listener = alice.spawn();
        let mut bob_instance = bob.spawn();

        let msg = Msg::new("withdraw_proposal", vec![1, 2, 3]);
        alice_instance.broadcast(msg.clone()).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), bob_instance.receive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, msg);

        // The sender's own instances never see the message.
        let echo = tokio::time::timeout(Duration::from_millis(100), alice_listener.receive()).await;
        assert!(echo.is_err());
    }
}
