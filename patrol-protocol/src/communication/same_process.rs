use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::codec::ProtocolCodec;
use crate::communication::Communication;
use crate::dispatch::Dispatcher;
use crate::error::TransportError;
use crate::messages::Message;

/// Delivers messages to dispatchers in this process, through the codec, so
/// several validators can run against each other in one test.
pub struct SameProcess {
    codec: ProtocolCodec,
    nodes: HashMap<String, Arc<Dispatcher>>,
    offline_nodes: RwLock<HashSet<String>>,
    delays: RwLock<HashMap<String, Duration>>,
    timeout: Duration,
}

impl SameProcess {
    pub fn new(nodes: HashMap<String, Arc<Dispatcher>>) -> Self {
        Self {
            codec: ProtocolCodec::default(),
            nodes,
            offline_nodes: RwLock::new(HashSet::new()),
            delays: RwLock::new(HashMap::new()),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn from_dispatchers(dispatchers: impl IntoIterator<Item = Arc<Dispatcher>>) -> Self {
        Self::new(
            dispatchers
                .into_iter()
                .map(|d| (d.peer_id().to_string(), d))
                .collect(),
        )
    }

    pub fn with_codec(mut self, codec: ProtocolCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn set_offline(&self, id: &str, offline: bool) {
        let mut offline_nodes = self.offline_nodes.write().unwrap_or_else(|e| e.into_inner());
        if offline {
            offline_nodes.insert(id.to_string());
        } else {
            offline_nodes.remove(id);
        }
    }

    /// Holds every reply from `id` back by `delay`.
    pub fn set_delay(&self, id: &str, delay: Duration) {
        let mut delays = self.delays.write().unwrap_or_else(|e| e.into_inner());
        delays.insert(id.to_string(), delay);
    }

    fn is_offline(&self, id: &str) -> bool {
        let offline_nodes = self.offline_nodes.read().unwrap_or_else(|e| e.into_inner());
        offline_nodes.contains(id)
    }

    fn delay_for(&self, id: &str) -> Option<Duration> {
        let delays = self.delays.read().unwrap_or_else(|e| e.into_inner());
        delays.get(id).copied()
    }
}

#[async_trait]
impl Communication for SameProcess {
    fn peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.nodes.keys().cloned().collect();
        peers.sort();
        peers
    }

    async fn exchange(&self, to: &str, message: &Message) -> Result<Message, TransportError> {
        let node = self
            .nodes
            .get(to)
            .ok_or_else(|| TransportError::UnknownPeer(to.to_string()))?;
        if self.is_offline(message.sender()) || self.is_offline(to) {
            return Err(TransportError::Unreachable {
                peer: to.to_string(),
                reason: "node is offline".into(),
            });
        }

        let bytes = self.codec.encode(message)?;
        let delay = self.delay_for(to);
        let delivery = async {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            node.dispatch(&bytes).await
        };
        let reply = tokio::time::timeout(self.timeout, delivery)
            .await
            .map_err(|_| TransportError::Timeout { peer: to.to_string() })?
            .map_err(|err| TransportError::Rejected {
                peer: to.to_string(),
                reason: err.to_string(),
            })?;
        Ok(self.codec.decode(&reply)?)
    }
}
