use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    pub id: String,
    pub last_seen: Option<i64>,
    pub latest_block: Option<u64>,
    pub stale: bool,
    pub stale_reason: Option<String>,
}

impl PeerInfo {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            last_seen: None,
            latest_block: None,
            stale: false,
            stale_reason: None,
        }
    }
}

/// What this validator knows about its peers.
#[derive(Debug, Default)]
pub struct PeerBook {
    peers: RwLock<BTreeMap<String, PeerInfo>>,
}

impl PeerBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peers<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let book = Self::new();
        for id in ids {
            book.add(id.as_ref());
        }
        book
    }

    pub fn add(&self, id: &str) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.entry(id.to_string()).or_insert_with(|| PeerInfo::new(id));
    }

    pub fn touch(&self, id: &str, at: i64) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        let info = peers.entry(id.to_string()).or_insert_with(|| PeerInfo::new(id));
        info.last_seen = Some(at);
    }

    /// A heartbeat in a supported version also clears a stale mark.
    pub fn record_heartbeat(&self, id: &str, latest_block: Option<u64>, at: i64) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        let info = peers.entry(id.to_string()).or_insert_with(|| PeerInfo::new(id));
        info.last_seen = Some(at);
        if latest_block.is_some() {
            info.latest_block = latest_block;
        }
        if info.stale {
            log::info!("peer {} is speaking a supported version again", id);
        }
        info.stale = false;
        info.stale_reason = None;
    }

    pub fn mark_stale(&self, id: &str, reason: &str) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        let info = peers.entry(id.to_string()).or_insert_with(|| PeerInfo::new(id));
        if !info.stale {
            log::warn!("marking peer {} stale: {}", id, reason);
        }
        info.stale = true;
        info.stale_reason = Some(reason.to_string());
    }

    pub fn is_stale(&self, id: &str) -> bool {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.get(id).map(|p| p.stale).unwrap_or(false)
    }

    pub fn get(&self, id: &str) -> Option<PeerInfo> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.get(id).cloned()
    }

    pub fn all(&self) -> Vec<PeerInfo> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.values().cloned().collect()
    }
}
