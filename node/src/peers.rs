//! Peer table.
//!
//! Tracks every node heard from through status messages: where it sends
//! from, where it serves full-sync pulls, and when it was last seen.

use dashmap::DashMap;
use infodb_engine::{ItemId, ItemRecord};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

/// Self-item field advertising the TCP port serving pulls.
pub const REQUEST_PORT_FIELD: &str = "requestPort";

/// Self-item field advertising the address serving pulls.
pub const REQUEST_ADDRESS_FIELD: &str = "requestAddress";

/// A peer heard from on the network.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    /// Uuid of the peer's self-item
    pub node_id: ItemId,
    /// Source address of its last status message
    pub source: SocketAddr,
    /// Where it serves full-sync pulls, if advertised
    pub request_addr: Option<SocketAddr>,
    pub state: String,
    pub last_seen: Instant,
    pub lost: bool,
}

/// What a status message told us about its sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    /// First status from this peer
    New,
    /// Peer had been considered lost and is back
    Returned,
    Seen,
}

/// Concurrent table of known peers.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: DashMap<ItemId, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
        }
    }

    /// Record a status message carrying `status` received from `source`.
    pub fn observe(&self, source: SocketAddr, status: &ItemRecord, now: Instant) -> PeerEvent {
        let request_addr = request_endpoint(status, source);

        let mut event = PeerEvent::New;
        self.peers
            .entry(status.uuid)
            .and_modify(|peer| {
                event = if peer.lost {
                    PeerEvent::Returned
                } else {
                    PeerEvent::Seen
                };
                peer.source = source;
                peer.request_addr = request_addr;
                peer.state = status.state.clone();
                peer.last_seen = now;
                peer.lost = false;
            })
            .or_insert_with(|| Peer {
                node_id: status.uuid,
                source,
                request_addr,
                state: status.state.clone(),
                last_seen: now,
                lost: false,
            });

        match event {
            PeerEvent::New => {
                tracing::info!(node_id = %status.uuid, peer = %source, "New peer");
            }
            PeerEvent::Returned => {
                tracing::info!(node_id = %status.uuid, peer = %source, "Peer returned");
            }
            PeerEvent::Seen => {}
        }
        event
    }

    /// Mark peers silent for longer than `timeout` as lost.
    ///
    /// Returns the peers newly marked.
    pub fn check_lost(&self, now: Instant, timeout: Duration) -> Vec<ItemId> {
        let mut lost = Vec::new();
        for mut entry in self.peers.iter_mut() {
            let peer = entry.value_mut();
            if !peer.lost && now.saturating_duration_since(peer.last_seen) > timeout {
                peer.lost = true;
                lost.push(peer.node_id);
                tracing::warn!(node_id = %peer.node_id, peer = %peer.source, "Peer lost");
            }
        }
        lost
    }

    /// Forget a peer entirely.
    pub fn remove(&self, node_id: &ItemId) -> Option<Peer> {
        self.peers.remove(node_id).map(|(_, peer)| peer)
    }

    pub fn get(&self, node_id: &ItemId) -> Option<Peer> {
        self.peers.get(node_id).map(|entry| entry.value().clone())
    }

    /// Snapshot of every known peer.
    pub fn peers(&self) -> Vec<Peer> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Pull endpoint advertised in a self-item.
///
/// An unspecified or missing address means "the address I send from".
pub fn request_endpoint(status: &ItemRecord, source: SocketAddr) -> Option<SocketAddr> {
    let field = |name: &str| status.fields.iter().find(|f| f.name == name);

    let port = field(REQUEST_PORT_FIELD)?
        .value
        .as_u64()
        .and_then(|p| u16::try_from(p).ok())
        .filter(|p| *p != 0)?;

    let ip = field(REQUEST_ADDRESS_FIELD)
        .and_then(|f| f.value.as_str())
        .and_then(|s| s.parse::<IpAddr>().ok())
        .filter(|ip| !ip.is_unspecified())
        .unwrap_or_else(|| source.ip());

    Some(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use infodb_engine::{Item, Origin};
    use uuid::Uuid;

    fn status(port: Option<i64>, address: Option<&str>) -> ItemRecord {
        let mut item = Item::new(Uuid::new_v4(), "node", "primary", Origin::Local, false, 1);
        if let Some(port) = port {
            item.update_int_field(REQUEST_PORT_FIELD, port, 2).unwrap();
        }
        if let Some(address) = address {
            item.update_string_field(REQUEST_ADDRESS_FIELD, address, 2)
                .unwrap();
        }
        ItemRecord::from(&item)
    }

    fn source() -> SocketAddr {
        "10.0.0.7:4382".parse().unwrap()
    }

    #[test]
    fn endpoint_from_advertised_fields() {
        let record = status(Some(4383), Some("10.0.0.9"));
        assert_eq!(
            request_endpoint(&record, source()),
            Some("10.0.0.9:4383".parse().unwrap())
        );
    }

    #[test]
    fn endpoint_falls_back_to_source_ip() {
        let record = status(Some(4383), Some("0.0.0.0"));
        assert_eq!(
            request_endpoint(&record, source()),
            Some("10.0.0.7:4383".parse().unwrap())
        );
        assert_eq!(request_endpoint(&status(None, None), source()), None);
    }

    #[test]
    fn observe_and_lose_peer() {
        let table = PeerTable::new();
        let record = status(Some(4383), None);
        let t0 = Instant::now();

        assert_eq!(table.observe(source(), &record, t0), PeerEvent::New);
        assert_eq!(table.observe(source(), &record, t0), PeerEvent::Seen);
        assert_eq!(table.len(), 1);

        let timeout = Duration::from_secs(6);
        assert!(table.check_lost(t0 + Duration::from_secs(5), timeout).is_empty());
        assert_eq!(
            table.check_lost(t0 + Duration::from_secs(7), timeout),
            vec![record.uuid]
        );
        // Only reported once.
        assert!(table.check_lost(t0 + Duration::from_secs(8), timeout).is_empty());
        assert!(table.get(&record.uuid).unwrap().lost);

        let later = t0 + Duration::from_secs(9);
        assert_eq!(table.observe(source(), &record, later), PeerEvent::Returned);
        assert!(!table.get(&record.uuid).unwrap().lost);

        assert!(table.remove(&record.uuid).is_some());
        assert!(table.is_empty());
        assert_eq!(table.observe(source(), &record, later), PeerEvent::New);
    }
}
