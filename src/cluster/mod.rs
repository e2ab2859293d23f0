//! Cluster Membership Module
//!
//! Tracks peer nodes by periodic liveness probe and keeps the consistent
//! hash ring in step with their status. Each probe opens a TCP connection
//! to the peer, writes a PING frame and waits briefly for any reply; a
//! status transition adds or removes the peer's virtual placements.

mod ring;

pub use ring::HashRing;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, RwLock};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::ClusterConfig;
use crate::protocol::Value;

/// Cadence of probe rounds.
const PROBE_INTERVAL: Duration = Duration::from_secs(5);
/// Deadline for the probe TCP connect.
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Deadline for reading any reply bytes.
const PROBE_READ_TIMEOUT: Duration = Duration::from_secs(1);

// == Node ==
/// Peer liveness state. Lifecycle: Unknown on admission, then
/// Alive ⇄ Dead by probe outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Unknown,
    Alive,
    Dead,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub address: String,
    pub status: NodeStatus,
    pub last_seen: Instant,
}

/// Snapshot of membership for INFO and the metrics surface.
#[derive(Debug, Clone)]
pub struct ClusterSummary {
    pub enabled: bool,
    pub known_nodes: usize,
    pub alive_nodes: usize,
}

#[derive(Debug)]
struct ClusterState {
    nodes: HashMap<String, Node>,
    ring: HashRing,
}

// == Cluster ==
/// Node map plus ring behind one lock: ring reads never observe a
/// half-applied membership change.
#[derive(Debug)]
pub struct Cluster {
    self_id: String,
    self_addr: String,
    cfg: ClusterConfig,
    state: RwLock<ClusterState>,
}

impl Cluster {
    // == Constructor ==
    /// Creates the cluster with the self node admitted as Alive.
    pub fn new(self_addr: &str, cfg: ClusterConfig) -> Self {
        let self_id = node_id(self_addr);
        let mut state = ClusterState {
            nodes: HashMap::new(),
            ring: HashRing::new(cfg.virtual_nodes),
        };

        state.nodes.insert(
            self_id.clone(),
            Node {
                id: self_id.clone(),
                address: self_addr.to_string(),
                status: NodeStatus::Alive,
                last_seen: Instant::now(),
            },
        );
        state.ring.add_node(&self_id);

        Self {
            self_id,
            self_addr: self_addr.to_string(),
            cfg,
            state: RwLock::new(state),
        }
    }

    // == Start ==
    /// Admits the configured peers and spawns the probe loop. A disabled
    /// cluster stays a single-node ring.
    pub async fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        if !self.cfg.enabled {
            info!("cluster mode disabled");
            return;
        }

        info!(self_id = %self.self_id, peers = self.cfg.nodes.len(), "starting cluster");

        {
            let mut state = self.state.write().await;
            for addr in &self.cfg.nodes {
                if addr == &self.self_addr {
                    continue;
                }
                let id = node_id(addr);
                state.nodes.entry(id.clone()).or_insert(Node {
                    id,
                    address: addr.clone(),
                    status: NodeStatus::Unknown,
                    last_seen: Instant::now(),
                });
            }
        }

        tokio::spawn(self.probe_loop(shutdown));
    }

    async fn probe_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(PROBE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => Arc::clone(&self).probe_round().await,
                _ = shutdown.changed() => break,
            }
        }
        info!("cluster probe loop stopped");
    }

    /// One probe round: every non-self peer gets an independent probe
    /// task, so a slow peer never delays the cadence.
    pub(crate) async fn probe_round(self: Arc<Self>) {
        let peers: Vec<(String, String)> = {
            let state = self.state.read().await;
            state
                .nodes
                .values()
                .filter(|node| node.id != self.self_id)
                .map(|node| (node.id.clone(), node.address.clone()))
                .collect()
        };

        for (id, address) in peers {
            let cluster = Arc::clone(&self);
            tokio::spawn(async move {
                let alive = probe_peer(&address).await;
                cluster.observe(&id, alive).await;
            });
        }
    }

    /// Applies one probe observation: refreshes `last_seen` and moves the
    /// node (and its ring placements) across the Alive/Dead boundary when
    /// the outcome disagrees with the recorded status.
    async fn observe(&self, id: &str, alive: bool) {
        let mut state = self.state.write().await;
        let Some(node) = state.nodes.get_mut(id) else {
            return;
        };

        node.last_seen = Instant::now();
        let status = node.status;

        if alive && status != NodeStatus::Alive {
            node.status = NodeStatus::Alive;
            state.ring.add_node(id);
            info!(node = %id, "peer marked alive");
        } else if !alive && status == NodeStatus::Alive {
            node.status = NodeStatus::Dead;
            state.ring.remove_node(id);
            info!(node = %id, "peer marked dead");
        }
    }

    // == Lookup ==
    /// The node a key routes to.
    pub async fn get_node(&self, key: &str) -> Option<String> {
        let state = self.state.read().await;
        state.ring.get_node(key).map(String::from)
    }

    /// Up to `count` distinct nodes for a key, primary first.
    pub async fn get_nodes(&self, key: &str, count: usize) -> Vec<String> {
        let state = self.state.read().await;
        state.ring.get_nodes(key, count)
    }

    /// The configured replica set for a key.
    pub async fn replica_nodes(&self, key: &str) -> Vec<String> {
        self.get_nodes(key, self.cfg.replica_count).await
    }

    /// Whether a key routes to this node.
    pub async fn is_local_key(&self, key: &str) -> bool {
        self.get_node(key).await.as_deref() == Some(self.self_id.as_str())
    }

    pub async fn alive_nodes(&self) -> Vec<Node> {
        let state = self.state.read().await;
        state
            .nodes
            .values()
            .filter(|node| node.status == NodeStatus::Alive)
            .cloned()
            .collect()
    }

    pub async fn node_status(&self, id: &str) -> Option<NodeStatus> {
        let state = self.state.read().await;
        state.nodes.get(id).map(|node| node.status)
    }

    pub async fn summary(&self) -> ClusterSummary {
        let state = self.state.read().await;
        ClusterSummary {
            enabled: self.cfg.enabled,
            known_nodes: state.nodes.len(),
            alive_nodes: state
                .nodes
                .values()
                .filter(|node| node.status == NodeStatus::Alive)
                .count(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.cfg.enabled
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }
}

/// Configured peers are identified by their address.
fn node_id(addr: &str) -> String {
    format!("node_{addr}")
}

/// Connects, sends a PING frame and waits for any reply bytes. Any failure
/// or deadline counts as not alive; the peer self-heals on a later round.
async fn probe_peer(address: &str) -> bool {
    let mut stream = match timeout(PROBE_CONNECT_TIMEOUT, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!(peer = %address, error = %e, "probe connect failed");
            return false;
        }
        Err(_) => {
            debug!(peer = %address, "probe connect timed out");
            return false;
        }
    };

    let ping = Value::Array(vec![Value::bulk(*b"PING")]).marshal();
    if stream.write_all(&ping).await.is_err() {
        return false;
    }

    let mut buffer = [0u8; 64];
    matches!(
        timeout(PROBE_READ_TIMEOUT, stream.read(&mut buffer)).await,
        Ok(Ok(n)) if n > 0
    )
}
