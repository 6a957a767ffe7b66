//! Farm integration test harness.
//!
//! Builds an in-process cluster: every node has its own deploy, temp and
//! config directories, its own session registry and dispatcher, and talks to
//! the others through an in-memory hub. Frames queue up in the hub until a
//! test pumps them with [`Cluster::deliver_all`], so tests control exactly
//! when members see each other's messages.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use farm_core::message::{ClusterMessage, MemberId};
use farm_services::{
    ChannelError, ClusterChannel, DispatchOutcome, LocalDeploymentOps, LocalHost,
    MessageDispatcher, ReplicationCoordinator, SendTarget, SessionRegistry,
};

// ── Harness ───────────────────────────────────────────────────────────────────

static COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn temp_root(name: &str) -> PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("farm-it-{name}-{}-{}", std::process::id(), id));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Deterministic artifact contents.
pub fn artifact_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// Inbound frame queues, one per member.
#[derive(Default)]
pub struct Hub {
    queues: Mutex<HashMap<MemberId, VecDeque<Vec<u8>>>>,
}

impl Hub {
    fn join(&self, member: &MemberId) {
        self.queues
            .lock()
            .unwrap()
            .entry(member.clone())
            .or_default();
    }

    fn members(&self) -> Vec<MemberId> {
        let mut members: Vec<MemberId> = self.queues.lock().unwrap().keys().cloned().collect();
        members.sort();
        members
    }

    fn push(&self, member: &MemberId, frame: Vec<u8>) -> bool {
        match self.queues.lock().unwrap().get_mut(member) {
            Some(queue) => {
                queue.push_back(frame);
                true
            }
            None => false,
        }
    }

    fn pop(&self, member: &MemberId) -> Option<Vec<u8>> {
        self.queues.lock().unwrap().get_mut(member)?.pop_front()
    }

    pub fn pending(&self, member: &MemberId) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(member)
            .map_or(0, VecDeque::len)
    }
}

pub struct HubChannel {
    local: MemberId,
    hub: Arc<Hub>,
}

impl ClusterChannel for HubChannel {
    fn local_member(&self) -> MemberId {
        self.local.clone()
    }

    fn members(&self) -> Vec<MemberId> {
        self.hub
            .members()
            .into_iter()
            .filter(|m| *m != self.local)
            .collect()
    }

    fn send(&self, msg: &ClusterMessage, target: &SendTarget) -> Result<(), ChannelError> {
        let frame = msg.to_bytes()?;
        match target {
            SendTarget::Broadcast => {
                for member in self.members() {
                    self.hub.push(&member, frame.clone());
                }
                Ok(())
            }
            SendTarget::Member { name } => {
                if *name == self.local || !self.hub.push(name, frame) {
                    return Err(ChannelError::UnknownMember(name.clone()));
                }
                Ok(())
            }
        }
    }
}

pub struct Node {
    pub id: MemberId,
    pub root: PathBuf,
    pub webapps: PathBuf,
    pub temp: PathBuf,
    pub watch: PathBuf,
    pub host: Arc<LocalHost>,
    pub sessions: Arc<SessionRegistry>,
    pub dispatcher: MessageDispatcher,
    pub coordinator: Arc<ReplicationCoordinator>,
}

impl Node {
    fn new(name: &str, root: &Path, hub: &Arc<Hub>, max_valid_time: Duration) -> Self {
        let id = MemberId::new(name);
        let root = root.join(name);
        let webapps = root.join("webapps");
        let conf = root.join("conf");
        let temp = root.join("temp");
        let watch = root.join("watch");
        for dir in [&webapps, &conf, &temp, &watch] {
            std::fs::create_dir_all(dir).unwrap();
        }

        let host = Arc::new(LocalHost::new(&webapps, &conf, "war"));
        let ops = Arc::new(LocalDeploymentOps::new(host.clone(), &webapps, &conf, "war"));
        let sessions = Arc::new(SessionRegistry::new(max_valid_time));
        let dispatcher =
            MessageDispatcher::new(sessions.clone(), host.clone(), ops.clone(), &temp);
        hub.join(&id);
        let channel = Arc::new(HubChannel {
            local: id.clone(),
            hub: hub.clone(),
        });
        let coordinator = Arc::new(ReplicationCoordinator::new(channel, host.clone(), ops));

        Self {
            id,
            root,
            webapps,
            temp,
            watch,
            host,
            sessions,
            dispatcher,
            coordinator,
        }
    }

    /// Whether `name` has a running unit on this node.
    pub fn is_running(&self, name: &str) -> bool {
        self.host.unit(name).is_some_and(|u| u.is_running())
    }
}

pub struct Cluster {
    pub root: PathBuf,
    pub hub: Arc<Hub>,
    pub nodes: Vec<Node>,
}

impl Cluster {
    pub fn new(name: &str, members: &[&str]) -> Self {
        Self::with_max_valid_time(name, members, Duration::from_secs(300))
    }

    pub fn with_max_valid_time(name: &str, members: &[&str], max_valid_time: Duration) -> Self {
        let root = temp_root(name);
        let hub = Arc::new(Hub::default());
        let nodes = members
            .iter()
            .map(|m| Node::new(m, &root, &hub, max_valid_time))
            .collect();
        Self { root, hub, nodes }
    }

    pub fn node(&self, name: &str) -> &Node {
        self.nodes
            .iter()
            .find(|n| n.id.as_str() == name)
            .unwrap_or_else(|| panic!("no node named {name}"))
    }

    /// Deliver one queued frame to `name`, if any.
    pub async fn deliver_one(&self, name: &str) -> Option<DispatchOutcome> {
        let node = self.node(name);
        let frame = self.hub.pop(&node.id)?;
        Some(node.dispatcher.on_bytes(&frame).await)
    }

    /// Drain every queue, in member order. Returns the outcomes per member.
    pub async fn deliver_all(&self) -> HashMap<String, Vec<DispatchOutcome>> {
        let mut outcomes: HashMap<String, Vec<DispatchOutcome>> = HashMap::new();
        loop {
            let mut delivered = false;
            for node in &self.nodes {
                while let Some(frame) = self.hub.pop(&node.id) {
                    delivered = true;
                    let outcome = node.dispatcher.on_bytes(&frame).await;
                    outcomes
                        .entry(node.id.as_str().to_string())
                        .or_default()
                        .push(outcome);
                }
            }
            if !delivered {
                return outcomes;
            }
        }
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

mod replication;
mod sessions;
