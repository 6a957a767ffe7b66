//! Cluster channel, the member-to-member messaging seam.
//!
//! The transport and membership directory live outside this crate. Anything
//! that can name the local member, list the other members and queue a message
//! for one of them (or all of them) can carry farm traffic.

use serde::{Deserialize, Serialize};

use farm_core::message::{ClusterMessage, MemberId, WireError};

/// Target for a cluster send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SendTarget {
    /// Every other member of the cluster.
    #[default]
    Broadcast,

    /// One member, by name.
    Member { name: MemberId },
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("member {0} is not part of the cluster")]
    UnknownMember(MemberId),
    #[error("outbound queue closed")]
    Closed,
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Outbound half of the transport plus the membership view.
///
/// Delivery is best effort. Implementations must preserve per-sender order
/// for messages queued to the same member.
pub trait ClusterChannel: Send + Sync {
    /// This node, as it appears in message `origin` fields.
    fn local_member(&self) -> MemberId;

    /// Every other member currently in the cluster. Never includes the local
    /// member.
    fn members(&self) -> Vec<MemberId>;

    fn send(&self, msg: &ClusterMessage, target: &SendTarget) -> Result<(), ChannelError>;
}
