//! Cluster messages exchanged between farm members.
//!
//! Two kinds travel on the wire: chunks of a replicated artifact and
//! removal intents. Both are JSON objects tagged by `kind`; chunk payloads
//! are hex-encoded. A `kind` this build does not know decodes to
//! [`ClusterMessage::Unknown`] so the receiver can ignore it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Reference to a cluster member, as named in the membership directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub String);

impl MemberId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One fragment of an artifact's byte stream.
///
/// Chunks of one artifact are sent in `seq` order starting at 0. The last
/// chunk carries an empty payload and marks the end of the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMessage {
    pub origin: MemberId,
    /// Artifact file name; the replication key on the receiver.
    pub file_name: String,
    /// Deployment target the artifact installs as.
    pub target_name: String,
    pub seq: u64,
    #[serde(with = "hex_bytes")]
    pub payload: Bytes,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
}

impl ChunkMessage {
    pub fn is_end_marker(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Intent to remove a deployment target. Carries no payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalMessage {
    pub origin: MemberId,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    /// Informational only.
    pub correlation_token: String,
    pub target_name: String,
}

impl RemovalMessage {
    pub fn new(origin: MemberId, target_name: &str) -> Self {
        let timestamp = now_millis();
        Self {
            origin,
            timestamp,
            correlation_token: format!("Undeploy:{target_name}:{timestamp}"),
            target_name: target_name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClusterMessage {
    Chunk(ChunkMessage),
    Removal(RemovalMessage),
    #[serde(other)]
    Unknown,
}

impl ClusterMessage {
    pub fn origin(&self) -> Option<&MemberId> {
        match self {
            ClusterMessage::Chunk(c) => Some(&c.origin),
            ClusterMessage::Removal(r) => Some(&r.origin),
            ClusterMessage::Unknown => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClusterMessage::Chunk(_) => "chunk",
            ClusterMessage::Removal(_) => "removal",
            ClusterMessage::Unknown => "unknown",
        }
    }

    /// Serialize to bytes for transmission.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Encode)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(data).map_err(WireError::Decode)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("failed to encode cluster message: {0}")]
    Encode(serde_json::Error),
    #[error("failed to decode cluster message: {0}")]
    Decode(serde_json::Error),
}

/// Current Unix time in milliseconds. A clock before the epoch reads as 0.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

mod hex_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(bytes))
    }
}
