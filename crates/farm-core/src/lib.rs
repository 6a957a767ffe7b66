//! Shared types, wire messages and configuration for farm.
//! All other farm crates depend on this one.

pub mod config;
pub mod context_name;
pub mod message;

pub use context_name::ContextName;
pub use message::{ChunkMessage, ClusterMessage, MemberId, RemovalMessage};
