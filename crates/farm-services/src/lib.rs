//! Replication and coordination of deployed artifacts.
//!
//! Outbound, [`ReplicationCoordinator`] streams artifacts and removal intents
//! to every member. Inbound, [`MessageDispatcher`] reassembles chunk streams
//! through the [`SessionRegistry`] and applies installs and removals locally,
//! each under the [`ServicedLock`] of its target.

pub mod channel;
pub mod deployment;
pub mod dispatch;
pub mod host;
pub mod local_ops;
pub mod replication;
pub mod scheduler;
pub mod session;
pub mod watcher;


pub use channel::{ChannelError, ClusterChannel, SendTarget};
pub use deployment::{DeployedUnit, DeploymentController, DeploymentTarget, ServicedLock};
pub use dispatch::{DispatchOutcome, MessageDispatcher};
pub use host::{HostedUnit, LocalHost};
pub use local_ops::{LocalDeploymentOps, Removed};
pub use replication::{InstallReport, ReplicationCoordinator, CHUNK_SIZE};
pub use scheduler::{Scheduler, TickReport};
pub use session::{AppendOutcome, CompletedTransfer, SessionError, SessionHandle, SessionRegistry};
pub use watcher::{ChangeEvent, ChangeSource, WarWatcher};
