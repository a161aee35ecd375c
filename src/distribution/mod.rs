//! Connection to the external Erlang runtime.
//!
//! [`DistributionManager`] is the only owner of the connection. Everything
//! else talks to it through a cloned [`DistributionHandle`].

pub mod bridge;
pub mod capture;
pub mod error;
pub mod link;
pub mod manager;
pub mod node_name;
pub mod retry;
pub mod spawn;
pub mod tcp;

use serde::Serialize;

pub use capture::{CaptureRegistry, CaptureSink};
pub use error::DistributionError;
pub use link::{ConnectTarget, Connector, NodeLink, RemoteCall, RpcReply};
pub use manager::{DistributionHandle, DistributionManager, ManagerSettings};
pub use node_name::NameMode;
pub use retry::RetrySchedule;
pub use spawn::{ProcessSpawner, RuntimeProcess, SpawnSpec, Spawner, TemplateVars};
pub use tcp::TcpConnector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub status: ConnectionStatus,
    pub node: String,
    /// Runtime processes spawned by this manager so far.
    pub spawned: u32,
}
