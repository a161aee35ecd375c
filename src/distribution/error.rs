use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("node {0} is unreachable")]
    Unreachable(String),

    #[error("connect attempt to {node} gave no answer within {timeout:?}")]
    ConnectTimeout { node: String, timeout: Duration },

    #[error("could not connect to {node} after {attempts} attempts")]
    ConnectFailed { node: String, attempts: u32 },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{module}:{function} timed out after {timeout:?}")]
    Timeout {
        module: String,
        function: String,
        timeout: Duration,
    },

    /// The remote call ran and raised.
    #[error("remote call failed: {0}")]
    Remote(String),

    #[error("node went down")]
    NodeDown,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("runtime connection is disabled")]
    Disabled,

    #[error("distribution manager is stopped")]
    Stopped,
}
