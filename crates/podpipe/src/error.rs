use std::io;

use podpipe_protocol::StreamType;
use thiserror::Error;

use crate::cluster::ClusterError;
use crate::session::SessionError;

/// Direction of a forwarding copy task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    /// Data sub-stream to local socket
    RemoteToLocal,
    /// Local socket to data sub-stream
    LocalToRemote,
}

impl std::fmt::Display for CopyDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CopyDirection::RemoteToLocal => f.write_str("incoming"),
            CopyDirection::LocalToRemote => f.write_str("outgoing"),
        }
    }
}

/// Errors for dialing and forwarding through a cluster tunnel
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Service '{service}' not found in namespace '{namespace}'")]
    ServiceNotFound { namespace: String, service: String },

    #[error("No pod for service '{service}' in namespace '{namespace}' is in running state")]
    NoRunningBackend { namespace: String, service: String },

    #[error("Cluster query failed ({context}): {source}")]
    Cluster {
        context: String,
        #[source]
        source: ClusterError,
    },

    #[error("Pod '{pod}' exposes several ports {ports:?}; pick one with 'service:port'")]
    AmbiguousPort { pod: String, ports: Vec<u16> },

    #[error("Pod '{pod}' exposes no ports")]
    NoPortsExposed { pod: String },

    #[error("Transport upgrade to pod '{pod}' failed: {source}")]
    Upgrade {
        pod: String,
        #[source]
        source: SessionError,
    },

    #[error("Create {stream_type} stream: {source}")]
    StreamCreationFailed {
        stream_type: StreamType,
        #[source]
        source: SessionError,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("An error occurred forwarding {port}: {message}")]
    RemoteReported { port: u16, message: String },

    #[error("Error reading from error stream for port {port}: {message}")]
    ErrorStreamRead { port: u16, message: String },

    #[error("Failed {direction} data copy: {source}")]
    CopyFailed {
        direction: CopyDirection,
        #[source]
        source: io::Error,
    },

    #[error("Connection already closed")]
    AlreadyClosed,
}

impl TunnelError {
    pub(crate) fn invalid_target(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn cluster(context: impl Into<String>, source: ClusterError) -> Self {
        Self::Cluster {
            context: context.into(),
            source,
        }
    }

    /// Whether a recovery attempt may make a retry succeed
    pub fn is_no_running_backend(&self) -> bool {
        matches!(self, Self::NoRunningBackend { .. })
    }
}

/// Errors a closing transport reports during normal teardown
pub(crate) fn is_transport_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
