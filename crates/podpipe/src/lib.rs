//! Podpipe: dial services inside a cluster
//!
//! Resolves a service to one of its pods, upgrades a connection to that
//! pod's port-forward endpoint, and opens an error/data stream pair for each
//! logical connection.
//!
//! # Example
//!
//! ```rust,ignore
//! use podpipe::PodPipe;
//! use tokio::io::AsyncWriteExt;
//!
//! let pipe = PodPipe::new(cluster, upgrader)?;
//! let mut conn = pipe.dial("default", "redis:6379").await?;
//! conn.write_all(b"PING\r\n").await?;
//! ```

mod cluster;
mod config;
mod connection;
mod engine;
mod error;
mod error_stream;
mod forwarder;
mod pipe;
mod recovery;
mod request_id;
mod resolver;
mod session;
mod stream_pair;
mod target;

pub use cluster::{
    ClusterClient, ClusterError, ContainerInfo, LabelSelector, PodInfo, PodPhase, ServiceInfo,
};
pub use config::{ClusterConfig, ResolvedClusterConfig, CONFIG_ENV_VAR};
pub use connection::TunnelConnection;
pub use engine::{PodPipe, DEFAULT_ERROR_WAIT};
pub use error::{CopyDirection, TunnelError};
pub use error_stream::{ErrorOutcome, ErrorSlot};
pub use forwarder::{Forwarder, LocalListener};
pub use pipe::{pipe, ForwardedStream, PipeDialer, PipeListener, PIPE_BUFFER_SIZE};
pub use recovery::{wait_for_service_running, NoRecovery, RecoveryHook, ScaleUpRecovery};
pub use request_id::RequestIdAllocator;
pub use resolver::{Backend, Resolver};
pub use session::{BoxedStream, Session, SessionError, SubStream, TransportUpgrader, UpgradeRequest};
pub use stream_pair::StreamPair;
pub use target::Target;

pub use podpipe_protocol::{RequestId, StreamType};
