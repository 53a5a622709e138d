//! Multiplexed transport session abstraction
//!
//! A session is an already-upgraded connection to the API server that can
//! open many header-tagged sub-streams. Framing and flow control belong to
//! the transport; the engine only opens streams and reads/writes them.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use http::header::{AUTHORIZATION, CONNECTION, UPGRADE};
use http::{HeaderMap, Method, Request};
use podpipe_protocol::{portforward_path, PORTFORWARD_PROTOCOL};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::ResolvedClusterConfig;

/// Errors from the transport session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Stream refused: {0}")]
    Refused(String),

    #[error("Session closed")]
    Closed,

    #[error("Upgrade failed: {0}")]
    Upgrade(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A sub-stream of a session
///
/// `AsyncWriteExt::shutdown` closes the write side only; reads continue
/// until the remote closes its side.
pub trait SubStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SubStream for T {}

pub type BoxedStream = Box<dyn SubStream>;

/// An upgraded multiplexed connection
#[async_trait]
pub trait Session: Send + Sync {
    /// Open a sub-stream tagged with `headers`
    async fn create_stream(&self, headers: &HeaderMap) -> Result<BoxedStream, SessionError>;
}

/// Performs the protocol upgrade that yields a [`Session`]
#[async_trait]
pub trait TransportUpgrader: Send + Sync {
    async fn upgrade(&self, request: UpgradeRequest) -> Result<Arc<dyn Session>, SessionError>;
}

/// Everything needed to upgrade a connection to a pod's port-forward endpoint
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub host: String,
    pub path: String,
    pub namespace: String,
    pub pod: String,
    pub protocol: &'static str,
    pub bearer_token: Option<String>,
    pub tls: Arc<rustls::ClientConfig>,
}

impl UpgradeRequest {
    pub fn new(config: &ResolvedClusterConfig, namespace: &str, pod: &str) -> Self {
        Self {
            host: config.host.clone(),
            path: portforward_path(namespace, pod),
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            protocol: PORTFORWARD_PROTOCOL,
            bearer_token: config.bearer_token.clone(),
            tls: config.tls.clone(),
        }
    }

    /// The HTTP request that starts the upgrade handshake
    pub fn to_http_request(&self) -> Result<Request<()>, SessionError> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(format!("https://{}{}", self.host, self.path))
            .header(CONNECTION, "Upgrade")
            .header(UPGRADE, "SPDY/3.1")
            .header("X-Stream-Protocol-Version", self.protocol);

        if let Some(token) = &self.bearer_token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        builder
            .body(())
            .map_err(|e| SessionError::Upgrade(format!("Invalid upgrade request: {}", e)))
    }
}
