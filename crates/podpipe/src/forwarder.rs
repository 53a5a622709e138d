use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use podpipe_protocol::RequestId;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{is_transport_closed, CopyDirection, TunnelError};
use crate::error_stream::ErrorSlot;
use crate::request_id::RequestIdAllocator;
use crate::session::Session;
use crate::stream_pair::StreamPair;

/// Source of local connections for the forwarding loop
#[async_trait]
pub trait LocalListener: Send {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    async fn accept(&mut self) -> io::Result<Self::Stream>;
}

#[async_trait]
impl LocalListener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<TcpStream> {
        let (stream, peer_addr) = TcpListener::accept(self).await?;
        tracing::debug!(%peer_addr, "Accepted local connection");
        Ok(stream)
    }
}

/// Wires one local connection to a fresh stream pair on a session
pub struct Forwarder {
    session: Arc<dyn Session>,
    request_ids: Arc<RequestIdAllocator>,
    error_wait: Duration,
}

impl Forwarder {
    pub fn new(
        session: Arc<dyn Session>,
        request_ids: Arc<RequestIdAllocator>,
        error_wait: Duration,
    ) -> Self {
        Self {
            session,
            request_ids,
            error_wait,
        }
    }

    /// Accept a single local connection and forward it to `port`
    ///
    /// Returns once the remote side finished sending, the local side hit a
    /// hard I/O error, or `cancel` fired. The copy tasks are not stopped and
    /// may still be running; close the local socket to tear them down. A
    /// message on the error stream always takes precedence over the copy
    /// result.
    pub async fn forward<L: LocalListener>(
        &self,
        cancel: CancellationToken,
        mut listener: L,
        port: u16,
    ) -> Result<(), TunnelError> {
        let local = listener.accept().await?;
        let request_id = self.request_ids.next();
        self.handle_connection(cancel, local, request_id, port).await
    }

    async fn handle_connection<S>(
        &self,
        cancel: CancellationToken,
        local: S,
        request_id: RequestId,
        port: u16,
    ) -> Result<(), TunnelError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let pair = StreamPair::open(self.session.as_ref(), request_id, port).await?;
        let mut errors = ErrorSlot::monitor(pair.error, port, request_id);

        let (mut data_read, mut data_write) = tokio::io::split(pair.data);
        let (mut local_read, mut local_write) = tokio::io::split(local);

        let mut remote_done = tokio::spawn(async move {
            let copied = tokio::io::copy(&mut data_read, &mut local_write).await;
            let _ = local_write.shutdown().await;
            match copied {
                Ok(bytes) => {
                    tracing::debug!(request_id = %request_id, bytes, "Remote side finished");
                    Ok(())
                }
                Err(e) if is_transport_closed(&e) => Ok(()),
                Err(source) => Err(TunnelError::CopyFailed {
                    direction: CopyDirection::RemoteToLocal,
                    source,
                }),
            }
        });

        let (fault_tx, mut local_fault) = oneshot::channel();
        tokio::spawn(async move {
            let copied = tokio::io::copy(&mut local_read, &mut data_write).await;
            // No more data is coming from this side.
            let _ = data_write.shutdown().await;
            match copied {
                Ok(bytes) => {
                    tracing::debug!(request_id = %request_id, bytes, "Local side finished")
                }
                Err(e) if is_transport_closed(&e) => {}
                Err(source) => {
                    let _ = fault_tx.send(TunnelError::CopyFailed {
                        direction: CopyDirection::LocalToRemote,
                        source,
                    });
                }
            }
        });

        let copied = tokio::select! {
            joined = &mut remote_done => match joined {
                Ok(result) => result,
                Err(e) => Err(TunnelError::CopyFailed {
                    direction: CopyDirection::RemoteToLocal,
                    source: io::Error::other(e),
                }),
            },
            Ok(fault) = &mut local_fault => Err(fault),
            _ = cancel.cancelled() => {
                tracing::debug!(request_id = %request_id, "Forwarding cancelled");
                Ok(())
            }
        };

        if let Err(e) = &copied {
            tracing::error!(request_id = %request_id, error = %e, "Forwarding failed");
        }

        match errors.wait_timeout(self.error_wait).await {
            Some(outcome) => match outcome.into_error(port) {
                Some(remote) => Err(remote),
                None => copied,
            },
            None => {
                tracing::debug!(request_id = %request_id, "No error stream outcome within wait");
                copied
            }
        }
    }
}
