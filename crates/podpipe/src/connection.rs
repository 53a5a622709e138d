use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use podpipe_protocol::RequestId;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::error::TunnelError;
use crate::error_stream::ErrorSlot;
use crate::session::{BoxedStream, Session};
use crate::stream_pair::StreamPair;

/// A dialed connection to a service port inside the cluster
///
/// Reads and writes go straight to the data sub-stream. When the data
/// stream fails or first reaches EOF, the error is held back for up to the configured error wait
/// so that the remote's explanation (posted on the error stream) can be
/// returned instead of a bare reset.
pub struct TunnelConnection {
    data: BoxedStream,
    errors: ErrorSlot,
    error_wait: Duration,
    /// Resolves to the error to return, or `None` for a plain EOF
    pending_read: Option<BoxFuture<'static, Option<io::Error>>>,
    pending_write: Option<BoxFuture<'static, io::Error>>,
    request_id: RequestId,
    service: String,
    port: u16,
    closed: bool,
    eof_checked: bool,
    // Dropping the session may tear down every stream it carries.
    _session: Arc<dyn Session>,
}

impl TunnelConnection {
    pub(crate) fn new(
        pair: StreamPair,
        session: Arc<dyn Session>,
        service: String,
        error_wait: Duration,
    ) -> Self {
        let StreamPair {
            error,
            data,
            request_id,
            port,
        } = pair;

        Self {
            data,
            errors: ErrorSlot::monitor(error, port, request_id),
            error_wait,
            pending_read: None,
            pending_write: None,
            request_id,
            service,
            port,
            closed: false,
            eof_checked: false,
            _session: session,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Backend port inside the pod
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The real endpoint lives inside the cluster, so both addresses report
    /// loopback with the backend port.
    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.local_addr()
    }

    /// Accepted and ignored: the session exposes no deadlines. Wrap calls in
    /// `tokio::time::timeout` instead.
    pub fn set_deadline(&self, _deadline: Option<Instant>) -> Result<(), TunnelError> {
        Ok(())
    }

    /// Accepted and ignored, see [`set_deadline`](Self::set_deadline)
    pub fn set_read_deadline(&self, _deadline: Option<Instant>) -> Result<(), TunnelError> {
        Ok(())
    }

    /// Accepted and ignored, see [`set_deadline`](Self::set_deadline)
    pub fn set_write_deadline(&self, _deadline: Option<Instant>) -> Result<(), TunnelError> {
        Ok(())
    }

    /// Close the data stream's write side
    ///
    /// A second call returns [`TunnelError::AlreadyClosed`], which callers
    /// can ignore.
    pub async fn close(&mut self) -> Result<(), TunnelError> {
        if self.closed {
            return Err(TunnelError::AlreadyClosed);
        }
        self.closed = true;
        self.data.shutdown().await?;
        tracing::debug!(request_id = %self.request_id, service = %self.service, "Closed tunnel connection");
        Ok(())
    }

    fn explain(&self, err: io::Error) -> BoxFuture<'static, io::Error> {
        tracing::debug!(request_id = %self.request_id, error = %err, "Data stream failed, checking error stream");
        self.errors.clone().explain(err, self.error_wait).boxed()
    }

    fn explain_eof(&self) -> BoxFuture<'static, Option<io::Error>> {
        tracing::debug!(request_id = %self.request_id, "Data stream ended, checking error stream");
        self.errors.clone().explain_eof(self.error_wait).boxed()
    }
}

impl AsyncRead for TunnelConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if let Some(pending) = this.pending_read.as_mut() {
                let outcome = ready!(pending.as_mut().poll(cx));
                this.pending_read = None;
                return Poll::Ready(match outcome {
                    Some(err) => Err(err),
                    None => Ok(()),
                });
            }
            let before = buf.filled().len();
            match ready!(Pin::new(&mut this.data).poll_read(cx, buf)) {
                // The remote closes the data stream right after posting an
                // error, so the first EOF waits for the error stream too.
                Ok(())
                    if buf.filled().len() == before
                        && buf.remaining() > 0
                        && !this.eof_checked =>
                {
                    this.eof_checked = true;
                    this.pending_read = Some(this.explain_eof());
                }
                Ok(()) => return Poll::Ready(Ok(())),
                Err(e) => this.pending_read = Some(this.explain(e).map(Some).boxed()),
            }
        }
    }
}

impl AsyncWrite for TunnelConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        loop {
            if let Some(pending) = this.pending_write.as_mut() {
                let err = ready!(pending.as_mut().poll(cx));
                this.pending_write = None;
                return Poll::Ready(Err(err));
            }
            match ready!(Pin::new(&mut this.data).poll_write(cx, buf)) {
                Ok(n) => return Poll::Ready(Ok(n)),
                Err(e) => this.pending_write = Some(this.explain(e)),
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().data).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Ok(()));
        }
        ready!(Pin::new(&mut this.data).poll_shutdown(cx))?;
        this.closed = true;
        Poll::Ready(Ok(()))
    }
}
