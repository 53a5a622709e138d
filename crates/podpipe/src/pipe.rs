//! In-memory listener for handing a forwarded connection to the caller

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::TunnelError;
use crate::forwarder::LocalListener;

/// Buffer size of each in-memory connection
pub const PIPE_BUFFER_SIZE: usize = 10 * 1024;

/// Listening half of an in-memory pipe
pub struct PipeListener {
    incoming: mpsc::Receiver<DuplexStream>,
}

/// Dialing half of an in-memory pipe
#[derive(Clone)]
pub struct PipeDialer {
    outgoing: mpsc::Sender<DuplexStream>,
    buffer: usize,
}

/// Create a connected dialer/listener pair
pub fn pipe(buffer: usize) -> (PipeDialer, PipeListener) {
    let (outgoing, incoming) = mpsc::channel(1);
    (PipeDialer { outgoing, buffer }, PipeListener { incoming })
}

impl PipeDialer {
    pub async fn dial(&self) -> io::Result<DuplexStream> {
        let (client, server) = tokio::io::duplex(self.buffer);
        self.outgoing
            .send(server)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "pipe listener closed"))?;
        Ok(client)
    }
}

#[async_trait]
impl LocalListener for PipeListener {
    type Stream = DuplexStream;

    async fn accept(&mut self) -> io::Result<DuplexStream> {
        self.incoming
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "pipe dialer closed"))
    }
}

/// The caller's end of a piped forward, plus the forwarding loop's result
pub struct ForwardedStream {
    stream: DuplexStream,
    task: JoinHandle<Result<(), TunnelError>>,
}

impl ForwardedStream {
    pub(crate) fn new(stream: DuplexStream, task: JoinHandle<Result<(), TunnelError>>) -> Self {
        Self { stream, task }
    }

    pub fn into_parts(self) -> (DuplexStream, JoinHandle<Result<(), TunnelError>>) {
        (self.stream, self.task)
    }

    /// Close the local end and wait for the forwarding loop's result
    pub async fn finish(mut self) -> Result<(), TunnelError> {
        let _ = self.stream.shutdown().await;
        drop(self.stream);
        self.task
            .await
            .map_err(|e| TunnelError::Transport(io::Error::other(e)))?
    }
}

impl AsyncRead for ForwardedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for ForwardedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}
