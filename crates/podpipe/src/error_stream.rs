//! Error side-channel monitoring
//!
//! The remote reports backend failures (for example a refused connection to
//! the pod port) asynchronously on the error stream, racing the data
//! stream's own close. The monitor drains the error stream once and posts a
//! single outcome that readers can wait on with a bound.

use std::io;
use std::time::Duration;

use podpipe_protocol::RequestId;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;

use crate::error::TunnelError;
use crate::session::BoxedStream;

/// What the error stream said before it closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorOutcome {
    /// Closed without a message
    Clean,
    /// The remote's explanation
    Remote(String),
    /// Reading the error stream itself failed
    ReadFailed(String),
}

impl ErrorOutcome {
    pub fn into_error(self, port: u16) -> Option<TunnelError> {
        match self {
            ErrorOutcome::Clean => None,
            ErrorOutcome::Remote(message) => Some(TunnelError::RemoteReported { port, message }),
            ErrorOutcome::ReadFailed(message) => {
                Some(TunnelError::ErrorStreamRead { port, message })
            }
        }
    }
}

/// Receiving end of the single error outcome for a connection
#[derive(Clone)]
pub struct ErrorSlot {
    rx: watch::Receiver<Option<ErrorOutcome>>,
    port: u16,
}

impl ErrorSlot {
    /// Spawn a task draining `stream` and return the slot it posts to
    pub fn monitor(mut stream: BoxedStream, port: u16, request_id: RequestId) -> Self {
        let (tx, rx) = watch::channel(None);

        tokio::spawn(async move {
            let mut message = Vec::new();
            let outcome = match stream.read_to_end(&mut message).await {
                Err(e) => ErrorOutcome::ReadFailed(e.to_string()),
                Ok(_) if message.is_empty() => ErrorOutcome::Clean,
                Ok(_) => ErrorOutcome::Remote(String::from_utf8_lossy(&message).into_owned()),
            };

            match &outcome {
                ErrorOutcome::Clean => {
                    tracing::debug!(request_id = %request_id, port, "Error stream closed cleanly")
                }
                other => {
                    tracing::debug!(request_id = %request_id, port, outcome = ?other, "Error stream reported")
                }
            }

            // Stored even if every receiver is gone.
            tx.send_replace(Some(outcome));
        });

        Self { rx, port }
    }

    /// Wait for the outcome; `None` if the monitor vanished without posting
    pub async fn wait(&mut self) -> Option<ErrorOutcome> {
        loop {
            let current = self.rx.borrow_and_update().clone();
            if current.is_some() {
                return current;
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone();
            }
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `limit`
    pub async fn wait_timeout(&mut self, limit: Duration) -> Option<ErrorOutcome> {
        tokio::time::timeout(limit, self.wait()).await.ok().flatten()
    }

    /// Replace a transport error with the remote's explanation, if one
    /// arrives within `limit`
    pub(crate) async fn explain(mut self, err: io::Error, limit: Duration) -> io::Error {
        match self.wait_timeout(limit).await.and_then(|o| o.into_error(self.port)) {
            Some(remote) => io::Error::other(remote),
            None => err,
        }
    }

    /// The remote's explanation for a data stream that ended, if one arrives
    /// within `limit`; `None` means the end was a plain EOF
    pub(crate) async fn explain_eof(mut self, limit: Duration) -> Option<io::Error> {
        self.wait_timeout(limit)
            .await
            .and_then(|o| o.into_error(self.port))
            .map(io::Error::other)
    }
}
