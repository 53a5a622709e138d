use podpipe_protocol::{RequestId, StreamHeaders, StreamType};
use tokio::io::AsyncWriteExt;

use crate::error::TunnelError;
use crate::session::{BoxedStream, Session, SessionError};

/// Error and data sub-streams of one logical connection
pub struct StreamPair {
    /// Write side already closed; the remote reports failures here
    pub error: BoxedStream,
    pub data: BoxedStream,
    pub request_id: RequestId,
    pub port: u16,
}

impl StreamPair {
    /// Open the error stream, close its write side, then open the data stream
    ///
    /// If the data stream fails after the error stream was created, the error
    /// stream is dropped. The request id must not be reused.
    pub async fn open(
        session: &dyn Session,
        request_id: RequestId,
        port: u16,
    ) -> Result<Self, TunnelError> {
        let headers = StreamHeaders::new(StreamType::Error, port, request_id);

        let mut error = session
            .create_stream(&headers.to_header_map())
            .await
            .map_err(|source| TunnelError::StreamCreationFailed {
                stream_type: StreamType::Error,
                source,
            })?;

        // Nothing is ever sent on the error stream.
        error
            .shutdown()
            .await
            .map_err(|e| TunnelError::StreamCreationFailed {
                stream_type: StreamType::Error,
                source: SessionError::Io(e),
            })?;

        let data = session
            .create_stream(&headers.with_stream_type(StreamType::Data).to_header_map())
            .await
            .map_err(|source| TunnelError::StreamCreationFailed {
                stream_type: StreamType::Data,
                source,
            })?;

        tracing::debug!(request_id = %request_id, port, "Opened stream pair");

        Ok(Self {
            error,
            data,
            request_id,
            port,
        })
    }
}
