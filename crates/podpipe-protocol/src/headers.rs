use http::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;

use crate::types::{RequestId, StreamType};

/// Sub-protocol negotiated during the transport upgrade
pub const PORTFORWARD_PROTOCOL: &str = "portforward.k8s.io";

// Header names are case-insensitive on the wire; `http` stores them lower-case.
const STREAM_TYPE_HEADER: &str = "streamtype";
const PORT_HEADER: &str = "port";
const REQUEST_ID_HEADER: &str = "requestid";

/// Errors parsing sub-stream headers
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Missing header '{0}'")]
    Missing(&'static str),

    #[error("Invalid value for header '{name}': {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Header set identifying one sub-stream of a logical connection
///
/// The error and data sub-streams of a connection carry identical headers
/// apart from the stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeaders {
    pub stream_type: StreamType,
    pub port: u16,
    pub request_id: RequestId,
}

impl StreamHeaders {
    pub fn new(stream_type: StreamType, port: u16, request_id: RequestId) -> Self {
        Self {
            stream_type,
            port,
            request_id,
        }
    }

    /// Same connection, different stream type
    pub fn with_stream_type(self, stream_type: StreamType) -> Self {
        Self {
            stream_type,
            ..self
        }
    }

    /// Render as an HTTP header map for `create_stream`
    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(3);
        headers.insert(
            HeaderName::from_static(STREAM_TYPE_HEADER),
            HeaderValue::from_static(self.stream_type.as_str()),
        );
        headers.insert(HeaderName::from_static(PORT_HEADER), HeaderValue::from(self.port));
        headers.insert(
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderValue::from(self.request_id.get()),
        );
        headers
    }

    /// Parse the headers a sub-stream was opened with
    pub fn from_header_map(headers: &HeaderMap) -> Result<Self, HeaderError> {
        let stream_type = header_str(headers, STREAM_TYPE_HEADER)?
            .parse::<StreamType>()
            .map_err(|reason| HeaderError::Invalid {
                name: STREAM_TYPE_HEADER,
                reason,
            })?;

        let port = header_str(headers, PORT_HEADER)?
            .parse::<u16>()
            .map_err(|e| HeaderError::Invalid {
                name: PORT_HEADER,
                reason: e.to_string(),
            })?;
        if port == 0 {
            return Err(HeaderError::Invalid {
                name: PORT_HEADER,
                reason: "port must be non-zero".to_string(),
            });
        }

        let request_id = header_str(headers, REQUEST_ID_HEADER)?
            .parse::<RequestId>()
            .map_err(|e| HeaderError::Invalid {
                name: REQUEST_ID_HEADER,
                reason: e.to_string(),
            })?;

        Ok(Self {
            stream_type,
            port,
            request_id,
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, HeaderError> {
    let value = headers.get(name).ok_or(HeaderError::Missing(name))?;
    value.to_str().map_err(|e| HeaderError::Invalid {
        name,
        reason: e.to_string(),
    })
}

/// Request path for a port-forward upgrade against a pod
pub fn portforward_path(namespace: &str, pod: &str) -> String {
    format!("/api/v1/namespaces/{}/pods/{}/portforward", namespace, pod)
}
