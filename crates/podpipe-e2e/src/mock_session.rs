//! Port-forward session that plays the remote end of the protocol
//!
//! Each data stream is bridged to a local TCP backend chosen by the pod's
//! port map. A port without a reachable backend gets the same treatment a
//! real kubelet gives it: an error message on the error stream, then a
//! clean close of the data stream.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use http::HeaderMap;
use parking_lot::Mutex;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;

use podpipe::{BoxedStream, Session, SessionError, TransportUpgrader, UpgradeRequest};
use podpipe_protocol::{RequestId, StreamHeaders, StreamType};

const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// How long the remote waits to see the error stream's write side closed
const ERROR_CLOSE_WAIT: Duration = Duration::from_millis(500);

/// Something the remote end observed, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Created {
        stream_type: StreamType,
        request_id: RequestId,
    },
    /// The client closed its write side of the error stream
    ErrorWriteClosed { request_id: RequestId },
    /// The first payload byte arrived on the data stream
    FirstDataByte { request_id: RequestId },
}

/// Remote end of one pod's port-forward session
pub struct MockSession {
    pod: String,
    ports: HashMap<u16, SocketAddr>,
    /// Remote halves of error streams awaiting their data stream
    error_streams: DashMap<RequestId, DuplexStream>,
    events: Arc<Mutex<Vec<StreamEvent>>>,
    refuse_data_streams: AtomicBool,
}

impl MockSession {
    pub fn new(pod: &str, ports: HashMap<u16, SocketAddr>) -> Arc<Self> {
        Arc::new(Self {
            pod: pod.to_string(),
            ports,
            error_streams: DashMap::new(),
            events: Arc::new(Mutex::new(Vec::new())),
            refuse_data_streams: AtomicBool::new(false),
        })
    }

    pub fn pod(&self) -> &str {
        &self.pod
    }

    /// Refuse every data stream creation from now on
    pub fn set_refuse_data_streams(&self, refuse: bool) {
        self.refuse_data_streams.store(refuse, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().clone()
    }

    /// Events belonging to one request
    pub fn events_for(&self, request_id: RequestId) -> Vec<StreamEvent> {
        self.events()
            .into_iter()
            .filter(|event| match event {
                StreamEvent::Created { request_id: id, .. }
                | StreamEvent::ErrorWriteClosed { request_id: id }
                | StreamEvent::FirstDataByte { request_id: id } => *id == request_id,
            })
            .collect()
    }

    fn record(&self, event: StreamEvent) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl Session for MockSession {
    async fn create_stream(&self, headers: &HeaderMap) -> Result<BoxedStream, SessionError> {
        let headers = StreamHeaders::from_header_map(headers)
            .map_err(|e| SessionError::Refused(e.to_string()))?;
        let request_id = headers.request_id;

        match headers.stream_type {
            StreamType::Error => {
                let (local, remote) = duplex(STREAM_BUFFER_SIZE);
                self.record(StreamEvent::Created {
                    stream_type: StreamType::Error,
                    request_id,
                });
                self.error_streams.insert(request_id, remote);
                Ok(Box::new(local))
            }
            StreamType::Data => {
                if self.refuse_data_streams.load(Ordering::SeqCst) {
                    return Err(SessionError::Refused("data streams disabled".to_string()));
                }
                let (_, error_remote) = self.error_streams.remove(&request_id).ok_or_else(|| {
                    SessionError::Refused(format!(
                        "data stream for request {} opened before its error stream",
                        request_id
                    ))
                })?;

                let (local, remote) = duplex(STREAM_BUFFER_SIZE);
                self.record(StreamEvent::Created {
                    stream_type: StreamType::Data,
                    request_id,
                });

                let forward = RemoteForward {
                    pod: self.pod.clone(),
                    port: headers.port,
                    backend: self.ports.get(&headers.port).copied(),
                    request_id,
                    events: self.events.clone(),
                };
                tokio::spawn(forward.run(error_remote, remote));

                Ok(Box::new(local))
            }
        }
    }
}

/// Remote handling of one error/data stream pair
struct RemoteForward {
    pod: String,
    port: u16,
    backend: Option<SocketAddr>,
    request_id: RequestId,
    events: Arc<Mutex<Vec<StreamEvent>>>,
}

impl RemoteForward {
    async fn run(self, mut error: DuplexStream, data: DuplexStream) {
        let mut probe = [0u8; 1];
        if let Ok(Ok(0)) = tokio::time::timeout(ERROR_CLOSE_WAIT, error.read(&mut probe)).await {
            self.events.lock().push(StreamEvent::ErrorWriteClosed {
                request_id: self.request_id,
            });
        }

        let backend = match self.backend {
            Some(addr) => TcpStream::connect(addr).await.ok(),
            None => None,
        };

        let Some(backend) = backend else {
            let message = format!(
                "error forwarding port {port} to pod {pod}: dial tcp 127.0.0.1:{port}: connect: Connection refused",
                port = self.port,
                pod = self.pod,
            );
            tracing::debug!(request_id = %self.request_id, "Rejecting forward: {}", message);
            let _ = error.write_all(message.as_bytes()).await;
            let _ = error.shutdown().await;
            drop(data);
            return;
        };

        let (mut data_rd, mut data_wr) = tokio::io::split(data);
        let (mut tcp_rd, mut tcp_wr) = backend.into_split();

        let events = self.events.clone();
        let request_id = self.request_id;
        let inbound = async move {
            let mut buf = vec![0u8; 8192];
            let mut first = true;
            loop {
                match data_rd.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if first {
                            events.lock().push(StreamEvent::FirstDataByte { request_id });
                            first = false;
                        }
                        if tcp_wr.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = tcp_wr.shutdown().await;
        };

        let outbound = async move {
            let _ = tokio::io::copy(&mut tcp_rd, &mut data_wr).await;
            let _ = data_wr.shutdown().await;
        };

        tokio::join!(inbound, outbound);
        let _ = error.shutdown().await;
        tracing::debug!(request_id = %self.request_id, "Remote forward finished");
    }
}

/// Upgrader handing out one [`MockSession`] per pod
#[derive(Default)]
pub struct MockUpgrader {
    sessions: DashMap<String, Arc<MockSession>>,
    requests: Mutex<Vec<UpgradeRequest>>,
}

impl MockUpgrader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_session(&self, session: Arc<MockSession>) {
        self.sessions.insert(session.pod().to_string(), session);
    }

    pub fn session(&self, pod: &str) -> Option<Arc<MockSession>> {
        self.sessions.get(pod).map(|entry| entry.value().clone())
    }

    /// Upgrade requests received so far
    pub fn requests(&self) -> Vec<UpgradeRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl TransportUpgrader for MockUpgrader {
    async fn upgrade(&self, request: UpgradeRequest) -> Result<Arc<dyn Session>, SessionError> {
        let session = self.session(&request.pod);
        self.requests.lock().push(request.clone());
        match session {
            Some(session) => Ok(session as Arc<dyn Session>),
            None => Err(SessionError::Upgrade(format!(
                "pod {} has no port-forward endpoint",
                request.pod
            ))),
        }
    }
}
