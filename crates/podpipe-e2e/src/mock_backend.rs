//! Mock TCP backends standing in for the processes inside pods

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Behavior mode for the mock backend
#[derive(Clone, Debug)]
pub enum BackendMode {
    /// Echo back all received data
    Echo,
    /// Send a greeting on connect, then echo
    Greeting(Vec<u8>),
    /// Read and record, never answer
    Silent,
}

/// A TCP service a pod port is mapped to
pub struct MockBackend {
    addr: SocketAddr,
    received: Arc<RwLock<Vec<Vec<u8>>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl MockBackend {
    /// Start an echo backend on an ephemeral port
    pub async fn start() -> Self {
        Self::start_with_mode(BackendMode::Echo).await
    }

    pub async fn start_with_mode(mode: BackendMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock backend");
        let addr = listener.local_addr().unwrap();

        let received: Arc<RwLock<Vec<Vec<u8>>>> = Arc::new(RwLock::new(Vec::new()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let received_clone = received.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Mock backend shutting down");
                        break;
                    }
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                let received = received_clone.clone();
                                let mode = mode.clone();
                                tokio::spawn(async move {
                                    handle_connection(stream, mode, received).await;
                                });
                            }
                            Err(e) => {
                                tracing::error!("Mock backend accept error: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        });

        Self {
            addr,
            received,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bytes received per finished connection
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.read().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.received.read().len()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    mode: BackendMode,
    received: Arc<RwLock<Vec<Vec<u8>>>>,
) {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];

    if let BackendMode::Greeting(greeting) = &mode {
        if let Err(e) = stream.write_all(greeting).await {
            tracing::error!("Greeting write error: {}", e);
            return;
        }
    }

    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                data.extend_from_slice(&buf[..n]);
                if matches!(mode, BackendMode::Silent) {
                    continue;
                }
                if let Err(e) = stream.write_all(&buf[..n]).await {
                    tracing::error!("Echo write error: {}", e);
                    break;
                }
            }
            Err(e) => {
                tracing::error!("Backend read error: {}", e);
                break;
            }
        }
    }

    received.write().push(data);
}
