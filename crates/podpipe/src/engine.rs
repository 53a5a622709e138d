use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::cluster::ClusterClient;
use crate::config::{ClusterConfig, ResolvedClusterConfig};
use crate::connection::TunnelConnection;
use crate::error::TunnelError;
use crate::forwarder::Forwarder;
use crate::pipe::{pipe, ForwardedStream, PIPE_BUFFER_SIZE};
use crate::recovery::{NoRecovery, RecoveryHook};
use crate::request_id::RequestIdAllocator;
use crate::resolver::{Backend, Resolver};
use crate::session::{Session, TransportUpgrader, UpgradeRequest};
use crate::stream_pair::StreamPair;
use crate::target::Target;

/// How long a failed read or write waits for the remote's explanation
pub const DEFAULT_ERROR_WAIT: Duration = Duration::from_secs(3);

/// Dials services inside a cluster through port-forward sessions
pub struct PodPipe {
    config: ResolvedClusterConfig,
    resolver: Resolver,
    upgrader: Arc<dyn TransportUpgrader>,
    recovery: Arc<dyn RecoveryHook>,
    request_ids: Arc<RequestIdAllocator>,
    error_wait: Duration,
}

/// A dial target resolved down to a pod, port and session
struct Prepared {
    target: Target,
    backend: Backend,
    port: u16,
    session: Arc<dyn Session>,
}

impl PodPipe {
    /// Build from the default cluster config location
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        upgrader: Arc<dyn TransportUpgrader>,
    ) -> Result<Self, TunnelError> {
        Self::from_file(ClusterConfig::default_path(), cluster, upgrader)
    }

    /// Build from a cluster config file
    pub fn from_file(
        path: impl AsRef<Path>,
        cluster: Arc<dyn ClusterClient>,
        upgrader: Arc<dyn TransportUpgrader>,
    ) -> Result<Self, TunnelError> {
        let path = path.as_ref();
        let config = ClusterConfig::load(path)?.resolve()?;
        tracing::info!(host = %config.host, "Loaded cluster config from {:?}", path);
        Ok(Self::with_config(config, cluster, upgrader))
    }

    pub fn with_config(
        config: ResolvedClusterConfig,
        cluster: Arc<dyn ClusterClient>,
        upgrader: Arc<dyn TransportUpgrader>,
    ) -> Self {
        Self {
            config,
            resolver: Resolver::new(cluster),
            upgrader,
            recovery: Arc::new(NoRecovery),
            request_ids: Arc::new(RequestIdAllocator::new()),
            error_wait: DEFAULT_ERROR_WAIT,
        }
    }

    pub fn with_recovery_hook(mut self, hook: Arc<dyn RecoveryHook>) -> Self {
        self.recovery = hook;
        self
    }

    pub fn set_recovery_hook(&mut self, hook: Arc<dyn RecoveryHook>) {
        self.recovery = hook;
    }

    pub fn with_error_wait(mut self, error_wait: Duration) -> Self {
        self.error_wait = error_wait;
        self
    }

    pub fn config(&self) -> &ResolvedClusterConfig {
        &self.config
    }

    /// Resolve a service, giving the recovery hook one chance when no pod
    /// is running
    pub async fn resolve(&self, namespace: &str, service: &str) -> Result<Backend, TunnelError> {
        match self.resolver.resolve(namespace, service).await {
            Err(err) if err.is_no_running_backend() => {
                tracing::warn!(namespace, service, "No running backend, attempting recovery");
                if self
                    .recovery
                    .attempt_recovery(self.resolver.cluster().as_ref(), namespace, service)
                    .await
                {
                    self.resolver.resolve(namespace, service).await
                } else {
                    Err(err)
                }
            }
            other => other,
        }
    }

    /// Open a connection to `spec` (`service` or `service:port`)
    pub async fn dial(&self, namespace: &str, spec: &str) -> Result<TunnelConnection, TunnelError> {
        let prepared = self.prepare(namespace, spec).await?;
        let request_id = self.request_ids.next();
        let pair = StreamPair::open(prepared.session.as_ref(), request_id, prepared.port).await?;

        tracing::info!(
            spec = %prepared.target,
            pod = %prepared.backend.instance_name,
            port = prepared.port,
            request_id = %request_id,
            "Dialed service"
        );

        Ok(TunnelConnection::new(
            pair,
            prepared.session,
            prepared.target.service,
            self.error_wait,
        ))
    }

    /// Dial through the forwarding loop over an in-memory pipe
    ///
    /// The loop runs in the background; its result is available from the
    /// returned stream.
    pub async fn dial_piped(
        &self,
        cancel: CancellationToken,
        namespace: &str,
        spec: &str,
    ) -> Result<ForwardedStream, TunnelError> {
        let prepared = self.prepare(namespace, spec).await?;
        let forwarder = self.forwarder(prepared.session);
        let (dialer, listener) = pipe(PIPE_BUFFER_SIZE);

        let port = prepared.port;
        let target = prepared.target;
        let task = tokio::spawn(async move {
            let result = forwarder.forward(cancel, listener, port).await;
            if let Err(e) = &result {
                tracing::warn!(spec = %target, error = %e, "Piped forward ended with error");
            }
            result
        });

        let stream = dialer.dial().await?;
        Ok(ForwardedStream::new(stream, task))
    }

    /// Forward the next connection accepted on `listener` to `spec`
    pub async fn forward_tcp(
        &self,
        cancel: CancellationToken,
        listener: TcpListener,
        namespace: &str,
        spec: &str,
    ) -> Result<(), TunnelError> {
        let prepared = self.prepare(namespace, spec).await?;
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(spec = %prepared.target, %addr, "Waiting for local connection");
        }
        self.forwarder(prepared.session)
            .forward(cancel, listener, prepared.port)
            .await
    }

    fn forwarder(&self, session: Arc<dyn Session>) -> Forwarder {
        Forwarder::new(session, self.request_ids.clone(), self.error_wait)
    }

    async fn prepare(&self, namespace: &str, spec: &str) -> Result<Prepared, TunnelError> {
        let target = Target::parse(namespace, spec)?;
        let backend = self.resolve(&target.namespace, &target.service).await?;
        let port = backend.select_port(target.port)?;

        let request = UpgradeRequest::new(&self.config, &target.namespace, &backend.instance_name);
        let session = self
            .upgrader
            .upgrade(request)
            .await
            .map_err(|source| TunnelError::Upgrade {
                pod: backend.instance_name.clone(),
                source,
            })?;

        Ok(Prepared {
            target,
            backend,
            port,
            session,
        })
    }
}
