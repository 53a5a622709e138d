//! Service to backend pod resolution

use std::sync::Arc;

use crate::cluster::{ClusterClient, ServiceInfo};
use crate::error::TunnelError;

/// Look up a service by name, ignoring ASCII case
pub(crate) async fn find_service(
    cluster: &dyn ClusterClient,
    namespace: &str,
    service: &str,
) -> Result<ServiceInfo, TunnelError> {
    let services = cluster.list_services(namespace).await.map_err(|e| {
        TunnelError::cluster(format!("list services in namespace '{}'", namespace), e)
    })?;

    services
        .into_iter()
        .find(|s| s.name.eq_ignore_ascii_case(service))
        .ok_or_else(|| TunnelError::ServiceNotFound {
            namespace: namespace.to_string(),
            service: service.to_string(),
        })
}

/// One pod serving a service, with the ports its containers declare
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub instance_name: String,
    pub exposed_ports: Vec<u16>,
}

impl Backend {
    /// Pick the port to forward to
    ///
    /// An explicit port is used as-is; the remote end reports it if nothing
    /// listens there. Without one, the pod must expose exactly one port.
    pub fn select_port(&self, requested: Option<u16>) -> Result<u16, TunnelError> {
        if let Some(port) = requested {
            return Ok(port);
        }
        match self.exposed_ports.as_slice() {
            [] => Err(TunnelError::NoPortsExposed {
                pod: self.instance_name.clone(),
            }),
            [port] => Ok(*port),
            ports => Err(TunnelError::AmbiguousPort {
                pod: self.instance_name.clone(),
                ports: ports.to_vec(),
            }),
        }
    }
}

/// Finds a backend pod for a service
///
/// Results are never cached; every dial resolves again.
#[derive(Clone)]
pub struct Resolver {
    cluster: Arc<dyn ClusterClient>,
}

impl Resolver {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self { cluster }
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterClient> {
        &self.cluster
    }

    pub async fn resolve(&self, namespace: &str, service: &str) -> Result<Backend, TunnelError> {
        let svc = find_service(self.cluster.as_ref(), namespace, service).await?;

        // A service without a selector has no pods of its own.
        if svc.selector.is_empty() {
            return Err(TunnelError::NoRunningBackend {
                namespace: namespace.to_string(),
                service: svc.name,
            });
        }

        let pods = self
            .cluster
            .list_pods(namespace, &svc.selector)
            .await
            .map_err(|e| {
                TunnelError::cluster(
                    format!("list pods for service '{}' ({})", svc.name, svc.selector),
                    e,
                )
            })?;

        let pod = pods
            .into_iter()
            .next()
            .ok_or_else(|| TunnelError::NoRunningBackend {
                namespace: namespace.to_string(),
                service: svc.name.clone(),
            })?;

        tracing::debug!(
            namespace,
            service = %svc.name,
            pod = %pod.name,
            "Resolved backend"
        );

        Ok(Backend {
            exposed_ports: pod.exposed_ports(),
            instance_name: pod.name,
        })
    }
}
