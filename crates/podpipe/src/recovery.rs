//! Recovery hooks run when a service has no backend pod

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::cluster::{ClusterClient, PodPhase};
use crate::error::TunnelError;
use crate::resolver::find_service;

/// Remediation attempted once before giving up on a service
///
/// Returning `true` makes the engine resolve the service one more time.
#[async_trait]
pub trait RecoveryHook: Send + Sync {
    async fn attempt_recovery(
        &self,
        cluster: &dyn ClusterClient,
        namespace: &str,
        service: &str,
    ) -> bool;
}

/// Never recovers
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRecovery;

#[async_trait]
impl RecoveryHook for NoRecovery {
    async fn attempt_recovery(&self, _: &dyn ClusterClient, _: &str, _: &str) -> bool {
        false
    }
}

/// Scales the deployment named after the service up, then waits for a
/// running pod
#[derive(Debug, Clone, Copy)]
pub struct ScaleUpRecovery {
    pub min_replicas: i32,
    pub timeout: Duration,
}

impl Default for ScaleUpRecovery {
    fn default() -> Self {
        Self {
            min_replicas: 1,
            timeout: Duration::from_secs(60),
        }
    }
}

#[async_trait]
impl RecoveryHook for ScaleUpRecovery {
    async fn attempt_recovery(
        &self,
        cluster: &dyn ClusterClient,
        namespace: &str,
        service: &str,
    ) -> bool {
        let current = match cluster.deployment_replicas(namespace, service).await {
            Ok(replicas) => replicas,
            Err(e) => {
                tracing::warn!(namespace, service, error = %e, "Cannot read deployment for recovery");
                return false;
            }
        };

        if current < self.min_replicas {
            tracing::info!(
                namespace,
                service,
                from = current,
                to = self.min_replicas,
                "Scaling deployment up"
            );
            if let Err(e) = cluster
                .scale_deployment(namespace, service, self.min_replicas)
                .await
            {
                tracing::warn!(namespace, service, error = %e, "Failed to scale deployment");
                return false;
            }
        }

        match wait_for_service_running(cluster, namespace, service, self.timeout).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(namespace, service, error = %e, "Recovery did not produce a running pod");
                false
            }
        }
    }
}

/// Poll until a pod selected by `service` reports `Running`
///
/// The service is re-read on every poll; polls are `timeout / 15` apart.
/// Pod listing failures are retried on the next poll.
pub async fn wait_for_service_running(
    cluster: &dyn ClusterClient,
    namespace: &str,
    service: &str,
    timeout: Duration,
) -> Result<(), TunnelError> {
    let deadline = Instant::now() + timeout;
    let interval = timeout / 15;

    loop {
        let svc = find_service(cluster, namespace, service).await?;

        if !svc.selector.is_empty() {
            match cluster.list_pods(namespace, &svc.selector).await {
                Ok(pods) if pods.iter().any(|p| p.phase == PodPhase::Running) => return Ok(()),
                Ok(_) => {}
                Err(e) => tracing::debug!(namespace, service, error = %e, "Pod listing failed"),
            }
        }

        if Instant::now() + interval >= deadline {
            break;
        }
        tokio::time::sleep(interval).await;
    }

    Err(TunnelError::NoRunningBackend {
        namespace: namespace.to_string(),
        service: service.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterError, LabelSelector, PodInfo, ServiceInfo};
    use parking_lot::Mutex;

    /// Pods start running `ready_after` polls after the deployment is scaled up
    struct ScalableCluster {
        replicas: Mutex<i32>,
        polls_since_scale: Mutex<Option<u32>>,
        ready_after: u32,
        scale_calls: Mutex<u32>,
    }

    impl ScalableCluster {
        fn new(replicas: i32, ready_after: u32) -> Self {
            Self {
                replicas: Mutex::new(replicas),
                polls_since_scale: Mutex::new(if replicas > 0 { Some(0) } else { None }),
                ready_after,
                scale_calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ClusterClient for ScalableCluster {
        async fn list_services(&self, _: &str) -> Result<Vec<ServiceInfo>, ClusterError> {
            Ok(vec![ServiceInfo {
                name: "redis".to_string(),
                selector: LabelSelector::new().with("app", "redis"),
            }])
        }

        async fn list_pods(&self, _: &str, _: &LabelSelector) -> Result<Vec<PodInfo>, ClusterError> {
            let mut polls = self.polls_since_scale.lock();
            let Some(count) = polls.as_mut() else {
                return Ok(vec![]);
            };
            *count += 1;
            let phase = if *count > self.ready_after {
                PodPhase::Running
            } else {
                PodPhase::Pending
            };
            Ok(vec![PodInfo {
                name: "redis-0".to_string(),
                phase,
                containers: vec![],
            }])
        }

        async fn deployment_replicas(&self, _: &str, _: &str) -> Result<i32, ClusterError> {
            Ok(*self.replicas.lock())
        }

        async fn scale_deployment(&self, _: &str, _: &str, replicas: i32) -> Result<(), ClusterError> {
            *self.scale_calls.lock() += 1;
            *self.replicas.lock() = replicas;
            *self.polls_since_scale.lock() = Some(0);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_no_recovery_declines() {
        let cluster = ScalableCluster::new(0, 0);
        assert!(!NoRecovery.attempt_recovery(&cluster, "default", "redis").await);
    }

    #[tokio::test]
    async fn test_scale_up_waits_for_running_pod() {
        let cluster = ScalableCluster::new(0, 2);
        let hook = ScaleUpRecovery {
            min_replicas: 1,
            timeout: Duration::from_millis(750),
        };

        assert!(hook.attempt_recovery(&cluster, "default", "redis").await);
        assert_eq!(*cluster.replicas.lock(), 1);
        assert_eq!(*cluster.scale_calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_scale_up_skips_patch_when_already_scaled() {
        let cluster = ScalableCluster::new(2, 0);
        let hook = ScaleUpRecovery {
            min_replicas: 1,
            timeout: Duration::from_millis(300),
        };

        assert!(hook.attempt_recovery(&cluster, "default", "redis").await);
        assert_eq!(*cluster.scale_calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let cluster = ScalableCluster::new(0, 0);

        let err = wait_for_service_running(&cluster, "default", "redis", Duration::from_millis(150))
            .await
            .unwrap_err();
        assert!(err.is_no_running_backend());
    }

    #[tokio::test]
    async fn test_wait_unknown_service() {
        let cluster = ScalableCluster::new(1, 0);

        let err = wait_for_service_running(&cluster, "default", "fakaka", Duration::from_millis(150))
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::ServiceNotFound { .. }));
    }
}
