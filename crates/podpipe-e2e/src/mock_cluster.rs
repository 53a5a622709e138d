//! In-memory cluster for resolver and recovery tests

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use podpipe::{ClusterClient, ClusterError, LabelSelector, PodInfo, PodPhase, ServiceInfo};

type Labels = BTreeMap<String, String>;

struct MockPod {
    namespace: String,
    labels: Labels,
    info: PodInfo,
}

/// A deployment whose pods only exist while it has replicas
struct MockDeployment {
    replicas: i32,
    labels: Labels,
    template: PodInfo,
}

#[derive(Default)]
pub struct MockCluster {
    services: RwLock<Vec<(String, ServiceInfo)>>,
    pods: RwLock<Vec<MockPod>>,
    deployments: RwLock<HashMap<(String, String), MockDeployment>>,
    fail_listing: AtomicBool,
    service_queries: AtomicUsize,
}

fn labels_for(selector: &LabelSelector) -> Labels {
    selector
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn selector_matches(selector: &LabelSelector, labels: &Labels) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).map(String::as_str) == Some(v))
}

impl MockCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_service(&self, namespace: &str, name: &str, selector: LabelSelector) {
        self.services.write().push((
            namespace.to_string(),
            ServiceInfo {
                name: name.to_string(),
                selector,
            },
        ));
    }

    /// Add a pod carrying exactly the labels of `selector`
    pub fn add_pod(&self, namespace: &str, selector: &LabelSelector, info: PodInfo) {
        self.pods.write().push(MockPod {
            namespace: namespace.to_string(),
            labels: labels_for(selector),
            info,
        });
    }

    /// Add a deployment; its pod appears once it is scaled above zero
    pub fn add_deployment(
        &self,
        namespace: &str,
        name: &str,
        selector: &LabelSelector,
        replicas: i32,
        template: PodInfo,
    ) {
        let deployment = MockDeployment {
            replicas,
            labels: labels_for(selector),
            template,
        };
        if replicas > 0 {
            self.spawn_pods(namespace, &deployment);
        }
        self.deployments
            .write()
            .insert((namespace.to_string(), name.to_string()), deployment);
    }

    fn spawn_pods(&self, namespace: &str, deployment: &MockDeployment) {
        let mut pods = self.pods.write();
        if pods
            .iter()
            .any(|p| p.namespace == namespace && p.info.name == deployment.template.name)
        {
            return;
        }
        let mut info = deployment.template.clone();
        info.phase = PodPhase::Running;
        pods.push(MockPod {
            namespace: namespace.to_string(),
            labels: deployment.labels.clone(),
            info,
        });
    }

    /// Make every listing call fail
    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Number of `list_services` calls so far
    pub fn service_queries(&self) -> usize {
        self.service_queries.load(Ordering::SeqCst)
    }

    pub fn replicas(&self, namespace: &str, name: &str) -> Option<i32> {
        self.deployments
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .map(|d| d.replicas)
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn list_services(&self, namespace: &str) -> Result<Vec<ServiceInfo>, ClusterError> {
        self.service_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(ClusterError::Request("connection refused".to_string()));
        }
        Ok(self
            .services
            .read()
            .iter()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, svc)| svc.clone())
            .collect())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<PodInfo>, ClusterError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(ClusterError::Request("connection refused".to_string()));
        }
        Ok(self
            .pods
            .read()
            .iter()
            .filter(|p| p.namespace == namespace && selector_matches(selector, &p.labels))
            .map(|p| p.info.clone())
            .collect())
    }

    async fn deployment_replicas(&self, namespace: &str, name: &str) -> Result<i32, ClusterError> {
        self.replicas(namespace, name)
            .ok_or_else(|| ClusterError::NotFound(format!("deployment {}/{}", namespace, name)))
    }

    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        let mut deployments = self.deployments.write();
        let deployment = deployments
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| ClusterError::NotFound(format!("deployment {}/{}", namespace, name)))?;
        deployment.replicas = replicas;
        if replicas > 0 {
            self.spawn_pods(namespace, deployment);
        }
        Ok(())
    }
}
