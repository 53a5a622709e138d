//! Cluster query abstraction
//!
//! The engine only needs to list services and the pods behind them, plus
//! enough deployment access for recovery hooks to scale a workload back up.
//! A control-plane client library provides the real implementation; tests
//! use an in-memory cluster.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from cluster query operations
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Object not found: {0}")]
    NotFound(String),
}

/// Equality-based label selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `key=value` requirement
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for LabelSelector {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Renders in list-query form: `app=redis,tier=cache`
impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// A service as seen by the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub selector: LabelSelector,
}

/// Lifecycle phase reported for a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub name: String,
    /// Declared container ports, in declaration order
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    pub phase: PodPhase,
    pub containers: Vec<ContainerInfo>,
}

impl PodInfo {
    /// All container ports across all containers, in declaration order
    pub fn exposed_ports(&self) -> Vec<u16> {
        self.containers
            .iter()
            .flat_map(|c| c.ports.iter().copied())
            .collect()
    }
}

/// Cluster control-plane operations the engine depends on
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List all services in a namespace
    async fn list_services(&self, namespace: &str) -> Result<Vec<ServiceInfo>, ClusterError>;

    /// List pods in a namespace matching a label selector
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<PodInfo>, ClusterError>;

    /// Current desired replica count of a deployment
    async fn deployment_replicas(&self, namespace: &str, name: &str) -> Result<i32, ClusterError>;

    /// Patch a deployment's desired replica count
    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_display_is_sorted() {
        let selector = LabelSelector::new().with("tier", "cache").with("app", "redis");
        assert_eq!(selector.to_string(), "app=redis,tier=cache");
    }

    #[test]
    fn test_exposed_ports_across_containers() {
        let pod = PodInfo {
            name: "redis-0".to_string(),
            phase: PodPhase::Running,
            containers: vec![
                ContainerInfo {
                    name: "redis".to_string(),
                    ports: vec![6379, 16379],
                },
                ContainerInfo {
                    name: "exporter".to_string(),
                    ports: vec![9121],
                },
            ],
        };
        assert_eq!(pod.exposed_ports(), vec![6379, 16379, 9121]);
    }
}
