//! Test cluster harness for E2E tests
//!
//! Writes a cluster config file with a generated CA and token, and wires an
//! in-memory cluster and mock upgrader into a `PodPipe`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use podpipe::{ContainerInfo, LabelSelector, PodInfo, PodPhase, PodPipe, TunnelError};

use crate::mock_cluster::MockCluster;
use crate::mock_session::{MockSession, MockUpgrader};

/// Namespace used by the harness helpers
pub const TEST_NAMESPACE: &str = "default";

/// Initialize tracing for tests
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("podpipe=debug,podpipe_e2e=debug")
        .with_test_writer()
        .try_init();
}

/// A fake cluster with a config file on disk
pub struct TestCluster {
    pub cluster: Arc<MockCluster>,
    pub upgrader: Arc<MockUpgrader>,
    config_path: PathBuf,
    _dir: TempDir,
}

impl TestCluster {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");

        let ca = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("Failed to generate CA");
        let ca_path = dir.path().join("ca.pem");
        std::fs::write(&ca_path, ca.cert.pem()).expect("Failed to write CA");

        let config_path = dir.path().join("cluster.toml");
        let config = format!(
            "server = \"https://127.0.0.1:6443\"\nca_cert = {:?}\ntoken = \"test-token\"\n",
            ca_path.display().to_string()
        );
        std::fs::write(&config_path, config).expect("Failed to write config");

        Self {
            cluster: MockCluster::new(),
            upgrader: MockUpgrader::new(),
            config_path,
            _dir: dir,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Build an engine from the config file
    pub fn podpipe(&self) -> Result<PodPipe, TunnelError> {
        PodPipe::from_file(&self.config_path, self.cluster.clone(), self.upgrader.clone())
    }

    /// Add a service selecting `app=<name>`
    pub fn add_service(&self, name: &str) -> LabelSelector {
        let selector = LabelSelector::new().with("app", name);
        self.cluster
            .add_service(TEST_NAMESPACE, name, selector.clone());
        selector
    }

    /// Add a running pod for `service` whose container ports forward to the
    /// given backends
    pub fn add_pod(
        &self,
        service: &str,
        pod: &str,
        ports: &[(u16, SocketAddr)],
    ) -> Arc<MockSession> {
        let declared: Vec<u16> = ports.iter().map(|(port, _)| *port).collect();
        self.add_pod_declaring(service, pod, &declared, ports)
    }

    /// Like [`add_pod`](Self::add_pod) but with declared ports independent
    /// of the backend map
    pub fn add_pod_declaring(
        &self,
        service: &str,
        pod: &str,
        declared: &[u16],
        ports: &[(u16, SocketAddr)],
    ) -> Arc<MockSession> {
        let selector = LabelSelector::new().with("app", service);
        self.cluster
            .add_pod(TEST_NAMESPACE, &selector, pod_info(pod, declared));
        self.register_session(pod, ports)
    }

    /// Add a deployment for `service` with `replicas`; its pod only shows up
    /// once scaled above zero
    pub fn add_deployment(
        &self,
        service: &str,
        pod: &str,
        replicas: i32,
        ports: &[(u16, SocketAddr)],
    ) -> Arc<MockSession> {
        let selector = LabelSelector::new().with("app", service);
        let declared: Vec<u16> = ports.iter().map(|(port, _)| *port).collect();
        self.cluster.add_deployment(
            TEST_NAMESPACE,
            service,
            &selector,
            replicas,
            pod_info(pod, &declared),
        );
        self.register_session(pod, ports)
    }

    fn register_session(&self, pod: &str, ports: &[(u16, SocketAddr)]) -> Arc<MockSession> {
        let session = MockSession::new(pod, ports.iter().copied().collect::<HashMap<_, _>>());
        self.upgrader.add_session(session.clone());
        session
    }
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}

fn pod_info(name: &str, ports: &[u16]) -> PodInfo {
    PodInfo {
        name: name.to_string(),
        phase: PodPhase::Running,
        containers: vec![ContainerInfo {
            name: "main".to_string(),
            ports: ports.to_vec(),
        }],
    }
}
