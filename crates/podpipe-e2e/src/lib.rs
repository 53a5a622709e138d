//! End-to-end test utilities for the Podpipe tunnel engine
//!
//! Provides an in-memory cluster, a port-forward session that plays the
//! remote end of the protocol against real local TCP backends, and a
//! harness that wires them into a `PodPipe` built from a config file.

pub mod harness;
pub mod mock_backend;
pub mod mock_cluster;
pub mod mock_session;

pub use harness::{init_test, TestCluster, TEST_NAMESPACE};
pub use mock_backend::{BackendMode, MockBackend};
pub use mock_cluster::MockCluster;
pub use mock_session::{MockSession, MockUpgrader, StreamEvent};
