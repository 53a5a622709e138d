//! Dial end-to-end tests

use std::sync::Arc;
use std::time::Duration;

use podpipe::{ScaleUpRecovery, StreamType, TunnelConnection, TunnelError};
use podpipe_e2e::{init_test, BackendMode, MockBackend, StreamEvent, TestCluster, TEST_NAMESPACE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Helper to read an exact amount with timeout
async fn read_exact_with_timeout(conn: &mut TunnelConnection, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(TEST_TIMEOUT, conn.read_exact(&mut buf))
        .await
        .expect("Read timeout")
        .expect("Read failed");
    buf
}

fn remote_error(err: &std::io::Error) -> Option<&TunnelError> {
    err.get_ref().and_then(|inner| inner.downcast_ref::<TunnelError>())
}

#[tokio::test]
async fn test_dial_echo_round_trip() {
    init_test();

    let backend = MockBackend::start().await;
    let cluster = TestCluster::new();
    cluster.add_service("redis");
    cluster.add_pod("redis", "redis-0", &[(6379, backend.addr())]);
    let pipe = cluster.podpipe().expect("Failed to build engine");

    let mut conn = pipe.dial(TEST_NAMESPACE, "redis:6379").await.unwrap();
    assert_eq!(conn.service(), "redis");
    assert_eq!(conn.port(), 6379);

    let payload: Vec<u8> = (0..32 * 1024).map(|i| (i % 251) as u8).collect();
    conn.write_all(&payload).await.unwrap();
    let echoed = read_exact_with_timeout(&mut conn, payload.len()).await;
    assert_eq!(echoed, payload);

    conn.close().await.unwrap();
    let mut rest = Vec::new();
    tokio::time::timeout(TEST_TIMEOUT, conn.read_to_end(&mut rest))
        .await
        .expect("EOF timeout")
        .unwrap();
    assert!(rest.is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.received(), vec![payload]);

    let requests = cluster.upgrader.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].path,
        "/api/v1/namespaces/default/pods/redis-0/portforward"
    );
    assert_eq!(requests[0].bearer_token.as_deref(), Some("test-token"));
}

#[tokio::test]
async fn test_dial_default_port() {
    init_test();

    let backend = MockBackend::start_with_mode(BackendMode::Greeting(b"+OK\r\n".to_vec())).await;
    let cluster = TestCluster::new();
    cluster.add_service("redis");
    cluster.add_pod("redis", "redis-0", &[(6379, backend.addr())]);
    let pipe = cluster.podpipe().unwrap();

    let mut conn = pipe.dial(TEST_NAMESPACE, "redis").await.unwrap();
    assert_eq!(conn.port(), 6379);
    assert_eq!(read_exact_with_timeout(&mut conn, 5).await, b"+OK\r\n");
}

#[tokio::test]
async fn test_dial_service_name_case_insensitive() {
    init_test();

    let backend = MockBackend::start().await;
    let cluster = TestCluster::new();
    cluster.add_service("redis");
    cluster.add_pod("redis", "redis-0", &[(6379, backend.addr())]);
    let pipe = cluster.podpipe().unwrap();

    let conn = pipe.dial(TEST_NAMESPACE, "Redis:6379").await.unwrap();
    assert_eq!(conn.port(), 6379);
}

#[tokio::test]
async fn test_bad_port_reports_remote_error() {
    init_test();

    let backend = MockBackend::start().await;
    let cluster = TestCluster::new();
    cluster.add_service("redis");
    cluster.add_pod("redis", "redis-0", &[(6379, backend.addr())]);
    let pipe = cluster.podpipe().unwrap();

    // Dialing succeeds; the failure surfaces on first use
    let mut conn = pipe.dial(TEST_NAMESPACE, "redis:42").await.unwrap();

    let mut buf = [0u8; 16];
    let err = tokio::time::timeout(TEST_TIMEOUT, conn.read(&mut buf))
        .await
        .expect("Read timeout")
        .expect_err("Read should fail");

    assert!(
        err.to_string().contains("Connection refused"),
        "unexpected error: {}",
        err
    );
    match remote_error(&err) {
        Some(TunnelError::RemoteReported { port, message }) => {
            assert_eq!(*port, 42);
            assert!(message.contains("error forwarding port 42 to pod redis-0"));
        }
        other => panic!("Expected RemoteReported, got {:?}", other),
    }
    assert_eq!(backend.connection_count(), 0);
}

#[tokio::test]
async fn test_unknown_service() {
    init_test();

    let cluster = TestCluster::new();
    cluster.add_service("redis");
    let pipe = cluster.podpipe().unwrap();

    match pipe.dial(TEST_NAMESPACE, "fakaka").await {
        Err(TunnelError::ServiceNotFound { namespace, service }) => {
            assert_eq!(namespace, "default");
            assert_eq!(service, "fakaka");
        }
        other => panic!("Expected ServiceNotFound, got {:?}", other.map(|c| c.port())),
    }
}

#[tokio::test]
async fn test_malformed_port_is_not_a_lookup_failure() {
    init_test();

    let cluster = TestCluster::new();
    cluster.add_service("redis");
    let pipe = cluster.podpipe().unwrap();

    let err = pipe.dial(TEST_NAMESPACE, "redis:badport").await.err().unwrap();
    assert!(
        matches!(err, TunnelError::InvalidTarget { .. }),
        "unexpected error: {}",
        err
    );
    // Rejected before any cluster query
    assert_eq!(cluster.cluster.service_queries(), 0);
}

#[tokio::test]
async fn test_error_stream_precedes_data_stream() {
    init_test();

    let backend = MockBackend::start().await;
    let cluster = TestCluster::new();
    cluster.add_service("redis");
    let session = cluster.add_pod("redis", "redis-0", &[(6379, backend.addr())]);
    let pipe = cluster.podpipe().unwrap();

    let mut conn = pipe.dial(TEST_NAMESPACE, "redis:6379").await.unwrap();
    conn.write_all(b"PING").await.unwrap();
    read_exact_with_timeout(&mut conn, 4).await;

    let id = conn.request_id();
    let events = session.events_for(id);
    assert_eq!(
        &events[..2],
        &[
            StreamEvent::Created {
                stream_type: StreamType::Error,
                request_id: id
            },
            StreamEvent::Created {
                stream_type: StreamType::Data,
                request_id: id
            },
        ]
    );
    let closed = events
        .iter()
        .position(|e| *e == StreamEvent::ErrorWriteClosed { request_id: id })
        .expect("Error stream write side was not closed");
    let first_byte = events
        .iter()
        .position(|e| *e == StreamEvent::FirstDataByte { request_id: id })
        .expect("No data arrived");
    assert!(closed < first_byte);
}

#[tokio::test]
async fn test_concurrent_dials_get_distinct_request_ids() {
    init_test();

    let backend = MockBackend::start().await;
    let cluster = TestCluster::new();
    cluster.add_service("redis");
    cluster.add_pod("redis", "redis-0", &[(6379, backend.addr())]);
    let pipe = Arc::new(cluster.podpipe().unwrap());

    let mut handles = Vec::new();
    for i in 0..10u8 {
        let pipe = pipe.clone();
        handles.push(tokio::spawn(async move {
            let mut conn = pipe.dial(TEST_NAMESPACE, "redis:6379").await.unwrap();
            let message = [b'a' + i; 8];
            conn.write_all(&message).await.unwrap();
            let mut buf = [0u8; 8];
            conn.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, message);
            conn.request_id().get()
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(
            tokio::time::timeout(TEST_TIMEOUT, handle)
                .await
                .expect("Dial timeout")
                .unwrap(),
        );
    }
    ids.sort_unstable();
    assert_eq!(ids, (1..=10).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_port_selection_errors() {
    init_test();

    let backend = MockBackend::start().await;
    let cluster = TestCluster::new();
    cluster.add_service("multi");
    cluster.add_pod(
        "multi",
        "multi-0",
        &[(8080, backend.addr()), (9090, backend.addr())],
    );
    cluster.add_service("bare");
    cluster.add_pod_declaring("bare", "bare-0", &[], &[]);
    let pipe = cluster.podpipe().unwrap();

    match pipe.dial(TEST_NAMESPACE, "multi").await.err() {
        Some(TunnelError::AmbiguousPort { pod, ports }) => {
            assert_eq!(pod, "multi-0");
            assert_eq!(ports, vec![8080, 9090]);
        }
        other => panic!("Expected AmbiguousPort, got {:?}", other),
    }

    match pipe.dial(TEST_NAMESPACE, "bare").await.err() {
        Some(TunnelError::NoPortsExposed { pod }) => assert_eq!(pod, "bare-0"),
        other => panic!("Expected NoPortsExposed, got {:?}", other),
    }

    // An explicit port needs no declaration
    assert!(pipe.dial(TEST_NAMESPACE, "multi:9090").await.is_ok());
}

#[tokio::test]
async fn test_double_close() {
    init_test();

    let backend = MockBackend::start().await;
    let cluster = TestCluster::new();
    cluster.add_service("redis");
    cluster.add_pod("redis", "redis-0", &[(6379, backend.addr())]);
    let pipe = cluster.podpipe().unwrap();

    let mut conn = pipe.dial(TEST_NAMESPACE, "redis:6379").await.unwrap();
    conn.close().await.unwrap();
    assert!(matches!(conn.close().await, Err(TunnelError::AlreadyClosed)));
}

#[tokio::test]
async fn test_scale_up_recovery() {
    init_test();

    let backend = MockBackend::start().await;
    let cluster = TestCluster::new();
    cluster.add_service("worker");
    cluster.add_deployment("worker", "worker-0", 0, &[(8080, backend.addr())]);

    let pipe = cluster
        .podpipe()
        .unwrap()
        .with_recovery_hook(Arc::new(ScaleUpRecovery {
            min_replicas: 1,
            timeout: Duration::from_secs(3),
        }));

    let mut conn = tokio::time::timeout(TEST_TIMEOUT, pipe.dial(TEST_NAMESPACE, "worker"))
        .await
        .expect("Dial timeout")
        .unwrap();
    assert_eq!(cluster.cluster.replicas(TEST_NAMESPACE, "worker"), Some(1));

    conn.write_all(b"up").await.unwrap();
    assert_eq!(read_exact_with_timeout(&mut conn, 2).await, b"up");
}

#[tokio::test]
async fn test_no_running_backend_without_recovery() {
    init_test();

    let cluster = TestCluster::new();
    cluster.add_service("worker");
    cluster.add_deployment("worker", "worker-0", 0, &[]);
    let pipe = cluster.podpipe().unwrap();

    let err = pipe.dial(TEST_NAMESPACE, "worker").await.err().unwrap();
    assert!(err.is_no_running_backend(), "unexpected error: {}", err);
    assert_eq!(cluster.cluster.replicas(TEST_NAMESPACE, "worker"), Some(0));
}

#[tokio::test]
async fn test_cluster_listing_failure() {
    init_test();

    let cluster = TestCluster::new();
    cluster.add_service("redis");
    cluster.cluster.set_fail_listing(true);
    let pipe = cluster.podpipe().unwrap();

    let err = pipe.dial(TEST_NAMESPACE, "redis").await.err().unwrap();
    assert!(matches!(err, TunnelError::Cluster { .. }), "unexpected error: {}", err);
}

#[tokio::test]
async fn test_refused_data_stream() {
    init_test();

    let backend = MockBackend::start().await;
    let cluster = TestCluster::new();
    cluster.add_service("redis");
    let session = cluster.add_pod("redis", "redis-0", &[(6379, backend.addr())]);
    session.set_refuse_data_streams(true);
    let pipe = cluster.podpipe().unwrap();

    match pipe.dial(TEST_NAMESPACE, "redis:6379").await.err() {
        Some(TunnelError::StreamCreationFailed { stream_type, .. }) => {
            assert_eq!(stream_type, StreamType::Data);
        }
        other => panic!("Expected StreamCreationFailed, got {:?}", other),
    }
}
