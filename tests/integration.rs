//! End-to-end test of the node-facing HTTP API on a single replica

use axum::{extract::State, routing::post, Json, Router};
use fedcoord::common::{
    CoordinatorConfig, LocalModel, Reply, ReplyStatus, TestComplete, TestRequest,
};
use fedcoord::coordinator::http::{create_router, CoordState};
use fedcoord::coordinator::node_client::NodeClient;
use fedcoord::coordinator::{start_replica, LocalRouter, Synthesizer};
use fedcoord::CoordinatorClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

async fn receive_test_request(
    State(tx): State<mpsc::Sender<TestRequest>>,
    Json(req): Json<TestRequest>,
) -> Json<Reply> {
    let _ = tx.send(req).await;
    Json(Reply::ok("Testing"))
}

/// A node endpoint that records the test requests it receives.
async fn spawn_node() -> (String, mpsc::Receiver<TestRequest>) {
    let (tx, rx) = mpsc::channel(16);
    let app = Router::new()
        .route("/test_request", post(receive_test_request))
        .with_state(tx);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, rx)
}

async fn spawn_coordinator() -> (CoordinatorClient, watch::Sender<bool>) {
    let config = CoordinatorConfig {
        replica_id: 1,
        tick_interval_ms: 10,
        election_tick: 10,
        heartbeat_tick: 2,
        campaign_on_start: true,
        ..Default::default()
    };
    let (shutdown, rx) = watch::channel(false);
    let router = LocalRouter::new();
    let replica = start_replica(&config, router.clone(), rx).unwrap();
    router.register(replica.handle.clone());

    let state = CoordState {
        replica: replica.handle.clone(),
        aggregation: replica.aggregation.clone(),
        synthesizer: Arc::new(Synthesizer::default()),
        nodes: NodeClient::new(Duration::from_secs(2)).unwrap(),
    };
    let app = create_router(state, config.max_body_bytes);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    for _ in 0..200 {
        if replica.handle.status().await.unwrap().is_leader() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let client = CoordinatorClient::new(&addr, Duration::from_secs(15)).unwrap();
    (client, shutdown)
}

async fn next_request(rx: &mut mpsc::Receiver<TestRequest>) -> TestRequest {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no test request received")
        .unwrap()
}

#[tokio::test]
async fn test_federation_round_over_http() {
    let (coordinator, shutdown) = spawn_coordinator().await;
    let (a_addr, _a_requests) = spawn_node().await;
    let (b_addr, mut b_requests) = spawn_node().await;

    assert!(coordinator.join("A", &a_addr).await.unwrap().is_ok());
    assert!(coordinator.join("B", &b_addr).await.unwrap().is_ok());

    let reply = coordinator
        .commit("A", LocalModel::new("weights-A", 100.0, 0.1))
        .await
        .unwrap();
    assert_eq!(reply.status, ReplyStatus::Ok);

    let request = next_request(&mut b_requests).await;
    assert_eq!(request.commit, 0);
    assert_eq!(request.model.model, "weights-A");
    assert_eq!(request.model.size, 0.0);
    assert_eq!(request.model.error, 0.0);

    // B owes a validation
    let reply = coordinator
        .commit("B", LocalModel::new("weights-B", 50.0, 0.2))
        .await
        .unwrap();
    assert_eq!(reply.status, ReplyStatus::No);
    assert_eq!(reply.reason, "Pending tests are not complete");

    let result = TestComplete {
        node_name: "B".into(),
        commit: 0,
        size: 40.0,
        error: 0.2,
    };
    assert!(coordinator.test_complete(&result).await.unwrap().is_ok());
    let reply = coordinator.test_complete(&result).await.unwrap();
    assert_eq!(reply.status, ReplyStatus::No);
    assert_eq!(reply.reason, "Duplicate Test");

    let grant = coordinator.global("A").await.unwrap();
    assert!(grant.reply.is_ok());
    let global = grant.global.unwrap();
    assert_eq!(global.models, vec!["weights-A".to_string(), String::new()]);
    assert_eq!(global.weights, vec![1.0, 0.0]);

    let _ = shutdown.send(true);
}

#[tokio::test]
async fn test_health_reports_version_and_leader() {
    let (coordinator, shutdown) = spawn_coordinator().await;

    let body: serde_json::Value = reqwest::get(format!("{}/health", coordinator.base_url()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], fedcoord::VERSION);
    assert_eq!(body["leader"], 1);

    let _ = shutdown.send(true);
}

#[tokio::test]
async fn test_unknown_nodes_and_rejoin() {
    let (coordinator, shutdown) = spawn_coordinator().await;
    let (a_addr, _a_requests) = spawn_node().await;
    let (b_addr, mut b_requests) = spawn_node().await;

    let reply = coordinator
        .commit("ghost", LocalModel::new("w", 1.0, 0.1))
        .await
        .unwrap();
    assert_eq!(reply.reason, "Unknown node");
    let grant = coordinator.global("ghost").await.unwrap();
    assert!(!grant.reply.is_ok());
    assert!(grant.global.is_none());

    coordinator.join("A", &a_addr).await.unwrap();
    coordinator.join("B", "127.0.0.1:1").await.unwrap();
    coordinator
        .commit("A", LocalModel::new("weights-A", 10.0, 0.1))
        .await
        .unwrap();

    // B was unreachable; rejoining at its real address resends the request
    assert!(coordinator.join("B", &b_addr).await.unwrap().is_ok());
    let request = next_request(&mut b_requests).await;
    assert_eq!(request.commit, 0);

    let _ = shutdown.send(true);
}
