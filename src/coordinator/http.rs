//! Node-facing HTTP API for the coordinator
//!
//! Every replica serves the full API. State-mutating requests are checked
//! against the applied state, proposed to the raft group, and answered once
//! this replica has applied them. Test requests owed because of an applied
//! event are sent by the replica that received the request, and only by it.

use crate::common::{
    CommitRequest, Error, GlobalGrant, GlobalRequest, JoinRequest, Reply, Result, TestComplete,
};
use crate::coordinator::aggregation::AggregationHandle;
use crate::coordinator::node_client::NodeClient;
use crate::coordinator::raft_node::ReplicaHandle;
use crate::coordinator::state::{Event, Outcome};
use crate::coordinator::synthesis::Synthesizer;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct CoordState {
    pub replica: ReplicaHandle,
    pub aggregation: AggregationHandle,
    pub synthesizer: Arc<Synthesizer>,
    pub nodes: NodeClient,
}

pub fn create_router(state: CoordState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/join", post(join))
        .route("/commit", post(commit))
        .route("/global", post(global))
        .route("/test_complete", post(test_complete))
        .route("/health", get(health))
        .route("/health/ready", get(health_ready))
        .route("/health/live", get(health_live))
        .route("/admin/status", get(admin_status))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn respond(result: Result<Reply>) -> (StatusCode, Json<Reply>) {
    match result {
        Ok(reply) => (StatusCode::OK, Json(reply)),
        Err(e) => {
            tracing::info!(error = %e, "request rejected");
            (e.to_http_status(), Json(Reply::from(&e)))
        }
    }
}

fn unexpected(outcome: Outcome) -> Error {
    Error::Internal(format!("unexpected apply outcome: {:?}", outcome))
}

async fn join(State(state): State<CoordState>, Json(req): Json<JoinRequest>) -> impl IntoResponse {
    tracing::info!(node = %req.node_name, address = %req.node_address, "join request");
    let name = req.node_name.clone();
    let result = handle_join(&state, req).await.map_err(|e| {
        tracing::warn!(node = %name, error = %e, "join failed");
        Error::JoinFailed(e.to_string())
    });
    respond(result)
}

async fn handle_join(state: &CoordState, req: JoinRequest) -> Result<Reply> {
    let name = req.node_name.clone();
    let known = state
        .replica
        .read(move |s| s.registry().id_of(&name).is_some())
        .await?;
    let event = if known {
        Event::Rejoin {
            name: req.node_name.clone(),
            address: req.node_address,
        }
    } else {
        Event::Join {
            name: req.node_name.clone(),
            address: req.node_address,
        }
    };

    match state.replica.propose(event).await.into_result()? {
        Outcome::Joined {
            node,
            membership,
            fan_out,
        } => {
            tracing::info!(
                node = %req.node_name,
                id = node,
                ?membership,
                owed = fan_out.len(),
                "node joined"
            );
            state.nodes.dispatch(fan_out);
            Ok(Reply::ok("Joined"))
        }
        Outcome::Rejected(rejection) => Err(rejection.into_error(&req.node_name)),
        other => Err(unexpected(other)),
    }
}

async fn commit(
    State(state): State<CoordState>,
    Json(req): Json<CommitRequest>,
) -> impl IntoResponse {
    tracing::info!(node = %req.node_name, size = req.model.size, "commit request");
    respond(handle_commit(&state, req).await)
}

async fn handle_commit(state: &CoordState, req: CommitRequest) -> Result<Reply> {
    let name = req.node_name.clone();
    state
        .replica
        .read(move |s| s.check_commit(&name))
        .await?
        .map_err(|rejection| rejection.into_error(&req.node_name))?;

    let event = Event::Commit {
        name: req.node_name.clone(),
        model: req.model,
    };
    match state.replica.propose(event).await.into_result()? {
        Outcome::Committed {
            node,
            commit,
            fan_out,
        } => {
            tracing::info!(
                node = %req.node_name,
                id = node,
                commit,
                validators = fan_out.len(),
                "model committed for validation"
            );
            state.nodes.dispatch(fan_out);
            Ok(Reply::ok("Committed"))
        }
        Outcome::Rejected(rejection) => Err(rejection.into_error(&req.node_name)),
        other => Err(unexpected(other)),
    }
}

async fn test_complete(
    State(state): State<CoordState>,
    Json(req): Json<TestComplete>,
) -> impl IntoResponse {
    tracing::info!(
        node = %req.node_name,
        commit = req.commit,
        error = req.error,
        size = req.size,
        "test result"
    );
    respond(handle_test_complete(&state, req).await)
}

async fn handle_test_complete(state: &CoordState, req: TestComplete) -> Result<Reply> {
    let name = req.node_name.clone();
    let commit = req.commit;
    state
        .replica
        .read(move |s| s.check_test(&name, commit))
        .await?
        .map_err(|rejection| rejection.into_error(&req.node_name))?;

    let event = Event::TestComplete {
        name: req.node_name.clone(),
        commit: req.commit,
        error: req.error,
        size: req.size,
    };
    match state.replica.propose(event).await.into_result()? {
        Outcome::TestAccepted { update } => {
            tracing::debug!(
                owner = update.aggregate.owner,
                commit = update.aggregate.commit,
                validated = update.aggregate.total_validated_size,
                "test result recorded"
            );
            Ok(Reply::ok("Test Processed"))
        }
        Outcome::Rejected(rejection) => Err(rejection.into_error(&req.node_name)),
        other => Err(unexpected(other)),
    }
}

async fn global(
    State(state): State<CoordState>,
    Json(req): Json<GlobalRequest>,
) -> impl IntoResponse {
    match handle_global(&state, &req).await {
        Ok(grant) => (StatusCode::OK, Json(grant)),
        Err(e) => {
            tracing::warn!(node = %req.node_name, error = %e, "global model request failed");
            (
                e.to_http_status(),
                Json(GlobalGrant {
                    reply: Reply::from(&e),
                    global: None,
                }),
            )
        }
    }
}

async fn handle_global(state: &CoordState, req: &GlobalRequest) -> Result<GlobalGrant> {
    let name = req.node_name.clone();
    let (known, node_count) = state
        .replica
        .read(move |s| (s.registry().id_of(&name).is_some(), s.registry().len()))
        .await?;
    if !known {
        return Err(Error::UnknownNode(req.node_name.clone()));
    }

    let committed = state.aggregation.committed().await?;
    let synthesizer = state.synthesizer.clone();
    let global = tokio::task::spawn_blocking(move || synthesizer.synthesize(node_count, &committed))
        .await
        .map_err(|e| Error::Internal(format!("synthesis task failed: {}", e)))??;

    tracing::info!(
        node = %req.node_name,
        nodes = node_count,
        "global model granted"
    );
    Ok(GlobalGrant {
        reply: Reply::ok(""),
        global: Some(global),
    })
}

async fn health(State(state): State<CoordState>) -> impl IntoResponse {
    match state.replica.status().await {
        Ok(status) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "replica": status.id,
                "role": status.role,
                "leader": status.leader,
                "version": crate::VERSION,
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "error": e.to_string() })),
        ),
    }
}

/// Ready once a leader is known, so proposals can be committed.
async fn health_ready(State(state): State<CoordState>) -> impl IntoResponse {
    match state.replica.status().await {
        Ok(status) if status.leader != 0 => (
            StatusCode::OK,
            Json(json!({ "ready": true, "leader": status.leader })),
        ),
        Ok(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "reason": "no leader" })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "reason": e.to_string() })),
        ),
    }
}

async fn health_live() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "alive": true })))
}

async fn admin_status(State(state): State<CoordState>) -> impl IntoResponse {
    let status = match state.replica.status().await {
        Ok(status) => status,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": e.to_string() })),
            )
        }
    };
    let committed = state
        .aggregation
        .committed()
        .await
        .map(|c| c.keys().copied().collect::<Vec<_>>())
        .unwrap_or_default();
    (
        StatusCode::OK,
        Json(json!({
            "replica": status,
            "committed_models": committed,
        })),
    )
}
