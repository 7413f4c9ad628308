//! Coordinator gRPC service (internal)
//!
//! Carries raft traffic between coordinator replicas. Nodes never use it.

use crate::coordinator::raft_node::ReplicaHandle;
use crate::proto::coordinator_internal_server::{CoordinatorInternal, CoordinatorInternalServer};
use crate::proto::{RaftEnvelope, StepAck};
use protobuf::Message as PbMessage;
use raft::prelude::Message;
use tonic::{Request, Response, Status};

/// Feeds inbound raft messages to the local replica.
pub struct CoordGrpcService {
    replica: ReplicaHandle,
}

impl CoordGrpcService {
    pub fn new(replica: ReplicaHandle) -> Self {
        Self { replica }
    }

    /// Converts this service into a gRPC server instance.
    pub fn into_server(self) -> CoordinatorInternalServer<Self> {
        CoordinatorInternalServer::new(self)
    }
}

#[tonic::async_trait]
impl CoordinatorInternal for CoordGrpcService {
    async fn step(&self, req: Request<RaftEnvelope>) -> Result<Response<StepAck>, Status> {
        let envelope = req.into_inner();
        let message = Message::parse_from_bytes(&envelope.payload)
            .map_err(|e| Status::invalid_argument(format!("bad raft message: {}", e)))?;
        if message.get_from() != envelope.from {
            return Err(Status::invalid_argument(format!(
                "envelope from {} carries message from {}",
                envelope.from,
                message.get_from()
            )));
        }
        if message.get_to() != self.replica.id() {
            return Err(Status::invalid_argument(format!(
                "message for {} delivered to {}",
                message.get_to(),
                self.replica.id()
            )));
        }

        self.replica
            .step(message)
            .await
            .map_err(|e| e.to_grpc_status())?;
        Ok(Response::new(StepAck { ok: true }))
    }
}
