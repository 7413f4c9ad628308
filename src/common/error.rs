//! Error types for fedcoord

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Validation Rejections ===
    #[error("Pending tests are not complete")]
    PendingTests,

    #[error("Duplicate Test")]
    DuplicateTest,

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Failed Join: {0}")]
    JoinFailed(String),

    // === Consensus Errors ===
    #[error("Raft error: {0}")]
    Raft(#[from] raft::Error),

    #[error("Proposal not applied before timeout")]
    ProposalTimeout,

    #[error("Too many proposals in flight")]
    Busy,

    #[error("Snapshot installation is not supported (replica {0})")]
    SnapshotUnsupported(u64),

    // === Network Errors ===
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // === Codec Errors ===
    #[error("Codec error: {0}")]
    Codec(String),

    // === Aggregation Errors ===
    #[error("Weighting function failed: {0}")]
    Weighting(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Replica is shutting down")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Raft(raft::Error::ProposalDropped) | Error::Busy | Error::ProposalTimeout
        )
    }

    /// Reason string carried by a negative reply to a node.
    pub fn reply_reason(&self) -> String {
        match self {
            Error::PendingTests | Error::DuplicateTest => self.to_string(),
            Error::UnknownNode(_) => "Unknown node".to_string(),
            Error::JoinFailed(_) => "Failed Join".to_string(),
            Error::Raft(_)
            | Error::ProposalTimeout
            | Error::Busy
            | Error::Shutdown => "Try Again".to_string(),
            _ => self.to_string(),
        }
    }

    /// Convert to gRPC status for RPC responses
    pub fn to_grpc_status(&self) -> tonic::Status {
        use tonic::Code;
        match self {
            Error::Shutdown => tonic::Status::new(Code::Unavailable, self.to_string()),
            Error::Busy => tonic::Status::new(Code::ResourceExhausted, self.to_string()),
            Error::Codec(_) => tonic::Status::new(Code::InvalidArgument, self.to_string()),
            Error::Grpc(status) => status.clone(),
            _ => tonic::Status::new(Code::Internal, self.to_string()),
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::PendingTests | Error::DuplicateTest => StatusCode::CONFLICT,
            Error::UnknownNode(_) => StatusCode::NOT_FOUND,
            Error::InvalidConfig(_) | Error::Codec(_) => StatusCode::BAD_REQUEST,
            Error::ProposalTimeout => StatusCode::REQUEST_TIMEOUT,
            Error::Raft(_)
            | Error::Busy
            | Error::JoinFailed(_)
            | Error::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<protobuf::ProtobufError> for Error {
    fn from(e: protobuf::ProtobufError) -> Self {
        Error::Codec(e.to_string())
    }
}
