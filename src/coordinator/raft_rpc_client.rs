//! Raft gRPC client helpers
use crate::common::{http_url, Error, Result};
use crate::proto::coordinator_internal_client::CoordinatorInternalClient;
use crate::proto::RaftEnvelope;
use protobuf::Message as PbMessage;
use raft::prelude::Message;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

/// Client for a peer replica; connects on first use.
pub fn connect_lazy(
    peer_addr: &str,
    timeout: Duration,
) -> Result<CoordinatorInternalClient<Channel>> {
    let endpoint = Endpoint::from_shared(http_url(peer_addr))
        .map_err(|e| Error::InvalidConfig(format!("bad peer address {}: {}", peer_addr, e)))?
        .connect_timeout(timeout)
        .timeout(timeout);
    Ok(CoordinatorInternalClient::new(endpoint.connect_lazy()))
}

pub async fn send_raft_message(
    client: &mut CoordinatorInternalClient<Channel>,
    from: u64,
    message: &Message,
) -> Result<()> {
    let payload = message.write_to_bytes()?;
    let ack = client
        .step(RaftEnvelope { from, payload })
        .await?
        .into_inner();
    if !ack.ok {
        return Err(Error::Internal(format!(
            "peer refused raft message from {}",
            from
        )));
    }
    Ok(())
}
