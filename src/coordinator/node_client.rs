//! HTTP client for calls from the coordinator to nodes

use crate::common::{http_url, Reply, Result, TestRequest};
use crate::coordinator::state::TestAssignment;
use std::time::Duration;

#[derive(Clone)]
pub struct NodeClient {
    client: reqwest::Client,
}

impl NodeClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// POST a `test_request` to the node listening at `address`.
    pub async fn send_test_request(&self, address: &str, request: &TestRequest) -> Result<Reply> {
        let url = format!("{}/test_request", http_url(address));
        let reply = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json::<Reply>()
            .await?;
        Ok(reply)
    }

    /// Send each assignment in the background. Failures are logged and not
    /// retried; the obligation stays recorded and blocks the node's next
    /// commit until it reports.
    pub fn dispatch(&self, assignments: Vec<TestAssignment>) {
        for assignment in assignments {
            let client = self.clone();
            tokio::spawn(async move {
                let request = TestRequest {
                    commit: assignment.commit,
                    model: assignment.model,
                };
                match client
                    .send_test_request(&assignment.address, &request)
                    .await
                {
                    Ok(reply) if reply.is_ok() => tracing::debug!(
                        node = %assignment.node_name,
                        commit = assignment.commit,
                        "test request delivered"
                    ),
                    Ok(reply) => tracing::warn!(
                        node = %assignment.node_name,
                        commit = assignment.commit,
                        reason = %reply.reason,
                        "node declined test request"
                    ),
                    Err(e) => tracing::warn!(
                        node = %assignment.node_name,
                        address = %assignment.address,
                        commit = assignment.commit,
                        error = %e,
                        "failed to send test request"
                    ),
                }
            });
        }
    }
}
