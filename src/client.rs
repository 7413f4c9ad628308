//! Node-side client for the coordinator's HTTP API
//!
//! Negative replies come back as `Ok(Reply)` with status `NO`; only
//! transport and decoding failures are errors.

use crate::common::{
    http_url, CommitRequest, GlobalGrant, GlobalRequest, JoinRequest, LocalModel, Reply, Result,
    TestComplete,
};
use std::time::Duration;

#[derive(Clone)]
pub struct CoordinatorClient {
    base_url: String,
    client: reqwest::Client,
}

impl CoordinatorClient {
    pub fn new(addr: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: http_url(addr),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn join(&self, node_name: &str, node_address: &str) -> Result<Reply> {
        self.post(
            "/join",
            &JoinRequest {
                node_name: node_name.to_string(),
                node_address: node_address.to_string(),
            },
        )
        .await
    }

    pub async fn commit(&self, node_name: &str, model: LocalModel) -> Result<Reply> {
        self.post(
            "/commit",
            &CommitRequest {
                node_name: node_name.to_string(),
                model,
            },
        )
        .await
    }

    pub async fn test_complete(&self, result: &TestComplete) -> Result<Reply> {
        self.post("/test_complete", result).await
    }

    pub async fn global(&self, node_name: &str) -> Result<GlobalGrant> {
        self.post(
            "/global",
            &GlobalRequest {
                node_name: node_name.to_string(),
            },
        )
        .await
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: serde::Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;
        Ok(response.json::<R>().await?)
    }
}
