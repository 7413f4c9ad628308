//! Messages exchanged between nodes and the coordination tier
//!
//! Every node-facing call answers with a [`Reply`]: `OK` or `NO` plus a
//! human-readable reason. There is no structured error code.

use crate::common::{CommitNumber, Error};
use serde::{Deserialize, Serialize};

/// A model trained by a node on its private data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalModel {
    /// Opaque serialized model payload
    pub model: String,
    /// Number of rows the model was trained (or validated) on
    pub size: f64,
    /// Error on the node's own training data (or on the validator's data)
    pub error: f64,
}

impl LocalModel {
    pub fn new(model: impl Into<String>, size: f64, error: f64) -> Self {
        Self {
            model: model.into(),
            size,
            error,
        }
    }

    /// Copy handed to peers for validation; training statistics are zeroed.
    pub fn sanitized(&self) -> Self {
        Self {
            model: self.model.clone(),
            size: 0.0,
            error: 0.0,
        }
    }
}

/// Weighted ensemble of committed node models
///
/// `models[i]` belongs to node `i`; an empty string marks a node without a
/// committed model (its weight is 0).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalModel {
    pub models: Vec<String>,
    pub weights: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "NO")]
    No,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub status: ReplyStatus,
    #[serde(default)]
    pub reason: String,
}

impl Reply {
    pub fn ok(reason: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Ok,
            reason: reason.into(),
        }
    }

    pub fn no(reason: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::No,
            reason: reason.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }
}

impl From<&Error> for Reply {
    fn from(e: &Error) -> Self {
        Reply::no(e.reply_reason())
    }
}

/// `join_request`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub node_name: String,
    /// Address the coordinator uses to reach the node (`host:port` or URL)
    pub node_address: String,
}

/// `commit_request`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRequest {
    pub node_name: String,
    pub model: LocalModel,
}

/// `global_request`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalRequest {
    pub node_name: String,
}

/// `global_grant`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalGrant {
    #[serde(flatten)]
    pub reply: Reply,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<GlobalModel>,
}

/// `test_request`, sent by the coordinator to a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRequest {
    pub commit: CommitNumber,
    /// Sanitized model to validate
    pub model: LocalModel,
}

/// `test_complete`, the node's validation result for a commit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestComplete {
    pub node_name: String,
    pub commit: CommitNumber,
    /// Rows the model was validated on
    pub size: f64,
    /// Error of the model on the validating node's data
    pub error: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitized_zeroes_statistics() {
        let model = LocalModel::new("pickled", 100.0, 0.1);
        let clean = model.sanitized();
        assert_eq!(clean.model, "pickled");
        assert_eq!(clean.size, 0.0);
        assert_eq!(clean.error, 0.0);
    }

    #[test]
    fn test_reply_wire_format() {
        let json = serde_json::to_value(Reply::no("Duplicate Test")).unwrap();
        assert_eq!(json["status"], "NO");
        assert_eq!(json["reason"], "Duplicate Test");

        let grant = GlobalGrant {
            reply: Reply::ok(""),
            global: Some(GlobalModel {
                models: vec!["m".into(), String::new()],
                weights: vec![1.0, 0.0],
            }),
        };
        let json = serde_json::to_value(&grant).unwrap();
        assert_eq!(json["status"], "OK");
        assert_eq!(json["global"]["weights"][0], 1.0);
    }
}
