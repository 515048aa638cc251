//! Stratum JSON-RPC message shapes.
//!
//! Line-delimited JSON objects, `\n` terminated. Requests carry an id
//! echoed in the response; server-originated notifications use a null
//! id. Errors are the standard `[code, message]` pair.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ShareError;
use crate::job::MiningJob;

/// A client → server call.
#[derive(Clone, Debug, Deserialize)]
pub struct StratumRequest {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// A server → client reply.
#[derive(Clone, Debug, Serialize)]
pub struct StratumResponse {
    pub id: Option<Value>,
    pub result: Value,
    pub error: Option<Value>,
}

impl StratumResponse {
    pub fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    pub fn err(id: Option<Value>, code: i32, message: &str) -> Self {
        Self {
            id,
            result: Value::Bool(false),
            error: Some(json!([code, message])),
        }
    }

    pub fn share_err(id: Option<Value>, err: &ShareError) -> Self {
        Self::err(id, err.code(), &err.to_string())
    }

    /// Serialize with the trailing newline the wire format requires.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).expect("response serializes");
        line.push('\n');
        line
    }
}

/// A server-originated notification line.
pub fn notification(method: &str, params: Value) -> String {
    let mut line = serde_json::to_string(&json!({
        "id": null,
        "method": method,
        "params": params,
    }))
    .expect("notification serializes");
    line.push('\n');
    line
}

pub fn notify_line(job: &MiningJob, clean_jobs: bool) -> String {
    notification("mining.notify", job.notify_params(clean_jobs))
}

pub fn set_target_line(job: &MiningJob) -> String {
    notification("mining.set_target", json!([job.share_target_hex()]))
}

pub fn ping_line() -> String {
    notification("mining.ping", json!([]))
}

pub fn block_found_line(height: u32, worker: &str) -> String {
    notification("pool.block_found", json!([height, worker]))
}

pub fn block_accepted_line(height: u32) -> String {
    notification("pool.block_accepted", json!([height]))
}

pub fn block_rejected_line(height: u32, reason: &str) -> String {
    notification("pool.block_rejected", json!([height, reason]))
}
