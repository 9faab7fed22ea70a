use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Operation is an opaque application payload: a `method` routing tag for
/// the service, and an uninterpreted `data` blob. The replication core
/// carries `data` as raw JSON text and never decodes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub method: String,
    pub data: Box<RawValue>,
}

/// LogPayload is the unit transferred over the wire and persisted in the
/// log: an operation tagged with its version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPayload {
    pub version: u64,
    pub op: Operation,
}

/// Envelope carried by every HTTP response: a payload, an error message,
/// or neither.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
