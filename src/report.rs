use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;

/// Status code of a successful run.
pub const STATUS_OK: u8 = 0;

/// Machine-readable outcome of a run, printed on stdout.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPayload {
    pub status_code: u8,
    pub body: Value,
}

pub fn make_report(result: Result<Value>) -> ReportPayload {
    match result {
        Err(err) => ReportPayload {
            status_code: err.kind.code(),
            body: json!({
                "error": err.kind.to_string(),
                "message": err.msg,
            }),
        },
        Ok(body) => ReportPayload {
            status_code: STATUS_OK,
            body,
        },
    }
}
