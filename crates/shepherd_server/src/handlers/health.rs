//! GET /health: liveness, no auth.

use axum::Json;
use serde_json::{json, Value};

use crate::envelope::{ok, Envelope};

pub async fn health() -> Json<Envelope<Value>> {
    ok(json!({
        "status": "ok",
        "service": "shepherd",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
