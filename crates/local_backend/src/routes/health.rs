use axum::Json;
use serde_json::{
    json,
    Value,
};

/// `GET /health`: liveness only, no dependency checks -- a load balancer
/// uses this to decide whether to keep routing traffic here, so it must
/// never block on the hot/cold/coordination stores.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
