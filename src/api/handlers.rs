use std::sync::Arc;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use log::debug;

use crate::data::{Feed, InstrumentSnapshot, SimulatedProvider};
use crate::subscription::{ConnectionLifecycle, SymbolSet};

#[derive(Clone)]
pub struct ApiState {
    pub lifecycle: ConnectionLifecycle,
    pub simulated: Arc<SimulatedProvider>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: usize,
    pub max_connections: usize,
    pub subscriptions: usize,
    pub catalog: Vec<String>,
}

// GET /api/health - Health check endpoint
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "stock_push",
        "timestamp": chrono::Utc::now()
    }))
}

// GET /api/stats - Live connection and subscription counts
pub async fn get_stats(State(state): State<ApiState>) -> Json<StatsResponse> {
    let engine = state.lifecycle.engine();
    Json(StatsResponse {
        connections: state.lifecycle.connection_count(),
        max_connections: state.lifecycle.max_connections(),
        subscriptions: engine.subscription_count(),
        catalog: state.simulated.catalog().to_vec(),
    })
}

// GET /api/snapshot - Simulated catalog as pushed by getAllStocksDummy
pub async fn get_snapshot(State(state): State<ApiState>) -> Json<Vec<InstrumentSnapshot>> {
    Json(state.simulated.snapshot_all())
}

// GET /api/snapshot/:symbol
pub async fn get_symbol_snapshot(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
) -> Result<Json<InstrumentSnapshot>, (StatusCode, Json<Value>)> {
    let symbols: SymbolSet = std::iter::once(symbol.as_str()).collect();
    let snapshot = symbols.iter().next().and_then(|symbol| state.simulated.snapshot(symbol));

    match snapshot {
        Some(snapshot) => Ok(Json(snapshot)),
        None => {
            debug!("Snapshot requested for unknown symbol '{}'", symbol);
            Err((StatusCode::NOT_FOUND, Json(json!({
                "message": Feed::Simulated.quote_failure(&symbols)
            }))))
        }
    }
}

// Create the API router
pub fn create_api_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .route("/snapshot", get(get_snapshot))
        .route("/snapshot/:symbol", get(get_symbol_snapshot))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;
    use crate::data::{DownstreamProvider, RandomWalk};
    use crate::subscription::{BroadcastEngine, PushScheduler};

    fn router() -> Router {
        let simulated = Arc::new(SimulatedProvider::new(RandomWalk::new(100.0, 20.0), 30));
        let real = Arc::new(DownstreamProvider::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap());
        let engine = BroadcastEngine::new(PushScheduler::new(Duration::from_secs(5)), simulated.clone(), real);
        let lifecycle = ConnectionLifecycle::new(Arc::new(engine), 10);
        create_api_router(ApiState { lifecycle, simulated })
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(router(), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "stock_push");
    }

    #[tokio::test]
    async fn test_stats_on_idle_server() {
        let (status, body) = get_json(router(), "/api/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connections"], 0);
        assert_eq!(body["subscriptions"], 0);
        assert_eq!(body["catalog"], json!(["BBRI", "BBCA", "TLKM", "ANTM"]));
    }

    #[tokio::test]
    async fn test_snapshot_lists_catalog() {
        let (status, body) = get_json(router(), "/api/snapshot").await;
        assert_eq!(status, StatusCode::OK);
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0]["symbol"], "BBRI");
        assert_eq!(entries[0]["changePercent"].as_f64(), Some(0.92));
    }

    #[tokio::test]
    async fn test_symbol_snapshot() {
        let (status, body) = get_json(router(), "/api/snapshot/tlkm").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["symbol"], "TLKM");
        assert_eq!(body["price"].as_f64(), Some(3500.0));

        let (status, body) = get_json(router(), "/api/snapshot/zzz").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Stock symbol(s) not found: ZZZ");
    }
}
