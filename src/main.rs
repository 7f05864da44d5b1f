mod api;
mod config;
mod data;
mod events;
mod subscription;
mod websocket;

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::interval;
use log::{info, error};
use tower_http::cors::CorsLayer;

use crate::api::{ApiState, create_api_router};
use crate::config::{Config, STATS_INTERVAL_SECS};
use crate::data::{DownstreamProvider, RandomWalk, SimulatedProvider};
use crate::subscription::{BroadcastEngine, ConnectionLifecycle, PushScheduler};
use crate::websocket::{WebSocketHandler, WS_PATH};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(&config.log_level));

    config.log_config();

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        return Err(e.into());
    }

    // Providers
    let simulated = Arc::new(SimulatedProvider::new(
        RandomWalk::new(config.sim_floor, config.sim_step),
        config.series_capacity,
    ));
    let real = Arc::new(DownstreamProvider::new(&config.downstream_url, config.downstream_timeout())?);

    let engine = Arc::new(BroadcastEngine::new(
        PushScheduler::new(config.push_interval()),
        simulated.clone(),
        real,
    ));
    let lifecycle = ConnectionLifecycle::new(engine, config.max_connections);

    start_background_tasks(lifecycle.clone());

    // Start API server
    let api_state = ApiState {
        lifecycle: lifecycle.clone(),
        simulated,
    };
    let api_router = create_api_router(api_state)
        .layer(CorsLayer::permissive());

    let api_listener = TcpListener::bind(&config.api_bind_address).await?;
    info!("HTTP API server running at http://{}", config.api_bind_address);
    let api_server = axum::serve(api_listener, api_router);

    // Start WebSocket server
    let ws_listener = TcpListener::bind(&config.bind_address).await?;
    info!("WebSocket server running at ws://{}{}", config.bind_address, WS_PATH);

    let outbound_buffer = config.outbound_buffer;
    let websocket_server = async move {
        loop {
            match ws_listener.accept().await {
                Ok((stream, addr)) => {
                    let handler = WebSocketHandler::new(lifecycle.clone(), addr.to_string(), outbound_buffer);
                    tokio::spawn(handler.handle_connection(stream));
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    };

    tokio::select! {
        result = api_server => {
            error!("API server stopped: {:?}", result);
        }
        _ = websocket_server => {
            error!("WebSocket server stopped");
        }
    }

    Ok(())
}

fn start_background_tasks(lifecycle: ConnectionLifecycle) {
    tokio::spawn(async move {
        let mut interval_timer = interval(Duration::from_secs(STATS_INTERVAL_SECS));
        loop {
            interval_timer.tick().await;
            lifecycle.log_stats();
        }
    });

    info!("Started stats monitoring task (every {} seconds)", STATS_INTERVAL_SECS);
}
