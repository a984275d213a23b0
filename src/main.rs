//! Live Sync - daemon
//!
//! Connects to the live content feed, follows the configured events and
//! markets, and exposes health and metrics endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::get, Json, Router};
use futures_util::StreamExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use live_sync::{
    metrics, Config, EventsProvider, HttpTransport, SubscribableContent, WebSocketManager,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Live Sync");

    // Load configuration
    let config = Arc::new(Config::load()?);
    info!(
        events = ?config.event_ids,
        markets = ?config.market_ids,
        "Configuration loaded"
    );

    let transport = Arc::new(HttpTransport::new(Duration::from_secs(10))?);
    let provider = Arc::new(EventsProvider::from_config(&config, transport));

    // Start health check server
    let health_provider = provider.clone();
    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_provider, health_port).await {
            warn!(error = %e, "Health server error");
        }
    });

    // Follow configured topics once the feed has handed out a session
    let follow_provider = provider.clone();
    let follow_config = config.clone();
    tokio::spawn(async move {
        if let Err(e) = follow_topics(follow_provider, follow_config).await {
            warn!(error = %e, "Failed to follow configured topics");
        }
    });

    // Start WebSocket manager
    let mut ws_manager = WebSocketManager::new(provider.clone(), config);
    tokio::select! {
        result = ws_manager.run() => {
            provider.shutdown();
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            provider.shutdown();
            ws_manager.shutdown().await;
        }
    }

    Ok(())
}

async fn follow_topics(provider: Arc<EventsProvider>, config: Arc<Config>) -> anyhow::Result<()> {
    let mut rotations = provider.tokens().rotations();
    rotations.wait_for(|token| token.is_some()).await?;
    info!("Session established, subscribing configured topics");

    for event_id in &config.event_ids {
        match provider.subscribe_live_data(event_id).await? {
            Some(feed) => log_feed(event_id.clone(), feed),
            None => warn!(event_id = %event_id, "Live data not subscribed"),
        }
        match provider.subscribe_event_markets(event_id).await? {
            Some(feed) => log_feed(event_id.clone(), feed),
            None => warn!(event_id = %event_id, "Secondary markets not subscribed"),
        }
    }
    for (market_id, event_id) in &config.market_ids {
        let Some(feed) = provider.subscribe_market_details(market_id, event_id).await? else {
            warn!(market_id = %market_id, "Market details not subscribed");
            continue;
        };
        tokio::spawn(async move {
            let mut feed = feed;
            while let Some(item) = feed.next().await {
                match item {
                    Ok(SubscribableContent::ContentUpdate(market)) => debug!(
                        market_id = %market.id,
                        tradable = market.is_tradable,
                        outcomes = market.outcomes.len(),
                        "Market update"
                    ),
                    Ok(state) => debug!(subscribed = state.is_subscribed(), "Market topic state"),
                    Err(e) => warn!(error = %e, "Market topic failed"),
                }
            }
        });
    }

    Ok(())
}

fn log_feed(event_id: String, mut feed: live_sync::FeedStream<Arc<live_sync::Event>>) {
    tokio::spawn(async move {
        while let Some(item) = feed.next().await {
            match item {
                Ok(SubscribableContent::ContentUpdate(event)) => debug!(
                    event_id = %event.id,
                    status = ?event.status,
                    home_score = ?event.home_score,
                    away_score = ?event.away_score,
                    markets = event.markets.len(),
                    "Event update"
                ),
                Ok(state) => debug!(event_id = %event_id, subscribed = state.is_subscribed(), "Event topic state"),
                Err(e) => warn!(event_id = %event_id, error = %e, "Event topic failed"),
            }
        }
    });
}

/// Start HTTP server for health checks and metrics
async fn start_health_server(provider: Arc<EventsProvider>, port: u16) -> anyhow::Result<()> {
    use std::net::SocketAddr;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(provider);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(provider): State<Arc<EventsProvider>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "component": "live-sync",
        "connector": provider.connector_state(),
        "activeTopics": provider.active_topics(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn render_metrics() -> String {
    metrics::render()
}
