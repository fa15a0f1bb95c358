use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
};
use chrono::Utc;
use color_eyre::eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::market::Timeframe;
use crate::risk::RiskReport;
use crate::scanner::Scanner;
use crate::session::SessionInfo;
use crate::signal::{Evaluation, Signal};
use crate::tracker::Performance;

const DEFAULT_HISTORY_LIMIT: usize = 50;

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub data_source: String,
    pub scans: u64,
    pub uptime_secs: i64,
    pub open_signals: usize,
}

#[derive(Debug, Deserialize)]
pub struct HistoryFilter {
    pub limit: Option<usize>,
    pub symbol: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PriceResponse {
    pub symbol: String,
    pub price: f64,
}

pub fn create_router(scanner: Arc<Scanner>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/signals", get(open_signals))
        .route("/api/signals/history", get(signal_history))
        .route("/api/performance", get(performance))
        .route("/api/risk", get(risk_report))
        .route("/api/session", get(session))
        .route("/api/analyze/{symbol}/{timeframe}", get(analyze))
        .route("/api/price/{symbol}", get(price))
        .layer(CorsLayer::permissive())
        .with_state(scanner)
}

async fn health(State(scanner): State<Arc<Scanner>>) -> Json<Health> {
    let state = scanner.state();
    let state = state.read().await;
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        data_source: scanner.source().name().to_string(),
        scans: state.total_scans,
        uptime_secs: (Utc::now() - scanner.started_at()).num_seconds(),
        open_signals: state.tracker.open().len(),
    })
}

async fn open_signals(State(scanner): State<Arc<Scanner>>) -> Json<Vec<Signal>> {
    let state = scanner.state();
    let open = state.read().await.tracker.open().to_vec();
    Json(open)
}

/// Closed signals, newest first.
async fn signal_history(
    State(scanner): State<Arc<Scanner>>,
    Query(filter): Query<HistoryFilter>,
) -> Json<Vec<Signal>> {
    let limit = filter.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let symbol = filter.symbol.map(|s| s.to_uppercase());
    let state = scanner.state();
    let state = state.read().await;
    let history = state
        .tracker
        .closed()
        .iter()
        .rev()
        .filter(|s| symbol.as_ref().is_none_or(|sym| &s.symbol == sym))
        .take(limit)
        .cloned()
        .collect();
    Json(history)
}

async fn performance(State(scanner): State<Arc<Scanner>>) -> Json<Performance> {
    let state = scanner.state();
    let perf = state.read().await.tracker.performance();
    Json(perf)
}

async fn risk_report(State(scanner): State<Arc<Scanner>>) -> Json<RiskReport> {
    let state = scanner.state();
    let state = state.read().await;
    Json(scanner.risk().report(state.tracker.open(), scanner.config().account_balance))
}

async fn session(State(scanner): State<Arc<Scanner>>) -> Json<SessionInfo> {
    Json(scanner.clock().info(Utc::now()))
}

async fn analyze(
    State(scanner): State<Arc<Scanner>>,
    Path((symbol, timeframe)): Path<(String, String)>,
) -> Result<Json<Evaluation>, ApiError> {
    let timeframe: Timeframe = timeframe
        .parse()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("{}", e)))?;
    match scanner.analyze(&symbol, timeframe).await {
        Ok(evaluation) => Ok(Json(evaluation)),
        Err(e) => {
            warn!("Analyze {} {} failed: {:#}", symbol, timeframe, e);
            Err(api_error(StatusCode::BAD_GATEWAY, format!("{:#}", e)))
        }
    }
}

async fn price(
    State(scanner): State<Arc<Scanner>>,
    Path(symbol): Path<String>,
) -> Result<Json<PriceResponse>, ApiError> {
    let symbol = symbol.to_uppercase();
    match scanner.source().current_price(&symbol).await {
        Ok(price) => Ok(Json(PriceResponse { symbol, price })),
        Err(e) => {
            error!("Failed to fetch price for {}: {:#}", symbol, e);
            Err(api_error(StatusCode::BAD_GATEWAY, format!("{:#}", e)))
        }
    }
}

pub async fn start_web_server(port: u16, scanner: Arc<Scanner>) -> Result<()> {
    let app = create_router(scanner);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .wrap_err_with(|| format!("Failed to bind to port {}", port))?;
    info!("🌐 HTTP API listening on http://localhost:{}/api/health", port);

    axum::serve(listener, app)
        .await
        .wrap_err("Failed to start web server")?;

    Ok(())
}
