//! ==============================================================================
//! web.rs - local dashboard server
//! ==============================================================================
//!
//! purpose:
//!     serves the screen (Climate + History) as html and the underlying state
//!     as json. read-only apart from the manual refresh trigger.
//!
//! routes:
//!     GET  /              html screen
//!     GET  /api/timeline  merged readings, oldest first
//!     GET  /api/latest    last reading or null
//!     GET  /api/history   chart series (or loading / no_data)
//!     GET  /api/devices   device events, as fetched
//!     GET  /api/status    counts, loading flag, stream state
//!     POST /api/refresh   re-fetch history and device events
//!
//! relationships:
//!     - reads: overview.rs (through the dashboard's shared lock)
//!     - triggers: history.rs (FetchControl::refresh)
//!
//! ==============================================================================

use crate::dashboard::{Dashboard, SharedOverview};
use crate::domain::{DeviceEvent, Reading};
use crate::history::FetchControl;
use crate::overview::{ClimatePanel, HistoryPanel, Overview, OverviewStatus};

use anyhow::{Context, Result};
use axum::{
    extract::State,
    response::{Html, Json},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct WebState {
    overview: SharedOverview,
    history: FetchControl,
    devices: FetchControl,
}

impl WebState {
    pub fn new(dashboard: &Dashboard) -> Self {
        Self {
            overview: dashboard.overview(),
            history: dashboard.history_control(),
            devices: dashboard.devices_control(),
        }
    }
}

// ==============================================================================
// web server
// ==============================================================================

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/api/timeline", get(timeline_handler))
        .route("/api/latest", get(latest_handler))
        .route("/api/history", get(history_handler))
        .route("/api/devices", get(devices_handler))
        .route("/api/status", get(status_handler))
        .route("/api/refresh", post(refresh_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(bind: &str, state: WebState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind dashboard on {}", bind))?;
    log::info!("[WEB] Dashboard live at http://{}", bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn dashboard_handler(State(state): State<WebState>) -> Html<String> {
    let overview = state.overview.read().await;
    Html(render_page(&overview))
}

async fn timeline_handler(State(state): State<WebState>) -> Json<Vec<Reading>> {
    let overview = state.overview.read().await;
    Json(overview.timeline().as_slice().to_vec())
}

async fn latest_handler(State(state): State<WebState>) -> Json<Option<Reading>> {
    let overview = state.overview.read().await;
    Json(overview.latest().cloned())
}

async fn history_handler(State(state): State<WebState>) -> Json<HistoryPanel> {
    let overview = state.overview.read().await;
    Json(overview.history())
}

async fn devices_handler(State(state): State<WebState>) -> Json<Vec<DeviceEvent>> {
    let overview = state.overview.read().await;
    Json(overview.devices().to_vec())
}

async fn status_handler(State(state): State<WebState>) -> Json<OverviewStatus> {
    let overview = state.overview.read().await;
    Json(overview.status())
}

/// manual refresh endpoint
/// POST /api/refresh
async fn refresh_handler(State(state): State<WebState>) -> Json<serde_json::Value> {
    log::info!("[WEB] manual refresh requested");
    state.history.refresh();
    state.devices.refresh();
    Json(serde_json::json!({"status": "ok", "action": "refresh"}))
}

// ==============================================================================
// html rendering
// ==============================================================================

pub fn render_page(overview: &Overview) -> String {
    format!(
        r#"<!doctype html>
<html>
<head>
    <meta charset="utf-8">
    <meta http-equiv="refresh" content="10">
    <title>climate</title>
</head>
<body style="font-family: system-ui; padding: 2rem; background: #1a1a2e; color: #eee;">
    <section>
        <h2>Climate</h2>
{}
    </section>
    <section>
        <h2>History</h2>
{}
    </section>
</body>
</html>"#,
        render_climate(&overview.climate()),
        render_history(&overview.history())
    )
}

fn render_climate(panel: &ClimatePanel) -> String {
    match panel {
        ClimatePanel::Loading => loading_indicator(),
        ClimatePanel::NoData => no_data_message(),
        ClimatePanel::Latest {
            temperature,
            humidity,
            time,
        } => format!(
            "        <h3>{}</h3>\n        <h3>{}</h3>\n        <p>{}</p>",
            html_escape(temperature),
            html_escape(humidity),
            html_escape(time)
        ),
    }
}

fn render_history(panel: &HistoryPanel) -> String {
    match panel {
        HistoryPanel::Loading => loading_indicator(),
        HistoryPanel::NoData => no_data_message(),
        // drawing is left to whatever picks up the embedded series
        HistoryPanel::Charts(series) => series
            .iter()
            .map(|s| {
                let data = serde_json::to_string(&s.points)
                    .unwrap_or_else(|_| "[]".to_string())
                    .replace("</", "<\\/");
                format!(
                    "        <h4>{} ({} points)</h4>\n        <script type=\"application/json\" data-field=\"{}\" data-suffix=\"{}\">{}</script>",
                    html_escape(s.name),
                    s.points.len(),
                    html_escape(s.field.label()),
                    html_escape(s.suffix),
                    data
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn loading_indicator() -> String {
    r#"        <p class="loading">loading…</p>"#.to_string()
}

fn no_data_message() -> String {
    r#"        <p class="error" style="color: #ff6b6b;">no climate data available</p>"#.to_string()
}

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
