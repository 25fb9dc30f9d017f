//! the dashboard against an in-process backend speaking the real contract:
//! GET /api/data/, GET /api/device/ and the /ws/currentData/ websocket.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use climate_dashboard::config::{DashboardConfig, DisplayZone};
use climate_dashboard::overview::{ClimatePanel, HistoryPanel, Overview};
use climate_dashboard::web::{self, WebState};
use climate_dashboard::{Dashboard, Reading, SharedOverview};
use serde_json::json;
use std::time::Duration;

async fn spawn_backend(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}

fn config_for(hostname: String) -> DashboardConfig {
    let mut config = DashboardConfig::default();
    config.backend.hostname = hostname;
    config.display.timezone = DisplayZone::Utc;
    config.logging.show_readings = false;
    config
}

async fn wait_until(overview: &SharedOverview, done: impl Fn(&Overview) -> bool) {
    let wait = async {
        loop {
            if done(&*overview.read().await) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("dashboard never reached the expected state");
}

// ==============================================================================
// happy path: one history record, one live record
// ==============================================================================

async fn history_batch() -> Json<serde_json::Value> {
    Json(json!([
        {"time": "2024-01-01T00:00:00Z", "temperature": 70, "humidity": 40}
    ]))
}

async fn device_log() -> Json<serde_json::Value> {
    Json(json!([
        {"time": "2024-01-01T00:00:30Z", "event": "on", "device": "heater"}
    ]))
}

async fn live_socket(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(send_one_reading)
}

async fn send_one_reading(mut socket: WebSocket) {
    let frames = [
        json!({"type": "websocket.accept"}),
        json!({"type": "other", "text": {"time": "2024-01-01T00:00:45Z", "temperature": 1, "humidity": 1}}),
        json!({"type": "send.json", "text": {"time": "2024-01-01T00:01:00Z", "temperature": 71, "humidity": 41}}),
    ];
    for frame in frames {
        if socket.send(Message::Text(frame.to_string())).await.is_err() {
            return;
        }
    }
    // keep the connection open until the client leaves
    while let Some(Ok(_)) = socket.recv().await {}
}

#[tokio::test]
async fn history_and_live_reading_merge_in_order() {
    let backend = spawn_backend(
        Router::new()
            .route("/api/data/", get(history_batch))
            .route("/api/device/", get(device_log))
            .route("/ws/currentData/", get(live_socket)),
    )
    .await;

    let dashboard = Dashboard::start(&config_for(backend));
    let overview = dashboard.overview();
    wait_until(&overview, |o| o.timeline().len() == 2 && o.devices().len() == 1).await;

    {
        let overview = overview.read().await;
        let temps: Vec<f64> = overview.timeline().iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![70.0, 71.0]);
        assert_eq!(
            overview.climate(),
            ClimatePanel::Latest {
                temperature: "71°F".to_string(),
                humidity: "41%".to_string(),
                time: "12:01AM".to_string(),
            }
        );
        assert!(matches!(overview.history(), HistoryPanel::Charts(ref s) if s.len() == 2));
        assert_eq!(overview.devices()[0].device, "heater");
    }

    // the local api hands out the same timeline
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = web::router(WebState::new(&dashboard));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let timeline: Vec<Reading> = reqwest::get(format!("http://{}/api/timeline", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline[1].humidity, 41.0);

    dashboard.shutdown().await;
}

// ==============================================================================
// backend down: empty screen turns into "no data", nothing crashes
// ==============================================================================

async fn unavailable() -> impl IntoResponse {
    (StatusCode::SERVICE_UNAVAILABLE, "down")
}

async fn silent_socket(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket: WebSocket| async move { while let Some(Ok(_)) = socket.recv().await {} })
}

#[tokio::test]
async fn failed_history_ends_in_no_data() {
    let backend = spawn_backend(
        Router::new()
            .route("/api/data/", get(unavailable))
            .route("/api/device/", get(unavailable))
            .route("/ws/currentData/", get(silent_socket)),
    )
    .await;

    let mut config = config_for(backend);
    config.display.no_data_after_seconds = 0;

    let dashboard = Dashboard::start(&config);
    let overview = dashboard.overview();
    wait_until(&overview, |o| o.is_complete()).await;

    {
        let overview = overview.read().await;
        assert!(overview.timeline().is_empty());
        assert_eq!(overview.climate(), ClimatePanel::NoData);
        assert!(overview.status().history_error.unwrap().contains("503"));
    }

    dashboard.shutdown().await;
}
