//! ==============================================================================
//! stream.rs - live reading stream with automatic reconnection
//! ==============================================================================
//!
//! purpose:
//!     keeps a websocket to the backend open and turns its data frames into
//!     typed payloads. frames look like {"type": "send.json", "text": {...}};
//!     anything else on the channel (control frames, junk) is dropped.
//!
//! state machine:
//!
//! ```text
//!     ┌────────────┐  ok   ┌──────┐  unexpected close  ┌──────────────┐
//!     │ Connecting │──────>│ Open │───────────────────>│ Waiting      │
//!     └────────────┘       └──────┘                    │ (timer held) │
//!           ^   │ connect error                        └──────┬───────┘
//!           │   └─────────────────────────────────────────────┤
//!           └──────────────── delay elapsed ───────────────────┘
//! ```
//!
//! teardown and locator change:
//!     shutdown (or dropping the handle) from any phase closes the
//!     connection on purpose and ends the task; it never schedules a retry.
//!     a locator change drops the pending timer, closes any open connection
//!     and connects to the new locator at once, so a retry scheduled for the
//!     old locator can't fire.
//!
//! relationships:
//!     - used by: dashboard.rs
//!     - seam: StreamConnector / Connection (WsConnector in production)
//!
//! ==============================================================================

use crate::error::StreamError;

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// discriminator of frames that carry a payload
pub const DATA_FRAME_TAG: &str = "send.json";

// ==============================================================================
// frame decoding
// ==============================================================================

#[derive(Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<serde_json::Value>,
}

/// payload of a data frame, or None for anything that should be ignored
pub fn decode_frame<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let frame: Frame = serde_json::from_str(raw).ok()?;
    if frame.kind != DATA_FRAME_TAG {
        return None;
    }
    serde_json::from_value(frame.text?).ok()
}

// ==============================================================================
// connection seam
// ==============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

/// what an open connection reports
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Message(String),
    /// observed and logged, never a reason to reconnect by itself
    Error(String),
    /// the peer or the network ended the connection
    Closed(Option<CloseInfo>),
}

pub trait Connection: Send + 'static {
    fn next_event(&mut self) -> impl Future<Output = ConnectionEvent> + Send;

    /// intentional close, initiated by us
    fn close(self) -> impl Future<Output = ()> + Send;
}

pub trait StreamConnector: Send + Sync + 'static {
    type Connection: Connection;

    fn connect(&self, url: &str) -> impl Future<Output = Result<Self::Connection, StreamError>> + Send;
}

// ==============================================================================
// websocket implementation
// ==============================================================================

#[derive(Clone, Copy, Default)]
pub struct WsConnector;

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    failed: bool,
}

impl StreamConnector for WsConnector {
    type Connection = WsConnection;

    async fn connect(&self, url: &str) -> Result<WsConnection, StreamError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| StreamError::Connect {
                url: url.to_string(),
                source: Box::new(e),
            })?;

        Ok(WsConnection {
            stream,
            failed: false,
        })
    }
}

impl Connection for WsConnection {
    async fn next_event(&mut self) -> ConnectionEvent {
        // tungstenite gives nothing useful after an error
        if self.failed {
            return ConnectionEvent::Closed(None);
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return ConnectionEvent::Message(text.to_string()),
                Some(Ok(Message::Binary(bytes))) => {
                    if let Ok(text) = String::from_utf8(bytes.to_vec()) {
                        return ConnectionEvent::Message(text);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return ConnectionEvent::Closed(frame.map(|f| CloseInfo {
                        code: u16::from(f.code),
                        reason: f.reason.to_string(),
                    }));
                }
                // ping / pong / raw frames
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.failed = true;
                    return ConnectionEvent::Error(e.to_string());
                }
                None => return ConnectionEvent::Closed(None),
            }
        }
    }

    async fn close(self) {
        let mut stream = self.stream;
        if let Err(e) = stream.close(None).await {
            log::debug!("[STREAM] close handshake failed: {}", e);
        }
    }
}

// ==============================================================================
// live stream sync
// ==============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum StreamStatus {
    Connecting,
    Open,
    /// waiting out the delay; `attempt` counts retries since the last open
    Reconnecting { attempt: u32 },
    Closed,
}

/// pending retry, owned by the Waiting phase. dropping it cancels the retry.
struct ReconnectTimer {
    sleep: Pin<Box<Sleep>>,
    attempt: u32,
}

impl ReconnectTimer {
    fn new(delay: Duration, attempt: u32) -> Self {
        Self {
            sleep: Box::pin(tokio::time::sleep(delay)),
            attempt,
        }
    }

    fn cancel(self) {
        log::debug!("[STREAM] pending retry #{} cancelled", self.attempt);
    }
}

enum Phase<C> {
    Connecting,
    Open(C),
    Waiting(ReconnectTimer),
}

enum StreamCommand {
    SetUrl(String),
    Shutdown(oneshot::Sender<()>),
}

pub struct LiveStreamSync<C, T> {
    connector: C,
    url: String,
    reconnect_delay: Duration,
    attempt: u32,
    readings: mpsc::UnboundedSender<T>,
    latest: watch::Sender<Option<T>>,
    status: watch::Sender<StreamStatus>,
}

/// owner side of a running stream
///
/// dropping it has the same effect as `shutdown`, without waiting.
pub struct LiveStreamHandle<T> {
    commands: mpsc::UnboundedSender<StreamCommand>,
    readings: mpsc::UnboundedReceiver<T>,
    latest: watch::Receiver<Option<T>>,
    status: watch::Receiver<StreamStatus>,
    task: JoinHandle<()>,
}

/// one thing the owner needs to react to
#[derive(Clone, Debug, PartialEq)]
pub enum LiveUpdate<T> {
    Reading(T),
    Status(StreamStatus),
}

impl<C, T> LiveStreamSync<C, T>
where
    C: StreamConnector,
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn spawn(connector: C, url: impl Into<String>, reconnect_delay: Duration) -> LiveStreamHandle<T> {
        let (readings, readings_rx) = mpsc::unbounded_channel();
        let (latest, latest_rx) = watch::channel(None);
        let (status, status_rx) = watch::channel(StreamStatus::Connecting);
        let (commands, commands_rx) = mpsc::unbounded_channel();

        let sync = Self {
            connector,
            url: url.into(),
            reconnect_delay,
            attempt: 0,
            readings,
            latest,
            status,
        };
        let task = tokio::spawn(sync.run(commands_rx));

        LiveStreamHandle {
            commands,
            readings: readings_rx,
            latest: latest_rx,
            status: status_rx,
            task,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<StreamCommand>) {
        let mut phase = Phase::Connecting;

        loop {
            phase = match phase {
                Phase::Connecting => {
                    self.status.send_replace(StreamStatus::Connecting);
                    log::info!("[STREAM] connecting to {}", self.url);

                    let url = self.url.clone();
                    tokio::select! {
                        result = self.connector.connect(&url) => match result {
                            Ok(connection) => {
                                log::info!("[STREAM] connected to {}", url);
                                self.attempt = 0;
                                self.status.send_replace(StreamStatus::Open);
                                Phase::Open(connection)
                            }
                            // a socket that never opens closes unexpectedly too
                            Err(e) => {
                                log::error!("[STREAM] {}", e);
                                self.schedule_reconnect()
                            }
                        },
                        command = commands.recv() => match self.handle_command(command) {
                            Some(next) => next,
                            None => return,
                        },
                    }
                }

                Phase::Open(mut connection) => {
                    tokio::select! {
                        event = connection.next_event() => match event {
                            ConnectionEvent::Message(raw) => {
                                self.deliver(&raw);
                                Phase::Open(connection)
                            }
                            ConnectionEvent::Error(reason) => {
                                log::warn!("[STREAM] connection error: {}", reason);
                                Phase::Open(connection)
                            }
                            ConnectionEvent::Closed(info) => {
                                match info {
                                    Some(info) => log::error!(
                                        "[STREAM] websocket closed unexpectedly (code {}, {:?})",
                                        info.code,
                                        info.reason
                                    ),
                                    None => log::error!("[STREAM] websocket closed unexpectedly"),
                                }
                                self.schedule_reconnect()
                            }
                        },
                        command = commands.recv() => {
                            log::info!("[STREAM] closing connection to {}", self.url);
                            connection.close().await;
                            match self.handle_command(command) {
                                Some(next) => next,
                                None => return,
                            }
                        }
                    }
                }

                Phase::Waiting(mut timer) => {
                    tokio::select! {
                        _ = timer.sleep.as_mut() => Phase::Connecting,
                        command = commands.recv() => {
                            timer.cancel();
                            match self.handle_command(command) {
                                Some(next) => next,
                                None => return,
                            }
                        }
                    }
                }
            };
        }
    }

    fn schedule_reconnect(&mut self) -> Phase<C::Connection> {
        self.attempt += 1;
        log::info!(
            "[STREAM] retry #{} in {}s",
            self.attempt,
            self.reconnect_delay.as_secs_f64()
        );
        self.status.send_replace(StreamStatus::Reconnecting {
            attempt: self.attempt,
        });
        Phase::Waiting(ReconnectTimer::new(self.reconnect_delay, self.attempt))
    }

    /// next phase, or None when the task should end
    fn handle_command(&mut self, command: Option<StreamCommand>) -> Option<Phase<C::Connection>> {
        match command {
            Some(StreamCommand::SetUrl(url)) => {
                log::info!("[STREAM] locator changed: {} -> {}", self.url, url);
                self.url = url;
                self.attempt = 0;
                Some(Phase::Connecting)
            }
            Some(StreamCommand::Shutdown(ack)) => {
                self.stop();
                let _ = ack.send(());
                None
            }
            None => {
                self.stop();
                None
            }
        }
    }

    fn stop(&self) {
        self.status.send_replace(StreamStatus::Closed);
        log::info!("[STREAM] stopped");
    }

    fn deliver(&self, raw: &str) {
        match decode_frame::<T>(raw) {
            Some(payload) => {
                self.latest.send_replace(Some(payload.clone()));
                let _ = self.readings.send(payload);
            }
            None => log::trace!("[STREAM] ignored frame: {}", raw),
        }
    }
}

impl<T: Clone> LiveStreamHandle<T> {
    /// next accepted payload, in arrival order
    pub async fn recv(&mut self) -> Option<T> {
        self.readings.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.readings.try_recv().ok()
    }

    /// most recently decoded payload, None until the first one
    pub fn latest(&self) -> Option<T> {
        self.latest.borrow().clone()
    }

    pub fn status(&self) -> StreamStatus {
        self.status.borrow().clone()
    }

    /// wait for the next status change; None once the task is gone
    pub async fn status_changed(&mut self) -> Option<StreamStatus> {
        self.status.changed().await.ok()?;
        Some(self.status.borrow_and_update().clone())
    }

    /// a payload or a status change, whichever comes first
    pub async fn next_update(&mut self) -> Option<LiveUpdate<T>> {
        tokio::select! {
            Some(reading) = self.readings.recv() => Some(LiveUpdate::Reading(reading)),
            Ok(()) = self.status.changed() => {
                Some(LiveUpdate::Status(self.status.borrow_and_update().clone()))
            }
            else => None,
        }
    }

    /// switch locator; the current connection and any pending retry go away
    pub fn set_url(&self, url: impl Into<String>) {
        let _ = self.commands.send(StreamCommand::SetUrl(url.into()));
    }

    /// close on purpose and wait for the task to finish
    pub async fn shutdown(self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(StreamCommand::Shutdown(ack)).is_ok() {
            let _ = done.await;
        }
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Reading;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    const DELAY: Duration = Duration::from_secs(10);
    const URL: &str = "ws://backend/ws/currentData/";

    enum Script {
        CloseAtOnce,
        Refuse,
        Hold(mpsc::UnboundedReceiver<ConnectionEvent>),
    }

    /// hands out scripted connections and records every connect attempt;
    /// once the script runs out, connections stay open and silent
    #[derive(Clone)]
    struct FakeConnector {
        scripts: Arc<Mutex<VecDeque<Script>>>,
        connects: mpsc::UnboundedSender<(String, Instant)>,
        closes: Arc<AtomicUsize>,
    }

    struct FakeConnection {
        events: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
        close_at_once: bool,
        closes: Arc<AtomicUsize>,
    }

    impl FakeConnector {
        fn new(scripts: Vec<Script>) -> (Self, mpsc::UnboundedReceiver<(String, Instant)>) {
            let (connects, rx) = mpsc::unbounded_channel();
            let connector = Self {
                scripts: Arc::new(Mutex::new(scripts.into())),
                connects,
                closes: Arc::new(AtomicUsize::new(0)),
            };
            (connector, rx)
        }

        /// intentional closes only
        fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    impl StreamConnector for FakeConnector {
        type Connection = FakeConnection;

        async fn connect(&self, url: &str) -> Result<FakeConnection, StreamError> {
            let _ = self.connects.send((url.to_string(), Instant::now()));
            let script = self.scripts.lock().unwrap().pop_front();
            let (events, close_at_once) = match script {
                Some(Script::Refuse) => return Err(StreamError::Unavailable(url.to_string())),
                Some(Script::CloseAtOnce) => (None, true),
                Some(Script::Hold(events)) => (Some(events), false),
                None => (None, false),
            };
            Ok(FakeConnection {
                events,
                close_at_once,
                closes: self.closes.clone(),
            })
        }
    }

    impl Connection for FakeConnection {
        async fn next_event(&mut self) -> ConnectionEvent {
            if self.close_at_once {
                return ConnectionEvent::Closed(Some(CloseInfo {
                    code: 1006,
                    reason: "abnormal closure".to_string(),
                }));
            }
            match self.events.as_mut() {
                Some(events) => match events.recv().await {
                    Some(event) => event,
                    None => std::future::pending().await,
                },
                None => std::future::pending().await,
            }
        }

        async fn close(self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn data_frame(minute: u32, temperature: f64, humidity: f64) -> ConnectionEvent {
        ConnectionEvent::Message(format!(
            r#"{{"type":"send.json","text":{{"time":"2024-01-01T00:{minute:02}:00Z","temperature":{temperature},"humidity":{humidity}}}}}"#
        ))
    }

    async fn wait_status<T: Clone>(handle: &mut LiveStreamHandle<T>, want: impl Fn(&StreamStatus) -> bool) {
        while !want(&handle.status()) {
            handle.status_changed().await.expect("stream task ended");
        }
    }

    #[test]
    fn only_tagged_frames_decode() {
        let ok = r#"{"type":"send.json","text":{"time":"2024-01-01T00:01:00Z","temperature":71,"humidity":41}}"#;
        let other = r#"{"type":"other","text":{"time":"2024-01-01T00:01:00Z","temperature":71,"humidity":41}}"#;
        let control = r#"{"type":"websocket.accept"}"#;
        let partial = r#"{"type":"send.json","text":{"time":"2024-01-01T00:01:00Z","temperature":71}}"#;

        assert_eq!(decode_frame::<Reading>(ok).map(|r| r.temperature), Some(71.0));
        assert!(decode_frame::<Reading>(other).is_none());
        assert!(decode_frame::<Reading>(control).is_none());
        assert!(decode_frame::<Reading>(partial).is_none());
        assert!(decode_frame::<Reading>("not json").is_none());
        assert!(decode_frame::<Reading>("null").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_closes_reconnect_after_fixed_delay() {
        let (connector, mut connects) = FakeConnector::new(vec![
            Script::CloseAtOnce,
            Script::CloseAtOnce,
            Script::CloseAtOnce,
        ]);
        let handle: LiveStreamHandle<Reading> = LiveStreamSync::spawn(connector.clone(), URL, DELAY);

        // initial attempt + one retry per unexpected close
        let mut attempts = Vec::new();
        for _ in 0..4 {
            let (url, at) = connects.recv().await.unwrap();
            assert_eq!(url, URL);
            attempts.push(at);
        }
        for pair in attempts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= DELAY && gap < DELAY + Duration::from_millis(1), "gap {gap:?}");
        }

        // the fourth connection stays up: nothing else gets scheduled
        tokio::time::sleep(DELAY * 30).await;
        assert!(connects.try_recv().is_err());
        assert_eq!(handle.status(), StreamStatus::Open);
        assert_eq!(connector.closes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_is_retried_like_a_close() {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (connector, mut connects) = FakeConnector::new(vec![Script::Refuse, Script::Hold(events_rx)]);
        let mut handle: LiveStreamHandle<Reading> = LiveStreamSync::spawn(connector, URL, DELAY);

        let (_, first) = connects.recv().await.unwrap();
        let (_, second) = connects.recv().await.unwrap();
        assert!(second - first >= DELAY);

        events_tx.send(data_frame(1, 71.0, 41.0)).unwrap();
        assert_eq!(handle.recv().await.map(|r| r.humidity), Some(41.0));
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_closes_without_scheduling_a_retry() {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (connector, mut connects) = FakeConnector::new(vec![Script::Hold(events_rx)]);
        let mut handle: LiveStreamHandle<Reading> = LiveStreamSync::spawn(connector.clone(), URL, DELAY);

        connects.recv().await.unwrap();
        wait_status(&mut handle, |s| *s == StreamStatus::Open).await;

        handle.shutdown().await;
        assert_eq!(connector.closes(), 1);

        tokio::time::sleep(DELAY * 30).await;
        assert!(connects.try_recv().is_err());
        drop(events_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_is_a_teardown() {
        let (connector, mut connects) = FakeConnector::new(vec![]);
        let mut handle: LiveStreamHandle<Reading> = LiveStreamSync::spawn(connector.clone(), URL, DELAY);
        connects.recv().await.unwrap();
        wait_status(&mut handle, |s| *s == StreamStatus::Open).await;

        drop(handle);
        tokio::time::sleep(DELAY * 30).await;

        assert_eq!(connector.closes(), 1);
        assert!(connects.try_recv().is_err());
    }

    #[tokio::test]
    async fn only_data_frames_reach_the_owner() {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (connector, _connects) = FakeConnector::new(vec![Script::Hold(events_rx)]);
        let mut handle: LiveStreamHandle<Reading> = LiveStreamSync::spawn(connector, URL, DELAY);
        assert!(handle.latest().is_none());

        events_tx
            .send(ConnectionEvent::Message(r#"{"type":"websocket.accept"}"#.to_string()))
            .unwrap();
        events_tx
            .send(ConnectionEvent::Message(
                r#"{"type":"other","text":{"time":"2024-01-01T00:00:00Z","temperature":1,"humidity":1}}"#.to_string(),
            ))
            .unwrap();
        events_tx.send(ConnectionEvent::Message("{oops".to_string())).unwrap();
        events_tx.send(data_frame(1, 71.0, 41.0)).unwrap();

        let reading = handle.recv().await.unwrap();
        assert_eq!(reading.temperature, 71.0);
        assert_eq!(handle.latest(), Some(reading));
        assert!(handle.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn error_events_do_not_reconnect() {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (connector, mut connects) = FakeConnector::new(vec![Script::Hold(events_rx)]);
        let mut handle: LiveStreamHandle<Reading> = LiveStreamSync::spawn(connector, URL, DELAY);
        connects.recv().await.unwrap();

        events_tx.send(ConnectionEvent::Error("protocol hiccup".to_string())).unwrap();
        events_tx.send(data_frame(2, 72.0, 42.0)).unwrap();
        assert_eq!(handle.recv().await.map(|r| r.temperature), Some(72.0));

        tokio::time::sleep(DELAY * 3).await;
        assert!(connects.try_recv().is_err());
        assert_eq!(handle.status(), StreamStatus::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn locator_change_cancels_pending_retry() {
        let (connector, mut connects) = FakeConnector::new(vec![Script::CloseAtOnce]);
        let mut handle: LiveStreamHandle<Reading> = LiveStreamSync::spawn(connector, URL, DELAY);

        let (_, closed_at) = connects.recv().await.unwrap();
        wait_status(&mut handle, |s| matches!(s, StreamStatus::Reconnecting { .. })).await;

        handle.set_url("ws://other/ws/currentData/");
        let (url, at) = connects.recv().await.unwrap();
        assert_eq!(url, "ws://other/ws/currentData/");
        assert!(at - closed_at < DELAY);

        // the retry scheduled for the old locator never fires
        tokio::time::sleep(DELAY * 30).await;
        assert!(connects.try_recv().is_err());
        wait_status(&mut handle, |s| *s == StreamStatus::Open).await;
    }

    #[tokio::test]
    async fn secure_locator_reaches_the_tls_handshake() {
        use tokio_tungstenite::tungstenite::error::UrlError;
        use tokio_tungstenite::tungstenite::Error as WsError;

        // plain tcp peer that hangs up: the handshake fails, the url check must not
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let url = format!("wss://{}/ws/currentData/", addr);
        let source = match WsConnector.connect(&url).await {
            Err(StreamError::Connect { source, .. }) => source,
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("connected to a peer that speaks no tls"),
        };
        assert!(
            !matches!(*source, WsError::Url(UrlError::TlsFeatureNotEnabled)),
            "wss rejected before connecting: {}",
            source
        );
    }
}
