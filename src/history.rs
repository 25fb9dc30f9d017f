//! ==============================================================================
//! history.rs - one-shot historical batch retrieval
//! ==============================================================================
//!
//! purpose:
//!     fetches a json array of records from the backend once per locator
//!     (and again on manual refresh) and publishes the result together with
//!     a loading flag.
//!
//! behaviour:
//!     - loading is true strictly while a request is in flight
//!     - on failure the data reverts to the empty default, loading clears,
//!       the optional error callback fires. no retry.
//!     - records that fail validation are dropped one by one; the rest of the
//!       batch is kept in order
//!     - a locator change drops the in-flight request, its result is never
//!       published
//!
//! relationships:
//!     - used by: dashboard.rs (readings + device events)
//!     - seam: JsonSource (HttpSource in production, fakes in tests)
//!
//! ==============================================================================

use crate::error::FetchError;

use serde::de::DeserializeOwned;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

// ==============================================================================
// json source - the transport seam
// ==============================================================================

/// something that can GET a url and hand back its json body
pub trait JsonSource: Send + Sync + 'static {
    fn get_json(&self, url: &str) -> impl Future<Output = Result<serde_json::Value, FetchError>> + Send;
}

/// reqwest-backed source used against the real backend
#[derive(Clone, Default)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl JsonSource for HttpSource {
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| FetchError::Body {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }
}

/// split a json array into valid records, dropping the ones that don't decode
pub fn decode_batch<T: DeserializeOwned>(url: &str, body: serde_json::Value) -> Result<Vec<T>, FetchError> {
    let serde_json::Value::Array(items) = body else {
        return Err(FetchError::Body {
            url: url.to_string(),
            reason: "expected a json array".to_string(),
        });
    };

    let total = items.len();
    let records: Vec<T> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();

    if records.len() < total {
        log::warn!(
            "[HISTORY] {}: dropped {} of {} malformed records",
            url,
            total - records.len(),
            total
        );
    }
    Ok(records)
}

// ==============================================================================
// fetch state
// ==============================================================================

/// what the fetcher exposes to its owner
#[derive(Clone, Debug)]
pub struct Fetched<T> {
    /// last fetched batch, empty before completion and after a failure
    pub data: Vec<T>,
    /// true strictly while a request is in flight
    pub loading: bool,
    /// bumped every time `data` is assigned by a finished attempt
    pub generation: u64,
    /// reason of the most recent failure, cleared by the next success
    pub error: Option<String>,
}

impl<T> Default for Fetched<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            loading: false,
            generation: 0,
            error: None,
        }
    }
}

impl<T> Fetched<T> {
    /// at least one attempt finished and nothing is in flight
    pub fn is_settled(&self) -> bool {
        self.generation > 0 && !self.loading
    }
}

pub type ErrorCallback = Arc<dyn Fn(&FetchError) + Send + Sync>;

enum FetchCommand {
    SetUrl(String),
    Refresh,
}

/// cloneable remote for refresh / locator change, e.g. from the web surface
#[derive(Clone)]
pub struct FetchControl {
    commands: mpsc::UnboundedSender<FetchCommand>,
}

impl FetchControl {
    /// re-issue the request for the current locator
    pub fn refresh(&self) {
        let _ = self.commands.send(FetchCommand::Refresh);
    }

    /// switch locator; issues exactly one request for the new one
    pub fn set_url(&self, url: impl Into<String>) {
        let _ = self.commands.send(FetchCommand::SetUrl(url.into()));
    }
}

// ==============================================================================
// history fetcher
// ==============================================================================

pub struct HistoryFetcher<S, T> {
    source: Arc<S>,
    url: String,
    on_error: Option<ErrorCallback>,
    state: watch::Sender<Fetched<T>>,
    _record: PhantomData<fn() -> T>,
}

/// owner side of a running fetcher. dropping it aborts the task.
pub struct FetchHandle<T> {
    state: watch::Receiver<Fetched<T>>,
    control: FetchControl,
    task: JoinHandle<()>,
}

impl<S, T> HistoryFetcher<S, T>
where
    S: JsonSource,
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// spawn the fetcher; the first request goes out immediately
    pub fn spawn(source: Arc<S>, url: impl Into<String>, on_error: Option<ErrorCallback>) -> FetchHandle<T> {
        let (state, receiver) = watch::channel(Fetched::default());
        let (commands, command_rx) = mpsc::unbounded_channel();

        let fetcher = Self {
            source,
            url: url.into(),
            on_error,
            state,
            _record: PhantomData,
        };
        let task = tokio::spawn(fetcher.run(command_rx));

        FetchHandle {
            state: receiver,
            control: FetchControl { commands },
            task,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<FetchCommand>) {
        let mut pending = true;

        loop {
            if !pending {
                match commands.recv().await {
                    Some(FetchCommand::SetUrl(url)) => self.url = url,
                    Some(FetchCommand::Refresh) => {}
                    None => return,
                }
            }
            pending = false;

            self.state.send_modify(|s| s.loading = true);
            log::debug!("[HISTORY] GET {}", self.url);

            let source = Arc::clone(&self.source);
            let url = self.url.clone();
            let request = source.get_json(&url);
            tokio::pin!(request);

            loop {
                tokio::select! {
                    result = &mut request => {
                        self.finish(result.and_then(|body| decode_batch(&url, body)));
                        break;
                    }
                    command = commands.recv() => match command {
                        Some(FetchCommand::SetUrl(next)) => {
                            log::debug!("[HISTORY] locator changed to {}, dropping request", next);
                            self.url = next;
                            pending = true;
                            break;
                        }
                        // already in flight for this locator
                        Some(FetchCommand::Refresh) => {}
                        None => return,
                    },
                }
            }
        }
    }

    fn finish(&self, result: Result<Vec<T>, FetchError>) {
        match result {
            Ok(data) => {
                log::info!("[HISTORY] {} records from {}", data.len(), self.url);
                self.state.send_modify(|s| {
                    s.data = data;
                    s.loading = false;
                    s.generation += 1;
                    s.error = None;
                });
            }
            Err(e) => {
                log::warn!("[HISTORY] fetch failed: {}", e);
                if let Some(callback) = &self.on_error {
                    callback(&e);
                }
                self.state.send_modify(|s| {
                    s.data = Vec::new();
                    s.loading = false;
                    s.generation += 1;
                    s.error = Some(e.to_string());
                });
            }
        }
    }
}

impl<T: Clone> FetchHandle<T> {
    /// snapshot of the current state, marking it seen
    pub fn current(&mut self) -> Fetched<T> {
        self.state.borrow_and_update().clone()
    }

    /// wait for the next state change
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.state.changed().await
    }

    pub fn control(&self) -> FetchControl {
        self.control.clone()
    }

    pub fn set_url(&self, url: impl Into<String>) {
        self.control.set_url(url);
    }
}

impl<T> Drop for FetchHandle<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
