use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::{EventSink, Transport, TransportEvent, TransportKind};
use crate::api::ObservationApi;
use crate::error::TransportError;

/// Pull transport: one `GET /get_transcription` per tick
///
/// The fetch is awaited inside the loop, so at most one request is ever in
/// flight. Ticks that elapse during a slow fetch are skipped, not queued.
pub struct PollingTransport {
    api: ObservationApi,
    interval: Duration,
    sink: Option<EventSink>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl PollingTransport {
    pub fn new(api: ObservationApi, interval: Duration) -> Self {
        Self {
            api,
            interval,
            sink: None,
            shutdown: None,
            task: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[async_trait::async_trait]
impl Transport for PollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    fn name(&self) -> &str {
        "polling"
    }

    /// Connected means the status probe answered
    async fn open(&mut self, sink: EventSink) -> Result<(), TransportError> {
        let status = self.api.status().await?;
        info!("Polling transport ready ({}): {}", self.api.base_url(), status.message);

        self.sink = Some(sink);
        Ok(())
    }

    async fn send(&mut self, _frame: &str) -> Result<(), TransportError> {
        Err(TransportError::Unsupported {
            transport: "polling",
            operation: "send",
        })
    }

    fn activate(&mut self) {
        if self.task.is_some() {
            return;
        }
        let Some(sink) = self.sink.clone() else {
            debug!("Polling transport activated before open");
            return;
        };

        let (tx, rx) = watch::channel(false);
        self.shutdown = Some(tx);
        self.task = Some(tokio::spawn(poll_loop(
            self.api.clone(),
            self.interval,
            sink,
            rx,
        )));

        info!("Polling every {:?}", self.interval());
    }

    async fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        // Detached: an in-flight fetch finishes on its own and its result is
        // dropped by the client's generation check
        self.task.take();
        self.sink.take();
    }
}

async fn poll_loop(
    api: ObservationApi,
    interval: Duration,
    sink: EventSink,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        let event = match api.get_transcription().await {
            Ok(resp) => TransportEvent::Fragment(resp.into_fragment()),
            Err(e) => TransportEvent::FetchFailed(e.to_string()),
        };

        if !sink.emit(event).await {
            break;
        }
    }

    debug!("Polling loop stopped (generation {})", sink.generation());
}
