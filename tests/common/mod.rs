// Shared helpers: a stub observation server on a loopback port and event
// waiting utilities.

#![allow(dead_code)]

use anyhow::Result;
use observation_sync::{http, AppState, Config, SyncEvent};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;

pub const WAIT: Duration = Duration::from_secs(5);

/// Start a stub server and return its state plus a client config pointing at it
pub async fn spawn_stub() -> Result<(AppState, Config)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = AppState::new();
    tokio::spawn(http::serve(listener, state.clone()));

    Ok((state, test_config(&format!("http://{}", addr))))
}

/// Fast timings so tests do not wait on production defaults
pub fn test_config(base_url: &str) -> Config {
    let mut cfg = Config::default();
    cfg.server.base_url = base_url.to_string();
    cfg.polling.interval_ms = Some(50);
    cfg.client.probe_timeout_ms = 1_000;
    cfg.client.request_timeout_ms = 1_000;
    cfg.client.socket_grace_ms = 500;
    cfg.client.reconnect_delay_ms = 100;
    cfg
}

/// Base URL of a port nobody listens on
pub async fn dead_url() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{}", addr))
}

/// Wait for the first event matching `pred`, skipping others
pub async fn next_matching(
    rx: &mut UnboundedReceiver<SyncEvent>,
    pred: impl Fn(&SyncEvent) -> bool,
) -> SyncEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Wait for a transcript event with exactly this text
pub async fn transcript(rx: &mut UnboundedReceiver<SyncEvent>, expected: &str) {
    next_matching(rx, |e| matches!(e, SyncEvent::Transcript(f) if f.full_text == expected)).await;
}

/// Transcript texts currently queued, without waiting
pub fn drain_transcripts(rx: &mut UnboundedReceiver<SyncEvent>) -> Vec<String> {
    let mut texts = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SyncEvent::Transcript(fragment) = event {
            texts.push(fragment.full_text);
        }
    }
    texts
}

/// Poll `check` until it holds
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not met within {:?}", WAIT);
}
