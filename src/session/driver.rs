//! Background task applying transport events to the client state
//!
//! Every transport reports into one channel; this loop is the only consumer.
//! It also owns the transient window timer and starts push-channel
//! recovery, which runs as its own task so the loop never waits on it.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::client::Shared;
use super::observer::SyncEvent;
use super::state::ConnectionState;
use crate::transport::{Inbound, Transport, TransportEvent, TransportKind};

pub(super) async fn run(shared: Arc<Shared>, mut inbound_rx: mpsc::Receiver<Inbound>) {
    loop {
        let deadline = shared.state.lock().await.transient_deadline();
        let window_expiry = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            inbound = inbound_rx.recv() => match inbound {
                Some(inbound) => handle(&shared, inbound).await,
                None => break,
            },
            _ = shared.backlog_ready.notified() => replay_backlog(&shared).await,
            _ = window_expiry => expire_window(&shared).await,
        }
    }

    debug!("Sync driver stopped");
}

async fn handle(shared: &Arc<Shared>, inbound: Inbound) {
    let Inbound { generation, event } = inbound;

    let backlog = {
        let mut state = shared.state.lock().await;
        let event = match state.hold(generation, event) {
            Ok(()) => {
                debug!("Holding event of opening transport generation {}", generation);
                return;
            }
            Err(event) => event,
        };

        if !state.accepts(generation) {
            debug!("Dropping {:?} from retired transport generation {}", event, generation);
            return;
        }

        let mut backlog = state.take_backlog();
        backlog.push(event);
        backlog
    };

    for event in backlog {
        dispatch(shared, generation, event).await;
    }
}

/// Apply events that arrived while the current transport was still opening
async fn replay_backlog(shared: &Arc<Shared>) {
    let (generation, backlog) = {
        let mut state = shared.state.lock().await;
        match state.accepted_generation() {
            Some(generation) => (generation, state.take_backlog()),
            None => return,
        }
    };

    if !backlog.is_empty() {
        debug!("Replaying {} held events (generation {})", backlog.len(), generation);
    }
    for event in backlog {
        dispatch(shared, generation, event).await;
    }
}

async fn dispatch(shared: &Arc<Shared>, generation: u64, event: TransportEvent) {
    match event {
        TransportEvent::Fragment(fragment) => shared.submit_transcript_update(fragment).await,
        TransportEvent::Status(message) => info!("Observation server status: {}", message),
        TransportEvent::FetchFailed(reason) => transient_failure(shared, reason).await,
        TransportEvent::Error(reason) => warn!("Transport error: {}", reason),
        TransportEvent::Closed => transport_closed(shared, generation).await,
    }
}

async fn transient_failure(shared: &Shared, reason: String) {
    let opened = shared.state.lock().await.record_fetch_failure(Instant::now());

    if opened {
        warn!("Transient fetch error, recording continues: {}", reason);
    } else {
        debug!("Transient fetch error (window refreshed): {}", reason);
    }
    shared.notify(SyncEvent::TransientError { message: reason });
}

async fn expire_window(shared: &Shared) {
    let expired = shared.state.lock().await.expire_transient(Instant::now());
    if expired {
        info!("Transient error window cleared");
        shared.notify(SyncEvent::TransientCleared);
    }
}

/// Retire a dropped push channel and start recovering in the background
async fn transport_closed(shared: &Arc<Shared>, generation: u64) {
    let (retired, session_id) = {
        let mut slot = shared.transport.lock().await;
        let mut state = shared.state.lock().await;

        let is_socket = slot.as_ref().map(|t| t.kind()) == Some(TransportKind::Socket);
        let session_id = state.session().map(|s| s.id);
        match session_id {
            Some(session_id) if is_socket && state.accepts(generation) => {
                state.set_generation(None);
                (slot.take(), session_id)
            }
            _ => {
                debug!("Transport generation {} closed", generation);
                return;
            }
        }
    };

    warn!("Push channel dropped during session {}", session_id);
    tokio::spawn(recover_push_channel(Arc::clone(shared), retired, session_id));
}

/// One bounded reconnect, then fall back to polling
///
/// The session only ends when the polling fallback cannot reach the server
/// either.
async fn recover_push_channel(shared: Arc<Shared>, retired: Option<Box<dyn Transport>>, session_id: Uuid) {
    let shared = shared.as_ref();
    if let Some(mut transport) = retired {
        transport.close().await;
    }

    let (delay, remaining) = {
        let mut state = shared.state.lock().await;
        let delay = state.reconnect_policy().next_delay();
        if delay.is_some() {
            state.stats_mut().reconnect_attempts += 1;
        }
        (delay, state.reconnect_policy().remaining())
    };

    if let Some(delay) = delay {
        info!(
            "Reconnecting push channel in {:?} ({} attempts left after this one)",
            delay, remaining
        );
        tokio::time::sleep(delay).await;

        match shared.connect(TransportKind::Socket).await {
            Ok((transport, generation)) => {
                if install(shared, session_id, transport, generation).await {
                    info!("Push channel reconnected");
                }
                return;
            }
            Err(e) => warn!("Push channel reconnect failed: {}", e),
        }
    } else {
        info!("Reconnect budget spent for session {}", session_id);
    }

    if !owns_session(shared, session_id).await {
        return;
    }

    match shared.connect(TransportKind::Polling).await {
        Ok((transport, generation)) => {
            if install(shared, session_id, transport, generation).await {
                shared.state.lock().await.stats_mut().transport_fallbacks += 1;
                info!("Session {} continues over polling", session_id);
                shared.notify_state().await;
            }
        }
        Err(e) => {
            error!("Polling fallback failed, ending session {}: {}", session_id, e);
            {
                let mut state = shared.state.lock().await;
                if state.session().map(|s| s.id) == Some(session_id) {
                    state.end_session();
                    state.set_connection(ConnectionState::Error);
                }
            }
            shared.notify(SyncEvent::SessionLost {
                reason: e.to_string(),
            });
            shared.notify_state().await;
        }
    }
}

async fn owns_session(shared: &Shared, session_id: Uuid) -> bool {
    shared.state.lock().await.session().map(|s| s.id) == Some(session_id)
}

/// Make `transport` the session's transport if the session is still running
///
/// Returns false (and closes the transport) when the user stopped or
/// restarted in the meantime.
async fn install(
    shared: &Shared,
    session_id: Uuid,
    mut transport: Box<dyn Transport>,
    generation: u64,
) -> bool {
    {
        let mut slot = shared.transport.lock().await;
        let mut state = shared.state.lock().await;
        if state.session().map(|s| s.id) == Some(session_id) && slot.is_none() {
            state.switch_transport(transport.kind(), generation);
            transport.activate();
            *slot = Some(transport);
            shared.backlog_ready.notify_one();
            return true;
        }
    }

    debug!("Session {} ended while recovering, discarding transport", session_id);
    shared.state.lock().await.abandon_generation(generation);
    transport.close().await;
    false
}
