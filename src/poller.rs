//! Application status polling.
//!
//! Fetches once immediately, then on every interval tick, until the decision
//! is terminal or a fetch fails. The loop runs on its own task; dropping the
//! [`PollHandle`] aborts it, so no state is published after the consumer is gone.
//! With an idle timeout the loop also stops once nobody has read the state
//! through [`PollHandle::touch`] for that long.

use crate::api_client::FullRevenueClient;
use crate::models::Application;
use crate::offer::{status_view, StatusView};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const POLL_FAILED: &str = "No se pudo obtener el estado de la solicitud";

/// Mutually exclusive render states of the status page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PollState {
    Loading,
    Error {
        message: String,
    },
    /// Latest snapshot, possibly still pending.
    Loaded {
        application: Application,
        view: StatusView,
    },
}

impl PollState {
    pub fn application(&self) -> Option<&Application> {
        match self {
            PollState::Loaded { application, .. } => Some(application),
            _ => None,
        }
    }

    /// No further updates will follow.
    pub fn is_final(&self) -> bool {
        match self {
            PollState::Loading => false,
            PollState::Error { .. } => true,
            PollState::Loaded { application, .. } => application.decision_status.is_terminal(),
        }
    }
}

#[derive(Clone)]
pub struct StatusPoller {
    client: FullRevenueClient,
    interval: Duration,
    idle_timeout: Option<Duration>,
}

impl StatusPoller {
    pub fn new(client: FullRevenueClient, interval: Duration) -> Self {
        Self {
            client,
            interval,
            idle_timeout: None,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    /// Spawns the polling loop. Must be called from within a tokio runtime.
    pub fn start(&self, application_id: impl Into<String>) -> PollHandle {
        let application_id = application_id.into();
        let (tx, rx) = watch::channel(PollState::Loading);
        let (seen_tx, seen_rx) = watch::channel(Instant::now());

        tracing::info!(
            "Polling application {} every {}ms",
            application_id,
            self.interval.as_millis()
        );
        let task = tokio::spawn(poll_loop(
            self.client.clone(),
            application_id.clone(),
            self.interval,
            self.idle_timeout,
            tx,
            seen_rx,
        ));

        PollHandle {
            application_id,
            rx,
            last_seen: seen_tx,
            task,
        }
    }
}

async fn poll_loop(
    client: FullRevenueClient,
    application_id: String,
    interval: Duration,
    idle_timeout: Option<Duration>,
    tx: watch::Sender<PollState>,
    last_seen: watch::Receiver<Instant>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // First tick completes immediately.
        ticker.tick().await;

        if let Some(idle) = idle_timeout {
            if last_seen.borrow().elapsed() >= idle {
                tracing::info!("No viewers for application {}, polling stopped", application_id);
                return;
            }
        }

        match client.get_application(&application_id).await {
            Ok(application) => {
                let status = application.decision_status;
                let view = status_view(&application);
                if tx.send(PollState::Loaded { application, view }).is_err() {
                    tracing::debug!("Status consumer for {} is gone", application_id);
                    return;
                }
                if status.is_terminal() {
                    tracing::info!(
                        "Application {} reached {}, polling stopped",
                        application_id,
                        status.as_str()
                    );
                    return;
                }
            }
            Err(e) => {
                tracing::warn!("Status poll for {} failed, stopping: {}", application_id, e);
                let _ = tx.send(PollState::Error {
                    message: POLL_FAILED.to_string(),
                });
                return;
            }
        }
    }
}

/// Owner of a running poll. Stops the loop when dropped.
pub struct PollHandle {
    application_id: String,
    rx: watch::Receiver<PollState>,
    last_seen: watch::Sender<Instant>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn state(&self) -> PollState {
        self.rx.borrow().clone()
    }

    /// Records a viewer, postponing the idle stop.
    pub fn touch(&self) {
        self.last_seen.send_replace(Instant::now());
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.rx.clone()
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// The loop has ended without a final state to show: it went idle, was
    /// stopped, or died. A new poller is needed to get fresh data.
    pub fn is_stale(&self) -> bool {
        self.is_finished() && !self.state().is_final()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loading_is_not_final() {
        assert!(!PollState::Loading.is_final());
        assert!(PollState::Error {
            message: POLL_FAILED.to_string()
        }
        .is_final());
    }

    #[tokio::test]
    async fn test_unreachable_backend_ends_in_error() {
        let client = FullRevenueClient::new("http://127.0.0.1:9").unwrap();
        let handle = StatusPoller::new(client, Duration::from_millis(50)).start("app-1");

        let mut rx = handle.subscribe();
        let state = rx
            .wait_for(|s| !matches!(s, PollState::Loading))
            .await
            .unwrap()
            .clone();
        assert_eq!(
            state,
            PollState::Error {
                message: POLL_FAILED.to_string()
            }
        );
    }
}
