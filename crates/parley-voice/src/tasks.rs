//! Background task bookkeeping shared by the relays and the gateway.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use parley_core::protocol::ClientEvent;

/// How long a stopping relay may spend on its goodbye frames before the
/// socket is dropped.
pub const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// A spawned task and the name it is logged under.
pub struct NamedTask {
    pub name: &'static str,
    pub handle: JoinHandle<()>,
}

impl NamedTask {
    pub fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self {
            name,
            handle: tokio::spawn(future),
        }
    }

    /// Wait up to `timeout` for the task to finish, then abort it.
    ///
    /// Returns `true` if the task stopped on its own.
    pub async fn join(self, timeout: Duration) -> bool {
        let NamedTask { name, mut handle } = self;
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => {
                debug!(task = name, "Task stopped");
                true
            }
            Ok(Err(e)) => {
                warn!(task = name, error = %e, "Task ended abnormally");
                true
            }
            Err(_) => {
                warn!(task = name, timeout_ms = timeout.as_millis() as u64, "Task did not stop in time, aborting");
                handle.abort();
                false
            }
        }
    }
}

/// Join tasks in order, each with its own timeout.
pub async fn join_all(tasks: Vec<NamedTask>, timeout: Duration) {
    for task in tasks {
        task.join(timeout).await;
    }
}

/// Queue an event for the client unless `stop` fires first.
///
/// Returns `false` when the event was not queued.
pub async fn send_event(
    client: &mpsc::Sender<ClientEvent>,
    event: ClientEvent,
    stop: &CancellationToken,
) -> bool {
    tokio::select! {
        _ = stop.cancelled() => false,
        result = client.send(event) => result.is_ok(),
    }
}
