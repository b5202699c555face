//! Viewer readiness.
//!
//! Highlights can only be applied once the viewer has finished rendering its
//! text layer. The viewer side holds a [`ReadyNotifier`] and resolves it once;
//! the highlighting side waits on the paired [`ReadySignal`] with a deadline.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use log::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadyError {
    #[error("viewer did not become ready within {0:?}")]
    InitializationTimeout(Duration),
    #[error("viewer was dropped before it became ready")]
    Abandoned,
}

#[derive(Debug)]
pub struct ReadyNotifier {
    tx: flume::Sender<()>,
    state: Arc<OnceLock<()>>,
}

#[derive(Debug, Clone)]
pub struct ReadySignal {
    rx: flume::Receiver<()>,
    state: Arc<OnceLock<()>>,
}

pub fn ready_signal() -> (ReadyNotifier, ReadySignal) {
    let (tx, rx) = flume::bounded(1);
    let state = Arc::new(OnceLock::new());
    (
        ReadyNotifier {
            tx,
            state: state.clone(),
        },
        ReadySignal { rx, state },
    )
}

impl ReadyNotifier {
    /// Marks the viewer ready. Consumes the notifier, so readiness resolves once.
    pub fn resolve(self) {
        if self.state.set(()).is_ok() {
            debug!("Viewer ready");
        }
        // Waiters may already be gone.
        let _ = self.tx.try_send(());
    }
}

impl ReadySignal {
    pub fn is_ready(&self) -> bool {
        self.state.get().is_some()
    }

    /// Blocks until the viewer is ready or `timeout` passes.
    pub fn wait(&self, timeout: Duration) -> Result<(), ReadyError> {
        if self.is_ready() {
            return Ok(());
        }
        match self.rx.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            // Resolved by an earlier waiter on a cloned signal.
            Err(_) if self.is_ready() => Ok(()),
            Err(flume::RecvTimeoutError::Timeout) => {
                warn!("Viewer not ready after {timeout:?}");
                Err(ReadyError::InitializationTimeout(timeout))
            }
            Err(flume::RecvTimeoutError::Disconnected) => Err(ReadyError::Abandoned),
        }
    }
}
