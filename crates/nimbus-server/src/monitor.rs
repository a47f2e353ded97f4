use std::future::Future;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Tracks the lifecycle of a listener task owned by an actor. The task is
/// spawned in the pending state and reports readiness back to the actor,
/// which then installs the shutdown signal here.
pub enum ServerMonitor<E> {
    Stopped,
    Pending {
        handle: JoinHandle<Result<(), E>>,
    },
    Running {
        /// The shutdown signal to send to the server task.
        signal: oneshot::Sender<()>,
        handle: JoinHandle<Result<(), E>>,
        /// The local port the server is bound to.
        port: u16,
    },
}

impl<E> Default for ServerMonitor<E> {
    fn default() -> Self {
        Self::Stopped
    }
}

impl<E> ServerMonitor<E> {
    pub fn new() -> Self {
        Self::Stopped
    }

    /// Spawns the server task. The previous server, if any, must have been
    /// stopped already; use [`ServerMonitor::stop`] first when restarting.
    pub fn launch(f: impl Future<Output = Result<(), E>> + Send + 'static) -> Self
    where
        E: Send + 'static,
    {
        Self::Pending {
            handle: tokio::spawn(f),
        }
    }

    /// Transitions a pending server to running. Returns `Err(self)` when
    /// the server is not pending, so the caller can decide how to report it.
    pub fn ready(self, signal: oneshot::Sender<()>, port: u16) -> Result<Self, Self> {
        match self {
            Self::Pending { handle } => Ok(Self::Running {
                signal,
                handle,
                port,
            }),
            other => Err(other),
        }
    }

    pub async fn stop(self) {
        match self {
            Self::Stopped => {}
            Self::Pending { handle } => {
                handle.abort();
            }
            Self::Running { signal, handle, .. } => {
                let _ = signal.send(());
                let _ = handle.await;
            }
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Running { port, .. } => Some(*port),
            _ => None,
        }
    }
}
