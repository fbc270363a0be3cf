use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineStatus {
    Running,
    Stopped,
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineStatus::Running => write!(f, "Running"),
            EngineStatus::Stopped => write!(f, "Stopped"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineState {
    pub status: EngineStatus,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub signals_emitted: u64,
}

/// Run state of the loops plus the stop signal they listen to
pub struct EngineController {
    is_running: AtomicBool,
    started_at: DateTime<Utc>,
    signals_emitted: AtomicU64,
    stop_tx: watch::Sender<bool>,
}

impl EngineController {
    pub fn new_running() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            is_running: AtomicBool::new(true),
            started_at: Utc::now(),
            signals_emitted: AtomicU64::new(0),
            stop_tx,
        }
    }

    pub fn stop(&self) -> Result<(), String> {
        if !self.is_running.swap(false, Ordering::AcqRel) {
            return Err("Engine is not running".to_string());
        }

        info!("Engine stopping");
        self.stop_tx.send_replace(true);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    pub fn increment_signals(&self) {
        self.signals_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_state(&self) -> EngineState {
        let status = if self.is_running() {
            EngineStatus::Running
        } else {
            EngineStatus::Stopped
        };

        let uptime_seconds = (Utc::now() - self.started_at).num_seconds().max(0) as u64;

        EngineState {
            status,
            started_at: self.started_at,
            uptime_seconds,
            signals_emitted: self.signals_emitted.load(Ordering::Relaxed),
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.stop_tx.subscribe(),
        }
    }
}

impl Default for EngineController {
    fn default() -> Self {
        Self::new_running()
    }
}

/// Cancellation handle given to every loop and to in-flight waits
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once stop is requested (or the controller is gone)
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }

    /// Sleep for `duration` unless stopped first; false when cut short
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_shutdown() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}
