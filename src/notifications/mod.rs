use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::types::{Signal, SignalKind};

/// Receiver of emitted signals (chat bot, desktop UI, tray alert, ...).
/// Delivery failures stay inside the sink.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn deliver(&self, signal: &Signal);
}

/// Default sink: logs actionable signals, keeps the most recent ones in
/// memory (newest first) and fans them out to broadcast subscribers.
pub struct SignalNotifier {
    history: RwLock<VecDeque<Signal>>,
    max_history: usize,
    signal_tx: broadcast::Sender<Signal>,
}

impl SignalNotifier {
    pub fn new(max_history: usize) -> Self {
        let (signal_tx, _) = broadcast::channel(64);
        Self {
            history: RwLock::new(VecDeque::with_capacity(max_history)),
            max_history,
            signal_tx,
        }
    }

    /// Get recent signals, newest first
    pub async fn recent(&self) -> Vec<Signal> {
        self.history.read().await.iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.signal_tx.subscribe()
    }
}

impl Default for SignalNotifier {
    fn default() -> Self {
        Self::new(20)
    }
}

#[async_trait]
impl SignalSink for SignalNotifier {
    async fn deliver(&self, signal: &Signal) {
        match signal.kind {
            SignalKind::Hold => {
                debug!("{}", signal);
                return;
            }
            SignalKind::Breakout => warn!("{}", signal),
            SignalKind::Buy | SignalKind::Sell => info!("{}", signal),
        }

        let mut history = self.history.write().await;
        history.push_front(signal.clone());
        history.truncate(self.max_history);
        drop(history);

        // no subscribers is fine
        let _ = self.signal_tx.send(signal.clone());
    }
}
