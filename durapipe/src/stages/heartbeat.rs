//! Liveness reporting for long-running stage attempts.

use std::sync::Arc;
use tokio::sync::watch;

/// Handle a stage uses to report that it is still making progress.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    tx: Arc<watch::Sender<u64>>,
}

impl Heartbeat {
    /// Creates a heartbeat handle paired with the monitor that watches it.
    pub(crate) fn channel() -> (Self, HeartbeatMonitor) {
        let (tx, rx) = watch::channel(0);
        (Self { tx: Arc::new(tx) }, HeartbeatMonitor { rx, open: true })
    }

    /// Creates a handle nobody watches.
    #[must_use]
    pub fn detached() -> Self {
        Self::channel().0
    }

    /// Reports liveness.
    pub fn beat(&self) {
        self.tx.send_modify(|beats| *beats = beats.wrapping_add(1));
    }

    /// Returns the number of beats sent so far.
    #[must_use]
    pub fn beats(&self) -> u64 {
        *self.tx.borrow()
    }
}

/// Receiving side of a [`Heartbeat`].
#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    rx: watch::Receiver<u64>,
    open: bool,
}

impl HeartbeatMonitor {
    /// Returns true while the stage still holds its heartbeat handle.
    pub(crate) const fn is_open(&self) -> bool {
        self.open
    }

    /// Waits for the next beat. Returns false once every handle is dropped.
    pub(crate) async fn next_beat(&mut self) -> bool {
        if self.rx.changed().await.is_ok() {
            true
        } else {
            self.open = false;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_monitor_sees_beats() {
        let (heartbeat, mut monitor) = Heartbeat::channel();

        heartbeat.beat();
        assert!(monitor.next_beat().await);
        assert_eq!(heartbeat.beats(), 1);
    }

    #[tokio::test]
    async fn test_monitor_closes_when_handle_dropped() {
        let (heartbeat, mut monitor) = Heartbeat::channel();
        drop(heartbeat);

        assert!(!monitor.next_beat().await);
        assert!(!monitor.is_open());
    }

    #[test]
    fn test_detached_heartbeat_accepts_beats() {
        let heartbeat = Heartbeat::detached();
        heartbeat.beat();
        heartbeat.beat();
        assert_eq!(heartbeat.beats(), 2);
    }
}
