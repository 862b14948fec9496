use crate::types::ClientMessage;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time;

/// The single outstanding ping on an open transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingPing {
    pub sent_at: Instant,
    pub timestamp: i64,
}

/// Ping/pong bookkeeping for one open transport.
///
/// A new ping overwrites an unanswered one; a missed pong is not an error here.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval: Duration,
    pending: Option<PendingPing>,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn pending(&self) -> Option<PendingPing> {
        self.pending
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Records a ping sent at `now` and returns the message to transmit
    pub fn record_ping(&mut self, now: Instant, timestamp: i64) -> ClientMessage {
        if self.pending.is_some() {
            tracing::debug!("Previous ping unanswered, overwriting");
        }
        self.pending = Some(PendingPing {
            sent_at: now,
            timestamp,
        });
        ClientMessage::ping(timestamp)
    }

    /// Resolves the pending ping. `None` if no ping was outstanding.
    pub fn take_latency(&mut self, now: Instant) -> Option<Duration> {
        self.pending
            .take()
            .map(|ping| now.saturating_duration_since(ping.sent_at))
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}

/// Spawns a task calling `on_tick` every `interval`, first tick one interval from now.
///
/// The task ends when `on_tick` returns `false` (the receiving side is gone).
pub fn spawn_ticker<F>(interval: Duration, mut on_tick: F) -> JoinHandle<()>
where
    F: FnMut() -> bool + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval_timer = time::interval_at(time::Instant::now() + interval, interval);
        interval_timer.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            interval_timer.tick().await;
            if !on_tick() {
                tracing::debug!("Heartbeat receiver dropped, stopping ticker");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_latency_from_pending_ping() {
        let mut monitor = HeartbeatMonitor::new(Duration::from_secs(30));
        let sent = Instant::now();

        let msg = monitor.record_ping(sent, 1234);
        assert_eq!(msg, ClientMessage::ping(1234));
        assert!(monitor.has_pending());

        let latency = monitor.take_latency(sent + Duration::from_millis(42));
        assert_eq!(latency, Some(Duration::from_millis(42)));
        assert!(!monitor.has_pending());
    }

    #[test]
    fn test_pong_without_ping_yields_nothing() {
        let mut monitor = HeartbeatMonitor::new(Duration::from_secs(30));
        assert_eq!(monitor.take_latency(Instant::now()), None);
    }

    #[test]
    fn test_new_ping_overwrites_unanswered() {
        let mut monitor = HeartbeatMonitor::new(Duration::from_secs(30));
        let first = Instant::now();
        let second = first + Duration::from_secs(30);

        monitor.record_ping(first, 1);
        monitor.record_ping(second, 2);

        assert_eq!(monitor.pending().map(|p| p.timestamp), Some(2));
        let latency = monitor.take_latency(second + Duration::from_millis(5));
        assert_eq!(latency, Some(Duration::from_millis(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_fires_every_interval() {
        let ticks = Arc::new(AtomicU32::new(0));
        let ticks_for_task = Arc::clone(&ticks);

        let handle = spawn_ticker(Duration::from_secs(30), move || {
            ticks_for_task.fetch_add(1, Ordering::SeqCst);
            true
        });

        time::sleep(Duration::from_secs(29)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_stops_when_callback_declines() {
        let handle = spawn_ticker(Duration::from_millis(10), || false);
        let finished = time::timeout(Duration::from_secs(1), handle).await;
        assert!(finished.is_ok());
    }
}
