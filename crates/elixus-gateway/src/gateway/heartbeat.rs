//! Heartbeat scheduling and acknowledgment tracking.
//!
//! The timer runs in its own task and only emits [`Beat`] ticks into the
//! connection's event channel. Whether a tick turns into a heartbeat frame or
//! a [`HeartbeatTimeout`](super::DisconnectCause::HeartbeatTimeout) is decided
//! by [`HeartbeatStatus`], which lives in the connection task.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Longest heartbeat interval a Hello may ask for.
pub const MAX_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3600);

/// `Instant::now() + after`, saturating far in the future instead of
/// overflowing.
#[must_use]
pub fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

// About thirty years, the same horizon tokio uses for timers that never fire.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A scheduled heartbeat is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beat;

/// Result of a scheduled beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeatOutcome {
    /// Send a heartbeat now.
    Send,
    /// The previous heartbeat was never acknowledged.
    Missed,
}

/// Acknowledgment bookkeeping for the current connection.
#[derive(Debug, Clone)]
pub struct HeartbeatStatus {
    interval: Duration,
    last_sent_at: Option<Instant>,
    last_ack_at: Option<Instant>,
    acknowledged: bool,
}

impl HeartbeatStatus {
    /// Fresh status; the first beat always sends.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent_at: None,
            last_ack_at: None,
            acknowledged: true,
        }
    }

    /// Handle a scheduled beat.
    pub fn on_beat(&mut self, now: Instant) -> BeatOutcome {
        if !self.acknowledged {
            return BeatOutcome::Missed;
        }
        self.acknowledged = false;
        self.last_sent_at = Some(now);
        BeatOutcome::Send
    }

    /// Handle an acknowledgment; returns the round trip of the last beat.
    pub fn on_ack(&mut self, now: Instant) -> Option<Duration> {
        self.acknowledged = true;
        self.last_ack_at = Some(now);
        self.latency()
    }

    /// Round trip of the most recent acknowledged heartbeat.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        match (self.last_sent_at, self.last_ack_at) {
            (Some(sent), Some(ack)) if ack >= sent => Some(ack - sent),
            _ => None,
        }
    }

    /// Whether the last heartbeat was acknowledged.
    #[must_use]
    pub const fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    /// Interval between beats.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

/// Random delay in `[0, interval)` before the first beat, so clients that
/// reconnect together do not heartbeat together.
#[must_use]
pub fn initial_jitter(interval: Duration) -> Duration {
    let millis = interval.as_millis() as u64;
    if millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..millis))
}

/// Handle for controlling the heartbeat task.
#[derive(Debug)]
pub struct HeartbeatHandle {
    running: Arc<AtomicBool>,
    beats: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl HeartbeatHandle {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            beats: Arc::new(AtomicU64::new(0)),
            cancel,
        }
    }

    /// Check if the heartbeat task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of beats emitted so far.
    #[must_use]
    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::SeqCst)
    }

    /// Stop the heartbeat task.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start the heartbeat timer.
///
/// Emits a [`Beat`] after `initial_delay` and then every `interval` until
/// `cancel` fires, the handle is stopped or dropped, or the receiver goes away.
pub fn start_heartbeat_task<T>(
    interval: Duration,
    initial_delay: Duration,
    tx: mpsc::Sender<T>,
    cancel: CancellationToken,
) -> HeartbeatHandle
where
    T: From<Beat> + Send + 'static,
{
    let handle = HeartbeatHandle::new(cancel.child_token());
    handle.running.store(true, Ordering::SeqCst);

    let running = Arc::clone(&handle.running);
    let beats = Arc::clone(&handle.beats);
    let cancel = handle.cancel.clone();
    let period = interval.clamp(Duration::from_millis(1), FAR_FUTURE);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(deadline_after(initial_delay), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                sent = tx.send(T::from(Beat)) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }

            let n = beats.fetch_add(1, Ordering::SeqCst) + 1;
            trace!(beat = n, "heartbeat due");
        }

        running.store(false, Ordering::SeqCst);
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_first_beat_sends() {
        let mut status = HeartbeatStatus::new(Duration::from_secs(45));
        assert!(status.is_acknowledged());
        assert_eq!(status.on_beat(Instant::now()), BeatOutcome::Send);
        assert!(!status.is_acknowledged());
    }

    #[test]
    fn test_status_missed_without_ack() {
        let mut status = HeartbeatStatus::new(Duration::from_secs(45));
        let now = Instant::now();
        assert_eq!(status.on_beat(now), BeatOutcome::Send);
        assert_eq!(status.on_beat(now), BeatOutcome::Missed);
    }

    #[test]
    fn test_status_ack_rearms() {
        let mut status = HeartbeatStatus::new(Duration::from_secs(45));
        let sent = Instant::now();
        status.on_beat(sent);
        let latency = status.on_ack(sent + Duration::from_millis(80));
        assert_eq!(latency, Some(Duration::from_millis(80)));
        assert_eq!(status.on_beat(sent + Duration::from_secs(45)), BeatOutcome::Send);
    }

    #[test]
    fn test_unsolicited_ack_keeps_armed() {
        let mut status = HeartbeatStatus::new(Duration::from_secs(45));
        assert_eq!(status.on_ack(Instant::now()), None);
        assert!(status.is_acknowledged());
    }

    #[test]
    fn test_initial_jitter_in_range() {
        let interval = Duration::from_millis(45_000);
        for _ in 0..1_000 {
            assert!(initial_jitter(interval) < interval);
        }
        assert_eq!(initial_jitter(Duration::ZERO), Duration::ZERO);
    }

    fn assert_elapsed(start: Instant, expected_ms: u64) {
        let elapsed = start.elapsed();
        let expected = Duration::from_millis(expected_ms);
        assert!(
            elapsed >= expected && elapsed <= expected + Duration::from_millis(1),
            "expected ~{expected:?}, got {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_beat_after_delay_then_fixed_spacing() {
        let (tx, mut rx) = mpsc::channel::<Beat>(8);
        let start = Instant::now();
        let handle = start_heartbeat_task(
            Duration::from_millis(45_000),
            Duration::from_millis(12_345),
            tx,
            CancellationToken::new(),
        );

        rx.recv().await.expect("first beat");
        assert_elapsed(start, 12_345);

        rx.recv().await.expect("second beat");
        assert_elapsed(start, 57_345);

        rx.recv().await.expect("third beat");
        assert_elapsed(start, 102_345);

        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_task() {
        let (tx, mut rx) = mpsc::channel::<Beat>(8);
        let handle = start_heartbeat_task(
            Duration::from_millis(10),
            Duration::ZERO,
            tx,
            CancellationToken::new(),
        );

        rx.recv().await.expect("first beat");
        handle.stop();

        // The sender is dropped once the task exits.
        while rx.recv().await.is_some() {}
        assert!(!handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancel_ends_task() {
        let (tx, mut rx) = mpsc::channel::<Beat>(8);
        let parent = CancellationToken::new();
        let handle =
            start_heartbeat_task(Duration::from_secs(1), Duration::ZERO, tx, parent.clone());

        rx.recv().await.expect("first beat");
        parent.cancel();

        while rx.recv().await.is_some() {}
        assert!(!handle.is_running());
        assert!(handle.beats() >= 1);
    }

    #[test]
    fn test_deadline_after_saturates() {
        let now = Instant::now();
        assert!(deadline_after(Duration::MAX) > now + Duration::from_secs(86_400 * 365));
        assert_eq!(
            deadline_after(Duration::from_secs(5)).duration_since(now).as_secs(),
            5
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_delays_do_not_kill_task() {
        let (tx, mut rx) = mpsc::channel::<Beat>(8);
        let handle =
            start_heartbeat_task(Duration::MAX, Duration::MAX, tx, CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(86_400)).await;
        assert!(rx.try_recv().is_err());
        assert!(handle.is_running());

        handle.stop();
        while rx.recv().await.is_some() {}
        assert!(!handle.is_running());
        assert_eq!(handle.beats(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel::<Beat>(1);
        let handle = start_heartbeat_task(
            Duration::from_millis(5),
            Duration::ZERO,
            tx,
            CancellationToken::new(),
        );

        drop(rx);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!handle.is_running());
    }
}
