use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// Source of "now" for reconnect backoff and pending item debouncing. Tests substitute a
/// `MockClock` so they can step time instead of sleeping.
#[async_trait::async_trait]
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;

    async fn sleep_until(&mut self, deadline: Instant);

    async fn sleep(&mut self, duration: Duration) {
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await;
    }

    /// Zero if `earlier` lies in the future.
    fn elapsed_since(&self, earlier: Instant) -> Duration {
        self.now().saturating_duration_since(earlier)
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

/// Hand-driven clock. All clones follow the one `MockClockController` they were created with.
#[derive(Clone)]
pub struct MockClock {
    timeline: watch::Receiver<Instant>,
}

impl MockClock {
    pub fn new() -> (MockClock, MockClockController) {
        let start = Instant::now();
        let (timeline_tx, timeline) = watch::channel(start);

        (
            MockClock { timeline },
            MockClockController {
                timeline: timeline_tx,
                start,
            },
        )
    }
}

#[async_trait::async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.timeline.borrow()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        while *self.timeline.borrow() < deadline {
            if self.timeline.changed().await.is_err() {
                // No controller, so time is frozen for good.
                futures::future::pending::<()>().await;
            }
        }
    }
}

pub struct MockClockController {
    timeline: watch::Sender<Instant>,
    start: Instant,
}

impl MockClockController {
    pub fn now(&self) -> Instant {
        *self.timeline.borrow()
    }

    pub fn elapsed(&self) -> Duration {
        self.now() - self.start
    }

    /// Sleepers whose deadline is passed wake up, however far past it the clock jumps. Step in
    /// increments smaller than what the test wants to tell apart.
    pub fn advance(&mut self, by: Duration) {
        let now = self.now() + by;
        self.timeline.send_replace(now);
    }
}
