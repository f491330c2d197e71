use crate::connection::ConnectionState;
use crate::stats::QueryStats;
use crate::time::Clock;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const RATE_SPAN_SECS: usize = 10;

/// Periodically logs the pending query count and throughput of one root connection. Quiet while
/// the store keeps up, i.e. while the backlog is below five seconds worth of output.
pub(crate) struct StatsReporter<C: Clock> {
    pub(crate) logger: slog::Logger,
    pub(crate) stats: Arc<QueryStats>,
    pub(crate) state: watch::Receiver<ConnectionState>,
    pub(crate) clock: C,
    pub(crate) interval: Duration,
    pub(crate) log_timeout: Duration,
    pub(crate) stop: CancellationToken,
}

impl<C: Clock> StatsReporter<C> {
    pub(crate) async fn run(self) {
        let mut last_message: Option<Instant> = None;

        loop {
            let mut clock = self.clock.clone();
            tokio::select! {
                _ = self.stop.cancelled() => return,
                _ = clock.sleep(self.interval) => {}
            }

            if *self.state.borrow() != ConnectionState::Connected {
                continue;
            }

            let now = self.clock.now();
            let timeout_reached = match last_message {
                Some(last) => now.duration_since(last) >= self.log_timeout,
                None => true,
            };

            let wall_now = Utc::now().timestamp();
            let pending = self.stats.pending();
            let output = self.stats.output_rate(wall_now, RATE_SPAN_SECS).round();
            if !should_log(pending, output, timeout_reached) {
                continue;
            }

            let input = self.stats.input_rate(wall_now, RATE_SPAN_SECS).round();
            slog::info!(
                self.logger,
                "Pending queries: {} (Input: {}/s; Output: {}/s)",
                pending,
                input,
                output
            );
            last_message = Some(now);
        }
    }
}

fn should_log(pending: i64, output_rate: f64, timeout_reached: bool) -> bool {
    if timeout_reached {
        return true;
    }

    pending >= 1 && pending as f64 >= output_rate * 5.0
}
