use crate::connection::OptionsError;
use std::convert::TryFrom;
use std::time::Duration;

#[derive(Clone, Default)]
pub struct PendingQueueOptions {
    pub logger: Option<slog::Logger>,
    /// Minimum age before an item is processed, so that bursts of changes to one object coalesce.
    pub debounce_window: Option<Duration>,
    /// The worker pauses while the connection has this many queries or more waiting.
    pub max_pending_queries: Option<usize>,
    /// Upper bound on how long the worker sleeps without being notified.
    pub poll_interval: Option<Duration>,
    /// Pause after a pass that processed nothing.
    pub idle_retry: Option<Duration>,
}

#[derive(Clone)]
pub(crate) struct PendingQueueOptionsValidated {
    pub logger: slog::Logger,
    pub debounce_window: Duration,
    pub max_pending_queries: usize,
    pub poll_interval: Duration,
    pub idle_retry: Duration,
}

impl PendingQueueOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.max_pending_queries == 0 {
            return Err("max_pending_queries must be greater than zero");
        }
        if self.poll_interval == Duration::from_secs(0) || self.idle_retry == Duration::from_secs(0) {
            return Err("Poll interval and idle retry must be greater than zero");
        }
        if self.idle_retry > self.poll_interval {
            return Err("idle_retry must not exceed poll_interval");
        }

        Ok(())
    }
}

impl TryFrom<PendingQueueOptions> for PendingQueueOptionsValidated {
    type Error = OptionsError;

    fn try_from(options: PendingQueueOptions) -> Result<Self, Self::Error> {
        let logger = options
            .logger
            .unwrap_or_else(|| slog::Logger::root(slog::Discard, slog::o!()))
            .new(slog::o!("Component" => "PendingItems"));

        let values = PendingQueueOptionsValidated {
            logger,
            debounce_window: options.debounce_window.unwrap_or(Duration::from_millis(1000)),
            max_pending_queries: options.max_pending_queries.unwrap_or(128),
            poll_interval: options.poll_interval.unwrap_or(Duration::from_millis(100)),
            idle_retry: options.idle_retry.unwrap_or(Duration::from_millis(10)),
        };

        values.validate().map_err(OptionsError)?;
        Ok(values)
    }
}
