use crate::protocol::QueryAffects;
use crate::stats::RingBuffer;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

const INPUT_WINDOW_SECS: usize = 10;
const OUTPUT_WINDOW_SECS: usize = 15 * 60;

/// Flow-control and throughput accounting for one connection tree. A root connection owns one;
/// its children hold the same `Arc<QueryStats>` so they all draw from one pending-query budget.
///
/// `pending` is read from arbitrary threads (e.g. the pending item worker deciding whether it may
/// submit more work), so it's a plain atomic. The rolling counters are only touched when queries
/// enter or leave the write queue.
#[derive(Debug)]
pub struct QueryStats {
    pending: AtomicI64,
    rolling: Mutex<RollingCounters>,
}

#[derive(Debug)]
struct RollingCounters {
    input: RingBuffer,
    output: RingBuffer,
    written_config: RingBuffer,
    written_state: RingBuffer,
    written_history: RingBuffer,
}

impl Default for QueryStats {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryStats {
    pub fn new() -> Self {
        QueryStats {
            pending: AtomicI64::new(0),
            rolling: Mutex::new(RollingCounters {
                input: RingBuffer::new(INPUT_WINDOW_SECS),
                output: RingBuffer::new(OUTPUT_WINDOW_SECS),
                written_config: RingBuffer::new(OUTPUT_WINDOW_SECS),
                written_state: RingBuffer::new(OUTPUT_WINDOW_SECS),
                written_history: RingBuffer::new(OUTPUT_WINDOW_SECS),
            }),
        }
    }

    pub fn pending(&self) -> i64 {
        self.pending.load(Ordering::Acquire)
    }

    pub fn increase_pending(&self, now: i64, count: usize) {
        self.pending.fetch_add(count as i64, Ordering::AcqRel);
        self.lock().input.insert_value(now, count as u64);
    }

    pub fn decrease_pending(&self, now: i64, count: usize) {
        self.pending.fetch_sub(count as i64, Ordering::AcqRel);
        self.lock().output.insert_value(now, count as u64);
    }

    /// For queries given up on before they reached the transport. They never count as output.
    pub fn drop_pending(&self, count: usize) {
        self.pending.fetch_sub(count as i64, Ordering::AcqRel);
    }

    pub fn record_affected(&self, now: i64, affects: QueryAffects) {
        let mut rolling = self.lock();
        if affects.config > 0 {
            rolling.written_config.insert_value(now, affects.config as u64);
        }
        if affects.state > 0 {
            rolling.written_state.insert_value(now, affects.state as u64);
        }
        if affects.history > 0 {
            rolling.written_history.insert_value(now, affects.history as u64);
        }
    }

    pub fn input_rate(&self, now: i64, span: usize) -> f64 {
        self.lock().input.calculate_rate(now, span)
    }

    pub fn output_rate(&self, now: i64, span: usize) -> f64 {
        self.lock().output.calculate_rate(now, span)
    }

    /// Number of queries written in the last `span` seconds.
    pub fn query_count(&self, now: i64, span: usize) -> u64 {
        self.lock().output.update_and_get_values(now, span)
    }

    pub fn written_config_for(&self, now: i64, span: usize) -> u64 {
        self.lock().written_config.update_and_get_values(now, span)
    }

    pub fn written_state_for(&self, now: i64, span: usize) -> u64 {
        self.lock().written_state.update_and_get_values(now, span)
    }

    pub fn written_history_for(&self, now: i64, span: usize) -> u64 {
        self.lock().written_history.update_and_get_values(now, span)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RollingCounters> {
        self.rolling.lock().expect("QueryStats.rolling mutex guard poison")
    }
}
