mod counters;
mod reporter;
mod ring_buffer;

pub use counters::QueryStats;
pub(crate) use reporter::StatsReporter;
pub use ring_buffer::RingBuffer;
