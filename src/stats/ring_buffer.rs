/// Per-second rolling counter. Each slot holds the sum of values inserted during one second; slots
/// older than the buffer's length are overwritten as time moves forward.
///
/// Timestamps are whole seconds (e.g. unix time). Inserting or querying with a timestamp older than
/// the newest one seen so far doesn't move the buffer backwards.
#[derive(Debug)]
pub struct RingBuffer {
    slots: Vec<u64>,
    // Newest second accounted for. None until the first update.
    time_value: Option<i64>,
    first_insert: Option<i64>,
}

impl RingBuffer {
    pub fn new(slots: usize) -> Self {
        RingBuffer {
            slots: vec![0; slots.max(1)],
            time_value: None,
            first_insert: None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn insert_value(&mut self, now: i64, value: u64) {
        self.update_buffer(now);
        if self.first_insert.is_none() {
            self.first_insert = Some(now);
        }

        let index = self.slot_index(now);
        self.slots[index] += value;
    }

    /// Sum of the values inserted in the last `span` seconds up to and including `now`.
    pub fn update_and_get_values(&mut self, now: i64, span: usize) -> u64 {
        self.update_buffer(now);

        let span = span.min(self.slots.len()) as i64;
        let newest = self.time_value.unwrap_or(now);
        let mut sum = 0;
        for second in (newest - span + 1)..=newest {
            let index = self.slot_index(second);
            sum += self.slots[index];
        }

        sum
    }

    /// Average per-second rate over the last `span` seconds. While the buffer is younger than
    /// `span`, only the seconds since the first insert count.
    pub fn calculate_rate(&mut self, now: i64, span: usize) -> f64 {
        let sum = self.update_and_get_values(now, span);
        let first = match self.first_insert {
            Some(first) => first,
            None => return 0.0,
        };

        let age = (now - first + 1).max(1) as usize;
        let divisor = span.min(age).min(self.slots.len()).max(1);
        sum as f64 / divisor as f64
    }

    fn update_buffer(&mut self, now: i64) {
        let last = match self.time_value {
            Some(last) if now <= last => return,
            Some(last) => last,
            None => {
                self.time_value = Some(now);
                return;
            }
        };

        let elapsed = (now - last) as usize;
        if elapsed >= self.slots.len() {
            self.slots.iter_mut().for_each(|slot| *slot = 0);
        } else {
            for second in (last + 1)..=now {
                let index = self.slot_index(second);
                self.slots[index] = 0;
            }
        }

        self.time_value = Some(now);
    }

    fn slot_index(&self, second: i64) -> usize {
        second.rem_euclid(self.slots.len() as i64) as usize
    }
}
