//! Running statistics over a stream of observations.

/// Accumulates count, mean and (population) variance of observed values
/// without storing them, using Welford's recurrence.
///
/// Used to adaptively bound the effort of witness path searches based on
/// how many edges recent searches settled.
#[derive(Debug, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    sum_squared_deltas: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_observation(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.sum_squared_deltas += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_squared_deltas / self.count as f64
        }
    }

    pub fn reset(&mut self) {
        *self = Default::default();
    }
}
