use std::time::Duration;

/// Upper bound on how much wall time one `advance` can feed in.
const MAX_CATCH_UP: f32 = 0.25;

pub struct FixedTimestep {
    rate: u32,
    dt: f32,
    accumulator: f32,
}

impl FixedTimestep {
    pub fn new(rate: u32) -> Self {
        let rate = rate.max(1);
        Self {
            rate,
            dt: 1.0 / rate as f32,
            accumulator: 0.0,
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// Adds elapsed wall time and returns how many whole ticks are due.
    ///
    /// Stalls longer than a quarter second are dropped instead of replayed.
    pub fn advance(&mut self, elapsed: Duration) -> u32 {
        self.accumulator += elapsed.as_secs_f32().min(MAX_CATCH_UP);

        let mut due = 0;
        while self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            due += 1;
        }
        due
    }

    /// Time left until the next tick becomes due.
    pub fn until_next(&self) -> Duration {
        Duration::from_secs_f32((self.dt - self.accumulator).max(0.0))
    }

    pub fn alpha(&self) -> f32 {
        self.accumulator / self.dt
    }
}
