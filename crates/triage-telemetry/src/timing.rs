use std::time::{Duration, Instant};

/// Wall clock for a multi-stage operation.
///
/// `total()` measures from construction; each [`StageSpan`] measures one stage.
#[derive(Debug)]
pub struct StageClock {
    started: Instant,
}

impl StageClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn stage(&self) -> StageSpan {
        StageSpan {
            started: Instant::now(),
        }
    }

    pub fn total(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn total_ms(&self) -> f64 {
        as_ms(self.total())
    }
}

#[derive(Debug)]
pub struct StageSpan {
    started: Instant,
}

impl StageSpan {
    /// Milliseconds since the stage began.
    pub fn elapsed_ms(&self) -> f64 {
        as_ms(self.started.elapsed())
    }
}

fn as_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
