//! Wall clock abstraction

use time::OffsetDateTime;
use tokio::time::Instant;

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Wall clock that advances with the tokio clock from a fixed anchor.
///
/// Follows `tokio::time::pause`/`advance`, so scheduling can be tested
/// against paused time.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    anchor: OffsetDateTime,
    started: Instant,
}

impl TokioClock {
    pub fn starting_at(anchor: OffsetDateTime) -> Self {
        Self {
            anchor,
            started: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> OffsetDateTime {
        let elapsed = self.started.elapsed();
        self.anchor + time::Duration::try_from(elapsed).unwrap_or(time::Duration::MAX)
    }
}
