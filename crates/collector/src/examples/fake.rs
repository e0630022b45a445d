//! A synthetic data generator, enabled by the `--fake N` flag.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use model::{DataPoint, TagSet};

use crate::{Collector, Error};

/// Emits `points_per_tick` synthetic points on `test.fake` every tick.
/// Exists purely to exercise the pipeline end-to-end without depending on the
/// host's real `/proc` or network state.
pub struct FakeCollector {
    points_per_tick: u64,
}

impl FakeCollector {
    /// Creates a fake collector that emits `points_per_tick` points per run.
    pub fn new(points_per_tick: u64) -> Self {
        Self { points_per_tick }
    }
}

#[async_trait]
impl Collector for FakeCollector {
    fn name(&self) -> &str {
        "fake"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn enabled(&self) -> bool {
        self.points_per_tick > 0
    }

    async fn run(&mut self) -> (Vec<DataPoint>, Option<Error>) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        let mut points = Vec::with_capacity(self.points_per_tick as usize);
        for i in 0..self.points_per_tick {
            match DataPoint::new("test.fake", timestamp, i as i64, TagSet::new()) {
                Ok(point) => points.push(point),
                Err(error) => {
                    return (
                        points,
                        Some(Error::Transient {
                            collector: self.name().to_string(),
                            reason: error.to_string(),
                        }),
                    )
                }
            }
        }
        (points, None)
    }
}
