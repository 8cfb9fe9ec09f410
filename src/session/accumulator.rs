use crate::geo;
use crate::types::{HeartRateSample, Position, PositionFix, RunRecord, SpeedSample};

/// The run being recorded: running totals plus both sample sequences.
///
/// Knows nothing about phases; the controller only feeds it while Running.
#[derive(Debug, Clone)]
pub struct RunAccumulator {
    record: RunRecord,
    last_position: Option<Position>,
    route: Vec<Position>,
}

impl RunAccumulator {
    pub fn new(id: impl Into<String>, start_time: impl Into<String>) -> Self {
        Self {
            record: RunRecord::new(id, start_time),
            last_position: None,
            route: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn start_time(&self) -> &str {
        &self.record.start_time
    }

    pub fn distance_m(&self) -> f64 {
        self.record.distance_m
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.record.duration_secs
    }

    pub fn last_position(&self) -> Option<Position> {
        self.last_position
    }

    pub fn route(&self) -> &[Position] {
        &self.route
    }

    /// Fold one fix in. Returns the distance it added.
    pub fn apply_fix(&mut self, fix: &PositionFix, received_at_ms: i64) -> f64 {
        let delta = self
            .last_position
            .map(|prev| geo::distance_m(&prev, &fix.position))
            .unwrap_or(0.0);
        self.record.distance_m += delta;
        self.record.speed.push(SpeedSample {
            timestamp_ms: received_at_ms,
            speed_mps: fix.speed_or_zero(),
        });
        self.last_position = Some(fix.position);
        self.route.push(fix.position);
        delta
    }

    pub fn apply_bpm(&mut self, bpm: u16, received_at_ms: i64) {
        self.record.heart_rate.push(HeartRateSample {
            timestamp_ms: received_at_ms,
            bpm,
        });
    }

    pub fn tick(&mut self) {
        self.record.duration_secs += 1;
    }

    /// The record as it would be saved right now.
    pub fn to_record(&self) -> RunRecord {
        self.record.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fix_adds_no_distance() {
        let mut run = RunAccumulator::new("20250106_153045", "2025-01-06 15:30:45");
        assert_eq!(run.apply_fix(&PositionFix::new(0.0, 0.0).with_speed(2.0), 10), 0.0);
        assert_eq!(run.distance_m(), 0.0);
        assert_eq!(run.last_position(), Some(Position::new(0.0, 0.0)));

        let record = run.to_record();
        assert_eq!(record.speed, vec![SpeedSample { timestamp_ms: 10, speed_mps: 2.0 }]);
    }

    #[test]
    fn test_distance_is_sum_of_legs() {
        let mut run = RunAccumulator::new("20250106_153045", "2025-01-06 15:30:45");
        let points = [(0.0, 0.0), (0.0, 0.001), (0.001, 0.001), (0.001, 0.0)];
        for (i, (lat, lon)) in points.iter().enumerate() {
            run.apply_fix(&PositionFix::new(*lat, *lon), i as i64);
        }

        let expected: f64 = points
            .windows(2)
            .map(|w| {
                geo::distance_m(&Position::new(w[0].0, w[0].1), &Position::new(w[1].0, w[1].1))
            })
            .sum();
        assert!((run.distance_m() - expected).abs() < 1e-9);
        assert_eq!(run.route().len(), 4);
        assert_eq!(run.to_record().speed.len(), 4);
    }

    #[test]
    fn test_missing_speed_recorded_as_zero() {
        let mut run = RunAccumulator::new("20250106_153045", "2025-01-06 15:30:45");
        run.apply_fix(&PositionFix::new(0.0, 0.0), 1);
        run.apply_fix(&PositionFix::new(0.0, 0.0).with_speed(-3.0), 2);
        assert!(run.to_record().speed.iter().all(|s| s.speed_mps == 0.0));
    }

    #[test]
    fn test_ticks_and_bpm() {
        let mut run = RunAccumulator::new("20250106_153045", "2025-01-06 15:30:45");
        run.tick();
        run.tick();
        run.apply_bpm(131, 5);

        let record = run.to_record();
        assert_eq!(record.duration_secs, 2);
        assert_eq!(record.heart_rate, vec![HeartRateSample { timestamp_ms: 5, bpm: 131 }]);
    }
}
