//! Post-run summaries: headline numbers, chart series and display text.

use serde::Serialize;

use crate::types::RunRecord;

pub fn mps_to_kmh(speed_mps: f64) -> f64 {
    speed_mps * 3.6
}

/// `HH:MM:SS`, hours unbounded.
pub fn format_duration(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// One line per saved run, as shown in the run list.
pub fn list_line(record: &RunRecord) -> String {
    format!(
        "{}  Distance: {:.2} m  Duration: {}",
        record.start_time,
        record.distance_m,
        format_duration(record.duration_secs)
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub id: String,
    pub start_time: String,
    pub distance_m: f64,
    pub duration_secs: u64,
    pub avg_bpm: Option<f64>,
    pub max_bpm: Option<u16>,
    pub avg_speed_kmh: Option<f64>,
    pub max_speed_kmh: Option<f64>,
    /// Distance over running time. `None` for a zero-length run.
    pub overall_speed_kmh: Option<f64>,
}

impl RunSummary {
    pub fn from_record(record: &RunRecord) -> Self {
        let bpm: Vec<f64> = record.heart_rate.iter().map(|s| f64::from(s.bpm)).collect();
        let kmh = speed_series_kmh(record);

        Self {
            id: record.id.clone(),
            start_time: record.start_time.clone(),
            distance_m: record.distance_m,
            duration_secs: record.duration_secs,
            avg_bpm: mean(&bpm),
            max_bpm: record.heart_rate.iter().map(|s| s.bpm).max(),
            avg_speed_kmh: mean(&kmh),
            max_speed_kmh: kmh.iter().copied().reduce(f64::max),
            overall_speed_kmh: (record.duration_secs > 0)
                .then(|| mps_to_kmh(record.distance_m / record.duration_secs as f64)),
        }
    }

    /// Text shown once a run has been finished and saved.
    pub fn completion_text(&self) -> String {
        format!(
            "Workout Complete!\nDistance: {:.2} m\nDuration: {}",
            self.distance_m,
            format_duration(self.duration_secs)
        )
    }
}

/// BPM values in sample order, for the heart-rate chart.
pub fn heart_rate_series(record: &RunRecord) -> Vec<u16> {
    record.heart_rate.iter().map(|s| s.bpm).collect()
}

/// Speeds in km/h in sample order, for the speed chart.
pub fn speed_series_kmh(record: &RunRecord) -> Vec<f64> {
    record.speed.iter().map(|s| mps_to_kmh(s.speed_mps)).collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HeartRateSample, SpeedSample};

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "00:00:00");
        assert_eq!(format_duration(61), "00:01:01");
        assert_eq!(format_duration(3600 + 23 * 60 + 5), "01:23:05");
        assert_eq!(format_duration(100 * 3600), "100:00:00");
    }

    #[test]
    fn test_summary_figures() {
        let mut record = RunRecord::new("20250106_153045", "2025-01-06 15:30:45");
        record.distance_m = 1000.0;
        record.duration_secs = 400;
        record.heart_rate = vec![
            HeartRateSample { timestamp_ms: 0, bpm: 100 },
            HeartRateSample { timestamp_ms: 1, bpm: 140 },
        ];
        record.speed = vec![
            SpeedSample { timestamp_ms: 0, speed_mps: 2.0 },
            SpeedSample { timestamp_ms: 1, speed_mps: 3.0 },
        ];

        let summary = RunSummary::from_record(&record);
        assert_eq!(summary.avg_bpm, Some(120.0));
        assert_eq!(summary.max_bpm, Some(140));
        assert!((summary.avg_speed_kmh.unwrap() - 9.0).abs() < 1e-9);
        assert!((summary.max_speed_kmh.unwrap() - 10.8).abs() < 1e-9);
        assert!((summary.overall_speed_kmh.unwrap() - 9.0).abs() < 1e-9);
        assert_eq!(
            summary.completion_text(),
            "Workout Complete!\nDistance: 1000.00 m\nDuration: 00:06:40"
        );
    }

    #[test]
    fn test_empty_run() {
        let record = RunRecord::new("20250106_153045", "2025-01-06 15:30:45");
        let summary = RunSummary::from_record(&record);
        assert_eq!(summary.avg_bpm, None);
        assert_eq!(summary.max_bpm, None);
        assert_eq!(summary.max_speed_kmh, None);
        assert_eq!(summary.overall_speed_kmh, None);
        assert!(speed_series_kmh(&record).is_empty());
        assert_eq!(
            list_line(&record),
            "2025-01-06 15:30:45  Distance: 0.00 m  Duration: 00:00:00"
        );
    }
}
