//! Line-oriented run file codec
//!
//! ```text
//! line 1: start time            yyyy-MM-dd HH:mm:ss
//! line 2: total distance        decimal meters
//! line 3: total duration        integer seconds
//! line 4..: HR,<timestamp_ms>,<bpm>
//!           SPD,<timestamp_ms>,<speed_mps>
//! ```
//!
//! The encoder writes every HR row before the SPD rows. The decoder
//! accepts the rows in any order and skips rows it cannot parse.

use std::fmt::Write as _;

use crate::types::{HeartRateSample, RunRecord, SpeedSample};

const HEADER_LINES: usize = 3;
const HR_TAG: &str = "HR";
const SPEED_TAG: &str = "SPD";

/// Render a record in the run file format.
pub fn encode(record: &RunRecord) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out, "{}", record.start_time);
    let _ = writeln!(out, "{}", record.distance_m);
    let _ = writeln!(out, "{}", record.duration_secs);
    for hr in &record.heart_rate {
        let _ = writeln!(out, "{},{},{}", HR_TAG, hr.timestamp_ms, hr.bpm);
    }
    for spd in &record.speed {
        let _ = writeln!(out, "{},{},{}", SPEED_TAG, spd.timestamp_ms, spd.speed_mps);
    }
    out
}

/// Parse a full record. `None` when the header is incomplete.
pub fn decode(id: &str, text: &str) -> Option<RunRecord> {
    let mut record = decode_header(id, text)?;

    for row in text.lines().skip(HEADER_LINES) {
        let parts: Vec<&str> = row.split(',').collect();
        if parts.len() != 3 {
            continue;
        }
        let timestamp_ms = match parts[1].trim().parse::<i64>() {
            Ok(ts) => ts,
            Err(_) => continue,
        };
        let value = parts[2].trim();

        match parts[0] {
            HR_TAG => {
                if let Ok(bpm) = value.parse::<u16>() {
                    record.heart_rate.push(HeartRateSample { timestamp_ms, bpm });
                }
            }
            SPEED_TAG => {
                if let Ok(speed_mps) = value.parse::<f64>() {
                    if speed_mps.is_finite() {
                        record.speed.push(SpeedSample {
                            timestamp_ms,
                            speed_mps,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    Some(record)
}

/// Parse only the three header lines; both sample sequences stay empty.
pub fn decode_header(id: &str, text: &str) -> Option<RunRecord> {
    let mut lines = text.lines();
    let start_time = lines.next()?;
    let distance = lines.next()?;
    let duration = lines.next()?;

    let mut record = RunRecord::new(id, start_time);
    record.distance_m = distance
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite())
        .unwrap_or(0.0);
    record.duration_secs = duration.trim().parse::<u64>().unwrap_or(0);
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> RunRecord {
        let mut record = RunRecord::new("20250106_153045", "2025-01-06 15:30:45");
        record.distance_m = 2523.75;
        record.duration_secs = 845;
        record.heart_rate = vec![
            HeartRateSample { timestamp_ms: 1736173846000, bpm: 98 },
            HeartRateSample { timestamp_ms: 1736173847000, bpm: 101 },
        ];
        record.speed = vec![SpeedSample { timestamp_ms: 1736173846500, speed_mps: 2.75 }];
        record
    }

    #[test]
    fn test_encode_layout() {
        let text = encode(&sample_record());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "2025-01-06 15:30:45",
                "2523.75",
                "845",
                "HR,1736173846000,98",
                "HR,1736173847000,101",
                "SPD,1736173846500,2.75",
            ]
        );
    }

    #[test]
    fn test_decode_interleaved_rows() {
        let text = "2025-01-06 15:30:45\n10.5\n3\nSPD,1,1.5\nHR,2,70\nSPD,3,2\nHR,4,72\n";
        let record = decode("x", text).unwrap();
        assert_eq!(record.heart_rate.len(), 2);
        assert_eq!(record.speed.len(), 2);
        assert_eq!(record.heart_rate[1], HeartRateSample { timestamp_ms: 4, bpm: 72 });
        assert_eq!(record.speed[1].speed_mps, 2.0);
    }

    #[test]
    fn test_malformed_rows_skipped() {
        let text = "2025-01-06 15:30:45\n10\n3\n\
                    HR,1\n\
                    HR,abc,70\n\
                    HR,2,seventy\n\
                    SPD,3,fast\n\
                    GPS,4,1.0\n\
                    HR,5,80,extra\n\
                    HR,6,81\n";
        let record = decode("x", text).unwrap();
        assert_eq!(record.heart_rate, vec![HeartRateSample { timestamp_ms: 6, bpm: 81 }]);
        assert!(record.speed.is_empty());
    }

    #[test]
    fn test_short_file_is_absent() {
        assert!(decode("x", "").is_none());
        assert!(decode("x", "2025-01-06 15:30:45\n10\n").is_none());
        assert!(decode_header("x", "2025-01-06 15:30:45").is_none());
    }

    #[test]
    fn test_unparseable_header_numbers_read_as_zero() {
        let record = decode("x", "2025-01-06 15:30:45\nfar\nlong\n").unwrap();
        assert_eq!(record.distance_m, 0.0);
        assert_eq!(record.duration_secs, 0);
    }

    #[test]
    fn test_header_only_ignores_samples() {
        let text = encode(&sample_record());
        let header = decode_header("20250106_153045", &text).unwrap();
        assert_eq!(header.duration_secs, 845);
        assert!(header.heart_rate.is_empty());
        assert!(header.speed.is_empty());
    }
}
