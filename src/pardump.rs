//! Reader for the simulator's text particle dump.
//!
//! The dump is a sequence of time blocks. A block opens with a timestamp line
//! (`n n YY MM DD HH MM`, year counted from 2000) followed by one record per
//! particle, each spread over a position line (`lat lon z sigh ...`, six
//! fields) and an index line (five integers, the last one the particle id).
//! Lines that do not fit the grammar at the current point are skipped.

use crate::math_utils::{lonlat_to_pixel, spread_to_pixels};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// One whitespace-separated field: integer unless it contains a decimal point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
}

impl Token {
    pub fn parse(text: &str) -> Option<Token> {
        if text.contains('.') {
            text.parse::<f64>().ok().map(Token::Float)
        } else {
            text.parse::<i64>().ok().map(Token::Int)
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Token::Int(v) => v as f64,
            Token::Float(v) => v,
        }
    }

    pub fn as_int(self) -> Option<i64> {
        match self {
            Token::Int(v) => Some(v),
            Token::Float(_) => None,
        }
    }
}

/// Tokenize a line; `None` when any field is not a number.
pub fn tokenize(line: &str) -> Option<Vec<Token>> {
    line.split_whitespace().map(Token::parse).collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timestamp {
    pub epoch: i64,
    pub minute: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub altitude_m: f64,
    pub sigh_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Line {
    Timestamp(Timestamp),
    Position(Position),
    Index(i64),
}

impl Line {
    pub fn classify(text: &str) -> Option<Line> {
        let tokens = tokenize(text)?;
        match tokens.len() {
            7 => timestamp_line(&tokens).map(Line::Timestamp),
            6 => Some(Line::Position(Position {
                lat: tokens[0].as_f64(),
                lon: tokens[1].as_f64(),
                altitude_m: tokens[2].as_f64(),
                sigh_m: tokens[3].as_f64(),
            })),
            5 => tokens[4].as_int().map(Line::Index),
            _ => None,
        }
    }
}

fn timestamp_line(tokens: &[Token]) -> Option<Timestamp> {
    let mut fields = [0i64; 5];
    for (slot, token) in fields.iter_mut().zip(&tokens[2..7]) {
        *slot = token.as_int()?;
    }
    let [year, month, day, hour, minute] = fields;
    let year = i32::try_from(year).ok()?.checked_add(2000)?;
    let [month, day, hour, minute] = [month, day, hour, minute].map(|v| u32::try_from(v).ok());
    let date = NaiveDate::from_ymd_opt(year, month?, day?)?;
    let minute = minute?;
    let at = date.and_hms_opt(hour?, minute, 0)?;
    Some(Timestamp {
        epoch: at.and_utc().timestamp(),
        minute,
    })
}

/// One retained point of a trajectory, already projected to map pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub epoch: i64,
    /// Horizontal spread in pixels.
    pub size: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    ExpectTimestamp,
    ExpectPosition(Timestamp),
    ExpectIndex(Timestamp, Position),
}

/// Counters for what the reader kept and skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParseStats {
    pub records: usize,
    pub off_cadence: usize,
    pub skipped_lines: usize,
}

/// Trajectories keyed by particle id, each in file order.
#[derive(Debug, Clone, Default)]
pub struct Trajectories {
    pub by_particle: BTreeMap<i64, Vec<Sample>>,
    pub stats: ParseStats,
}

impl Trajectories {
    pub fn len(&self) -> usize {
        self.by_particle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_particle.is_empty()
    }
}

/// Parse a text dump keeping only samples whose minute is a multiple of
/// `sample_minutes`.
pub fn parse_trajectories(text: &str, sample_minutes: u32) -> Trajectories {
    let mut out = Trajectories::default();
    let mut state = State::ExpectTimestamp;

    for raw in text.lines() {
        if raw.trim().is_empty() {
            continue;
        }
        let line = Line::classify(raw);
        state = match (state, line) {
            // a new block can start anywhere
            (_, Some(Line::Timestamp(ts))) => State::ExpectPosition(ts),
            (State::ExpectPosition(ts), Some(Line::Position(pos))) => State::ExpectIndex(ts, pos),
            (State::ExpectIndex(ts, pos), Some(Line::Index(id))) => {
                out.stats.records += 1;
                let trajectory = out.by_particle.entry(id).or_default();
                if ts.minute % sample_minutes.max(1) == 0 {
                    let (x, y) = lonlat_to_pixel(pos.lon, pos.lat);
                    trajectory.push(Sample {
                        x,
                        y,
                        z: pos.altitude_m,
                        epoch: ts.epoch,
                        size: spread_to_pixels(pos.sigh_m, pos.lat),
                    });
                } else {
                    out.stats.off_cadence += 1;
                }
                State::ExpectPosition(ts)
            }
            (State::ExpectTimestamp, _) => {
                out.stats.skipped_lines += 1;
                State::ExpectTimestamp
            }
            // out-of-grammar line: drop any half-read record, stay in the block
            (State::ExpectPosition(ts), _) | (State::ExpectIndex(ts, _), _) => {
                out.stats.skipped_lines += 1;
                State::ExpectPosition(ts)
            }
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: &str = "     1     1    20     3    30     0     5
  40.32800 -79.90355  25.00000  10.00000  0.00000  0.00000
     0     0     0     1     7
";

    #[test]
    fn test_token_kinds() {
        assert_eq!(Token::parse("12"), Some(Token::Int(12)));
        assert_eq!(Token::parse("-79.90"), Some(Token::Float(-79.9)));
        assert_eq!(Token::parse("abc"), None);
        assert!(tokenize("1 2 x").is_none());
    }

    #[test]
    fn test_classify_lines() {
        let mut lines = BLOCK.lines();
        match Line::classify(lines.next().unwrap()) {
            Some(Line::Timestamp(ts)) => {
                assert_eq!(ts.minute, 5);
                assert_eq!(ts.epoch, 1_585_526_400 + 300);
            }
            other => panic!("expected timestamp, got {other:?}"),
        }
        assert!(matches!(Line::classify(lines.next().unwrap()), Some(Line::Position(_))));
        assert_eq!(Line::classify(lines.next().unwrap()), Some(Line::Index(7)));
        assert_eq!(Line::classify("1 2 3"), None);
        // month 13 is not a timestamp
        assert_eq!(Line::classify("1 1 20 13 30 0 0"), None);
    }

    #[test]
    fn test_multiple_particles_per_block() {
        let text = "1 1 20 3 30 0 0
40.0 -80.0 10.0 0.0 0.0 0.0
0 0 0 1 1
41.0 -80.0 20.0 0.0 0.0 0.0
0 0 0 1 2
1 1 20 3 30 0 5
40.1 -80.0 11.0 0.0 0.0 0.0
0 0 0 1 1
";
        let parsed = parse_trajectories(text, 5);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.by_particle[&1].len(), 2);
        assert_eq!(parsed.by_particle[&2].len(), 1);
        assert_eq!(parsed.stats.records, 3);
    }

    #[test]
    fn test_off_cadence_minutes_dropped() {
        let text = "1 1 20 3 30 0 3
40.0 -80.0 10.0 0.0 0.0 0.0
0 0 0 1 1
";
        let parsed = parse_trajectories(text, 5);
        assert!(parsed.by_particle[&1].is_empty());
        assert_eq!(parsed.stats.off_cadence, 1);
    }

    #[test]
    fn test_garbage_lines_are_skipped() {
        let text = "header garbage
1 1 20 3 30 0 0
40.0 -80.0 10.0 0.0 0.0 0.0
this line is corrupt
0 0 0 1 1
40.2 -80.0 10.0 0.0 0.0 0.0
0 0 0 1 4
";
        let parsed = parse_trajectories(text, 5);
        // the corrupt line broke particle 1's record; particle 4 survives
        assert!(!parsed.by_particle.contains_key(&1));
        assert_eq!(parsed.by_particle[&4].len(), 1);
        assert_eq!(parsed.stats.skipped_lines, 3);
    }

    #[test]
    fn test_out_of_range_timestamp_fields_are_skipped() {
        assert_eq!(Line::classify("1 1 2147483647 3 30 0 0"), None);
        assert_eq!(Line::classify("1 1 9223372036854775807 3 30 0 0"), None);
        assert_eq!(Line::classify("1 1 20 -3 30 0 0"), None);
        assert_eq!(Line::classify("1 1 20 3 30 0 4294967301"), None);

        let text = "1 1 2147483647 3 30 0 0
40.0 -80.0 10.0 0.0 0.0 0.0
0 0 0 1 1
1 1 20 3 30 0 5
40.1 -80.0 11.0 0.0 0.0 0.0
0 0 0 1 2
";
        let parsed = parse_trajectories(text, 5);
        assert!(!parsed.by_particle.contains_key(&1));
        assert_eq!(parsed.by_particle[&2].len(), 1);
        assert_eq!(parsed.stats.skipped_lines, 3);
    }
}
