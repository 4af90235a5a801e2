use std::{fmt, str::FromStr, time::Duration};

/// A strictly positive duration written in Go's `time.Duration` format, e.g. `5m` or `1h30m`.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Interval(Duration);

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum ParseError {
    #[error("invalid unit: {}", EXPECTED_UNITS)]
    InvalidUnit,

    #[error("missing a unit: {}", EXPECTED_UNITS)]
    NoUnit,

    #[error("invalid floating-point number: {}", .0)]
    NotANumber(#[from] std::num::ParseFloatError),

    #[error("duration must be positive")]
    NotPositive,

    #[error("duration is out of range")]
    OutOfRange,
}

const EXPECTED_UNITS: &str = "expected one of 'ns', 'us', '\u{00b5}s', 'ms', 's', 'm', or 'h'";

impl From<Interval> for Duration {
    fn from(Interval(duration): Interval) -> Self {
        duration
    }
}

impl fmt::Debug for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl FromStr for Interval {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn unit(unit: &str) -> Result<Duration, ParseError> {
            const MINUTE: Duration = Duration::from_secs(60);
            match unit {
                "ns" => Ok(Duration::from_nanos(1)),
                // U+00B5 is the "micro sign" while U+03BC is "Greek letter mu"
                "us" | "\u{00b5}s" | "\u{03bc}s" => Ok(Duration::from_micros(1)),
                "ms" => Ok(Duration::from_millis(1)),
                "s" => Ok(Duration::from_secs(1)),
                "m" => Ok(MINUTE),
                "h" => Ok(MINUTE * 60),
                _ => Err(ParseError::InvalidUnit),
            }
        }

        if s.starts_with('-') {
            return Err(ParseError::NotPositive);
        }
        let mut s = s.trim_start_matches('+');
        if s == "0" {
            return Err(ParseError::NotPositive);
        }

        let mut total = Duration::ZERO;
        while !s.is_empty() {
            let Some(unit_start) = s.find(|c: char| c.is_alphabetic()) else {
                return Err(ParseError::NoUnit);
            };
            let (val, rest) = s.split_at(unit_start);
            let val = val.parse::<f64>()?;
            let (u, rest) =
                rest.split_at(rest.find(|c: char| !c.is_alphabetic()).unwrap_or(rest.len()));
            s = rest;

            let nanos = (unit(u)?.as_nanos() as f64 * val).round();
            if !(0.0..=u64::MAX as f64).contains(&nanos) {
                return Err(ParseError::OutOfRange);
            }
            total = total
                .checked_add(Duration::from_nanos(nanos as u64))
                .ok_or(ParseError::OutOfRange)?;
        }

        if total.is_zero() {
            return Err(ParseError::NotPositive);
        }
        Ok(Interval(total))
    }
}
