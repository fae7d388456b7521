//! Conversion between engine base time units and clock cycles.
//!
//! [`TimeLord`] fixes the simulation timebase (the duration of one
//! [`SimTime`] unit) and turns human-readable period or frequency
//! strings such as `"10ns"` or `"2GHz"` into [`TimeConverter`]s.

use crate::error::TimeError;
use crate::id::{Cycle, SimTime};

/// Maps engine base time units to cycles of some period.
///
/// `factor` is the number of base units per cycle. It is always at
/// least 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeConverter {
    factor: SimTime,
}

impl TimeConverter {
    /// Create a converter with `factor` base units per cycle.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::ZeroFactor`] if `factor` is zero.
    pub fn new(factor: SimTime) -> Result<Self, TimeError> {
        if factor == 0 {
            return Err(TimeError::ZeroFactor);
        }
        Ok(Self { factor })
    }

    /// Base units per cycle.
    pub fn factor(&self) -> SimTime {
        self.factor
    }

    /// Convert a cycle count into base units.
    pub fn to_core_time(&self, cycles: Cycle) -> SimTime {
        cycles.saturating_mul(self.factor)
    }

    /// Convert base units into whole elapsed cycles (rounded down).
    pub fn from_core_time(&self, time: SimTime) -> Cycle {
        time / self.factor
    }
}

/// Femtoseconds per unit for the accepted period suffixes.
const PERIOD_UNITS: &[(&str, f64)] = &[
    ("fs", 1.0),
    ("ps", 1e3),
    ("ns", 1e6),
    ("us", 1e9),
    ("ms", 1e12),
    ("s", 1e15),
];

/// Hertz per unit for the accepted frequency suffixes.
const FREQUENCY_UNITS: &[(&str, f64)] = &[
    ("Hz", 1.0),
    ("kHz", 1e3),
    ("KHz", 1e3),
    ("MHz", 1e6),
    ("GHz", 1e9),
];

/// Owner of the simulation timebase.
///
/// ```
/// use strand_core::TimeLord;
///
/// let lord = TimeLord::new("1ps").unwrap();
/// assert_eq!(lord.converter("1ns").unwrap().factor(), 1_000);
/// assert_eq!(lord.converter("2GHz").unwrap().factor(), 500);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct TimeLord {
    timebase_fs: f64,
}

impl TimeLord {
    /// Create a time lord whose base unit is `timebase` (a period string).
    ///
    /// # Errors
    ///
    /// Returns a [`TimeError`] if `timebase` does not parse as a period.
    pub fn new(timebase: &str) -> Result<Self, TimeError> {
        let timebase_fs = parse_femtos(timebase)?;
        if timebase_fs < 1.0 {
            return Err(TimeError::BelowTimebase {
                input: timebase.to_string(),
            });
        }
        Ok(Self { timebase_fs })
    }

    /// Duration of one base unit, in femtoseconds.
    pub fn timebase_fs(&self) -> f64 {
        self.timebase_fs
    }

    /// Build a converter for a period (`"10ns"`) or frequency (`"2GHz"`).
    ///
    /// The factor is rounded to the nearest whole number of base units.
    ///
    /// # Errors
    ///
    /// Fails on malformed input, unknown units, or periods that round to
    /// less than one base unit.
    pub fn converter(&self, spec: &str) -> Result<TimeConverter, TimeError> {
        let femtos = parse_femtos(spec)?;
        let factor = (femtos / self.timebase_fs).round();
        if factor < 1.0 {
            return Err(TimeError::BelowTimebase {
                input: spec.to_string(),
            });
        }
        TimeConverter::new(factor as SimTime)
    }
}

impl Default for TimeLord {
    /// One picosecond timebase.
    fn default() -> Self {
        Self { timebase_fs: 1e3 }
    }
}

/// Parse `<number><unit>` into a period in femtoseconds.
fn parse_femtos(spec: &str) -> Result<f64, TimeError> {
    let trimmed = spec.trim();
    let split = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or_else(|| TimeError::InvalidFormat {
            input: spec.to_string(),
        })?;
    let (number, unit) = trimmed.split_at(split);
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| TimeError::InvalidFormat {
            input: spec.to_string(),
        })?;
    if !value.is_finite() || value <= 0.0 {
        return Err(TimeError::InvalidFormat {
            input: spec.to_string(),
        });
    }

    if let Some((_, scale)) = PERIOD_UNITS.iter().find(|(u, _)| *u == unit) {
        return Ok(value * scale);
    }
    if let Some((_, scale)) = FREQUENCY_UNITS.iter().find(|(u, _)| *u == unit) {
        return Ok(1e15 / (value * scale));
    }
    Err(TimeError::UnknownUnit {
        unit: unit.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_factor_rejected() {
        assert_eq!(TimeConverter::new(0).unwrap_err(), TimeError::ZeroFactor);
    }

    #[test]
    fn converter_round_trips_whole_cycles() {
        let tc = TimeConverter::new(250).unwrap();
        assert_eq!(tc.to_core_time(4), 1000);
        assert_eq!(tc.from_core_time(1000), 4);
        assert_eq!(tc.from_core_time(1249), 4);
    }

    #[test]
    fn parses_periods_and_frequencies() {
        let lord = TimeLord::new("1ps").unwrap();
        assert_eq!(lord.converter("1ns").unwrap().factor(), 1_000);
        assert_eq!(lord.converter("1 us").unwrap().factor(), 1_000_000);
        assert_eq!(lord.converter("1GHz").unwrap().factor(), 1_000);
        assert_eq!(lord.converter("2.5GHz").unwrap().factor(), 400);
        assert_eq!(lord.converter("100MHz").unwrap().factor(), 10_000);
    }

    #[test]
    fn rejects_bad_specs() {
        let lord = TimeLord::new("1ns").unwrap();
        assert!(matches!(
            lord.converter("fast"),
            Err(TimeError::InvalidFormat { .. })
        ));
        assert!(matches!(
            lord.converter("10parsecs"),
            Err(TimeError::UnknownUnit { .. })
        ));
        assert!(matches!(
            lord.converter("1ps"),
            Err(TimeError::BelowTimebase { .. })
        ));
        assert!(matches!(
            lord.converter("-3ns"),
            Err(TimeError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn default_timebase_is_one_picosecond() {
        let lord = TimeLord::default();
        assert_eq!(lord.timebase_fs(), 1e3);
        assert_eq!(lord.converter("3ns").unwrap().factor(), 3_000);
    }
}
