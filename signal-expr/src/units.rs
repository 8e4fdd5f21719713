//! Time units
//!
//! Calendar and clock units recognised in time buffers and duration literals,
//! ranked from the coarsest (`Y`) to the finest (`as`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A recognised time unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeUnit {
    Year,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
    Microsecond,
    Nanosecond,
    Picosecond,
    Femtosecond,
    Attosecond,
}

/// Every unit, coarse to fine. The index is the precision rank.
pub const TIME_UNITS: [TimeUnit; 13] = [
    TimeUnit::Year,
    TimeUnit::Month,
    TimeUnit::Week,
    TimeUnit::Day,
    TimeUnit::Hour,
    TimeUnit::Minute,
    TimeUnit::Second,
    TimeUnit::Millisecond,
    TimeUnit::Microsecond,
    TimeUnit::Nanosecond,
    TimeUnit::Picosecond,
    TimeUnit::Femtosecond,
    TimeUnit::Attosecond,
];

impl TimeUnit {
    /// Short symbol used in buffers and duration literals
    pub fn symbol(&self) -> &'static str {
        match self {
            TimeUnit::Year => "Y",
            TimeUnit::Month => "M",
            TimeUnit::Week => "W",
            TimeUnit::Day => "D",
            TimeUnit::Hour => "h",
            TimeUnit::Minute => "m",
            TimeUnit::Second => "s",
            TimeUnit::Millisecond => "ms",
            TimeUnit::Microsecond => "us",
            TimeUnit::Nanosecond => "ns",
            TimeUnit::Picosecond => "ps",
            TimeUnit::Femtosecond => "fs",
            TimeUnit::Attosecond => "as",
        }
    }

    /// Parse a unit symbol. Long spellings emitted by some back-ends are accepted too.
    pub fn from_symbol(symbol: &str) -> Option<TimeUnit> {
        let unit = match symbol {
            "Y" => TimeUnit::Year,
            "M" => TimeUnit::Month,
            "W" => TimeUnit::Week,
            "D" => TimeUnit::Day,
            "h" => TimeUnit::Hour,
            "m" => TimeUnit::Minute,
            "s" => TimeUnit::Second,
            "ms" => TimeUnit::Millisecond,
            "us" => TimeUnit::Microsecond,
            "ns" | "nanoseconds" => TimeUnit::Nanosecond,
            "ps" => TimeUnit::Picosecond,
            "fs" => TimeUnit::Femtosecond,
            "as" => TimeUnit::Attosecond,
            _ => return None,
        };
        Some(unit)
    }

    /// Precision rank: 0 for years, increasing towards attoseconds
    pub fn rank(&self) -> usize {
        *self as usize
    }

    /// Calendar units have no fixed length in seconds
    pub fn is_calendar(&self) -> bool {
        matches!(self, TimeUnit::Year | TimeUnit::Month)
    }

    /// Number of attoseconds in one unit, `None` for calendar units
    pub fn attoseconds(&self) -> Option<i128> {
        const AS_PER_S: i128 = 1_000_000_000_000_000_000;
        let value = match self {
            TimeUnit::Year | TimeUnit::Month => return None,
            TimeUnit::Week => 7 * 86_400 * AS_PER_S,
            TimeUnit::Day => 86_400 * AS_PER_S,
            TimeUnit::Hour => 3_600 * AS_PER_S,
            TimeUnit::Minute => 60 * AS_PER_S,
            TimeUnit::Second => AS_PER_S,
            TimeUnit::Millisecond => AS_PER_S / 1_000,
            TimeUnit::Microsecond => AS_PER_S / 1_000_000,
            TimeUnit::Nanosecond => AS_PER_S / 1_000_000_000,
            TimeUnit::Picosecond => AS_PER_S / 1_000_000_000_000,
            TimeUnit::Femtosecond => AS_PER_S / 1_000_000_000_000_000,
            TimeUnit::Attosecond => 1,
        };
        Some(value)
    }

    /// How many `finer` units fit in one `self` unit
    ///
    /// Years convert to months (12); any other calendar mix has no exact factor.
    pub fn factor_to(&self, finer: TimeUnit) -> Option<i64> {
        if self == &finer {
            return Some(1);
        }
        match (self, finer) {
            (TimeUnit::Year, TimeUnit::Month) => Some(12),
            _ => {
                let coarse = self.attoseconds()?;
                let fine = finer.attoseconds()?;
                if coarse % fine != 0 {
                    return None;
                }
                i64::try_from(coarse / fine).ok()
            }
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        TimeUnit::from_symbol(s).ok_or_else(|| format!("Unknown time unit '{}'", s))
    }
}

/// Finest (highest precision) unit among the given unit strings
///
/// Unrecognised and empty units are skipped. Returns `None` when no unit is known.
pub fn finest_time_unit<'a, I>(units: I) -> Option<TimeUnit>
where
    I: IntoIterator<Item = &'a str>,
{
    units.into_iter().filter_map(TimeUnit::from_symbol).max()
}

/// Coarsest (lowest precision) unit among the given unit strings
pub fn coarsest_time_unit<'a, I>(units: I) -> Option<TimeUnit>
where
    I: IntoIterator<Item = &'a str>,
{
    units.into_iter().filter_map(TimeUnit::from_symbol).min()
}
