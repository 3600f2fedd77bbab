//! Engine-agnostic column kinds

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::PolysqlError;

/// Logical category of a column's values, independent of any engine.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    #[default]
    Unknown,
    Null,
    Text,
    Int,
    Float,
    Decimal,
    Bool,
    Bytes,
    Datetime,
    Date,
    Time,
}

impl Kind {
    pub const ALL: [Kind; 11] = [
        Kind::Unknown,
        Kind::Null,
        Kind::Text,
        Kind::Int,
        Kind::Float,
        Kind::Decimal,
        Kind::Bool,
        Kind::Bytes,
        Kind::Datetime,
        Kind::Date,
        Kind::Time,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Unknown => "unknown",
            Kind::Null => "null",
            Kind::Text => "text",
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Decimal => "decimal",
            Kind::Bool => "bool",
            Kind::Bytes => "bytes",
            Kind::Datetime => "datetime",
            Kind::Date => "date",
            Kind::Time => "time",
        }
    }

    pub fn is_time_like(&self) -> bool {
        matches!(self, Kind::Datetime | Kind::Date | Kind::Time)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Kind::Int | Kind::Float | Kind::Decimal)
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = PolysqlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| PolysqlError::Config(format!("unknown kind: {}", s)))
    }
}

/// Set of kinds backed by a bitset over the fixed `Kind` enum.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct KindSet(u16);

impl KindSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn of(kinds: &[Kind]) -> Self {
        kinds.iter().fold(Self::empty(), |mut set, kind| {
            set.insert(*kind);
            set
        })
    }

    pub fn insert(&mut self, kind: Kind) {
        self.0 |= kind.bit();
    }

    /// Returns true if the kind was present.
    pub fn remove(&mut self, kind: Kind) -> bool {
        let present = self.contains(kind);
        self.0 &= !kind.bit();
        present
    }

    pub fn contains(&self, kind: Kind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Keeps only the kinds also present in `keep`.
    pub fn retain_only(&mut self, keep: KindSet) {
        self.0 &= keep.0;
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn is_subset(&self, other: &KindSet) -> bool {
        self.0 & !other.0 == 0
    }

    /// Iterates in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = Kind> + '_ {
        Kind::ALL.into_iter().filter(|kind| self.contains(*kind))
    }
}

impl fmt::Debug for KindSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Canonical layout for `Kind::Date` values rendered as text.
pub const DATE_LAYOUT: &str = "%Y-%m-%d";
/// Canonical layout for `Kind::Time` values rendered as text.
pub const TIME_LAYOUT: &str = "%H:%M:%S";

/// A datetime text layout, tried in preference order when sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatetimeLayout {
    Rfc3339,
    Rfc2822,
    /// Layout carrying its own UTC offset.
    Zoned(&'static str),
    /// Layout without an offset; parsed values are taken as UTC.
    Naive(&'static str),
}

pub const DATETIME_LAYOUTS: &[DatetimeLayout] = &[
    DatetimeLayout::Rfc3339,
    DatetimeLayout::Zoned("%Y-%m-%d %H:%M:%S%.f%:z"),
    DatetimeLayout::Zoned("%Y-%m-%d %H:%M:%S%.f %z"),
    DatetimeLayout::Naive("%Y-%m-%dT%H:%M:%S%.f"),
    DatetimeLayout::Naive("%Y-%m-%d %H:%M:%S%.f"),
    DatetimeLayout::Rfc2822,
    DatetimeLayout::Naive("%a %b %e %H:%M:%S %Y"),
    DatetimeLayout::Naive("%d %b %y %H:%M"),
];

pub const DATE_LAYOUTS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d %b %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%a, %b %d, %Y",
    "%A, %B %d, %Y",
    "%d-%b-%Y",
];

pub const TIME_LAYOUTS: &[&str] = &["%H:%M:%S", "%H:%M:%S%.f", "%H:%M", "%I:%M:%S %p", "%I:%M %p"];

impl DatetimeLayout {
    pub fn parse(&self, s: &str) -> Option<DateTime<Utc>> {
        match self {
            DatetimeLayout::Rfc3339 => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            DatetimeLayout::Rfc2822 => DateTime::parse_from_rfc2822(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            DatetimeLayout::Zoned(layout) => DateTime::parse_from_str(s, layout)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            DatetimeLayout::Naive(layout) => NaiveDateTime::parse_from_str(s, layout)
                .ok()
                .map(|dt| dt.and_utc()),
        }
    }
}

/// Parses `s` with the first matching datetime layout.
pub fn parse_datetime(s: &str) -> Option<(DateTime<Utc>, DatetimeLayout)> {
    DATETIME_LAYOUTS
        .iter()
        .find_map(|layout| layout.parse(s).map(|dt| (dt, *layout)))
}

/// Parses `s` with the first matching date layout.
pub fn parse_date(s: &str) -> Option<(NaiveDate, &'static str)> {
    DATE_LAYOUTS.iter().find_map(|layout| {
        NaiveDate::parse_from_str(s, layout)
            .ok()
            .map(|date| (date, *layout))
    })
}

/// Parses `s` with the first matching time layout.
pub fn parse_time(s: &str) -> Option<(NaiveTime, &'static str)> {
    TIME_LAYOUTS.iter().find_map(|layout| {
        NaiveTime::parse_from_str(s, layout)
            .ok()
            .map(|time| (time, *layout))
    })
}

/// Parses the textual booleans accepted when sampling and munging.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "y" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "n" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Largest exponent accepted by [`plain_decimal`].
const MAX_DECIMAL_EXPONENT: i32 = 16383;

/// Rewrites decimal text, including scientific notation, as plain
/// positional digits: `"1.5e3"` becomes `"1500"` and `".25"` becomes
/// `"0.25"`. Trailing fractional zeros are kept. Returns `None` for
/// anything that is not a finite decimal number.
pub fn plain_decimal(s: &str) -> Option<String> {
    let s = s.trim();
    let (negative, unsigned) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(pos) => {
            let exp: i32 = unsigned[pos + 1..].parse().ok()?;
            if exp.abs() > MAX_DECIMAL_EXPONENT {
                return None;
            }
            (&unsigned[..pos], exp)
        }
        None => (unsigned, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let digits = format!("{}{}", int_part, frac_part);
    let point = int_part.len() as i64 + i64::from(exponent);
    let (whole, fraction) = if point <= 0 {
        let zeros = "0".repeat(point.unsigned_abs() as usize);
        (String::new(), format!("{}{}", zeros, digits))
    } else if point as usize >= digits.len() {
        let zeros = "0".repeat(point as usize - digits.len());
        (format!("{}{}", digits, zeros), String::new())
    } else {
        let (whole, fraction) = digits.split_at(point as usize);
        (whole.to_string(), fraction.to_string())
    };

    let whole = match whole.trim_start_matches('0') {
        "" => "0",
        trimmed => trimmed,
    };
    let mut out = String::with_capacity(whole.len() + fraction.len() + 2);
    if negative {
        out.push('-');
    }
    out.push_str(whole);
    if !fraction.is_empty() {
        out.push('.');
        out.push_str(&fraction);
    }
    Some(out)
}
