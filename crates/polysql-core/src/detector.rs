//! Sampling-based kind inference for untyped columns
//!
//! A [`Detector`] starts from every kind a value could plausibly parse into
//! and narrows the candidate set as samples arrive. Typed samples narrow by
//! their native type; strings run through a battery of numeric, boolean and
//! time layout parses. The candidate set never grows.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    DATE_LAYOUT, DatetimeLayout, Kind, KindSet, PolysqlError, Record, Result, TIME_LAYOUT, Value,
    parse_bool, parse_date, parse_datetime, parse_time, plain_decimal,
};

/// Normalizes a sampled value into the canonical shape for its detected kind.
pub type MungeFn = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

const INITIAL_CANDIDATES: [Kind; 7] = [
    Kind::Int,
    Kind::Float,
    Kind::Decimal,
    Kind::Bool,
    Kind::Time,
    Kind::Date,
    Kind::Datetime,
];

const TIME_KINDS: [Kind; 3] = [Kind::Time, Kind::Date, Kind::Datetime];

/// Accumulates samples for one column and decides its kind.
#[derive(Debug, Clone)]
pub struct Detector {
    kinds: KindSet,
    dirty: bool,
    found_string: bool,
    datetime_layout: Option<DatetimeLayout>,
    date_layout: Option<&'static str>,
    time_layout: Option<&'static str>,
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector {
    pub fn new() -> Self {
        Self {
            kinds: KindSet::of(&INITIAL_CANDIDATES),
            dirty: false,
            found_string: false,
            datetime_layout: None,
            date_layout: None,
            time_layout: None,
        }
    }

    /// Surviving candidate kinds.
    pub fn candidates(&self) -> KindSet {
        self.kinds
    }

    fn retain(&mut self, keep: &[Kind]) {
        self.dirty = true;
        self.kinds.retain_only(KindSet::of(keep));
    }

    fn delete(&mut self, kind: Kind) {
        self.dirty = true;
        self.kinds.remove(kind);
    }

    /// Ingests one observed value.
    pub fn sample(&mut self, value: &Value) {
        let s = match value {
            Value::Null => return,
            Value::Float64(_) => return self.retain(&[Kind::Float]),
            Value::Int64(_) => return self.retain(&[Kind::Int, Kind::Float, Kind::Decimal]),
            Value::Bool(_) => return self.retain(&[Kind::Bool]),
            Value::Date(_) | Value::Time(_) | Value::DateTime(_) => {
                return self.retain(&TIME_KINDS);
            }
            Value::Bytes(_) => return self.retain(&[]),
            // Decimal text goes through the same battery as any other string.
            Value::Decimal(s) | Value::String(s) => s.as_str(),
        };

        self.found_string = true;
        if s.is_empty() {
            // An empty string says nothing about the kind.
            return;
        }

        if self.kinds.contains(Kind::Decimal) && plain_decimal(s).is_none() {
            self.delete(Kind::Decimal);
        }

        if self.kinds.contains(Kind::Int) && s.parse::<i64>().is_err() {
            self.delete(Kind::Int);
        }

        if self.kinds.contains(Kind::Float) && !parses_finite_float(s) {
            self.delete(Kind::Float);
        }

        if self.kinds.contains(Kind::Bool) && parse_bool(s).is_none() {
            self.delete(Kind::Bool);
        }

        if self.kinds.contains(Kind::Time) {
            match parse_time(s) {
                Some((_, layout)) => {
                    self.time_layout.get_or_insert(layout);
                }
                None => self.delete(Kind::Time),
            }
        }

        if self.kinds.contains(Kind::Date) {
            match parse_date(s) {
                Some((_, layout)) => {
                    self.date_layout.get_or_insert(layout);
                }
                None => self.delete(Kind::Date),
            }
        }

        if self.kinds.contains(Kind::Datetime) {
            match parse_datetime(s) {
                Some((_, layout)) => {
                    self.datetime_layout.get_or_insert(layout);
                }
                None => self.delete(Kind::Datetime),
            }
        }
    }

    /// Returns the best kind for the samples seen, plus a munge fn for the
    /// time-like kinds.
    pub fn detect(&self) -> Result<(Kind, Option<MungeFn>)> {
        if !self.dirty {
            let kind = if self.found_string {
                Kind::Text
            } else {
                Kind::Null
            };
            return Ok((kind, None));
        }

        match self.kinds.len() {
            0 => return Ok((Kind::Text, None)),
            1 => {
                let kind = self.kinds.iter().next().unwrap_or(Kind::Text);
                return Ok((kind, self.munge_fn(kind)));
            }
            _ => {}
        }

        if TIME_KINDS.iter().all(|kind| self.kinds.contains(*kind)) {
            return Ok((Kind::Datetime, self.munge_fn(Kind::Datetime)));
        }

        for kind in TIME_KINDS {
            if self.kinds.contains(kind) {
                return Ok((kind, self.munge_fn(kind)));
            }
        }

        // String input that parses as both integer and decimal is taken as the
        // stricter Int. Typed numeric input keeps Decimal.
        if self.found_string && self.kinds.contains(Kind::Decimal) && self.kinds.contains(Kind::Int)
        {
            return Ok((Kind::Int, None));
        }

        if self.kinds.contains(Kind::Decimal) {
            return Ok((Kind::Decimal, None));
        }

        for kind in [Kind::Int, Kind::Float, Kind::Bool] {
            if self.kinds.contains(kind) {
                return Ok((kind, None));
            }
        }

        Ok((Kind::Text, None))
    }

    fn munge_fn(&self, kind: Kind) -> Option<MungeFn> {
        match kind {
            Kind::Datetime => {
                let layout = self.datetime_layout;
                Some(Arc::new(move |value: &Value| munge_datetime(value, layout)))
            }
            Kind::Date => {
                let layout = self.date_layout;
                Some(Arc::new(move |value: &Value| munge_date(value, layout)))
            }
            Kind::Time => {
                let layout = self.time_layout;
                Some(Arc::new(move |value: &Value| munge_time(value, layout)))
            }
            _ => None,
        }
    }
}

fn parses_finite_float(s: &str) -> bool {
    s.parse::<f64>().is_ok_and(f64::is_finite)
}

fn munge_datetime(value: &Value, layout: Option<DatetimeLayout>) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::DateTime(dt) => Ok(Value::DateTime(*dt)),
        Value::Date(date) => Ok(Value::DateTime(date.and_time(chrono::NaiveTime::MIN).and_utc())),
        Value::String(s) if s.is_empty() => Ok(Value::Null),
        Value::String(s) => datetime_from_str(s, layout)
            .map(Value::DateTime)
            .ok_or_else(|| PolysqlError::generic(format!("cannot parse {:?} as datetime", s))),
        other => Err(PolysqlError::generic(format!(
            "cannot munge {} value into datetime",
            other.kind()
        ))),
    }
}

/// Parses with the layout recorded during sampling, then the full battery.
pub(crate) fn datetime_from_str(s: &str, layout: Option<DatetimeLayout>) -> Option<DateTime<Utc>> {
    layout
        .and_then(|layout| layout.parse(s))
        .or_else(|| parse_datetime(s).map(|(dt, _)| dt))
}

fn munge_date(value: &Value, layout: Option<&'static str>) -> Result<Value> {
    let date = match value {
        Value::Null => return Ok(Value::Null),
        Value::Date(date) => *date,
        Value::DateTime(dt) => dt.date_naive(),
        Value::String(s) if s.is_empty() => return Ok(Value::Null),
        Value::String(s) => layout
            .and_then(|layout| chrono::NaiveDate::parse_from_str(s, layout).ok())
            .or_else(|| parse_date(s).map(|(date, _)| date))
            .ok_or_else(|| PolysqlError::generic(format!("cannot parse {:?} as date", s)))?,
        other => {
            return Err(PolysqlError::generic(format!(
                "cannot munge {} value into date",
                other.kind()
            )));
        }
    };
    Ok(Value::String(date.format(DATE_LAYOUT).to_string()))
}

fn munge_time(value: &Value, layout: Option<&'static str>) -> Result<Value> {
    let time = match value {
        Value::Null => return Ok(Value::Null),
        Value::Time(time) => *time,
        Value::DateTime(dt) => dt.time(),
        Value::String(s) if s.is_empty() => return Ok(Value::Null),
        Value::String(s) => layout
            .and_then(|layout| chrono::NaiveTime::parse_from_str(s, layout).ok())
            .or_else(|| parse_time(s).map(|(time, _)| time))
            .ok_or_else(|| PolysqlError::generic(format!("cannot parse {:?} as time", s)))?,
        other => {
            return Err(PolysqlError::generic(format!(
                "cannot munge {} value into time",
                other.kind()
            )));
        }
    };
    Ok(Value::String(time.format(TIME_LAYOUT).to_string()))
}

/// Kinds inferred for each column of a record set.
pub struct DetectedKinds {
    pub kinds: Vec<Kind>,
    pub munge_fns: Vec<Option<MungeFn>>,
}

impl DetectedKinds {
    /// Applies the per-column munge fns to a record in place.
    pub fn munge(&self, record: &mut Record) -> Result<()> {
        for (value, munge) in record.iter_mut().zip(&self.munge_fns) {
            if let Some(munge) = munge {
                *value = munge(value)?;
            }
        }
        Ok(())
    }
}

/// Runs one detector per column over at most `max_samples` records.
///
/// Records shorter than the widest record contribute nothing for the
/// missing trailing columns.
pub fn detect_kinds(records: &[Record], max_samples: usize) -> Result<DetectedKinds> {
    let sampled = &records[..records.len().min(max_samples)];
    let width = sampled.iter().map(Vec::len).max().unwrap_or(0);
    let mut detectors = vec![Detector::new(); width];

    for record in sampled {
        for (detector, value) in detectors.iter_mut().zip(record) {
            detector.sample(value);
        }
    }

    let mut kinds = Vec::with_capacity(width);
    let mut munge_fns = Vec::with_capacity(width);
    for (idx, detector) in detectors.iter().enumerate() {
        let (kind, munge) = detector.detect()?;
        tracing::trace!(column = idx, kind = %kind, "detected column kind");
        kinds.push(kind);
        munge_fns.push(munge);
    }

    let summary: HashMap<Kind, usize> = kinds.iter().fold(HashMap::new(), |mut acc, kind| {
        *acc.entry(*kind).or_default() += 1;
        acc
    });
    tracing::debug!(
        columns = width,
        samples = sampled.len(),
        kinds = ?summary,
        "detected kinds for record set"
    );

    Ok(DetectedKinds { kinds, munge_fns })
}
