//! Records and the shared column shape they are aligned with

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Kind, Value};

/// One row of values, positionally aligned with a [`RecordMeta`].
pub type Record = Vec<Value>;

/// Which `Value` variant a driver produces for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    Bool,
    Int64,
    Float64,
    Decimal,
    String,
    Bytes,
    Date,
    Time,
    DateTime,
    Any,
}

impl ScanType {
    pub fn for_kind(kind: Kind) -> Self {
        match kind {
            Kind::Bool => ScanType::Bool,
            Kind::Int => ScanType::Int64,
            Kind::Float => ScanType::Float64,
            Kind::Decimal => ScanType::Decimal,
            Kind::Text => ScanType::String,
            Kind::Bytes => ScanType::Bytes,
            Kind::Date => ScanType::Date,
            Kind::Time => ScanType::Time,
            Kind::Datetime => ScanType::DateTime,
            Kind::Unknown | Kind::Null => ScanType::Any,
        }
    }
}

/// Native description of one result or table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnTypeData {
    pub name: String,
    /// Engine type name, e.g. `VARCHAR(64)` or `int8`.
    pub db_type: String,
    pub nullable: Option<bool>,
    pub length: Option<i64>,
    pub precision: Option<i64>,
    pub scale: Option<i64>,
}

impl ColumnTypeData {
    pub fn new(name: impl Into<String>, db_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            db_type: db_type.into(),
            nullable: None,
            length: None,
            precision: None,
            scale: None,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }
}

/// Per-column descriptor shared by every record of one shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    /// Display name, unique within the record shape.
    pub munged_name: String,
    pub kind: Kind,
    pub db_type: String,
    pub scan_type: ScanType,
    pub nullable: Option<bool>,
}

/// Ordered column descriptors for a set of records. Cheap to clone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordMeta(Arc<Vec<FieldMeta>>);

impl RecordMeta {
    pub fn new(fields: Vec<FieldMeta>) -> Self {
        Self(Arc::new(fields))
    }

    /// Builds the shape from native column descriptors, deriving each kind
    /// with `kind_of` and munging duplicate names.
    pub fn from_column_types(cols: &[ColumnTypeData], kind_of: impl Fn(&str) -> Kind) -> Self {
        let names: Vec<&str> = cols.iter().map(|c| c.name.as_str()).collect();
        let munged = munge_result_col_names(&names);
        let fields = cols
            .iter()
            .zip(munged)
            .map(|(col, munged_name)| {
                let kind = kind_of(&col.db_type);
                FieldMeta {
                    name: col.name.clone(),
                    munged_name,
                    kind,
                    db_type: col.db_type.clone(),
                    scan_type: ScanType::for_kind(kind),
                    nullable: col.nullable,
                }
            })
            .collect();
        Self::new(fields)
    }

    pub fn fields(&self) -> &[FieldMeta] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn munged_names(&self) -> Vec<&str> {
        self.0.iter().map(|f| f.munged_name.as_str()).collect()
    }

    pub fn kinds(&self) -> Vec<Kind> {
        self.0.iter().map(|f| f.kind).collect()
    }
}

/// Rows returned by a query together with their shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub meta: RecordMeta,
    pub records: Vec<Record>,
}

/// Disambiguates duplicate result column names: `a, a, b, a` becomes
/// `a, a_1, b, a_2`. A generated name never collides with a real one.
pub fn munge_result_col_names<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut taken: HashMap<String, usize> = names
        .iter()
        .map(|name| (name.as_ref().to_string(), 0))
        .collect();
    let mut seen: HashMap<&str, ()> = HashMap::with_capacity(names.len());
    let mut out = Vec::with_capacity(names.len());

    for name in names {
        let name = name.as_ref();
        if seen.insert(name, ()).is_none() {
            out.push(name.to_string());
            continue;
        }

        let counter = taken.get(name).copied().unwrap_or(0);
        let mut n = counter + 1;
        let mut candidate = format!("{}_{}", name, n);
        while taken.contains_key(&candidate) {
            n += 1;
            candidate = format!("{}_{}", name, n);
        }
        taken.insert(name.to_string(), n);
        taken.insert(candidate.clone(), 0);
        out.push(candidate);
    }
    out
}
