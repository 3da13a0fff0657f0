use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde_json::{Map as JsonMap, Number as JsonNumber, Value as JsonValue};
use thiserror::Error;

use super::normalize::coerce_value;

// ---------------------------------------------------------------------------
// NativeScalar – engine-specific cell representation
// ---------------------------------------------------------------------------

/// A cell exactly as a columnar engine handed it over: width-typed numbers,
/// engine booleans and nested arrays. Downstream code should only ever see
/// these after [`normalize`](super::normalize::normalize) has run.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeScalar {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Boolean(bool),
    Array(Vec<Value>),
}

// ---------------------------------------------------------------------------
// Value – a single cell
// ---------------------------------------------------------------------------

/// A dynamically-typed cell shared by every decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    List(Vec<Value>),
    Geometry(geojson::Geometry),
    Native(NativeScalar),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to interpret the value as an `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            Value::Native(_) => coerce_value(self).as_f64(),
            _ => None,
        }
    }

    /// Render-ready JSON for this cell. Engine-native cells are coerced first.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::UInt(u) => JsonValue::from(*u),
            Value::Float(f) => JsonNumber::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Date(_) | Value::DateTime(_) => JsonValue::String(self.to_string()),
            Value::List(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Geometry(g) => serde_json::to_value(g).unwrap_or(JsonValue::Null),
            Value::Native(_) => coerce_value(self).to_json(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "<null>"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::UInt(u) => write!(f, "{u}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Geometry(g) => {
                let text = serde_json::to_string(g).map_err(|_| fmt::Error)?;
                write!(f, "{text}")
            }
            Value::Native(_) => write!(f, "{}", coerce_value(self)),
        }
    }
}

// ---------------------------------------------------------------------------
// ColumnKind – declared element kind of a column
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Int,
    UInt,
    Float,
    Bool,
    Text,
    Date,
    DateTime,
    /// Mixed or opaque cells (object timestamps, nested lists, all-null).
    Object,
    Geometry,
}

impl ColumnKind {
    /// Signed/unsigned integer or floating point.
    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnKind::Int | ColumnKind::UInt | ColumnKind::Float)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ColumnKind::Int => "int",
            ColumnKind::UInt => "uint",
            ColumnKind::Float => "float",
            ColumnKind::Bool => "bool",
            ColumnKind::Text => "text",
            ColumnKind::Date => "date",
            ColumnKind::DateTime => "datetime",
            ColumnKind::Object => "object",
            ColumnKind::Geometry => "geometry",
        }
    }

    /// Infer a kind from already-typed plain cells. `Null` cells are ignored;
    /// an all-null column is `Object`.
    pub fn infer(values: &[Value]) -> Self {
        let mut kind: Option<ColumnKind> = None;
        for value in values {
            let this = match value {
                Value::Null => continue,
                Value::Bool(_) => ColumnKind::Bool,
                Value::Int(_) => ColumnKind::Int,
                Value::UInt(_) => ColumnKind::UInt,
                Value::Float(_) => ColumnKind::Float,
                Value::Text(_) => ColumnKind::Text,
                Value::Date(_) => ColumnKind::Date,
                Value::DateTime(_) => ColumnKind::DateTime,
                Value::Geometry(_) => ColumnKind::Geometry,
                Value::List(_) | Value::Native(_) => return ColumnKind::Object,
            };
            kind = Some(match kind {
                None => this,
                Some(prev) if prev == this => prev,
                Some(prev) if prev.is_numeric() && this.is_numeric() => ColumnKind::Float,
                Some(_) => return ColumnKind::Object,
            });
        }
        kind.unwrap_or(ColumnKind::Object)
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Column / Table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind, values: Vec<Value>) -> Self {
        Column {
            name: name.into(),
            kind,
            values,
        }
    }

    /// Build a column whose kind is inferred from its cells. Mixed integer and
    /// float cells are promoted to floats.
    pub fn inferred(name: impl Into<String>, mut values: Vec<Value>) -> Self {
        let kind = ColumnKind::infer(&values);
        if kind == ColumnKind::Float {
            for value in &mut values {
                if let Some(f) = value.as_f64() {
                    *value = Value::Float(f);
                }
            }
        }
        Column::new(name, kind, values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("column '{column}' has {actual} rows, expected {expected}")]
    RaggedColumn {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("duplicate column name '{0}'")]
    DuplicateColumn(String),
    #[error("geometry column '{0}' is missing or not of kind geometry")]
    BadGeometryColumn(String),
}

/// A parsed file: named, typed columns of equal length. A geospatial table
/// additionally names its single geometry column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    geometry_column: Option<String>,
}

impl Table {
    pub fn from_columns(columns: Vec<Column>) -> Result<Self, ShapeError> {
        if let Some(first) = columns.first() {
            let expected = first.len();
            for col in &columns {
                if col.len() != expected {
                    return Err(ShapeError::RaggedColumn {
                        column: col.name.clone(),
                        expected,
                        actual: col.len(),
                    });
                }
            }
        }
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == col.name) {
                return Err(ShapeError::DuplicateColumn(col.name.clone()));
            }
        }
        Ok(Table {
            columns,
            geometry_column: None,
        })
    }

    /// Mark `name` as the geometry column, turning this into a geospatial table.
    pub fn with_geometry(mut self, name: &str) -> Result<Self, ShapeError> {
        match self.column(name) {
            Some(col) if col.kind == ColumnKind::Geometry => {
                self.geometry_column = Some(name.to_string());
                Ok(self)
            }
            _ => Err(ShapeError::BadGeometryColumn(name.to_string())),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub(crate) fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// No columns, or no rows.
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn geometry_column(&self) -> Option<&str> {
        self.geometry_column.as_deref()
    }

    pub fn is_geospatial(&self) -> bool {
        self.geometry_column.is_some()
    }

    /// Rows as JSON objects (`column -> cell`), the shape report views consume.
    pub fn to_json_records(&self) -> Vec<JsonValue> {
        (0..self.num_rows())
            .map(|row| {
                let obj: JsonMap<String, JsonValue> = self
                    .columns
                    .iter()
                    .map(|c| (c.name.clone(), c.values[row].to_json()))
                    .collect();
                JsonValue::Object(obj)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// LoadedTable / ModuleDataset
// ---------------------------------------------------------------------------

/// A successfully parsed file and the moment decoding finished.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedTable {
    pub table: Table,
    pub loaded_at: DateTime<Local>,
}

/// Everything one dashboard module has loaded, keyed by file base name.
///
/// The table map and the timestamp map always have the same keys: entries
/// are only ever added or removed in pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleDataset {
    tables: BTreeMap<String, Table>,
    loaded_at: BTreeMap<String, DateTime<Local>>,
}

impl ModuleDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, loaded: LoadedTable) {
        let name = name.into();
        self.loaded_at.insert(name.clone(), loaded.loaded_at);
        self.tables.insert(name, loaded.table);
    }

    pub fn remove(&mut self, name: &str) -> Option<LoadedTable> {
        let table = self.tables.remove(name)?;
        let loaded_at = self.loaded_at.remove(name)?;
        Some(LoadedTable { table, loaded_at })
    }

    pub fn get(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn loaded_at(&self, name: &str) -> Option<DateTime<Local>> {
        self.loaded_at.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn tables(&self) -> &BTreeMap<String, Table> {
        &self.tables
    }

    pub fn timestamps(&self) -> &BTreeMap<String, DateTime<Local>> {
        &self.loaded_at
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// A copy holding only the entries whose name is in `names`.
    pub fn restricted_to<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut out = ModuleDataset::new();
        for name in names {
            if let (Some(table), Some(loaded_at)) = (self.tables.get(name), self.loaded_at.get(name))
            {
                out.insert(
                    name,
                    LoadedTable {
                        table: table.clone(),
                        loaded_at: *loaded_at,
                    },
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(rows: usize) -> LoadedTable {
        let values = (0..rows as i64).map(Value::Int).collect();
        LoadedTable {
            table: Table::from_columns(vec![Column::new("n", ColumnKind::Int, values)]).unwrap(),
            loaded_at: Local::now(),
        }
    }

    #[test]
    fn infer_promotes_int_and_float_mix() {
        let col = Column::inferred("x", vec![Value::Int(1), Value::Null, Value::Float(2.5)]);
        assert_eq!(col.kind, ColumnKind::Float);
        assert_eq!(col.values[0], Value::Float(1.0));
        assert_eq!(col.values[1], Value::Null);
    }

    #[test]
    fn infer_mixed_text_and_number_is_object() {
        let kind = ColumnKind::infer(&[Value::Int(1), Value::Text("a".into())]);
        assert_eq!(kind, ColumnKind::Object);
        assert_eq!(ColumnKind::infer(&[Value::Null, Value::Null]), ColumnKind::Object);
    }

    #[test]
    fn ragged_columns_are_rejected() {
        let err = Table::from_columns(vec![
            Column::new("a", ColumnKind::Int, vec![Value::Int(1)]),
            Column::new("b", ColumnKind::Int, vec![]),
        ])
        .unwrap_err();
        assert!(matches!(err, ShapeError::RaggedColumn { .. }));
    }

    #[test]
    fn geometry_column_must_have_geometry_kind() {
        let table =
            Table::from_columns(vec![Column::new("a", ColumnKind::Int, vec![Value::Int(1)])])
                .unwrap();
        assert!(table.with_geometry("a").is_err());
    }

    #[test]
    fn dataset_maps_stay_paired() {
        let mut ds = ModuleDataset::new();
        ds.insert("a.parquet", loaded(2));
        ds.insert("b.csv", loaded(1));
        assert_eq!(
            ds.tables().keys().collect::<Vec<_>>(),
            ds.timestamps().keys().collect::<Vec<_>>()
        );

        assert!(ds.remove("a.parquet").is_some());
        assert!(!ds.timestamps().contains_key("a.parquet"));
        assert_eq!(ds.len(), 1);
    }

    #[test]
    fn restricted_to_keeps_only_named_entries() {
        let mut ds = ModuleDataset::new();
        ds.insert("a.parquet", loaded(2));
        ds.insert("b.csv", loaded(1));
        let sub = ds.restricted_to(["b.csv", "missing.txt"]);
        assert_eq!(sub.names().collect::<Vec<_>>(), vec!["b.csv"]);
        assert!(sub.loaded_at("b.csv").is_some());
    }

    #[test]
    fn json_records_use_column_names() {
        let table = Table::from_columns(vec![
            Column::new("n", ColumnKind::Int, vec![Value::Native(NativeScalar::Int32(7))]),
            Column::new("s", ColumnKind::Text, vec![Value::Text("x".into())]),
        ])
        .unwrap();
        let records = table.to_json_records();
        assert_eq!(records, vec![serde_json::json!({"n": 7, "s": "x"})]);
    }
}
