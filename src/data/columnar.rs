//! Parquet decoding through an ordered list of read strategies.
//!
//! Columnar engines disagree on timestamps outside the nanosecond-epoch range
//! (roughly before 1677 or after 2262). Rather than guess which behaviour the
//! caller needs, [`ColumnarReader`] tries a fast engine first and steps down
//! to slower, more permissive ones until something produces a table.
//!
//! ```text
//!   bytes
//!     │
//!     ▼
//!   Primary    arrow batches, native timestamps ──overflow──▶ same batches, object timestamps
//!     │ any error
//!     ▼
//!   Secondary  parquet rows, object timestamps ──option rejected──▶ engine default
//!     │ timestamp overflow only
//!     ▼
//!   Tertiary   parquet rows, lenient (unrepresentable → null)
//! ```

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{
    DataType, Date32Type, Date64Type, Decimal128Type, Decimal256Type, Float16Type, Float32Type,
    Float64Type, Int16Type, Int32Type, Int64Type, Int8Type, Schema, SchemaRef, TimeUnit,
    TimestampMicrosecondType, TimestampMillisecondType, TimestampNanosecondType,
    TimestampSecondType, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::parquet_to_arrow_schema;
use parquet::errors::ParquetError;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::{Field, Row};
use thiserror::Error;

use super::model::{Column, ColumnKind, NativeScalar, ShapeError, Table, Value};

// ---------------------------------------------------------------------------
// Errors and options
// ---------------------------------------------------------------------------

/// How timestamp cells are materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampMode {
    /// Nanosecond-epoch bound; anything outside fails the conversion.
    Native,
    /// Any instant chrono can represent; the column becomes `Object`.
    Object,
    /// Unrepresentable instants become `Null`.
    Lenient,
}

#[derive(Debug, Error)]
pub enum ColumnarError {
    #[error("out of bounds timestamp in column '{column}': {raw} {unit}")]
    TimestampOutOfRange {
        column: String,
        raw: i64,
        unit: &'static str,
    },
    #[error("{engine} does not support {mode:?} timestamps")]
    UnsupportedOption {
        engine: &'static str,
        mode: TimestampMode,
    },
    #[error("no read strategy configured")]
    NoStrategy,
    #[error(transparent)]
    Parquet(#[from] ParquetError),
    #[error(transparent)]
    Arrow(#[from] ArrowError),
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

impl ColumnarError {
    pub fn is_timestamp_overflow(&self) -> bool {
        matches!(self, ColumnarError::TimestampOutOfRange { .. })
    }
}

// ---------------------------------------------------------------------------
// Engines
// ---------------------------------------------------------------------------

/// A Parquet decoder. Decoding and table conversion are separate steps so a
/// strategy can retry the conversion without decoding the file again.
pub trait ColumnarEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn decode(&self, bytes: &Bytes) -> Result<Box<dyn DecodedColumns>, ColumnarError>;
}

/// Decoded file contents, convertible to a [`Table`] under a timestamp mode.
/// `None` asks for the engine's default.
pub trait DecodedColumns {
    fn to_table(&self, timestamps: Option<TimestampMode>) -> Result<Table, ColumnarError>;
}

/// arrow-rs record batch reader. Fast; supports every timestamp mode and
/// defaults to [`TimestampMode::Native`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ArrowBatchEngine;

struct ArrowDecoded {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl ColumnarEngine for ArrowBatchEngine {
    fn name(&self) -> &'static str {
        "arrow-batch"
    }

    fn decode(&self, bytes: &Bytes) -> Result<Box<dyn DecodedColumns>, ColumnarError> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes.clone())?;
        let schema = builder.schema().clone();
        let reader = builder.build()?;
        let batches = reader.collect::<Result<Vec<_>, ArrowError>>()?;
        Ok(Box::new(ArrowDecoded { schema, batches }))
    }
}

impl DecodedColumns for ArrowDecoded {
    fn to_table(&self, timestamps: Option<TimestampMode>) -> Result<Table, ColumnarError> {
        let mode = timestamps.unwrap_or(TimestampMode::Native);
        let mut columns = Vec::with_capacity(self.schema.fields().len());

        for (idx, field) in self.schema.fields().iter().enumerate() {
            let name = field.name();
            let mut values = Vec::new();
            for batch in &self.batches {
                let array = unpack_dictionary(batch.column(idx))?;
                for row in 0..array.len() {
                    values.push(arrow_cell(&array, row, mode, name)?);
                }
            }
            columns.push(Column::new(name.clone(), kind_for(field.data_type(), mode), values));
        }

        Ok(Table::from_columns(columns)?)
    }
}

/// parquet record-level row reader. Slower, decodes every field on its own;
/// rejects [`TimestampMode::Native`] and defaults to [`TimestampMode::Object`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RowEngine;

struct RowDecoded {
    schema: Schema,
    rows: Vec<Row>,
}

impl ColumnarEngine for RowEngine {
    fn name(&self) -> &'static str {
        "parquet-rows"
    }

    fn decode(&self, bytes: &Bytes) -> Result<Box<dyn DecodedColumns>, ColumnarError> {
        let reader = SerializedFileReader::new(bytes.clone())?;
        let file_meta = reader.metadata().file_metadata();
        let schema = parquet_to_arrow_schema(file_meta.schema_descr(), file_meta.key_value_metadata())?;
        let rows = reader
            .get_row_iter(None)?
            .collect::<Result<Vec<Row>, ParquetError>>()?;
        Ok(Box::new(RowDecoded { schema, rows }))
    }
}

impl DecodedColumns for RowDecoded {
    fn to_table(&self, timestamps: Option<TimestampMode>) -> Result<Table, ColumnarError> {
        let mode = timestamps.unwrap_or(TimestampMode::Object);
        if mode == TimestampMode::Native {
            return Err(ColumnarError::UnsupportedOption {
                engine: RowEngine.name(),
                mode,
            });
        }

        let fields = self.schema.fields();
        let mut values: Vec<Vec<Value>> = vec![Vec::with_capacity(self.rows.len()); fields.len()];
        for row in &self.rows {
            for (idx, (name, field)) in row.get_column_iter().enumerate() {
                if let Some(column) = values.get_mut(idx) {
                    column.push(field_cell(field, mode, name)?);
                }
            }
        }

        let columns = fields
            .iter()
            .zip(values)
            .map(|(f, vals)| Column::new(f.name().clone(), kind_for(f.data_type(), mode), vals))
            .collect();
        Ok(Table::from_columns(columns)?)
    }
}

// ---------------------------------------------------------------------------
// Strategy list
// ---------------------------------------------------------------------------

/// One step of the cascade.
pub enum Tier {
    /// Native timestamps; on a timestamp overflow the already-decoded data is
    /// converted again with object timestamps.
    Primary(Box<dyn ColumnarEngine>),
    /// Object timestamps, or the engine default when the engine rejects them.
    Secondary(Box<dyn ColumnarEngine>),
    /// Lenient timestamps. Only attempted when the previous tier failed on a
    /// timestamp overflow.
    Tertiary(Box<dyn ColumnarEngine>),
}

impl Tier {
    fn label(&self) -> &'static str {
        match self {
            Tier::Primary(_) => "primary",
            Tier::Secondary(_) => "secondary",
            Tier::Tertiary(_) => "tertiary",
        }
    }

    fn engine(&self) -> &dyn ColumnarEngine {
        match self {
            Tier::Primary(e) | Tier::Secondary(e) | Tier::Tertiary(e) => e.as_ref(),
        }
    }

    fn attempt(&self, bytes: &Bytes) -> Result<Table, ColumnarError> {
        let decoded = self.engine().decode(bytes)?;
        match self {
            Tier::Primary(_) => match decoded.to_table(Some(TimestampMode::Native)) {
                Err(e) if e.is_timestamp_overflow() => {
                    log::info!("{e}; converting with object timestamps");
                    decoded.to_table(Some(TimestampMode::Object))
                }
                other => other,
            },
            Tier::Secondary(_) => match decoded.to_table(Some(TimestampMode::Object)) {
                Err(ColumnarError::UnsupportedOption { .. }) => decoded.to_table(None),
                other => other,
            },
            Tier::Tertiary(_) => decoded.to_table(Some(TimestampMode::Lenient)),
        }
    }
}

/// Ordered Parquet read strategies; the first tier that succeeds wins.
pub struct ColumnarReader {
    tiers: Vec<Tier>,
}

impl Default for ColumnarReader {
    fn default() -> Self {
        ColumnarReader::new(vec![
            Tier::Primary(Box::new(ArrowBatchEngine)),
            Tier::Secondary(Box::new(RowEngine)),
            Tier::Tertiary(Box::new(RowEngine)),
        ])
    }
}

impl ColumnarReader {
    pub fn new(tiers: Vec<Tier>) -> Self {
        ColumnarReader { tiers }
    }

    pub fn read(&self, bytes: &Bytes) -> Result<Table, ColumnarError> {
        let mut last_err: Option<ColumnarError> = None;

        for tier in &self.tiers {
            if let Tier::Tertiary(_) = tier {
                match &last_err {
                    Some(e) if e.is_timestamp_overflow() => {}
                    _ => continue,
                }
            }
            log::debug!("{} tier: reading with {}", tier.label(), tier.engine().name());
            match tier.attempt(bytes) {
                Ok(mut table) => {
                    reparse_datetime_columns(&mut table);
                    return Ok(table);
                }
                Err(e) => {
                    log::info!("{} tier ({}) failed: {e}", tier.label(), tier.engine().name());
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or(ColumnarError::NoStrategy))
    }
}

/// Decode Parquet bytes with the default cascade.
pub fn read_columnar(bytes: &Bytes) -> Result<Table, ColumnarError> {
    ColumnarReader::default().read(bytes)
}

// ---------------------------------------------------------------------------
// Date/time post-processing
// ---------------------------------------------------------------------------

/// Re-parse every `DateTime` column. Out-of-range instants and unparseable
/// text become `Null`; a cell that cannot be read as a date at all turns the
/// whole column into text.
pub fn reparse_datetime_columns(table: &mut Table) {
    for column in table.columns_mut() {
        if column.kind != ColumnKind::DateTime {
            continue;
        }
        match column.values.iter().map(coerce_datetime).collect::<Option<Vec<_>>>() {
            Some(values) => column.values = values,
            None => {
                log::debug!("column '{}' is not date-like, keeping it as text", column.name);
                column.values = column
                    .values
                    .iter()
                    .map(|v| match v {
                        Value::Null => Value::Null,
                        other => Value::Text(other.to_string()),
                    })
                    .collect();
                column.kind = ColumnKind::Text;
            }
        }
    }
}

/// `None` means the cell has no date interpretation at all.
fn coerce_datetime(value: &Value) -> Option<Value> {
    let parsed = match value {
        Value::Null => None,
        Value::DateTime(dt) => Some(*dt),
        Value::Date(d) => d.and_hms_opt(0, 0, 0),
        Value::Text(s) => parse_datetime_text(s),
        Value::Int(_) | Value::Native(_) => match super::normalize::coerce_value(value) {
            Value::Int(ns) => Some(DateTime::from_timestamp_nanos(ns).naive_utc()),
            _ => return None,
        },
        _ => return None,
    };
    Some(match parsed.filter(|dt| in_nanosecond_range(dt)) {
        Some(dt) => Value::DateTime(dt),
        None => Value::Null,
    })
}

fn parse_datetime_text(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn in_nanosecond_range(dt: &NaiveDateTime) -> bool {
    dt.and_utc().timestamp_nanos_opt().is_some()
}

// ---------------------------------------------------------------------------
// Cell conversion helpers
// ---------------------------------------------------------------------------

fn kind_for(data_type: &DataType, mode: TimestampMode) -> ColumnKind {
    match data_type {
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => ColumnKind::Int,
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
            ColumnKind::UInt
        }
        DataType::Float16
        | DataType::Float32
        | DataType::Float64
        | DataType::Decimal128(..)
        | DataType::Decimal256(..) => ColumnKind::Float,
        DataType::Boolean => ColumnKind::Bool,
        DataType::Utf8
        | DataType::LargeUtf8
        | DataType::Utf8View
        | DataType::Binary
        | DataType::LargeBinary
        | DataType::BinaryView
        | DataType::FixedSizeBinary(_) => ColumnKind::Text,
        DataType::Date32 | DataType::Date64 => ColumnKind::Date,
        DataType::Timestamp(..) if mode == TimestampMode::Object => ColumnKind::Object,
        DataType::Timestamp(..) => ColumnKind::DateTime,
        DataType::Dictionary(_, value) => kind_for(value, mode),
        _ => ColumnKind::Object,
    }
}

fn unpack_dictionary(array: &ArrayRef) -> Result<ArrayRef, ArrowError> {
    match array.data_type() {
        DataType::Dictionary(_, value) => cast(array.as_ref(), value),
        _ => Ok(array.clone()),
    }
}

fn arrow_cell(
    array: &ArrayRef,
    row: usize,
    mode: TimestampMode,
    column: &str,
) -> Result<Value, ColumnarError> {
    if array.is_null(row) {
        return Ok(Value::Null);
    }
    let native = |n: NativeScalar| -> Result<Value, ColumnarError> { Ok(Value::Native(n)) };
    match array.data_type() {
        DataType::Int8 => native(NativeScalar::Int8(array.as_primitive::<Int8Type>().value(row))),
        DataType::Int16 => native(NativeScalar::Int16(array.as_primitive::<Int16Type>().value(row))),
        DataType::Int32 => native(NativeScalar::Int32(array.as_primitive::<Int32Type>().value(row))),
        DataType::Int64 => native(NativeScalar::Int64(array.as_primitive::<Int64Type>().value(row))),
        DataType::UInt8 => native(NativeScalar::UInt8(array.as_primitive::<UInt8Type>().value(row))),
        DataType::UInt16 => {
            native(NativeScalar::UInt16(array.as_primitive::<UInt16Type>().value(row)))
        }
        DataType::UInt32 => {
            native(NativeScalar::UInt32(array.as_primitive::<UInt32Type>().value(row)))
        }
        DataType::UInt64 => {
            native(NativeScalar::UInt64(array.as_primitive::<UInt64Type>().value(row)))
        }
        DataType::Float16 => native(NativeScalar::Float32(
            array.as_primitive::<Float16Type>().value(row).to_f32(),
        )),
        DataType::Float32 => {
            native(NativeScalar::Float32(array.as_primitive::<Float32Type>().value(row)))
        }
        DataType::Float64 => {
            native(NativeScalar::Float64(array.as_primitive::<Float64Type>().value(row)))
        }
        DataType::Decimal128(..) => {
            let text = array.as_primitive::<Decimal128Type>().value_as_string(row);
            Ok(decimal_cell(&text))
        }
        DataType::Decimal256(..) => {
            let text = array.as_primitive::<Decimal256Type>().value_as_string(row);
            Ok(decimal_cell(&text))
        }
        DataType::Boolean => native(NativeScalar::Boolean(array.as_boolean().value(row))),
        DataType::Utf8 => Ok(Value::Text(array.as_string::<i32>().value(row).to_string())),
        DataType::LargeUtf8 => Ok(Value::Text(array.as_string::<i64>().value(row).to_string())),
        DataType::Binary => Ok(Value::Text(
            String::from_utf8_lossy(array.as_binary::<i32>().value(row)).into_owned(),
        )),
        DataType::LargeBinary => Ok(Value::Text(
            String::from_utf8_lossy(array.as_binary::<i64>().value(row)).into_owned(),
        )),
        DataType::Date32 => Ok(array
            .as_primitive::<Date32Type>()
            .value_as_date(row)
            .map_or(Value::Null, Value::Date)),
        DataType::Date64 => Ok(array
            .as_primitive::<Date64Type>()
            .value_as_date(row)
            .map_or(Value::Null, Value::Date)),
        DataType::Timestamp(unit, _) => {
            let raw = match unit {
                TimeUnit::Second => array.as_primitive::<TimestampSecondType>().value(row),
                TimeUnit::Millisecond => array.as_primitive::<TimestampMillisecondType>().value(row),
                TimeUnit::Microsecond => array.as_primitive::<TimestampMicrosecondType>().value(row),
                TimeUnit::Nanosecond => array.as_primitive::<TimestampNanosecondType>().value(row),
            };
            timestamp_cell(raw, *unit, mode, column)
        }
        DataType::List(_) => list_cell(&array.as_list::<i32>().value(row), mode, column),
        DataType::LargeList(_) => list_cell(&array.as_list::<i64>().value(row), mode, column),
        DataType::FixedSizeList(..) => {
            list_cell(&array.as_fixed_size_list().value(row), mode, column)
        }
        _ => Ok(Value::Text(array_value_to_string(array.as_ref(), row)?)),
    }
}

fn list_cell(items: &ArrayRef, mode: TimestampMode, column: &str) -> Result<Value, ColumnarError> {
    let items = unpack_dictionary(items)?;
    let values = (0..items.len())
        .map(|i| arrow_cell(&items, i, mode, column))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Native(NativeScalar::Array(values)))
}

fn decimal_cell(text: &str) -> Value {
    text.parse::<f64>()
        .map_or(Value::Null, |f| Value::Native(NativeScalar::Float64(f)))
}

fn unit_label(unit: TimeUnit) -> &'static str {
    match unit {
        TimeUnit::Second => "s",
        TimeUnit::Millisecond => "ms",
        TimeUnit::Microsecond => "us",
        TimeUnit::Nanosecond => "ns",
    }
}

fn timestamp_cell(
    raw: i64,
    unit: TimeUnit,
    mode: TimestampMode,
    column: &str,
) -> Result<Value, ColumnarError> {
    let overflow = || ColumnarError::TimestampOutOfRange {
        column: column.to_string(),
        raw,
        unit: unit_label(unit),
    };

    if mode == TimestampMode::Native {
        let nanos = match unit {
            TimeUnit::Second => raw.checked_mul(1_000_000_000),
            TimeUnit::Millisecond => raw.checked_mul(1_000_000),
            TimeUnit::Microsecond => raw.checked_mul(1_000),
            TimeUnit::Nanosecond => Some(raw),
        }
        .ok_or_else(overflow)?;
        return Ok(Value::DateTime(DateTime::from_timestamp_nanos(nanos).naive_utc()));
    }

    let instant = match unit {
        TimeUnit::Second => DateTime::from_timestamp(raw, 0),
        TimeUnit::Millisecond => DateTime::from_timestamp_millis(raw),
        TimeUnit::Microsecond => DateTime::from_timestamp_micros(raw),
        TimeUnit::Nanosecond => Some(DateTime::from_timestamp_nanos(raw)),
    };
    match (instant, mode) {
        (Some(dt), _) => Ok(Value::DateTime(dt.naive_utc())),
        (None, TimestampMode::Lenient) => Ok(Value::Null),
        (None, _) => Err(overflow()),
    }
}

fn field_cell(field: &Field, mode: TimestampMode, column: &str) -> Result<Value, ColumnarError> {
    let value = match field {
        Field::Null => Value::Null,
        Field::Bool(b) => Value::Native(NativeScalar::Boolean(*b)),
        Field::Byte(v) => Value::Native(NativeScalar::Int8(*v)),
        Field::Short(v) => Value::Native(NativeScalar::Int16(*v)),
        Field::Int(v) => Value::Native(NativeScalar::Int32(*v)),
        Field::Long(v) => Value::Native(NativeScalar::Int64(*v)),
        Field::UByte(v) => Value::Native(NativeScalar::UInt8(*v)),
        Field::UShort(v) => Value::Native(NativeScalar::UInt16(*v)),
        Field::UInt(v) => Value::Native(NativeScalar::UInt32(*v)),
        Field::ULong(v) => Value::Native(NativeScalar::UInt64(*v)),
        Field::Float16(v) => Value::Native(NativeScalar::Float32(v.to_f32())),
        Field::Float(v) => Value::Native(NativeScalar::Float32(*v)),
        Field::Double(v) => Value::Native(NativeScalar::Float64(*v)),
        Field::Decimal(_) => decimal_cell(&field.to_string()),
        Field::Str(s) => Value::Text(s.clone()),
        Field::Bytes(b) => Value::Text(String::from_utf8_lossy(b.data()).into_owned()),
        Field::Date(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(TimeDelta::days(i64::from(*days))))
            .map_or(Value::Null, Value::Date),
        Field::TimestampMillis(ms) => timestamp_cell(*ms, TimeUnit::Millisecond, mode, column)?,
        Field::TimestampMicros(us) => timestamp_cell(*us, TimeUnit::Microsecond, mode, column)?,
        Field::ListInternal(list) => {
            let items = list
                .elements()
                .iter()
                .map(|f| field_cell(f, mode, column))
                .collect::<Result<Vec<_>, _>>()?;
            Value::Native(NativeScalar::Array(items))
        }
        other => Value::Text(other.to_string()),
    };
    Ok(value)
}
