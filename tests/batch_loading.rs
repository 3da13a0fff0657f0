use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arrow::array::{Int64Array, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use rust_xlsxwriter::Workbook;

use tablero::data::batch::{load_batch, NoProgress};
use tablero::data::diagnostics::{Severity, Stage};
use tablero::data::model::{ColumnKind, Value};
use tablero::store::MemoryStore;

// 2500-01-01T00:00:00Z in microseconds.
const YEAR_2500: i64 = 16_725_225_600_000_000;
// 2023-11-14T22:13:20Z
const RECENT: i64 = 1_700_000_000_000_000;

fn parquet(with_far_future: bool) -> Bytes {
    let schema = Arc::new(Schema::new(vec![
        Field::new("legajo", DataType::Int64, false),
        Field::new("localidad", DataType::Utf8, true),
        Field::new(
            "fecha_alta",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            true,
        ),
    ]));
    let first = if with_far_future { YEAR_2500 } else { RECENT };
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(vec![10, 11])),
            Arc::new(StringArray::from(vec![Some("Villa María"), None])),
            Arc::new(TimestampMicrosecondArray::from(vec![Some(first), Some(RECENT)]).with_timezone("UTC")),
        ],
    )
    .unwrap();
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
    Bytes::from(buf)
}

fn xlsx() -> Bytes {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "empresa").unwrap();
    sheet.write_string(0, 1, "puestos").unwrap();
    sheet.write_string(1, 0, "Metalúrgica Sur").unwrap();
    sheet.write_number(1, 1, 12).unwrap();
    Bytes::from(workbook.save_to_buffer().unwrap())
}

fn all_files() -> BTreeMap<String, BTreeSet<String>> {
    BTreeMap::new()
}

#[test]
fn loads_supported_files_and_ignores_the_rest() {
    let store = MemoryStore::new()
        .with_object("r", "a.parquet", parquet(false))
        .with_object("r", "b.xlsx", xlsx())
        .with_object("r", "c.jpg", vec![0xffu8, 0xd8, 0xff]);

    let outcome = load_batch(&store, "r", &all_files(), &mut NoProgress);

    let names: Vec<_> = outcome.dataset.names().collect();
    assert_eq!(names, vec!["a.parquet", "b.xlsx"]);
    assert_eq!(
        outcome.dataset.timestamps().keys().collect::<Vec<_>>(),
        vec!["a.parquet", "b.xlsx"]
    );
    assert!(!store.fetched().contains(&"c.jpg".to_string()));
    assert!(outcome.diagnostics.is_empty());

    let table = outcome.dataset.get("a.parquet").unwrap();
    assert_eq!(table.num_rows(), 2);
    // Normalized: native integers become plain ones.
    assert_eq!(table.column("legajo").unwrap().values[0], Value::Int(10));

    let sheet = outcome.dataset.get("b.xlsx").unwrap();
    assert_eq!(sheet.column("puestos").unwrap().values[0], Value::Int(12));
}

#[test]
fn out_of_range_timestamp_still_loads() {
    let store = MemoryStore::new().with_object("r", "d.parquet", parquet(true));
    let outcome = load_batch(&store, "r", &all_files(), &mut NoProgress);

    assert!(outcome.diagnostics.is_empty());
    let table = outcome.dataset.get("d.parquet").expect("d.parquet loaded");
    let column = table.column("fecha_alta").unwrap();
    assert_ne!(column.kind, ColumnKind::DateTime);
    assert_eq!(column.values[0].to_string(), "2500-01-01 00:00:00");
}

#[test]
fn one_failed_fetch_does_not_abort_the_batch() {
    let store = MemoryStore::new()
        .with_failing_object("r", "reportes/a.parquet")
        .with_object("r", "reportes/b.parquet", parquet(false));

    let outcome = load_batch(&store, "r", &all_files(), &mut NoProgress);

    assert!(outcome.dataset.contains("b.parquet"));
    assert!(!outcome.dataset.contains("a.parquet"));
    let diagnostic = &outcome.diagnostics.entries()[0];
    assert_eq!(diagnostic.severity, Severity::Error);
    assert_eq!(diagnostic.stage, Stage::Fetch);
}

#[test]
fn empty_bucket_is_not_an_error() {
    let store = MemoryStore::new().with_bucket("r");
    let outcome = load_batch(&store, "r", &all_files(), &mut NoProgress);
    assert!(outcome.dataset.tables().is_empty());
    assert!(outcome.dataset.timestamps().is_empty());
    assert!(outcome.diagnostics.is_empty());
}

#[test]
fn corrupt_file_is_one_warning_and_excluded() {
    let mut truncated = parquet(false).to_vec();
    truncated.truncate(truncated.len() / 2);
    let store = MemoryStore::new()
        .with_object("r", "x.parquet", truncated)
        .with_object("r", "y.xlsx", xlsx());

    let outcome = load_batch(&store, "r", &all_files(), &mut NoProgress);

    assert_eq!(outcome.dataset.names().collect::<Vec<_>>(), vec!["y.xlsx"]);
    assert_eq!(outcome.diagnostics.len(), 1);
    let warning = &outcome.diagnostics.entries()[0];
    assert_eq!(warning.severity, Severity::Warning);
    assert_eq!(warning.stage, Stage::Decode);
    assert!(warning.message.contains("x.parquet"));
}
