use std::io::Cursor;
use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
use chrono::{Local, NaiveDateTime};
use geojson::{GeoJson, Geometry, JsonObject};
use serde_json::Value as JsonValue;

use super::columnar::read_columnar;
use super::diagnostics::{panic_message, Diagnostics, Stage};
use super::model::{Column, ColumnKind, LoadedTable, Table, Value};
use super::normalize::normalized;

/// Every suffix the batch loader will fetch.
pub const SUPPORTED_SUFFIXES: [&str; 5] = [".parquet", ".csv", ".geojson", ".txt", ".xlsx"];

/// Name of the geometry column in tables decoded from GeoJSON.
pub const GEOMETRY_COLUMN: &str = "geometry";

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Columnar,
    Spreadsheet,
    Delimited,
    GeoJson,
}

impl FileFormat {
    /// Case-sensitive suffix dispatch, checked in priority order.
    pub fn detect(file_name: &str) -> Option<Self> {
        if file_name.ends_with(".parquet") {
            Some(FileFormat::Columnar)
        } else if file_name.ends_with(".xlsx") {
            Some(FileFormat::Spreadsheet)
        } else if file_name.ends_with(".csv") || file_name.ends_with(".txt") {
            Some(FileFormat::Delimited)
        } else if file_name.ends_with(".geojson") {
            Some(FileFormat::GeoJson)
        } else {
            None
        }
    }
}

/// Whether the batch loader should fetch an object with this name.
pub fn is_supported(object_name: &str) -> bool {
    SUPPORTED_SUFFIXES.iter().any(|ext| object_name.ends_with(ext))
}

/// Parse one file. Dispatch by suffix.
///
/// * `.parquet`        – columnar fallback reader, then type normalization
/// * `.xlsx`           – first worksheet, first row is the header
/// * `.csv` / `.txt`   – delimited text with header, delimiter inferred
/// * `.geojson`        – features as rows plus a `geometry` column
///
/// An unknown suffix yields `None` silently. A decode failure yields `None`
/// and exactly one warning naming the file; it never propagates.
pub fn parse(file_name: &str, content: Bytes, diagnostics: &mut Diagnostics) -> Option<LoadedTable> {
    let format = FileFormat::detect(file_name)?;

    let outcome = catch_unwind(AssertUnwindSafe(|| decode(format, content)))
        .unwrap_or_else(|panic| Err(anyhow!("decoder panicked: {}", panic_message(&*panic))));

    match outcome {
        Ok(table) => Some(LoadedTable {
            table,
            loaded_at: Local::now(),
        }),
        Err(e) => {
            diagnostics.warn(
                Stage::Decode,
                Some(file_name),
                format!("error processing {file_name}: {e:#}"),
            );
            None
        }
    }
}

/// Decode raw bytes as `format`.
pub fn decode(format: FileFormat, content: Bytes) -> Result<Table> {
    match format {
        FileFormat::Columnar => {
            let table = read_columnar(&content).context("reading parquet")?;
            Ok(normalized(table))
        }
        FileFormat::Spreadsheet => load_spreadsheet(content),
        FileFormat::Delimited => load_delimited(&content),
        FileFormat::GeoJson => load_geojson(&content),
    }
}

// ---------------------------------------------------------------------------
// Spreadsheet loader
// ---------------------------------------------------------------------------

/// First worksheet only. The first row holds column names; integral numbers
/// come back as integers, dates as date/times, error cells as nulls.
fn load_spreadsheet(content: Bytes) -> Result<Table> {
    let mut workbook: Xlsx<_> =
        open_workbook_from_rs(Cursor::new(content)).context("opening workbook")?;
    let range = workbook
        .worksheet_range_at(0)
        .context("workbook has no worksheets")?
        .context("reading first worksheet")?;

    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        bail!("no columns to parse from worksheet");
    };
    let headers = unique_headers(header.iter().map(|c| match c {
        Data::Empty => String::new(),
        other => other.to_string(),
    }));

    let mut cells: Vec<Vec<Value>> = vec![Vec::new(); headers.len()];
    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            if let Some(column) = cells.get_mut(idx) {
                column.push(spreadsheet_cell(cell));
            }
        }
    }

    let columns = headers
        .into_iter()
        .zip(cells)
        .map(|(name, values)| Column::inferred(name, values))
        .collect();
    Ok(Table::from_columns(columns)?)
}

fn spreadsheet_cell(cell: &Data) -> Value {
    match cell {
        Data::Int(i) => Value::Int(*i),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 => {
            Value::Int(*f as i64)
        }
        Data::Float(f) => Value::Float(*f),
        Data::String(s) if s.is_empty() => Value::Null,
        Data::String(s) => Value::Text(s.clone()),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => dt.as_datetime().map_or(Value::Null, Value::DateTime),
        Data::DateTimeIso(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .map_or_else(|_| Value::Text(s.clone()), Value::DateTime),
        Data::DurationIso(s) => Value::Text(s.clone()),
        Data::Error(_) | Data::Empty => Value::Null,
    }
}

// ---------------------------------------------------------------------------
// Delimited text loader
// ---------------------------------------------------------------------------

const DELIMITER_CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Header row required. The delimiter is whichever candidate appears most
/// often in the header line (`,` when none does).
fn load_delimited(content: &[u8]) -> Result<Table> {
    let content = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(content);
    let delimiter = sniff_delimiter(content);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(content);

    let headers = unique_headers(
        reader
            .headers()
            .context("reading header row")?
            .iter()
            .map(str::to_string),
    );
    if headers.is_empty() {
        bail!("no columns to parse from file");
    }
    let width = headers.len();

    let records = reader
        .records()
        .enumerate()
        .map(|(row_no, r)| r.with_context(|| format!("row {}", row_no + 2)))
        .collect::<Result<Vec<_>>>()?;
    let mut raw: Vec<Vec<&str>> = vec![Vec::with_capacity(records.len()); width];
    for (row_no, record) in records.iter().enumerate() {
        if record.len() > width {
            bail!(
                "row {}: expected {width} fields, saw {}",
                row_no + 2,
                record.len()
            );
        }
        // Short rows are padded with empty fields, which read as null.
        for (idx, column) in raw.iter_mut().enumerate() {
            column.push(record.get(idx).unwrap_or(""));
        }
    }

    let columns = headers
        .into_iter()
        .zip(raw)
        .map(|(name, fields)| text_column(name, &fields))
        .collect();
    Ok(Table::from_columns(columns)?)
}

fn sniff_delimiter(content: &[u8]) -> u8 {
    let first_line = content.split(|b| *b == b'\n').next().unwrap_or_default();
    let mut best = (b',', 0usize);
    for candidate in DELIMITER_CANDIDATES {
        let count = first_line.iter().filter(|b| **b == candidate).count();
        if count > best.1 {
            best = (candidate, count);
        }
    }
    best.0
}

/// Type a column of raw text fields. A column whose fields do not agree on a
/// type stays text.
fn text_column(name: String, fields: &[&str]) -> Column {
    let column = Column::inferred(name, fields.iter().map(|f| guess_cell(f)).collect());
    if column.kind != ColumnKind::Object || column.values.iter().all(Value::is_null) {
        return column;
    }
    let values = fields
        .iter()
        .map(|f| {
            if f.is_empty() {
                Value::Null
            } else {
                Value::Text((*f).to_string())
            }
        })
        .collect();
    Column::new(column.name, ColumnKind::Text, values)
}

fn guess_cell(s: &str) -> Value {
    if s.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return Value::Float(f);
    }
    match s {
        "true" | "True" | "TRUE" => Value::Bool(true),
        "false" | "False" | "FALSE" => Value::Bool(false),
        _ => Value::Text(s.to_string()),
    }
}

/// Blank names become `Unnamed: <index>`; repeated names get `.1`, `.2`, ...
fn unique_headers(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for (idx, name) in names.enumerate() {
        let base = if name.is_empty() {
            format!("Unnamed: {idx}")
        } else {
            name
        };
        let mut candidate = base.clone();
        let mut n = 1;
        while out.contains(&candidate) {
            candidate = format!("{base}.{n}");
            n += 1;
        }
        out.push(candidate);
    }
    out
}

// ---------------------------------------------------------------------------
// GeoJSON loader
// ---------------------------------------------------------------------------

/// One row per feature: property columns in first-seen order, then the
/// geometry column.
fn load_geojson(content: &[u8]) -> Result<Table> {
    let text = std::str::from_utf8(content).context("GeoJSON is not valid UTF-8")?;
    let geojson: GeoJson = text.parse().context("parsing GeoJSON")?;

    let features: Vec<(Option<JsonObject>, Option<Geometry>)> = match geojson {
        GeoJson::FeatureCollection(fc) => fc
            .features
            .into_iter()
            .map(|f| (f.properties, f.geometry))
            .collect(),
        GeoJson::Feature(f) => vec![(f.properties, f.geometry)],
        GeoJson::Geometry(g) => vec![(None, Some(g))],
    };

    let mut names: Vec<String> = Vec::new();
    for props in features.iter().filter_map(|(p, _)| p.as_ref()) {
        for key in props.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
    }

    let mut columns: Vec<Column> = names
        .into_iter()
        .map(|name| {
            let values = features
                .iter()
                .map(|(props, _)| {
                    props
                        .as_ref()
                        .and_then(|p| p.get(&name))
                        .map_or(Value::Null, json_to_value)
                })
                .collect();
            Column::inferred(name, values)
        })
        .collect();

    let geometries = features
        .into_iter()
        .map(|(_, g)| g.map_or(Value::Null, Value::Geometry))
        .collect();
    columns.push(Column::new(GEOMETRY_COLUMN, ColumnKind::Geometry, geometries));

    Ok(Table::from_columns(columns)?.with_geometry(GEOMETRY_COLUMN)?)
}

fn json_to_value(val: &JsonValue) -> Value {
    match val {
        JsonValue::String(s) => Value::Text(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInt(u)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                Value::Text(n.to_string())
            }
        }
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Null => Value::Null,
        other => Value::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Float32Array, Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;
    use rust_xlsxwriter::Workbook;

    use super::*;
    use crate::data::diagnostics::Severity;

    fn parquet_bytes() -> Bytes {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("score", DataType::Float32, true),
            Field::new("city", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(Float32Array::from(vec![Some(0.5), None])),
                Arc::new(StringArray::from(vec!["Córdoba", "Río Cuarto"])),
            ],
        )
        .unwrap();
        let mut buf = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buf, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
        Bytes::from(buf)
    }

    fn xlsx_bytes() -> Bytes {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "program").unwrap();
        sheet.write_string(0, 1, "enrolled").unwrap();
        sheet.write_string(0, 2, "active").unwrap();
        sheet.write_string(1, 0, "PPP").unwrap();
        sheet.write_number(1, 1, 120).unwrap();
        sheet.write_boolean(1, 2, true).unwrap();
        sheet.write_string(2, 0, "MAS26").unwrap();
        sheet.write_number(2, 1, 80.5).unwrap();
        sheet.write_boolean(2, 2, false).unwrap();
        Bytes::from(workbook.save_to_buffer().unwrap())
    }

    const GEOJSON: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"departamento": "Capital", "poblacion": 1329604},
             "geometry": {"type": "Point", "coordinates": [-64.18, -31.42]}},
            {"type": "Feature", "properties": {"departamento": "Colón", "codigo": "013"},
             "geometry": null}
        ]
    }"#;

    #[test]
    fn detect_is_case_sensitive_and_ordered() {
        assert_eq!(FileFormat::detect("a.parquet"), Some(FileFormat::Columnar));
        assert_eq!(FileFormat::detect("a.xlsx"), Some(FileFormat::Spreadsheet));
        assert_eq!(FileFormat::detect("a.txt"), Some(FileFormat::Delimited));
        assert_eq!(FileFormat::detect("a.geojson"), Some(FileFormat::GeoJson));
        assert_eq!(FileFormat::detect("a.CSV"), None);
        assert_eq!(FileFormat::detect("a.json"), None);
        assert!(is_supported("dir/x.txt"));
        assert!(!is_supported("c.jpg"));
    }

    #[test]
    fn parquet_is_normalized() {
        let mut diags = Diagnostics::new();
        let loaded = parse("VT_ALUMNOS.parquet", parquet_bytes(), &mut diags).unwrap();
        assert!(diags.is_empty());
        let table = &loaded.table;
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.column("id").unwrap().values[0], Value::Int(1));
        assert_eq!(table.column("score").unwrap().values[0], Value::Float(0.5));
        assert_eq!(table.column("score").unwrap().values[1], Value::Null);
        assert_eq!(
            table.column("city").unwrap().values[1],
            Value::Text("Río Cuarto".into())
        );
    }

    #[test]
    fn spreadsheet_reads_first_sheet() {
        let mut diags = Diagnostics::new();
        let loaded = parse("ppp_jesi.xlsx", xlsx_bytes(), &mut diags).unwrap();
        assert!(diags.is_empty());
        let table = &loaded.table;
        assert_eq!(table.column_names(), vec!["program", "enrolled", "active"]);
        let enrolled = table.column("enrolled").unwrap();
        assert_eq!(enrolled.kind, ColumnKind::Float);
        assert_eq!(enrolled.values, vec![Value::Float(120.0), Value::Float(80.5)]);
        assert_eq!(table.column("active").unwrap().kind, ColumnKind::Bool);
    }

    #[test]
    fn csv_types_columns() {
        let csv = "id,name,amount,flag\n1,Ana,10.5,true\n2,,3,false\n";
        let mut diags = Diagnostics::new();
        let loaded = parse("desarrollo_emprendedor.csv", Bytes::from(csv), &mut diags).unwrap();
        let table = &loaded.table;
        assert_eq!(table.column("id").unwrap().kind, ColumnKind::Int);
        assert_eq!(table.column("name").unwrap().values[1], Value::Null);
        assert_eq!(
            table.column("amount").unwrap().values,
            vec![Value::Float(10.5), Value::Float(3.0)]
        );
        assert_eq!(table.column("flag").unwrap().kind, ColumnKind::Bool);
    }

    #[test]
    fn txt_with_semicolons_and_bom() {
        let txt = "\u{feff}LOCALIDAD;ELECTORES\nCórdoba;100\nJesús María;7\n";
        let mut diags = Diagnostics::new();
        let loaded = parse("LOCALIDAD.txt", Bytes::from(txt), &mut diags).unwrap();
        let table = &loaded.table;
        assert_eq!(table.column_names(), vec!["LOCALIDAD", "ELECTORES"]);
        assert_eq!(table.column("ELECTORES").unwrap().values[1], Value::Int(7));
    }

    #[test]
    fn mixed_csv_column_stays_text() {
        let csv = "code\n013\nA1\n";
        let table = decode(FileFormat::Delimited, Bytes::from(csv)).unwrap();
        let code = table.column("code").unwrap();
        assert_eq!(code.kind, ColumnKind::Text);
        assert_eq!(code.values[0], Value::Text("013".into()));
    }

    #[test]
    fn short_rows_are_padded_with_nulls() {
        let mut diags = Diagnostics::new();
        let loaded = parse("x.csv", Bytes::from("a,b\n1,2\n3\n"), &mut diags).unwrap();
        assert!(diags.is_empty());
        let table = &loaded.table;
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.column("a").unwrap().values, vec![Value::Int(1), Value::Int(3)]);
        assert_eq!(table.column("b").unwrap().values, vec![Value::Int(2), Value::Null]);
    }

    #[test]
    fn header_whitespace_is_kept() {
        let table = decode(FileFormat::Delimited, Bytes::from("id; monto\n1;2\n")).unwrap();
        assert_eq!(table.column_names(), vec!["id", " monto"]);
    }

    #[test]
    fn headers_are_made_unique() {
        let csv = "a,a,\n1,2,3\n";
        let table = decode(FileFormat::Delimited, Bytes::from(csv)).unwrap();
        assert_eq!(table.column_names(), vec!["a", "a.1", "Unnamed: 2"]);
    }

    #[test]
    fn geojson_has_geometry_column() {
        let mut diags = Diagnostics::new();
        let loaded = parse("capa_departamentos_2010.geojson", Bytes::from(GEOJSON), &mut diags)
            .unwrap();
        let table = &loaded.table;
        assert!(table.is_geospatial());
        assert_eq!(table.geometry_column(), Some("geometry"));
        assert_eq!(
            table.column_names(),
            vec!["departamento", "poblacion", "codigo", "geometry"]
        );
        assert_eq!(table.column("poblacion").unwrap().values[1], Value::Null);
        let geometry = table.column("geometry").unwrap();
        assert!(matches!(geometry.values[0], Value::Geometry(_)));
        assert_eq!(geometry.values[1], Value::Null);
    }

    #[test]
    fn bare_geometry_is_one_row() {
        let table = decode(
            FileFormat::GeoJson,
            Bytes::from(r#"{"type": "Point", "coordinates": [1.0, 2.0]}"#),
        )
        .unwrap();
        assert_eq!(table.num_rows(), 1);
        assert_eq!(table.column_names(), vec!["geometry"]);
    }

    #[test]
    fn unsupported_suffix_is_silent() {
        let mut diags = Diagnostics::new();
        assert!(parse("c.jpg", Bytes::from_static(b"\xff\xd8"), &mut diags).is_none());
        assert!(diags.is_empty());
    }

    #[test]
    fn malformed_files_emit_one_warning_each() {
        let cases: [(&str, &[u8]); 4] = [
            ("broken.parquet", b"PAR1 nope"),
            ("broken.xlsx", b"not a zip"),
            ("broken.csv", b"a,b\n1,2,3\n"),
            ("broken.geojson", b"{\"type\": \"Nope\"}"),
        ];
        for (name, bytes) in cases {
            let mut diags = Diagnostics::new();
            assert!(parse(name, Bytes::copy_from_slice(bytes), &mut diags).is_none(), "{name}");
            assert_eq!(diags.len(), 1, "{name}");
            let entry = &diags.entries()[0];
            assert_eq!(entry.severity, Severity::Warning);
            assert_eq!(entry.file.as_deref(), Some(name));
            assert!(entry.message.contains(name));
        }
    }

    #[test]
    fn empty_delimited_file_is_a_decode_failure() {
        let mut diags = Diagnostics::new();
        assert!(parse("empty.csv", Bytes::new(), &mut diags).is_none());
        assert_eq!(diags.warnings().count(), 1);
    }
}
