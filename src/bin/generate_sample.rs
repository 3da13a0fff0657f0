//! Writes a small local bucket for trying `tablero --local-root`:
//!
//! ```text
//! <out>/repositorio-dashboard/
//!     cba/VT_ALUMNOS_EN_CURSOS.parquet      (one enrolment dated year 2500)
//!     desarrollo_emprendedor.csv
//!     LOCALIDAD CIRCUITO ELECTORAL GEO Y ELECTORES - USAR.txt   (';' separated)
//!     capa_departamentos_2010.geojson
//!     logo.png                              (ignored by the loader)
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Float64Builder, Int32Array, Int64Array, ListBuilder, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use serde_json::json;

const BUCKET: &str = "repositorio-dashboard";

const DEPARTAMENTOS: [(&str, f64, f64); 5] = [
    ("Capital", -64.18, -31.42),
    ("Colón", -64.05, -31.10),
    ("Punilla", -64.50, -31.25),
    ("Río Cuarto", -64.35, -33.13),
    ("San Justo", -62.55, -31.20),
];

/// splitmix64; deterministic so every run writes the same files.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }

    fn unit(&mut self) -> f64 {
        (self.next() >> 11) as f64 / (1u64 << 53) as f64
    }
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

fn write_enrolments(path: &Path, rng: &mut Rng) {
    const ROWS: usize = 40;
    const COURSES: [&str; 4] = ["Programación", "Oficios", "Idiomas", "Gastronomía"];
    // 2024-03-01T00:00:00Z
    const BASE_MICROS: i64 = 1_709_251_200_000_000;
    // 2500-01-01T00:00:00Z, beyond what a nanosecond timestamp can hold.
    const FAR_FUTURE_MICROS: i64 = 16_725_225_600_000_000;

    let ids: Vec<i64> = (1..=ROWS as i64).collect();
    let courses: Vec<&str> = (0..ROWS).map(|_| COURSES[rng.below(4) as usize]).collect();
    let departments: Vec<&str> = (0..ROWS)
        .map(|_| DEPARTAMENTOS[rng.below(DEPARTAMENTOS.len() as u64) as usize].0)
        .collect();
    let ages: Vec<Option<i32>> = (0..ROWS)
        .map(|i| if i % 9 == 0 { None } else { Some(16 + rng.below(45) as i32) })
        .collect();
    let enrolled: Vec<Option<i64>> = (0..ROWS)
        .map(|i| match i {
            7 => Some(FAR_FUTURE_MICROS),
            13 => None,
            _ => Some(BASE_MICROS + rng.below(180 * 86_400) as i64 * 1_000_000),
        })
        .collect();

    let mut grades = ListBuilder::new(Float64Builder::new());
    for _ in 0..ROWS {
        for _ in 0..rng.below(4) {
            grades.values().append_value((rng.unit() * 100.0).round() / 10.0);
        }
        grades.append(true);
    }

    let schema = Arc::new(Schema::new(vec![
        Field::new("id_alumno", DataType::Int64, false),
        Field::new("curso", DataType::Utf8, false),
        Field::new("departamento", DataType::Utf8, false),
        Field::new("edad", DataType::Int32, true),
        Field::new(
            "fecha_inscripcion",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            true,
        ),
        Field::new(
            "notas",
            DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
            true,
        ),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(ids)),
            Arc::new(StringArray::from(courses)),
            Arc::new(StringArray::from(departments)),
            Arc::new(Int32Array::from(ages)),
            Arc::new(TimestampMicrosecondArray::from(enrolled).with_timezone("UTC")),
            Arc::new(grades.finish()),
        ],
    )
    .expect("Failed to create RecordBatch");

    let file = fs::File::create(path).expect("Failed to create parquet file");
    let mut writer = ArrowWriter::try_new(file, schema, None).expect("Failed to create writer");
    writer.write(&batch).expect("Failed to write batch");
    writer.close().expect("Failed to close writer");
}

fn write_ventures(path: &Path, rng: &mut Rng) {
    const SECTORS: [&str; 3] = ["Comercio", "Servicios", "Producción"];
    let mut writer = csv::Writer::from_path(path).expect("Failed to create csv file");
    writer
        .write_record(["id", "sector", "departamento", "monto", "activo"])
        .expect("Failed to write header");
    for id in 1..=25 {
        let dept = DEPARTAMENTOS[rng.below(DEPARTAMENTOS.len() as u64) as usize].0;
        let amount = format!("{:.2}", 50_000.0 + rng.unit() * 450_000.0);
        let active = if rng.below(5) == 0 { "False" } else { "True" };
        writer
            .write_record([
                id.to_string().as_str(),
                SECTORS[rng.below(3) as usize],
                dept,
                amount.as_str(),
                active,
            ])
            .expect("Failed to write row");
    }
    writer.flush().expect("Failed to flush csv");
}

fn write_circuits(path: &Path, rng: &mut Rng) {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .expect("Failed to create txt file");
    writer
        .write_record(["localidad", "circuito", "electores", "latitud", "longitud"])
        .expect("Failed to write header");
    for (n, (name, lon, lat)) in DEPARTAMENTOS.iter().enumerate() {
        let voters = 5_000 + rng.below(200_000);
        writer
            .write_record([
                name.to_string(),
                format!("{:04}", n + 1),
                voters.to_string(),
                format!("{lat:.4}"),
                format!("{lon:.4}"),
            ])
            .expect("Failed to write row");
    }
    writer.flush().expect("Failed to flush txt");
}

fn write_departments(path: &Path) {
    let features: Vec<_> = DEPARTAMENTOS
        .iter()
        .enumerate()
        .map(|(n, (name, lon, lat))| {
            let d = 0.2;
            json!({
                "type": "Feature",
                "properties": {"departamento": name, "codigo": format!("{:03}", n + 1)},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[
                        [lon - d, lat - d], [lon + d, lat - d], [lon + d, lat + d],
                        [lon - d, lat + d], [lon - d, lat - d]
                    ]]
                }
            })
        })
        .collect();
    let collection = json!({"type": "FeatureCollection", "features": features});
    let text = serde_json::to_string_pretty(&collection).expect("Failed to serialize geojson");
    fs::write(path, text).expect("Failed to write geojson");
}

fn main() {
    let out = std::env::args().nth(1).unwrap_or_else(|| "sample_bucket".to_string());
    let bucket = Path::new(&out).join(BUCKET);
    fs::create_dir_all(bucket.join("cba")).expect("Failed to create bucket directory");

    let mut rng = Rng(42);
    write_enrolments(&bucket.join("cba").join("VT_ALUMNOS_EN_CURSOS.parquet"), &mut rng);
    write_ventures(&bucket.join("desarrollo_emprendedor.csv"), &mut rng);
    write_circuits(
        &bucket.join("LOCALIDAD CIRCUITO ELECTORAL GEO Y ELECTORES - USAR.txt"),
        &mut rng,
    );
    write_departments(&bucket.join("capa_departamentos_2010.geojson"));
    fs::write(bucket.join("logo.png"), [0x89, b'P', b'N', b'G']).expect("Failed to write png");

    println!("Wrote sample bucket to {}", bucket.display());
    println!("Try: tablero --local-root {out}");
}
