use super::model::{NativeScalar, Table, Value};

// ---------------------------------------------------------------------------
// Type normalizer
// ---------------------------------------------------------------------------

/// Replace engine-native cells in every numeric column with portable scalars.
///
/// Non-numeric columns are left exactly as they are. Running it twice is the
/// same as running it once.
pub fn normalize(table: &mut Table) {
    if table.is_empty() {
        return;
    }
    for column in table.columns_mut() {
        if !column.kind.is_numeric() {
            continue;
        }
        for value in &mut column.values {
            if matches!(value, Value::Native(_)) {
                *value = coerce_value(value);
            }
        }
    }
}

/// Owned variant of [`normalize`].
pub fn normalized(mut table: Table) -> Table {
    normalize(&mut table);
    table
}

/// Element-wise coercion of a single cell. Anything that is not an
/// engine-native cell is returned unchanged.
pub fn coerce_value(value: &Value) -> Value {
    match value {
        Value::Native(native) => coerce_native(native),
        other => other.clone(),
    }
}

fn coerce_native(native: &NativeScalar) -> Value {
    match native {
        NativeScalar::Int8(v) => Value::Int(i64::from(*v)),
        NativeScalar::Int16(v) => Value::Int(i64::from(*v)),
        NativeScalar::Int32(v) => Value::Int(i64::from(*v)),
        NativeScalar::Int64(v) => Value::Int(*v),
        NativeScalar::UInt8(v) => Value::Int(i64::from(*v)),
        NativeScalar::UInt16(v) => Value::Int(i64::from(*v)),
        NativeScalar::UInt32(v) => Value::Int(i64::from(*v)),
        // Only values past i64::MAX keep the unsigned representation.
        NativeScalar::UInt64(v) => i64::try_from(*v).map_or(Value::UInt(*v), Value::Int),
        NativeScalar::Float32(v) => Value::Float(f64::from(*v)),
        NativeScalar::Float64(v) => Value::Float(*v),
        NativeScalar::Boolean(b) => Value::Bool(*b),
        NativeScalar::Array(items) => Value::List(items.iter().map(coerce_value).collect()),
    }
}
