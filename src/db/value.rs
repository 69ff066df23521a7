//! Row-to-JSON decoding for the relational backends.
//!
//! Column types are first classified into a logical category, then decoded
//! with the category's preferred Rust type. MySQL and PostgreSQL report
//! static column types, so classification drives decoding; SQLite's type
//! system is dynamic, so its decoder walks a progressive fallback chain
//! instead.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Map, Value as JsonValue};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo};

/// Logical category for a column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    DateTime,
    Json,
    Binary,
    Text,
    Unknown,
}

/// Classify a driver-reported type name.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal first: "numeric" would otherwise be caught by the float check
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }
    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }
    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }
    if lower.contains("timestamp") || lower.contains("date") || lower.contains("time") {
        return TypeCategory::DateTime;
    }
    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }
    if lower.contains("char") || lower.contains("text") {
        return TypeCategory::Text;
    }
    TypeCategory::Unknown
}

/// DECIMAL/NUMERIC values decoded as their exact text representation.
/// Avoids lossy float conversion without pulling in a decimal crate.
struct RawDecimal(String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

fn binary_to_json(bytes: Vec<u8>) -> JsonValue {
    match String::from_utf8(bytes) {
        Ok(text) => JsonValue::String(text),
        Err(e) => JsonValue::String(STANDARD.encode(e.as_bytes())),
    }
}

fn float_to_json(f: f64) -> JsonValue {
    serde_json::Number::from_f64(f)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

/// Column names of a row, in ordinal order.
pub fn column_names<R: Row>(row: &R) -> Vec<String> {
    row.columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect()
}

/// Decode a MySQL row into a JSON object.
pub fn mysql_row_to_json(row: &MySqlRow) -> Map<String, JsonValue> {
    let mut map = Map::new();
    for (i, col) in row.columns().iter().enumerate() {
        let value = match categorize_type(col.type_info().name()) {
            TypeCategory::Integer => row
                .try_get::<Option<i64>, _>(i)
                .map(|v| v.map(JsonValue::from).unwrap_or(JsonValue::Null))
                // BIGINT UNSIGNED does not fit i64
                .or_else(|_| {
                    row.try_get::<Option<u64>, _>(i)
                        .map(|v| v.map(JsonValue::from).unwrap_or(JsonValue::Null))
                })
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float => row
                .try_get::<Option<f64>, _>(i)
                .ok()
                .flatten()
                .map(float_to_json)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Decimal => row
                .try_get::<Option<RawDecimal>, _>(i)
                .ok()
                .flatten()
                .map(|d| JsonValue::String(d.0))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(i)
                .ok()
                .flatten()
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::DateTime => decode_mysql_datetime(row, i),
            TypeCategory::Json => row
                .try_get::<Option<JsonValue>, _>(i)
                .ok()
                .flatten()
                .unwrap_or(JsonValue::Null),
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(i)
                .ok()
                .flatten()
                .map(binary_to_json)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Text | TypeCategory::Unknown => row
                .try_get::<Option<String>, _>(i)
                .ok()
                .flatten()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        };
        map.insert(col.name().to_string(), value);
    }
    map
}

fn decode_mysql_datetime(row: &MySqlRow, i: usize) -> JsonValue {
    if let Ok(Some(dt)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(i) {
        return JsonValue::String(dt.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(i) {
        return JsonValue::String(d.to_string());
    }
    if let Ok(Some(t)) = row.try_get::<Option<chrono::NaiveTime>, _>(i) {
        return JsonValue::String(t.to_string());
    }
    row.try_get::<Option<String>, _>(i)
        .ok()
        .flatten()
        .map(JsonValue::String)
        .unwrap_or(JsonValue::Null)
}

/// Decode a PostgreSQL row into a JSON object.
pub fn postgres_row_to_json(row: &PgRow) -> Map<String, JsonValue> {
    let mut map = Map::new();
    for (i, col) in row.columns().iter().enumerate() {
        let value = match categorize_type(col.type_info().name()) {
            TypeCategory::Integer => decode_pg_integer(row, i),
            TypeCategory::Float => row
                .try_get::<Option<f64>, _>(i)
                .ok()
                .flatten()
                .map(float_to_json)
                // float4 columns refuse an f64 decode
                .or_else(|| {
                    row.try_get::<Option<f32>, _>(i)
                        .ok()
                        .flatten()
                        .map(|f| float_to_json(f as f64))
                })
                .unwrap_or(JsonValue::Null),
            TypeCategory::Decimal => row
                .try_get::<Option<RawDecimal>, _>(i)
                .ok()
                .flatten()
                .map(|d| JsonValue::String(d.0))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(i)
                .ok()
                .flatten()
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::DateTime => decode_pg_datetime(row, i),
            TypeCategory::Json => row
                .try_get::<Option<JsonValue>, _>(i)
                .ok()
                .flatten()
                .unwrap_or(JsonValue::Null),
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(i)
                .ok()
                .flatten()
                .map(binary_to_json)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Text | TypeCategory::Unknown => row
                .try_get::<Option<String>, _>(i)
                .ok()
                .flatten()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        };
        map.insert(col.name().to_string(), value);
    }
    map
}

fn decode_pg_integer(row: &PgRow, i: usize) -> JsonValue {
    if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
        return v.map(JsonValue::from).unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(i) {
        return v.map(JsonValue::from).unwrap_or(JsonValue::Null);
    }
    row.try_get::<Option<i16>, _>(i)
        .map(|v| v.map(JsonValue::from).unwrap_or(JsonValue::Null))
        .unwrap_or(JsonValue::Null)
}

fn decode_pg_datetime(row: &PgRow, i: usize) -> JsonValue {
    if let Ok(Some(dt)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i) {
        return JsonValue::String(dt.to_rfc3339());
    }
    if let Ok(Some(dt)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(i) {
        return JsonValue::String(dt.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(i) {
        return JsonValue::String(d.to_string());
    }
    if let Ok(Some(t)) = row.try_get::<Option<chrono::NaiveTime>, _>(i) {
        return JsonValue::String(t.to_string());
    }
    JsonValue::Null
}

/// Decode a SQLite row into a JSON object.
///
/// SQLite column affinity is advisory, so every cell is decoded by
/// progressive fallback: integer, float, text, blob.
pub fn sqlite_row_to_json(row: &SqliteRow) -> Map<String, JsonValue> {
    let mut map = Map::new();
    for (i, col) in row.columns().iter().enumerate() {
        let value = if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(i) {
            JsonValue::from(v)
        } else if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(i) {
            float_to_json(v)
        } else if let Ok(Some(v)) = row.try_get::<Option<String>, _>(i) {
            JsonValue::String(v)
        } else if let Ok(Some(v)) = row.try_get::<Option<Vec<u8>>, _>(i) {
            binary_to_json(v)
        } else {
            JsonValue::Null
        };
        map.insert(col.name().to_string(), value);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_integers() {
        assert_eq!(categorize_type("INT"), TypeCategory::Integer);
        assert_eq!(categorize_type("BIGINT UNSIGNED"), TypeCategory::Integer);
        assert_eq!(categorize_type("serial"), TypeCategory::Integer);
        assert_eq!(categorize_type("TINYINT"), TypeCategory::Integer);
    }

    #[test]
    fn test_categorize_decimal_before_numeric_float() {
        assert_eq!(categorize_type("DECIMAL(10,2)"), TypeCategory::Decimal);
        assert_eq!(categorize_type("numeric"), TypeCategory::Decimal);
    }

    #[test]
    fn test_categorize_temporal() {
        assert_eq!(categorize_type("TIMESTAMPTZ"), TypeCategory::DateTime);
        assert_eq!(categorize_type("DATETIME"), TypeCategory::DateTime);
        assert_eq!(categorize_type("DATE"), TypeCategory::DateTime);
    }

    #[test]
    fn test_categorize_misc() {
        assert_eq!(categorize_type("BOOL"), TypeCategory::Boolean);
        assert_eq!(categorize_type("JSONB"), TypeCategory::Json);
        assert_eq!(categorize_type("BYTEA"), TypeCategory::Binary);
        assert_eq!(categorize_type("VARCHAR(255)"), TypeCategory::Text);
        assert_eq!(categorize_type("GEOMETRY"), TypeCategory::Unknown);
    }

    #[test]
    fn test_binary_to_json_utf8_passthrough() {
        assert_eq!(
            binary_to_json(b"hello".to_vec()),
            JsonValue::String("hello".to_string())
        );
    }

    #[test]
    fn test_binary_to_json_base64_fallback() {
        let value = binary_to_json(vec![0xff, 0xfe]);
        assert_eq!(value, JsonValue::String(STANDARD.encode([0xff, 0xfe])));
    }

    #[test]
    fn test_float_to_json_nan_is_null() {
        assert_eq!(float_to_json(f64::NAN), JsonValue::Null);
        assert_eq!(float_to_json(1.5), serde_json::json!(1.5));
    }
}
