//! Row decoding for dynamically shaped results.
//!
//! Column sets are only known once a statement has run, so every row becomes a
//! [`Row`] of JSON values. Decoding is two-phase:
//! 1. `TypeCategory` classifies the type the driver reports for the value
//! 2. Driver-specific decoders extract the value for that category
//!
//! Statements run without bind arguments, which makes MySQL and PostgreSQL
//! answer in their text formats. Anything without a dedicated category is
//! therefore read back as its textual form.

use crate::models::{Driver, Row};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row as _, Type, TypeInfo, ValueRef};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Json,
    Text,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, driver: Driver) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Checked first: "numeric" would otherwise fall through to Float below.
    if lower.contains("decimal") || lower.contains("numeric") {
        return match driver {
            Driver::Sqlite => TypeCategory::Float,
            _ => TypeCategory::Decimal,
        };
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    TypeCategory::Text
}

/// DECIMAL/NUMERIC kept as its exact textual representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

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

/// Binary values are returned base64-encoded.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Conversion of a driver row into a gateway [`Row`].
pub trait RowToJson {
    fn to_json_row(&self) -> Row;
}

/// Shared row walk: NULL check and type lookup on the raw value, then the
/// driver's decoder for the category.
macro_rules! impl_row_to_json {
    ($row:ty, $driver:expr, $decoder:path) => {
        impl RowToJson for $row {
            fn to_json_row(&self) -> Row {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let type_name = match self.try_get_raw(idx) {
                            Ok(raw) if raw.is_null() => None,
                            Ok(raw) => Some(raw.type_info().name().to_string()),
                            Err(_) => Some(col.type_info().name().to_string()),
                        };
                        let value = match type_name {
                            None => JsonValue::Null,
                            Some(name) => $decoder(self, idx, categorize_type(&name, $driver)),
                        };
                        (col.name().to_string(), value)
                    })
                    .collect()
            }
        }
    };
}

impl_row_to_json!(MySqlRow, Driver::MySql, mysql::decode_column);
impl_row_to_json!(PgRow, Driver::Postgres, postgres::decode_column);
impl_row_to_json!(SqliteRow, Driver::Sqlite, sqlite::decode_column);

/// Textual fallback that skips the driver's type check; the value is already
/// in text form for every non-binary type.
fn decode_as_text<R>(row: &R, idx: usize) -> JsonValue
where
    R: sqlx::Row,
    for<'r> String: Decode<'r, R::Database>,
    for<'r> Vec<u8>: Decode<'r, R::Database>,
    usize: sqlx::ColumnIndex<R>,
{
    if let Ok(Some(v)) = row.try_get_unchecked::<Option<String>, _>(idx) {
        return JsonValue::String(v);
    }
    row.try_get_unchecked::<Option<Vec<u8>>, _>(idx)
        .ok()
        .flatten()
        .map(|bytes| encode_binary(&bytes))
        .unwrap_or(JsonValue::Null)
}

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        let value = match category {
            TypeCategory::Decimal => row
                .try_get::<RawDecimal, _>(idx)
                .ok()
                .map(|v| JsonValue::String(v.0)),
            TypeCategory::Integer => row
                .try_get::<i64, _>(idx)
                .map(JsonValue::from)
                .or_else(|_| row.try_get::<u64, _>(idx).map(JsonValue::from))
                .ok(),
            TypeCategory::Boolean => row.try_get::<bool, _>(idx).ok().map(JsonValue::Bool),
            TypeCategory::Float => row
                .try_get::<f64, _>(idx)
                .or_else(|_| row.try_get::<f32, _>(idx).map(f64::from))
                .ok()
                .map(float_value),
            TypeCategory::Binary => row
                .try_get::<Vec<u8>, _>(idx)
                .ok()
                .map(|bytes| encode_binary(&bytes)),
            TypeCategory::Json => row.try_get::<JsonValue, _>(idx).ok(),
            TypeCategory::Text => None,
        };
        value.unwrap_or_else(|| decode_as_text(row, idx))
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        let value = match category {
            TypeCategory::Decimal => row
                .try_get::<RawDecimal, _>(idx)
                .ok()
                .map(|v| JsonValue::String(v.0)),
            TypeCategory::Integer => row
                .try_get::<i64, _>(idx)
                .or_else(|_| row.try_get::<i32, _>(idx).map(i64::from))
                .or_else(|_| row.try_get::<i16, _>(idx).map(i64::from))
                .ok()
                .map(JsonValue::from),
            TypeCategory::Boolean => row.try_get::<bool, _>(idx).ok().map(JsonValue::Bool),
            TypeCategory::Float => row
                .try_get::<f64, _>(idx)
                .or_else(|_| row.try_get::<f32, _>(idx).map(f64::from))
                .ok()
                .map(float_value),
            TypeCategory::Binary => row
                .try_get::<Vec<u8>, _>(idx)
                .ok()
                .map(|bytes| encode_binary(&bytes)),
            TypeCategory::Json => row.try_get::<JsonValue, _>(idx).ok(),
            TypeCategory::Text => None,
        };
        value.unwrap_or_else(|| decode_as_text(row, idx))
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> JsonValue {
        let value = match category {
            TypeCategory::Integer => row.try_get::<i64, _>(idx).ok().map(JsonValue::from),
            TypeCategory::Boolean => row.try_get::<bool, _>(idx).ok().map(JsonValue::Bool),
            TypeCategory::Float | TypeCategory::Decimal => {
                row.try_get::<f64, _>(idx).ok().map(float_value)
            }
            TypeCategory::Binary => row
                .try_get::<Vec<u8>, _>(idx)
                .ok()
                .map(|bytes| encode_binary(&bytes)),
            TypeCategory::Json | TypeCategory::Text => row
                .try_get::<String, _>(idx)
                .ok()
                .map(|text| match category {
                    TypeCategory::Json => {
                        serde_json::from_str(&text).unwrap_or(JsonValue::String(text))
                    }
                    _ => JsonValue::String(text),
                }),
        };
        value.unwrap_or_else(|| decode_as_text(row, idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(categorize_type("INT", Driver::MySql), TypeCategory::Integer);
        assert_eq!(
            categorize_type("BIGINT UNSIGNED", Driver::MySql),
            TypeCategory::Integer
        );
        assert_eq!(categorize_type("INT8", Driver::Postgres), TypeCategory::Integer);
        assert_eq!(categorize_type("INTEGER", Driver::Sqlite), TypeCategory::Integer);
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(categorize_type("DECIMAL", Driver::MySql), TypeCategory::Decimal);
        assert_eq!(categorize_type("NUMERIC", Driver::Postgres), TypeCategory::Decimal);
        // SQLite NUMERIC is a float
        assert_eq!(categorize_type("numeric", Driver::Sqlite), TypeCategory::Float);
    }

    #[test]
    fn test_categorize_type_other() {
        assert_eq!(categorize_type("BOOLEAN", Driver::MySql), TypeCategory::Boolean);
        assert_eq!(categorize_type("jsonb", Driver::Postgres), TypeCategory::Json);
        assert_eq!(categorize_type("BLOB", Driver::Sqlite), TypeCategory::Binary);
        assert_eq!(categorize_type("DOUBLE", Driver::MySql), TypeCategory::Float);
        assert_eq!(categorize_type("VARCHAR", Driver::MySql), TypeCategory::Text);
        assert_eq!(categorize_type("TIMESTAMPTZ", Driver::Postgres), TypeCategory::Text);
    }

    #[test]
    fn test_encode_binary() {
        assert_eq!(
            encode_binary(b"hello world"),
            JsonValue::String("aGVsbG8gd29ybGQ=".to_string())
        );
        assert_eq!(encode_binary(&[]), JsonValue::String(String::new()));
    }

    #[test]
    fn test_float_value_non_finite_becomes_string() {
        assert_eq!(float_value(1.5), serde_json::json!(1.5));
        assert_eq!(float_value(f64::NAN), JsonValue::String("NaN".to_string()));
    }
}
