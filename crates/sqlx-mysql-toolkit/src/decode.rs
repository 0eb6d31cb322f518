use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlValueRef};
use sqlx::{Column, Row as _, TypeInfo, Value, ValueRef};
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

use crate::Error;
use crate::client::Row;

/// Convert a MySQL row into a column-ordered JSON map.
pub fn row_to_json(row: &MySqlRow) -> Result<Row, Error> {
   let mut value = IndexMap::with_capacity(row.columns().len());
   for (i, column) in row.columns().iter().enumerate() {
      let v = row.try_get_raw(i)?;
      value.insert(column.name().to_string(), to_json(v)?);
   }
   Ok(value)
}

/// Convert a MySQL value to a JSON value.
///
/// Integers keep their signedness, DECIMAL is returned as a string to avoid
/// losing precision, temporal types are rendered as ISO 8601 strings and
/// binary columns are base64-encoded since JSON has no native binary type.
pub fn to_json(value: MySqlValueRef) -> Result<JsonValue, Error> {
   if value.is_null() {
      return Ok(JsonValue::Null);
   }

   let column_type = value.type_info();
   let owned = ValueRef::to_owned(&value);

   let result = match column_type.name() {
      "BOOLEAN" => owned
         .try_decode::<bool>()
         .map(JsonValue::Bool)
         .unwrap_or(JsonValue::Null),

      "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => owned
         .try_decode::<i64>()
         .map(JsonValue::from)
         .unwrap_or(JsonValue::Null),

      "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
      | "BIGINT UNSIGNED" => owned
         .try_decode::<u64>()
         .map(JsonValue::from)
         .unwrap_or(JsonValue::Null),

      "FLOAT" => owned
         .try_decode::<f32>()
         .map(|v| JsonValue::from(f64::from(v)))
         .unwrap_or(JsonValue::Null),

      "DOUBLE" => owned
         .try_decode::<f64>()
         .map(JsonValue::from)
         .unwrap_or(JsonValue::Null),

      // Sent as text on the wire; keep it exact
      "DECIMAL" => owned
         .try_decode_unchecked::<String>()
         .map(JsonValue::String)
         .unwrap_or(JsonValue::Null),

      "CHAR" | "VARCHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET" => {
         owned
            .try_decode::<String>()
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null)
      }

      "DATE" => owned
         .try_decode::<Date>()
         .map(|d| JsonValue::String(d.to_string()))
         .unwrap_or(JsonValue::Null),

      "TIME" => owned
         .try_decode::<Time>()
         .map(|t| JsonValue::String(t.to_string()))
         .unwrap_or(JsonValue::Null),

      "DATETIME" => owned
         .try_decode::<PrimitiveDateTime>()
         .map(|dt| JsonValue::String(dt.to_string()))
         .unwrap_or(JsonValue::Null),

      "TIMESTAMP" => owned
         .try_decode::<OffsetDateTime>()
         .map(|dt| JsonValue::String(dt.to_string()))
         .unwrap_or(JsonValue::Null),

      "JSON" => owned.try_decode::<JsonValue>().unwrap_or(JsonValue::Null),

      "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" => owned
         .try_decode_unchecked::<Vec<u8>>()
         .map(|blob| JsonValue::String(base64_encode(&blob)))
         .unwrap_or(JsonValue::Null),

      "NULL" => JsonValue::Null,

      _ => {
         // For unknown types (YEAR, GEOMETRY, ...), try to decode as text
         if let Ok(text) = owned.try_decode_unchecked::<String>() {
            JsonValue::String(text)
         } else {
            return Err(Error::UnsupportedDatatype(format!(
               "Unknown MySQL type: {}",
               column_type.name()
            )));
         }
      }
   };

   Ok(result)
}

/// Base64 encode binary data for JSON serialization.
fn base64_encode(data: &[u8]) -> String {
   use base64::Engine;
   base64::engine::general_purpose::STANDARD.encode(data)
}
