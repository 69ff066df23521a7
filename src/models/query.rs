//! Query parameters and results.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Render as a plain string argument for backends that take text
    /// arguments (the key-value dispatcher).
    pub fn as_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Self::Int(n) => n.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => s.clone(),
            Self::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Result of a single statement execution.
///
/// Statement-level failures are captured here (`success: false`, `error`
/// populated), never thrown: batch callers need the per-statement outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    /// Populated for write statements; None for row-returning statements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    pub row_count: usize,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    /// Successful row-returning statement.
    pub fn with_rows(
        columns: Vec<String>,
        rows: Vec<serde_json::Map<String, JsonValue>>,
        execution_time_ms: u64,
    ) -> Self {
        let row_count = rows.len();
        Self {
            success: true,
            columns,
            rows,
            rows_affected: None,
            row_count,
            execution_time_ms,
            error: None,
        }
    }

    /// Successful write statement.
    pub fn with_affected(rows_affected: u64, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: Some(rows_affected),
            row_count: 0,
            execution_time_ms,
            error: None,
        }
    }

    /// Statement-level failure.
    pub fn failure(error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: None,
            row_count: 0,
            execution_time_ms,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_rows_counts() {
        let mut row = serde_json::Map::new();
        row.insert("id".to_string(), serde_json::json!(1));
        let result = QueryResult::with_rows(vec!["id".to_string()], vec![row], 3);
        assert!(result.success);
        assert_eq!(result.row_count, 1);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_failure_carries_message() {
        let result = QueryResult::failure("no such table: users", 1);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("no such table: users"));
        assert_eq!(result.row_count, 0);
    }

    #[test]
    fn test_param_as_text() {
        assert_eq!(QueryParam::Int(42).as_text(), "42");
        assert_eq!(QueryParam::Bool(true).as_text(), "1");
        assert_eq!(QueryParam::String("k".into()).as_text(), "k");
        assert_eq!(QueryParam::Null.as_text(), "");
    }

    #[test]
    fn test_bytes_param_roundtrips_as_base64() {
        let param = QueryParam::Bytes(vec![0xde, 0xad]);
        let json = serde_json::to_string(&param).unwrap();
        assert!(json.contains("3q0="));
        let back: QueryParam = serde_json::from_str(&json).unwrap();
        match back {
            QueryParam::Bytes(b) => assert_eq!(b, vec![0xde, 0xad]),
            // Untagged enums deserialize base64 text back as String; accept
            // either representation as long as the payload survives.
            QueryParam::String(s) => assert_eq!(s, "3q0="),
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
