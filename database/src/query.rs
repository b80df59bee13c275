//! Caller-supplied list filters arrive as plain JSON where comparison
//! operators are written as bare tokens, e.g.
//! `{"time_slot": {"gte": "2026-09-01T08:00:00Z"}}`. Before querying they
//! are rewritten to the store's `$`-prefixed operator syntax; equality
//! fields pass through unchanged.

use chrono::DateTime;
use mongodb::bson::{Bson, Document};
use serde_json::{Map, Value};
use thiserror::Error;

const COMPARISON_TOKENS: [(&str, &str); 5] = [
    ("gt", "$gt"),
    ("gte", "$gte"),
    ("lt", "$lt"),
    ("lte", "$lte"),
    ("ne", "$ne"),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("filter field '{0}' has an unsupported value")]
    Unsupported(String),
}

/// Rewrite a flat caller filter into a store query document.
pub fn rewrite_filter(input: &Map<String, Value>) -> Result<Document, FilterError> {
    let mut out = Document::new();
    for (field, value) in input {
        match value {
            Value::Object(ops) => {
                let mut clause = Document::new();
                for (token, operand) in ops {
                    let operator = COMPARISON_TOKENS
                        .iter()
                        .find(|(t, _)| t == token)
                        .map(|(_, op)| *op)
                        .ok_or_else(|| FilterError::Unsupported(field.clone()))?;
                    clause.insert(operator, scalar_to_bson(field, operand)?);
                }
                out.insert(field.clone(), clause);
            }
            _ => {
                out.insert(field.clone(), scalar_to_bson(field, value)?);
            }
        }
    }
    Ok(out)
}

// Timestamps arrive as RFC 3339 strings; everything comparable must reach
// the store in its native type or range operators degrade to string order.
fn scalar_to_bson(field: &str, value: &Value) -> Result<Bson, FilterError> {
    match value {
        Value::String(s) => {
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Ok(Bson::DateTime(mongodb::bson::DateTime::from_chrono(
                    ts.with_timezone(&chrono::Utc),
                )));
            }
            Ok(Bson::String(s.clone()))
        }
        Value::Bool(b) => Ok(Bson::Boolean(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Bson::Int64(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Bson::Double(f))
            } else {
                Err(FilterError::Unsupported(field.to_string()))
            }
        }
        _ => Err(FilterError::Unsupported(field.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn comparison_tokens_gain_the_operator_prefix() {
        let filter = as_map(json!({
            "time_slot": { "gte": "2026-09-01T08:00:00Z", "lt": "2026-09-02T08:00:00Z" }
        }));
        let doc = rewrite_filter(&filter).unwrap();
        let clause = doc.get_document("time_slot").unwrap();
        assert!(clause.get("$gte").is_some());
        assert!(clause.get("$lt").is_some());
        assert!(clause.get("gte").is_none());
    }

    #[test]
    fn not_equal_token_rewrites() {
        let filter = as_map(json!({ "cancelled": { "ne": true } }));
        let doc = rewrite_filter(&filter).unwrap();
        assert!(doc.get_document("cancelled").unwrap().get_bool("$ne").unwrap());
    }

    #[test]
    fn equality_fields_pass_through() {
        let filter = as_map(json!({ "name": "Cardiology", "year": 2020 }));
        let doc = rewrite_filter(&filter).unwrap();
        assert_eq!(doc.get_str("name").unwrap(), "Cardiology");
        assert_eq!(doc.get_i64("year").unwrap(), 2020);
    }

    #[test]
    fn rfc3339_strings_become_native_timestamps() {
        let filter = as_map(json!({ "time_slot": { "gte": "2026-09-01T08:00:00Z" } }));
        let doc = rewrite_filter(&filter).unwrap();
        let clause = doc.get_document("time_slot").unwrap();
        assert!(matches!(clause.get("$gte"), Some(Bson::DateTime(_))));
    }

    #[test]
    fn unknown_operator_token_is_rejected() {
        let filter = as_map(json!({ "time_slot": { "regex": ".*" } }));
        assert_eq!(
            rewrite_filter(&filter),
            Err(FilterError::Unsupported("time_slot".to_string()))
        );
    }
}
