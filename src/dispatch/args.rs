//! Validation and coercion of raw JSON tool arguments.

use crate::error::ToolError;
use crate::tool_registry::{ParamKind, ToolInfo};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A single argument coerced to its declared kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Str(String),
    Int(i64),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

/// Validated arguments for one tool call, keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolArgs {
    values: BTreeMap<&'static str, ArgValue>,
}

impl ToolArgs {
    pub fn insert(&mut self, name: &'static str, value: ArgValue) {
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    /// Non-empty string argument, if supplied.
    pub fn str(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ArgValue::Str(s)) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ArgValue::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn date(&self, name: &str) -> Option<NaiveDate> {
        match self.values.get(name) {
            Some(ArgValue::Date(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn datetime(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.values.get(name) {
            Some(ArgValue::DateTime(t)) => Some(*t),
            _ => None,
        }
    }

    /// Required string; the validator guarantees presence for required params.
    pub fn require_str(&self, name: &str) -> Result<&str, ToolError> {
        self.str(name)
            .ok_or_else(|| ToolError::invalid(name, "required argument is missing"))
    }

    pub fn require_int(&self, name: &str) -> Result<i64, ToolError> {
        self.int(name)
            .ok_or_else(|| ToolError::invalid(name, "required argument is missing"))
    }
}

/// Validate `raw` against the declared parameters of `tool`.
///
/// Missing required fields and values that cannot be coerced to the declared
/// kind fail with `InvalidArguments` naming the field. Explicit `null` counts
/// as absent. Undeclared fields are ignored.
pub fn validate(tool: &ToolInfo, raw: &Map<String, Value>) -> Result<ToolArgs, ToolError> {
    let mut args = ToolArgs::default();
    for param in tool.params {
        let value = match raw.get(param.name) {
            None | Some(Value::Null) => {
                if param.required {
                    return Err(ToolError::invalid(
                        param.name,
                        "required argument is missing",
                    ));
                }
                continue;
            }
            Some(v) => v,
        };
        let coerced =
            coerce(param.kind, value).map_err(|reason| ToolError::invalid(param.name, reason))?;
        if param.required && matches!(&coerced, ArgValue::Str(s) if s.trim().is_empty()) {
            return Err(ToolError::invalid(param.name, "must not be empty"));
        }
        args.insert(param.name, coerced);
    }
    Ok(args)
}

fn coerce(kind: ParamKind, value: &Value) -> Result<ArgValue, String> {
    match kind {
        ParamKind::String => match value {
            Value::String(s) => Ok(ArgValue::Str(s.clone())),
            Value::Number(n) => Ok(ArgValue::Str(n.to_string())),
            _ => Err("expected a string".to_string()),
        },
        ParamKind::Integer => match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| f as i64)
                })
                .map(ArgValue::Int)
                .ok_or_else(|| format!("expected an integer, got {n}")),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(ArgValue::Int)
                .map_err(|_| format!("expected an integer, got \"{s}\"")),
            _ => Err("expected an integer".to_string()),
        },
        ParamKind::Date => match value {
            Value::String(s) => parse_date(s.trim())
                .map(ArgValue::Date)
                .ok_or_else(|| format!("expected a date (YYYY-MM-DD), got \"{s}\"")),
            _ => Err("expected a date string (YYYY-MM-DD)".to_string()),
        },
        ParamKind::DateTime => match value {
            Value::String(s) => parse_datetime(s.trim())
                .map(ArgValue::DateTime)
                .ok_or_else(|| format!("expected an RFC 3339 timestamp, got \"{s}\"")),
            _ => Err("expected an RFC 3339 timestamp string".to_string()),
        },
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(s).map(|t| t.date_naive()))
}

/// RFC 3339, or a bare date / naive timestamp taken as UTC.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(t.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_registry::get_tool;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn missing_required_names_the_field() {
        let tool = get_tool("inmate_simple_search").unwrap();
        let err = validate(tool, &obj(json!({"firstName": "john"}))).unwrap_err();
        assert_eq!(
            err,
            ToolError::invalid("lastName", "required argument is missing")
        );
    }

    #[test]
    fn null_optional_is_absent() {
        let tool = get_tool("inmate_simple_search").unwrap();
        let args = validate(
            tool,
            &obj(json!({"firstName": "a", "lastName": "b", "fatherName": null})),
        )
        .unwrap();
        assert!(args.get("fatherName").is_none());
    }

    #[test]
    fn integers_coerce_from_numeric_strings() {
        let tool = get_tool("inmate_get_details").unwrap();
        let args = validate(tool, &obj(json!({"id": "42"}))).unwrap();
        assert_eq!(args.int("id"), Some(42));

        let err = validate(tool, &obj(json!({"id": "forty-two"}))).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { ref field, .. } if field == "id"));

        let err = validate(tool, &obj(json!({"id": 4.5}))).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { ref field, .. } if field == "id"));
    }

    #[test]
    fn dates_and_timestamps_parse() {
        let tool = get_tool("inmate_get_visits").unwrap();
        let raw = json!({
            "id": 1,
            "startDate": "2024-01-02",
            "endDate": "2024-02-03T10:00:00+02:00"
        });
        let args = validate(tool, &obj(raw)).unwrap();
        assert_eq!(
            args.datetime("startDate").unwrap().to_rfc3339(),
            "2024-01-02T00:00:00+00:00"
        );
        assert_eq!(
            args.datetime("endDate").unwrap().to_rfc3339(),
            "2024-02-03T08:00:00+00:00"
        );

        let err = validate(tool, &obj(json!({"id": 1, "endDate": "yesterday"}))).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { ref field, .. } if field == "endDate"));
    }

    #[test]
    fn blank_required_string_is_rejected() {
        let tool = get_tool("inmate_simple_search").unwrap();
        let err = validate(tool, &obj(json!({"firstName": "  ", "lastName": "doe"}))).unwrap_err();
        assert_eq!(err, ToolError::invalid("firstName", "must not be empty"));
    }
}
