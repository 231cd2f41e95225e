//! Translation of validated tool arguments into backend OData actions.
//!
//! Everything here is pure string construction. Values are embedded as OData
//! literals (single quotes doubled) and every query key and value is
//! percent-escaped when the action is rendered, so user input can never change
//! the shape of the query.

use crate::dispatch::ToolArgs;
use crate::error::ToolError;
use crate::tool_registry;
use chrono::{DateTime, NaiveDate, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Serialize, Serializer};
use std::fmt;

/// Everything except RFC 3986 unreserved characters.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Keys additionally keep `$` so OData system options stay readable.
const QUERY_KEY: &AsciiSet = &QUERY_VALUE.remove(b'$');

/// Lower bound substituted when a range has no start.
pub const MIN_TIMESTAMP: &str = "0001-01-01T00:00:00Z";

pub const FILTER: &str = "$filter";
pub const TOP: &str = "$top";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backend query produced by a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub method: HttpMethod,
    pub path: String,
    /// Unescaped `(key, value)` pairs in emission order.
    #[serde(serialize_with = "serialize_query")]
    pub query: Vec<(String, String)>,
}

impl Action {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            kind: "call",
            method: HttpMethod::Get,
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_filter(self, filter: &ODataFilter) -> Self {
        match filter.build() {
            Some(expr) => self.with_param(FILTER, expr),
            None => self,
        }
    }

    /// Unescaped value of the first `key` parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn filter(&self) -> Option<&str> {
        self.param(FILTER)
    }

    /// Percent-escaped query string without the leading `?`.
    pub fn query_string(&self) -> String {
        self.query
            .iter()
            .map(|(k, v)| {
                format!(
                    "{}={}",
                    utf8_percent_encode(k, QUERY_KEY),
                    utf8_percent_encode(v, QUERY_VALUE)
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Path plus escaped query, relative to the backend base URL.
    pub fn relative_url(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query_string())
        }
    }
}

fn serialize_query<S: Serializer>(query: &[(String, String)], s: S) -> Result<S::Ok, S::Error> {
    let rendered = Action {
        kind: "call",
        method: HttpMethod::Get,
        path: String::new(),
        query: query.to_vec(),
    }
    .query_string();
    s.serialize_str(&rendered)
}

/// Split an escaped query string back into decoded pairs.
pub fn decode_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (
                percent_decode_str(k).decode_utf8_lossy().into_owned(),
                percent_decode_str(v).decode_utf8_lossy().into_owned(),
            )
        })
        .collect()
}

/// AND-conjunction of OData predicates, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ODataFilter {
    predicates: Vec<String>,
}

impl ODataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-insensitive substring match on a free-text field.
    pub fn contains_ci(&mut self, field: &str, value: &str) -> &mut Self {
        self.predicates.push(format!(
            "contains(tolower({field}),{})",
            string_literal(&value.to_lowercase())
        ));
        self
    }

    pub fn eq_str(&mut self, field: &str, value: &str) -> &mut Self {
        self.predicates
            .push(format!("{field} eq {}", string_literal(value)));
        self
    }

    pub fn eq_int(&mut self, field: &str, value: i64) -> &mut Self {
        self.predicates.push(format!("{field} eq {value}"));
        self
    }

    pub fn eq_date(&mut self, field: &str, value: NaiveDate) -> &mut Self {
        self.predicates
            .push(format!("{field} eq {}", value.format("%Y-%m-%d")));
        self
    }

    /// Inclusive range; `start` of `None` means unbounded below.
    pub fn between(
        &mut self,
        field: &str,
        start: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
    ) -> &mut Self {
        let start = start
            .map(timestamp_literal)
            .unwrap_or_else(|| MIN_TIMESTAMP.to_string());
        self.predicates.push(format!("{field} ge {start}"));
        self.predicates
            .push(format!("{field} le {}", timestamp_literal(end)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn build(&self) -> Option<String> {
        if self.predicates.is_empty() {
            None
        } else {
            Some(self.predicates.join(" and "))
        }
    }
}

fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn timestamp_literal(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Translate a call to `tool_name` through the catalog.
pub fn translate(
    tool_name: &str,
    args: &ToolArgs,
    now: DateTime<Utc>,
) -> Result<Vec<Action>, ToolError> {
    let tool = tool_registry::get_tool(tool_name)
        .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;
    (tool.translate)(args, now)
}

pub fn simple_search(args: &ToolArgs, _now: DateTime<Utc>) -> Result<Vec<Action>, ToolError> {
    let mut filter = ODataFilter::new();
    filter
        .contains_ci("FirstName", args.require_str("firstName")?)
        .contains_ci("LastName", args.require_str("lastName")?);
    if let Some(birth) = args.date("birthDate") {
        filter.eq_date("BirthDate", birth);
    }
    if let Some(father) = args.str("fatherName") {
        filter.contains_ci("FatherName", father);
    }
    if let Some(mother) = args.str("motherName") {
        filter.contains_ci("MotherName", mother);
    }
    if let Some(uid) = args.str("uniqueIdentifier") {
        filter.eq_str("UniqueIdentityNumber", &uid.to_lowercase());
    }

    let mut action = Action::get("/odata/SimpleSearch").with_filter(&filter);
    if let Some(top) = args.int("top") {
        if top <= 0 {
            return Err(ToolError::invalid("top", "must be a positive integer"));
        }
        action = action.with_param(TOP, top.to_string());
    }
    Ok(vec![action])
}

pub fn get_details(args: &ToolArgs, _now: DateTime<Utc>) -> Result<Vec<Action>, ToolError> {
    let id = args.require_int("id")?;
    let mut filter = ODataFilter::new();
    filter.eq_int("Id", id);
    Ok(vec![
        Action::get("/odata/CSDetentionPerson").with_filter(&filter)
    ])
}

pub fn get_convictions(args: &ToolArgs, _now: DateTime<Utc>) -> Result<Vec<Action>, ToolError> {
    let id = args.require_int("id")?;
    let mut filter = ODataFilter::new();
    if let Some(conviction) = args.int("convictionId") {
        filter.eq_int("Id", conviction);
    }
    Ok(vec![Action::get("/odata/CSConviction")
        .with_param("detentionPersonId", id.to_string())
        .with_filter(&filter)])
}

pub fn get_visits(args: &ToolArgs, now: DateTime<Utc>) -> Result<Vec<Action>, ToolError> {
    let id = args.require_int("id")?;
    let start = args.datetime("startDate");
    let end = args.datetime("endDate").unwrap_or(now);
    if matches!(start, Some(start) if start > end) {
        return Err(ToolError::invalid("startDate", "must not be after endDate"));
    }
    let mut filter = ODataFilter::new();
    filter.between("VisitDate", start, end);
    Ok(vec![Action::get("/odata/CSVisit")
        .with_param("detentionPersonId", id.to_string())
        .with_filter(&filter)])
}
