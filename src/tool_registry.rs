//! Static tool catalog.
//!
//! Every tool the gateway exposes is a row in [`TOOL_REGISTRY`]: its metadata,
//! the typed parameters the dispatcher validates against, and the translator
//! that turns validated arguments into backend actions. Adding a tool is a
//! data change here plus a translator in [`crate::translate`].

use crate::dispatch::ToolArgs;
use crate::error::ToolError;
use crate::translate::{self, Action};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::str::FromStr;

/// Tool category for grouping related tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Finding inmates by identity attributes
    Search,
    /// Single-inmate profile lookups
    Profile,
    /// Historical records attached to an inmate
    Records,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Profile => "profile",
            Self::Records => "records",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Search => "Find inmates by name, birth date or identifier",
            Self::Profile => "Retrieve the full profile of one inmate",
            Self::Records => "Convictions and visit history for one inmate",
        }
    }

    pub fn all() -> &'static [ToolCategory] {
        &[Self::Search, Self::Profile, Self::Records]
    }
}

impl FromStr for ToolCategory {
    type Err = ();

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "search" => Ok(Self::Search),
            "profile" | "details" => Ok(Self::Profile),
            "records" | "history" => Ok(Self::Records),
            _ => Err(()),
        }
    }
}

/// Primitive parameter types understood by the argument validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    /// Calendar date, `YYYY-MM-DD`.
    Date,
    /// RFC 3339 timestamp, interpreted as UTC.
    DateTime,
}

impl ParamKind {
    /// JSON-schema `(type, format)` pair for this kind.
    pub fn schema_type(&self) -> (&'static str, Option<&'static str>) {
        match self {
            Self::String => ("string", None),
            Self::Integer => ("integer", None),
            Self::Date => ("string", Some("date")),
            Self::DateTime => ("string", Some("date-time")),
        }
    }
}

/// One declared tool parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

impl ParamSpec {
    const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
        }
    }

    const fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            description,
        }
    }
}

/// Maps validated arguments to backend actions. `now` bounds open date ranges.
pub type TranslateFn = fn(&ToolArgs, DateTime<Utc>) -> Result<Vec<Action>, ToolError>;

/// Metadata and handler record for a single tool
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: &'static str,
    pub title: &'static str,
    pub category: ToolCategory,
    /// Short description (1 line) - used in generated docs
    pub short_desc: &'static str,
    /// Full description shown to MCP clients
    pub full_desc: &'static str,
    /// Example invocation (JSON)
    pub example: &'static str,
    pub params: &'static [ParamSpec],
    pub translate: TranslateFn,
}

impl ToolInfo {
    pub fn param(&self, name: &str) -> Option<&'static ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn required_params(&self) -> impl Iterator<Item = &'static ParamSpec> {
        self.params.iter().filter(|p| p.required)
    }

    /// JSON-schema object describing the tool input.
    pub fn input_schema(&self) -> Map<String, Value> {
        let mut properties = Map::new();
        for param in self.params {
            let (ty, format) = param.kind.schema_type();
            let mut prop = json!({ "type": ty, "description": param.description });
            if let (Some(format), Value::Object(map)) = (format, &mut prop) {
                map.insert("format".to_string(), json!(format));
            }
            properties.insert(param.name.to_string(), prop);
        }
        let required: Vec<&str> = self.required_params().map(|p| p.name).collect();

        let mut schema = Map::new();
        schema.insert("type".to_string(), json!("object"));
        schema.insert("properties".to_string(), Value::Object(properties));
        schema.insert("required".to_string(), json!(required));
        schema
    }
}

const SIMPLE_SEARCH_PARAMS: &[ParamSpec] = &[
    ParamSpec::required(
        "firstName",
        ParamKind::String,
        "First name of the inmate (case-insensitive substring match)",
    ),
    ParamSpec::required(
        "lastName",
        ParamKind::String,
        "Last name of the inmate (case-insensitive substring match)",
    ),
    ParamSpec::optional(
        "birthDate",
        ParamKind::Date,
        "Date of birth; only inmates born on this date are included",
    ),
    ParamSpec::optional(
        "fatherName",
        ParamKind::String,
        "Father's name (case-insensitive substring match)",
    ),
    ParamSpec::optional(
        "motherName",
        ParamKind::String,
        "Mother's name (case-insensitive substring match)",
    ),
    ParamSpec::optional(
        "uniqueIdentifier",
        ParamKind::String,
        "Unique identity number (exact match; sent lowercased)",
    ),
    ParamSpec::optional(
        "top",
        ParamKind::Integer,
        "Maximum number of results to return",
    ),
];

const GET_DETAILS_PARAMS: &[ParamSpec] = &[ParamSpec::required(
    "id",
    ParamKind::Integer,
    "Unique identifier of the inmate",
)];

const GET_CONVICTIONS_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("id", ParamKind::Integer, "Unique identifier of the inmate"),
    ParamSpec::optional(
        "convictionId",
        ParamKind::Integer,
        "Return only the conviction with this identifier",
    ),
];

const GET_VISITS_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("id", ParamKind::Integer, "Unique identifier of the inmate"),
    ParamSpec::optional(
        "startDate",
        ParamKind::DateTime,
        "Only visits on or after this UTC time; no lower limit if omitted",
    ),
    ParamSpec::optional(
        "endDate",
        ParamKind::DateTime,
        "Only visits on or before this UTC time; defaults to now",
    ),
];

/// Static registry of all tools
pub static TOOL_REGISTRY: &[ToolInfo] = &[
    ToolInfo {
        name: "inmate_simple_search",
        title: "Inmate Simple Search",
        category: ToolCategory::Search,
        short_desc: "Search inmates by name, parents' names, birth date or identifier",
        full_desc: "Search for inmates using basic identity attributes. All provided \
                    parameters are combined to filter the results; only inmates matching \
                    every specified criterion are returned. firstName and lastName are required.",
        example: r#"{"firstName": "john", "lastName": "doe", "birthDate": "1980-04-12", "top": 5}"#,
        params: SIMPLE_SEARCH_PARAMS,
        translate: translate::simple_search,
    },
    ToolInfo {
        name: "inmate_get_details",
        title: "Get inmate details",
        category: ToolCategory::Profile,
        short_desc: "Retrieve full information about an inmate",
        full_desc: "Retrieve full profile information for a specific inmate identified by \
                    the unique inmate identifier.",
        example: r#"{"id": 42}"#,
        params: GET_DETAILS_PARAMS,
        translate: translate::get_details,
    },
    ToolInfo {
        name: "inmate_get_convictions",
        title: "Get convictions",
        category: ToolCategory::Records,
        short_desc: "Retrieve conviction records for an inmate",
        full_desc: "Retrieve conviction records associated with a specific inmate. Returns all \
                    convictions, or a single one when convictionId is provided.",
        example: r#"{"id": 42, "convictionId": 7}"#,
        params: GET_CONVICTIONS_PARAMS,
        translate: translate::get_convictions,
    },
    ToolInfo {
        name: "inmate_get_visits",
        title: "Get visits",
        category: ToolCategory::Records,
        short_desc: "Retrieve visit history for an inmate within a date range",
        full_desc: "Retrieve visits belonging to the specified inmate, optionally bounded by \
                    startDate and endDate (UTC, inclusive). Without endDate, visits up to the \
                    current time are returned.",
        example: r#"{"id": 42, "startDate": "2024-01-01T00:00:00Z"}"#,
        params: GET_VISITS_PARAMS,
        translate: translate::get_visits,
    },
];

/// Get all tools
pub fn all_tools() -> impl Iterator<Item = &'static ToolInfo> {
    TOOL_REGISTRY.iter()
}

/// Get tool by name
pub fn get_tool(name: &str) -> Option<&'static ToolInfo> {
    TOOL_REGISTRY.iter().find(|t| t.name == name)
}

/// Get tools by category
pub fn tools_by_category(category: ToolCategory) -> impl Iterator<Item = &'static ToolInfo> {
    TOOL_REGISTRY.iter().filter(move |t| t.category == category)
}
