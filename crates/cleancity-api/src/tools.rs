//! Tool registry for the stdio tool server.
//!
//! Each tool takes a JSON object of arguments, deserializes it into the same
//! request types the HTTP routes use and returns a JSON value. Argument
//! errors surface as validation errors so callers can see the offending
//! field.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use cleancity_core::error::{CleanCityError, Result};
use cleancity_storage::NewEvent;

use crate::params::{
    AnalyzeOptions, DeleteRequest, DeleteResponse, EstimateRequest, EventQuery, HotspotQuery,
    ReportRequest,
};
use crate::state::AppState;
use crate::workflow;

/// A tool as advertised by `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Arguments of the `analyze` tool: an encoded image plus the same options
/// `POST /analyze` takes in its query string.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AnalyzeArgs {
    image_base64: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default = "default_true")]
    log: bool,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    enhance: bool,
}

fn default_true() -> bool {
    true
}

impl AnalyzeArgs {
    /// Decode the image, accepting a `data:` URL prefix.
    fn into_parts(self) -> Result<(Vec<u8>, AnalyzeOptions)> {
        let encoded = match self.image_base64.split_once(";base64,") {
            Some((prefix, data)) if prefix.starts_with("data:") => data,
            _ => self.image_base64.as_str(),
        };
        let image = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CleanCityError::validation("image_base64", e.to_string()))?;
        let options = AnalyzeOptions {
            location: self.location,
            notes: self.notes,
            log: self.log,
            format: self.format,
            enhance: self.enhance,
        };
        Ok((image, options))
    }
}

/// All tools, in the order they are listed.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "log_event",
            description: "Record a litter detection event. Severity is derived from item_count.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "location": { "type": "string", "description": "Free-form place name" },
                    "item_count": { "type": "integer", "minimum": 0 },
                    "detections": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "object_type": { "type": "string" },
                                "confidence": { "type": "number" },
                                "bounding_box": {
                                    "type": "array",
                                    "items": { "type": "integer" },
                                    "minItems": 4,
                                    "maxItems": 4
                                }
                            },
                            "required": ["object_type", "confidence", "bounding_box"]
                        }
                    },
                    "notes": { "type": "string" }
                },
                "required": ["item_count"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "query_events",
            description: "List logged events, newest first, with summary statistics.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "location": { "type": "string", "description": "Case-insensitive substring" },
                    "severity": { "type": "string", "enum": ["low", "medium", "high"] },
                    "start": { "type": "string", "format": "date-time" },
                    "end": { "type": "string", "format": "date-time" },
                    "days": { "type": "integer", "minimum": 1 },
                    "min_item_count": { "type": "integer", "minimum": 0 },
                    "limit": { "type": "integer", "minimum": 1 }
                },
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "get_hotspots",
            description: "Locations with repeated litter reports inside a recent window.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "window_days": { "type": "integer", "minimum": 1 },
                    "min_events": { "type": "integer", "minimum": 1 }
                },
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "estimate",
            description: "Estimate volunteers, time and equipment for a cleanup.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "item_count": { "type": "integer", "minimum": 0 },
                    "item_types": {
                        "type": "object",
                        "additionalProperties": { "type": "integer", "minimum": 0 }
                    }
                },
                "required": ["item_count"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "delete_event",
            description: "Delete an event by id. Returns whether a row was removed.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "integer" }
                },
                "required": ["id"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "generate_report",
            description: "Render a report for a logged event.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "event_id": { "type": "integer" },
                    "format": { "type": "string", "enum": ["email", "markdown", "plain"] },
                    "enhance": { "type": "boolean" }
                },
                "required": ["event_id"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "analyze",
            description: "Detect litter in an image, estimate the cleanup, optionally log the \
                          event and return a report.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "image_base64": {
                        "type": "string",
                        "description": "Base64 image data, optionally as a data: URL"
                    },
                    "location": { "type": "string" },
                    "notes": { "type": "string" },
                    "log": { "type": "boolean", "default": true },
                    "format": { "type": "string", "enum": ["email", "markdown", "plain"] },
                    "enhance": { "type": "boolean" }
                },
                "required": ["image_base64"],
                "additionalProperties": false
            }),
        },
    ]
}

/// Invoke the tool called `name` with `arguments`.
pub async fn call_tool(state: &AppState, name: &str, arguments: Value) -> Result<Value> {
    debug!(tool = name, "Tool call");
    match name {
        "log_event" => {
            let new: NewEvent = parse_args(arguments)?;
            to_value(state.store.log_event(new)?)
        }
        "query_events" => {
            let query: EventQuery = parse_args(arguments)?;
            to_value(workflow::query_events(state, query)?)
        }
        "get_hotspots" => {
            let query: HotspotQuery = parse_args(arguments)?;
            to_value(workflow::hotspots(state, query)?)
        }
        "estimate" => {
            let req: EstimateRequest = parse_args(arguments)?;
            to_value(state.estimator.estimate(req.item_count, req.item_types.as_ref())?)
        }
        "delete_event" => {
            let req: DeleteRequest = parse_args(arguments)?;
            let deleted = state.store.delete_event(req.id)?;
            to_value(DeleteResponse { id: req.id, deleted })
        }
        "generate_report" => {
            let req: ReportRequest = parse_args(arguments)?;
            let format = req.report_format()?;
            match workflow::generate_report(state, req.event_id, format, req.enhance).await? {
                Some(report) => to_value(report),
                None => Err(CleanCityError::validation(
                    "event_id",
                    format!("no event with id {}", req.event_id),
                )),
            }
        }
        "analyze" => {
            let args: AnalyzeArgs = parse_args(arguments)?;
            let (image, options) = args.into_parts()?;
            to_value(workflow::analyze(state, &image, options).await?)
        }
        other => Err(CleanCityError::validation(
            "name",
            format!("unknown tool '{}'", other),
        )),
    }
}

/// Missing arguments are treated as an empty object.
fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T> {
    let arguments = match arguments {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(arguments)
        .map_err(|e| CleanCityError::validation("arguments", e.to_string()))
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}
