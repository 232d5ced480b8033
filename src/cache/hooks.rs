//! Interception points the host execution pipeline drives.
//!
//! The host calls, in order: [`ExecutionHooks::on_request_start`] once per
//! operation, [`ExecutionHooks::on_before_field_resolve`] for every field it
//! is about to resolve, and [`ExecutionHooks::on_response_finalize`] once with
//! the assembled response before it is transmitted.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::keys::Principal;
use super::status::PendingStatus;

/// How an operation reached the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// An HTTP request. Per-operation state is kept after finalization so
    /// the status headers can still be produced.
    Http,
    /// A direct in-process call. State is reset as soon as the response is
    /// finalized, because the same scope may serve many calls.
    InProcess,
}

/// A GraphQL operation as submitted by a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,
}

impl GraphQLRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = Some(variables);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// A field the pipeline is about to resolve.
#[derive(Debug, Clone, Copy)]
pub struct FieldResolve<'a> {
    /// Response path; the root field (by response key) is at index 0.
    pub path: &'a [PathSegment],
    pub arguments: &'a Map<String, Value>,
    pub resolver: &'a str,
}

impl FieldResolve<'_> {
    /// Response key of a root-level field; `None` for nested fields.
    pub fn root_field(&self) -> Option<&str> {
        match self.path {
            [PathSegment::Field(name)] => Some(name),
            _ => None,
        }
    }
}

/// Answer to `on_before_field_resolve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Resolve the field normally.
    Continue,
    /// Do not run the resolver; the value is restored at finalization.
    Skip,
}

/// Answer to `on_request_start`.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestStart {
    Continue,
    /// Stop all further processing and write this response verbatim.
    Respond(EarlyResponse),
}

/// Complete response produced without running the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct EarlyResponse {
    /// Previously serialized response body.
    pub body: String,
    pub status: PendingStatus,
}

/// Final response as seen by the finalize hook.
///
/// Implemented for a generic JSON value (the shape of in-process results) and
/// for [`ExecutionResponse`] (the shape the HTTP layer works with).
pub trait ResponseBody {
    fn data_field(&self, name: &str) -> Option<&Value>;
    fn set_data_field(&mut self, name: &str, value: Value);
    fn errors(&self) -> &[Value];
    fn to_json(&self) -> Result<String, serde_json::Error>;
}

impl ResponseBody for Value {
    fn data_field(&self, name: &str) -> Option<&Value> {
        self.get("data")?.get(name)
    }

    fn set_data_field(&mut self, name: &str, value: Value) {
        if !self.is_object() {
            *self = Value::Object(Map::new());
        }
        let Value::Object(root) = self else {
            return;
        };
        let data = root
            .entry("data")
            .or_insert_with(|| Value::Object(Map::new()));
        if !data.is_object() {
            *data = Value::Object(Map::new());
        }
        if let Value::Object(fields) = data {
            fields.insert(name.to_string(), value);
        }
    }

    fn errors(&self) -> &[Value] {
        self.get("errors")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Typed response with `data`, `errors` and optional `extensions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl ResponseBody for ExecutionResponse {
    fn data_field(&self, name: &str) -> Option<&Value> {
        self.data.as_ref()?.get(name)
    }

    fn set_data_field(&mut self, name: &str, value: Value) {
        self.data
            .get_or_insert_with(Map::new)
            .insert(name.to_string(), value);
    }

    fn errors(&self) -> &[Value] {
        &self.errors
    }

    fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// The interception contract between the pipeline and the caches.
pub trait ExecutionHooks {
    fn on_request_start(&mut self, request: &GraphQLRequest, principal: &Principal)
    -> RequestStart;

    fn on_before_field_resolve(&mut self, field: &FieldResolve<'_>) -> Resolution;

    /// Runs after the full response is assembled. The returned status is
    /// what the status-emission step turns into response headers.
    fn on_response_finalize(&mut self, response: &mut dyn ResponseBody) -> PendingStatus;
}

/// Root field an error entry refers to, if it carries a path.
pub(crate) fn error_root_field(error: &Value) -> Option<&str> {
    error.get("path")?.as_array()?.first()?.as_str()
}
