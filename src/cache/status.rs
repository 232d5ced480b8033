//! Hit/miss status reported back to the client as response headers.

use std::fmt;
use std::time::Duration;

pub const FIELD_CACHE_HEADER: &str = "x-graphql-field-cache";
pub const QUERY_CACHE_HEADER: &str = "x-graphql-query-cache";
pub const DURATION_HEADER: &str = "x-graphql-duration";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Hit,
    Miss,
}

impl Outcome {
    pub fn from_hit(hit: bool) -> Self {
        if hit { Self::Hit } else { Self::Miss }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one matched field cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldStatus {
    /// Sanitized field name.
    pub field: String,
    pub outcome: Outcome,
}

/// Status gathered by the finalize step, consumed by header emission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingStatus {
    pub fields: Vec<FieldStatus>,
    pub query: Option<Outcome>,
    pub duration: Option<Duration>,
}

impl PendingStatus {
    /// `HIT:<field>` / `MISS:<field>` tokens joined by `, `; `None` when no
    /// field cache matched.
    pub fn field_header(&self) -> Option<String> {
        if self.fields.is_empty() {
            return None;
        }
        let tokens: Vec<String> = self
            .fields
            .iter()
            .map(|status| format!("{}:{}", status.outcome, status.field))
            .collect();
        Some(tokens.join(", "))
    }

    pub fn query_header(&self) -> Option<&'static str> {
        self.query.map(Outcome::as_str)
    }

    pub fn duration_header(&self) -> Option<String> {
        self.duration
            .map(|elapsed| format!("{}ms", elapsed.as_millis()))
    }

    /// Header name/value pairs to emit; empty when nothing matched.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        if let Some(value) = self.field_header() {
            headers.push((FIELD_CACHE_HEADER, value));
        }
        if let Some(value) = self.query_header() {
            headers.push((QUERY_CACHE_HEADER, value.to_string()));
        }
        if let Some(value) = self.duration_header() {
            headers.push((DURATION_HEADER, value));
        }
        headers
    }
}
