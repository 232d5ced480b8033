//! Cache key derivation.
//!
//! Turns query text, names, arguments and the requesting principal into
//! stable, bounded-length keys. Everything in here is pure.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::error::InvalidZone;

/// Query name reported for operations that declare no name.
pub const ANONYMOUS_QUERY: &str = "__anonymous";

/// Zone used when none (or an empty one) is configured.
pub const DEFAULT_ZONE: &str = "default";

/// Digest recorded for operations without variables.
const EMPTY_VARIABLES: &str = "null";

/// Named partition of the keyspace.
///
/// Zone names are restricted to `[A-Za-z0-9_-]` so they can be used as a
/// directory name by file-backed stores. [`Zone::new`] strips anything else,
/// so distinct inputs may land in the same zone; operator-supplied names go
/// through [`Zone::parse`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Zone(String);

impl Zone {
    pub fn new(name: impl AsRef<str>) -> Self {
        let cleaned: String = name
            .as_ref()
            .chars()
            .filter(|c| is_zone_char(*c))
            .collect();
        if cleaned.is_empty() {
            Self(DEFAULT_ZONE.to_string())
        } else {
            Self(cleaned)
        }
    }

    /// Accept a zone name only if it is already in the allowed charset.
    pub fn parse(name: &str) -> Result<Self, InvalidZone> {
        if !name.is_empty() && name.chars().all(is_zone_char) {
            Ok(Self(name.to_string()))
        } else {
            Err(InvalidZone(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_zone_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

impl Default for Zone {
    fn default() -> Self {
        Self(DEFAULT_ZONE.to_string())
    }
}

impl From<String> for Zone {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Zone {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Zone> for String {
    fn from(zone: Zone) -> Self {
        zone.0
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the requester, folded into every key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal(String);

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Marker for unauthenticated requests.
    pub fn anonymous() -> Self {
        Self("0".to_string())
    }

    pub fn id(&self) -> &str {
        &self.0
    }

    /// Key segment for this principal.
    ///
    /// Plain alphanumeric ids are embedded verbatim; anything else is
    /// digested so that ids differing only in punctuation never share a key.
    pub fn key_segment(&self) -> String {
        if !self.0.is_empty() && self.0.chars().all(|c| c.is_ascii_alphanumeric()) {
            self.0.clone()
        } else {
            digest(&self.0)
        }
    }
}

impl Default for Principal {
    fn default() -> Self {
        Self::anonymous()
    }
}

/// Fully derived cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip everything outside `[A-Za-z0-9]`.
///
/// Applied to query and field names before they end up in a key, a file
/// path or a response header.
pub fn sanitize(name: &str) -> String {
    name.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// Hex encoded SHA-256 of the given content.
pub fn digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic serialization of an argument or variable mapping.
///
/// Object keys are sorted at every depth, so two mappings that differ only
/// in insertion order serialize identically. Array order is significant.
pub fn canonical_string(mapping: &Map<String, Value>) -> String {
    let mut out = String::new();
    write_canonical_object(mapping, &mut out);
    out
}

fn write_canonical_object(mapping: &Map<String, Value>, out: &mut String) {
    let mut keys: Vec<&String> = mapping.keys().collect();
    keys.sort();

    out.push('{');
    for (idx, key) in keys.into_iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        if let Some(value) = mapping.get(key) {
            write_canonical_value(value, out);
        }
    }
    out.push('}');
}

fn write_canonical_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_canonical_object(map, out),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical_value(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Extract the declared operation name from raw query text.
///
/// Recognizes a leading `query <Name>` (after whitespace) and stops at the
/// first character that cannot be part of a GraphQL name, such as `{` or
/// `(`. Returns [`ANONYMOUS_QUERY`] when no name is declared.
pub fn extract_query_name(query_text: &str) -> String {
    let Some(rest) = query_text.trim_start().strip_prefix("query") else {
        return ANONYMOUS_QUERY.to_string();
    };

    if !rest.starts_with(char::is_whitespace) {
        return ANONYMOUS_QUERY.to_string();
    }

    let name: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();

    if name.is_empty() {
        ANONYMOUS_QUERY.to_string()
    } else {
        name
    }
}

/// Key for one root field of one operation.
pub fn field_key(
    query_name: &str,
    field_name: &str,
    principal: &Principal,
    query_text: &str,
    arguments: &Map<String, Value>,
) -> CacheKey {
    CacheKey(format!(
        "field-{}-{}-{}-{}-{}",
        sanitize(query_name),
        sanitize(field_name),
        principal.key_segment(),
        digest(query_text),
        digest(&canonical_string(arguments)),
    ))
}

/// Key for a whole operation response.
///
/// `query_name` is the key segment of the registered query cache, already
/// sanitized by the caller.
pub fn query_key(
    query_name: &str,
    principal: &Principal,
    query_text: &str,
    variables: Option<&Map<String, Value>>,
) -> CacheKey {
    let variables_digest = match variables {
        Some(vars) if !vars.is_empty() => digest(&canonical_string(vars)),
        _ => EMPTY_VARIABLES.to_string(),
    };

    CacheKey(format!(
        "query-{}-{}-{}-{}",
        query_name,
        principal.key_segment(),
        digest(query_text),
        variables_digest,
    ))
}
