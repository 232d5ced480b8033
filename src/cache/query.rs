//! Caching of whole operation responses.
//!
//! Unlike field caches, the key is known as soon as the request arrives, so
//! the lookup happens at request start and a hit ends the request there.

use serde_json::Value;
use tracing::{debug, info, warn};

use super::config::QueryCacheConfig;
use super::controller::{BackendSlot, CacheController, CacheKind, LookupState};
use super::hooks::{GraphQLRequest, ResponseBody, Transport};
use super::keys::{Principal, Zone, extract_query_name, query_key, sanitize};
use super::status::Outcome;

/// Query name that matches every operation, named or anonymous.
pub const WILDCARD: &str = "*";

/// Key segment used in place of the query name by wildcard caches.
const WILDCARD_SEGMENT: &str = "any";

/// Per-operation state of one query cache.
#[derive(Debug, Default, Clone)]
pub struct QueryCacheState {
    lookup: LookupState,
    matched: bool,
}

impl QueryCacheState {
    pub fn has_match(&self) -> bool {
        self.matched
    }

    pub fn has_hit(&self) -> bool {
        self.lookup.has_hit()
    }

    pub fn lookup(&self) -> &LookupState {
        &self.lookup
    }

    pub fn reset(&mut self) {
        self.lookup.reset();
        self.matched = false;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum QueryMatcher {
    Any,
    Named(String),
}

pub struct QueryCache {
    controller: CacheController,
    matcher: QueryMatcher,
}

impl QueryCache {
    pub(crate) fn new(config: QueryCacheConfig, backend: BackendSlot) -> Self {
        let matcher = if config.query_name == WILDCARD {
            QueryMatcher::Any
        } else {
            QueryMatcher::Named(config.query_name)
        };
        Self {
            controller: CacheController::new(CacheKind::Query, config.zone, config.expire, backend),
            matcher,
        }
    }

    pub fn controller(&self) -> &CacheController {
        &self.controller
    }

    pub fn zone(&self) -> &Zone {
        self.controller.zone()
    }

    /// Configured query name, `*` for wildcard caches.
    pub fn query_name(&self) -> &str {
        match &self.matcher {
            QueryMatcher::Any => WILDCARD,
            QueryMatcher::Named(name) => name,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.matcher == QueryMatcher::Any
    }

    fn key_segment(&self) -> String {
        match &self.matcher {
            QueryMatcher::Any => WILDCARD_SEGMENT.to_string(),
            QueryMatcher::Named(name) => sanitize(name),
        }
    }

    fn matches(&self, request: &GraphQLRequest) -> bool {
        match &self.matcher {
            QueryMatcher::Any => true,
            QueryMatcher::Named(name) => {
                request.operation_name.as_deref() == Some(name.as_str())
                    || extract_query_name(&request.query) == *name
            }
        }
    }

    /// Look the response up before anything is executed.
    ///
    /// Returns the previously serialized body on a hit. The caller must
    /// write it out verbatim and stop processing the request.
    pub fn on_request_start(
        &self,
        state: &mut QueryCacheState,
        request: &GraphQLRequest,
        principal: &Principal,
    ) -> Option<String> {
        state.reset();
        let key = query_key(
            &self.key_segment(),
            principal,
            &request.query,
            request.variables.as_ref(),
        );
        self.controller.lookup(&mut state.lookup, key);

        if state.lookup.has_hit() {
            let body = match state.lookup.cached_data() {
                Ok(Value::String(body)) => body.clone(),
                Ok(other) => other.to_string(),
                Err(err) => {
                    warn!(query_name = %self.query_name(), error = %err, "hit without cached data");
                    return None;
                }
            };
            state.matched = true;
            self.controller.record_outcome(true);
            if let Ok(key) = state.lookup.cache_key() {
                info!(zone = %self.zone(), key = %key, query_name = %self.query_name(), outcome = "hit", "HIT query cache");
            }
            return Some(body);
        }

        state.matched = self.matches(request);
        None
    }

    /// Store the serialized response of a matched, error-free operation.
    pub fn on_response_finalize(
        &self,
        state: &mut QueryCacheState,
        response: &dyn ResponseBody,
        transport: Transport,
    ) -> Option<Outcome> {
        let status = self.respond(state, response);
        if transport == Transport::InProcess {
            state.reset();
        }
        status
    }

    fn respond(&self, state: &QueryCacheState, response: &dyn ResponseBody) -> Option<Outcome> {
        if !state.matched {
            return None;
        }
        if state.lookup.has_hit() {
            return Some(Outcome::Hit);
        }

        let Ok(key) = state.lookup.cache_key() else {
            return None;
        };

        self.controller.record_outcome(false);
        info!(zone = %self.zone(), key = %key, query_name = %self.query_name(), outcome = "miss", "MISS query cache");

        if !response.errors().is_empty() {
            info!(
                zone = %self.zone(),
                key = %key,
                errors = response.errors().len(),
                "response carries errors; not caching"
            );
            self.controller.record_skipped_errors();
            return Some(Outcome::Miss);
        }

        match response.to_json() {
            Ok(body) => {
                self.controller.write(key, Value::String(body));
            }
            Err(err) => {
                debug!(key = %key, error = %err, "response could not be serialized; not caching");
            }
        }

        Some(Outcome::Miss)
    }

    /// Status of the operation so far: `MISS` once matched without a hit.
    pub fn status(&self, state: &QueryCacheState) -> Option<Outcome> {
        if !state.matched {
            return None;
        }
        Some(Outcome::from_hit(state.lookup.has_hit()))
    }
}
