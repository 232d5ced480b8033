//! Caching of a single root field.
//!
//! The request-start hook captures the query text when the operation name
//! matches, the pre-resolve hook derives the key and decides whether the
//! resolver runs at all, and the finalize hook either restores the cached
//! value into the response or stores the freshly resolved one.

use serde_json::Value;
use tracing::{debug, info, warn};

use super::config::FieldCacheConfig;
use super::controller::{BackendSlot, CacheController, CacheKind, LookupState};
use super::error::CacheUsageError;
use super::hooks::{FieldResolve, GraphQLRequest, Resolution, ResponseBody, Transport, error_root_field};
use super::keys::{Principal, Zone, extract_query_name, field_key, sanitize};
use super::status::{FieldStatus, Outcome};

/// Per-operation state of one field cache.
#[derive(Debug, Default, Clone)]
pub struct FieldCacheState {
    lookup: LookupState,
    matched: bool,
    query: Option<String>,
    principal: Option<Principal>,
}

impl FieldCacheState {
    /// True once the configured field was seen in this operation.
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
        self.query = None;
        self.principal = None;
    }
}

pub struct FieldCache {
    controller: CacheController,
    query_name: String,
    field_name: String,
}

impl FieldCache {
    pub(crate) fn new(config: FieldCacheConfig, backend: BackendSlot) -> Self {
        Self {
            controller: CacheController::new(CacheKind::Field, config.zone, config.expire, backend),
            query_name: config.query_name,
            field_name: config.field_name,
        }
    }

    pub fn controller(&self) -> &CacheController {
        &self.controller
    }

    pub fn zone(&self) -> &Zone {
        self.controller.zone()
    }

    pub fn query_name(&self) -> &str {
        &self.query_name
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Capture the query text if this operation is the configured one.
    ///
    /// Every operation starts from a clean state, so nothing captured by an
    /// earlier operation that never reached finalization can leak into this
    /// one. The supplied operation name is checked first; the name declared
    /// in the query text is the fallback.
    pub fn on_request_start(
        &self,
        state: &mut FieldCacheState,
        request: &GraphQLRequest,
        principal: &Principal,
    ) {
        state.reset();
        let named = request.operation_name.as_deref() == Some(self.query_name.as_str());
        if named || extract_query_name(&request.query) == self.query_name {
            state.query = Some(request.query.clone());
            state.principal = Some(principal.clone());
        }
    }

    pub fn on_before_field_resolve(
        &self,
        state: &mut FieldCacheState,
        field: &FieldResolve<'_>,
    ) -> Resolution {
        let Some(query) = state.query.as_deref() else {
            return Resolution::Continue;
        };

        // Only root fields; nested paths never match.
        if field.root_field() != Some(self.field_name.as_str()) {
            return Resolution::Continue;
        }

        state.matched = true;
        let principal = state.principal.clone().unwrap_or_default();
        let key = field_key(
            &self.query_name,
            &self.field_name,
            &principal,
            query,
            field.arguments,
        );
        self.controller.lookup(&mut state.lookup, key);

        // The cached value is written into the response at finalization.
        if state.lookup.has_hit() {
            Resolution::Skip
        } else {
            Resolution::Continue
        }
    }

    /// Restore or store the field, then report its outcome.
    ///
    /// In-process operations reset the state before returning; HTTP
    /// operations keep it for the rest of the request.
    pub fn on_response_finalize(
        &self,
        state: &mut FieldCacheState,
        response: &mut dyn ResponseBody,
        transport: Transport,
    ) -> Option<FieldStatus> {
        let status = self.respond(state, response);
        if transport == Transport::InProcess {
            state.reset();
        }
        status
    }

    fn respond(
        &self,
        state: &FieldCacheState,
        response: &mut dyn ResponseBody,
    ) -> Option<FieldStatus> {
        if !state.matched {
            return None;
        }

        let key = match state.lookup.cache_key() {
            Ok(key) => key,
            Err(err) => {
                warn!(field = %self.field_name, error = %err, "matched field without a key");
                return None;
            }
        };

        let hit = state.lookup.has_hit();
        self.controller.record_outcome(hit);

        if hit {
            info!(zone = %self.zone(), key = %key, field = %self.field_name, outcome = "hit", "HIT");
            if let Err(err) = self.respond_with_cache(&state.lookup, response) {
                warn!(key = %key, error = %err, "failed to restore cached field");
            }
        } else {
            info!(zone = %self.zone(), key = %key, field = %self.field_name, outcome = "miss", "MISS");
            self.cache_field_from_response(&state.lookup, response);
        }

        Some(FieldStatus {
            field: sanitize(&self.field_name),
            outcome: Outcome::from_hit(hit),
        })
    }

    fn respond_with_cache(
        &self,
        lookup: &LookupState,
        response: &mut dyn ResponseBody,
    ) -> Result<(), CacheUsageError> {
        let data = lookup.cached_data()?.clone();
        response.set_data_field(&self.field_name, data);
        Ok(())
    }

    fn cache_field_from_response(&self, lookup: &LookupState, response: &dyn ResponseBody) {
        let Ok(key) = lookup.cache_key() else {
            return;
        };

        if self.has_blocking_errors(response) {
            info!(
                zone = %self.zone(),
                key = %key,
                field = %self.field_name,
                "response carries errors for this field; not caching"
            );
            self.controller.record_skipped_errors();
            return;
        }

        match response.data_field(&self.field_name) {
            None | Some(Value::Null) => {
                debug!(key = %key, field = %self.field_name, "field absent from response; not caching");
            }
            Some(data) => {
                self.controller.write(key, data.clone());
            }
        }
    }

    /// Errors without a path concern the whole operation and errors rooted
    /// at this field concern its value; either blocks the write. Errors
    /// rooted at other fields do not.
    fn has_blocking_errors(&self, response: &dyn ResponseBody) -> bool {
        response
            .errors()
            .iter()
            .any(|error| match error_root_field(error) {
                Some(root) => root == self.field_name,
                None => true,
            })
    }
}
