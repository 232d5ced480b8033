//! Registry of active caches.
//!
//! Owns the shared backend, the list of registered field and query caches,
//! and hands out [`RequestScope`]s that drive every registered cache through
//! one operation.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use once_cell::sync::OnceCell;
use tracing::{debug, info};

use super::backend::SharedBackend;
use super::config::{CacheConfig, FieldCacheConfig, QueryCacheConfig};
use super::controller::BackendSlot;
use super::error::RegistryError;
use super::field::{FieldCache, FieldCacheState};
use super::hooks::{
    EarlyResponse, ExecutionHooks, FieldResolve, GraphQLRequest, RequestStart, Resolution,
    ResponseBody, Transport,
};
use super::keys::{Principal, Zone, sanitize};
use super::lock::RecoverLock;
use super::query::{QueryCache, QueryCacheState};
use super::status::{FieldStatus, Outcome, PendingStatus};

/// Process-wide set of caches sharing one backend.
///
/// Caches may be registered before or after the backend is known. Until
/// [`activate`](Self::activate) is called (or while caching is disabled in
/// the configuration) scopes are empty and no cache sees any request.
pub struct CacheRegistry {
    config: CacheConfig,
    backend: BackendSlot,
    field_caches: RwLock<Vec<Arc<FieldCache>>>,
    query_caches: RwLock<Vec<Arc<QueryCache>>>,
}

impl CacheRegistry {
    /// Create an inactive registry holding the caches listed in `config`.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_slot(config, Arc::new(OnceCell::new()))
    }

    /// Create a registry that is active from the start.
    pub fn with_backend(config: CacheConfig, backend: SharedBackend) -> Self {
        Self::with_slot(config, Arc::new(OnceCell::with_value(backend)))
    }

    fn with_slot(config: CacheConfig, backend: BackendSlot) -> Self {
        let registry = Self {
            config,
            backend,
            field_caches: RwLock::new(Vec::new()),
            query_caches: RwLock::new(Vec::new()),
        };
        for field in registry.config.fields.clone() {
            registry.register_field_cache(field);
        }
        for query in registry.config.queries.clone() {
            registry.register_query_cache(query);
        }
        registry
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Install the shared backend. Can only happen once.
    pub fn activate(&self, backend: SharedBackend) -> Result<(), RegistryError> {
        self.backend
            .set(backend)
            .map_err(|_| RegistryError::AlreadyActive)?;

        info!(
            enabled = self.config.enabled,
            field_caches = self.field_caches.read_recover("registry.activate").len(),
            query_caches = self.query_caches.read_recover("registry.activate").len(),
            "cache registry activated"
        );
        Ok(())
    }

    /// True when the backend is installed and caching is enabled.
    pub fn is_active(&self) -> bool {
        self.config.enabled && self.backend.get().is_some()
    }

    pub fn backend(&self) -> Option<&SharedBackend> {
        self.backend.get()
    }

    pub fn register_field_cache(&self, config: FieldCacheConfig) -> Arc<FieldCache> {
        let cache = Arc::new(FieldCache::new(config, Arc::clone(&self.backend)));
        self.field_caches
            .write_recover("registry.register_field_cache")
            .push(Arc::clone(&cache));
        self.log_registration(
            "field",
            cache.zone(),
            cache.query_name(),
            Some(cache.field_name()),
        );
        cache
    }

    pub fn register_query_cache(&self, config: QueryCacheConfig) -> Arc<QueryCache> {
        let cache = Arc::new(QueryCache::new(config, Arc::clone(&self.backend)));
        self.query_caches
            .write_recover("registry.register_query_cache")
            .push(Arc::clone(&cache));
        self.log_registration("query", cache.zone(), cache.query_name(), None);
        cache
    }

    fn log_registration(&self, kind: &str, zone: &Zone, query_name: &str, field: Option<&str>) {
        let subscription = if self.is_active() {
            "subscribed"
        } else {
            "deferred"
        };
        info!(kind, zone = %zone, query_name, field, subscription, "cache registered");
    }

    pub fn field_caches(&self) -> Vec<Arc<FieldCache>> {
        self.field_caches.read_recover("registry.field_caches").clone()
    }

    pub fn query_caches(&self) -> Vec<Arc<QueryCache>> {
        self.query_caches.read_recover("registry.query_caches").clone()
    }

    /// Remove every entry of one zone. The registered caches stay.
    pub fn clear_zone(&self, zone: impl Into<Zone>) -> bool {
        let zone = zone.into();
        let Some(backend) = self.backend() else {
            debug!(zone = %zone, "no backend installed; nothing to clear");
            return false;
        };
        let cleared = backend.clear_zone(&zone);
        info!(zone = %zone, cleared, "cache zone cleared");
        cleared
    }

    /// Remove every entry of every zone. The registered caches stay.
    pub fn clear(&self) -> bool {
        let Some(backend) = self.backend() else {
            debug!("no backend installed; nothing to clear");
            return false;
        };
        let cleared = backend.clear();
        info!(cleared, "all cache zones cleared");
        cleared
    }

    /// Open a scope over every registered cache for operations arriving
    /// through `transport`.
    ///
    /// The scope snapshots the registered caches; caches registered later
    /// take part in scopes opened after them.
    pub fn scope(&self, transport: Transport) -> RequestScope {
        if !self.is_active() {
            return RequestScope::empty(transport);
        }

        RequestScope {
            transport,
            measure_performance: self.config.measure_performance,
            started: None,
            fields: self
                .field_caches()
                .into_iter()
                .map(|cache| (cache, FieldCacheState::default()))
                .collect(),
            queries: self
                .query_caches()
                .into_iter()
                .map(|cache| (cache, QueryCacheState::default()))
                .collect(),
        }
    }
}

/// Every registered cache paired with its per-operation state.
///
/// An in-process scope may be reused for any number of calls: finalization
/// returns it to a clean state. An HTTP scope serves one request and keeps
/// its state until dropped, so [`status`](Self::status) stays readable.
pub struct RequestScope {
    transport: Transport,
    measure_performance: bool,
    started: Option<Instant>,
    fields: Vec<(Arc<FieldCache>, FieldCacheState)>,
    queries: Vec<(Arc<QueryCache>, QueryCacheState)>,
}

impl RequestScope {
    fn empty(transport: Transport) -> Self {
        Self {
            transport,
            measure_performance: false,
            started: None,
            fields: Vec::new(),
            queries: Vec::new(),
        }
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// True when no cache takes part in this scope.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.queries.is_empty()
    }

    /// Status as currently observable from the retained state.
    pub fn status(&self) -> PendingStatus {
        PendingStatus {
            fields: self
                .fields
                .iter()
                .filter(|(_, state)| state.has_match())
                .map(|(cache, state)| FieldStatus {
                    field: sanitize(cache.field_name()),
                    outcome: Outcome::from_hit(state.has_hit()),
                })
                .collect(),
            query: self
                .queries
                .iter()
                .find_map(|(cache, state)| cache.status(state)),
            duration: self.elapsed(),
        }
    }

    /// True once a field cache told the executor to skip a resolver, so the
    /// response must be rewritten at finalization.
    pub fn has_field_hits(&self) -> bool {
        self.fields.iter().any(|(_, state)| state.has_hit())
    }

    /// Return every cache to its idle state.
    pub fn reset(&mut self) {
        for (_, state) in &mut self.fields {
            state.reset();
        }
        for (_, state) in &mut self.queries {
            state.reset();
        }
        self.started = None;
    }

    fn elapsed(&self) -> Option<std::time::Duration> {
        self.started.map(|started| started.elapsed())
    }
}

impl ExecutionHooks for RequestScope {
    fn on_request_start(
        &mut self,
        request: &GraphQLRequest,
        principal: &Principal,
    ) -> RequestStart {
        self.reset();
        if self.measure_performance {
            self.started = Some(Instant::now());
        }

        let hit = self
            .queries
            .iter_mut()
            .find_map(|(cache, state)| cache.on_request_start(state, request, principal));
        if let Some(body) = hit {
            let status = PendingStatus {
                query: Some(Outcome::Hit),
                duration: self.elapsed(),
                ..Default::default()
            };
            if self.transport == Transport::InProcess {
                self.reset();
            }
            return RequestStart::Respond(EarlyResponse { body, status });
        }

        for (cache, state) in &mut self.fields {
            cache.on_request_start(state, request, principal);
        }
        RequestStart::Continue
    }

    fn on_before_field_resolve(&mut self, field: &FieldResolve<'_>) -> Resolution {
        let mut resolution = Resolution::Continue;
        for (cache, state) in &mut self.fields {
            if cache.on_before_field_resolve(state, field) == Resolution::Skip {
                resolution = Resolution::Skip;
            }
        }
        resolution
    }

    fn on_response_finalize(&mut self, response: &mut dyn ResponseBody) -> PendingStatus {
        let transport = self.transport;

        let fields = self
            .fields
            .iter_mut()
            .filter_map(|(cache, state)| {
                cache.on_response_finalize(state, &mut *response, transport)
            })
            .collect();

        let mut query = None;
        for (cache, state) in &mut self.queries {
            let outcome = cache.on_response_finalize(state, &*response, transport);
            query = query.or(outcome);
        }

        let status = PendingStatus {
            fields,
            query,
            duration: self.elapsed(),
        };
        if transport == Transport::InProcess {
            self.started = None;
        }
        status
    }
}
