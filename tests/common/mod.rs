//! Minimal execution engine driving the cache hooks the way a GraphQL
//! server would: request start, one pre-resolve call per field, finalize.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use graphql_cache::cache::{
    BackendKind, CacheConfig, CacheRegistry, ExecutionHooks, ExecutionResponse, FieldResolve,
    GraphQLRequest, MemoryBackend, PathSegment, PendingStatus, Principal, RequestStart, Resolution,
    ResponseBody,
};
use serde_json::{Map, Value, json};

/// Resolver a root field is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolver {
    /// Looks up a post title by `id`.
    Post,
    /// Fails with an error scoped to the field.
    Broken,
    /// Fails with an error that carries no path.
    Crash,
}

#[derive(Debug, Clone)]
pub struct RootField {
    pub response_key: String,
    pub resolver: Resolver,
    pub arguments: Map<String, Value>,
}

impl RootField {
    pub fn post(response_key: &str, id: u64) -> Self {
        let mut arguments = Map::new();
        arguments.insert("id".to_string(), json!(id));
        Self {
            response_key: response_key.to_string(),
            resolver: Resolver::Post,
            arguments,
        }
    }

    pub fn broken(response_key: &str) -> Self {
        Self {
            response_key: response_key.to_string(),
            resolver: Resolver::Broken,
            arguments: Map::new(),
        }
    }

    pub fn crash(response_key: &str) -> Self {
        Self {
            response_key: response_key.to_string(),
            resolver: Resolver::Crash,
            arguments: Map::new(),
        }
    }
}

/// A request plus the root fields the engine will resolve for it.
#[derive(Debug, Clone)]
pub struct Operation {
    pub request: GraphQLRequest,
    pub fields: Vec<RootField>,
}

impl Operation {
    pub fn new(query: &str, fields: Vec<RootField>) -> Self {
        Self {
            request: GraphQLRequest::new(query),
            fields,
        }
    }

    pub fn named(mut self, operation_name: &str) -> Self {
        self.request = self.request.with_operation_name(operation_name);
        self
    }
}

#[derive(Debug)]
pub struct Execution {
    pub body: Value,
    pub status: PendingStatus,
    /// True when the request ended at request start.
    pub short_circuited: bool,
}

impl Execution {
    pub fn title(&self, response_key: &str) -> Option<&str> {
        self.body["data"][response_key]["title"].as_str()
    }

    pub fn field_header(&self) -> Option<String> {
        self.status.field_header()
    }
}

/// Data source plus resolver bookkeeping.
#[derive(Default)]
pub struct Engine {
    posts: RwLock<HashMap<u64, String>>,
    resolver_calls: AtomicUsize,
}

impl Engine {
    pub fn new() -> Self {
        let engine = Self::default();
        engine.set_title(1, "A Post");
        engine.set_title(2, "Another Post");
        engine
    }

    pub fn set_title(&self, id: u64, title: &str) {
        self.posts
            .write()
            .expect("posts lock")
            .insert(id, title.to_string());
    }

    pub fn resolver_calls(&self) -> usize {
        self.resolver_calls.load(Ordering::SeqCst)
    }

    /// Execute with a generic JSON value as the response shape.
    pub fn execute(
        &self,
        hooks: &mut impl ExecutionHooks,
        principal: &Principal,
        operation: &Operation,
    ) -> Execution {
        self.run(hooks, principal, operation, |data, errors| {
            let mut body = json!({ "data": Value::Object(data) });
            if !errors.is_empty() {
                body["errors"] = Value::Array(errors);
            }
            body
        })
    }

    /// Execute with the typed response shape the HTTP layer uses.
    pub fn execute_typed(
        &self,
        hooks: &mut impl ExecutionHooks,
        principal: &Principal,
        operation: &Operation,
    ) -> Execution {
        self.run(hooks, principal, operation, |data, errors| ExecutionResponse {
            data: Some(data),
            errors,
            extensions: None,
        })
    }

    fn run<R: ResponseBody>(
        &self,
        hooks: &mut impl ExecutionHooks,
        principal: &Principal,
        operation: &Operation,
        assemble: impl FnOnce(Map<String, Value>, Vec<Value>) -> R,
    ) -> Execution {
        if let RequestStart::Respond(early) = hooks.on_request_start(&operation.request, principal) {
            return Execution {
                body: serde_json::from_str(&early.body).expect("cached body is json"),
                status: early.status,
                short_circuited: true,
            };
        }

        let (data, errors) = self.resolve_all(hooks, operation);
        let mut response = assemble(data, errors);
        let status = hooks.on_response_finalize(&mut response);
        let encoded = response.to_json().expect("response encodes");
        Execution {
            body: serde_json::from_str(&encoded).expect("response is json"),
            status,
            short_circuited: false,
        }
    }

    fn resolve_all(
        &self,
        hooks: &mut impl ExecutionHooks,
        operation: &Operation,
    ) -> (Map<String, Value>, Vec<Value>) {
        let mut data = Map::new();
        let mut errors = Vec::new();

        for field in &operation.fields {
            let path = [PathSegment::Field(field.response_key.clone())];
            let resolution = hooks.on_before_field_resolve(&FieldResolve {
                path: &path,
                arguments: &field.arguments,
                resolver: "RootQuery",
            });
            if resolution == Resolution::Skip {
                data.insert(field.response_key.clone(), Value::Null);
                continue;
            }

            self.resolver_calls.fetch_add(1, Ordering::SeqCst);
            match field.resolver {
                Resolver::Post => {
                    let value = self.resolve_post(hooks, field);
                    data.insert(field.response_key.clone(), value);
                }
                Resolver::Broken => {
                    data.insert(field.response_key.clone(), Value::Null);
                    errors.push(json!({
                        "message": "Internal server error",
                        "path": [field.response_key.as_str()],
                    }));
                }
                Resolver::Crash => {
                    data.insert(field.response_key.clone(), Value::Null);
                    errors.push(json!({ "message": "Internal server error" }));
                }
            }
        }

        (data, errors)
    }

    fn resolve_post(&self, hooks: &mut impl ExecutionHooks, field: &RootField) -> Value {
        // Nested fields go through the hooks too; they must never match.
        let nested = [
            PathSegment::Field(field.response_key.clone()),
            PathSegment::Field("title".to_string()),
        ];
        let empty = Map::new();
        let nested_resolution = hooks.on_before_field_resolve(&FieldResolve {
            path: &nested,
            arguments: &empty,
            resolver: "Post.title",
        });
        assert_eq!(nested_resolution, Resolution::Continue);

        let id = field.arguments.get("id").and_then(Value::as_u64).unwrap_or(0);
        match self.posts.read().expect("posts lock").get(&id) {
            Some(title) => json!({ "title": title }),
            None => Value::Null,
        }
    }
}

pub fn memory_config() -> CacheConfig {
    CacheConfig {
        backend: BackendKind::Memory,
        ..CacheConfig::default()
    }
}

pub fn memory_registry(config: CacheConfig) -> (Arc<CacheRegistry>, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let registry = Arc::new(CacheRegistry::with_backend(config, backend.clone()));
    (registry, backend)
}

pub const GET_POSTS: &str = "query getPosts($id: ID!) { post(id: $id) { title } }";
