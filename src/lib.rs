//! Lookaside field and query caching for GraphQL execution pipelines.

pub mod cache;
pub mod config;
pub mod infra;
