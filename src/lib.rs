//! vhostd - virtual host and path-mapping configuration engine.
//!
//! vhostd manages the virtual hosts served by a machine and the path mappings
//! that route requests on them, and keeps two things in sync: a durable store
//! of that model and the configuration of an external nginx-style serving
//! process. It does not serve traffic itself.
//!
//! # Features
//! - Top-level, alias and wildcard virtual hosts with a protected primary host
//! - Path mappings matching by `equals`, `begins-with`, `contains` or `ends-with`
//!   and dispatching to a URL, an installed service, a redirect, an inline body
//!   or a bare status code
//! - Structural invariants checked before anything is written
//! - Deterministic rendering of one `server` block per top-level host
//! - Transactional commands: a failed apply or reload rolls the store and the
//!   serving configuration back to their previous state
//! - Structured tracing per command and `metrics` facade counters
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use vhostd::{
//!     adapters::{ConfiguredPrimaryHost, MemoryStore, NginxServingLayer, StaticServicesRegistry},
//!     core::{CommandEngine, CreateVirtualHost, model::{Fqdn, VirtualHostType}},
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let engine = CommandEngine::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(NginxServingLayer::new("/etc/nginx/vhostd.d", vec!["nginx".into(), "-s".into(), "reload".into()])),
//!     Arc::new(StaticServicesRegistry::default()),
//!     Arc::new(ConfiguredPrimaryHost::new(None)),
//! );
//! engine
//!     .create_virtual_host(CreateVirtualHost {
//!         hostname: Fqdn::new("example.com")?,
//!         kind: VirtualHostType::TopLevel,
//!         parent_hostname: None,
//!     })
//!     .await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping business logic inside `core`. The model, validator, resolver
//! and synthesizer are pure; only the command engine talks to ports.
//!
//! # Error Handling
//! Library APIs return domain specific `thiserror` enums; every engine error
//! reports whether the caller or the infrastructure is at fault. The binary
//! wraps them in `eyre` reports.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{ConfiguredPrimaryHost, JsonFileStore, MemoryStore, NginxServingLayer, StaticServicesRegistry},
    core::{CommandEngine, EngineError, EngineResult},
};
