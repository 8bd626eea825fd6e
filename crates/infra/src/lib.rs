//! Infrastructure layer: store adapters, audit sinks, configuration.

pub mod audit;
pub mod config;
pub mod memory;
pub mod postgres;

pub use audit::{FanoutAuditSink, InMemoryAuditSink, PostgresAuditSink, TracingAuditSink};
pub use config::{ConfigError, InfraConfig};
pub use memory::InMemoryDirectory;
pub use postgres::PostgresDirectory;
