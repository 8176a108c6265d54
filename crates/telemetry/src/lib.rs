//! Telemetry ingestion and usage profiling.
//!
//! The store side ([`TelemetrySource`], [`InMemoryTelemetryStore`]) accepts
//! records from many concurrent writers and fans them out to continuous
//! consumers. The [`UsageProfiler`] turns a window of records into a
//! [`UsageProfile`](evoloop_core::UsageProfile).

#![warn(missing_docs)]

pub mod source;
pub mod store;
pub mod profiler;

pub use source::{Result, TelemetryError, TelemetrySource, WindowSpec};
pub use store::InMemoryTelemetryStore;
pub use profiler::UsageProfiler;
