//! Model registry.
//!
//! An append-only ledger of [`ModelVersion`](evoloop_core::ModelVersion)s
//! plus one atomically swapped active pointer. Serving layers read the
//! pointer lock-free and learn about swaps through a watch channel.

#![warn(missing_docs)]

pub mod registry;

pub use registry::{ModelRegistry, RegistryError, RegistrySummary, Result};
