//! Structural analysis for evoloop.
//!
//! Scores attention heads and FFN layers, proposes what can be pruned, flags
//! redundant FFN layers, and estimates how risky the proposed removal is.
//! Everything here is advisory; nothing in this crate touches a model.

#![warn(missing_docs)]

pub mod analyzer;
pub mod risk;

pub use analyzer::StructuralAnalyzer;
pub use risk::{fragmentation, positional_order, pruning_risk, removal_set};
