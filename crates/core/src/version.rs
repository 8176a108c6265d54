//! Registry entries.

use serde::{Deserialize, Serialize};

use crate::id::VersionId;
use crate::mutation::Mutation;
use crate::validation::{ValidationReport, Verdict};
use crate::Time;

/// An immutable entry in the model registry.
///
/// Every version except the root names a parent that was registered before
/// it, so lineage forms a tree rooted at the base model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub id: VersionId,
    /// `None` only for the root
    pub parent: Option<VersionId>,
    pub optimizations: Vec<Mutation>,
    pub compression_ratio: f64,
    pub accuracy_drop_pct: f64,
    pub parameters: u64,
    pub size_bytes: u64,
    /// SHA-256 of the stored artifact
    pub artifact_digest: String,
    /// Attached report; its verdict is the version's validation status
    pub validation: ValidationReport,
    /// What triggered the cycle that produced this version
    pub trigger: String,
    pub created_at: Time,
}

impl ModelVersion {
    /// Validation status of this version.
    pub fn status(&self) -> Verdict {
        self.validation.verdict
    }

    /// Whether this version may be served.
    pub fn is_servable(&self) -> bool {
        self.validation.passed()
    }

    /// Whether this is the root of the lineage tree.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}
