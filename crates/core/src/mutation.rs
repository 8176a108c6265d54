//! Structural mutation descriptors.

use serde::{Deserialize, Serialize};

use crate::artifact::Precision;
use crate::component::ComponentId;

/// One structural operation in a mutation plan.
///
/// Plans are ordered lists of these; the evolution engine and the registry
/// both match on them exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    /// Remove a single attention head.
    PruneHead {
        /// Layer index
        layer: u32,
        /// Head index
        head: u32,
    },
    /// Remove a whole transformer layer.
    PruneLayer {
        /// Layer index
        layer: u32,
    },
    /// Re-encode all weights at a lower precision.
    Quantize {
        /// Target precision
        precision: Precision,
    },
    /// Factorize the embedding table to the given rank.
    CompressEmbedding {
        /// Target rank
        rank: u32,
    },
}

impl Mutation {
    /// Component the mutation removes, if it is a structural removal.
    pub fn target(&self) -> Option<ComponentId> {
        match self {
            Mutation::PruneHead { layer, head } => Some(ComponentId::head(*layer, *head)),
            Mutation::PruneLayer { layer } => Some(ComponentId::ffn(*layer)),
            Mutation::Quantize { .. } => None,
            Mutation::CompressEmbedding { .. } => Some(ComponentId::Embedding),
        }
    }

    /// Whether this mutation removes structure (counts against the per-cycle budget).
    pub fn is_removal(&self) -> bool {
        matches!(self, Mutation::PruneHead { .. } | Mutation::PruneLayer { .. })
    }

    /// Short kind label used in logs and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::PruneHead { .. } => "prune_head",
            Mutation::PruneLayer { .. } => "prune_layer",
            Mutation::Quantize { .. } => "quantize",
            Mutation::CompressEmbedding { .. } => "compress_embedding",
        }
    }
}

impl std::fmt::Display for Mutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mutation::PruneHead { layer, head } => write!(f, "prune_head(L{}.H{})", layer, head),
            Mutation::PruneLayer { layer } => write!(f, "prune_layer(L{})", layer),
            Mutation::Quantize { precision } => write!(f, "quantize({:?})", precision),
            Mutation::CompressEmbedding { rank } => write!(f, "compress_embedding(rank={})", rank),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_serialization() {
        let m = Mutation::PruneHead { layer: 2, head: 1 };
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#"{"kind":"prune_head","layer":2,"head":1}"#);
        let q: Mutation = serde_json::from_str(r#"{"kind":"quantize","precision":"int8"}"#).unwrap();
        assert_eq!(q, Mutation::Quantize { precision: Precision::Int8 });
    }

    #[test]
    fn test_removal_classification() {
        assert!(Mutation::PruneLayer { layer: 1 }.is_removal());
        assert!(!Mutation::CompressEmbedding { rank: 32 }.is_removal());
        assert_eq!(Mutation::PruneLayer { layer: 4 }.target(), Some(ComponentId::ffn(4)));
    }
}
