//! Pruning-risk function.
//!
//! Risk grows with the share of the model removed and is scaled up
//! when the removed components are scattered across the model rather than
//! forming one contiguous block.

use std::collections::{BTreeMap, BTreeSet};

use evoloop_core::{ComponentId, HeadId};

/// Scored components in model order: layer by layer, heads before the FFN.
pub fn positional_order(importance: &BTreeMap<ComponentId, f64>) -> Vec<ComponentId> {
    let mut order: Vec<ComponentId> = importance
        .keys()
        .copied()
        .filter(|id| id.layer().is_some())
        .collect();
    order.sort_by_key(|id| match *id {
        ComponentId::Head { layer, head } => (layer, 0, head),
        ComponentId::Ffn { layer } => (layer, 1, 0),
        _ => (u32::MAX, 2, 0),
    });
    order
}

/// Components removed by pruning the given heads and whole layers.
///
/// A pruned layer removes every scored head of that layer and its FFN.
pub fn removal_set(
    importance: &BTreeMap<ComponentId, f64>,
    heads: &[HeadId],
    layers: &[u32],
) -> BTreeSet<ComponentId> {
    let mut removed: BTreeSet<ComponentId> = heads.iter().map(|h| ComponentId::from(*h)).collect();
    for id in importance.keys() {
        if let Some(layer) = id.layer() {
            if layers.contains(&layer) {
                removed.insert(*id);
            }
        }
    }
    removed
}

/// `(runs - 1) / (n - 1)` over the positions of the removed components.
///
/// 0 for a single contiguous block (or fewer than two components), 1 when
/// no two removed components are adjacent.
pub fn fragmentation(
    importance: &BTreeMap<ComponentId, f64>,
    removed: &BTreeSet<ComponentId>,
) -> f64 {
    let positions: Vec<usize> = positional_order(importance)
        .iter()
        .enumerate()
        .filter(|(_, id)| removed.contains(*id))
        .map(|(i, _)| i)
        .collect();

    let n = positions.len();
    if n < 2 {
        return 0.0;
    }
    let runs = 1 + positions.windows(2).filter(|w| w[1] != w[0] + 1).count();
    (runs - 1) as f64 / (n - 1) as f64
}

/// Risk of removing `removed`, clamped to `[0, 1]`.
///
/// The removed share is the larger of the importance-mass share and the
/// component-count share, so removing idle components still carries risk.
pub fn pruning_risk(
    importance: &BTreeMap<ComponentId, f64>,
    removed: &BTreeSet<ComponentId>,
    fragmentation_penalty: f64,
) -> f64 {
    let scored: Vec<f64> = removed
        .iter()
        .filter_map(|id| importance.get(id))
        .copied()
        .collect();
    if scored.is_empty() {
        return 0.0;
    }

    let total: f64 = importance.values().sum();
    let mass_share = if total > 0.0 {
        scored.iter().sum::<f64>() / total
    } else {
        0.0
    };
    let count_share = scored.len() as f64 / importance.len() as f64;
    let removed_share = mass_share.max(count_share);

    let risk = removed_share * (1.0 + fragmentation_penalty * fragmentation(importance, removed));
    risk.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Four layers with two heads each, every component at importance 1.
    fn uniform() -> BTreeMap<ComponentId, f64> {
        let mut m = BTreeMap::new();
        for l in 0..4 {
            m.insert(ComponentId::head(l, 0), 1.0);
            m.insert(ComponentId::head(l, 1), 1.0);
            m.insert(ComponentId::ffn(l), 1.0);
        }
        m
    }

    fn set(ids: &[ComponentId]) -> BTreeSet<ComponentId> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_order_is_layer_major() {
        let order = positional_order(&uniform());
        assert_eq!(order[0], ComponentId::head(0, 0));
        assert_eq!(order[1], ComponentId::head(0, 1));
        assert_eq!(order[2], ComponentId::ffn(0));
        assert_eq!(order[3], ComponentId::head(1, 0));
    }

    #[test]
    fn test_contiguous_block_has_no_fragmentation() {
        let imp = uniform();
        let removed = set(&[ComponentId::head(1, 0), ComponentId::head(1, 1), ComponentId::ffn(1)]);
        assert_eq!(fragmentation(&imp, &removed), 0.0);
    }

    #[test]
    fn test_scattered_removal_is_riskier() {
        let imp = uniform();
        let contiguous = set(&[ComponentId::head(2, 0), ComponentId::head(2, 1)]);
        let scattered = set(&[ComponentId::head(1, 0), ComponentId::head(3, 1)]);

        assert_eq!(fragmentation(&imp, &scattered), 1.0);
        let a = pruning_risk(&imp, &contiguous, 0.5);
        let b = pruning_risk(&imp, &scattered, 0.5);
        assert!(b > a);
        assert!((a - 2.0 / 12.0).abs() < 1e-12);
        assert!((b - 2.0 / 12.0 * 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_idle_components_still_carry_risk() {
        let mut imp = uniform();
        for l in 1..4 {
            imp.insert(ComponentId::head(l, 0), 0.0);
        }
        imp.insert(ComponentId::head(2, 1), 0.0);
        let single = set(&[ComponentId::head(1, 0)]);
        let scattered = set(&[ComponentId::head(1, 0), ComponentId::head(3, 0)]);
        let block = set(&[ComponentId::head(2, 0), ComponentId::head(2, 1)]);

        let one = pruning_risk(&imp, &single, 0.5);
        assert!((one - 1.0 / 12.0).abs() < 1e-12);
        let spread = pruning_risk(&imp, &scattered, 0.5);
        assert!(spread > one);
        assert!((spread - 2.0 / 12.0 * 1.5).abs() < 1e-12);

        // Same count and mass as `scattered`, but one block.
        let packed = pruning_risk(&imp, &block, 0.5);
        assert!((packed - 2.0 / 12.0).abs() < 1e-12);
        assert!(packed < spread);
    }

    #[test]
    fn test_empty_removal_is_zero_and_clamped() {
        let imp = uniform();
        assert_eq!(pruning_risk(&imp, &BTreeSet::new(), 0.5), 0.0);

        let everything: BTreeSet<_> = imp.keys().copied().collect();
        assert_eq!(pruning_risk(&imp, &everything, 10.0), 1.0);
    }

    #[test]
    fn test_removal_set_expands_layers() {
        let imp = uniform();
        let removed = removal_set(&imp, &[HeadId::new(0, 1)], &[2]);
        assert_eq!(removed.len(), 4);
        assert!(removed.contains(&ComponentId::ffn(2)));
        assert!(removed.contains(&ComponentId::head(2, 0)));
    }
}
