//! Filtering-selectivity estimation for opaque conditions, on a 0..1
//! scale (1.0 lets everything through).

use crate::condition::{ConditionArena, ConditionId, ConditionKind};
use crate::trace::OptimizerTrace;

/// Fallback when statistics say nothing about an equality.
const EQUALITY_SELECTIVITY: f64 = 0.1;

/// Fallback for non-equality comparisons.
const COMPARISON_SELECTIVITY: f64 = 1.0 / 3.0;

/// Estimates how selective the given condition is. A caller-provided hint
/// wins; otherwise the estimate degrades to fixed per-shape fallbacks.
pub fn estimate_selectivity(
    conditions: &ConditionArena,
    condition_id: ConditionId,
    trace: &mut OptimizerTrace,
) -> f64 {
    let selectivity = estimate_selectivity_inner(conditions, condition_id);
    if trace.is_enabled() {
        trace.append(format!(
            " - found selectivity {:.3} for condition {}\n",
            selectivity,
            conditions.get(condition_id).label
        ));
    }
    selectivity
}

fn estimate_selectivity_inner(conditions: &ConditionArena, condition_id: ConditionId) -> f64 {
    let condition = conditions.get(condition_id);
    if let Some(hint) = condition.selectivity_hint {
        return hint.clamp(0.0, 1.0);
    }
    match &condition.kind {
        ConditionKind::Equality { .. } => EQUALITY_SELECTIVITY,
        ConditionKind::Comparison => COMPARISON_SELECTIVITY,
        ConditionKind::And(parts) => parts
            .iter()
            .map(|&p| estimate_selectivity_inner(conditions, p))
            .product::<f64>()
            .clamp(0.0, 1.0),
        ConditionKind::Or(parts) => {
            // Independence assumption: 1 − Π(1 − sᵢ).
            let pass_none: f64 = parts
                .iter()
                .map(|&p| 1.0 - estimate_selectivity_inner(conditions, p))
                .product();
            (1.0 - pass_none).clamp(0.0, 1.0)
        }
        ConditionKind::Other => EQUALITY_SELECTIVITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;
    use hyperjoin_orders::Term;

    #[test]
    fn fallbacks_and_hints() {
        let mut arena = ConditionArena::new();
        let eq = arena.add(Condition::equality(
            Term::new("t1.x", 0b01),
            Term::new("t2.x", 0b10),
        ));
        let cmp = arena.add(Condition::comparison("t1.x < 3", 0b01));
        let hinted = arena.add(Condition::comparison("t1.y < 3", 0b01).with_selectivity(0.25));
        let wild_hint = arena.add(Condition::comparison("t1.z < 3", 0b01).with_selectivity(7.0));

        let mut trace = OptimizerTrace::disabled();
        assert_eq!(estimate_selectivity(&arena, eq, &mut trace), 0.1);
        assert_eq!(estimate_selectivity(&arena, cmp, &mut trace), 1.0 / 3.0);
        assert_eq!(estimate_selectivity(&arena, hinted, &mut trace), 0.25);
        // Hints are clamped into [0, 1].
        assert_eq!(estimate_selectivity(&arena, wild_hint, &mut trace), 1.0);
    }
}
