use hyperjoin_common::bitset::{is_subset, NodeMap};
use hyperjoin_orders::Term;
use itertools::Itertools;

/// Handle of a condition in a [`ConditionArena`].
pub type ConditionId = usize;

/// The structural shape of a condition, as far as the planner cares:
/// enough to detect equi-join conditions, estimate selectivity, and derive
/// weaker one-sided conditions from disjunctions. Everything else is
/// opaque.
#[derive(Clone, Debug)]
pub enum ConditionKind {
    /// `left = right`. Hash-joinable when the two sides read disjoint
    /// table sets straddling a join.
    Equality { left: Term, right: Term },
    /// A non-equality comparison (<, <=, between, ...).
    Comparison,
    And(Vec<ConditionId>),
    Or(Vec<ConditionId>),
    Other,
}

/// An opaque scalar condition. `used_tables` is the set of tables the
/// condition reads (the syntactic eligibility set); `label` is used for
/// tracing only.
#[derive(Clone, Debug)]
pub struct Condition {
    pub label: String,
    pub used_tables: NodeMap,
    pub kind: ConditionKind,
    /// Caller-provided selectivity estimate, when statistics had
    /// something to say; the fixed fallbacks apply otherwise.
    pub selectivity_hint: Option<f64>,
    /// The multiple equality this condition was concretized from, if any.
    /// Used to avoid double-counting selectivity for implied equalities.
    pub source_multiple_equality: Option<usize>,
}

impl Condition {
    pub fn equality(left: Term, right: Term) -> Self {
        Self {
            label: format!("{} = {}", left.label, right.label),
            used_tables: left.tables | right.tables,
            kind: ConditionKind::Equality { left, right },
            selectivity_hint: None,
            source_multiple_equality: None,
        }
    }

    pub fn comparison(label: impl Into<String>, used_tables: NodeMap) -> Self {
        Self {
            label: label.into(),
            used_tables,
            kind: ConditionKind::Comparison,
            selectivity_hint: None,
            source_multiple_equality: None,
        }
    }

    pub fn opaque(label: impl Into<String>, used_tables: NodeMap) -> Self {
        Self {
            label: label.into(),
            used_tables,
            kind: ConditionKind::Other,
            selectivity_hint: None,
            source_multiple_equality: None,
        }
    }

    pub fn with_selectivity(mut self, selectivity: f64) -> Self {
        self.selectivity_hint = Some(selectivity);
        self
    }

    pub fn from_multiple_equality(mut self, idx: usize) -> Self {
        self.source_multiple_equality = Some(idx);
        self
    }
}

/// Arena of all conditions in one query block, addressed by
/// [`ConditionId`].
#[derive(Debug, Default)]
pub struct ConditionArena {
    conditions: Vec<Condition>,
}

impl ConditionArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, condition: Condition) -> ConditionId {
        self.conditions.push(condition);
        self.conditions.len() - 1
    }

    pub fn get(&self, id: ConditionId) -> &Condition {
        &self.conditions[id]
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Combines several conditions into one conjunction (or returns the
    /// single condition unchanged).
    pub fn and(&mut self, parts: Vec<ConditionId>) -> ConditionId {
        debug_assert!(!parts.is_empty());
        if parts.len() == 1 {
            return parts[0];
        }
        let label = parts.iter().map(|&p| self.get(p).label.clone()).join(" and ");
        let used_tables = parts.iter().fold(0, |acc, &p| acc | self.get(p).used_tables);
        self.add(Condition {
            label,
            used_tables,
            kind: ConditionKind::And(parts),
            selectivity_hint: None,
            source_multiple_equality: None,
        })
    }

    /// Splits a condition into its top-level conjuncts, recursively.
    pub fn extract_conditions(&self, id: ConditionId, out: &mut Vec<ConditionId>) {
        match &self.get(id).kind {
            ConditionKind::And(parts) => {
                for &part in parts.clone().iter() {
                    self.extract_conditions(part, out);
                }
            }
            _ => out.push(id),
        }
    }

    /// Derives a weaker condition that references only `tables`, or `None`
    /// if nothing useful can be said from this condition about those
    /// tables alone. Used for partial pushdown: for
    /// `(t1.x = 1 AND t2.y = 2) OR (t1.x = 3 AND t2.y = 4)` we can push
    /// `(t1.x = 1 OR t1.x = 3)` down to t1 while keeping the original
    /// condition in place.
    pub fn make_condition_for_tables(
        &mut self,
        id: ConditionId,
        tables: NodeMap,
    ) -> Option<ConditionId> {
        let condition = self.get(id);
        if condition.used_tables == 0 {
            // Table-independent conditions are not worth duplicating.
            return None;
        }
        if is_subset(condition.used_tables, tables) {
            return Some(id);
        }
        match condition.kind.clone() {
            ConditionKind::And(parts) => {
                let extracted: Vec<ConditionId> = parts
                    .iter()
                    .filter_map(|&part| self.make_condition_for_tables(part, tables))
                    .collect();
                if extracted.is_empty() {
                    None
                } else {
                    Some(self.and(extracted))
                }
            }
            ConditionKind::Or(parts) => {
                // Every disjunct must contribute, or the derived condition
                // would wrongly filter rows.
                let extracted: Vec<ConditionId> = parts
                    .iter()
                    .map(|&part| self.make_condition_for_tables(part, tables))
                    .collect::<Option<Vec<_>>>()?;
                let label = extracted
                    .iter()
                    .map(|&p| self.get(p).label.clone())
                    .join(" or ");
                let used_tables =
                    extracted.iter().fold(0, |acc, &p| acc | self.get(p).used_tables);
                Some(self.add(Condition {
                    label,
                    used_tables,
                    kind: ConditionKind::Or(extracted),
                    selectivity_hint: None,
                    source_multiple_equality: None,
                }))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(label: &str, tables: NodeMap) -> Term {
        Term::new(label, tables)
    }

    #[test]
    fn extract_splits_nested_conjunctions() {
        let mut arena = ConditionArena::new();
        let a = arena.add(Condition::comparison("a", 0b01));
        let b = arena.add(Condition::comparison("b", 0b10));
        let c = arena.add(Condition::comparison("c", 0b10));
        let bc = arena.and(vec![b, c]);
        let all = arena.and(vec![a, bc]);

        let mut out = Vec::new();
        arena.extract_conditions(all, &mut out);
        assert_eq!(out, vec![a, b, c]);
    }

    #[test]
    fn or_decomposition_derives_one_sided_conditions() {
        // (t1.x = 1 AND t2.y = 2) OR (t1.x = 3 AND t2.y = 4)
        let mut arena = ConditionArena::new();
        let x1 = arena.add(Condition::equality(term("t1.x", 0b01), term("1", 0)));
        let y2 = arena.add(Condition::equality(term("t2.y", 0b10), term("2", 0)));
        let x3 = arena.add(Condition::equality(term("t1.x", 0b01), term("3", 0)));
        let y4 = arena.add(Condition::equality(term("t2.y", 0b10), term("4", 0)));
        let left = arena.and(vec![x1, y2]);
        let right = arena.and(vec![x3, y4]);
        let used = arena.get(left).used_tables | arena.get(right).used_tables;
        let disjunction = arena.add(Condition {
            label: "or".into(),
            used_tables: used,
            kind: ConditionKind::Or(vec![left, right]),
            selectivity_hint: None,
            source_multiple_equality: None,
        });

        let pushed = arena.make_condition_for_tables(disjunction, 0b01).unwrap();
        assert_eq!(arena.get(pushed).used_tables, 0b01);
        assert!(matches!(arena.get(pushed).kind, ConditionKind::Or(_)));

        // Nothing one-sided can be derived from a plain cross-table
        // comparison.
        let cross = arena.add(Condition::comparison("t1.x < t2.y", 0b11));
        assert!(arena.make_condition_for_tables(cross, 0b01).is_none());
    }
}
