use hyperjoin_common::bitset::{table_bitmap, NodeMap};

use crate::condition::ConditionId;

/// Handle of an expression in an [`ExprArena`].
pub type ExprId = usize;

/// Node type of a relational expression. The planner receives a binary
/// join tree; `MultiInnerJoin` is a placeholder for flattened n-ary inner
/// joins and is lowered to a left-deep chain when built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelExprType {
    Table,
    InnerJoin,
    LeftJoin,
    Semijoin,
    Antijoin,
    StraightInnerJoin,
    FullOuterJoin,
    MultiInnerJoin,
    CartesianProduct,
}

impl RelExprType {
    /// Inner joins are freely commutative; everything else fixes its
    /// sides. (Straight joins are inner joins with an explicit order
    /// request, so they do not commute either.)
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            RelExprType::InnerJoin | RelExprType::MultiInnerJoin | RelExprType::CartesianProduct
        )
    }

    pub fn is_inner(self) -> bool {
        matches!(
            self,
            RelExprType::InnerJoin
                | RelExprType::StraightInnerJoin
                | RelExprType::MultiInnerJoin
                | RelExprType::CartesianProduct
        )
    }
}

/// A residual non-reorderability constraint attached to a join: if any
/// node of `needed_to_activate_rule` is part of the subjoin being formed,
/// all of `required_nodes` must be too. Expresses constraints the
/// hyperedge endpoints alone cannot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConflictRule {
    pub needed_to_activate_rule: NodeMap,
    pub required_nodes: NodeMap,
}

/// One node of the join tree: a base table, or a binary join over two
/// subtrees.
#[derive(Clone, Debug)]
pub struct RelationalExpression {
    pub type_: RelExprType,
    pub left: Option<ExprId>,
    pub right: Option<ExprId>,
    /// Table index, for `Table` nodes.
    pub table: Option<usize>,

    /// Non-equijoin ("residual") join conditions.
    pub join_conditions: Vec<ConditionId>,
    /// Conditions suitable for hash join; populated by equijoin detection
    /// during hypergraph construction.
    pub equijoin_conditions: Vec<ConditionId>,

    pub conflict_rules: Vec<ConflictRule>,

    /// All tables under this node, as a table bitmap.
    pub tables_in_subtree: NodeMap,
}

/// Arena of relational expressions; the tree is expressed through
/// [`ExprId`] indices.
#[derive(Debug, Default)]
pub struct ExprArena {
    exprs: Vec<RelationalExpression>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fully-formed expression; the regular entry points are
    /// [`ExprArena::table`] and [`ExprArena::join`], but synthetic graphs
    /// (simplification tests, benchmarks) construct nodes directly.
    pub fn push(&mut self, expr: RelationalExpression) -> ExprId {
        self.exprs.push(expr);
        self.exprs.len() - 1
    }

    pub fn get(&self, id: ExprId) -> &RelationalExpression {
        &self.exprs[id]
    }

    pub fn get_mut(&mut self, id: ExprId) -> &mut RelationalExpression {
        &mut self.exprs[id]
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    /// A leaf node for the given table index.
    pub fn table(&mut self, table_idx: usize) -> ExprId {
        self.exprs.push(RelationalExpression {
            type_: RelExprType::Table,
            left: None,
            right: None,
            table: Some(table_idx),
            join_conditions: Vec::new(),
            equijoin_conditions: Vec::new(),
            conflict_rules: Vec::new(),
            tables_in_subtree: table_bitmap(table_idx),
        });
        self.exprs.len() - 1
    }

    /// A binary join over two subtrees, with the given raw join
    /// conditions (equijoin detection happens later).
    pub fn join(
        &mut self,
        type_: RelExprType,
        left: ExprId,
        right: ExprId,
        join_conditions: Vec<ConditionId>,
    ) -> ExprId {
        debug_assert!(type_ != RelExprType::Table);
        let tables_in_subtree =
            self.exprs[left].tables_in_subtree | self.exprs[right].tables_in_subtree;
        debug_assert_eq!(
            self.exprs[left].tables_in_subtree & self.exprs[right].tables_in_subtree,
            0
        );
        self.exprs.push(RelationalExpression {
            type_,
            left: Some(left),
            right: Some(right),
            table: None,
            join_conditions,
            equijoin_conditions: Vec::new(),
            conflict_rules: Vec::new(),
            tables_in_subtree,
        });
        self.exprs.len() - 1
    }

    /// Lowers an n-ary inner join (the `MultiInnerJoin` placeholder) to a
    /// left-deep chain of inner joins. The conditions land on the topmost
    /// join; predicate pushdown sinks them to the right level afterwards.
    pub fn multi_inner_join(
        &mut self,
        children: Vec<ExprId>,
        join_conditions: Vec<ConditionId>,
    ) -> ExprId {
        debug_assert!(children.len() >= 2);
        let mut iter = children.into_iter();
        let mut root = iter.next().expect("at least two children");
        for child in iter {
            root = self.join(RelExprType::InnerJoin, root, child, Vec::new());
        }
        self.get_mut(root).join_conditions = join_conditions;
        root
    }
}
