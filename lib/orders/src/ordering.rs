use crate::TermHandle;

/// Sort direction of one ordering element. `Irrelevant` is used for
/// grouping elements, which may come in any direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Asc,
    Desc,
    Irrelevant,
}

/// One element of an ordering or grouping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OrderingElement {
    pub term: TermHandle,
    pub direction: Direction,
}

impl OrderingElement {
    pub fn asc(term: TermHandle) -> Self {
        Self { term, direction: Direction::Asc }
    }

    pub fn desc(term: TermHandle) -> Self {
        Self { term, direction: Direction::Desc }
    }

    pub fn grouped(term: TermHandle) -> Self {
        Self { term, direction: Direction::Irrelevant }
    }
}

/// The kind of ordering an [`Ordering`] represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OrderingKind {
    /// An ordering with no elements; not useful in itself, but appears as
    /// an intermediate result.
    Empty,

    /// Specific sequence of elements, each with a specific direction.
    /// Needed for e.g. ORDER BY.
    Order,

    /// Specific sequence of elements, but each element may be ordered in
    /// either direction. Needed for ROLLUP.
    Rollup,

    /// Elements may appear in any sequence and any direction. Needed for
    /// GROUP BY (without ROLLUP), semijoin duplicate removal etc.
    /// Canonically sorted by (equivalence class, term handle).
    Group,
}

/// A (potentially interesting) ordering, rollup or grouping.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ordering {
    kind: OrderingKind,
    elements: Vec<OrderingElement>,
}

impl Ordering {
    pub fn empty() -> Self {
        Self { kind: OrderingKind::Empty, elements: Vec::new() }
    }

    pub fn new(kind: OrderingKind, elements: Vec<OrderingElement>) -> Self {
        let mut ordering = Self { kind, elements };
        ordering.normalize_kind();
        debug_assert!(ordering.valid());
        ordering
    }

    pub fn order(elements: Vec<OrderingElement>) -> Self {
        Self::new(OrderingKind::Order, elements)
    }

    pub fn grouping(elements: Vec<OrderingElement>) -> Self {
        let elements = elements
            .into_iter()
            .map(|e| OrderingElement::grouped(e.term))
            .collect();
        Self::new(OrderingKind::Group, elements)
    }

    pub fn kind(&self) -> OrderingKind {
        self.kind
    }

    pub fn elements(&self) -> &[OrderingElement] {
        &self.elements
    }

    pub fn elements_mut(&mut self) -> &mut Vec<OrderingElement> {
        &mut self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn is_grouping(&self) -> bool {
        self.kind == OrderingKind::Group
    }

    /// The same ordering without its final element. Only meaningful for
    /// orders and rollups.
    pub fn without_last(&self) -> Self {
        debug_assert!(!self.is_empty());
        let mut elements = self.elements.clone();
        elements.pop();
        Self::new(self.kind, elements)
    }

    /// Drops elements from the back until `len` remain.
    pub fn truncate(&mut self, len: usize) {
        self.elements.truncate(len);
        self.normalize_kind();
    }

    /// Removes literal duplicate entries (same term), in place, keeping
    /// the first occurrence.
    pub fn deduplicate(&mut self) {
        let mut length = 0;
        for i in 0..self.elements.len() {
            let elem = self.elements[i];
            if !self.elements[..length].iter().any(|e| e.term == elem.term) {
                self.elements[length] = elem;
                length += 1;
            }
        }
        self.truncate(length);
    }

    fn normalize_kind(&mut self) {
        if self.elements.is_empty() {
            self.kind = OrderingKind::Empty;
        } else if self.kind == OrderingKind::Empty {
            self.kind = OrderingKind::Order;
        }
    }

    fn valid(&self) -> bool {
        match self.kind {
            OrderingKind::Empty => self.elements.is_empty(),
            OrderingKind::Group => self
                .elements
                .iter()
                .all(|e| e.direction == Direction::Irrelevant),
            OrderingKind::Order | OrderingKind::Rollup => self
                .elements
                .iter()
                .all(|e| e.direction != Direction::Irrelevant),
        }
    }
}
