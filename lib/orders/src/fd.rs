use crate::TermHandle;

/// What kind of edge a [`FunctionalDependency`] contributes to the state
/// machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FdKind {
    /// A special "empty" edge that signifies adding no functional
    /// dependency, i.e. a state reachable with no further effort: an
    /// ordering can drop its last element, and an ordering can be
    /// converted into the grouping over the same elements. The head must
    /// be empty; there is exactly one decay FD and it is always index 0.
    /// Often called ϵ.
    Decay,

    /// A standard functional dependency {head} → tail: a stream ordered on
    /// all elements of the head is, after applying the FD, also ordered
    /// with tail inserted anywhere after them. The head may be empty
    /// (constants).
    Fd,

    /// An equivalence head = tail; implies head → tail and tail → head but
    /// is stronger, since it permits replacing one element with the other
    /// (given (a, c) and a = b, the stream also follows (b, c), which the
    /// two implications alone would not give). The head has exactly one
    /// element.
    Equivalence,
}

/// A functional dependency that may become active at some point during
/// query execution.
#[derive(Clone, Debug)]
pub struct FunctionalDependency {
    pub kind: FdKind,
    pub head: Vec<TermHandle>,
    pub tail: TermHandle,

    /// Whether this FD holds at every point during execution.
    ///
    /// Join conditions are not always active: for t1.x = t2.x, the FD does
    /// not hold before the join has actually happened. FDs from unique
    /// keys are always active ({t1.x} → t1.y for a primary key t1.x), and
    /// so are WHERE conditions applied directly on a base table
    /// (t1.x = 3 gives {} → t1.x before any join involving t1).
    ///
    /// Always-active FDs are baked into the DFSM so that fewer arcs need
    /// to be followed at runtime; they never get a bitmap bit.
    pub always_active: bool,
}

impl FunctionalDependency {
    pub fn decay() -> Self {
        Self { kind: FdKind::Decay, head: Vec::new(), tail: 0, always_active: true }
    }

    pub fn fd(head: Vec<TermHandle>, tail: TermHandle) -> Self {
        Self { kind: FdKind::Fd, head, tail, always_active: false }
    }

    pub fn equivalence(left: TermHandle, right: TermHandle) -> Self {
        Self { kind: FdKind::Equivalence, head: vec![left], tail: right, always_active: false }
    }

    pub fn always_active(mut self) -> Self {
        self.always_active = true;
        self
    }
}
