//! C1: union-find over e-class ids.
//!
//! A disjoint-set forest keyed by the small numeric [`Id`] handle every
//! e-class is identified by. This is deliberately the only place that knows
//! about parent pointers; [`crate::egraph::EGraph`] asks it for `find`/
//! `union` and otherwise treats ids as opaque.

use std::fmt;

/// An opaque handle naming an e-class.
///
/// Ids are assigned in increasing order as e-classes are created and are
/// totally ordered by that numeric value, which is what lets [`UnionFind`]
/// apply a deterministic tie-break on `union`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Id(u32);

impl Id {
    #[inline]
    pub(crate) const fn new(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize);
        Id(index as u32)
    }

    #[inline]
    pub(crate) const fn val(self) -> usize {
        self.0 as usize
    }
}

/// A placeholder id, not tied to any live e-class. [`crate::analysis::Analysis::merge`]
/// implementations use this to fill the `eclass` field of an
/// [`crate::error::EGraphError::AnalysisConflict`] they construct -- the
/// e-graph overwrites it with the real offending class id before the error
/// reaches a caller, since the analysis itself is never told which e-class
/// it's merging data for.
impl Default for Id {
    fn default() -> Self {
        Id(0)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Disjoint-set forest over [`Id`]s, with path compression.
///
/// `find` alone never compresses (it takes `&self`, since the matcher and
/// other read-only traversals need to canonicalize ids while only holding a
/// shared reference to the owning [`crate::egraph::EGraph`]). Compression
/// happens on the `&mut self` path, used internally by `union` and by
/// `rebuild`'s repair loop.
#[derive(Debug, Clone, Default)]
pub(crate) struct UnionFind {
    parents: Vec<Id>,
}

impl UnionFind {
    pub(crate) fn make_set(&mut self) -> Id {
        let id = Id::new(self.parents.len());
        self.parents.push(id);
        id
    }

    #[inline]
    fn parent(&self, id: Id) -> Id {
        self.parents[id.val()]
    }

    #[inline]
    fn set_parent(&mut self, id: Id, new_parent: Id) {
        self.parents[id.val()] = new_parent;
    }

    /// Walk the parent chain to the root. Does not compress.
    pub(crate) fn find(&self, mut id: Id) -> Id {
        while id != self.parent(id) {
            id = self.parent(id);
        }
        id
    }

    /// Walk the parent chain to the root, halving the path as it goes.
    pub(crate) fn find_mut(&mut self, mut id: Id) -> Id {
        while id != self.parent(id) {
            let grandparent = self.parent(self.parent(id));
            self.set_parent(id, grandparent);
            id = grandparent;
        }
        id
    }

    /// Union the classes rooted at `a` and `b`.
    ///
    /// Precondition: `find(a) != find(b)`. The smaller numeric id always
    /// becomes the new root, which is required (not just an optimization)
    /// for reproducible test fixtures: returns `(winner, loser)`.
    pub(crate) fn union(&mut self, a: Id, b: Id) -> (Id, Id) {
        let (winner, loser) = if a < b { (a, b) } else { (b, a) };
        self.set_parent(loser, winner);
        (winner, loser)
    }
}
