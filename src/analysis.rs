//! C5: e-class analyses -- semilattice-valued facts propagated bottom-up and
//! maintained to a fixpoint alongside congruence (S4.4).

use std::fmt::Debug;
use std::ops::BitOr;

use crate::egraph::EGraph;
use crate::error::EGraphError;
use crate::lang::{ENode, Key};
use crate::unionfind::Id;

/// Result of [`Analysis::merge`], indicating which of the two inputs ended
/// up different from the merged result.
///
/// `DidMerge(a_changed, b_changed)`: if the value stored in the eclass
/// before the call differed from the eclass's post-merge value, the left
/// field must be `true` (it may conservatively be `true` even when nothing
/// actually changed); same for the right field and the `b` argument.
/// `DidMerge`s compose with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DidMerge(pub bool, pub bool);

impl BitOr for DidMerge {
    type Output = DidMerge;
    fn bitor(mut self, rhs: Self) -> Self::Output {
        self.0 |= rhs.0;
        self.1 |= rhs.1;
        self
    }
}

/// Arbitrary semilattice-valued data attached to every e-class.
///
/// `make` computes a fresh value for a newly-added e-node (it may read, but
/// must not mutate, already-existing children's `data`, since children are
/// always added before their parents). `merge` implements the join: it is
/// called whenever two e-classes unify and must update `a` in place to hold
/// the combined value. `modify` is an optional hook invoked after every
/// repair; it may itself `add`/`merge` new e-nodes (e.g. to fold in a newly
/// discovered constant) but must be idempotent once the analysis has
/// reached its fixed point, or `rebuild` will never terminate.
///
/// `merge` returns `Err` when asked to combine two concrete facts it
/// considers incompatible (e.g. two different folded constants for the same
/// class); the engine turns that into an [`EGraphError::AnalysisConflict`]
/// rather than panicking.
///
/// `()` is the trivial analysis; use it when you don't need one.
pub trait Analysis<K: Key>: Sized {
    type Data: Debug + Clone;

    fn make(egraph: &EGraph<K, Self>, enode: &ENode<K>) -> Self::Data;

    fn merge(
        &mut self,
        a: &mut Self::Data,
        b: Self::Data,
    ) -> Result<DidMerge, EGraphError<Self::Data>>;

    #[allow(unused_variables)]
    fn modify(egraph: &mut EGraph<K, Self>, id: Id) {}
}

impl<K: Key> Analysis<K> for () {
    type Data = ();

    fn make(_egraph: &EGraph<K, Self>, _enode: &ENode<K>) -> Self::Data {}

    fn merge(
        &mut self,
        _a: &mut Self::Data,
        _b: Self::Data,
    ) -> Result<DidMerge, EGraphError<Self::Data>> {
        Ok(DidMerge(false, false))
    }
}

/// Helper for [`Analysis::merge`] when `Data: Ord`: keeps the maximum.
pub fn merge_max<T: Ord>(to: &mut T, from: T) -> DidMerge {
    use std::cmp::Ordering::*;
    match (*to).cmp(&from) {
        Less => {
            *to = from;
            DidMerge(true, false)
        }
        Equal => DidMerge(false, false),
        Greater => DidMerge(false, true),
    }
}

/// Helper for [`Analysis::merge`] when `Data: Ord`: keeps the minimum.
pub fn merge_min<T: Ord>(to: &mut T, from: T) -> DidMerge {
    use std::cmp::Ordering::*;
    match (*to).cmp(&from) {
        Less => DidMerge(false, true),
        Equal => DidMerge(false, false),
        Greater => {
            *to = from;
            DidMerge(true, false)
        }
    }
}

/// Helper for [`Analysis::merge`] when `Data = Option<T>`: `Some` beats
/// `None`, and two `Some`s are combined with `merge_fn`.
pub fn merge_option<T>(
    to: &mut Option<T>,
    from: Option<T>,
    merge_fn: impl FnOnce(&mut T, T) -> DidMerge,
) -> DidMerge {
    match (to.as_mut(), from) {
        (None, None) => DidMerge(false, false),
        (None, some @ Some(_)) => {
            *to = some;
            DidMerge(true, false)
        }
        (Some(_), None) => DidMerge(false, true),
        (Some(a), Some(b)) => merge_fn(a, b),
    }
}
