//! The error surface (§7). Errors here are values returned from engine
//! entry points, never panics or unwinds — the one exception is a
//! deliberately-asserted precondition violation (e.g. calling `union` on
//! ids that are already equal), which is a caller bug, not a runtime
//! condition.

use std::fmt;

use crate::unionfind::Id;

/// Something the core can report while rebuilding.
#[derive(Debug, Clone)]
pub enum EGraphError<D> {
    /// [`crate::analysis::Analysis::merge`] was asked to combine two
    /// incompatible concrete facts for the same e-class (e.g. two
    /// different folded constants). The offending class id and both
    /// values are reported; the merge that triggered this is not applied
    /// to the e-class's analysis data (though the underlying structural
    /// union already went through, since rolling back congruence is not
    /// supported), and the current `apply_rules` iteration is aborted.
    AnalysisConflict { eclass: Id, a: D, b: D },
    /// `rebuild` kept refilling its worklist past a generous bound,
    /// meaning some installed [`crate::analysis::Analysis::modify`] is not
    /// idempotent at its fixed point.
    ModifyCycle { eclass: Id, rounds: usize },
}

impl<D: fmt::Debug> fmt::Display for EGraphError<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EGraphError::AnalysisConflict { eclass, a, b } => write!(
                f,
                "analysis conflict in eclass {eclass}: {a:?} vs {b:?}"
            ),
            EGraphError::ModifyCycle { eclass, rounds } => write!(
                f,
                "rebuild did not converge after {rounds} rounds (last enqueued by eclass {eclass}); \
                 Analysis::modify is probably not idempotent"
            ),
        }
    }
}

impl<D: fmt::Debug> std::error::Error for EGraphError<D> {}

/// Why [`crate::run::Extractor::find_best`] (or similar) could not produce a
/// term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionError {
    /// The requested e-class (or one reachable from it) has no finite
    /// representative — every e-node in some class needed for the
    /// extraction has a child with infinite cost.
    Unreachable(Id),
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionError::Unreachable(id) => {
                write!(f, "eclass {id} has no finite-cost representative")
            }
        }
    }
}

impl std::error::Error for ExtractionError {}
