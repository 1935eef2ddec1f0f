//! A generic equality-saturation engine: e-graphs, e-matching, deferred
//! rebuilding, e-class analyses, a search-apply-rebuild saturation driver,
//! and minimum-cost extraction. The host tree language, cost models beyond
//! the minimum-cost extractor, and rule catalogues are external
//! collaborators reached only through the [`Tree`]/[`run::CostFunction`]
//! interfaces -- the core never inspects host-specific structure.

mod analysis;
mod egraph;
mod error;
mod lang;
mod multipattern;
mod pattern;
mod rewrite;
mod run;
mod tree;
mod unionfind;
mod util;

pub use analysis::{merge_max, merge_min, merge_option, Analysis, DidMerge};
pub use egraph::{EClass, EGraph};
pub use error::{EGraphError, ExtractionError};
pub use lang::{ENode, Key};
pub use multipattern::MultiPattern;
pub use pattern::{ENodeOrVar, Pattern, SearchMatches, Subst, Var};
pub use rewrite::{apply_rules, Applier, ConditionalApplier, Rewrite, Searcher};
pub use run::{
    AstDepth, AstSize, BackoffScheduler, CostFunction, Extractor, Iteration, IterationData,
    Report, Runner, RewriteScheduler, SimpleScheduler, StopReason,
};
pub use tree::Tree;
pub use unionfind::Id;
