//! C7: rewrite rules and the single-iteration saturation driver (§4.6).
//!
//! A rule is a `(searcher, applier)` pair so that conditional and
//! procedural rules fit the same interface as the common `(lhs, rhs)`
//! pattern pair.

use log::debug;

use crate::analysis::Analysis;
use crate::egraph::EGraph;
use crate::error::EGraphError;
use crate::lang::Key;
use crate::pattern::{self, Pattern, SearchMatches, Subst, Var};
use crate::unionfind::Id;

/// `searcher.search(egraph) -> sequence<(eclass_id, subst)>` (§4.6).
pub trait Searcher<K: Key, V: Var, A: Analysis<K>> {
    fn search(&self, egraph: &EGraph<K, A>) -> Vec<SearchMatches<V>>;
    fn vars(&self) -> Vec<V>;
}

/// `rewriter.apply_to_eclass(egraph, eclass_id, subst) -> eclass_id` (§4.6).
/// Returning `eclass` unchanged (rather than adding anything) is how a
/// conditional rule whose predicate rejects this match declines to fire.
pub trait Applier<K: Key, V: Var, A: Analysis<K>> {
    fn apply_to_eclass(&self, egraph: &mut EGraph<K, A>, eclass: Id, subst: &Subst<V>) -> Id;
}

impl<K: Key, V: Var, A: Analysis<K>> Searcher<K, V, A> for Pattern<K, V> {
    fn search(&self, egraph: &EGraph<K, A>) -> Vec<SearchMatches<V>> {
        pattern::search(egraph, &self.ast)
    }

    fn vars(&self) -> Vec<V> {
        Pattern::vars(self)
    }
}

impl<K: Key, V: Var, A: Analysis<K>> Applier<K, V, A> for Pattern<K, V> {
    fn apply_to_eclass(&self, egraph: &mut EGraph<K, A>, _eclass: Id, subst: &Subst<V>) -> Id {
        pattern::instantiate(egraph, &self.ast, subst)
    }
}

/// Intercepts `apply_to_eclass` with a predicate `check(egraph, eid, env)`;
/// when the predicate rejects a match, the inner applier never runs and
/// the match is treated as a non-fire (§4.6). There is no "absent
/// predicate" case in this type -- omitting a condition means using the
/// unwrapped applier directly, which is the deliberate way this crate
/// expresses "a missing predicate is a client error, not `true`".
pub struct ConditionalApplier<K, V, A, App>
where
    A: Analysis<K>,
    App: Applier<K, V, A>,
{
    pub applier: App,
    pub condition: Box<dyn Fn(&EGraph<K, A>, Id, &Subst<V>) -> bool>,
}

impl<K, V, A, App> Applier<K, V, A> for ConditionalApplier<K, V, A, App>
where
    K: Key,
    V: Var,
    A: Analysis<K>,
    App: Applier<K, V, A>,
{
    fn apply_to_eclass(&self, egraph: &mut EGraph<K, A>, eclass: Id, subst: &Subst<V>) -> Id {
        if (self.condition)(egraph, eclass, subst) {
            self.applier.apply_to_eclass(egraph, eclass, subst)
        } else {
            eclass
        }
    }
}

/// A named rule: `search` finds matches against the whole e-graph,
/// `apply` instantiates and merges each one.
pub struct Rewrite<K, V, A: Analysis<K>> {
    pub name: String,
    searcher: Box<dyn Searcher<K, V, A>>,
    applier: Box<dyn Applier<K, V, A>>,
}

impl<K: Key, V: Var, A: Analysis<K>> Rewrite<K, V, A> {
    pub fn new(
        name: impl Into<String>,
        searcher: impl Searcher<K, V, A> + 'static,
        applier: impl Applier<K, V, A> + 'static,
    ) -> Self {
        Rewrite {
            name: name.into(),
            searcher: Box::new(searcher),
            applier: Box::new(applier),
        }
    }

    /// The common case: a plain `(lhs, rhs)` pattern pair (§4.6).
    pub fn pattern(name: impl Into<String>, lhs: Pattern<K, V>, rhs: Pattern<K, V>) -> Self
    where
        K: 'static,
        V: 'static,
        A: 'static,
    {
        Self::new(name, lhs, rhs)
    }

    pub fn search(&self, egraph: &EGraph<K, A>) -> Vec<SearchMatches<V>> {
        self.searcher.search(egraph)
    }

    /// Instantiate and merge every match found by a prior `search` call,
    /// returning the eclass ids that actually changed (§4.6's step 3).
    pub fn apply(
        &self,
        egraph: &mut EGraph<K, A>,
        matches: &[SearchMatches<V>],
    ) -> Result<Vec<Id>, EGraphError<A::Data>> {
        let mut changed = Vec::new();
        for m in matches {
            for subst in &m.substs {
                let new_id = self.applier.apply_to_eclass(egraph, m.eclass, subst);
                let winner = egraph.merge(m.eclass, new_id)?;
                changed.push(winner);
            }
        }
        Ok(changed)
    }
}

/// One saturation iteration, `apply_rules` (§4.6):
///
/// 1. search every rule against the *current* e-classes, before any
///    mutation -- matches created by this batch don't fire until the next
///    iteration.
/// 2. apply every match in rule order, merging as we go.
/// 3. rebuild once.
///
/// Returns the number of distinct eclasses touched by a `merge` this
/// iteration (zero iff nothing changed, the condition `is_saturated`
/// relies on).
pub fn apply_rules<K, V, A>(
    egraph: &mut EGraph<K, A>,
    rules: &[Rewrite<K, V, A>],
) -> Result<usize, EGraphError<A::Data>>
where
    K: Key,
    V: Var,
    A: Analysis<K>,
{
    let pre_version = egraph.version();

    let matches: Vec<Vec<SearchMatches<V>>> = rules.iter().map(|r| r.search(egraph)).collect();

    let mut n_applied = 0;
    for (rule, ms) in rules.iter().zip(matches) {
        let total: usize = ms.iter().map(|m| m.substs.len()).sum();
        if total > 0 {
            debug!("applying {} {} times", rule.name, total);
        }
        n_applied += rule.apply(egraph, &ms)?.len();
    }

    egraph.rebuild()?;

    let changed = egraph.version() != pre_version;
    if changed {
        egraph.mark_unsaturated();
    }

    Ok(if changed { n_applied } else { 0 })
}
