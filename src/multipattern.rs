//! Multi-pattern rules: several pattern trees bound to one shared
//! substitution, useful for datalog-style or relational rewrites.
//! Generalized over the same `K`/`V`/`A` parameters as the rest of this
//! crate -- it's a `Searcher`/`Applier` like any other rule.

use crate::analysis::Analysis;
use crate::egraph::EGraph;
use crate::lang::Key;
use crate::pattern::{self, ENodeOrVar, SearchMatches, Subst, Var};
use crate::rewrite::{Applier, Searcher};
use crate::unionfind::Id;
use crate::util::HashSet;

/// A set of patterns simultaneously bound to distinct variables; searching
/// finds substitutions under which every pattern holds at once, applying
/// unions each pattern's instantiation with whatever e-class its variable
/// was already bound to.
pub struct MultiPattern<K, V> {
    asts: Vec<(V, ENodeOrVar<K, V>)>,
}

impl<K: Key, V: Var> MultiPattern<K, V> {
    pub fn new(asts: Vec<(V, ENodeOrVar<K, V>)>) -> Self {
        MultiPattern { asts }
    }
}

impl<K: Key, V: Var, A: Analysis<K>> Searcher<K, V, A> for MultiPattern<K, V> {
    fn search(&self, egraph: &EGraph<K, A>) -> Vec<SearchMatches<V>> {
        let Some((first_var, first_pat)) = self.asts.first() else {
            return Vec::new();
        };

        let mut partial: Vec<Subst<V>> = pattern::search(egraph, first_pat)
            .into_iter()
            .flat_map(|sm| {
                let eclass = sm.eclass;
                sm.substs.into_iter().map(move |mut s| {
                    s.insert(first_var.clone(), eclass);
                    s
                })
            })
            .collect();

        for (var, pat) in &self.asts[1..] {
            let mut next = Vec::new();
            for base in &partial {
                for sm in pattern::search(egraph, pat) {
                    for mut s in sm.substs {
                        s.insert(var.clone(), sm.eclass);
                        if let Some(merged) = unify(base, &s) {
                            next.push(merged);
                        }
                    }
                }
            }
            partial = next;
        }

        let rows = partial
            .into_iter()
            .map(|s| (*s.get(first_var).expect("first_var is always bound"), s))
            .collect();
        regroup(rows)
    }

    fn vars(&self) -> Vec<V> {
        let mut bound = HashSet::default();
        let mut vars = Vec::new();
        for (bv, pat) in &self.asts {
            collect_vars(pat, &bound, &mut vars);
            bound.insert(bv.clone());
        }
        vars
    }
}

fn unify<V: Var>(a: &Subst<V>, b: &Subst<V>) -> Option<Subst<V>> {
    let mut out = a.clone();
    for (k, v) in b {
        match out.get(k) {
            Some(existing) if existing != v => return None,
            _ => {
                out.insert(k.clone(), *v);
            }
        }
    }
    Some(out)
}

fn collect_vars<K, V: Var>(pat: &ENodeOrVar<K, V>, bound: &HashSet<V>, out: &mut Vec<V>) {
    match pat {
        ENodeOrVar::Var(v) => {
            if !bound.contains(v) && !out.contains(v) {
                out.push(v.clone());
            }
        }
        ENodeOrVar::ENode(_, args) => args.iter().for_each(|a| collect_vars(a, bound, out)),
    }
}

fn regroup<V: Var>(rows: Vec<(Id, Subst<V>)>) -> Vec<SearchMatches<V>> {
    let mut by_class: Vec<SearchMatches<V>> = Vec::new();
    for (eclass, subst) in rows {
        if let Some(sm) = by_class.iter_mut().find(|sm| sm.eclass == eclass) {
            sm.substs.push(subst);
        } else {
            by_class.push(SearchMatches {
                eclass,
                substs: vec![subst],
            });
        }
    }
    by_class
}

impl<K: Key, V: Var, A: Analysis<K>> Applier<K, V, A> for MultiPattern<K, V> {
    /// Instantiates every bound pattern and unions each with whatever
    /// e-class its variable was already matched to. Returns the first
    /// pattern's resulting id.
    fn apply_to_eclass(&self, egraph: &mut EGraph<K, A>, _eclass: Id, subst: &Subst<V>) -> Id {
        let mut result = None;
        for (var, pat) in &self.asts {
            let id = pattern::instantiate(egraph, pat, subst);
            if let Some(&bound) = subst.get(var) {
                let _ = egraph.merge(id, bound);
            }
            result.get_or_insert(id);
        }
        result.expect("MultiPattern must bind at least one pattern")
    }
}
