//! C6: e-matching (§4.5). Patterns share the `Tree` abstraction with host
//! terms; `ENodeOrVar` is the e-node analogue used once a pattern has been
//! lowered to reference its variables by name. `Subst` maps a variable to
//! the e-class id it matched -- never to an e-node, since a substitution
//! ranges over equivalence classes.

use std::fmt;

use indexmap::IndexMap;

use crate::analysis::Analysis;
use crate::egraph::EGraph;
use crate::lang::{ENode, Key};
use crate::tree::Tree;
use crate::unionfind::Id;

/// A pattern variable name. Any `Key`-like token works; host languages
/// that use interned strings for their `K` typically reuse the same type
/// here (see `Tree::is_pattern_symbol`).
pub trait Var: Clone + fmt::Debug + std::hash::Hash + Eq + Ord {}
impl<T: Clone + fmt::Debug + std::hash::Hash + Eq + Ord> Var for T {}

/// One node of a lowered pattern tree: either a concrete operator (with
/// pattern children) or a bound variable.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ENodeOrVar<K, V> {
    ENode(K, Vec<ENodeOrVar<K, V>>),
    Var(V),
}

impl<K: fmt::Display, V: fmt::Display> fmt::Display for ENodeOrVar<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ENodeOrVar::ENode(key, args) if args.is_empty() => write!(f, "{key}"),
            ENodeOrVar::ENode(key, args) => {
                write!(f, "({key}")?;
                for a in args {
                    write!(f, " {a}")?;
                }
                write!(f, ")")
            }
            ENodeOrVar::Var(v) => write!(f, "{v}"),
        }
    }
}

/// A pattern built directly from a host `Tree`: a leaf for which
/// `is_pattern_symbol()` is true becomes a [`ENodeOrVar::Var`]; everything
/// else lowers to an [`ENodeOrVar::ENode`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern<K, V> {
    pub ast: ENodeOrVar<K, V>,
}

impl<K: Key, V: Var> Pattern<K, V> {
    pub fn from_tree<T>(tree: &T, var_of: impl Fn(&T) -> Option<V> + Copy) -> Self
    where
        T: Tree<Key = K>,
    {
        Pattern {
            ast: Self::lower(tree, var_of),
        }
    }

    fn lower<T>(tree: &T, var_of: impl Fn(&T) -> Option<V> + Copy) -> ENodeOrVar<K, V>
    where
        T: Tree<Key = K>,
    {
        if tree.is_pattern_symbol() {
            let v = var_of(tree).expect("is_pattern_symbol leaf must resolve to a Var");
            ENodeOrVar::Var(v)
        } else {
            let args = tree.children().iter().map(|c| Self::lower(c, var_of)).collect();
            ENodeOrVar::ENode(tree.value(), args)
        }
    }

    /// All distinct variables mentioned in this pattern, in first-seen order.
    pub fn vars(&self) -> Vec<V> {
        let mut out = Vec::new();
        fn walk<K, V: Var>(node: &ENodeOrVar<K, V>, out: &mut Vec<V>) {
            match node {
                ENodeOrVar::Var(v) => {
                    if !out.contains(v) {
                        out.push(v.clone());
                    }
                }
                ENodeOrVar::ENode(_, args) => args.iter().for_each(|a| walk(a, out)),
            }
        }
        walk(&self.ast, &mut out);
        out
    }
}

/// A variable → e-class-id binding found by `ematch`.
pub type Subst<V> = IndexMap<V, Id>;

/// One e-class's matches: the root it was found in, and every substitution
/// that made the pattern congruent to some e-node in that class. A root
/// may legitimately appear with duplicate substitutions if two different
/// e-node witnesses produced the same bindings (§4.5's contract); callers
/// must tolerate that (merging is idempotent).
#[derive(Debug)]
pub struct SearchMatches<V> {
    pub eclass: Id,
    pub substs: Vec<Subst<V>>,
}

/// Search every canonical e-class of `egraph` for matches of `pattern`
/// (§4.5). When the pattern's root is a concrete operator, only classes
/// indexed under that operator are tried; a bare variable root matches
/// every class.
pub fn search<K, V, A>(
    egraph: &EGraph<K, A>,
    pattern: &ENodeOrVar<K, V>,
) -> Vec<SearchMatches<V>>
where
    K: Key,
    V: Var,
    A: Analysis<K>,
{
    let candidates: Box<dyn Iterator<Item = Id>> = match pattern {
        ENodeOrVar::ENode(key, _) => match egraph.classes_by_op(key) {
            Some(ids) => Box::new(ids.iter().copied().collect::<Vec<_>>().into_iter()),
            None => Box::new(std::iter::empty()),
        },
        ENodeOrVar::Var(_) => Box::new(egraph.classes().map(|c| c.id).collect::<Vec<_>>().into_iter()),
    };

    candidates
        .filter_map(|id| search_eclass(egraph, pattern, id))
        .collect()
}

/// Search a single e-class for matches of `pattern`.
pub fn search_eclass<K, V, A>(
    egraph: &EGraph<K, A>,
    pattern: &ENodeOrVar<K, V>,
    eclass: Id,
) -> Option<SearchMatches<V>>
where
    K: Key,
    V: Var,
    A: Analysis<K>,
{
    let substs = match_in_eclass(egraph, pattern, eclass, &[Subst::new()]);
    if substs.is_empty() {
        None
    } else {
        Some(SearchMatches { eclass, substs })
    }
}

/// `match_in_eclass` from §4.5's pseudocode: given a set of candidate
/// environments, return every environment extended (by value copy) so
/// that `pat` is congruent to some e-node in `eid`'s class.
fn match_in_eclass<K, V, A>(
    egraph: &EGraph<K, A>,
    pat: &ENodeOrVar<K, V>,
    eid: Id,
    envs: &[Subst<V>],
) -> Vec<Subst<V>>
where
    K: Key,
    V: Var,
    A: Analysis<K>,
{
    let root = egraph.find(eid);
    match pat {
        ENodeOrVar::Var(v) => envs
            .iter()
            .filter_map(|env| {
                if let Some(&bound) = env.get(v) {
                    (bound == root).then(|| env.clone())
                } else {
                    let mut env = env.clone();
                    env.insert(v.clone(), root);
                    Some(env)
                }
            })
            .collect(),
        ENodeOrVar::ENode(..) => egraph
            .eclass(root)
            .iter()
            .flat_map(|enode| enode_matches(egraph, pat, enode, envs))
            .collect(),
    }
}

/// `enode_matches` from §4.5's pseudocode: does `pat`'s operator/arity
/// agree with `enode`'s, and if so, what do `envs` become after matching
/// each child pairwise?
fn enode_matches<K, V, A>(
    egraph: &EGraph<K, A>,
    pat: &ENodeOrVar<K, V>,
    enode: &ENode<K>,
    envs: &[Subst<V>],
) -> Vec<Subst<V>>
where
    K: Key,
    V: Var,
    A: Analysis<K>,
{
    let ENodeOrVar::ENode(key, pat_children) = pat else {
        unreachable!("caller only invokes enode_matches for ENode patterns");
    };
    if key != &enode.key || pat_children.len() != enode.arity() {
        return Vec::new();
    }

    let mut envs = envs.to_vec();
    for (pat_child, &child_id) in pat_children.iter().zip(enode.children()) {
        envs = match_in_eclass(egraph, pat_child, child_id, &envs);
        if envs.is_empty() {
            return envs;
        }
    }
    envs
}

/// `subst` from §4.6: structurally recurse over a pattern, turning each
/// variable into its bound e-class id and each operator node into a
/// freshly `add_enode`'d e-node built from the recursively substituted
/// children. Returns the resulting canonical e-class id.
pub fn instantiate<K, V, A>(egraph: &mut EGraph<K, A>, pat: &ENodeOrVar<K, V>, subst: &Subst<V>) -> Id
where
    K: Key,
    V: Var,
    A: Analysis<K>,
{
    match pat {
        ENodeOrVar::Var(v) => {
            let id = *subst.get(v).expect("pattern applier used an unbound variable");
            egraph.find(id)
        }
        ENodeOrVar::ENode(key, args) => {
            let args: Vec<Id> = args.iter().map(|a| instantiate(egraph, a, subst)).collect();
            egraph.add_enode(ENode::new(key.clone(), args))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egraph::EGraph;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    enum Op {
        Leaf(i32),
        F,
    }

    fn leaf(n: i32) -> ENodeOrVar<Op, &'static str> {
        ENodeOrVar::ENode(Op::Leaf(n), vec![])
    }

    fn f(a: ENodeOrVar<Op, &'static str>, b: ENodeOrVar<Op, &'static str>) -> ENodeOrVar<Op, &'static str> {
        ENodeOrVar::ENode(Op::F, vec![a, b])
    }

    fn var(name: &'static str) -> ENodeOrVar<Op, &'static str> {
        ENodeOrVar::Var(name)
    }

    #[test]
    fn matches_same_operand_bound_to_one_variable() {
        let mut g: EGraph<Op, ()> = EGraph::new(());
        let a = g.add_enode(ENode::leaf(Op::Leaf(1)));
        let b = g.add_enode(ENode::leaf(Op::Leaf(2)));
        let fab = g.add_enode(ENode::new(Op::F, vec![a, b]));
        g.merge(a, b).unwrap();
        g.rebuild().unwrap();

        let pat = f(var("x"), var("x"));
        let matches = search_eclass(&g, &pat, fab).expect("(f a b) matches (f x x) once a ~ b");
        assert_eq!(matches.substs.len(), 1);
        assert_eq!(*matches.substs[0].get(&"x").unwrap(), g.find(a));
    }

    #[test]
    fn distinct_operands_do_not_match_shared_variable() {
        let mut g: EGraph<Op, ()> = EGraph::new(());
        let a = g.add_enode(ENode::leaf(Op::Leaf(1)));
        let b = g.add_enode(ENode::leaf(Op::Leaf(2)));
        let fab = g.add_enode(ENode::new(Op::F, vec![a, b]));
        g.rebuild().unwrap();

        let pat = f(var("x"), var("x"));
        assert!(search_eclass(&g, &pat, fab).is_none());
    }

    /// Substitution round-trip: the class produced by
    /// instantiating a matched pattern's own bindings is the class it was
    /// found in.
    #[test]
    fn instantiate_after_match_reproduces_the_matched_class() {
        let mut g: EGraph<Op, ()> = EGraph::new(());
        let a = g.add_enode(ENode::leaf(Op::Leaf(1)));
        let b = g.add_enode(ENode::leaf(Op::Leaf(2)));
        let fab = g.add_enode(ENode::new(Op::F, vec![a, b]));
        g.rebuild().unwrap();

        let pat = f(leaf(1), var("y"));
        let found = search_eclass(&g, &pat, fab).expect("(f 1 b) matches (f 1 y)");
        for subst in &found.substs {
            let rebuilt = instantiate(&mut g, &pat, subst);
            assert_eq!(g.find(rebuilt), g.find(fab));
        }
    }
}
