//! C3/C4: the e-graph store, its hashcons, and the deferred-rebuild
//! congruence engine (§3.3, §4.2, §4.3).

use std::fmt;
use std::ops::Index;

use indexmap::{IndexMap, IndexSet};
use log::{debug, trace};

use crate::analysis::Analysis;
use crate::error::EGraphError;
use crate::lang::{ENode, Key};
use crate::tree::Tree;
use crate::unionfind::{Id, UnionFind};
use crate::util::HashMap;

/// A drain-the-worklist-in-one-pass rebuild is bounded to this many times
/// the class count before it is treated as a non-terminating `modify`.
const REBUILD_ROUND_LIMIT: usize = 16;

/// An equivalence class: every e-node known to be equal, the back-edges
/// needed to repair congruence (`uses`, §3.1), and its analysis data.
#[derive(Debug, Clone)]
pub struct EClass<K, D> {
    pub id: Id,
    pub(crate) nodes: IndexSet<ENode<K>>,
    pub(crate) uses: Vec<(ENode<K>, Id)>,
    pub data: D,
}

impl<K: Key, D> EClass<K, D> {
    pub fn iter(&self) -> impl Iterator<Item = &ENode<K>> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// The e-graph: hash-consed e-nodes over congruence-closed e-classes,
/// glued together by a union-find (§3.3).
///
/// Mutation only ever happens through `add`/`add_enode`/`merge`/`rebuild`;
/// nothing outside this module touches `hashcons`, `worklist` or a class's
/// `uses` directly. Congruence is allowed to go stale between `merge`
/// calls -- that's the whole point of deferred rebuilding -- so callers
/// must `rebuild` before trusting `hashcons` or iterating `classes()` for
/// anything that needs canonical e-nodes.
pub struct EGraph<K, A: Analysis<K>> {
    pub analysis: A,
    unionfind: UnionFind,
    hashcons: HashMap<ENode<K>, Id>,
    classes: IndexMap<Id, EClass<K, A::Data>>,
    classes_by_op: HashMap<K, IndexSet<Id>>,
    worklist: Vec<Id>,
    version: u64,
    saturated: bool,
    root: Option<Id>,
}

impl<K, A: Analysis<K>> fmt::Debug for EGraph<K, A>
where
    K: Key,
    A::Data: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EGraph")
            .field("classes", &self.classes.len())
            .field("nodes", &self.hashcons.len())
            .field("version", &self.version)
            .field("saturated", &self.saturated)
            .field("root", &self.root)
            .finish()
    }
}

impl<K: Key, A: Analysis<K>> EGraph<K, A> {
    pub fn new(analysis: A) -> Self {
        EGraph {
            analysis,
            unionfind: UnionFind::default(),
            hashcons: HashMap::default(),
            classes: IndexMap::default(),
            classes_by_op: HashMap::default(),
            worklist: Vec::new(),
            version: 0,
            saturated: true,
            root: None,
        }
    }

    #[inline]
    pub fn find(&self, id: Id) -> Id {
        self.unionfind.find(id)
    }

    #[inline]
    pub fn find_mut(&mut self, id: Id) -> Id {
        self.unionfind.find_mut(id)
    }

    /// Canonicalize an e-node's children against the current union-find
    /// state (§3.2). Does not compress paths, so it's usable from `&self`.
    pub(crate) fn canonicalize(&self, enode: &ENode<K>) -> ENode<K> {
        let mut out = enode.clone();
        out.for_each_child_mut(|id| *id = self.find(id));
        out
    }

    /// The e-class representing the first tree added via `add`, if any.
    pub fn root(&self) -> Option<Id> {
        self.root
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_saturated(&self) -> bool {
        self.saturated
    }

    /// Clears the saturation latch. `rebuild` always leaves `saturated`
    /// true once its worklist drains, so `apply_rules` (§4.6 step 5) calls
    /// this afterwards whenever `version` advanced during the iteration --
    /// rebuilding to a stable congruence closure isn't the same as having
    /// found nothing left to rewrite.
    pub(crate) fn mark_unsaturated(&mut self) {
        self.saturated = false;
    }

    pub fn number_of_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn total_size(&self) -> usize {
        self.hashcons.len()
    }

    pub fn total_number_of_nodes(&self) -> usize {
        self.classes.values().map(EClass::len).sum()
    }

    pub fn classes(&self) -> impl Iterator<Item = &EClass<K, A::Data>> {
        self.classes.values()
    }

    pub fn eclasses(&self) -> impl Iterator<Item = (Id, &EClass<K, A::Data>)> {
        self.classes.iter().map(|(&id, c)| (id, c))
    }

    pub fn eclass(&self, id: Id) -> &EClass<K, A::Data> {
        &self.classes[&self.find(id)]
    }

    /// Candidate class ids whose e-nodes use `key` as their operator. Used
    /// by the matcher (§4.5) to avoid scanning every class when the
    /// pattern's root is a concrete, non-variable operator.
    pub(crate) fn classes_by_op(&self, key: &K) -> Option<&IndexSet<Id>> {
        self.classes_by_op.get(key)
    }

    /// Structural recursion that bottom-up wraps a host tree into e-nodes
    /// via `add_enode` (§4.2). Sets `root` the first time it's called.
    pub fn add<T: Tree<Key = K>>(&mut self, tree: &T) -> Id {
        let args: Vec<Id> = tree.children().iter().map(|c| self.add(c)).collect();
        let enode = ENode::new(tree.value(), args);
        let id = self.add_enode(enode);
        self.root.get_or_insert(id);
        id
    }

    /// Insert a single e-node, returning the e-class id it belongs to
    /// (§4.2). Idempotent: adding an e-node already in the hashcons is a
    /// silent no-op that returns the existing class.
    pub fn add_enode(&mut self, enode: ENode<K>) -> Id {
        let enode = self.canonicalize(&enode);
        if let Some(&id) = self.hashcons.get(&enode) {
            return self.find(id);
        }

        let id = self.unionfind.make_set();

        for &child in enode.children() {
            let child = self.find_mut(child);
            if let Some(class) = self.classes.get_mut(&child) {
                class.uses.push((enode.clone(), id));
            }
        }

        self.hashcons.insert(enode.clone(), id);
        self.classes_by_op
            .entry(enode.key.clone())
            .or_default()
            .insert(id);
        self.version += 1;
        self.saturated = false;

        let data = A::make(self, &enode);
        let mut class = EClass {
            id,
            nodes: IndexSet::new(),
            uses: Vec::new(),
            data,
        };
        class.nodes.insert(enode);
        self.classes.insert(id, class);

        A::modify(self, id);

        self.find(id)
    }

    /// Merge the e-classes containing `a` and `b` (§4.3). Returns the
    /// surviving (winner) class id. The structural union and congruence
    /// bookkeeping happen unconditionally; if the installed analysis finds
    /// the two classes' data incompatible, that's reported as an
    /// `AnalysisConflict` but the union is *not* rolled back (there's no
    /// mechanism to undo congruence), matching §7's documented trade-off.
    pub fn merge(&mut self, a: Id, b: Id) -> Result<Id, EGraphError<A::Data>> {
        let (e1, e2) = (self.find_mut(a), self.find_mut(b));
        if e1 == e2 {
            return Ok(e1);
        }

        self.version += 1;
        self.saturated = false;

        let (winner, loser) = self.unionfind.union(e1, e2);
        self.worklist.push(winner);

        let mut loser_class = self
            .classes
            .shift_remove(&loser)
            .expect("union-find root must have a live eclass");
        let winner_class = self
            .classes
            .get_mut(&winner)
            .expect("union-find root must have a live eclass");

        winner_class.nodes.extend(loser_class.nodes.drain(..));
        winner_class.uses.append(&mut loser_class.uses);

        let conflict = match self.analysis.merge(&mut winner_class.data, loser_class.data) {
            Ok(_did_merge) => None,
            Err(EGraphError::AnalysisConflict { a, b, .. }) => {
                Some(EGraphError::AnalysisConflict { eclass: winner, a, b })
            }
            Err(other) => Some(other),
        };

        trace!("merged {loser:?} into {winner:?}");

        match conflict {
            Some(e) => Err(e),
            None => Ok(winner),
        }
    }

    /// Drain the worklist, repairing congruence for every affected class
    /// (§4.3). Returns the number of worklist-draining rounds it took.
    pub fn rebuild(&mut self) -> Result<usize, EGraphError<A::Data>> {
        let mut rounds = 0;

        while !self.worklist.is_empty() {
            rounds += 1;
            let bound = REBUILD_ROUND_LIMIT * self.classes.len().max(1);
            if rounds > bound {
                let eclass = *self.worklist.last().unwrap();
                return Err(EGraphError::ModifyCycle { eclass, rounds });
            }

            let pending = std::mem::take(&mut self.worklist);
            let todo: IndexSet<Id> = pending.into_iter().map(|id| self.find_mut(id)).collect();
            for id in todo {
                self.repair(id)?;
            }
        }

        debug!(
            "rebuild done in {rounds} round(s): {} classes, {} nodes",
            self.number_of_classes(),
            self.total_size()
        );
        self.saturated = true;
        Ok(rounds)
    }

    /// Repair one class's congruence: re-canonicalize its parents, collapse
    /// any newly-congruent ones, and re-propagate analysis data (§4.3).
    ///
    /// A no-op if `c` is not itself canonical -- the root it now belongs to
    /// is either already on the worklist or was handled by an earlier
    /// `union` in this same rebuild round.
    fn repair(&mut self, c: Id) -> Result<(), EGraphError<A::Data>> {
        if self.find_mut(c) != c {
            return Ok(());
        }

        let old_uses = match self.classes.get_mut(&c) {
            Some(class) => std::mem::take(&mut class.uses),
            None => return Ok(()),
        };

        // Re-canonicalize every parent and refresh the hashcons.
        let mut recanon: Vec<(ENode<K>, Id)> = Vec::with_capacity(old_uses.len());
        for (enode, owner) in &old_uses {
            self.hashcons.remove(enode);
            let canon_enode = self.canonicalize(enode);
            let owner = self.find_mut(*owner);
            self.hashcons.insert(canon_enode.clone(), owner);
            recanon.push((canon_enode, owner));
        }

        // Detect congruence collapses among the re-canonicalized parents:
        // two parents that now share a canonical (key, args) must have
        // their owners merged.
        let mut seen: HashMap<ENode<K>, Id> = HashMap::default();
        for (enode, owner) in &recanon {
            match seen.get(enode) {
                Some(&other) if self.find_mut(other) != self.find_mut(*owner) => {
                    self.merge(other, *owner)?;
                }
                _ => {
                    seen.insert(enode.clone(), *owner);
                }
            }
        }

        // Whatever `c` canonicalizes to now (it may have just been merged
        // above) owns the repaired uses.
        let root = self.find_mut(c);
        let new_uses: Vec<(ENode<K>, Id)> = recanon
            .into_iter()
            .map(|(enode, owner)| (enode, self.find_mut(owner)))
            .collect();
        if let Some(class) = self.classes.get_mut(&root) {
            class.uses.extend(new_uses.iter().cloned());
        }

        A::modify(self, root);

        for (enode, owner) in new_uses {
            let owner = self.find_mut(owner);
            let fresh = A::make(self, &enode);
            let changed = {
                let owner_class = match self.classes.get_mut(&owner) {
                    Some(class) => class,
                    None => continue,
                };
                match self.analysis.merge(&mut owner_class.data, fresh) {
                    Ok(did_merge) => did_merge.0,
                    Err(EGraphError::AnalysisConflict { a, b, .. }) => {
                        return Err(EGraphError::AnalysisConflict { eclass: owner, a, b })
                    }
                    Err(other) => return Err(other),
                }
            };
            if changed {
                self.worklist.push(owner);
            }
        }

        Ok(())
    }

    /// A one-line-per-class dump, used for `trace!`-level logging.
    pub fn dump(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        for (id, class) in self.eclasses() {
            let _ = write!(out, "{id:?}: {} nodes\n", class.len());
        }
        out
    }
}

impl<K: Key, A: Analysis<K>> Index<Id> for EGraph<K, A> {
    type Output = EClass<K, A::Data>;
    fn index(&self, id: Id) -> &Self::Output {
        self.eclass(id)
    }
}
