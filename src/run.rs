//! C7/C8: the equality-saturation driver (`Runner`) and the minimum-cost
//! extractor (§4.6, §4.7).

use std::cmp::Ordering;
use std::fmt::{self, Debug, Display, Formatter};
use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, info};

use crate::analysis::Analysis;
use crate::egraph::EGraph;
use crate::error::EGraphError;
use crate::lang::{ENode, Key};
use crate::pattern::{SearchMatches, Var};
use crate::rewrite::Rewrite;
use crate::unionfind::Id;
use crate::util::{HashMap, Instant};

/// Why a [`Runner`] stopped (§4.6's saturation loop, plus the usual
/// external budgets).
#[derive(Debug, Clone)]
pub enum StopReason {
    /// A full iteration left `egraph.version()` unchanged.
    Saturated,
    IterationLimit(usize),
    NodeLimit(usize),
    TimeLimit(f64),
    /// The installed analysis reported a conflict; the iteration that
    /// triggered it did not complete its rebuild.
    AnalysisConflict(String),
    Other(String),
}

impl Display for StopReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Saturated => write!(f, "saturated"),
            StopReason::IterationLimit(n) => write!(f, "iteration limit ({n}) reached"),
            StopReason::NodeLimit(n) => write!(f, "node limit ({n}) reached"),
            StopReason::TimeLimit(s) => write!(f, "time limit ({s}s) reached"),
            StopReason::AnalysisConflict(msg) => write!(f, "analysis conflict: {msg}"),
            StopReason::Other(msg) => write!(f, "{msg}"),
        }
    }
}

/// Data generated by running a [`Runner`] for one iteration.
#[derive(Debug, Clone)]
pub struct Iteration<IterData> {
    pub egraph_nodes: usize,
    pub egraph_classes: usize,
    pub applied: IndexMap<String, usize>,
    pub search_time: f64,
    pub apply_time: f64,
    pub rebuild_time: f64,
    pub total_time: f64,
    pub data: IterData,
    pub n_rebuilds: usize,
    pub stop_reason: Option<StopReason>,
}

/// A summary of an entire [`Runner`] run, aggregated from its [`Iteration`]s.
#[derive(Debug, Clone)]
pub struct Report {
    pub iterations: usize,
    pub stop_reason: StopReason,
    pub egraph_nodes: usize,
    pub egraph_classes: usize,
    pub rebuilds: usize,
    pub total_time: f64,
    pub search_time: f64,
    pub apply_time: f64,
    pub rebuild_time: f64,
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Runner report")?;
        writeln!(f, "=============")?;
        writeln!(f, "  Stop reason: {}", self.stop_reason)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(
            f,
            "  Egraph size: {} nodes, {} classes",
            self.egraph_nodes, self.egraph_classes
        )?;
        writeln!(f, "  Rebuilds: {}", self.rebuilds)?;
        writeln!(f, "  Total time: {:.6}s", self.total_time)
    }
}

/// Custom data threaded into each [`Iteration`]; `()` by default.
pub trait IterationData<K: Key, V: Var, A: Analysis<K>>: Sized {
    fn make(runner: &Runner<K, V, A, Self>) -> Self;
}

impl<K: Key, V: Var, A: Analysis<K>> IterationData<K, V, A> for () {
    fn make(_: &Runner<K, V, A, Self>) -> Self {}
}

/// Customizes which matches a [`Runner`] acts on each iteration (§4.6 note
/// on rule scheduling -- not part of the core semantics, only of *when* a
/// rule runs).
#[allow(unused_variables)]
pub trait RewriteScheduler<K: Key, V: Var, A: Analysis<K>> {
    fn can_stop(&mut self, iteration: usize) -> bool {
        true
    }

    fn search_rewrite<'a>(
        &mut self,
        iteration: usize,
        egraph: &EGraph<K, A>,
        rewrite: &'a Rewrite<K, V, A>,
    ) -> Vec<SearchMatches<V>> {
        rewrite.search(egraph)
    }
}

/// Runs every rule every time; equivalent to turning scheduling off.
#[derive(Debug, Default)]
pub struct SimpleScheduler;
impl<K: Key, V: Var, A: Analysis<K>> RewriteScheduler<K, V, A> for SimpleScheduler {}

#[derive(Debug)]
struct RuleStats {
    times_applied: usize,
    banned_until: usize,
    times_banned: usize,
    match_limit: usize,
    ban_length: usize,
}

/// Bans an over-productive rule for a few iterations, doubling its match
/// limit and ban length each time it's banned again. No cross-run
/// persistence: a fresh scheduler starts every `Runner` unbanned.
#[derive(Debug)]
pub struct BackoffScheduler {
    default_match_limit: usize,
    default_ban_length: usize,
    stats: HashMap<String, RuleStats>,
}

impl Default for BackoffScheduler {
    fn default() -> Self {
        BackoffScheduler {
            default_match_limit: 1_000,
            default_ban_length: 5,
            stats: HashMap::default(),
        }
    }
}

impl BackoffScheduler {
    pub fn with_initial_match_limit(mut self, limit: usize) -> Self {
        self.default_match_limit = limit;
        self
    }

    pub fn with_ban_length(mut self, ban_length: usize) -> Self {
        self.default_ban_length = ban_length;
        self
    }

    fn rule_stats(&mut self, name: &str) -> &mut RuleStats {
        self.stats.entry(name.to_owned()).or_insert(RuleStats {
            times_applied: 0,
            banned_until: 0,
            times_banned: 0,
            match_limit: self.default_match_limit,
            ban_length: self.default_ban_length,
        })
    }
}

impl<K: Key, V: Var, A: Analysis<K>> RewriteScheduler<K, V, A> for BackoffScheduler {
    fn can_stop(&mut self, iteration: usize) -> bool {
        let banned: Vec<_> = self
            .stats
            .iter()
            .filter(|(_, s)| s.banned_until > iteration)
            .map(|(name, s)| (name.clone(), s.banned_until))
            .collect();
        banned.is_empty()
    }

    fn search_rewrite<'a>(
        &mut self,
        iteration: usize,
        egraph: &EGraph<K, A>,
        rewrite: &'a Rewrite<K, V, A>,
    ) -> Vec<SearchMatches<V>> {
        let name = rewrite.name.clone();
        let stats = self.rule_stats(&name);
        if iteration < stats.banned_until {
            debug!(
                "skipping {name} ({}-{}), banned until {}",
                stats.times_applied, stats.times_banned, stats.banned_until
            );
            return Vec::new();
        }

        let threshold = stats.match_limit.checked_shl(stats.times_banned as u32).unwrap_or(usize::MAX);
        let matches = rewrite.search(egraph);
        let total: usize = matches.iter().map(|m| m.substs.len()).sum();

        if total > threshold {
            let stats = self.rule_stats(&name);
            let ban_length = stats.ban_length << stats.times_banned;
            stats.times_banned += 1;
            stats.banned_until = iteration + ban_length;
            info!(
                "banning {name} ({}-{}) for {ban_length} iters: {threshold} < {total}",
                stats.times_applied, stats.times_banned
            );
            Vec::new()
        } else {
            self.rule_stats(&name).times_applied += 1;
            matches
        }
    }
}

/// Drives the search-apply-rebuild loop to saturation or an external
/// budget (§4.6), builder-configured.
pub struct Runner<K: Key, V: Var, A: Analysis<K>, IterData = ()> {
    pub egraph: EGraph<K, A>,
    pub iterations: Vec<Iteration<IterData>>,
    pub roots: Vec<Id>,
    pub stop_reason: Option<StopReason>,

    iter_limit: usize,
    node_limit: usize,
    time_limit: Duration,
    start_time: Option<Instant>,
    scheduler: Box<dyn RewriteScheduler<K, V, A>>,
}

impl<K: Key, V: Var, A: Analysis<K>, IterData> Debug for Runner<K, V, A, IterData>
where
    IterData: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("iterations", &self.iterations)
            .field("roots", &self.roots)
            .field("stop_reason", &self.stop_reason)
            .field("iter_limit", &self.iter_limit)
            .field("node_limit", &self.node_limit)
            .field("time_limit", &self.time_limit)
            .finish()
    }
}

impl<K: Key, V: Var, A: Analysis<K>, IterData: IterationData<K, V, A>> Runner<K, V, A, IterData> {
    pub fn new(analysis: A) -> Self {
        Runner {
            egraph: EGraph::new(analysis),
            iterations: Vec::new(),
            roots: Vec::new(),
            stop_reason: None,
            iter_limit: 30,
            node_limit: 10_000,
            time_limit: Duration::from_secs(5),
            start_time: None,
            scheduler: Box::<BackoffScheduler>::default(),
        }
    }

    pub fn with_iter_limit(mut self, iter_limit: usize) -> Self {
        self.iter_limit = iter_limit;
        self
    }

    pub fn with_node_limit(mut self, node_limit: usize) -> Self {
        self.node_limit = node_limit;
        self
    }

    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = time_limit;
        self
    }

    pub fn with_scheduler(mut self, scheduler: impl RewriteScheduler<K, V, A> + 'static) -> Self {
        self.scheduler = Box::new(scheduler);
        self
    }

    pub fn with_tree<T: crate::tree::Tree<Key = K>>(mut self, tree: &T) -> Self {
        let id = self.egraph.add(tree);
        self.roots.push(id);
        self
    }

    pub fn with_egraph(mut self, egraph: EGraph<K, A>) -> Self {
        self.egraph = egraph;
        self
    }

    /// Run to saturation or until a configured limit is hit. After this,
    /// `stop_reason` is always `Some`.
    pub fn run(mut self, rules: &[Rewrite<K, V, A>]) -> Self {
        if let Err(e) = self.egraph.rebuild() {
            self.stop_reason = Some(StopReason::AnalysisConflict(e.to_string()));
            return self;
        }

        loop {
            let iter = self.run_one(rules);
            let stop_reason = iter.stop_reason.clone();
            self.iterations.push(iter);
            if let Some(reason) = stop_reason.or_else(|| self.check_limits().err()) {
                info!("stopping: {reason}");
                self.stop_reason = Some(reason);
                break;
            }
        }

        self
    }

    pub fn report(&self) -> Report {
        Report {
            stop_reason: self.stop_reason.clone().expect("run() always sets stop_reason"),
            iterations: self.iterations.len(),
            egraph_nodes: self.egraph.total_number_of_nodes(),
            egraph_classes: self.egraph.number_of_classes(),
            rebuilds: self.iterations.iter().map(|i| i.n_rebuilds).sum(),
            search_time: self.iterations.iter().map(|i| i.search_time).sum(),
            apply_time: self.iterations.iter().map(|i| i.apply_time).sum(),
            rebuild_time: self.iterations.iter().map(|i| i.rebuild_time).sum(),
            total_time: self.iterations.iter().map(|i| i.total_time).sum(),
        }
    }

    fn run_one(&mut self, rules: &[Rewrite<K, V, A>]) -> Iteration<IterData> {
        self.start_time.get_or_insert_with(Instant::now);
        let mut result = self.check_limits();

        let nodes_before = self.egraph.total_size();
        let classes_before = self.egraph.number_of_classes();
        let i = self.iterations.len();

        let iter_start = Instant::now();

        let mut matches = Vec::with_capacity(rules.len());
        result = result.and_then(|_| {
            rules.iter().try_for_each(|rw| {
                matches.push(self.scheduler.search_rewrite(i, &self.egraph, rw));
                self.check_limits()
            })
        });
        let search_time = iter_start.elapsed().as_secs_f64();

        let apply_start = Instant::now();
        let mut applied = IndexMap::new();
        result = result.and_then(|_| {
            for (rw, ms) in rules.iter().zip(matches) {
                match rw.apply(&mut self.egraph, &ms) {
                    Ok(changed) if !changed.is_empty() => {
                        *applied.entry(rw.name.clone()).or_insert(0) += changed.len();
                    }
                    Ok(_) => {}
                    Err(e) => return Err(StopReason::AnalysisConflict(e.to_string())),
                }
                if let Err(stop) = self.check_limits() {
                    return Err(stop);
                }
            }
            Ok(())
        });
        let apply_time = apply_start.elapsed().as_secs_f64();

        let rebuild_start = Instant::now();
        let n_rebuilds = match self.egraph.rebuild() {
            Ok(n) => n,
            Err(e) => {
                result = Err(StopReason::AnalysisConflict(e.to_string()));
                0
            }
        };
        let rebuild_time = rebuild_start.elapsed().as_secs_f64();

        let saturated = applied.is_empty()
            && self.scheduler.can_stop(i)
            && nodes_before == self.egraph.total_size()
            && classes_before == self.egraph.number_of_classes();

        if saturated {
            result = result.and(Err(StopReason::Saturated));
        }

        Iteration {
            egraph_nodes: nodes_before,
            egraph_classes: classes_before,
            applied,
            search_time,
            apply_time,
            rebuild_time,
            total_time: iter_start.elapsed().as_secs_f64(),
            n_rebuilds,
            data: IterData::make(&*self),
            stop_reason: result.err(),
        }
    }

    fn check_limits(&self) -> Result<(), StopReason> {
        let elapsed = self.start_time.expect("try_start runs first").elapsed();
        if elapsed > self.time_limit {
            return Err(StopReason::TimeLimit(elapsed.as_secs_f64()));
        }
        let size = self.egraph.total_size();
        if size > self.node_limit {
            return Err(StopReason::NodeLimit(size));
        }
        if self.iterations.len() >= self.iter_limit {
            return Err(StopReason::IterationLimit(self.iterations.len()));
        }
        Ok(())
    }
}

/// `enode_cost_rec` from §4.7: the cost of one e-node given its children's
/// already-known costs.
pub trait CostFunction<K> {
    type Cost: PartialOrd + Debug + Clone;

    fn cost<C>(&mut self, enode: &ENode<K>, costs: C) -> Self::Cost
    where
        C: FnMut(Id) -> Self::Cost;
}

/// Total AST size: each e-node costs 1 plus its children's costs.
#[derive(Debug, Default)]
pub struct AstSize;
impl<K> CostFunction<K> for AstSize {
    type Cost = usize;
    fn cost<C>(&mut self, enode: &ENode<K>, mut costs: C) -> Self::Cost
    where
        C: FnMut(Id) -> Self::Cost,
    {
        enode.fold(1, |sum, id| sum.saturating_add(costs(id)))
    }
}

/// Maximum AST depth.
#[derive(Debug, Default)]
pub struct AstDepth;
impl<K> CostFunction<K> for AstDepth {
    type Cost = usize;
    fn cost<C>(&mut self, enode: &ENode<K>, mut costs: C) -> Self::Cost
    where
        C: FnMut(Id) -> Self::Cost,
    {
        1 + enode.fold(0, |max, id| max.max(costs(id)))
    }
}

fn cmp_cost<T: PartialOrd>(a: &Option<T>, b: &Option<T>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => a.partial_cmp(b).expect("CostFunction::Cost must not be NaN"),
    }
}

/// Dijkstra-style fixed-point extractor (§4.7): the greedy search for each
/// class's cheapest representative runs once, at construction time.
pub struct Extractor<'a, K, A: Analysis<K>, CF: CostFunction<K>> {
    cost_function: CF,
    costs: HashMap<Id, (CF::Cost, ENode<K>)>,
    egraph: &'a EGraph<K, A>,
}

impl<'a, K, A, CF> Extractor<'a, K, A, CF>
where
    K: Key,
    A: Analysis<K>,
    CF: CostFunction<K>,
{
    pub fn new(egraph: &'a EGraph<K, A>, cost_function: CF) -> Self {
        let mut extractor = Extractor {
            cost_function,
            costs: HashMap::default(),
            egraph,
        };
        extractor.find_costs();
        extractor
    }

    /// The cheapest cost and chosen e-node for `eclass`, or `Err` if no
    /// finite-cost representative was reachable (§7's extraction failure).
    pub fn find_best(&self, eclass: Id) -> Result<(CF::Cost, ENode<K>), crate::error::ExtractionError> {
        self.costs
            .get(&self.egraph.find(eclass))
            .cloned()
            .ok_or(crate::error::ExtractionError::Unreachable(eclass))
    }

    /// Recursively assembles a concrete tree via `make_node`, the sole
    /// coupling back to the host language (§4.7 step 3).
    pub fn extract<T>(&self, eclass: Id, make_node: &mut impl FnMut(K, Vec<T>) -> T) -> Result<T, crate::error::ExtractionError> {
        let (_, node) = self.find_best(eclass)?;
        let mut children = Vec::with_capacity(node.arity());
        for &child in node.children() {
            children.push(self.extract(child, make_node)?);
        }
        Ok(make_node(node.key.clone(), children))
    }

    fn node_total_cost(&mut self, node: &ENode<K>) -> Option<CF::Cost> {
        let egraph = self.egraph;
        let costs = &self.costs;
        if node
            .children()
            .iter()
            .all(|&id| costs.contains_key(&egraph.find(id)))
        {
            Some(self.cost_function.cost(node, |id| costs[&egraph.find(id)].0.clone()))
        } else {
            None
        }
    }

    fn find_costs(&mut self) {
        let mut changed = true;
        while changed {
            changed = false;
            for class in self.egraph.classes() {
                if let Some((cost, node)) = self.make_pass(class) {
                    match self.costs.get(&class.id) {
                        Some((old, _)) if !(cost < *old) => {}
                        _ => {
                            self.costs.insert(class.id, (cost, node));
                            changed = true;
                        }
                    }
                }
            }
        }
    }

    fn make_pass(&mut self, eclass: &crate::egraph::EClass<K, A::Data>) -> Option<(CF::Cost, ENode<K>)> {
        eclass
            .iter()
            .map(|n| (self.node_total_cost(n), n))
            .min_by(|a, b| cmp_cost(&a.0, &b.0))
            .and_then(|(cost, node)| cost.map(|c| (c, node.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egraph::EGraph;
    use crate::tree::Tree;
    use test_case::test_case;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    enum Op {
        Leaf(i32),
        Add,
    }

    #[derive(Clone)]
    struct T {
        op: Op,
        kids: Vec<T>,
    }

    impl Tree for T {
        type Key = Op;
        fn value(&self) -> Op {
            self.op
        }
        fn children(&self) -> &[T] {
            &self.kids
        }
    }

    fn leaf(n: i32) -> T {
        T { op: Op::Leaf(n), kids: vec![] }
    }

    fn add(a: T, b: T) -> T {
        T { op: Op::Add, kids: vec![a, b] }
    }

    #[test_case(leaf(1), 1; "a bare leaf")]
    #[test_case(add(leaf(1), leaf(2)), 3; "one level of nesting")]
    #[test_case(add(add(leaf(1), leaf(2)), leaf(3)), 5; "two levels of nesting")]
    fn ast_size_counts_every_node(tree: T, expected: usize) {
        let mut g: EGraph<Op, ()> = EGraph::new(());
        let root = g.add(&tree);
        let extractor = Extractor::new(&g, AstSize);
        let (cost, _) = extractor.find_best(root).unwrap();
        assert_eq!(cost, expected);
    }

    /// Extraction round-trip: with only one e-node per class,
    /// extracting the root reproduces the original tree structurally.
    #[test]
    fn extraction_round_trips_a_tree_with_no_sharing() {
        let tree = add(add(leaf(1), leaf(2)), leaf(3));
        let mut g: EGraph<Op, ()> = EGraph::new(());
        let root = g.add(&tree);
        g.rebuild().unwrap();

        let extractor = Extractor::new(&g, AstSize);
        let rebuilt = extractor
            .extract(root, &mut |key, kids: Vec<T>| T { op: key, kids })
            .unwrap();

        fn same_shape(a: &T, b: &T) -> bool {
            a.op == b.op
                && a.kids.len() == b.kids.len()
                && a.kids.iter().zip(&b.kids).all(|(x, y)| same_shape(x, y))
        }
        assert!(same_shape(&tree, &rebuilt));
    }

    #[test]
    fn ast_depth_tracks_the_tallest_branch() {
        let tree = add(add(leaf(1), leaf(2)), leaf(3));
        let mut g: EGraph<Op, ()> = EGraph::new(());
        let root = g.add(&tree);
        let extractor = Extractor::new(&g, AstDepth);
        let (depth, _) = extractor.find_best(root).unwrap();
        assert_eq!(depth, 3);
    }
}
