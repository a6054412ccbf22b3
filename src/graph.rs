//! Dependency graph builder (spec §4.4). Builds a directed graph of
//! source→source edges from packaging-control files and/or an archive
//! index, then exposes cycle-tolerant wave computation and rebuild
//! propagation.
//!
//! Edge (u, v) means "u depends on v" — the same convention the teacher's
//! `to_release.rs` uses, which is why its build order is obtained via
//! `toposort(...).rev()`: dependencies must come first.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::{condensation, tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::archive::ArchiveIndex;
use crate::control::{parse_stanzas, split_commas};
use crate::identity::Name;
use crate::version::VersionString;

/// A small hardcoded table of known-soft edges to exclude when building from
/// control files (spec §4.4 Path A), generalizing
/// `SOFT_DEPENDENCY_EXCLUSIONS` in original_source's graph_builder.py.
pub fn soft_dependency_exclusions() -> HashSet<(Name, Name)> {
    [
        (Name::new("tempest"), Name::new("nova")),
        (Name::new("tempest"), Name::new("keystone")),
        (Name::new("openstack-doc-tools"), Name::new("nova")),
    ]
    .into_iter()
    .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: Name,
    pub version: Option<VersionString>,
    pub needs_rebuild: bool,
    pub reason: String,
}

impl Node {
    pub fn new(name: Name) -> Self {
        Node { name, version: None, needs_rebuild: false, reason: String::new() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("cycle detected among {0:?}")]
    Cycle(Vec<Name>),
    #[error("edge endpoint {0} has no corresponding node")]
    DanglingEdge(Name),
}

#[derive(Debug, Default)]
pub struct MissingDeps {
    /// source package -> unresolved build-dependency names
    pub by_source: HashMap<Name, Vec<String>>,
}

#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<Node, ()>,
    index: HashMap<Name, NodeIndex>,
    pub excluded_edges: Vec<(Name, Name)>,
    pub missing: MissingDeps,
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph {
            graph: DiGraph::new(),
            index: HashMap::new(),
            excluded_edges: Vec::new(),
            missing: MissingDeps::default(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn contains(&self, name: &Name) -> bool {
        self.index.contains_key(name)
    }

    pub fn node(&self, name: &Name) -> Option<&Node> {
        self.index.get(name).map(|i| &self.graph[*i])
    }

    pub fn node_mut(&mut self, name: &Name) -> Option<&mut Node> {
        let idx = *self.index.get(name)?;
        Some(&mut self.graph[idx])
    }

    pub fn names(&self) -> impl Iterator<Item = &Name> {
        self.graph.node_weights().map(|n| &n.name)
    }

    /// The names this node has a direct (non-transitive) edge to, i.e. its
    /// immediate build dependencies.
    pub fn direct_dependencies(&self, name: &Name) -> Vec<Name> {
        let Some(&idx) = self.index.get(name) else { return Vec::new() };
        self.graph.neighbors_directed(idx, Direction::Outgoing).map(|i| self.graph[i].name.clone()).collect()
    }

    fn ensure_node(&mut self, name: &Name) -> NodeIndex {
        if let Some(idx) = self.index.get(name) {
            return *idx;
        }
        let idx = self.graph.add_node(Node::new(name.clone()));
        self.index.insert(name.clone(), idx);
        idx
    }

    fn add_edge(&mut self, from: &Name, to: &Name) {
        let a = self.ensure_node(from);
        let b = self.ensure_node(to);
        if self.graph.find_edge(a, b).is_none() {
            self.graph.add_edge(a, b, ());
        }
    }

    /// Path A (spec §4.4): build from packaging-control files. `sources` maps
    /// a source package name to its raw control-file text. `exclusions` is
    /// the soft-cycle table to skip.
    pub fn from_control(
        sources: &HashMap<Name, String>,
        exclusions: &HashSet<(Name, Name)>,
    ) -> Self {
        let mut graph = DependencyGraph::new();
        let mut binary_to_source: HashMap<Name, Name> = HashMap::new();

        for (source_name, text) in sources {
            graph.ensure_node(source_name);
            let stanzas = parse_stanzas(text);
            for stanza in stanzas.iter().skip(1) {
                if let Some(package) = stanza.get("Package") {
                    binary_to_source.insert(Name::new(package), source_name.clone());
                }
            }
        }

        for (source_name, text) in sources {
            let stanzas = parse_stanzas(text);
            let Some(first) = stanzas.first() else { continue };
            let mut deps_text = String::new();
            if let Some(bd) = first.get("Build-Depends") {
                deps_text.push_str(bd);
                deps_text.push(',');
            }
            if let Some(bdi) = first.get("Build-Depends-Indep") {
                deps_text.push_str(bdi);
            }

            for atom in split_commas(&deps_text) {
                let bare_name = atom.split_whitespace().next().unwrap_or(&atom);
                let dep_name = Name::new(bare_name.trim_start_matches('|').trim());
                let Some(dep_source) = binary_to_source.get(&dep_name).cloned() else {
                    graph.missing.by_source.entry(source_name.clone()).or_default().push(atom.clone());
                    continue;
                };
                if dep_source == *source_name {
                    continue;
                }
                if exclusions.contains(&(source_name.clone(), dep_source.clone())) {
                    graph.excluded_edges.push((source_name.clone(), dep_source.clone()));
                    continue;
                }
                graph.add_edge(source_name, &dep_source);
            }
        }

        graph
    }

    /// Path B (spec §4.4): BFS over the archive index from a seed set,
    /// restricted to a `governed` set so traversal does not escape the pack.
    pub fn from_index(seeds: &[Name], index: &ArchiveIndex, governed: &HashSet<Name>) -> Self {
        let mut graph = DependencyGraph::new();
        let mut queue: VecDeque<Name> = seeds.iter().cloned().collect();
        let mut seen: HashSet<Name> = seeds.iter().cloned().collect();

        for seed in seeds {
            graph.ensure_node(seed);
        }

        while let Some(source_name) = queue.pop_front() {
            for binary in index.get_binaries_for_source(&source_name) {
                let Some(record) = index.find_package(binary) else { continue };
                let all_deps = record.depends.iter().chain(record.pre_depends.iter());
                for constraint in all_deps {
                    let Some(dep_record) = index.find_package(&Name::new(&constraint.name)) else {
                        continue;
                    };
                    let dep_source = dep_record.source_name.clone();
                    if dep_source == source_name || !governed.contains(&dep_source) {
                        continue;
                    }
                    graph.add_edge(&source_name, &dep_source);
                    if seen.insert(dep_source.clone()) {
                        queue.push_back(dep_source);
                    }
                }
            }
        }

        graph
    }

    /// Tarjan-style SCC identification; each returned list is one cycle
    /// (SCCs of size > 1, plus self-loops).
    pub fn detect_cycles(&self) -> Vec<Vec<Name>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.has_self_loop(scc[0]))
            .map(|scc| scc.into_iter().map(|i| self.graph[i].name.clone()).collect())
            .collect()
    }

    fn has_self_loop(&self, idx: NodeIndex) -> bool {
        self.graph.find_edge(idx, idx).is_some()
    }

    /// Dependencies-first topological order. Errors if any SCC has size > 1.
    pub fn topological_sort(&self) -> Result<Vec<Name>, GraphError> {
        let cycles = self.detect_cycles();
        if !cycles.is_empty() {
            return Err(GraphError::Cycle(cycles.into_iter().flatten().collect()));
        }
        let order =
            toposort(&self.graph, None).map_err(|c| GraphError::Cycle(vec![self.graph[c.node_id()].name.clone()]))?;
        Ok(order.into_iter().rev().map(|i| self.graph[i].name.clone()).collect())
    }

    /// wave = 1 + max(wave of dependencies), 0 if none. Requires a DAG.
    pub fn compute_waves(&self) -> Result<HashMap<Name, u32>, GraphError> {
        let order = self.topological_sort()?;
        let mut waves: HashMap<Name, u32> = HashMap::new();
        for name in &order {
            let idx = self.index[name];
            let max_dep_wave = self
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .map(|dep_idx| waves.get(&self.graph[dep_idx].name).copied().unwrap_or(0))
                .max();
            let wave = match max_dep_wave {
                Some(w) => w + 1,
                None => 0,
            };
            waves.insert(name.clone(), wave);
        }
        Ok(waves)
    }

    /// Condense SCCs to single nodes, topo-sort the condensation, and assign
    /// the condensation's wave to every SCC member. Well-defined even with
    /// cycles (spec §4.4).
    pub fn compute_waves_with_cycles(&self) -> HashMap<Name, u32> {
        let condensed = condensation(self.graph.clone(), false);
        // `condensation` returns a DiGraph<Vec<Node>, ()>; edge direction is
        // preserved, so the same "reverse toposort" rule applies.
        let order = match toposort(&condensed, None) {
            Ok(order) => order,
            Err(_) => unreachable!("condensation output is always a DAG"),
        };
        let mut condensed_wave: HashMap<NodeIndex, u32> = HashMap::new();
        for idx in order.into_iter().rev() {
            let max_dep_wave = condensed
                .neighbors_directed(idx, Direction::Outgoing)
                .map(|dep_idx| condensed_wave.get(&dep_idx).copied().unwrap_or(0))
                .max();
            let wave = match max_dep_wave {
                Some(w) => w + 1,
                None => 0,
            };
            condensed_wave.insert(idx, wave);
        }

        let mut waves = HashMap::new();
        for idx in condensed.node_indices() {
            let wave = condensed_wave[&idx];
            for node in &condensed[idx] {
                waves.insert(node.name.clone(), wave);
            }
        }
        waves
    }

    /// Every edge whose endpoints lie in the same SCC of size > 1, plus
    /// self-loops.
    pub fn get_cycle_edges(&self) -> Vec<(Name, Name)> {
        let sccs = tarjan_scc(&self.graph);
        let mut scc_of: HashMap<NodeIndex, usize> = HashMap::new();
        for (i, scc) in sccs.iter().enumerate() {
            for &idx in scc {
                scc_of.insert(idx, i);
            }
        }
        let mut edges = Vec::new();
        for edge in self.graph.edge_indices() {
            let (a, b) = self.graph.edge_endpoints(edge).expect("edge index valid");
            let same_scc = scc_of[&a] == scc_of[&b];
            let scc_len = sccs[scc_of[&a]].len();
            if same_scc && (scc_len > 1 || a == b) {
                edges.push((self.graph[a].name.clone(), self.graph[b].name.clone()));
            }
        }
        edges
    }

    /// Reverse-edge BFS from every node already marked `needs_rebuild=true`,
    /// marking every transitive dependent.
    pub fn propagate_rebuilds(&mut self) {
        let mut queue: VecDeque<NodeIndex> =
            self.graph.node_indices().filter(|&i| self.graph[i].needs_rebuild).collect();
        let mut reasons: HashMap<NodeIndex, String> = HashMap::new();
        for &idx in &queue {
            reasons.insert(idx, self.graph[idx].reason.clone());
        }

        while let Some(idx) = queue.pop_front() {
            let trigger_name = self.graph[idx].name.clone();
            let dependents: Vec<NodeIndex> =
                self.graph.neighbors_directed(idx, Direction::Incoming).collect();
            for dep_idx in dependents {
                if !self.graph[dep_idx].needs_rebuild {
                    self.graph[dep_idx].needs_rebuild = true;
                    let reason = format!("transitively depends on {trigger_name}");
                    self.graph[dep_idx].reason = reason.clone();
                    reasons.insert(dep_idx, reason);
                    queue.push_back(dep_idx);
                }
            }
        }
    }

    /// The restriction of the topological order to the set of nodes marked
    /// `needs_rebuild`.
    pub fn get_rebuild_order(&self) -> Result<Vec<Name>, GraphError> {
        let order = self.topological_sort()?;
        Ok(order.into_iter().filter(|n| self.node(n).map(|x| x.needs_rebuild).unwrap_or(false)).collect())
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control_with_build_deps(source: &str, binaries: &[&str], build_deps: &str) -> String {
        let mut text = format!("Source: {source}\nBuild-Depends: {build_deps}\n\n");
        for bin in binaries {
            text.push_str(&format!("Package: {bin}\n\n"));
        }
        text
    }

    #[test]
    fn s1_linear_chain() {
        let mut sources = HashMap::new();
        sources.insert(Name::new("a"), control_with_build_deps("a", &["a"], "libb-dev"));
        sources.insert(Name::new("b"), control_with_build_deps("b", &["libb-dev"], "libc-dev"));
        sources.insert(Name::new("c"), control_with_build_deps("c", &["libc-dev"], ""));

        let graph = DependencyGraph::from_control(&sources, &HashSet::new());
        let order = graph.topological_sort().unwrap();
        assert_eq!(order, vec![Name::new("c"), Name::new("b"), Name::new("a")]);

        let waves = graph.compute_waves().unwrap();
        assert_eq!(waves[&Name::new("c")], 0);
        assert_eq!(waves[&Name::new("b")], 1);
        assert_eq!(waves[&Name::new("a")], 2);
    }

    #[test]
    fn s2_cycle_with_soft_exclusion() {
        let mut sources = HashMap::new();
        sources.insert(Name::new("p"), control_with_build_deps("p", &["p-bin"], "q-bin"));
        sources.insert(Name::new("q"), control_with_build_deps("q", &["q-bin"], "p-bin"));

        let mut exclusions = HashSet::new();
        exclusions.insert((Name::new("q"), Name::new("p")));

        let graph = DependencyGraph::from_control(&sources, &exclusions);
        assert_eq!(graph.excluded_edges, vec![(Name::new("q"), Name::new("p"))]);
        let order = graph.topological_sort().unwrap();
        assert_eq!(order, vec![Name::new("q"), Name::new("p")]);
    }

    #[test]
    fn detects_real_cycle_without_exclusion() {
        let mut sources = HashMap::new();
        sources.insert(Name::new("p"), control_with_build_deps("p", &["p-bin"], "q-bin"));
        sources.insert(Name::new("q"), control_with_build_deps("q", &["q-bin"], "p-bin"));

        let graph = DependencyGraph::from_control(&sources, &HashSet::new());
        assert!(graph.topological_sort().is_err());
        let waves = graph.compute_waves_with_cycles();
        assert_eq!(waves[&Name::new("p")], waves[&Name::new("q")]);
        let cycle_edges = graph.get_cycle_edges();
        assert_eq!(cycle_edges.len(), 2);
    }

    #[test]
    fn rebuild_propagation_marks_transitive_dependents() {
        let mut sources = HashMap::new();
        sources.insert(Name::new("a"), control_with_build_deps("a", &["a"], "libb-dev"));
        sources.insert(Name::new("b"), control_with_build_deps("b", &["libb-dev"], "libc-dev"));
        sources.insert(Name::new("c"), control_with_build_deps("c", &["libc-dev"], ""));

        let mut graph = DependencyGraph::from_control(&sources, &HashSet::new());
        graph.node_mut(&Name::new("c")).unwrap().needs_rebuild = true;
        graph.node_mut(&Name::new("c")).unwrap().reason = "upstream bump".to_string();
        graph.propagate_rebuilds();

        assert!(graph.node(&Name::new("b")).unwrap().needs_rebuild);
        assert!(graph.node(&Name::new("a")).unwrap().needs_rebuild);

        let order = graph.get_rebuild_order().unwrap();
        assert_eq!(order, vec![Name::new("c"), Name::new("b"), Name::new("a")]);
    }

    #[test]
    fn missing_build_dep_is_recorded() {
        let mut sources = HashMap::new();
        sources.insert(Name::new("a"), control_with_build_deps("a", &["a"], "libnonexistent-dev"));

        let graph = DependencyGraph::from_control(&sources, &HashSet::new());
        assert_eq!(graph.missing.by_source[&Name::new("a")], vec!["libnonexistent-dev".to_string()]);
    }
}
