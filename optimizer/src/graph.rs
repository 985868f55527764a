//! The bidirected assembly graph and its reachability indices.
//!
//! Nodes come in twin pairs: node `n` and node `n ^ 1` carry the same
//! sequence in opposite orientations, and every edge `u -> v` has the mirror
//! edge `twin(v) -> twin(u)`. Topology is frozen after loading; only the
//! witness payloads of the reachability indices change during optimization.

use crate::misc::revcmp;
use definitions::twin;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Expansion budget for the bounded path searches. Keeps witness
/// enumeration cheap on tangled regions.
const BFS_POP_BUDGET: usize = 100_000;
/// At most this many alternative witnesses are collected per (u, v) query.
const MAX_ALTERNATIVES: usize = 32;

#[derive(Debug, Clone, Default)]
pub struct GraphNode {
    pub seq: Vec<u8>,
    pub successors: Vec<usize>,
    pub predecessors: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<GraphNode>,
    kmer: usize,
    reach: Vec<HashSet<usize>>,
    reach_big: Vec<HashMap<usize, Vec<usize>>>,
    reach_limit: Vec<HashMap<usize, Vec<usize>>>,
}

impl std::fmt::Display for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let edges: usize = self.nodes.iter().map(|n| n.successors.len()).sum();
        let bases: usize = self.nodes.iter().map(|n| n.seq.len()).sum();
        write!(
            f,
            "Node:{}, Edges:{}, Bases:{}",
            self.nodes.len(),
            edges,
            bases
        )
    }
}

impl Graph {
    /// Assemble a graph from canonical-orientation sequences and edges.
    /// `seqs[i]` becomes node `2 * i`; the twin `2 * i + 1` carries the
    /// reverse complement. Edge endpoints use full (oriented) ids.
    pub fn from_seqs(seqs: &[Vec<u8>], edges: &[(usize, usize)], kmer: usize) -> Self {
        let mut nodes = vec![GraphNode::default(); 2 * seqs.len()];
        for (i, seq) in seqs.iter().enumerate() {
            nodes[2 * i].seq = seq.clone();
            nodes[2 * i + 1].seq = revcmp(seq);
        }
        let mut graph = Self {
            nodes,
            kmer,
            ..Default::default()
        };
        for &(u, v) in edges {
            graph.add_edge(u, v);
        }
        graph.finalize_edges();
        graph
    }

    pub fn load<P: AsRef<Path>>(path: P, kmer: usize) -> std::io::Result<Self> {
        let reader = std::fs::File::open(path).map(BufReader::new)?;
        Self::from_reader(reader, kmer)
    }

    /// Parse the line-oriented graph exchange format:
    /// `NODE <even-id> <sequence>` and `EDGE <from> <to>`.
    pub fn from_reader<R: BufRead>(reader: R, kmer: usize) -> std::io::Result<Self> {
        let bad = |msg: String| std::io::Error::new(std::io::ErrorKind::InvalidData, msg);
        let mut seqs: Vec<(usize, Vec<u8>)> = vec![];
        let mut edges: Vec<(usize, usize)> = vec![];
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let fields: Vec<_> = line.split_whitespace().collect();
            match fields.as_slice() {
                ["NODE", id, seq] => {
                    let id: usize = id
                        .parse()
                        .map_err(|_| bad(format!("bad node id at line {}", lineno + 1)))?;
                    if id % 2 != 0 {
                        return Err(bad(format!("node id {} is not even", id)));
                    }
                    seqs.push((id, seq.as_bytes().to_vec()));
                }
                ["EDGE", from, to] => {
                    let from: usize = from
                        .parse()
                        .map_err(|_| bad(format!("bad edge at line {}", lineno + 1)))?;
                    let to: usize = to
                        .parse()
                        .map_err(|_| bad(format!("bad edge at line {}", lineno + 1)))?;
                    edges.push((from, to));
                }
                _ => return Err(bad(format!("unrecognized line {}: {}", lineno + 1, line))),
            }
        }
        let max_id = seqs.iter().map(|&(id, _)| id).max().unwrap_or(0);
        let mut nodes = vec![GraphNode::default(); max_id + 2];
        for (id, seq) in seqs {
            nodes[id + 1].seq = revcmp(&seq);
            nodes[id].seq = seq;
        }
        let mut graph = Self {
            nodes,
            kmer,
            ..Default::default()
        };
        for (u, v) in edges {
            if graph.node_len(u) == 0 || graph.node_len(v) == 0 {
                return Err(bad(format!("edge {} -> {} references unknown node", u, v)));
            }
            graph.add_edge(u, v);
        }
        graph.finalize_edges();
        graph.check_overlaps();
        debug!("GRAPH\t{}", graph);
        Ok(graph)
    }

    fn add_edge(&mut self, u: usize, v: usize) {
        self.nodes[u].successors.push(v);
        self.nodes[v].predecessors.push(u);
        self.nodes[twin(v)].successors.push(twin(u));
        self.nodes[twin(u)].predecessors.push(twin(v));
    }

    fn finalize_edges(&mut self) {
        for node in self.nodes.iter_mut() {
            node.successors.sort_unstable();
            node.successors.dedup();
            node.predecessors.sort_unstable();
            node.predecessors.dedup();
        }
    }

    // An edge u -> v should satisfy suffix(u, k-1) == prefix(v, k-1).
    fn check_overlaps(&self) {
        let k = self.kmer;
        for u in 0..self.nodes.len() {
            for &v in self.nodes[u].successors.iter() {
                let su = &self.nodes[u].seq;
                let sv = &self.nodes[v].seq;
                if su.len() < k - 1 || sv.len() < k - 1 {
                    continue;
                }
                if su[su.len() - (k - 1)..] != sv[..k - 1] {
                    warn!("GRAPH\tOVERLAP\t{}\t{}\tmismatched (k-1)-mer", u, v);
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
    pub fn kmer(&self) -> usize {
        self.kmer
    }
    pub fn seq(&self, u: usize) -> &[u8] {
        &self.nodes[u].seq
    }
    pub fn node_len(&self, u: usize) -> usize {
        self.nodes[u].seq.len()
    }
    /// Bases this node adds when appended to a walk after its predecessor.
    pub fn extension_len(&self, u: usize) -> usize {
        self.node_len(u).saturating_sub(self.kmer - 1)
    }
    pub fn is_big(&self, u: usize, threshold: usize) -> bool {
        self.node_len(u) >= threshold
    }
    pub fn successors(&self, u: usize) -> &[usize] {
        &self.nodes[u].successors
    }
    pub fn predecessors(&self, u: usize) -> &[usize] {
        &self.nodes[u].predecessors
    }
    /// Even ids of nodes at or above the long-contig threshold.
    pub fn big_pairs(&self, threshold: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len())
            .step_by(2)
            .filter(move |&u| self.is_big(u, threshold))
    }

    /// Transitive closure over successors, by BFS from every node.
    pub fn compute_reach(&mut self) {
        let mut reach = Vec::with_capacity(self.nodes.len());
        for start in 0..self.nodes.len() {
            let mut seen = HashSet::new();
            let mut queue = VecDeque::from([start]);
            while let Some(u) = queue.pop_front() {
                for &v in self.nodes[u].successors.iter() {
                    if seen.insert(v) {
                        queue.push_back(v);
                    }
                }
            }
            reach.push(seen);
        }
        self.reach = reach;
        debug!("REACH\tFULL\tDONE");
    }

    /// For every node, the big nodes first crossed on some path out of it,
    /// each with a shortest witness (the intermediate nodes, endpoints
    /// excluded). A branch stops at the first big node it reaches.
    pub fn compute_reach_big(&mut self, threshold: usize) {
        let mut index = Vec::with_capacity(self.nodes.len());
        for start in 0..self.nodes.len() {
            index.push(self.reach_big_from(start, threshold));
        }
        self.reach_big = index;
        let targets: usize = self.reach_big.iter().map(|m| m.len()).sum();
        debug!("REACH\tBIG\t{}\ttargets", targets);
    }

    fn reach_big_from(&self, start: usize, threshold: usize) -> HashMap<usize, Vec<usize>> {
        let mut witnesses: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<(usize, Vec<usize>)> = VecDeque::from([(start, vec![])]);
        let mut budget = BFS_POP_BUDGET;
        while let Some((u, path)) = queue.pop_front() {
            budget -= 1;
            if budget == 0 {
                break;
            }
            for &v in self.nodes[u].successors.iter() {
                if !seen.insert(v) {
                    continue;
                }
                if self.is_big(v, threshold) {
                    witnesses.entry(v).or_insert_with(|| path.clone());
                    continue;
                }
                let mut next = path.clone();
                next.push(v);
                queue.push_back((v, next));
            }
        }
        witnesses
    }

    /// Witnesses to every node whose accumulated extension length from the
    /// start is at most `limit` bases.
    pub fn compute_reach_limit(&mut self, limit: usize) {
        let mut index = Vec::with_capacity(self.nodes.len());
        for start in 0..self.nodes.len() {
            index.push(self.reach_limit_from(start, limit));
        }
        self.reach_limit = index;
        let targets: usize = self.reach_limit.iter().map(|m| m.len()).sum();
        debug!("REACH\tLIMIT\t{}\t{}\ttargets", limit, targets);
    }

    fn reach_limit_from(&self, start: usize, limit: usize) -> HashMap<usize, Vec<usize>> {
        let mut witnesses: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<(usize, usize, Vec<usize>)> = VecDeque::from([(start, 0, vec![])]);
        let mut budget = BFS_POP_BUDGET;
        while let Some((u, used, path)) = queue.pop_front() {
            budget -= 1;
            if budget == 0 {
                break;
            }
            for &v in self.nodes[u].successors.iter() {
                let used = used + self.extension_len(v);
                if used > limit || !seen.insert(v) {
                    continue;
                }
                witnesses.entry(v).or_insert_with(|| path.clone());
                let mut next = path.clone();
                next.push(v);
                queue.push_back((v, used, next));
            }
        }
        witnesses
    }

    pub fn reachable(&self, u: usize, v: usize) -> bool {
        self.reach.get(u).map_or(false, |set| set.contains(&v))
    }

    /// The big-node targets of `u`, with their stored witnesses.
    pub fn big_targets(&self, u: usize) -> &HashMap<usize, Vec<usize>> {
        &self.reach_big[u]
    }

    /// The stored witness for `u => v`, if any index records one.
    pub fn witness(&self, u: usize, v: usize) -> Option<&[usize]> {
        if let Some(path) = self.reach_big.get(u).and_then(|m| m.get(&v)) {
            return Some(path);
        }
        self.reach_limit
            .get(u)
            .and_then(|m| m.get(&v))
            .map(|p| p.as_slice())
    }

    /// Overwrite the stored witnesses for `u => v` where a witness is
    /// already recorded. New pairs are never introduced here; the indices'
    /// key sets are fixed by the startup BFS passes.
    pub fn update_witness(&mut self, u: usize, v: usize, path: &[usize]) {
        if let Some(stored) = self.reach_big.get_mut(u).and_then(|m| m.get_mut(&v)) {
            *stored = path.to_vec();
        }
        if let Some(stored) = self.reach_limit.get_mut(u).and_then(|m| m.get_mut(&v)) {
            *stored = path.to_vec();
        }
    }

    /// Enumerate distinct witnesses `u => v` with total extension length at
    /// most `limit`, in BFS order, up to an internal cap. Used to draw the
    /// replacement sub-walks of local changes.
    pub fn alternative_witnesses(&self, u: usize, v: usize, limit: usize) -> Vec<Vec<usize>> {
        let mut found = vec![];
        let mut queue: VecDeque<(usize, usize, Vec<usize>)> = VecDeque::from([(u, 0, vec![])]);
        let mut budget = BFS_POP_BUDGET;
        while let Some((node, used, path)) = queue.pop_front() {
            budget -= 1;
            if budget == 0 || found.len() >= MAX_ALTERNATIVES {
                break;
            }
            for &next in self.nodes[node].successors.iter() {
                if next == v {
                    found.push(path.clone());
                    continue;
                }
                let used = used + self.extension_len(next);
                // Simple paths only; a witness revisiting a node adds
                // nothing the shorter variant does not.
                if used > limit || path.contains(&next) || next == u {
                    continue;
                }
                let mut longer = path.clone();
                longer.push(next);
                queue.push_back((next, used, longer));
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(len: usize, fill: u8) -> Vec<u8> {
        vec![fill; len]
    }

    // 0 -> 2 -> 4 and 0 -> 6 -> 4, with 8 dangling.
    fn diamond() -> Graph {
        let seqs = vec![
            seq(600, b'A'),
            seq(50, b'C'),
            seq(700, b'G'),
            seq(80, b'T'),
            seq(900, b'A'),
        ];
        let edges = vec![(0, 2), (2, 4), (0, 6), (6, 4)];
        Graph::from_seqs(&seqs, &edges, 47)
    }

    #[test]
    fn twins_and_mirror_edges() {
        let gr = diamond();
        assert_eq!(gr.node_len(0), 600);
        assert_eq!(gr.node_len(1), 600);
        assert!(gr.successors(0).contains(&2));
        // Mirror of 0 -> 2 is 3 -> 1.
        assert!(gr.successors(3).contains(&1));
        assert!(gr.predecessors(1).contains(&3));
    }

    #[test]
    fn loader_roundtrip() {
        let text = "NODE 0 ACGTACGT\nNODE 2 TTTTGGGG\nEDGE 0 2\n";
        let gr = Graph::from_reader(text.as_bytes(), 5).unwrap();
        assert_eq!(gr.node_count(), 4);
        assert_eq!(gr.seq(1), revcmp(b"ACGTACGT").as_slice());
        assert!(gr.successors(0).contains(&2));
        assert!(Graph::from_reader("NODE 1 ACGT\n".as_bytes(), 5).is_err());
        assert!(Graph::from_reader("EDGE 0 2\n".as_bytes(), 5).is_err());
    }

    #[test]
    fn reach_is_transitive() {
        let mut gr = diamond();
        gr.compute_reach();
        assert!(gr.reachable(0, 2));
        assert!(gr.reachable(0, 4));
        assert!(!gr.reachable(4, 0));
        assert!(!gr.reachable(0, 8));
    }

    #[test]
    fn reach_big_stops_at_first_big_node() {
        let mut gr = diamond();
        gr.compute_reach_big(500);
        // From 0 both branches pass small nodes and stop at 4.
        let targets = gr.big_targets(0);
        assert!(targets.contains_key(&4));
        assert!(!targets.contains_key(&8));
        let witness = &targets[&4];
        assert!(witness == &vec![2] || witness == &vec![6]);
        // From the small node 2, node 4 is adjacent: empty witness.
        assert_eq!(gr.big_targets(2)[&4], Vec::<usize>::new());
    }

    #[test]
    fn reach_limit_respects_the_bound() {
        let mut gr = diamond();
        // Extension of node 2 is 50 - 46 = 4; of node 4, 900 - 46 = 854.
        gr.compute_reach_limit(10);
        assert!(gr.witness(0, 2).is_some());
        assert!(gr.witness(0, 4).is_none());
        gr.compute_reach_limit(2000);
        assert!(gr.witness(0, 4).is_some());
    }

    #[test]
    fn witness_updates_overwrite_in_place() {
        let mut gr = diamond();
        gr.compute_reach_big(500);
        let stored = gr.big_targets(0)[&4].clone();
        let other = if stored == vec![2] { vec![6] } else { vec![2] };
        gr.update_witness(0, 4, &other);
        assert_eq!(gr.big_targets(0)[&4], other);
        // Unknown pairs are not inserted.
        gr.update_witness(0, 8, &[2]);
        assert!(!gr.big_targets(0).contains_key(&8));
    }

    #[test]
    fn alternatives_enumerates_both_branches() {
        let gr = diamond();
        let alts = gr.alternative_witnesses(0, 4, 10_000);
        assert!(alts.contains(&vec![2]));
        assert!(alts.contains(&vec![6]));
    }
}
