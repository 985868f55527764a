//! Read libraries over cached alignment tables.
//!
//! Aligning reads is a collaborator's job: wrappers around the external
//! aligners (see `bowtie_path` / `blasr_path` in the config) materialize
//! per-read candidate placements against graph nodes into TSV caches. The
//! types here load those caches, index them, and hand placements to the
//! probability calculator and the advice-guided moves.

use crate::graph::Graph;
use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

/// A candidate placement of a short read: the read aligns starting at
/// `offset` bases into node `node`, with the recorded number of mismatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Placement {
    pub node: usize,
    pub offset: usize,
    pub mismatches: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ShortRead {
    pub len: usize,
    pub placements: Vec<Placement>,
}

/// An unpaired short-read library. Paired libraries are two of these plus
/// an insert-size distribution.
#[derive(Debug, Clone)]
pub struct ReadSet {
    name: String,
    cache_path: PathBuf,
    pub match_prob: f64,
    pub mismatch_prob: f64,
    reads: Vec<ShortRead>,
    by_node: HashMap<usize, Vec<usize>>,
}

/// Cache record: `read_id  read_len  node  offset  mismatches`.
pub fn parse_short_cache<R: BufRead>(reader: R) -> std::io::Result<Vec<ShortRead>> {
    let bad = |msg: String| std::io::Error::new(std::io::ErrorKind::InvalidData, msg);
    let mut by_id: BTreeMap<u64, ShortRead> = BTreeMap::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let mut next = || {
            fields
                .next()
                .and_then(|f| f.parse::<u64>().ok())
                .ok_or_else(|| bad(format!("bad alignment record at line {}", lineno + 1)))
        };
        let (id, len) = (next()?, next()? as usize);
        let placement = Placement {
            node: next()? as usize,
            offset: next()? as usize,
            mismatches: next()? as u32,
        };
        let read = by_id.entry(id).or_default();
        read.len = len;
        read.placements.push(placement);
    }
    Ok(by_id.into_values().collect())
}

impl ReadSet {
    pub fn new(cache_prefix: &str, filename: &str, match_prob: f64, mismatch_prob: f64) -> Self {
        debug!("READSET\t{}\t{}", cache_prefix, filename);
        Self {
            name: cache_prefix.to_string(),
            cache_path: PathBuf::from(format!("{}.aln", cache_prefix)),
            match_prob,
            mismatch_prob,
            reads: vec![],
            by_node: HashMap::new(),
        }
    }

    pub fn load_alignments(&mut self) -> std::io::Result<()> {
        let reader = std::fs::File::open(&self.cache_path).map(BufReader::new)?;
        self.reads = parse_short_cache(reader)?;
        let placements: usize = self.reads.iter().map(|r| r.placements.len()).sum();
        debug!("READSET\t{}\t{} reads\t{} placements", self.name, self.reads.len(), placements);
        Ok(())
    }

    /// Sort and deduplicate each read's placements. Scoring iterates these
    /// slices, so the order fixed here is part of the deterministic trace.
    pub fn preprocess_reads(&mut self) {
        for read in self.reads.iter_mut() {
            read.placements.sort_unstable();
            read.placements.dedup();
        }
    }

    /// Node -> reads-with-a-placement-there, for the advice moves.
    pub fn prepare_read_index(&mut self) {
        let mut by_node: HashMap<usize, Vec<usize>> = HashMap::new();
        for (idx, read) in self.reads.iter().enumerate() {
            for placement in read.placements.iter() {
                let entry = by_node.entry(placement.node).or_default();
                if entry.last() != Some(&idx) {
                    entry.push(idx);
                }
            }
        }
        self.by_node = by_node;
    }

    pub fn num_reads(&self) -> usize {
        self.reads.len()
    }
    pub fn read(&self, idx: usize) -> &ShortRead {
        &self.reads[idx]
    }
    pub fn reads(&self) -> &[ShortRead] {
        &self.reads
    }
    pub fn reads_on_node(&self, node: usize) -> &[usize] {
        self.by_node.get(&node).map_or(&[], |v| v.as_slice())
    }
    pub fn max_read_len(&self) -> usize {
        self.reads.iter().map(|r| r.len).max().unwrap_or(0)
    }
    #[cfg(test)]
    pub fn set_reads_for_test(&mut self, reads: Vec<ShortRead>) {
        self.reads = reads;
    }
}

/// One aligner anchor of a long read: `len` bases starting `read_offset`
/// into the read match node `node` starting at `node_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Anchor {
    pub read_offset: usize,
    pub node: usize,
    pub node_offset: usize,
    pub len: usize,
    pub mismatches: u32,
}

#[derive(Debug, Clone, Default)]
pub struct LongRead {
    pub len: usize,
    pub anchors: Vec<Anchor>,
}

/// A noisy long-read library with anchor-based alignments.
#[derive(Debug, Clone)]
pub struct PacbioReadSet {
    name: String,
    cache_path: PathBuf,
    pub match_prob: f64,
    pub mismatch_prob: f64,
    reads: Vec<LongRead>,
    by_node: HashMap<usize, Vec<usize>>,
}

/// Cache record: `read_id  read_len  node  read_offset  node_offset  len  mismatches`.
pub fn parse_anchor_cache<R: BufRead>(reader: R) -> std::io::Result<Vec<LongRead>> {
    let bad = |msg: String| std::io::Error::new(std::io::ErrorKind::InvalidData, msg);
    let mut by_id: BTreeMap<u64, LongRead> = BTreeMap::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let mut next = || {
            fields
                .next()
                .and_then(|f| f.parse::<u64>().ok())
                .ok_or_else(|| bad(format!("bad anchor record at line {}", lineno + 1)))
        };
        let (id, len) = (next()?, next()? as usize);
        let anchor = Anchor {
            node: next()? as usize,
            read_offset: next()? as usize,
            node_offset: next()? as usize,
            len: next()? as usize,
            mismatches: next()? as u32,
        };
        let read = by_id.entry(id).or_default();
        read.len = len;
        read.anchors.push(anchor);
    }
    Ok(by_id.into_values().collect())
}

impl PacbioReadSet {
    pub fn new(cache_prefix: &str, filename: &str, match_prob: f64, mismatch_prob: f64) -> Self {
        debug!("READSET\t{}\t{}", cache_prefix, filename);
        Self {
            name: cache_prefix.to_string(),
            cache_path: PathBuf::from(format!("{}.anchors", cache_prefix)),
            match_prob,
            mismatch_prob,
            reads: vec![],
            by_node: HashMap::new(),
        }
    }

    pub fn load_alignments(&mut self) -> std::io::Result<()> {
        let reader = std::fs::File::open(&self.cache_path).map(BufReader::new)?;
        self.reads = parse_anchor_cache(reader)?;
        let anchors: usize = self.reads.iter().map(|r| r.anchors.len()).sum();
        debug!("READSET\t{}\t{} reads\t{} anchors", self.name, self.reads.len(), anchors);
        Ok(())
    }

    pub fn preprocess_reads(&mut self) {
        for read in self.reads.iter_mut() {
            read.anchors.sort_unstable();
            read.anchors.dedup();
        }
    }

    /// Drop cache records that do not fit the loaded graph: unknown nodes,
    /// or anchors running off a node or off the read.
    pub fn normalize_cache(&mut self, graph: &Graph) {
        let mut dropped = 0usize;
        for read in self.reads.iter_mut() {
            let len = read.len;
            let before = read.anchors.len();
            read.anchors.retain(|a| {
                a.node < graph.node_count()
                    && a.node_offset + a.len <= graph.node_len(a.node)
                    && a.read_offset + a.len <= len
            });
            dropped += before - read.anchors.len();
        }
        if dropped > 0 {
            debug!("READSET\t{}\tdropped {} anchors", self.name, dropped);
        }
    }

    /// Order each read's anchors along the read and index them by node.
    pub fn compute_anchors(&mut self, _graph: &Graph) {
        let mut by_node: HashMap<usize, Vec<usize>> = HashMap::new();
        for (idx, read) in self.reads.iter_mut().enumerate() {
            read.anchors.sort_by_key(|a| (a.read_offset, a.node, a.node_offset));
            for anchor in read.anchors.iter() {
                let entry = by_node.entry(anchor.node).or_default();
                if entry.last() != Some(&idx) {
                    entry.push(idx);
                }
            }
        }
        self.by_node = by_node;
    }

    pub fn num_reads(&self) -> usize {
        self.reads.len()
    }
    pub fn read(&self, idx: usize) -> &LongRead {
        &self.reads[idx]
    }
    pub fn reads(&self) -> &[LongRead] {
        &self.reads
    }
    pub fn reads_on_node(&self, node: usize) -> &[usize] {
        self.by_node.get(&node).map_or(&[], |v| v.as_slice())
    }
    pub fn max_read_len(&self) -> usize {
        self.reads.iter().map(|r| r.len).max().unwrap_or(0)
    }
    #[cfg(test)]
    pub fn set_reads_for_test(&mut self, reads: Vec<LongRead>) {
        self.reads = reads;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_cache_groups_by_read() {
        let cache = "0 100 2 10 1\n1 90 4 0 0\n0 100 6 55 2\n";
        let reads = parse_short_cache(cache.as_bytes()).unwrap();
        assert_eq!(reads.len(), 2);
        assert_eq!(reads[0].len, 100);
        assert_eq!(reads[0].placements.len(), 2);
        assert_eq!(reads[1].placements[0].node, 4);
        assert!(parse_short_cache("0 100 2\n".as_bytes()).is_err());
    }

    #[test]
    fn anchor_cache_and_normalization() {
        let seqs = vec![vec![b'A'; 100], vec![b'C'; 200]];
        let graph = Graph::from_seqs(&seqs, &[(0, 2)], 47);
        let cache = "\
7 1000 0 0 0 50 1
7 1000 2 60 150 80 2
7 1000 9 0 0 10 0
";
        let mut set = PacbioReadSet::new("x", "x.fastq", 0.96, 0.01);
        set.reads = parse_anchor_cache(cache.as_bytes()).unwrap();
        assert_eq!(set.num_reads(), 1);
        assert_eq!(set.read(0).anchors.len(), 3);
        set.normalize_cache(&graph);
        // The anchor on node 2 runs past the node end (150 + 80 > 200) and
        // node 9 does not exist.
        assert_eq!(set.read(0).anchors.len(), 1);
        set.compute_anchors(&graph);
        assert_eq!(set.reads_on_node(0), &[0]);
        assert!(set.reads_on_node(2).is_empty());
    }

    #[test]
    fn read_index_lists_each_read_once() {
        let cache = "0 100 2 10 1\n0 100 2 20 0\n1 90 2 5 0\n";
        let mut set = ReadSet::new("y", "y.fastq", 0.96, 0.01);
        set.reads = parse_short_cache(cache.as_bytes()).unwrap();
        set.preprocess_reads();
        set.prepare_read_index();
        assert_eq!(set.reads_on_node(2), &[0, 1]);
        assert_eq!(set.max_read_len(), 100);
    }
}
