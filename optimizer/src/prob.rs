//! Scoring a walk set against the read libraries.
//!
//! Placements from the alignment caches are *realized* on the current walks
//! through consensus coordinates derived from node lengths; no sequence
//! comparison happens here. The calculator is deterministic for fixed
//! inputs: reads are scored through an ordered parallel map and summed
//! sequentially.

use crate::config::LibrarySettings;
use crate::graph::Graph;
use crate::misc::{ln_normal_pdf, logsumexp};
use crate::read_set::{LongRead, PacbioReadSet, ReadSet, ShortRead};
use definitions::{twin, Step, Walk};
use rayon::prelude::*;
use std::collections::HashMap;

/// Consensus coordinates of one walk: the realized length, the start of
/// every node occurrence, and the gap intervals.
#[derive(Debug, Clone, Default)]
pub struct WalkLayout {
    pub len: usize,
    starts: HashMap<usize, Vec<usize>>,
    gaps: Vec<(usize, usize)>,
}

impl WalkLayout {
    pub fn new(walk: &Walk, gr: &Graph) -> Self {
        let k = gr.kmer();
        let mut starts: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut gaps = vec![];
        let mut pos = 0usize;
        let mut after_node = false;
        for step in walk.steps.iter() {
            match *step {
                Step::Node(n) => {
                    let start = match after_node {
                        true => pos.saturating_sub(k - 1),
                        false => pos,
                    };
                    starts.entry(n).or_default().push(start);
                    pos = start + gr.node_len(n);
                    after_node = true;
                }
                Step::Gap(g) => {
                    gaps.push((pos, pos + g));
                    pos += g;
                    after_node = false;
                }
            }
        }
        Self {
            len: pos,
            starts,
            gaps,
        }
    }

    fn starts(&self, node: usize) -> &[usize] {
        self.starts.get(&node).map_or(&[], |v| v.as_slice())
    }

    /// Whether the interval `[pos, pos + len)` lies inside the consensus
    /// without touching a run of ambiguous bases.
    fn fits(&self, pos: i64, len: usize) -> bool {
        if pos < 0 || pos as usize + len > self.len {
            return false;
        }
        let (start, end) = (pos as usize, pos as usize + len);
        self.gaps.iter().all(|&(gs, ge)| end <= gs || ge <= start)
    }
}

/// Consensus positions where a placement of a read of length `read_len` on
/// `node` at `offset` is realized, in either orientation.
fn realized_positions(
    layouts: &[WalkLayout],
    gr: &Graph,
    node: usize,
    offset: usize,
    read_len: usize,
) -> Vec<(usize, usize)> {
    let mut positions = vec![];
    for (walk, layout) in layouts.iter().enumerate() {
        for &s in layout.starts(node) {
            let pos = s as i64 + offset as i64;
            if layout.fits(pos, read_len) {
                positions.push((walk, pos as usize));
            }
        }
        for &s in layout.starts(twin(node)) {
            let pos = s as i64 + gr.node_len(node) as i64 - offset as i64 - read_len as i64;
            if layout.fits(pos, read_len) {
                positions.push((walk, pos as usize));
            }
        }
    }
    positions
}

#[derive(Debug, Clone)]
pub struct SingleLib {
    pub settings: LibrarySettings,
    pub set: ReadSet,
}

#[derive(Debug, Clone)]
pub struct PairedLib {
    pub settings: LibrarySettings,
    pub insert_mean: f64,
    pub insert_std: f64,
    pub first: ReadSet,
    pub second: ReadSet,
}

#[derive(Debug, Clone)]
pub struct PacbioLib {
    pub settings: LibrarySettings,
    pub set: PacbioReadSet,
}

#[derive(Debug, Clone, Default)]
pub struct ProbResult {
    pub log_prob: f64,
    pub total_len: usize,
    /// `(library, read)` pairs scoring below `min_prob_start`. Diagnostic
    /// only; the acceptance rule never reads this.
    pub low_prob_reads: Vec<(usize, usize)>,
}

/// Aggregates the per-library log-likelihoods of a walk set into the single
/// scalar the search driver optimizes.
#[derive(Debug, Default)]
pub struct ProbCalculator {
    pub single: Vec<SingleLib>,
    pub paired: Vec<PairedLib>,
    pub pacbio: Vec<PacbioLib>,
}

impl ProbCalculator {
    pub fn new(single: Vec<SingleLib>, paired: Vec<PairedLib>, pacbio: Vec<PacbioLib>) -> Self {
        Self {
            single,
            paired,
            pacbio,
        }
    }

    /// The longest read over all libraries; paired libraries count as at
    /// least their insert mean. Bounds the `reach_limit` index.
    pub fn longest_read(&self) -> usize {
        let single = self.single.iter().map(|l| l.set.max_read_len());
        let pacbio = self.pacbio.iter().map(|l| l.set.max_read_len());
        let paired = self.paired.iter().map(|l| {
            l.first
                .max_read_len()
                .max(l.second.max_read_len())
                .max(l.insert_mean as usize)
        });
        single.chain(pacbio).chain(paired).max().unwrap_or(0)
    }

    pub fn calc_prob(&self, walks: &[Walk], gr: &Graph) -> ProbResult {
        let layouts: Vec<_> = walks.iter().map(|w| WalkLayout::new(w, gr)).collect();
        let total_len = layouts.iter().map(|l| l.len).sum();
        let walk_penalty = walks.len().saturating_sub(1) as f64;
        let mut result = ProbResult {
            total_len,
            ..Default::default()
        };
        let mut lib = 0;
        for SingleLib { settings, set } in self.single.iter() {
            let lks: Vec<f64> = set
                .reads()
                .par_iter()
                .map(|read| single_read_logprob(read, &layouts, gr, set, settings))
                .collect();
            accumulate(&mut result, lib, settings, walk_penalty, &lks);
            lib += 1;
        }
        for paired in self.paired.iter() {
            let settings = &paired.settings;
            let pairs = paired.first.num_reads().min(paired.second.num_reads());
            let lks: Vec<f64> = (0..pairs)
                .into_par_iter()
                .map(|idx| pair_logprob(paired, idx, &layouts, gr))
                .collect();
            accumulate(&mut result, lib, settings, walk_penalty, &lks);
            lib += 1;
        }
        for PacbioLib { settings, set } in self.pacbio.iter() {
            let lks: Vec<f64> = set
                .reads()
                .par_iter()
                .map(|read| long_read_logprob(read, &layouts, gr, set, settings))
                .collect();
            accumulate(&mut result, lib, settings, walk_penalty, &lks);
            lib += 1;
        }
        result
    }
}

fn accumulate(
    result: &mut ProbResult,
    lib: usize,
    settings: &LibrarySettings,
    walk_penalty: f64,
    lks: &[f64],
) {
    for (read, &lk) in lks.iter().enumerate() {
        if lk < settings.min_prob_start {
            result.low_prob_reads.push((lib, read));
        }
    }
    let sum: f64 = lks.iter().sum();
    let penalty = settings.penalty_constant + settings.penalty_step * walk_penalty;
    result.log_prob += settings.weight * (sum - penalty);
}

fn single_read_logprob(
    read: &ShortRead,
    layouts: &[WalkLayout],
    gr: &Graph,
    set: &ReadSet,
    settings: &LibrarySettings,
) -> f64 {
    let (lm, lmm) = (set.match_prob.ln(), set.mismatch_prob.ln());
    let mut terms = vec![];
    for p in read.placements.iter() {
        let mm = (p.mismatches as usize).min(read.len);
        let lk = (read.len - mm) as f64 * lm + mm as f64 * lmm;
        let hits = realized_positions(layouts, gr, p.node, p.offset, read.len).len();
        terms.extend(std::iter::repeat(lk).take(hits));
    }
    let lk = logsumexp(&terms);
    lk.max(settings.min_prob_per_base * read.len as f64)
}

fn pair_logprob(lib: &PairedLib, idx: usize, layouts: &[WalkLayout], gr: &Graph) -> f64 {
    let (r1, r2) = (lib.first.read(idx), lib.second.read(idx));
    let (lm, lmm) = (lib.first.match_prob.ln(), lib.first.mismatch_prob.ln());
    let placed = |read: &ShortRead| -> Vec<(usize, usize, f64)> {
        let mut placed = vec![];
        for p in read.placements.iter() {
            let mm = (p.mismatches as usize).min(read.len);
            let lk = (read.len - mm) as f64 * lm + mm as f64 * lmm;
            for (walk, pos) in realized_positions(layouts, gr, p.node, p.offset, read.len) {
                placed.push((walk, pos, lk));
            }
        }
        placed
    };
    let (placed1, placed2) = (placed(r1), placed(r2));
    let mut terms = vec![];
    for &(w1, p1, lk1) in placed1.iter() {
        for &(w2, p2, lk2) in placed2.iter() {
            if w1 != w2 {
                continue;
            }
            let start = p1.min(p2);
            let end = (p1 + r1.len).max(p2 + r2.len);
            let span = (end - start) as f64;
            terms.push(lk1 + lk2 + ln_normal_pdf(span, lib.insert_mean, lib.insert_std));
        }
    }
    let lk = logsumexp(&terms);
    lk.max(lib.settings.min_prob_per_base * (r1.len + r2.len) as f64)
}

fn long_read_logprob(
    read: &LongRead,
    layouts: &[WalkLayout],
    gr: &Graph,
    set: &PacbioReadSet,
    settings: &LibrarySettings,
) -> f64 {
    let (lm, lmm) = (set.match_prob.ln(), set.mismatch_prob.ln());
    let mut best_matched = 0usize;
    for layout in layouts.iter() {
        for forward in [true, false] {
            // (read_offset, walk position, matched bases) of every anchor
            // realized on this walk in this orientation.
            let mut realized: Vec<(usize, usize, usize)> = vec![];
            for a in read.anchors.iter() {
                let matched = a.len.saturating_sub(a.mismatches as usize);
                let (node, read_off) = match forward {
                    true => (a.node, a.read_offset),
                    false => (twin(a.node), read.len.saturating_sub(a.read_offset + a.len)),
                };
                let node_off = match forward {
                    true => a.node_offset as i64,
                    false => gr.node_len(a.node) as i64 - a.node_offset as i64 - a.len as i64,
                };
                for &s in layout.starts(node) {
                    let pos = s as i64 + node_off;
                    if layout.fits(pos, a.len) {
                        realized.push((read_off, pos as usize, matched));
                    }
                }
            }
            realized.sort_unstable();
            best_matched = best_matched.max(best_chain(&realized));
        }
    }
    let matched = best_matched.min(read.len);
    let lk = matched as f64 * lm + (read.len - matched) as f64 * lmm;
    lk.max(settings.min_prob_per_base * read.len as f64)
}

/// Heaviest chain of anchors consistent in read order and walk order.
fn best_chain(anchors: &[(usize, usize, usize)]) -> usize {
    let mut best = vec![0usize; anchors.len()];
    for i in 0..anchors.len() {
        best[i] = anchors[i].2;
        for j in 0..i {
            if anchors[j].0 < anchors[i].0 && anchors[j].1 < anchors[i].1 {
                best[i] = best[i].max(best[j] + anchors[i].2);
            }
        }
    }
    best.into_iter().max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_set::{parse_anchor_cache, parse_short_cache};

    fn settings() -> LibrarySettings {
        LibrarySettings {
            penalty_constant: 0.0,
            penalty_step: 50.0,
            min_prob_per_base: -0.7,
            min_prob_start: -10.0,
            weight: 1.0,
            advice: false,
        }
    }

    fn two_node_graph() -> Graph {
        let seqs = vec![vec![b'A'; 1000], vec![b'C'; 1000]];
        Graph::from_seqs(&seqs, &[(0, 2)], 47)
    }

    fn single_lib(cache: &str) -> SingleLib {
        let mut set = ReadSet::new("t", "t.fastq", 0.96, 0.01);
        set.set_reads_for_test(parse_short_cache(cache.as_bytes()).unwrap());
        set.preprocess_reads();
        SingleLib {
            settings: settings(),
            set,
        }
    }

    #[test]
    fn layout_handles_overlaps_and_gaps() {
        let gr = two_node_graph();
        let walk = Walk::new(vec![Step::Node(0), Step::Node(2)]);
        let layout = WalkLayout::new(&walk, &gr);
        assert_eq!(layout.len, 1000 + 1000 - 46);
        assert_eq!(layout.starts(2), &[954]);
        let gapped = Walk::new(vec![Step::Node(0), Step::Gap(50), Step::Node(2)]);
        let layout = WalkLayout::new(&gapped, &gr);
        assert_eq!(layout.len, 2050);
        assert_eq!(layout.starts(2), &[1050]);
        assert!(!layout.fits(990, 100));
        assert!(layout.fits(0, 100));
    }

    #[test]
    fn junction_read_rewards_the_joined_walk() {
        let gr = two_node_graph();
        // One 100-base read placed 950 bases into node 0, crossing into 2.
        let lib = single_lib("0 100 0 950 0\n");
        let calc = ProbCalculator::new(vec![lib], vec![], vec![]);
        let split = vec![Walk::singleton(0), Walk::singleton(2)];
        let joined = vec![Walk::new(vec![Step::Node(0), Step::Node(2)])];
        let split_prob = calc.calc_prob(&split, &gr);
        let joined_prob = calc.calc_prob(&joined, &gr);
        assert!(joined_prob.log_prob > split_prob.log_prob);
        // Unrealized on the split walks: floored and reported.
        assert_eq!(split_prob.low_prob_reads, vec![(0, 0)]);
        assert!(joined_prob.low_prob_reads.is_empty());
        assert_eq!(joined_prob.total_len, 1954);
    }

    #[test]
    fn twin_orientation_placements_are_realized() {
        let gr = two_node_graph();
        let lib = single_lib("0 100 1 20 0\n");
        let calc = ProbCalculator::new(vec![lib], vec![], vec![]);
        // Walk through node 0 realizes a placement recorded on its twin.
        let walks = vec![Walk::singleton(0)];
        let res = calc.calc_prob(&walks, &gr);
        assert!(res.low_prob_reads.is_empty());
    }

    #[test]
    fn fragmentation_penalty_scales_with_walks() {
        let gr = two_node_graph();
        let lib = single_lib("");
        let calc = ProbCalculator::new(vec![lib], vec![], vec![]);
        let one = calc.calc_prob(&[Walk::singleton(0)], &gr);
        let two = calc.calc_prob(&[Walk::singleton(0), Walk::singleton(2)], &gr);
        assert!((one.log_prob - 0.0).abs() < 1e-12);
        assert!((two.log_prob + 50.0).abs() < 1e-12);
    }

    #[test]
    fn paired_insert_prefers_the_right_gap() {
        let gr = two_node_graph();
        let mut first = ReadSet::new("p1", "p1.fastq", 0.96, 0.01);
        first.set_reads_for_test(parse_short_cache("0 50 0 900 0\n".as_bytes()).unwrap());
        let mut second = ReadSet::new("p2", "p2.fastq", 0.96, 0.01);
        // Mate recorded on the twin of node 2, so it faces back on the walk.
        second.set_reads_for_test(parse_short_cache("0 50 3 900 0\n".as_bytes()).unwrap());
        let lib = PairedLib {
            settings: settings(),
            insert_mean: 200.0,
            insert_std: 10.0,
            first,
            second,
        };
        let calc = ProbCalculator::new(vec![], vec![lib], vec![]);
        let score_with_gap = |g: usize| {
            let walk = vec![Walk::new(vec![Step::Node(0), Step::Gap(g), Step::Node(2)])];
            calc.calc_prob(&walk, &gr).log_prob
        };
        // The realized span between the two ends is 200 + g, so the
        // mean-200 insert density favors the small gap.
        let near = score_with_gap(1);
        let far = score_with_gap(300);
        assert!(near > far, "{} vs {}", near, far);
    }

    #[test]
    fn long_reads_chain_anchors_in_order() {
        let gr = two_node_graph();
        let mut set = PacbioReadSet::new("pb", "pb.fastq", 0.85, 0.0375);
        let cache = "0 1600 0 0 100 800 40\n0 1600 2 800 100 800 40\n";
        set.set_reads_for_test(parse_anchor_cache(cache.as_bytes()).unwrap());
        set.compute_anchors(&gr);
        let lib = PacbioLib {
            settings: settings(),
            set,
        };
        let calc = ProbCalculator::new(vec![], vec![], vec![lib]);
        let split = calc.calc_prob(&[Walk::singleton(0), Walk::singleton(2)], &gr);
        let joined = calc.calc_prob(&[Walk::new(vec![Step::Node(0), Step::Node(2)])], &gr);
        // Split walks realize one anchor each scoring pass; the joined walk
        // chains both.
        assert!(joined.log_prob > split.log_prob);
    }
}
