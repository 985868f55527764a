//! Proposal operators over walk sets.
//!
//! Each move mutates a candidate copy of the walk set and reports whether it
//! produced a proposal; `false`/`None` means the draw was infeasible and the
//! driver retries without scoring. Runs are reproducible under a fixed seed,
//! so the number and order of RNG consumptions of every move is part of its
//! contract and is noted on each function.

use crate::graph::Graph;
use crate::prob::ProbCalculator;
use crate::read_set::LongRead;
use definitions::{canonical, twin, Step, Walk};
use rand::Rng;
use std::collections::BTreeMap;


/// The tagged move set; the driver selects a variant by cumulative weight
/// draw rather than positional fall-through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Move {
    Extend,
    Disconnect,
    Interchange,
    Local,
    Advice,
    FixLen,
}

/// Bookkeeping from a local change: the walk and the step positions of the
/// two fixed endpoints around the replaced interior. On acceptance the
/// driver rewrites the witness caches for this endpoint pair.
#[derive(Debug, Clone, Copy)]
pub struct LocalEdit {
    pub walk: usize,
    pub s: usize,
    pub t: usize,
}

/// Append a reachable big node (plus its witness) to a random walk end.
/// RNG: one walk draw, one end draw, one target draw.
pub fn extend_walks<R: Rng>(walks: &mut [Walk], gr: &Graph, rng: &mut R) -> bool {
    if walks.is_empty() {
        return false;
    }
    let p = rng.gen_range(0..walks.len());
    let at_tail = rng.gen_bool(0.5);
    let mut walk = match at_tail {
        true => walks[p].clone(),
        false => walks[p].reversed(),
    };
    let u = match walk.last_node() {
        Some(u) => u,
        None => return false,
    };
    let targets = gr.big_targets(u);
    if targets.is_empty() {
        return false;
    }
    let mut big: Vec<_> = targets.keys().copied().collect();
    big.sort_unstable();
    let v = big[rng.gen_range(0..big.len())];
    for &w in targets[&v].iter() {
        walk.push_node(w);
    }
    walk.push_node(v);
    walks[p] = match at_tail {
        true => walk,
        false => walk.reversed(),
    };
    true
}

/// Split a walk with at least two nodes at a random interior position.
/// The only move eligible for annealing acceptance.
/// RNG: one candidate draw, one split-position draw.
pub fn break_walk<R: Rng>(walks: &mut Vec<Walk>, rng: &mut R) -> bool {
    let candidates: Vec<usize> = walks
        .iter()
        .enumerate()
        .filter_map(|(i, w)| (w.node_count() >= 2).then_some(i))
        .collect();
    if candidates.is_empty() {
        return false;
    }
    let p = candidates[rng.gen_range(0..candidates.len())];
    let steps = &walks[p].steps;
    let cuts: Vec<usize> = (1..steps.len())
        .filter(|&i| steps[..i].iter().any(Step::is_node) && steps[i..].iter().any(Step::is_node))
        .collect();
    let cut = cuts[rng.gen_range(0..cuts.len())];
    let mut left = Walk::new(steps[..cut].to_vec());
    let mut right = Walk::new(steps[cut..].to_vec());
    left.trim_gaps();
    right.trim_gaps();
    walks[p] = left;
    walks.push(right);
    true
}

/// Nudge the length of a random gap marker.
/// RNG: one gap draw, then delta draws until nonzero.
pub fn fix_gap_length<R: Rng>(walks: &mut [Walk], rng: &mut R) -> bool {
    let gaps: Vec<(usize, usize)> = walks
        .iter()
        .enumerate()
        .flat_map(|(i, w)| {
            w.steps
                .iter()
                .enumerate()
                .filter(|(_, s)| !s.is_node())
                .map(move |(j, _)| (i, j))
        })
        .collect();
    if gaps.is_empty() {
        return false;
    }
    let (i, j) = gaps[rng.gen_range(0..gaps.len())];
    let delta = loop {
        let delta: i64 = rng.gen_range(-15..=15);
        if delta != 0 {
            break delta;
        }
    };
    if let Step::Gap(g) = walks[i].steps[j] {
        walks[i].steps[j] = Step::Gap((g as i64 + delta).max(1) as usize);
    }
    true
}

#[derive(Debug, Clone, Copy)]
struct Occurrence {
    walk: usize,
    pos: usize,
    node: usize,
}

/// Occurrences of big nodes across the walk set, keyed by canonical id, in
/// walk-then-position order.
fn big_occurrences(
    walks: &[Walk],
    gr: &Graph,
    threshold: usize,
) -> BTreeMap<usize, Vec<Occurrence>> {
    let mut occs: BTreeMap<usize, Vec<Occurrence>> = BTreeMap::new();
    for (i, walk) in walks.iter().enumerate() {
        for (j, step) in walk.steps.iter().enumerate() {
            if let Some(node) = step.as_node() {
                if gr.is_big(node, threshold) {
                    occs.entry(canonical(node)).or_default().push(Occurrence {
                        walk: i,
                        pos: j,
                        node,
                    });
                }
            }
        }
    }
    occs
}

/// Reconcile one duplicated big node: excise the enclosed loop when both
/// occurrences share a walk, otherwise merge the two walks around the node
/// or swap their suffixes.
/// RNG: one duplicate draw, two occurrence draws (second redrawn until it
/// differs), and for the cross-walk case one variant coin.
pub fn fix_some_big_reps<R: Rng>(
    walks: &mut Vec<Walk>,
    gr: &Graph,
    threshold: usize,
    rng: &mut R,
) -> bool {
    let occs = big_occurrences(walks, gr, threshold);
    let duplicated: Vec<Vec<Occurrence>> =
        occs.into_values().filter(|v| v.len() >= 2).collect();
    if duplicated.is_empty() {
        return false;
    }
    let occ = &duplicated[rng.gen_range(0..duplicated.len())];
    let i = rng.gen_range(0..occ.len());
    let j = loop {
        let j = rng.gen_range(0..occ.len());
        if j != i {
            break j;
        }
    };
    let (a, mut b) = (occ[i.min(j)], occ[i.max(j)]);
    if a.walk == b.walk {
        if a.node != b.node {
            // Opposite orientations inside one walk; no splice resolves it.
            return false;
        }
        let steps = &walks[a.walk].steps;
        let mut merged = steps[..=a.pos].to_vec();
        merged.extend_from_slice(&steps[b.pos + 1..]);
        walks[a.walk] = Walk::new(merged);
        walks[a.walk].trim_gaps();
        return true;
    }
    if a.node != b.node {
        let len = walks[b.walk].len();
        walks[b.walk] = walks[b.walk].reversed();
        b.pos = len - 1 - b.pos;
        b.node = twin(b.node);
    }
    let a_steps = walks[a.walk].steps.clone();
    let b_steps = walks[b.walk].steps.clone();
    let mut produced = vec![Walk::new(
        [&a_steps[..=a.pos], &b_steps[b.pos + 1..]].concat(),
    )];
    if rng.gen_bool(0.5) {
        produced.push(Walk::new(a_steps[a.pos + 1..].to_vec()));
        produced.push(Walk::new(b_steps[..b.pos].to_vec()));
    } else {
        produced.push(Walk::new(
            [&b_steps[..=b.pos], &a_steps[a.pos + 1..]].concat(),
        ));
    }
    let (wa, wb) = (a.walk, b.walk);
    let mut next: Vec<Walk> = walks
        .iter()
        .enumerate()
        .filter_map(|(idx, w)| (idx != wa && idx != wb).then(|| w.clone()))
        .collect();
    for mut walk in produced {
        walk.trim_gaps();
        if walk.node_count() > 0 {
            next.push(walk);
        }
    }
    *walks = next;
    true
}

/// Deterministic post-process sweep: resolve every duplicated big node by
/// keeping its first occurrence and splitting the walks of the others
/// around the removed copies. A well-formed walk set passes unchanged.
pub fn fix_big_reps(walks: &mut Vec<Walk>, gr: &Graph, threshold: usize) {
    loop {
        let occs = big_occurrences(walks, gr, threshold);
        let dup = occs.into_values().find(|v| v.len() >= 2);
        let second = match dup {
            Some(occ) => occ[1],
            None => break,
        };
        let steps = walks[second.walk].steps.clone();
        let mut left = Walk::new(steps[..second.pos].to_vec());
        let mut right = Walk::new(steps[second.pos + 1..].to_vec());
        left.trim_gaps();
        right.trim_gaps();
        walks.remove(second.walk);
        if left.node_count() > 0 {
            walks.push(left);
        }
        if right.node_count() > 0 {
            walks.push(right);
        }
    }
}

/// Replace the interior between two nodes of one walk with a different
/// witness drawn from the bounded path search.
/// RNG: one walk draw, two endpoint draws, one alternative draw.
pub fn local_change<R: Rng>(
    walks: &mut [Walk],
    gr: &Graph,
    limit: usize,
    rng: &mut R,
) -> Option<LocalEdit> {
    if walks.is_empty() {
        return None;
    }
    let p = rng.gen_range(0..walks.len());
    let node_positions: Vec<usize> = walks[p]
        .steps
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.is_node().then_some(i))
        .collect();
    if node_positions.len() < 2 {
        return None;
    }
    let a = rng.gen_range(0..node_positions.len() - 1);
    let b = rng.gen_range(a + 1..node_positions.len());
    let (s, t) = (node_positions[a], node_positions[b]);
    let u = walks[p].steps[s].as_node()?;
    let v = walks[p].steps[t].as_node()?;
    // Only endpoint pairs whose target is a recorded big-contig destination
    // of `u` are eligible.
    gr.big_targets(u).get(&v)?;
    let current = &walks[p].steps[s + 1..t];
    let alternatives: Vec<Vec<usize>> = gr
        .alternative_witnesses(u, v, limit)
        .into_iter()
        .filter(|path| {
            path.len() != current.len()
                || path
                    .iter()
                    .zip(current.iter())
                    .any(|(&n, step)| step.as_node() != Some(n))
        })
        .collect();
    if alternatives.is_empty() {
        return None;
    }
    let pick = &alternatives[rng.gen_range(0..alternatives.len())];
    let mut steps = walks[p].steps[..=s].to_vec();
    steps.extend(pick.iter().map(|&n| Step::Node(n)));
    let t_new = steps.len();
    steps.extend_from_slice(&walks[p].steps[t..]);
    walks[p] = Walk::new(steps);
    Some(LocalEdit {
        walk: p,
        s,
        t: t_new,
    })
}

/// Join two walks (or bridge a gap inside one) guided by a read from an
/// advice library.
/// RNG: one category draw over long-then-paired advice sets, one set draw,
/// one read draw. The edit derived from the chosen read is deterministic.
pub fn extend_by_advice<R: Rng>(
    walks: &mut Vec<Walk>,
    gr: &Graph,
    calc: &ProbCalculator,
    advice_pacbio: &[usize],
    advice_paired: &[usize],
    rng: &mut R,
) -> bool {
    let total = advice_pacbio.len() + advice_paired.len();
    if total == 0 {
        return false;
    }
    let category = rng.gen_range(0..total);
    if category < advice_pacbio.len() {
        let set = &calc.pacbio[advice_pacbio[rng.gen_range(0..advice_pacbio.len())]].set;
        if set.num_reads() == 0 {
            return false;
        }
        let read = set.read(rng.gen_range(0..set.num_reads()));
        join_by_long_read(walks, gr, read)
    } else {
        let lib = &calc.paired[advice_paired[rng.gen_range(0..advice_paired.len())]];
        let pairs = lib.first.num_reads().min(lib.second.num_reads());
        if pairs == 0 {
            return false;
        }
        let idx = rng.gen_range(0..pairs);
        join_by_pair(walks, gr, lib, idx)
    }
}

/// Find `node` in the walk set in the requested orientation, reversing the
/// hosting walk when it carries the twin. Returns (walk, step position).
fn locate_oriented(walks: &mut [Walk], node: usize) -> Option<(usize, usize)> {
    for (i, walk) in walks.iter().enumerate() {
        if let Some(pos) = walk.steps.iter().position(|s| s.as_node() == Some(node)) {
            return Some((i, pos));
        }
    }
    for i in 0..walks.len() {
        if walks[i].steps.iter().any(|s| s.as_node() == Some(twin(node))) {
            walks[i] = walks[i].reversed();
            let pos = walks[i]
                .steps
                .iter()
                .position(|s| s.as_node() == Some(node))?;
            return Some((i, pos));
        }
    }
    None
}

/// Realized length of `walk.steps[..idx]`, honoring (k-1)-base overlaps.
fn prefix_len(walk: &Walk, gr: &Graph, idx: usize) -> usize {
    let mut pos = 0usize;
    let mut after_node = false;
    for step in walk.steps[..idx].iter() {
        match *step {
            Step::Node(n) => {
                pos = match after_node {
                    true => pos.saturating_sub(gr.kmer() - 1) + gr.node_len(n),
                    false => pos + gr.node_len(n),
                };
                after_node = true;
            }
            Step::Gap(g) => {
                pos += g;
                after_node = false;
            }
        }
    }
    pos
}

fn splice_walks(
    walks: &mut Vec<Walk>,
    (wa, pos_u): (usize, usize),
    (wb, pos_v): (usize, usize),
    bridge: Vec<Step>,
) {
    let a_steps = walks[wa].steps.clone();
    let b_steps = walks[wb].steps.clone();
    let mut produced = vec![];
    let mut joined = a_steps[..=pos_u].to_vec();
    joined.extend(bridge);
    joined.extend_from_slice(&b_steps[pos_v..]);
    produced.push(Walk::new(joined));
    produced.push(Walk::new(a_steps[pos_u + 1..].to_vec()));
    produced.push(Walk::new(b_steps[..pos_v].to_vec()));
    let mut next: Vec<Walk> = walks
        .iter()
        .enumerate()
        .filter_map(|(idx, w)| (idx != wa && idx != wb).then(|| w.clone()))
        .collect();
    for mut walk in produced {
        walk.trim_gaps();
        if walk.node_count() > 0 {
            next.push(walk);
        }
    }
    *walks = next;
}

fn join_by_long_read(walks: &mut Vec<Walk>, gr: &Graph, read: &LongRead) -> bool {
    for pair in read.anchors.windows(2) {
        let (ua, va) = (pair[0], pair[1]);
        let (wu, pos_u) = match locate_oriented(walks, ua.node) {
            Some(loc) => loc,
            None => continue,
        };
        let (wv, pos_v) = match locate_oriented(walks, va.node) {
            Some(loc) => loc,
            None => continue,
        };
        if wu == wv {
            // Same walk: usable only to bridge a recorded gap between the
            // two anchors with a concrete witness. Locating the second
            // anchor may have reversed the walk, so refresh the first
            // anchor's position.
            let pos_u = match walks[wu]
                .steps
                .iter()
                .position(|s| s.as_node().map_or(false, |n| canonical(n) == canonical(ua.node)))
            {
                Some(pos) => pos,
                None => continue,
            };
            let (s, t) = (pos_u.min(pos_v), pos_u.max(pos_v));
            let spans_gap = walks[wu].steps[s..t].iter().any(|x| !x.is_node());
            let (u, v) = match (walks[wu].steps[s].as_node(), walks[wu].steps[t].as_node()) {
                (Some(u), Some(v)) => (u, v),
                _ => continue,
            };
            let witness = match (spans_gap, gr.witness(u, v)) {
                (true, Some(witness)) => witness.to_vec(),
                _ => continue,
            };
            let mut steps = walks[wu].steps[..=s].to_vec();
            steps.extend(witness.iter().map(|&n| Step::Node(n)));
            steps.extend_from_slice(&walks[wu].steps[t..]);
            walks[wu] = Walk::new(steps);
            return true;
        }
        // Orienting the second walk may have flipped the first one; the
        // anchor pair is unusable in that case.
        if walks[wu].steps[pos_u].as_node() != Some(ua.node) {
            continue;
        }
        let bridge = match gr.witness(ua.node, va.node) {
            Some(witness) => witness.iter().map(|&n| Step::Node(n)).collect(),
            None => {
                let read_gap = va.read_offset.saturating_sub(ua.read_offset + ua.len);
                let tail_u = gr.node_len(ua.node) - (ua.node_offset + ua.len);
                let head_v = va.node_offset;
                let gap = read_gap.saturating_sub(tail_u + head_v).max(1);
                vec![Step::Gap(gap)]
            }
        };
        splice_walks(walks, (wu, pos_u), (wv, pos_v), bridge);
        return true;
    }
    false
}

fn join_by_pair(
    walks: &mut Vec<Walk>,
    gr: &Graph,
    lib: &crate::prob::PairedLib,
    idx: usize,
) -> bool {
    let (r1, r2) = (lib.first.read(idx), lib.second.read(idx));
    let (p1, p2) = match (r1.placements.first(), r2.placements.first()) {
        (Some(p1), Some(p2)) => (*p1, *p2),
        _ => return false,
    };
    let (wu, pos_u) = match locate_oriented(walks, p1.node) {
        Some(loc) => loc,
        None => return false,
    };
    // The mate aligns to the opposite strand, so downstream of the join it
    // must appear as the twin of its recorded node.
    let (wv, pos_v) = match locate_oriented(walks, twin(p2.node)) {
        Some(loc) => loc,
        None => return false,
    };
    if wu == wv || walks[wu].steps[pos_u].as_node() != Some(p1.node) {
        return false;
    }
    let bridge = match gr.witness(p1.node, twin(p2.node)) {
        Some(witness) => witness.iter().map(|&n| Step::Node(n)).collect(),
        None => {
            let tail = prefix_len(&walks[wu], gr, walks[wu].len())
                .saturating_sub(prefix_len(&walks[wu], gr, pos_u) + p1.offset);
            let head = prefix_len(&walks[wv], gr, pos_v)
                + (gr.node_len(p2.node).saturating_sub(p2.offset));
            let gap = (lib.insert_mean as i64 - tail as i64 - head as i64).max(1) as usize;
            vec![Step::Gap(gap)]
        }
    };
    splice_walks(walks, (wu, pos_u), (wv, pos_v), bridge);
    true
}
