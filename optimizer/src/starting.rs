//! Importing a starting walk set.
//!
//! The seed-and-chain import of a prior assembly lives in a separate tool;
//! what arrives here is its output contract: a text file with one walk per
//! line, whitespace-separated signed integers, negative values encoding gap
//! lengths. After loading, walks are clipped to their big-node span and the
//! uncovered big nodes are backfilled as singletons.

use crate::graph::Graph;
use crate::optimize::add_missing_big_nodes;
use definitions::Walk;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub fn load_starting_walks<P: AsRef<Path>>(path: P) -> std::io::Result<Vec<Walk>> {
    let reader = std::fs::File::open(path).map(BufReader::new)?;
    parse_walks(reader)
}

pub fn parse_walks<R: BufRead>(reader: R) -> std::io::Result<Vec<Walk>> {
    let mut walks = vec![];
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let walk: Walk = line.parse().map_err(|why| {
            let msg = format!("bad walk at line {}: {}", lineno + 1, why);
            std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
        })?;
        walks.push(walk);
    }
    Ok(walks)
}

/// Trim each walk to the span between its first and last big node; walks
/// carrying no big node are dropped.
pub fn clip_walks(walks: &mut Vec<Walk>, gr: &Graph, threshold: usize) {
    let mut clipped = vec![];
    for walk in walks.iter() {
        let big: Vec<usize> = walk
            .steps
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_node().map(|n| (i, n)))
            .filter(|&(_, n)| gr.is_big(n, threshold))
            .map(|(i, _)| i)
            .collect();
        let (first, last) = match (big.first(), big.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => continue,
        };
        clipped.push(Walk::new(walk.steps[first..=last].to_vec()));
    }
    *walks = clipped;
}

/// The full import pass: load, clip, backfill coverage.
pub fn prepare_starting_walks<P: AsRef<Path>>(
    path: P,
    gr: &Graph,
    threshold: usize,
) -> std::io::Result<Vec<Walk>> {
    let mut walks = load_starting_walks(path)?;
    debug!("STARTING\tloaded\t{}", walks.len());
    clip_walks(&mut walks, gr, threshold);
    add_missing_big_nodes(&mut walks, gr, threshold);
    let lens: Vec<String> = walks
        .iter()
        .map(|w| crate::output::consensus(w, gr).len().to_string())
        .collect();
    debug!("STARTING\tlens\t{}", lens.join(" "));
    Ok(walks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use definitions::Step;

    fn graph() -> Graph {
        let seqs = vec![vec![b'A'; 800], vec![b'C'; 60], vec![b'G'; 900]];
        Graph::from_seqs(&seqs, &[(0, 2), (2, 4)], 47)
    }

    #[test]
    fn parses_signed_walk_lines() {
        let text = "0 2 4\n\n0 -120 4\n";
        let walks = parse_walks(text.as_bytes()).unwrap();
        assert_eq!(walks.len(), 2);
        assert_eq!(walks[1].steps[1], Step::Gap(120));
        assert!(parse_walks("0 x 4\n".as_bytes()).is_err());
    }

    #[test]
    fn clipping_trims_to_the_big_span() {
        let gr = graph();
        let mut walks = vec![
            Walk::from_nodes(&[2, 0, 2, 4, 2]),
            Walk::from_nodes(&[2]),
        ];
        clip_walks(&mut walks, &gr, 500);
        assert_eq!(walks.len(), 1);
        let nodes: Vec<_> = walks[0].nodes().collect();
        assert_eq!(nodes, vec![0, 2, 4]);
    }
}
