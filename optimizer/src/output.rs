//! Serializing the best walk set: consensus FASTA plus a JSON checkpoint of
//! the walks themselves.

use crate::graph::Graph;
use definitions::{Step, Walk};
use std::io::Write;
use std::path::Path;

/// Consensus sequence of a walk: the first node verbatim, every following
/// node stripped of its (k-1)-base overlap prefix, and a run of `N`s for
/// each gap marker.
pub fn consensus(walk: &Walk, gr: &Graph) -> Vec<u8> {
    let k = gr.kmer();
    let mut seq: Vec<u8> = vec![];
    let mut after_node = false;
    for step in walk.steps.iter() {
        match *step {
            Step::Node(n) => {
                let node_seq = gr.seq(n);
                match after_node {
                    true => seq.extend_from_slice(&node_seq[(k - 1).min(node_seq.len())..]),
                    false => seq.extend_from_slice(node_seq),
                }
                after_node = true;
            }
            Step::Gap(g) => {
                seq.extend(std::iter::repeat(b'N').take(g));
                after_node = false;
            }
        }
    }
    seq
}

/// Write the consensus of every walk at or above the reporting threshold to
/// `{prefix}.fas`, and checkpoint the walk set to `{prefix}.paths.json`.
pub fn write_walks(
    walks: &[Walk],
    gr: &Graph,
    threshold: usize,
    prefix: &str,
) -> std::io::Result<()> {
    let path = format!("{}.fas", prefix);
    let mut writer = bio::io::fasta::Writer::to_file(Path::new(&path))?;
    let mut written = 0usize;
    for (idx, walk) in walks.iter().enumerate() {
        let seq = consensus(walk, gr);
        if seq.len() < threshold {
            continue;
        }
        writer.write(&format!("walk_{}", idx), None, &seq)?;
        written += 1;
    }
    writer.flush()?;
    debug!("OUTPUT\t{}\t{} walks", path, written);
    checkpoint_walks(walks, prefix)
}

fn checkpoint_walks(walks: &[Walk], prefix: &str) -> std::io::Result<()> {
    let path = format!("{}.paths.json", prefix);
    let file = std::fs::File::create(&path).map(std::io::BufWriter::new)?;
    serde_json::to_writer(file, walks)
        .map_err(|why| std::io::Error::new(std::io::ErrorKind::Other, why))
}
