//! Definitions -- the shared data model for the `mla` assembly optimizer.
//! The optimizer, the CLI, and the on-disk checkpoints all speak in terms of
//! walks through the assembly graph, encoded by the types below and
//! (de)serialized as JSON via serde.

use serde::{Deserialize, Serialize};

/// Return the reverse-complement partner of a node.
/// Nodes come in pairs: node `n` and node `n ^ 1` encode the same biological
/// sequence in opposite orientations.
pub fn twin(node: usize) -> usize {
    node ^ 1
}

/// Canonical representative of a node/twin pair (always the even id).
pub fn canonical(node: usize) -> usize {
    node & !1
}

/// One element of a walk: a node of the assembly graph, or a run of `g`
/// bases of unknown sequence (the original text format encodes the latter
/// as the negative integer `-g`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    Node(usize),
    Gap(usize),
}

impl Step {
    pub fn as_node(&self) -> Option<usize> {
        match *self {
            Step::Node(n) => Some(n),
            Step::Gap(_) => None,
        }
    }
    pub fn is_node(&self) -> bool {
        matches!(self, Step::Node(_))
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            Step::Node(n) => write!(f, "{}", n),
            Step::Gap(g) => write!(f, "-{}", g),
        }
    }
}

/// A walk (path) through the assembly graph: an ordered run of nodes,
/// optionally interleaved with gap markers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Walk {
    pub steps: Vec<Step>,
}

impl Walk {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }
    pub fn from_nodes(nodes: &[usize]) -> Self {
        Self {
            steps: nodes.iter().map(|&n| Step::Node(n)).collect(),
        }
    }
    pub fn singleton(node: usize) -> Self {
        Self {
            steps: vec![Step::Node(node)],
        }
    }
    pub fn len(&self) -> usize {
        self.steps.len()
    }
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
    /// Iterate over the node steps, skipping gap markers.
    pub fn nodes(&self) -> impl Iterator<Item = usize> + '_ {
        self.steps.iter().filter_map(Step::as_node)
    }
    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }
    pub fn first_node(&self) -> Option<usize> {
        self.nodes().next()
    }
    pub fn last_node(&self) -> Option<usize> {
        self.steps.iter().rev().filter_map(Step::as_node).next()
    }
    /// The same walk read in the opposite orientation: the step order is
    /// reversed and every node is replaced by its twin.
    pub fn reversed(&self) -> Walk {
        let steps = self
            .steps
            .iter()
            .rev()
            .map(|step| match *step {
                Step::Node(n) => Step::Node(twin(n)),
                Step::Gap(g) => Step::Gap(g),
            })
            .collect();
        Walk { steps }
    }
    pub fn push_node(&mut self, node: usize) {
        self.steps.push(Step::Node(node));
    }
    pub fn push_gap(&mut self, gap: usize) {
        self.steps.push(Step::Gap(gap));
    }
    /// True if the walk contains `node` or its twin.
    pub fn contains_pair(&self, node: usize) -> bool {
        self.nodes().any(|n| canonical(n) == canonical(node))
    }
    /// Drop gap markers from both ends. A gap at an endpoint asserts
    /// nothing and only inflates the consensus with ambiguous bases.
    pub fn trim_gaps(&mut self) {
        while matches!(self.steps.first(), Some(Step::Gap(_))) {
            self.steps.remove(0);
        }
        while matches!(self.steps.last(), Some(Step::Gap(_))) {
            self.steps.pop();
        }
    }
}

impl std::fmt::Display for Walk {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let fields: Vec<_> = self.steps.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", fields.join(" "))
    }
}

impl std::str::FromStr for Walk {
    type Err = std::num::ParseIntError;
    /// Parse the whitespace-separated signed-integer encoding: `12 -45 14`
    /// is node 12, a 45-base gap, then node 14.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut steps = vec![];
        for field in s.split_whitespace() {
            let value: i64 = field.parse()?;
            if value < 0 {
                steps.push(Step::Gap(-value as usize));
            } else {
                steps.push(Step::Node(value as usize));
            }
        }
        Ok(Walk { steps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn reversed_is_involutive() {
        let walk = Walk::new(vec![Step::Node(4), Step::Gap(10), Step::Node(7)]);
        assert_eq!(walk.reversed().reversed(), walk);
        assert_eq!(
            walk.reversed().steps,
            vec![Step::Node(6), Step::Gap(10), Step::Node(5)]
        );
    }
    #[test]
    fn display_parse_roundtrip() {
        let walk = Walk::new(vec![Step::Node(12), Step::Gap(45), Step::Node(14)]);
        let text = walk.to_string();
        assert_eq!(text, "12 -45 14");
        let back: Walk = text.parse().unwrap();
        assert_eq!(back, walk);
    }
    #[test]
    fn trim_gaps_strips_both_ends() {
        let mut walk = Walk::new(vec![
            Step::Gap(5),
            Step::Node(0),
            Step::Gap(3),
            Step::Node(2),
            Step::Gap(9),
        ]);
        walk.trim_gaps();
        assert_eq!(walk.steps, vec![Step::Node(0), Step::Gap(3), Step::Node(2)]);
    }
    #[test]
    fn pair_membership_sees_both_orientations() {
        let walk = Walk::from_nodes(&[4, 9]);
        assert!(walk.contains_pair(5));
        assert!(walk.contains_pair(8));
        assert!(!walk.contains_pair(2));
    }
}
