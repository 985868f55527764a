//! Likelihood-guided assembly optimization.
//! Given an assembly graph and read libraries with cached alignments, search
//! for the set of walks through the graph that best explains the reads.
#[macro_use]
extern crate log;
pub mod config;
pub mod graph;
pub mod misc;
pub mod moves;
pub mod optimize;
pub mod output;
pub mod prob;
pub mod read_set;
pub mod starting;
