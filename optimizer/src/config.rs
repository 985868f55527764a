//! Run configuration.
//!
//! The config file is line-oriented: `[name]` opens a read-set section,
//! `key=value` lines starting with a lowercase letter set options (global
//! when outside any section), and everything else is ignored. Unknown keys
//! are silently ignored; a read set missing a required key is reported and
//! skipped. The format is a compatibility contract, so it is parsed by hand
//! rather than through a config crate.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub const DEFAULT_KMER: usize = 47;

#[derive(Debug, Clone)]
pub struct RawConfig {
    pub globals: HashMap<String, String>,
    /// Read-set sections in file order; order determines library indexing.
    pub read_sets: Vec<(String, HashMap<String, String>)>,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> std::io::Result<RawConfig> {
    let reader = std::fs::File::open(path).map(BufReader::new)?;
    parse_config(reader)
}

pub fn parse_config<R: BufRead>(reader: R) -> std::io::Result<RawConfig> {
    let mut globals = HashMap::new();
    let mut read_sets: Vec<(String, HashMap<String, String>)> = vec![];
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        if line.starts_with('[') {
            let name = line[1..].trim_end_matches(']').to_string();
            read_sets.push((name, HashMap::new()));
        } else if line.starts_with(|c: char| c.is_ascii_lowercase()) {
            let (key, value) = match line.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => {
                    let msg = format!("Bad line in config file:\n{}", line);
                    return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, msg));
                }
            };
            match read_sets.last_mut() {
                Some((_, section)) => section.insert(key, value),
                None => globals.insert(key, value),
            };
        }
    }
    Ok(RawConfig { globals, read_sets })
}

fn extract_f64(map: &HashMap<String, String>, key: &str, default: f64) -> f64 {
    match map.get(key).map(|raw| raw.parse()) {
        Some(Ok(value)) => value,
        Some(Err(_)) => {
            warn!("CONFIG\t{}\tunparsable, using {}", key, default);
            default
        }
        None => default,
    }
}

fn extract_usize(map: &HashMap<String, String>, key: &str, default: usize) -> usize {
    match map.get(key).map(|raw| raw.parse()) {
        Some(Ok(value)) => value,
        Some(Err(_)) => {
            warn!("CONFIG\t{}\tunparsable, using {}", key, default);
            default
        }
        None => default,
    }
}

fn extract_u32(map: &HashMap<String, String>, key: &str, default: u32) -> u32 {
    extract_usize(map, key, default as usize) as u32
}

fn extract_string(map: &HashMap<String, String>, key: &str, default: &str) -> String {
    map.get(key).cloned().unwrap_or_else(|| default.to_string())
}

/// Global knobs honored by the search driver.
#[derive(Debug, Clone)]
pub struct Settings {
    pub threshold: usize,
    pub output_prefix: String,
    pub max_iterations: usize,
    pub do_postprocess: bool,
    pub kmer: usize,
    pub extend_p: u32,
    pub disconnect_p: u32,
    pub interchange_p: u32,
    pub local_p: u32,
    pub join_by_advice_p: u32,
    pub fixlen_p: u32,
    pub t0: f64,
    pub seed: u64,
    pub blasr_path: String,
    pub bowtie_path: String,
}

impl Settings {
    pub fn from_config(config: &RawConfig) -> Self {
        let globals = &config.globals;
        // `do_proprocess` is the recognized spelling; existing config files
        // in the wild use it.
        let do_postprocess = globals.contains_key("do_proprocess");
        let max_iterations = match do_postprocess {
            true => 1,
            false => extract_usize(globals, "max_iterations", 50_000),
        };
        let settings = Self {
            threshold: extract_usize(globals, "long_contig_threshold", 500),
            output_prefix: extract_string(globals, "output_prefix", "output"),
            max_iterations,
            do_postprocess,
            kmer: extract_usize(globals, "kmer", DEFAULT_KMER),
            extend_p: extract_u32(globals, "extend_p", 5),
            disconnect_p: extract_u32(globals, "disconnect_p", 60),
            interchange_p: extract_u32(globals, "interchange_p", 1),
            local_p: extract_u32(globals, "local_p", 60),
            join_by_advice_p: extract_u32(globals, "join_by_advice_p", 25),
            fixlen_p: extract_u32(globals, "fixlen_p", 1),
            t0: extract_f64(globals, "t0", 0.008),
            seed: extract_usize(globals, "seed", 3490) as u64,
            blasr_path: extract_string(globals, "blasr_path", "blasr/alignment/bin"),
            bowtie_path: extract_string(globals, "bowtie_path", "bowtie2"),
        };
        debug!("CONFIG\tblasr_path\t{}", settings.blasr_path);
        debug!("CONFIG\tbowtie_path\t{}", settings.bowtie_path);
        settings
    }
}

/// Per-library scoring knobs shared by all three library kinds.
#[derive(Debug, Clone, Copy)]
pub struct LibrarySettings {
    pub penalty_constant: f64,
    pub penalty_step: f64,
    pub min_prob_per_base: f64,
    pub min_prob_start: f64,
    pub weight: f64,
    pub advice: bool,
}

impl LibrarySettings {
    fn from_section(section: &HashMap<String, String>) -> Self {
        Self {
            penalty_constant: extract_f64(section, "penalty_constant", 0.0),
            penalty_step: extract_f64(section, "penalty_step", 50.0),
            min_prob_per_base: extract_f64(section, "min_prob_per_base", -0.7),
            min_prob_start: extract_f64(section, "min_prob_start", -10.0),
            weight: extract_f64(section, "weight", 1.0),
            advice: section.contains_key("advice"),
        }
    }
}

/// A validated read-set section, ready to be turned into a library.
#[derive(Debug, Clone)]
pub enum ReadSetConfig {
    Single {
        name: String,
        cache_prefix: String,
        filename: String,
        match_prob: f64,
        mismatch_prob: f64,
        settings: LibrarySettings,
    },
    Paired {
        name: String,
        cache_prefix: String,
        filename1: String,
        filename2: String,
        insert_mean: f64,
        insert_std: f64,
        match_prob: f64,
        mismatch_prob: f64,
        settings: LibrarySettings,
    },
    Pacbio {
        name: String,
        cache_prefix: String,
        filename: String,
        match_prob: f64,
        mismatch_prob: f64,
        settings: LibrarySettings,
    },
}

/// Validate the read-set sections. A section with a missing required key or
/// an unknown type is reported on stderr and skipped, never fatal.
pub fn read_set_configs(config: &RawConfig) -> Vec<ReadSetConfig> {
    let mut specs = vec![];
    for (name, section) in config.read_sets.iter() {
        let cache_prefix = extract_string(section, "cache_prefix", name);
        let kind = match section.get("type") {
            Some(kind) => kind.as_str(),
            None => {
                eprintln!("No type for read set {}, ignoring...", name);
                continue;
            }
        };
        let mismatch_prob = extract_f64(section, "mismatch_prob", 0.01);
        let match_prob = 1.0 - 4.0 * mismatch_prob;
        let settings = LibrarySettings::from_section(section);
        match kind {
            "single" | "pacbio" => {
                let filename = match section.get("filename") {
                    Some(filename) => filename.clone(),
                    None => {
                        eprintln!("Missing filename for read set {}, ignoring...", name);
                        continue;
                    }
                };
                let name = name.clone();
                if kind == "single" {
                    specs.push(ReadSetConfig::Single {
                        name,
                        cache_prefix,
                        filename,
                        match_prob,
                        mismatch_prob,
                        settings,
                    });
                } else {
                    specs.push(ReadSetConfig::Pacbio {
                        name,
                        cache_prefix,
                        filename,
                        match_prob,
                        mismatch_prob,
                        settings,
                    });
                }
            }
            "paired" => {
                let required = ["filename1", "filename2", "insert_mean", "insert_std"];
                if let Some(missing) = required.iter().find(|key| !section.contains_key(**key)) {
                    eprintln!("Missing {} for read set {}, ignoring...", missing, name);
                    continue;
                }
                specs.push(ReadSetConfig::Paired {
                    name: name.clone(),
                    cache_prefix,
                    filename1: section["filename1"].clone(),
                    filename2: section["filename2"].clone(),
                    insert_mean: extract_f64(section, "insert_mean", 0.0),
                    insert_std: extract_f64(section, "insert_std", 1.0),
                    match_prob,
                    mismatch_prob,
                    settings,
                });
            }
            unknown => {
                eprintln!("Unknown type {} for read set {}, ignoring...", unknown, name);
            }
        }
    }
    specs
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = "\
graph=graph.txt
output_prefix=run1
max_iterations=2000
t0=0.016
# a comment line, ignored
Uppercase lines are ignored too

[frag]
type=single
filename=frag.fastq
weight=2

[jump]
type=paired
filename1=jump_1.fastq
filename2=jump_2.fastq
insert_mean=3000
insert_std=300
advice=yes

[broken]
type=paired
filename1=only_one.fastq
";

    #[test]
    fn parses_globals_and_sections() {
        let raw = parse_config(EXAMPLE.as_bytes()).unwrap();
        assert_eq!(raw.globals["graph"], "graph.txt");
        assert_eq!(raw.read_sets.len(), 3);
        assert_eq!(raw.read_sets[0].0, "frag");
        assert_eq!(raw.read_sets[1].1["insert_mean"], "3000");
    }

    #[test]
    fn settings_defaults_and_overrides() {
        let raw = parse_config(EXAMPLE.as_bytes()).unwrap();
        let settings = Settings::from_config(&raw);
        assert_eq!(settings.max_iterations, 2000);
        assert_eq!(settings.threshold, 500);
        assert_eq!(settings.extend_p, 5);
        assert!((settings.t0 - 0.016).abs() < 1e-12);
        assert!(!settings.do_postprocess);
    }

    #[test]
    fn postprocess_pins_one_iteration() {
        let raw = parse_config("do_proprocess=true\nmax_iterations=999\n".as_bytes()).unwrap();
        let settings = Settings::from_config(&raw);
        assert!(settings.do_postprocess);
        assert_eq!(settings.max_iterations, 1);
    }

    #[test]
    fn bad_key_value_line_is_fatal() {
        assert!(parse_config("graph graph.txt\n".as_bytes()).is_err());
    }

    #[test]
    fn read_sets_skip_incomplete_sections() {
        let raw = parse_config(EXAMPLE.as_bytes()).unwrap();
        let specs = read_set_configs(&raw);
        assert_eq!(specs.len(), 2);
        match &specs[0] {
            ReadSetConfig::Single {
                cache_prefix,
                settings,
                match_prob,
                ..
            } => {
                assert_eq!(cache_prefix, "frag");
                assert!((settings.weight - 2.0).abs() < 1e-12);
                assert!((match_prob - 0.96).abs() < 1e-12);
            }
            other => panic!("expected single library, got {:?}", other),
        }
        match &specs[1] {
            ReadSetConfig::Paired {
                insert_mean,
                settings,
                ..
            } => {
                assert!((insert_mean - 3000.0).abs() < 1e-12);
                assert!(settings.advice);
            }
            other => panic!("expected paired library, got {:?}", other),
        }
    }
}
