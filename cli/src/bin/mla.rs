use definitions::Walk;
use optimizer::config::{self, ReadSetConfig, Settings};
use optimizer::graph::Graph;
use optimizer::optimize::{optimize, OptimizeConfig};
use optimizer::prob::{PacbioLib, PairedLib, ProbCalculator, SingleLib};
use optimizer::read_set::{PacbioReadSet, ReadSet};
use optimizer::starting;
#[macro_use]
extern crate log;

fn main() -> std::io::Result<()> {
    let matches = mla_cli::mla_commands::mla_parser().get_matches();
    let level = match matches.occurrences_of("verbose") {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    set_threads(&matches);
    let config_path = match matches.value_of("config") {
        Some(path) => path,
        None => {
            eprintln!("Missing config file!\nSyntax:\nmla <config file>");
            std::process::exit(1);
        }
    };
    let raw = match config::load_config(config_path) {
        Ok(raw) => raw,
        Err(why) => {
            eprintln!("Load config failed\n{}", why);
            std::process::exit(1);
        }
    };
    if !raw.globals.contains_key("graph") && !raw.globals.contains_key("starting_assembly") {
        eprintln!("Missing graph in config");
        std::process::exit(1);
    }
    let settings = Settings::from_config(&raw);
    let specs = config::read_set_configs(&raw);

    let mut graph = match raw.globals.get("graph") {
        Some(path) => match Graph::load(path, settings.kmer) {
            Ok(graph) => graph,
            Err(why) => {
                eprintln!("Load graph failed\n{}", why);
                std::process::exit(1);
            }
        },
        None => {
            // `starting_assembly` alone implies graph construction from the
            // prior assembly, which belongs to the import tool.
            eprintln!("Missing graph in config; run the assembly import tool first");
            std::process::exit(1);
        }
    };

    debug!("START\tLoading reads");
    let calc = match build_libraries(&specs, &graph) {
        Ok(calc) => calc,
        Err(why) => {
            eprintln!("Load read set failed\n{}", why);
            std::process::exit(1);
        }
    };

    let walks: Vec<Walk> = match raw.globals.get("starting_assembly") {
        Some(path) => starting::prepare_starting_walks(path, &graph, settings.threshold)?,
        None => graph
            .big_pairs(settings.threshold)
            .map(Walk::singleton)
            .collect(),
    };
    debug!("START\tOptimization\t{} starting walks", walks.len());
    let config = OptimizeConfig::from_settings(&settings);
    let best = optimize(&mut graph, &calc, walks, &config)?;
    debug!("DONE\t{} walks\t{}.fas", best.len(), settings.output_prefix);
    Ok(())
}

/// One-time preparation of every configured library, in the order the
/// sections appear in the config file.
fn build_libraries(specs: &[ReadSetConfig], graph: &Graph) -> std::io::Result<ProbCalculator> {
    let mut single = vec![];
    let mut paired = vec![];
    let mut pacbio = vec![];
    for spec in specs.iter() {
        match spec {
            ReadSetConfig::Single {
                cache_prefix,
                filename,
                match_prob,
                mismatch_prob,
                settings,
                ..
            } => {
                let mut set = ReadSet::new(cache_prefix, filename, *match_prob, *mismatch_prob);
                set.load_alignments()?;
                set.preprocess_reads();
                set.prepare_read_index();
                single.push(SingleLib {
                    settings: *settings,
                    set,
                });
            }
            ReadSetConfig::Paired {
                cache_prefix,
                filename1,
                filename2,
                insert_mean,
                insert_std,
                match_prob,
                mismatch_prob,
                settings,
                ..
            } => {
                let prefix1 = format!("{}1", cache_prefix);
                let prefix2 = format!("{}2", cache_prefix);
                let mut first = ReadSet::new(&prefix1, filename1, *match_prob, *mismatch_prob);
                first.load_alignments()?;
                first.preprocess_reads();
                first.prepare_read_index();
                let mut second = ReadSet::new(&prefix2, filename2, *match_prob, *mismatch_prob);
                second.load_alignments()?;
                second.preprocess_reads();
                second.prepare_read_index();
                paired.push(PairedLib {
                    settings: *settings,
                    insert_mean: *insert_mean,
                    insert_std: *insert_std,
                    first,
                    second,
                });
            }
            ReadSetConfig::Pacbio {
                cache_prefix,
                filename,
                match_prob,
                mismatch_prob,
                settings,
                ..
            } => {
                let mut set =
                    PacbioReadSet::new(cache_prefix, filename, *match_prob, *mismatch_prob);
                set.load_alignments()?;
                set.preprocess_reads();
                set.normalize_cache(graph);
                set.compute_anchors(graph);
                pacbio.push(PacbioLib {
                    settings: *settings,
                    set,
                });
            }
        }
    }
    Ok(ProbCalculator::new(single, paired, pacbio))
}

fn set_threads(matches: &clap::ArgMatches) {
    if let Some(threads) = matches.value_of("threads").and_then(|num| num.parse().ok()) {
        debug!("Set Threads\t{}", threads);
        if let Err(why) = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
        {
            debug!("{:?}", why);
        }
    }
}
