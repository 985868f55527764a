use clap::{Arg, Command};

pub fn mla_parser() -> Command<'static> {
    Command::new("mla")
        .version("0.1")
        .about("Search for the walks through an assembly graph that maximize the read likelihood.")
        .arg(
            Arg::new("config")
                .value_name("CONFIG")
                .index(1)
                .help("Configuration file."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .multiple_occurrences(true)
                .help("Debug mode"),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .long("threads")
                .takes_value(true)
                .help("number of threads"),
        )
}
