// Enable warnings for all clippy lints.
#![warn(
    clippy::correctness,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::pedantic,
    clippy::cargo,
    clippy::restriction
)]
// Selectively disable warnings for some lints.
#![allow(
    clippy::indexing_slicing, // Allow `vec[i]` indexing.
    clippy::module_name_repetitions,  // Allow name repetitions in module and type names.
    clippy::use_debug, // Debug formatting is useful.
    clippy::float_arithmetic, // Needed.
    clippy::integer_arithmetic, // Needed.
    clippy::integer_division, // Needed.
    clippy::multiple_crate_versions, // Beyond our control.
    clippy::missing_docs_in_private_items, // Disabled.
    clippy::missing_inline_in_public_items, // Not considered for now.
    clippy::implicit_return, // Allow.
    clippy::too_many_arguments, // Allow.
    clippy::use_self, // Too pedantic.
    clippy::shadow_same,
    clippy::result_expect_used,
    clippy::unknown_clippy_lints,
    clippy::exit
)]
// Mark some lints as errors.
#![deny(clippy::print_stdout)]

use clap::{arg_enum, value_t, App, Arg, ArgMatches};
use graphbsp::computations::builder::{initialize_computations, ComputationBuilder, ComputationRun};
use graphbsp::computations::parse_properties;
use graphbsp::config::JobConfig;
use graphbsp::error::GBError;
use graphbsp::util::logger::init_logger_with_level;
use graphbsp::util::timer::GbTimer;
use hashbrown::HashMap;
use log::{info, Level};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

arg_enum! {
    #[derive(PartialEq, Debug)]
    pub enum LogLevel {
        Error,
        Warn,
        Info,
        Debug,
        Trace,
    }
}

fn main() -> Result<(), GBError> {
    // Parse command line arguments.
    let matches = App::new("graphbsp")
        .about("Runs a vertex computation over a graph read from CSV files")
        .arg(
            Arg::from_usage("-l, --loglevel=[LEVEL] 'Set the log level'")
                .possible_values(&LogLevel::variants())
                .case_insensitive(true),
        )
        .args_from_usage(
            "<computation> 'Name of the computation to run'
            -p, --property=[NAME=VALUE]... 'Sets a property of the computation'
            -e, --edges=[FILE]... 'Edge files with source,target[,value] lines'
            -v, --vertices=[FILE]... 'Vertex files with id[,value[,edges]] lines'
            -o, --output=[DIR] 'Writes the final vertices into this directory'
            -w, --workers=[N] 'Number of workers'
            -t, --threads=[N] 'Compute threads per worker'
            --partitions=[N] 'Number of graph partitions'
            --max-supersteps=[N] 'Stops after this many supersteps'
            --split-records=[N] 'Input records per split'
            --worker-timeout=[SECONDS] 'Declares a silent worker failed after this long'
            --checkpoint-dir=[DIR] 'Directory for checkpoints'
            --checkpoint-frequency=[N] 'Checkpoints every N supersteps'
            --max-recoveries=[N] 'Gives up after this many recoveries'
            --rebalance 'Moves partitions between workers after loading'",
        )
        .get_matches();

    setup_logger(&matches)?;

    let mut computations: HashMap<String, Box<dyn ComputationBuilder>> = HashMap::new();
    initialize_computations(&mut computations);

    let name = matches.value_of("computation").unwrap_or_default();
    let builder = computations
        .get(name)
        .ok_or_else(|| GBError::UnknownComputation(name.to_owned()))?;
    let properties = parse_properties(matches.values_of("property").into_iter().flatten())?;
    let run = ComputationRun::new(
        paths(&matches, "vertices"),
        paths(&matches, "edges"),
        matches.value_of("output").map(PathBuf::from),
        parse_arg(&matches, "split-records")?,
        job_config(&matches)?,
    );

    let timer = GbTimer::now();
    let summary = builder.execute(&properties, &run)?;
    info!(
        "[Success][{}] {} finished after {} supersteps: {} vertices, {} edges",
        timer.elapsed().to_seconds_string(),
        name,
        summary.supersteps,
        summary.total_vertices,
        summary.total_edges
    );
    let mut aggregates: Vec<_> = summary.aggregates.iter().collect();
    aggregates.sort_by(|a, b| a.0.cmp(b.0));
    for (aggregator, value) in aggregates {
        info!("Aggregator '{}' = {}", aggregator, value);
    }
    Ok(())
}

fn job_config(matches: &ArgMatches) -> Result<JobConfig, GBError> {
    let mut config = JobConfig::default();
    if let Some(workers) = parse_arg(matches, "workers")? {
        config = config.with_workers(workers);
    }
    if let Some(threads) = parse_arg(matches, "threads")? {
        config = config.with_compute_threads(threads).with_loader_threads(threads);
    }
    if let Some(partitions) = parse_arg(matches, "partitions")? {
        config = config.with_partitions(partitions);
    }
    if let Some(max_supersteps) = parse_arg(matches, "max-supersteps")? {
        config = config.with_max_supersteps(max_supersteps);
    }
    if let Some(seconds) = parse_arg(matches, "worker-timeout")? {
        config = config.with_worker_timeout(Duration::from_secs(seconds));
    }
    if let Some(dir) = matches.value_of("checkpoint-dir") {
        let frequency = parse_arg(matches, "checkpoint-frequency")?.unwrap_or(1);
        config = config.with_checkpoints(dir, frequency);
    }
    if let Some(attempts) = parse_arg(matches, "max-recoveries")? {
        config = config.with_max_recovery_attempts(attempts);
    }
    Ok(config.with_rebalance_after_load(matches.is_present("rebalance")))
}

fn parse_arg<T>(matches: &ArgMatches, name: &str) -> Result<Option<T>, GBError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    matches
        .value_of(name)
        .map(|value| {
            value.parse().map_err(|e| {
                GBError::Config(format!("Invalid value '{}' for '--{}': {}", value, name, e))
            })
        })
        .transpose()
}

fn paths(matches: &ArgMatches, name: &str) -> Vec<PathBuf> {
    matches.values_of(name).map_or_else(Vec::new, |files| files.map(PathBuf::from).collect())
}

fn setup_logger(matches: &ArgMatches) -> Result<(), GBError> {
    // Set log level.
    let log_level = match value_t!(matches, "loglevel", LogLevel).unwrap_or(LogLevel::Info) {
        LogLevel::Error => Level::Error,
        LogLevel::Warn => Level::Warn,
        LogLevel::Info => Level::Info,
        LogLevel::Debug => Level::Debug,
        LogLevel::Trace => Level::Trace,
    };
    init_logger_with_level(log_level)
}
