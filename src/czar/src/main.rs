#[macro_use]
extern crate log;
use env_logger::Env;
extern crate clap;
use clap::{App, Arg, ArgMatches};
#[macro_use]
extern crate serde;

use std::process;
use std::sync::Arc;

use common::database::MemFacade;
use common::QservError;
use qproc::ChunkSpec;
use wsched::{BlendScheduler, Foreman};

use crate::config::{parse_ids, CzarConfig};
use crate::loopback::{EchoRunner, LoopbackTransport};
use crate::user_query::{QueryState, UserQuery};

mod config;
mod loopback;
mod user_query;

/// Builds the run settings from a config file or the command line.
fn load_config(matches: &ArgMatches) -> Result<CzarConfig, QservError> {
    let mut config = if let Some(path) = matches.value_of("config") {
        CzarConfig::from_file(path)?
    } else {
        CzarConfig::default()
    };
    if let Some(c) = matches.value_of("catalog") {
        config.catalog = c.to_string();
    }
    if let Some(db) = matches.value_of("db") {
        config.default_db = db.to_string();
    }
    if let Some(q) = matches.value_of("query") {
        config.query = q.to_string();
    }
    if let Some(c) = matches.value_of("chunks") {
        config.chunks = parse_ids(c)?;
    }
    if let Some(s) = matches.value_of("subchunks") {
        config.subchunks = parse_ids(s)?;
    }
    if let Some(limit) = matches.value_of("result_limit") {
        config.result_limit = limit
            .parse()
            .map_err(|_| QservError::ConfigError(format!("Bad result_limit {}", limit)))?;
    }
    if let Some(r) = matches.value_of("runners") {
        config.runners = r
            .parse()
            .map_err(|_| QservError::ConfigError(format!("Bad runners {}", r)))?;
    }
    if let Some(b) = matches.value_of("buffer_size") {
        config.buffer_size = b
            .parse()
            .map_err(|_| QservError::ConfigError(format!("Bad buffer_size {}", b)))?;
    }
    config.validate()?;
    Ok(config)
}

/// Plans, dispatches and merges one query. Returns its final state.
fn run(config: &CzarConfig, foreman: &Arc<Foreman>) -> Result<QueryState, QservError> {
    let facade = Arc::new(MemFacade::from_file(&config.catalog)?);
    let mut uq = UserQuery::new(
        facade,
        &config.default_db,
        &config.query,
        config.executive_config(),
        Arc::new(LoopbackTransport::new(foreman.clone())),
        config.buffer_size,
    )?;
    if uq.session().has_chunks() {
        for chunk in config.chunks.iter() {
            let cs = if uq.session().needs_subchunks() {
                ChunkSpec::new(*chunk, config.subchunks.clone())
            } else {
                ChunkSpec::whole(*chunk)
            };
            uq.add_chunk(cs)?;
        }
    }
    uq.submit()?;
    let state = uq.join();
    for row in uq.rows() {
        println!("{}", row.join(","));
    }
    for m in uq.messages() {
        eprintln!("{}", m);
    }
    debug!("Executive state:\n{}", uq.exec_desc());
    info!("Query finished: {}", state);
    Ok(state)
}

/// Entry point for the czar.
///
/// Runs one query against a catalog dump with an in-process worker.
fn main() {
    // Configure log environment
    env_logger::from_env(Env::default().default_filter_or("info")).init();

    let matches = App::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Sets a custom config file")
                .takes_value(true)
                .required(false),
        )
        .arg(
            Arg::with_name("catalog")
                .long("catalog")
                .value_name("catalog")
                .help("JSON catalog dump")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("db")
                .short("d")
                .long("db")
                .value_name("db")
                .help("Default database")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("query")
                .short("q")
                .long("query")
                .value_name("query")
                .help("SQL query to run")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("chunks")
                .long("chunks")
                .value_name("chunks")
                .help("Comma-separated chunk ids")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("subchunks")
                .long("subchunks")
                .value_name("subchunks")
                .help("Comma-separated subchunk ids used for every chunk")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("result_limit")
                .long("result_limit")
                .value_name("bytes")
                .help("Merged result size limit, 0 for none")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("runners")
                .short("r")
                .long("runners")
                .value_name("runners")
                .help("Worker runner pool size")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("buffer_size")
                .long("buffer_size")
                .value_name("bytes")
                .help("Receive buffer size per chunk query")
                .takes_value(true),
        )
        .get_matches();

    let config = match load_config(&matches) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    info!("Starting czar... {:?}", config);

    let foreman = Arc::new(Foreman::new(
        config.foreman_config(),
        Arc::new(BlendScheduler::with_max_running(config.runners)),
        Arc::new(EchoRunner),
    ));
    foreman.start();
    let result = run(&config, &foreman);
    foreman.shutdown();
    match result {
        Ok(QueryState::Success) => {}
        Ok(QueryState::Error) => process::exit(1),
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}
