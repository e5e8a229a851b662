#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;

mod client_config;
mod file_store;

use std::sync::Arc;

use anyhow::{anyhow, Error};
use futures::Future;
use itertools::Itertools;
use tokio::runtime;
use tokio::sync::broadcast::error::RecvError;
#[cfg(unix)]
use syslog::Facility;

use onion_requests::OnionRoutingContext;
use onion_requests::packet::{OnionVersion, ServerRequest};

use crate::client_config::*;
use crate::file_store::FileStore;

/// Run a future with the runtime specified by config.
fn run<F>(future: F, threads: Threads) -> Result<(), Error>
    where F: Future<Output = Result<(), Error>>
{
    let runtime = match threads {
        Threads::N(1) => runtime::Builder::new_current_thread()
            .enable_all()
            .build()?,
        Threads::N(n) => runtime::Builder::new_multi_thread()
            .worker_threads(usize::from(n.max(1)))
            .enable_all()
            .build()?,
        // builder will detect number of cores automatically
        Threads::Auto => runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?,
    };
    runtime.block_on(future)
}

fn init_logger(log_type: LogType) -> Result<(), Error> {
    match log_type {
        LogType::Stderr => {
            let env = env_logger::Env::default()
                .filter_or("RUST_LOG", "info");
            env_logger::Builder::from_env(env)
                .init();
        },
        LogType::Stdout => {
            let env = env_logger::Env::default()
                .filter_or("RUST_LOG", "info");
            env_logger::Builder::from_env(env)
                .target(env_logger::fmt::Target::Stdout)
                .init();
        },
        #[cfg(unix)]
        LogType::Syslog => {
            syslog::init(Facility::LOG_USER, log::LevelFilter::Info, None)
                .map_err(|e| anyhow!("Failed to initialize syslog backend: {}", e))?;
        },
        LogType::None => { },
    }
    Ok(())
}

/// Log path and clock events until the context goes away.
fn log_events(context: &OnionRoutingContext) {
    let mut events = context.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!("Onion routing event: {:?}", event),
                Err(RecvError::Lagged(count)) => debug!("Missed {} onion routing events", count),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn run_command(context: &OnionRoutingContext, command: ClientCommand, onion_version: OnionVersion) -> Result<(), Error> {
    match command {
        ClientCommand::Paths => {
            let paths = context.paths().build_paths().await?;
            for (i, path) in paths.iter().enumerate() {
                println!("path {}: {}", i + 1, path.nodes().iter().format(" -> "));
            }
        },
        ClientCommand::Swarm { public_key } => {
            let swarm = context.swarms().get_swarm(&public_key).await?;
            for node in swarm.iter().sorted() {
                println!("{}", node);
            }
        },
        ClientCommand::Rpc { method, params, public_key } => {
            let node = match public_key {
                Some(ref public_key) => context.swarms().random_swarm_node(public_key).await?,
                None => context.directory().random_node().await?,
            };
            info!("Calling {} on {}", method, node);
            let response = context.dispatcher()
                .invoke(method, &node, params, public_key.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        },
        ClientCommand::Server { url, x25519, body } => {
            let server = url.origin().ascii_serialization();
            let request = match body {
                Some(ref body) => ServerRequest::post_json(url, body),
                None => ServerRequest::get(url),
            };
            let response = context.dispatcher()
                .send_to_server(&request, &server, &x25519, onion_version)
                .await?;
            println!("status: {}", response.status_code);
            match response.body {
                Some(ref body) => println!("{}", String::from_utf8_lossy(body)),
                None => println!("{}", response.info),
            }
        },
    }
    Ok(())
}

fn main() -> Result<(), Error> {
    let config = cli_parse()?;

    init_logger(config.log_type)?;

    for key in config.unused.keys() {
        warn!("Unused configuration key: {:?}", key);
    }

    let command = config.command.clone().ok_or_else(|| anyhow!("No command given"))?;
    let store = Arc::new(FileStore::open(&config.store_file)?);
    let onion_config = config.onion_config();
    let onion_version = config.onion_version;

    let future = async move {
        let context = OnionRoutingContext::with_http(onion_config, store.clone())?;
        log_events(&context);
        let result = run_command(&context, command, onion_version).await;
        if let Err(e) = store.save() {
            warn!("Failed to save store file: {}", e);
        }
        result
    };

    run(future, config.threads)
}
