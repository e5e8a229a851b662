use std::collections::HashMap;
use std::num::ParseIntError;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Error};
use clap::{Arg, ArgAction, ArgMatches, builder::PossibleValue, Command, ValueEnum, value_parser};
use config::{Config, File as CfgFile, FileFormat as CfgFileFormat};
use serde::{de, Deserialize, Deserializer};
use serde_yaml::Value;
use url::Url;

use onion_requests::OnionConfig;
use onion_requests::crypto::KEY_SIZE;
use onion_requests::packet::{Method, OnionVersion};

/// Store file used when none is given.
pub const DEFAULT_STORE_FILE: &str = "onion-client.json";

/// Config for threading.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
pub enum Threads {
    /// Detect number of threads automatically by the number of CPU cores.
    Auto,
    /// Exact number of threads.
    N(u16)
}

impl FromStr for Threads {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "auto" {
            Ok(Threads::Auto)
        } else {
            u16::from_str(s).map(Threads::N)
        }
    }
}

/// Specifies where to write logs.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
pub enum LogType {
    Stderr,
    Stdout,
    #[cfg(unix)]
    Syslog,
    None,
}

#[cfg(unix)]
const LOG_TYPES: &[LogType] = &[LogType::Stderr, LogType::Stdout, LogType::Syslog, LogType::None];
#[cfg(not(unix))]
const LOG_TYPES: &[LogType] = &[LogType::Stderr, LogType::Stdout, LogType::None];

impl ValueEnum for LogType {
    fn value_variants<'a>() -> &'a [Self] {
        LOG_TYPES
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        use self::LogType::*;
        Some(match self {
            Stderr => PossibleValue::new("Stderr"),
            Stdout => PossibleValue::new("Stdout"),
            #[cfg(unix)]
            Syslog => PossibleValue::new("Syslog"),
            None => PossibleValue::new("None")
        })
    }
}

/// What the client should do once onion routing is up.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientCommand {
    /// Build paths and print them.
    Paths,
    /// Resolve and print a swarm.
    Swarm {
        public_key: String,
    },
    /// Call a snode RPC method on a swarm node or a random node.
    Rpc {
        method: Method,
        params: serde_json::Value,
        public_key: Option<String>,
    },
    /// Send a request to a server behind an exit node. `GET` without body,
    /// `POST` with it.
    Server {
        url: Url,
        x25519: String,
        body: Option<serde_json::Value>,
    },
}

fn parse_onion_version(s: &str) -> Result<OnionVersion, String> {
    match s {
        "v3" => Ok(OnionVersion::V3),
        "v4" => Ok(OnionVersion::V4),
        _ => Err(format!("Unknown onion version '{}', expected v3 or v4", s)),
    }
}

fn parse_method(s: &str) -> Result<Method, String> {
    Method::from_name(s).ok_or_else(|| format!("Unknown snode method '{}'", s))
}

fn parse_json(s: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(s).map_err(|e| format!("Invalid JSON: {}", e))
}

fn parse_public_key(s: &str) -> Result<String, String> {
    hex::decode(s)
        .map(|_| s.to_owned())
        .map_err(|e| format!("Public key is not hex: {}", e))
}

fn parse_x25519(s: &str) -> Result<String, String> {
    match hex::decode(s) {
        Ok(bytes) if bytes.len() == KEY_SIZE => Ok(s.to_owned()),
        Ok(bytes) => Err(format!("x25519 key must be {} bytes, got {}", KEY_SIZE, bytes.len())),
        Err(e) => Err(format!("x25519 key is not hex: {}", e)),
    }
}

fn de_threads<'de, D>(deserializer: D) -> Result<Threads, D::Error> where D: Deserializer<'de> {
    let s = String::deserialize(deserializer)?;

    Threads::from_str(&s)
        .map_err(|e| de::Error::custom(format!("threads: {:?}", e)))
}

fn de_onion_version<'de, D>(deserializer: D) -> Result<OnionVersion, D::Error> where D: Deserializer<'de> {
    let s = String::deserialize(deserializer)?;

    parse_onion_version(&s).map_err(de::Error::custom)
}

/// Config parsed from command line arguments or a config file.
#[derive(Clone, Debug, Deserialize)]
pub struct ClientConfig {
    /// JSON file keeping the node pool, paths and swarms between runs.
    #[serde(rename = "store-file")]
    pub store_file: String,
    /// Seed URLs. Empty means the built-in seeds.
    #[serde(rename = "seed-nodes")]
    #[serde(default)]
    pub seed_nodes: Vec<String>,
    /// Number of paths to maintain.
    #[serde(rename = "paths")]
    pub path_count: usize,
    /// Onion request timeout in seconds, `0` disables it.
    #[serde(rename = "request-timeout")]
    pub request_timeout: u64,
    /// Protocol version for servers.
    #[serde(rename = "onion-version")]
    #[serde(deserialize_with = "de_onion_version")]
    pub onion_version: OnionVersion,
    /// Number of threads for execution.
    #[serde(deserialize_with = "de_threads")]
    pub threads: Threads,
    /// Specifies where to write logs.
    #[serde(rename = "log-type")]
    pub log_type: LogType,
    /// What to do. Always given on the command line.
    #[serde(skip_deserializing)]
    pub command: Option<ClientCommand>,
    /// Unused fields while parsing config file
    #[serde(flatten)]
    pub unused: HashMap<String, Value>,
}

impl ClientConfig {
    /// Onion routing settings derived from this config.
    pub fn onion_config(&self) -> OnionConfig {
        let defaults = OnionConfig::default();
        OnionConfig {
            seed_nodes: if self.seed_nodes.is_empty() {
                defaults.seed_nodes.clone()
            } else {
                self.seed_nodes.clone()
            },
            target_path_count: self.path_count,
            request_timeout: Some(self.request_timeout)
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs),
            onion_version: self.onion_version,
            ..defaults
        }
    }
}

fn app() -> Command {
    Command::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .subcommand_required(true)
        .arg(Arg::new("config")
            .short('c')
            .long("config")
            .help("Load settings from saved config file. \
                Config file format is YAML")
            .num_args(1)
            .conflicts_with_all(["store-file", "seed-node", "paths", "request-timeout", "onion-version", "threads", "log-type"]))
        .arg(Arg::new("store-file")
            .short('f')
            .long("store-file")
            .help("JSON file keeping known nodes, paths and swarms between runs")
            .num_args(1)
            .default_value(DEFAULT_STORE_FILE))
        .arg(Arg::new("seed-node")
            .short('s')
            .long("seed-node")
            .help("Seed URL to fetch service nodes from, e.g. \
                   https://seed.example.org:4433. Built-in seeds are used \
                   when none is given")
            .num_args(1)
            .action(ArgAction::Append))
        .arg(Arg::new("paths")
            .short('p')
            .long("paths")
            .help("Number of onion paths to maintain")
            .num_args(1)
            .value_parser(value_parser!(usize))
            .default_value("2"))
        .arg(Arg::new("request-timeout")
            .short('t')
            .long("request-timeout")
            .help("Onion request timeout in seconds, 0 disables it")
            .num_args(1)
            .value_parser(value_parser!(u64))
            .default_value("20"))
        .arg(Arg::new("onion-version")
            .short('o')
            .long("onion-version")
            .help("Onion protocol version used for servers")
            .num_args(1)
            .value_parser(parse_onion_version)
            .default_value("v3"))
        .arg(Arg::new("threads")
            .short('j')
            .long("threads")
            .help("Number of threads to use. The value 'auto' means that the \
                   number of threads will be determined automatically by the \
                   number of CPU cores")
            .num_args(1)
            .value_parser(value_parser!(Threads))
            .default_value("1"))
        .arg(Arg::new("log-type")
            .short('l')
            .long("log-type")
            .help("Where to write logs")
            .num_args(1)
            .value_parser(value_parser!(LogType))
            .default_value("Stderr"))
        .subcommand(Command::new("paths")
            .about("Build onion paths and print them"))
        .subcommand(Command::new("swarm")
            .about("Resolve the swarm of a public key")
            .arg(Arg::new("public-key")
                .index(1)
                .help("Hex encoded public key")
                .required(true)
                .value_parser(parse_public_key)))
        .subcommand(Command::new("rpc")
            .about("Call a snode RPC method through an onion path")
            .arg(Arg::new("method")
                .index(1)
                .help("Method name, e.g. get_snodes_for_pubkey")
                .required(true)
                .value_parser(parse_method))
            .arg(Arg::new("params")
                .index(2)
                .help("Method parameters as JSON")
                .value_parser(parse_json)
                .default_value("{}"))
            .arg(Arg::new("public-key")
                .short('k')
                .long("public-key")
                .help("Send to a node of the swarm of this public key instead \
                       of a random node")
                .num_args(1)
                .value_parser(parse_public_key)))
        .subcommand(Command::new("server")
            .about("Send an HTTP request to a server through an onion path")
            .arg(Arg::new("url")
                .index(1)
                .help("Full request URL")
                .required(true)
                .value_parser(value_parser!(Url)))
            .arg(Arg::new("x25519")
                .short('x')
                .long("x25519")
                .help("Hex encoded x25519 key of the server")
                .num_args(1)
                .required(true)
                .value_parser(parse_x25519))
            .arg(Arg::new("body")
                .short('b')
                .long("body")
                .help("JSON body, turns the request into a POST")
                .num_args(1)
                .value_parser(parse_json)))
}

/// Parse command line arguments.
pub fn cli_parse() -> Result<ClientConfig, Error> {
    let matches = app().get_matches();
    config_from_matches(&matches)
}

fn config_from_matches(matches: &ArgMatches) -> Result<ClientConfig, Error> {
    let mut config = match matches.get_one::<String>("config") {
        Some(config_path) => parse_config(config_path)?,
        None => run_args(matches),
    };
    config.command = Some(parse_command(matches)?);
    Ok(config)
}

/// Parse settings from a saved file.
fn parse_config(config_path: &str) -> Result<ClientConfig, Error> {
    let config_file = Config::builder()
        .set_default("store-file", DEFAULT_STORE_FILE)?
        .set_default("paths", 2)?
        .set_default("request-timeout", 20)?
        .set_default("onion-version", "v3")?
        .set_default("threads", "1")?
        .set_default("log-type", "Stderr")?
        .add_source(CfgFile::new(config_path, CfgFileFormat::Yaml))
        .build()?;

    Ok(config_file.try_deserialize()?)
}

fn required<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Result<T, Error> {
    matches.get_one::<T>(id)
        .cloned()
        .ok_or_else(|| anyhow!("Missing argument '{}'", id))
}

fn parse_command(matches: &ArgMatches) -> Result<ClientCommand, Error> {
    match matches.subcommand() {
        Some(("paths", _)) => Ok(ClientCommand::Paths),
        Some(("swarm", m)) => Ok(ClientCommand::Swarm {
            public_key: required(m, "public-key")?,
        }),
        Some(("rpc", m)) => Ok(ClientCommand::Rpc {
            method: required(m, "method")?,
            params: required(m, "params")?,
            public_key: m.get_one::<String>("public-key").cloned(),
        }),
        Some(("server", m)) => Ok(ClientCommand::Server {
            url: required(m, "url")?,
            x25519: required(m, "x25519")?,
            body: m.get_one::<serde_json::Value>("body").cloned(),
        }),
        Some((name, _)) => Err(anyhow!("Unknown command '{}'", name)),
        None => Err(anyhow!("No command given")),
    }
}

fn run_args(matches: &ArgMatches) -> ClientConfig {
    let store_file = matches.get_one::<String>("store-file").cloned()
        .unwrap_or_else(|| DEFAULT_STORE_FILE.to_owned());

    let seed_nodes = matches.get_many::<String>("seed-node").unwrap_or_default().cloned().collect();

    let path_count = matches.get_one::<usize>("paths").copied().unwrap_or(2);

    let request_timeout = matches.get_one::<u64>("request-timeout").copied().unwrap_or(20);

    let onion_version = matches.get_one::<OnionVersion>("onion-version").copied().unwrap_or(OnionVersion::V3);

    let threads = matches.get_one::<Threads>("threads").copied().unwrap_or(Threads::N(1));

    let log_type = matches.get_one::<LogType>("log-type").copied().unwrap_or(LogType::Stderr);

    ClientConfig {
        store_file,
        seed_nodes,
        path_count,
        request_timeout,
        onion_version,
        threads,
        log_type,
        command: None,
        unused: HashMap::new(),
    }
}
