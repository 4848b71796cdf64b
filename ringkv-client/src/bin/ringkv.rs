//! RingKV command-line client.
//!
//! Runs one operation against a cluster described on the command line:
//!
//! ```bash
//! ringkv --node 0:localhost:6666:0,1,2 --node 1:localhost:6667:3,4,5 \
//!     --store test put chocolate yum
//!
//! ringkv --node 0:localhost:6666:0,1,2 --node 1:localhost:6667:3,4,5 \
//!     --store test --routing client get chocolate
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::time::Duration;

use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use ringkv_client::{Client, ClientConfig, RequestOptions, StoreOperations};
use ringkv_core::{Cluster, Node, NodeId, PartitionId, RoutingMode, StoreDefinition, Versioned};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Routing mode of the target store.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum Routing {
    /// The contacted node forwards requests to the key's owner.
    #[default]
    Server,
    /// The client connects to the key's owner directly.
    Client,
}

impl From<Routing> for RoutingMode {
    fn from(routing: Routing) -> Self {
        match routing {
            Routing::Server => Self::Server,
            Routing::Client => Self::Client,
        }
    }
}

/// RingKV command-line client.
#[derive(Parser, Debug)]
#[command(name = "ringkv")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cluster node in format `node_id:host:port:p1,p2,...`.
    /// Can be specified multiple times; order defines failover order.
    #[arg(long = "node", value_parser = parse_node, required = true)]
    nodes: Vec<Node>,

    /// Store to operate on.
    #[arg(long, default_value = "test")]
    store: String,

    /// Routing mode of the store.
    #[arg(long, value_enum, default_value = "server")]
    routing: Routing,

    /// Replication factor of the store.
    #[arg(long, default_value = "1")]
    replication_factor: u32,

    /// Request timeout in milliseconds.
    #[arg(long, default_value = "10000")]
    timeout_ms: u64,

    /// Start at a random node instead of the first one.
    #[arg(long)]
    randomize: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn")]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

/// Operation to run.
#[derive(Subcommand, Debug)]
enum Command {
    /// Reads a key.
    Get {
        /// Key to read.
        key: String,
    },
    /// Reads several keys.
    GetAll {
        /// Keys to read.
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Writes a value.
    Put {
        /// Key to write.
        key: String,
        /// Value to write.
        value: String,
    },
    /// Deletes a key.
    Delete {
        /// Key to delete.
        key: String,
    },
}

/// Parses a node specification in format `node_id:host:port:p1,p2,...`.
///
/// Example: `1:node1:6667:3,4,5` means node 1 listens on host "node1",
/// port 6667, and owns partitions 3, 4 and 5.
fn parse_node(s: &str) -> Result<Node, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 4 {
        return Err(format!(
            "invalid node format '{s}', expected 'node_id:host:port:p1,p2,...'"
        ));
    }

    let node_id: i32 = parts[0]
        .parse()
        .map_err(|_| format!("invalid node_id '{}' in node '{s}'", parts[0]))?;

    let host = parts[1];
    if host.is_empty() {
        return Err(format!("empty host in node '{s}'"));
    }

    let port: u16 = parts[2]
        .parse()
        .map_err(|_| format!("invalid port '{}' in node '{s}'", parts[2]))?;

    let partitions = parts[3]
        .split(',')
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<i32>()
                .map(PartitionId::new)
                .map_err(|_| format!("invalid partition '{p}' in node '{s}'"))
        })
        .collect::<Result<Vec<_>, String>>()?;

    Ok(Node::new(NodeId::new(node_id), host, port, partitions))
}

fn print_versioned(key: &str, versioned: Option<&Versioned>) {
    match versioned {
        Some(versioned) => println!(
            "{key} = {} {:?}",
            String::from_utf8_lossy(&versioned.value),
            versioned.version
        ),
        None => println!("{key} not found"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let store = StoreDefinition::new(args.store)
        .with_routing(args.routing.into())
        .with_replication_factor(args.replication_factor);
    let mut config = ClientConfig::new(store).with_randomize(args.randomize);
    config.connection.request_timeout = Duration::from_millis(args.timeout_ms);

    info!(nodes = args.nodes.len(), command = ?args.command, "Starting ringkv");

    let client = Client::connect(Cluster::new(args.nodes)?, config).await?;
    let options = RequestOptions::default();

    match args.command {
        Command::Get { key } => {
            let found = client.get(Bytes::from(key.clone()), &options).await?;
            print_versioned(&key, found.as_ref());
        }
        Command::GetAll { keys } => {
            let found = client
                .bulk_get(keys.iter().cloned().map(Bytes::from).collect(), &options)
                .await?;
            for key in &keys {
                print_versioned(key, found.get(key.as_bytes()));
            }
        }
        Command::Put { key, value } => {
            let written = client
                .put(Bytes::from(key.clone()), Bytes::from(value), &options)
                .await?;
            print_versioned(&key, Some(&written));
        }
        Command::Delete { key } => {
            let deleted = client.delete(Bytes::from(key.clone()), &options).await?;
            println!("{key} {}", if deleted { "deleted" } else { "not found" });
        }
    }

    client.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node() {
        let node = parse_node("2:node2:6668:6,7,8").unwrap();
        assert_eq!(node.id, NodeId::new(2));
        assert_eq!(node.addr(), "node2:6668");
        assert_eq!(node.partitions.len(), 3);
    }

    #[test]
    fn test_parse_node_invalid() {
        assert!(parse_node("2:node2:6668").is_err());
        assert!(parse_node("x:node2:6668:1").is_err());
        assert!(parse_node("2::6668:1").is_err());
        assert!(parse_node("2:node2:6668:a").is_err());
    }
}
