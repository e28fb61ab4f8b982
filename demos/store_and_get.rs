//! Spin up an in-process network, store a value from one node and read it from another.
//!
//! Run: `cargo run --example store_and_get -- --nodes 20 "Hello World!"`

use std::time::Instant;

use clap::Parser;
use kadstore::{GetParameter, Id, StorageEntry, Testnet};
use tracing::Level;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Value to store
    value: String,
    /// Number of nodes in the network
    #[arg(short, long, default_value_t = 20)]
    nodes: usize,
    /// Bucket size and replication factor
    #[arg(short, long, default_value_t = 8)]
    k: usize,
    /// Owner of the value
    #[arg(short, long, default_value = "alice")]
    owner: String,
}

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();

    let start = Instant::now();
    let testnet = Testnet::new_with(cli.nodes, |builder| builder.k(cli.k))
        .expect("failed to create testnet");
    println!(
        "Created a network of {} nodes in {:?}",
        cli.nodes,
        start.elapsed()
    );

    let writer = &testnet.nodes[0];
    let reader = &testnet.nodes[testnet.nodes.len() - 1];

    let key = Id::hash(cli.value.as_bytes());
    let entry = StorageEntry::new(key, cli.owner.as_str(), "text", cli.value.clone());

    let start = Instant::now();
    let targeted = writer.put(entry).expect("put failed");
    println!(
        "\nStored {:?} under {} on {} nodes in {:?}",
        cli.value,
        key,
        targeted,
        start.elapsed()
    );

    let start = Instant::now();
    let parameter = GetParameter::new(key).with_owner(cli.owner.as_str());

    match reader.get(&parameter) {
        Ok(entry) => println!(
            "Got {:?} (last updated {}) in {:?}",
            String::from_utf8_lossy(entry.payload()),
            entry.metadata().last_updated(),
            start.elapsed()
        ),
        Err(error) => println!("Failed to get value: {error}"),
    }
}
