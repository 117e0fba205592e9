use std::{str::FromStr, thread, time::Duration};

use bazaar_dht::{Config, Contact, Dht, Id};

use clap::Parser;

use tracing::{info, Level};
use tracing_subscriber;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
    /// Seed node to join through, as `host:port:guid`
    #[arg(short, long)]
    bootstrap: Vec<String>,
    /// Nickname announced to other nodes
    #[arg(short, long, default_value = "")]
    nickname: String,
    /// Key to store a listing under once the node is up
    #[arg(long)]
    store: Option<String>,
}

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();

    let bootstrap = cli
        .bootstrap
        .iter()
        .map(|seed| parse_seed(seed).expect("invalid bootstrap node, expected host:port:guid"))
        .collect();

    let guid = Id::random();

    let dht = Dht::new(Config {
        guid: Some(guid),
        port: cli.port,
        pubkey: guid.to_string(),
        nickname: cli.nickname,
        bootstrap,
        ..Config::default()
    })
    .expect("Failed to start DHT node");

    let contact = dht.info().expect("DHT node stopped").contact().clone();

    println!(
        "\nNode running, join it with: --bootstrap {}:{}:{}\n",
        contact.hostname, contact.port, contact.guid
    );

    if let Some(key) = cli.store {
        dht.store(&key, serde_json::json!({ "seller": contact.guid.to_string() }))
            .expect("DHT node stopped");
        info!(key, "Stored listing");
    }

    loop {
        thread::sleep(Duration::from_secs(10));

        let Ok(info) = dht.info() else {
            break;
        };

        info!(
            id = %info.id(),
            routing_table_size = info.routing_table_size(),
            active_peers = info.active_peers(),
            active_searches = info.active_searches(),
            stored_keys = info.stored_keys(),
            "=== DHT Node Status ==="
        );
    }
}

fn parse_seed(seed: &str) -> Option<Contact> {
    let mut parts = seed.rsplitn(3, ':');

    let guid = Id::from_str(parts.next()?).ok()?;
    let port = parts.next()?.parse().ok()?;
    let hostname = parts.next()?;

    Some(Contact::new(guid, hostname, port, guid.to_string(), ""))
}
