use std::env;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::process;

use settle_eng::csv::{apply_seed, read_seed};
use settle_eng::{EngineConfig, InMemoryBackend, SettlementEngine, rpc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: settle-eng <seed.csv> <requests.jsonl> [config.json]";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let (Some(seed_path), Some(requests_path)) = (args.next(), args.next()) else {
        eprintln!("{USAGE}");
        process::exit(2);
    };

    let config = match args.next() {
        Some(path) => EngineConfig::from_json_file(&path).unwrap_or_else(|e| {
            error!("{e}");
            process::exit(2);
        }),
        None => EngineConfig::default(),
    };

    let backend = InMemoryBackend::new(&config);
    let seed = read_seed(&seed_path).unwrap_or_else(|e| {
        error!("{e}");
        process::exit(2);
    });
    for result in seed {
        match result {
            Ok(record) => apply_seed(&backend, record).await,
            Err(e) => warn!("{e}"),
        }
    }

    let engine = SettlementEngine::new(config, backend.stores()).unwrap_or_else(|e| {
        error!("{e}");
        process::exit(2);
    });

    let requests = File::open(&requests_path).unwrap_or_else(|e| {
        error!(path = %requests_path, "failed to open requests: {e}");
        process::exit(2);
    });

    let (line_sender, line_receiver) = tokio::sync::mpsc::channel(16);
    tokio::spawn(async move {
        for line in BufReader::new(requests).lines() {
            match line {
                Ok(line) => {
                    if line_sender.send(line).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("failed to read request line: {e}");
                    break;
                }
            }
        }
    });

    rpc::serve(&engine, ReceiverStream::new(line_receiver), |response| {
        println!("{}", response.to_json());
    })
    .await;

    let pending = engine.retry_derived_updates().await;
    if pending > 0 {
        warn!(pending, "derived updates still pending at shutdown");
    }
}
