//! CareHub store CLI
//!
//! Operator tool for reading and modifying collections in the platform's
//! data repository.

mod config;

use clap::Parser;
use serde_json::Value;
use tracing::info;

use carehub_persistence::{CollectionStore, Document};

use crate::config::{CliConfig, Command, parse_payload};

/// Initializes the tracing subscriber. `RUST_LOG` wins over `level`.
fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("carehub_persistence={level},carehub_store={level}"))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(store: &CollectionStore, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Get { collection, force } => {
            let documents = store.get(&collection, force).await?;
            print_json(&documents)
        }
        Command::Find {
            collection,
            conditions,
        } => {
            let fields: Document = conditions.into_iter().collect();
            let documents = store.find_where_equal(&collection, fields).await?;
            print_json(&documents)
        }
        Command::GetById { collection, key } => match store.find_by_id(&collection, &key).await? {
            Some(document) => print_json(&document),
            None => anyhow::bail!("no document '{key}' in '{collection}'"),
        },
        Command::Insert { collection, data } => {
            let (document, receipt) = store
                .insert(&collection, parse_payload(&data)?)
                .await?
                .confirm()
                .await?;
            info!(collection = %collection, attempts = receipt.attempts, "insert committed");
            print_json(&document)
        }
        Command::Update {
            collection,
            key,
            data,
        } => {
            let (document, receipt) = store
                .update(&collection, &key, parse_payload(&data)?)
                .await?
                .confirm()
                .await?;
            info!(collection = %collection, attempts = receipt.attempts, "update committed");
            print_json(&document)
        }
        Command::Delete { collection, key } => {
            let (removed, receipt) = store.delete(&collection, &key).await?.confirm().await?;
            if removed.is_empty() {
                info!(collection = %collection, key = %key, "nothing to delete");
            } else {
                info!(
                    collection = %collection,
                    removed = removed.len(),
                    attempts = receipt.attempts,
                    "delete committed"
                );
            }
            print_json(&Value::from(removed.len()))
        }
        Command::Collections => print_json(&store.schemas().collections()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();
    init_logging(&cli.log_level);

    let config = cli.store_config();
    config.validate()?;
    let schemas = cli.load_schemas()?;

    info!(
        owner = %config.owner,
        repo = %config.repo,
        branch = %config.branch,
        base_path = %config.base_path,
        "Opening collection store"
    );

    let store = CollectionStore::github(config, schemas)?;
    run(&store, cli.command).await
}
