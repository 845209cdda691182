//! datalayer CLI - Command line interface for the data layer
//!
//! One subcommand per RPC route. Byte fields are hex on the way in and out,
//! and every command prints a single JSON document.

use anyhow::Context;
use clap::{Parser, Subcommand};
use datalayer::{decode_hex, parse_changelist, Config, DataLayer, DiffEntry, Hash, Node, StoreId};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "datalayer")]
#[command(about = "A versioned, content-addressed Merkle key/value store")]
#[command(version)]
struct Cli {
    /// Path to the database file
    #[arg(short, long, default_value = "datalayer.db")]
    database: PathBuf,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new database
    Init {
        /// Replace an existing database at the same path
        #[arg(long)]
        force: bool,
    },

    // === Store Commands ===
    /// Create a new, empty key/value store
    CreateKvStore,

    /// Apply a changelist to a store
    UpdateKvStore {
        /// Store ID (hex)
        #[arg(long)]
        id: String,
        /// JSON array of changes, or @path to read it from a file
        #[arg(long)]
        changelist: String,
    },

    /// List every store
    ListStores,

    // === Query Commands ===
    /// Look up the value for a key
    GetValue {
        /// Store ID (hex)
        #[arg(long)]
        id: String,
        /// Key (hex)
        #[arg(long)]
        key: String,
    },

    /// List every key/value pair
    GetPairs {
        /// Store ID (hex)
        #[arg(long)]
        id: String,
        /// Read an earlier generation instead of the current root
        #[arg(long)]
        generation: Option<u64>,
    },

    /// Show the path from a node up to the root
    GetAncestors {
        /// Store ID (hex)
        #[arg(long)]
        id: String,
        /// Node hash (hex)
        #[arg(long)]
        hash: String,
    },

    /// Build an inclusion proof for a key
    GetProof {
        /// Store ID (hex)
        #[arg(long)]
        id: String,
        /// Key (hex)
        #[arg(long)]
        key: String,
    },

    /// Show the current root of a store
    GetRoot {
        /// Store ID (hex)
        #[arg(long)]
        id: String,
    },

    /// Show every root a store has had
    RootHistory {
        /// Store ID (hex)
        #[arg(long)]
        id: String,
    },

    /// Show key/value changes between two roots
    Diff {
        /// Store ID (hex)
        #[arg(long)]
        id: String,
        /// Older root hash (hex)
        #[arg(long)]
        from: String,
        /// Newer root hash (hex)
        #[arg(long)]
        to: String,
    },

    /// Show database status
    Status,
}

fn main() {
    let cli = Cli::parse();
    let format = cli.format;

    if let Err(e) = run(cli) {
        output(
            &format,
            &serde_json::json!({
                "status": "error",
                "message": format!("{:#}", e)
            }),
        );
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.database)?;
    init_tracing(&config);

    match cli.command {
        Commands::Init { force } => {
            if cli.database.exists() && !force {
                anyhow::bail!(
                    "{} already exists; pass --force to replace it",
                    cli.database.display()
                );
            }
            let layer = DataLayer::create(&cli.database)?;
            if !Config::config_path(&cli.database).exists() {
                layer.config().save(&cli.database)?;
            }
            layer.sync()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "message": format!("Created database at {}", cli.database.display())
                }),
            );
        }

        Commands::CreateKvStore => {
            let layer = open_layer(&cli.database)?;
            let id = layer.create_store()?;
            layer.sync()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "id": id.to_hex()
                }),
            );
        }

        Commands::UpdateKvStore { id, changelist } => {
            let layer = open_layer(&cli.database)?;
            let store_id = parse_store_id(&id)?;
            let json = match changelist.strip_prefix('@') {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read changelist from {}", path))?,
                None => changelist,
            };
            let changes = parse_changelist(&json)?;
            let result = layer.insert(&store_id, &changes)?;
            layer.sync()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "id": result.store_id.to_hex(),
                    "previous_root": result.previous_root.to_hex(),
                    "root": result.root.to_hex(),
                    "generation": result.generation,
                    "changes": changes.len()
                }),
            );
        }

        Commands::ListStores => {
            let layer = open_layer(&cli.database)?;
            let ids: Vec<_> = layer.list_stores().iter().map(StoreId::to_hex).collect();
            output(
                &cli.format,
                &serde_json::json!({
                    "count": ids.len(),
                    "store_ids": ids
                }),
            );
        }

        Commands::GetValue { id, key } => {
            let layer = open_layer(&cli.database)?;
            let store_id = parse_store_id(&id)?;
            let key = decode_hex("key", &key)?;
            let value = layer.get_value(&store_id, &key)?;
            output(
                &cli.format,
                &serde_json::json!({
                    "key": hex::encode(&key),
                    "value": value.map(hex::encode)
                }),
            );
        }

        Commands::GetPairs { id, generation } => {
            let layer = open_layer(&cli.database)?;
            let store_id = parse_store_id(&id)?;
            let pairs = match generation {
                Some(generation) => layer.get_pairs_at(&store_id, generation)?,
                None => layer.get_pairs(&store_id)?,
            };
            let items: Vec<_> = pairs
                .iter()
                .map(|(key, value)| {
                    serde_json::json!({
                        "key": hex::encode(key),
                        "value": hex::encode(value)
                    })
                })
                .collect();
            output(
                &cli.format,
                &serde_json::json!({
                    "count": items.len(),
                    "keys_values": items
                }),
            );
        }

        Commands::GetAncestors { id, hash } => {
            let layer = open_layer(&cli.database)?;
            let store_id = parse_store_id(&id)?;
            let node_hash = parse_hash(&hash)?;
            let ancestors = layer.get_ancestors(&node_hash, &store_id)?;
            let items: Vec<_> = ancestors.iter().map(node_json).collect();
            output(
                &cli.format,
                &serde_json::json!({
                    "count": items.len(),
                    "ancestors": items
                }),
            );
        }

        Commands::GetProof { id, key } => {
            let layer = open_layer(&cli.database)?;
            let store_id = parse_store_id(&id)?;
            let key = decode_hex("key", &key)?;
            let proof = layer.get_proof(&store_id, &key)?;
            let root = layer.get_root(&store_id)?;
            let steps: Vec<_> = proof
                .steps
                .iter()
                .map(|step| {
                    serde_json::json!({
                        "sibling": step.sibling.to_hex(),
                        "side": step.side.to_string()
                    })
                })
                .collect();
            output(
                &cli.format,
                &serde_json::json!({
                    "key": hex::encode(&proof.key),
                    "value": hex::encode(&proof.value),
                    "root": root.to_hex(),
                    "valid": proof.verify(&root),
                    "steps": steps
                }),
            );
        }

        Commands::GetRoot { id } => {
            let layer = open_layer(&cli.database)?;
            let store_id = parse_store_id(&id)?;
            let history = layer.get_root_history(&store_id)?;
            let root = history.last().copied().unwrap_or(Hash::ZERO);
            output(
                &cli.format,
                &serde_json::json!({
                    "id": store_id.to_hex(),
                    "root": root.to_hex(),
                    "generation": history.len().saturating_sub(1)
                }),
            );
        }

        Commands::RootHistory { id } => {
            let layer = open_layer(&cli.database)?;
            let store_id = parse_store_id(&id)?;
            let history = layer.get_root_history(&store_id)?;
            let items: Vec<_> = history
                .iter()
                .enumerate()
                .map(|(generation, root)| {
                    serde_json::json!({
                        "generation": generation,
                        "root": root.to_hex()
                    })
                })
                .collect();
            output(
                &cli.format,
                &serde_json::json!({
                    "id": store_id.to_hex(),
                    "count": items.len(),
                    "roots": items
                }),
            );
        }

        Commands::Diff { id, from, to } => {
            let layer = open_layer(&cli.database)?;
            let store_id = parse_store_id(&id)?;
            let from_hash = parse_hash(&from)?;
            let to_hash = parse_hash(&to)?;

            let diff = layer.get_kv_diff(&store_id, from_hash, to_hash)?;
            let entries: Vec<_> = diff
                .entries
                .iter()
                .map(|e| match e {
                    DiffEntry::Added { key, value } => serde_json::json!({
                        "type": "added",
                        "key": hex::encode(key),
                        "value": hex::encode(value)
                    }),
                    DiffEntry::Removed { key, value } => serde_json::json!({
                        "type": "removed",
                        "key": hex::encode(key),
                        "value": hex::encode(value)
                    }),
                    DiffEntry::Modified {
                        key,
                        old_value,
                        new_value,
                    } => serde_json::json!({
                        "type": "modified",
                        "key": hex::encode(key),
                        "old_value": hex::encode(old_value),
                        "new_value": hex::encode(new_value)
                    }),
                })
                .collect();
            output(
                &cli.format,
                &serde_json::json!({
                    "from": from_hash.to_hex(),
                    "to": to_hash.to_hex(),
                    "added": diff.added_count(),
                    "removed": diff.removed_count(),
                    "modified": diff.modified_count(),
                    "entries": entries
                }),
            );
        }

        Commands::Status => {
            let layer = open_layer(&cli.database)?;
            output(
                &cli.format,
                &serde_json::json!({
                    "database": layer.object_store().path().display().to_string(),
                    "stores": layer.list_stores().len(),
                    "nodes": layer.object_store().node_count(),
                    "config": layer.config()
                }),
            );
        }
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(config.effective_log_filter())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_layer(path: &Path) -> anyhow::Result<DataLayer> {
    let layer = DataLayer::open_or_create(path)?;
    Ok(layer)
}

fn parse_store_id(id: &str) -> anyhow::Result<StoreId> {
    StoreId::from_hex(id).map_err(|_| anyhow::anyhow!("Invalid store id: {}", id))
}

fn parse_hash(hash: &str) -> anyhow::Result<Hash> {
    Hash::from_hex(hash).map_err(|_| anyhow::anyhow!("Invalid node hash: {}", hash))
}

fn node_json(node: &Node) -> serde_json::Value {
    match node {
        Node::Leaf { key, value } => serde_json::json!({
            "hash": node.hash().to_hex(),
            "type": "leaf",
            "key": hex::encode(key),
            "value": hex::encode(value)
        }),
        Node::Internal { left, right } => serde_json::json!({
            "hash": node.hash().to_hex(),
            "type": "internal",
            "left": left.to_hex(),
            "right": right.to_hex()
        }),
    }
}

fn output(format: &OutputFormat, value: &serde_json::Value) {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string(value),
        OutputFormat::Text => serde_json::to_string_pretty(value),
    };
    match rendered {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("cannot render output: {}", e),
    }
}
